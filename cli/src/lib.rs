mod cli;
mod config_override;
mod output;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use ragchat_backend_client::HttpBackend;
use ragchat_backend_client::RagBackend;
use ragchat_core::Mutation;
use ragchat_core::SendPhase;
use ragchat_core::SessionController;
use ragchat_core::SessionEvent;
use ragchat_core::SessionNotice;
use ragchat_core::config::Config;
use ragchat_core::config::ConfigOverrides;
use ragchat_protocol::ChatId;
use ragchat_protocol::FileId;
use ragchat_protocol::ProjectId;
use tokio::io::AsyncReadExt;
use tracing::debug;
use tracing_subscriber::EnvFilter;

pub use cli::AskArgs;
pub use cli::Cli;
pub use cli::Command;
pub use cli::GitCommand;
pub use cli::ProjectsCommand;
pub use config_override::CliConfigOverrides;

use crate::output::format_chats;
use crate::output::format_file_tree;
use crate::output::format_git_config;
use crate::output::format_messages;
use crate::output::format_projects;
use crate::output::print_json;

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli_kv_overrides = cli
        .config_overrides
        .parse_overrides()
        .map_err(anyhow::Error::msg)?;
    let config = Config::load_with_cli_overrides(
        cli_kv_overrides,
        ConfigOverrides {
            base_url: cli.base_url.clone(),
        },
    )
    .context("failed to load configuration")?;

    let _ = tracing_subscriber::fmt()
        // Fall back to the configured level if `RUST_LOG` is unset or invalid.
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
    debug!(base_url = %config.base_url, "using backend");

    let backend: Arc<dyn RagBackend> = Arc::new(HttpBackend::with_connect_timeout(
        config.base_url.clone(),
        config.connect_timeout,
    ));
    let mut session = SessionController::new(Arc::clone(&backend), config.sync_poller_options());
    let json = cli.json;

    match cli.command {
        Command::Chats => {
            let chats = backend.list_chats().await?;
            if json {
                print_json(&chats)?;
            } else {
                print_listing(&format_chats(&chats), "no chats");
            }
        }
        Command::Messages { chat } => {
            let messages = backend.list_messages(&ChatId::new(chat)).await?;
            if json {
                print_json(&messages)?;
            } else {
                print_listing(&format_messages(&messages), "no messages");
            }
        }
        Command::DeleteChat { chat } => {
            session.delete_chat(ChatId::new(chat));
            wait_for_mutation(&mut session).await?;
        }
        Command::Ask(args) => run_ask(&mut session, args).await?,
        Command::Projects(ProjectsCommand::List) => {
            let projects = backend.list_projects().await?;
            if json {
                print_json(&projects)?;
            } else {
                print_listing(&format_projects(&projects), "no projects");
            }
        }
        Command::Projects(ProjectsCommand::Create { name }) => {
            session.create_project(&name)?;
            wait_for_mutation(&mut session).await?;
        }
        Command::Projects(ProjectsCommand::Delete { project }) => {
            session.delete_project(ProjectId::new(project));
            wait_for_mutation(&mut session).await?;
        }
        Command::Files { project } => {
            let files = backend.list_files(&ProjectId::new(project)).await?;
            if json {
                print_json(&files)?;
            } else {
                print_listing(&format_file_tree(&files), "no files");
            }
        }
        Command::Upload { project, paths } => {
            session.upload_paths(ProjectId::new(project), paths)?;
            wait_for_mutation(&mut session).await?;
        }
        Command::DeleteFile { file } => {
            backend.delete_file(&FileId::new(file)).await?;
        }
        Command::Git(GitCommand::Show { project }) => {
            let config = backend.get_git_config(&ProjectId::new(project)).await?;
            if json {
                print_json(&config)?;
            } else {
                println!("{}", format_git_config(config.as_ref()));
            }
        }
        Command::Git(GitCommand::Link {
            project,
            url,
            branch,
            token,
        }) => {
            session.save_git_config(ProjectId::new(project), &url, &branch, token)?;
            wait_for_mutation(&mut session).await?;
        }
        Command::Git(GitCommand::Unlink { project }) => {
            session.remove_git_config(ProjectId::new(project));
            wait_for_mutation(&mut session).await?;
        }
        Command::Git(GitCommand::Sync {
            project,
            wait: false,
        }) => {
            backend.trigger_git_sync(&ProjectId::new(project)).await?;
            println!("sync started");
        }
        Command::Git(GitCommand::Sync {
            project,
            wait: true,
        }) => run_sync_and_wait(&mut session, ProjectId::new(project)).await?,
    }
    Ok(())
}

fn print_listing(text: &str, empty: &str) {
    if text.is_empty() {
        println!("{empty}");
    } else {
        println!("{text}");
    }
}

/// Print info notices and turn the first error notice into the command's
/// error.
fn report_notices(session: &mut SessionController) -> anyhow::Result<()> {
    let mut first_error = None;
    for notice in session.take_notices() {
        match notice {
            SessionNotice::Info(text) => println!("{text}"),
            SessionNotice::Error(err) => {
                if first_error.is_none() {
                    first_error = Some(err.user_message());
                } else {
                    eprintln!("{}", err.user_message());
                }
            }
        }
    }
    match first_error {
        Some(message) => Err(anyhow::Error::msg(message)),
        None => Ok(()),
    }
}

/// Feed events to the session until `done` has matched `count` of them.
async fn pump_until(
    session: &mut SessionController,
    mut count: usize,
    done: impl Fn(&SessionEvent) -> bool,
) {
    while count > 0 {
        let Some(event) = session.next_event().await else {
            break;
        };
        if done(&event) {
            count -= 1;
        }
        session.handle_event(event);
    }
}

async fn wait_for_mutation(session: &mut SessionController) -> anyhow::Result<()> {
    pump_until(session, 1, |event| {
        matches!(event, SessionEvent::MutationFinished { .. })
    })
    .await;
    report_notices(session)?;
    println!("ok");
    Ok(())
}

async fn read_prompt(prompt: Option<String>) -> anyhow::Result<String> {
    match prompt {
        Some(prompt) if prompt != "-" => Ok(prompt),
        _ => {
            let mut buffer = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buffer)
                .await
                .context("failed to read prompt from stdin")?;
            Ok(buffer)
        }
    }
}

async fn run_ask(session: &mut SessionController, args: AskArgs) -> anyhow::Result<()> {
    let prompt = read_prompt(args.prompt).await?;
    let mut wanted: Vec<ProjectId> = args.projects.into_iter().map(ProjectId::new).collect();
    wanted.sort();
    wanted.dedup();

    if let Some(chat) = args.chat {
        // The chat list carries each chat's stored projects.
        session.load_initial();
        pump_until(session, 1, |event| {
            matches!(event, SessionEvent::ChatsLoaded(_))
        })
        .await;
        report_notices(session)?;
        session.select_chat(ChatId::new(chat));
    }

    let mut toggles: Vec<ProjectId> = Vec::new();
    if !wanted.is_empty() {
        toggles.extend(
            session
                .selected_projects()
                .iter()
                .filter(|p| !wanted.contains(p))
                .cloned(),
        );
    }
    toggles.extend(
        wanted
            .into_iter()
            .filter(|p| !session.selected_projects().contains(p)),
    );
    let persists = if session.active_chat().is_some() {
        toggles.len()
    } else {
        0
    };
    for project in toggles {
        session.toggle_project(project);
    }
    // Each toggle on an existing chat stores the new selection.
    pump_until(session, persists, |event| {
        matches!(
            event,
            SessionEvent::MutationFinished {
                mutation: Mutation::PersistChatProjects(_),
                ..
            }
        )
    })
    .await;

    session.set_input(prompt);
    session.send()?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut printed = 0;
    let mut stdout = std::io::stdout();
    while session.phase() != SendPhase::Idle {
        tokio::select! {
            _ = &mut ctrl_c => {
                session.cancel_stream();
                eprintln!("\ncancelled");
                break;
            }
            event = session.next_event() => {
                let Some(event) = event else {
                    break;
                };
                session.handle_event(event);
                if let Some(text) = session.streaming_text()
                    && text.len() > printed
                {
                    write!(stdout, "{}", &text[printed..])?;
                    stdout.flush()?;
                    printed = text.len();
                }
            }
        }
    }
    if printed > 0 {
        writeln!(stdout)?;
    }
    if let Some(chat_id) = session.active_chat() {
        eprintln!("chat: {chat_id}");
    }
    report_notices(session)
}

async fn run_sync_and_wait(
    session: &mut SessionController,
    project_id: ProjectId,
) -> anyhow::Result<()> {
    // Expanded so that a finished sync refreshes the file tree.
    session.expand_project(project_id.clone());
    session.start_git_sync(project_id.clone());
    eprintln!("waiting for git sync of {project_id}...");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut triggered = false;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                session.collapse_project();
                eprintln!("stopped waiting; the sync continues on the server");
                return Ok(());
            }
            event = session.next_event() => {
                let Some(event) = event else {
                    break;
                };
                if matches!(&event, SessionEvent::SyncTriggered { project_id: p, .. } if *p == project_id) {
                    triggered = true;
                }
                session.handle_event(event);
                if triggered && !session.is_polling(&project_id) {
                    break;
                }
            }
        }
    }
    report_notices(session)?;
    println!("{}", format_git_config(session.git_config()));
    Ok(())
}
