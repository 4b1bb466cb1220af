use std::collections::HashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use ragchat_backend_client::RagBackend;
use ragchat_backend_client::read_upload_file;
use ragchat_backend_client::read_upload_folder;
use ragchat_protocol::Chat;
use ragchat_protocol::ChatId;
use ragchat_protocol::CreateChatRequest;
use ragchat_protocol::FileId;
use ragchat_protocol::FileNode;
use ragchat_protocol::GitConfig;
use ragchat_protocol::Message;
use ragchat_protocol::Project;
use ragchat_protocol::ProjectId;
use ragchat_protocol::SaveGitConfigRequest;
use ragchat_protocol::SendMessageRequest;
use ragchat_protocol::SyncStatus;
use ragchat_protocol::chat_title_from_message;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::active_cell::ActiveCell;
use crate::error::RagChatErr;
use crate::error::Result;
use crate::session_event::Mutation;
use crate::session_event::PollId;
use crate::session_event::SendId;
use crate::session_event::SessionEvent;
use crate::session_event::SessionNotice;
use crate::session_event::StreamId;
use crate::stream::StreamEvent;
use crate::stream::StreamFailure;
use crate::stream::StreamHandle;
use crate::stream::StreamObserver;
use crate::stream::start_stream;
use crate::sync_poller::SyncOutcome;
use crate::sync_poller::SyncPoller;
use crate::sync_poller::SyncPollerOptions;

pub const DEFAULT_GIT_BRANCH: &str = "main";

/// Where the controller is in sending one user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPhase {
    Idle,
    /// Waiting for the chat that will receive the message to be created.
    Sending,
    /// Assistant tokens are arriving.
    Streaming,
}

#[derive(Debug)]
enum Turn {
    Idle,
    CreatingChat { send_id: SendId, message: String },
    Streaming(ActiveStream),
}

#[derive(Debug)]
struct ActiveStream {
    id: StreamId,
    /// Chat the reply belongs to, which may stop being the active chat
    /// before the reply ends.
    chat_id: ChatId,
    buffer: String,
    handle: StreamHandle,
}

#[derive(Debug)]
struct ActivePoll {
    id: PollId,
    poller: SyncPoller,
}

/// Forwards one stream's events into the session channel, tagged with the
/// stream they came from.
struct SessionStreamObserver {
    stream_id: StreamId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionStreamObserver {
    fn forward(&self, event: StreamEvent) {
        let _ = self.tx.send(SessionEvent::Stream {
            stream_id: self.stream_id,
            event,
        });
    }
}

impl StreamObserver for SessionStreamObserver {
    fn on_token(&mut self, token: String) {
        self.forward(StreamEvent::Token(token));
    }

    fn on_complete(&mut self) {
        self.forward(StreamEvent::Completed);
    }

    fn on_failure(&mut self, failure: StreamFailure) {
        self.forward(StreamEvent::Failed(failure));
    }
}

/// Owns everything the user sees: chats, the open chat's messages, the reply
/// being streamed, projects and the expanded project's files and Git link.
///
/// Backend calls run on spawned tasks and report back as [`SessionEvent`]s.
/// The caller drives the controller by feeding those events to
/// [`SessionController::handle_event`] (or calling
/// [`SessionController::step`]) from its own loop, so state is only ever
/// mutated through `&mut self`.
pub struct SessionController {
    backend: Arc<dyn RagBackend>,
    poll_options: SyncPollerOptions,
    tx_event: mpsc::UnboundedSender<SessionEvent>,
    rx_event: mpsc::UnboundedReceiver<SessionEvent>,

    active_chat: ActiveCell<Option<ChatId>>,
    expanded_project: ActiveCell<Option<ProjectId>>,

    turn: Turn,
    input: String,
    /// Armed when a send creates a chat; the next activation of that chat
    /// keeps the optimistic message list instead of reloading it.
    suppress_reload_for: Option<ChatId>,

    chats: Vec<Chat>,
    messages: Vec<Message>,
    projects: Vec<Project>,
    selected_projects: Vec<ProjectId>,
    files: Vec<FileNode>,
    git_config: Option<GitConfig>,

    pollers: HashMap<ProjectId, ActivePoll>,
    next_stream_id: u64,
    next_send_id: u64,
    next_poll_id: u64,
    notices: VecDeque<SessionNotice>,
}

impl SessionController {
    pub fn new(backend: Arc<dyn RagBackend>, poll_options: SyncPollerOptions) -> Self {
        let (tx_event, rx_event) = mpsc::unbounded_channel();
        Self {
            backend,
            poll_options,
            tx_event,
            rx_event,
            active_chat: ActiveCell::new(None),
            expanded_project: ActiveCell::new(None),
            turn: Turn::Idle,
            input: String::new(),
            suppress_reload_for: None,
            chats: Vec::new(),
            messages: Vec::new(),
            projects: Vec::new(),
            selected_projects: Vec::new(),
            files: Vec::new(),
            git_config: None,
            pollers: HashMap::new(),
            next_stream_id: 0,
            next_send_id: 0,
            next_poll_id: 0,
            notices: VecDeque::new(),
        }
    }

    /// Fetch the chat and project lists.
    pub fn load_initial(&mut self) {
        self.load_chats();
        self.load_projects();
    }

    // ---------------------------------------------------------------------
    // Event loop

    /// Wait for the next result of background work.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.rx_event.recv().await
    }

    /// Wait for one event and apply it.
    pub async fn step(&mut self) {
        if let Some(event) = self.next_event().await {
            self.handle_event(event);
        }
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Stream { stream_id, event } => self.on_stream_event(stream_id, event),
            SessionEvent::ChatCreated { send_id, result } => {
                self.on_chat_created(send_id, result)
            }
            SessionEvent::ChatsLoaded(result) => match result {
                Ok(chats) => self.chats = chats,
                Err(err) => self.push_error(err),
            },
            SessionEvent::ProjectsLoaded(result) => match result {
                Ok(projects) => self.projects = projects,
                Err(err) => self.push_error(err),
            },
            SessionEvent::MessagesLoaded { chat_id, result } => {
                self.on_messages_loaded(chat_id, result)
            }
            SessionEvent::FilesLoaded { project_id, result } => {
                if !self.is_expanded(&project_id) {
                    trace!(%project_id, "dropping files of collapsed project");
                    return;
                }
                match result {
                    Ok(files) => self.files = files,
                    Err(err) => self.push_error(err),
                }
            }
            SessionEvent::GitConfigLoaded { project_id, result } => {
                self.on_git_config_loaded(project_id, result)
            }
            SessionEvent::SyncTriggered { project_id, result } => {
                self.on_sync_triggered(project_id, result)
            }
            SessionEvent::SyncFinished {
                project_id,
                poll_id,
                outcome,
            } => self.on_sync_finished(project_id, poll_id, outcome),
            SessionEvent::MutationFinished { mutation, result } => {
                self.on_mutation_finished(mutation, result)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Sending

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    pub fn phase(&self) -> SendPhase {
        match self.turn {
            Turn::Idle => SendPhase::Idle,
            Turn::CreatingChat { .. } => SendPhase::Sending,
            Turn::Streaming(_) => SendPhase::Streaming,
        }
    }

    /// Send the current input to the active chat, creating a chat first when
    /// none is open.
    pub fn send(&mut self) -> Result<()> {
        if !matches!(self.turn, Turn::Idle) {
            return Err(RagChatErr::validation("a reply is still in progress"));
        }
        let message = self.input.trim().to_string();
        if message.is_empty() {
            return Err(RagChatErr::validation("message is empty"));
        }
        self.input.clear();

        match self.active_chat.get() {
            Some(chat_id) => self.begin_stream(chat_id, message),
            None => {
                let request = CreateChatRequest {
                    title: chat_title_from_message(&message),
                    project_ids: self.selected_projects.clone(),
                };
                let send_id = SendId(self.next_send_id);
                self.next_send_id += 1;
                debug!(
                    title = %request.title,
                    send_id = send_id.0,
                    "creating chat for first message"
                );
                self.turn = Turn::CreatingChat { send_id, message };
                let backend = Arc::clone(&self.backend);
                self.spawn_task(async move {
                    let result = backend.create_chat(request).await.map_err(RagChatErr::from);
                    SessionEvent::ChatCreated { send_id, result }
                });
            }
        }
        Ok(())
    }

    /// Abort the reply in progress. No failure is reported for it.
    pub fn cancel_stream(&mut self) -> bool {
        match std::mem::replace(&mut self.turn, Turn::Idle) {
            Turn::Idle => false,
            Turn::CreatingChat { .. } => {
                debug!("send cancelled while creating chat");
                true
            }
            Turn::Streaming(active) => {
                debug!(chat_id = %active.chat_id, "reply stream cancelled");
                active.handle.cancel();
                self.reconcile();
                true
            }
        }
    }

    /// Partial assistant reply, if one is streaming into the active chat.
    pub fn streaming_text(&self) -> Option<&str> {
        match &self.turn {
            Turn::Streaming(active)
                if self
                    .active_chat
                    .matches(|c| c.as_ref() == Some(&active.chat_id)) =>
            {
                Some(active.buffer.as_str())
            }
            _ => None,
        }
    }

    fn begin_stream(&mut self, chat_id: ChatId, message: String) {
        self.messages
            .push(Message::optimistic_user(chat_id.clone(), message.clone()));

        let id = StreamId(self.next_stream_id);
        self.next_stream_id += 1;
        let observer = SessionStreamObserver {
            stream_id: id,
            tx: self.tx_event.clone(),
        };
        let request = SendMessageRequest {
            message,
            project_ids: self.selected_projects.clone(),
        };
        debug!(%chat_id, stream_id = id.0, "starting reply stream");
        let handle = start_stream(Arc::clone(&self.backend), chat_id.clone(), request, observer);
        self.turn = Turn::Streaming(ActiveStream {
            id,
            chat_id,
            buffer: String::new(),
            handle,
        });
    }

    fn on_chat_created(&mut self, send_id: SendId, result: Result<Chat>) {
        let current = matches!(
            self.turn,
            Turn::CreatingChat { send_id: pending, .. } if pending == send_id
        );
        let chat = match result {
            Ok(chat) => chat,
            Err(err) => {
                if current {
                    self.turn = Turn::Idle;
                    self.push_error(err);
                } else {
                    debug!(send_id = send_id.0, "dropping failure of cancelled chat creation");
                }
                return;
            }
        };

        self.chats.retain(|c| c.id != chat.id);
        self.chats.insert(0, chat.clone());
        self.load_chats();

        if !current {
            debug!(
                chat_id = %chat.id,
                send_id = send_id.0,
                "chat created after its send was cancelled"
            );
            return;
        }
        let message = match std::mem::replace(&mut self.turn, Turn::Idle) {
            Turn::CreatingChat { message, .. } => message,
            other => {
                self.turn = other;
                return;
            }
        };

        self.suppress_reload_for = Some(chat.id.clone());
        self.activate_chat(Some(chat.id.clone()));
        if chat.project_ids != self.selected_projects {
            self.persist_chat_projects(chat.id.clone());
        }
        self.begin_stream(chat.id, message);
    }

    fn on_stream_event(&mut self, stream_id: StreamId, event: StreamEvent) {
        let Turn::Streaming(active) = &mut self.turn else {
            trace!(stream_id = stream_id.0, "dropping event for finished stream");
            return;
        };
        if active.id != stream_id {
            trace!(stream_id = stream_id.0, "dropping event for stale stream");
            return;
        }
        match event {
            StreamEvent::Token(token) => active.buffer.push_str(&token),
            StreamEvent::Completed => {
                debug!(chat_id = %active.chat_id, "reply stream completed");
                self.turn = Turn::Idle;
                self.reconcile();
            }
            StreamEvent::Failed(failure) => {
                self.turn = Turn::Idle;
                self.push_error(failure.into());
            }
        }
    }

    /// Replace optimistic state with the backend's copy.
    fn reconcile(&mut self) {
        self.load_chats();
        self.load_projects();
        if let Some(chat_id) = self.active_chat.get() {
            self.load_messages(chat_id);
        }
    }

    // ---------------------------------------------------------------------
    // Chats

    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn active_chat(&self) -> Option<ChatId> {
        self.active_chat.get()
    }

    /// Open an existing chat. Its stored projects become the selection.
    pub fn select_chat(&mut self, chat_id: ChatId) {
        if let Some(chat) = self.chats.iter().find(|c| c.id == chat_id) {
            self.selected_projects = chat.project_ids.clone();
        }
        self.activate_chat(Some(chat_id));
    }

    /// Leave the open chat; the next send creates a new one.
    pub fn new_chat(&mut self) {
        self.activate_chat(None);
    }

    pub fn delete_chat(&mut self, chat_id: ChatId) {
        let backend = Arc::clone(&self.backend);
        let target = chat_id.clone();
        self.spawn_mutation(Mutation::DeleteChat(chat_id), async move {
            backend.delete_chat(&target).await
        });
    }

    fn activate_chat(&mut self, chat_id: Option<ChatId>) {
        self.active_chat.set(chat_id.clone());
        self.messages.clear();
        let Some(chat_id) = chat_id else {
            return;
        };
        let suppressed = self.suppress_reload_for.take();
        if suppressed.as_ref() == Some(&chat_id) {
            trace!(%chat_id, "keeping optimistic messages of new chat");
            return;
        }
        self.load_messages(chat_id);
    }

    fn on_messages_loaded(&mut self, chat_id: ChatId, result: Result<Vec<Message>>) {
        if !self.active_chat.matches(|c| c.as_ref() == Some(&chat_id)) {
            trace!(%chat_id, "dropping messages of inactive chat");
            return;
        }
        let loaded = match result {
            Ok(loaded) => loaded,
            Err(err) => {
                self.push_error(err);
                return;
            }
        };
        let pending: Vec<Message> = if matches!(self.turn, Turn::Idle) {
            Vec::new()
        } else {
            self.messages
                .drain(..)
                .filter(|m| m.id.is_temporary() && m.chat_id == chat_id)
                .collect()
        };
        self.messages = loaded;
        self.messages.extend(pending);
    }

    // ---------------------------------------------------------------------
    // Project selection

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn selected_projects(&self) -> &[ProjectId] {
        &self.selected_projects
    }

    /// Add or remove a project from the selection used for retrieval.
    pub fn toggle_project(&mut self, project_id: ProjectId) {
        match self.selected_projects.iter().position(|p| *p == project_id) {
            Some(index) => {
                self.selected_projects.remove(index);
            }
            None => self.selected_projects.push(project_id),
        }
        if let Some(chat_id) = self.active_chat.get() {
            self.persist_chat_projects(chat_id);
        }
    }

    fn persist_chat_projects(&mut self, chat_id: ChatId) {
        let project_ids = self.selected_projects.clone();
        if let Some(chat) = self.chats.iter_mut().find(|c| c.id == chat_id) {
            chat.project_ids = project_ids.clone();
        }
        let backend = Arc::clone(&self.backend);
        let target = chat_id.clone();
        self.spawn_mutation(Mutation::PersistChatProjects(chat_id), async move {
            backend.update_chat_projects(&target, project_ids).await
        });
    }

    // ---------------------------------------------------------------------
    // Project CRUD

    pub fn create_project(&mut self, name: &str) -> Result<()> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(RagChatErr::validation("project name is empty"));
        }
        let backend = Arc::clone(&self.backend);
        let request_name = name.clone();
        self.spawn_mutation(Mutation::CreateProject(name), async move {
            backend.create_project(&request_name).await.map(|_| ())
        });
        Ok(())
    }

    pub fn delete_project(&mut self, project_id: ProjectId) {
        self.stop_sync_poll(&project_id);
        let backend = Arc::clone(&self.backend);
        let target = project_id.clone();
        self.spawn_mutation(Mutation::DeleteProject(project_id), async move {
            backend.delete_project(&target).await
        });
    }

    // ---------------------------------------------------------------------
    // Expanded project: files and Git link

    pub fn expanded_project(&self) -> Option<ProjectId> {
        self.expanded_project.get()
    }

    pub fn files(&self) -> &[FileNode] {
        &self.files
    }

    pub fn git_config(&self) -> Option<&GitConfig> {
        self.git_config.as_ref()
    }

    pub fn is_polling(&self, project_id: &ProjectId) -> bool {
        self.pollers.contains_key(project_id)
    }

    pub fn toggle_project_expansion(&mut self, project_id: ProjectId) {
        if self.is_expanded(&project_id) {
            self.collapse_project();
        } else {
            self.expand_project(project_id);
        }
    }

    /// Show a project's files and Git link. Any sync poll for the previously
    /// expanded project is stopped.
    pub fn expand_project(&mut self, project_id: ProjectId) {
        let previous = self.expanded_project.set(Some(project_id.clone()));
        if let Some(previous) = previous
            && previous != project_id
        {
            self.stop_sync_poll(&previous);
        }
        self.files.clear();
        self.git_config = None;
        self.load_files(project_id.clone());
        self.load_git_config(project_id);
    }

    pub fn collapse_project(&mut self) {
        if let Some(previous) = self.expanded_project.set(None) {
            self.stop_sync_poll(&previous);
        }
        self.files.clear();
        self.git_config = None;
    }

    /// Upload local files and folders into a project.
    pub fn upload_paths(&mut self, project_id: ProjectId, paths: Vec<PathBuf>) -> Result<()> {
        if paths.is_empty() {
            return Err(RagChatErr::validation("nothing to upload"));
        }
        let backend = Arc::clone(&self.backend);
        let target = project_id.clone();
        self.spawn_task(async move {
            let result = upload_local_paths(backend.as_ref(), &target, paths).await;
            SessionEvent::MutationFinished {
                mutation: Mutation::UploadFiles(target),
                result,
            }
        });
        Ok(())
    }

    pub fn delete_file(&mut self, project_id: ProjectId, file_id: FileId) {
        let backend = Arc::clone(&self.backend);
        self.spawn_mutation(Mutation::DeleteFile(project_id), async move {
            backend.delete_file(&file_id).await
        });
    }

    /// Link a repository to a project. A blank branch means
    /// [`DEFAULT_GIT_BRANCH`]; `None` for the token keeps the stored one.
    pub fn save_git_config(
        &mut self,
        project_id: ProjectId,
        git_url: &str,
        git_branch: &str,
        token: Option<String>,
    ) -> Result<()> {
        let git_url = git_url.trim();
        if git_url.is_empty() {
            return Err(RagChatErr::validation("repository URL is required"));
        }
        let git_branch = match git_branch.trim() {
            "" => DEFAULT_GIT_BRANCH,
            branch => branch,
        };
        let request = SaveGitConfigRequest {
            git_url: git_url.to_string(),
            git_branch: git_branch.to_string(),
            token: token.filter(|t| !t.is_empty()),
        };
        let backend = Arc::clone(&self.backend);
        let target = project_id.clone();
        self.spawn_mutation(Mutation::SaveGitConfig(project_id), async move {
            backend.save_git_config(&target, request).await
        });
        Ok(())
    }

    pub fn remove_git_config(&mut self, project_id: ProjectId) {
        self.stop_sync_poll(&project_id);
        let backend = Arc::clone(&self.backend);
        let target = project_id.clone();
        self.spawn_mutation(Mutation::RemoveGitConfig(project_id), async move {
            backend.remove_git_config(&target).await
        });
    }

    /// Ask the backend to sync the project's repository, then poll until the
    /// job settles.
    pub fn start_git_sync(&mut self, project_id: ProjectId) {
        let backend = Arc::clone(&self.backend);
        self.spawn_task(async move {
            let result = backend
                .trigger_git_sync(&project_id)
                .await
                .map_err(RagChatErr::from);
            SessionEvent::SyncTriggered { project_id, result }
        });
    }

    fn on_sync_triggered(&mut self, project_id: ProjectId, result: Result<()>) {
        match result {
            Ok(()) => {
                if self.is_expanded(&project_id)
                    && let Some(config) = self.git_config.as_mut()
                {
                    config.sync_status = Some(SyncStatus::Syncing);
                    config.sync_error = None;
                }
                self.start_sync_poll(project_id);
            }
            Err(RagChatErr::Backend(err)) if err.is_conflict() => {
                self.push_error(RagChatErr::Backend(err));
                self.start_sync_poll(project_id);
            }
            Err(err) => self.push_error(err),
        }
    }

    fn start_sync_poll(&mut self, project_id: ProjectId) {
        self.stop_sync_poll(&project_id);
        let poll_id = PollId(self.next_poll_id);
        self.next_poll_id += 1;

        let tx = self.tx_event.clone();
        let outcome_project = project_id.clone();
        let poller = SyncPoller::spawn(
            Arc::clone(&self.backend),
            project_id.clone(),
            self.poll_options,
            self.expanded_project.reader(),
            move |outcome| {
                let _ = tx.send(SessionEvent::SyncFinished {
                    project_id: outcome_project,
                    poll_id,
                    outcome,
                });
            },
        );
        debug!(%project_id, poll_id = poll_id.0, "polling git sync status");
        self.pollers.insert(project_id, ActivePoll { id: poll_id, poller });
    }

    fn stop_sync_poll(&mut self, project_id: &ProjectId) {
        if let Some(active) = self.pollers.remove(project_id) {
            debug!(%project_id, poll_id = active.id.0, "stopping git sync poll");
            active.poller.stop();
        }
    }

    fn on_sync_finished(&mut self, project_id: ProjectId, poll_id: PollId, outcome: SyncOutcome) {
        if !self
            .pollers
            .get(&project_id)
            .is_some_and(|active| active.id == poll_id)
        {
            trace!(%project_id, poll_id = poll_id.0, "dropping outcome of replaced poll");
            return;
        }
        self.pollers.remove(&project_id);

        match outcome {
            SyncOutcome::Stopped => {
                debug!(%project_id, "git sync no longer reported");
                if self.is_expanded(&project_id) {
                    self.load_git_config(project_id);
                }
            }
            SyncOutcome::Succeeded { config, files } => {
                if self.is_expanded(&project_id) {
                    self.git_config = Some(config);
                    match files {
                        Some(files) => self.files = files,
                        None => self.load_files(project_id.clone()),
                    }
                }
                self.load_projects();
                self.push_info(format!("Git sync finished for project {project_id}"));
            }
            SyncOutcome::Failed(message) => {
                if self.is_expanded(&project_id)
                    && let Some(config) = self.git_config.as_mut()
                    && config.sync_status == Some(SyncStatus::Error)
                {
                    config.sync_error = Some(message.clone());
                }
                self.push_error(RagChatErr::SyncFailed(message));
            }
        }
    }

    fn on_git_config_loaded(&mut self, project_id: ProjectId, result: Result<Option<GitConfig>>) {
        if !self.is_expanded(&project_id) {
            trace!(%project_id, "dropping git config of collapsed project");
            return;
        }
        let config = match result {
            Ok(config) => config,
            Err(err) => {
                self.push_error(err);
                return;
            }
        };
        let syncing = config
            .as_ref()
            .is_some_and(|c| c.sync_status == Some(SyncStatus::Syncing));
        self.git_config = config;
        if syncing && !self.pollers.contains_key(&project_id) {
            self.start_sync_poll(project_id);
        }
    }

    fn on_mutation_finished(&mut self, mutation: Mutation, result: Result<()>) {
        if let Err(err) = result {
            warn!("failed to {mutation}: {err}");
            self.push_error(err);
            return;
        }
        debug!("{mutation}: ok");
        match mutation {
            Mutation::PersistChatProjects(_) => self.load_chats(),
            Mutation::DeleteChat(chat_id) => {
                self.chats.retain(|c| c.id != chat_id);
                if self.active_chat.matches(|c| c.as_ref() == Some(&chat_id)) {
                    self.activate_chat(None);
                }
                self.load_chats();
            }
            Mutation::CreateProject(_) => self.load_projects(),
            Mutation::DeleteProject(project_id) => {
                self.selected_projects.retain(|p| *p != project_id);
                if self.is_expanded(&project_id) {
                    self.collapse_project();
                }
                self.load_projects();
                self.load_chats();
            }
            Mutation::UploadFiles(project_id) | Mutation::DeleteFile(project_id) => {
                if self.is_expanded(&project_id) {
                    self.load_files(project_id);
                }
            }
            Mutation::SaveGitConfig(project_id) | Mutation::RemoveGitConfig(project_id) => {
                if self.is_expanded(&project_id) {
                    self.load_git_config(project_id);
                }
                self.load_projects();
            }
        }
    }

    // ---------------------------------------------------------------------
    // Notices

    pub fn take_notices(&mut self) -> Vec<SessionNotice> {
        self.notices.drain(..).collect()
    }

    fn push_error(&mut self, err: RagChatErr) {
        warn!("{err}");
        self.notices.push_back(SessionNotice::Error(err));
    }

    fn push_info(&mut self, text: String) {
        info!("{text}");
        self.notices.push_back(SessionNotice::Info(text));
    }

    // ---------------------------------------------------------------------
    // Background loads

    fn is_expanded(&self, project_id: &ProjectId) -> bool {
        self.expanded_project
            .matches(|p| p.as_ref() == Some(project_id))
    }

    fn spawn_task<F>(&self, task: F)
    where
        F: Future<Output = SessionEvent> + Send + 'static,
    {
        let tx = self.tx_event.clone();
        tokio::spawn(async move {
            let _ = tx.send(task.await);
        });
    }

    fn spawn_mutation<F>(&self, mutation: Mutation, task: F)
    where
        F: Future<Output = ragchat_backend_client::Result<()>> + Send + 'static,
    {
        self.spawn_task(async move {
            SessionEvent::MutationFinished {
                mutation,
                result: task.await.map_err(RagChatErr::from),
            }
        });
    }

    fn load_chats(&self) {
        let backend = Arc::clone(&self.backend);
        self.spawn_task(async move {
            SessionEvent::ChatsLoaded(backend.list_chats().await.map_err(RagChatErr::from))
        });
    }

    fn load_projects(&self) {
        let backend = Arc::clone(&self.backend);
        self.spawn_task(async move {
            SessionEvent::ProjectsLoaded(backend.list_projects().await.map_err(RagChatErr::from))
        });
    }

    fn load_messages(&self, chat_id: ChatId) {
        let backend = Arc::clone(&self.backend);
        self.spawn_task(async move {
            let result = backend
                .list_messages(&chat_id)
                .await
                .map_err(RagChatErr::from);
            SessionEvent::MessagesLoaded { chat_id, result }
        });
    }

    fn load_files(&self, project_id: ProjectId) {
        let backend = Arc::clone(&self.backend);
        self.spawn_task(async move {
            let result = backend
                .list_files(&project_id)
                .await
                .map_err(RagChatErr::from);
            SessionEvent::FilesLoaded { project_id, result }
        });
    }

    fn load_git_config(&self, project_id: ProjectId) {
        let backend = Arc::clone(&self.backend);
        self.spawn_task(async move {
            let result = backend
                .get_git_config(&project_id)
                .await
                .map_err(RagChatErr::from);
            SessionEvent::GitConfigLoaded { project_id, result }
        });
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if let Turn::Streaming(active) = &self.turn {
            active.handle.cancel();
        }
    }
}

async fn upload_local_paths(
    backend: &dyn RagBackend,
    project_id: &ProjectId,
    paths: Vec<PathBuf>,
) -> Result<()> {
    for path in paths {
        if tokio::fs::metadata(&path).await?.is_dir() {
            let files = read_upload_folder(&path).await?;
            if files.is_empty() {
                debug!(path = %path.display(), "skipping empty folder");
                continue;
            }
            backend.upload_folder(project_id, files).await?;
        } else {
            let file = read_upload_file(&path).await?;
            backend.upload_file(project_id, file).await?;
        }
    }
    Ok(())
}
