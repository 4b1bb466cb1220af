//! Plain-text and JSON rendering of backend listings.

use ragchat_protocol::Chat;
use ragchat_protocol::FileNode;
use ragchat_protocol::GitConfig;
use ragchat_protocol::Message;
use ragchat_protocol::Project;
use ragchat_protocol::Role;
use serde::Serialize;

pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn format_chats(chats: &[Chat]) -> String {
    chats
        .iter()
        .map(|chat| {
            let projects = if chat.project_ids.is_empty() {
                String::new()
            } else {
                let ids: Vec<&str> = chat.project_ids.iter().map(|p| p.as_str()).collect();
                format!("  [{}]", ids.join(", "))
            };
            format!(
                "{}  {}  {}{projects}",
                chat.id,
                chat.created_at.format("%Y-%m-%d %H:%M"),
                chat.title
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn format_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let who = match m.role {
                Role::User => "you",
                Role::Assistant => "assistant",
            };
            format!("{who}> {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub(crate) fn format_projects(projects: &[Project]) -> String {
    projects
        .iter()
        .map(|p| match (&p.git_url, p.is_git_linked()) {
            (Some(url), true) => format!("{}  {}  ({url})", p.id, p.name),
            _ => format!("{}  {}", p.id, p.name),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn format_file_tree(nodes: &[FileNode]) -> String {
    let mut lines = Vec::new();
    for node in nodes {
        push_tree_lines(node, 0, &mut lines);
    }
    lines.join("\n")
}

fn push_tree_lines(node: &FileNode, depth: usize, lines: &mut Vec<String>) {
    let suffix = if node.is_dir { "/" } else { "" };
    lines.push(format!(
        "{}{}{suffix}  ({})",
        "  ".repeat(depth),
        node.name,
        node.id
    ));
    for child in &node.children {
        push_tree_lines(child, depth + 1, lines);
    }
}

pub(crate) fn format_git_config(config: Option<&GitConfig>) -> String {
    let Some(config) = config else {
        return "no repository linked".to_string();
    };
    let mut lines = vec![
        format!("url:     {}", config.git_url),
        format!("branch:  {}", config.git_branch),
        format!("token:   {}", if config.has_token { "stored" } else { "none" }),
    ];
    if let Some(synced) = &config.last_synced_at {
        lines.push(format!("synced:  {}", synced.format("%Y-%m-%d %H:%M")));
    }
    if let Some(status) = config.sync_status {
        let status = serde_json::to_value(status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        lines.push(format!("status:  {status}"));
    }
    if let Some(error) = &config.sync_error {
        lines.push(format!("error:   {error}"));
    }
    lines.join("\n")
}
