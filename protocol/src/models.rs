use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;

use crate::ids::ChatId;
use crate::ids::FileId;
use crate::ids::MessageId;
use crate::ids::ProjectId;

/// Maximum number of characters of the first user message used as the title
/// of a chat created by that message.
pub const CHAT_TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub project_ids: Vec<ProjectId>,
    pub created_at: DateTime<Utc>,
}

/// Derive a chat title from the first message sent in it.
pub fn chat_title_from_message(message: &str) -> String {
    message.trim().chars().take(CHAT_TITLE_MAX_CHARS).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A user message that exists only on the client until the backend's copy
    /// replaces it.
    pub fn optimistic_user(chat_id: ChatId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::temporary(),
            chat_id,
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn is_git_linked(&self) -> bool {
        self.git_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

/// Server-side state of the background Git sync job of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Syncing,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitConfig {
    pub git_url: String,
    #[serde(default)]
    pub git_branch: String,
    #[serde(default)]
    pub has_token: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_string_as_none"
    )]
    pub sync_status: Option<SyncStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_error: Option<String>,
}

impl GitConfig {
    /// Decode the body of `GET /projects/{id}/git`. The backend answers with
    /// `{}` (or `null`) when the project has no linked repository.
    pub fn from_response_value(value: serde_json::Value) -> serde_json::Result<Option<Self>> {
        match &value {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::Object(map) if map.is_empty() => Ok(None),
            _ => serde_json::from_value(value).map(Some),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub id: FileId,
    pub project_id: ProjectId,
    #[serde(default)]
    pub parent_id: Option<FileId>,
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub children: Vec<FileNode>,
}

/// Nest a flat list of nodes under their parents. Nodes whose parent is not in
/// the list become roots. Directories sort before files, then by name.
pub fn build_file_tree(flat: Vec<FileNode>) -> Vec<FileNode> {
    use std::collections::HashMap;

    let known: std::collections::HashSet<FileId> = flat.iter().map(|n| n.id.clone()).collect();
    let mut by_parent: HashMap<Option<FileId>, Vec<FileNode>> = HashMap::new();
    for node in flat {
        let parent = node.parent_id.clone().filter(|p| known.contains(p));
        by_parent.entry(parent).or_default().push(node);
    }

    fn attach(
        parent: Option<FileId>,
        by_parent: &mut HashMap<Option<FileId>, Vec<FileNode>>,
    ) -> Vec<FileNode> {
        let mut nodes = by_parent.remove(&parent).unwrap_or_default();
        for node in &mut nodes {
            let mut children = attach(Some(node.id.clone()), by_parent);
            node.children.append(&mut children);
        }
        nodes.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        nodes
    }

    attach(None, &mut by_parent)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<SyncStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)?.as_deref() {
        None | Some("") => Ok(None),
        Some("syncing") => Ok(Some(SyncStatus::Syncing)),
        Some("done") => Ok(Some(SyncStatus::Done)),
        Some("error") => Ok(Some(SyncStatus::Error)),
        Some(other) => Err(serde::de::Error::unknown_variant(
            other,
            &["syncing", "done", "error"],
        )),
    }
}
