//! JSON request bodies sent to the backend.

use serde::Deserialize;
use serde::Serialize;

use crate::ids::ProjectId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateChatRequest {
    pub title: String,
    pub project_ids: Vec<ProjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateChatProjectsRequest {
    pub project_ids: Vec<ProjectId>,
}

/// Body of `POST /chats/{id}/messages`; the response is an event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
    pub project_ids: Vec<ProjectId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveGitConfigRequest {
    pub git_url: String,
    pub git_branch: String,
    /// Access token for private remotes. Omitted to keep the stored one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}
