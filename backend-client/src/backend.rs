use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
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

use crate::error::BackendError;
use crate::error::Result;

/// Raw response body of a message send, chunked however the transport
/// delivers it.
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, BackendError>>;

/// One file destined for an upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// Path relative to the upload root, `/`-separated. For single-file
    /// uploads this is just the file name.
    pub relative_path: String,
    pub contents: Vec<u8>,
}

impl UploadFile {
    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }
}

/// Everything the client needs from the RAG backend.
#[async_trait]
pub trait RagBackend: Send + Sync {
    async fn list_chats(&self) -> Result<Vec<Chat>>;

    async fn create_chat(&self, request: CreateChatRequest) -> Result<Chat>;

    async fn delete_chat(&self, chat_id: &ChatId) -> Result<()>;

    async fn update_chat_projects(&self, chat_id: &ChatId, project_ids: Vec<ProjectId>)
    -> Result<()>;

    async fn list_messages(&self, chat_id: &ChatId) -> Result<Vec<Message>>;

    /// Post a user message. Resolves once response headers arrive; the
    /// assistant reply is read from the returned byte stream.
    async fn send_message(&self, chat_id: &ChatId, request: SendMessageRequest)
    -> Result<ByteStream>;

    async fn list_projects(&self) -> Result<Vec<Project>>;

    async fn create_project(&self, name: &str) -> Result<Project>;

    async fn delete_project(&self, project_id: &ProjectId) -> Result<()>;

    async fn list_files(&self, project_id: &ProjectId) -> Result<Vec<FileNode>>;

    async fn upload_file(&self, project_id: &ProjectId, file: UploadFile) -> Result<()>;

    async fn upload_folder(&self, project_id: &ProjectId, files: Vec<UploadFile>) -> Result<()>;

    async fn delete_file(&self, file_id: &FileId) -> Result<()>;

    /// `None` when the project has no linked repository.
    async fn get_git_config(&self, project_id: &ProjectId) -> Result<Option<GitConfig>>;

    async fn save_git_config(
        &self,
        project_id: &ProjectId,
        request: SaveGitConfigRequest,
    ) -> Result<()>;

    async fn remove_git_config(&self, project_id: &ProjectId) -> Result<()>;

    /// Start a background sync. Returns as soon as the backend has accepted
    /// the job; progress is observed through [`RagBackend::get_git_config`].
    async fn trigger_git_sync(&self, project_id: &ProjectId) -> Result<()>;
}
