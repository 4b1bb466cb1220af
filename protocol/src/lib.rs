//! Wire types shared by the RAG chat backend client and the session core.

mod ids;
mod models;
mod requests;

pub use ids::ChatId;
pub use ids::FileId;
pub use ids::MessageId;
pub use ids::ProjectId;
pub use ids::TEMP_ID_PREFIX;
pub use models::CHAT_TITLE_MAX_CHARS;
pub use models::Chat;
pub use models::FileNode;
pub use models::GitConfig;
pub use models::Message;
pub use models::Project;
pub use models::Role;
pub use models::SyncStatus;
pub use models::build_file_tree;
pub use models::chat_title_from_message;
pub use requests::CreateChatRequest;
pub use requests::CreateProjectRequest;
pub use requests::SaveGitConfigRequest;
pub use requests::SendMessageRequest;
pub use requests::UpdateChatProjectsRequest;
