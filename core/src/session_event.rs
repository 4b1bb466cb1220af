use std::fmt;

use ragchat_protocol::Chat;
use ragchat_protocol::ChatId;
use ragchat_protocol::FileNode;
use ragchat_protocol::GitConfig;
use ragchat_protocol::Message;
use ragchat_protocol::Project;
use ragchat_protocol::ProjectId;

use crate::error::RagChatErr;
use crate::error::Result;
use crate::stream::StreamEvent;
use crate::sync_poller::SyncOutcome;

/// Identifies one reply stream started by the session. Events from a stream
/// that is no longer current are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub u64);

/// Identifies one send that had to create its chat first. A chat created
/// for a send that was cancelled or superseded does not receive a later
/// send's message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SendId(pub u64);

/// Identifies one sync poll loop, so a late outcome from a replaced loop for
/// the same project is not mistaken for the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollId(pub u64);

/// Results of background work, delivered back to the
/// [`SessionController`](crate::SessionController) that spawned it.
#[derive(Debug)]
pub enum SessionEvent {
    Stream {
        stream_id: StreamId,
        event: StreamEvent,
    },

    /// `POST /chats` issued by a send with no active chat has returned.
    ChatCreated {
        send_id: SendId,
        result: Result<Chat>,
    },

    ChatsLoaded(Result<Vec<Chat>>),

    ProjectsLoaded(Result<Vec<Project>>),

    MessagesLoaded {
        chat_id: ChatId,
        result: Result<Vec<Message>>,
    },

    FilesLoaded {
        project_id: ProjectId,
        result: Result<Vec<FileNode>>,
    },

    GitConfigLoaded {
        project_id: ProjectId,
        result: Result<Option<GitConfig>>,
    },

    SyncTriggered {
        project_id: ProjectId,
        result: Result<()>,
    },

    SyncFinished {
        project_id: ProjectId,
        poll_id: PollId,
        outcome: SyncOutcome,
    },

    MutationFinished {
        mutation: Mutation,
        result: Result<()>,
    },
}

/// A fire-and-forget change whose completion triggers reloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    PersistChatProjects(ChatId),
    DeleteChat(ChatId),
    CreateProject(String),
    DeleteProject(ProjectId),
    UploadFiles(ProjectId),
    DeleteFile(ProjectId),
    SaveGitConfig(ProjectId),
    RemoveGitConfig(ProjectId),
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::PersistChatProjects(id) => write!(f, "update projects of chat {id}"),
            Mutation::DeleteChat(id) => write!(f, "delete chat {id}"),
            Mutation::CreateProject(name) => write!(f, "create project {name:?}"),
            Mutation::DeleteProject(id) => write!(f, "delete project {id}"),
            Mutation::UploadFiles(id) => write!(f, "upload files to project {id}"),
            Mutation::DeleteFile(id) => write!(f, "delete file from project {id}"),
            Mutation::SaveGitConfig(id) => write!(f, "link repository to project {id}"),
            Mutation::RemoveGitConfig(id) => write!(f, "unlink repository from project {id}"),
        }
    }
}

/// Something the user should be told about.
#[derive(Debug)]
pub enum SessionNotice {
    Error(RagChatErr),
    Info(String),
}

impl SessionNotice {
    pub fn is_error(&self) -> bool {
        matches!(self, SessionNotice::Error(_))
    }
}

impl fmt::Display for SessionNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionNotice::Error(err) => f.write_str(&err.user_message()),
            SessionNotice::Info(text) => f.write_str(text),
        }
    }
}
