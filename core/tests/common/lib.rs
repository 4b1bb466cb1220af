#![allow(clippy::expect_used, clippy::unwrap_used)]

//! In-memory backend and helpers shared by the `ragchat-core` integration
//! tests.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::TimeZone;
use chrono::Utc;
use futures::StreamExt;
use ragchat_backend_client::BackendError;
use ragchat_backend_client::ByteStream;
use ragchat_backend_client::RagBackend;
use ragchat_backend_client::Result;
use ragchat_backend_client::UploadFile;
use ragchat_core::SessionController;
use ragchat_protocol::Chat;
use ragchat_protocol::ChatId;
use ragchat_protocol::CreateChatRequest;
use ragchat_protocol::FileId;
use ragchat_protocol::FileNode;
use ragchat_protocol::GitConfig;
use ragchat_protocol::Message;
use ragchat_protocol::MessageId;
use ragchat_protocol::Project;
use ragchat_protocol::ProjectId;
use ragchat_protocol::Role;
use ragchat_protocol::SaveGitConfigRequest;
use ragchat_protocol::SendMessageRequest;
use ragchat_protocol::SyncStatus;
use reqwest::StatusCode;
use tokio::sync::Notify;
use tokio::sync::mpsc;

/// One call made against [`FakeBackend`], in the order it was made.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ListChats,
    CreateChat(CreateChatRequest),
    DeleteChat(ChatId),
    UpdateChatProjects(ChatId, Vec<ProjectId>),
    ListMessages(ChatId),
    SendMessage(ChatId, SendMessageRequest),
    ListProjects,
    CreateProject(String),
    DeleteProject(ProjectId),
    ListFiles(ProjectId),
    UploadFile(ProjectId, String),
    UploadFolder(ProjectId, Vec<String>),
    DeleteFile(FileId),
    GetGitConfig(ProjectId),
    SaveGitConfig(ProjectId, SaveGitConfigRequest),
    RemoveGitConfig(ProjectId),
    TriggerGitSync(ProjectId),
}

/// Scripted answer to one `GET /projects/{id}/git`.
#[derive(Debug, Clone)]
pub enum GitReply {
    Config(Option<GitConfig>),
    Status(StatusCode),
    /// Answers with `config` only once `gate` is notified, leaving the fetch
    /// in flight until then.
    Gated {
        gate: Arc<Notify>,
        config: Option<GitConfig>,
    },
}

/// Sending half of a reply body handed out by [`FakeBackend::script_reply`].
/// Dropping it ends the body.
pub struct ReplyBody {
    tx: mpsc::UnboundedSender<std::result::Result<Bytes, BackendError>>,
}

impl ReplyBody {
    pub fn send(&self, chunk: &str) {
        let _ = self.tx.send(Ok(Bytes::copy_from_slice(chunk.as_bytes())));
    }

    pub fn fail(&self, status: StatusCode, message: &str) {
        let _ = self.tx.send(Err(status_error("stream", status, message)));
    }
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    chats: Vec<Chat>,
    messages: HashMap<ChatId, Vec<Message>>,
    projects: Vec<Project>,
    files: HashMap<ProjectId, Vec<FileNode>>,
    git_replies: HashMap<ProjectId, VecDeque<GitReply>>,
    replies: VecDeque<mpsc::UnboundedReceiver<std::result::Result<Bytes, BackendError>>>,
    create_chat_failure: Option<StatusCode>,
    send_failure: Option<StatusCode>,
    sync_trigger_failure: Option<StatusCode>,
    next_id: u64,
}

/// [`RagBackend`] backed by plain collections. Every call is recorded.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn add_chat(&self, chat: Chat) {
        self.state().chats.push(chat);
    }

    pub fn set_messages(&self, chat_id: &ChatId, messages: Vec<Message>) {
        self.state().messages.insert(chat_id.clone(), messages);
    }

    pub fn add_project(&self, project: Project) {
        self.state().projects.push(project);
    }

    pub fn set_files(&self, project_id: &ProjectId, files: Vec<FileNode>) {
        self.state().files.insert(project_id.clone(), files);
    }

    /// Answers for successive git config fetches. The last one repeats.
    pub fn script_git(&self, project_id: &ProjectId, replies: Vec<GitReply>) {
        self.state()
            .git_replies
            .insert(project_id.clone(), replies.into());
    }

    /// Queue the body of the next message send and return its writer.
    pub fn script_reply(&self) -> ReplyBody {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().replies.push_back(rx);
        ReplyBody { tx }
    }

    /// Queue a complete reply body.
    pub fn script_reply_text(&self, body: &str) {
        self.script_reply().send(body);
    }

    pub fn fail_create_chat(&self, status: StatusCode) {
        self.state().create_chat_failure = Some(status);
    }

    pub fn fail_send(&self, status: StatusCode) {
        self.state().send_failure = Some(status);
    }

    pub fn fail_sync_trigger(&self, status: StatusCode) {
        self.state().sync_trigger_failure = Some(status);
    }

    fn record(&self, call: Call) -> MutexGuard<'_, FakeState> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }
}

pub fn status_error(url: &str, status: StatusCode, message: &str) -> BackendError {
    BackendError::Status {
        url: url.to_string(),
        status,
        message: message.to_string(),
    }
}

#[async_trait]
impl RagBackend for FakeBackend {
    async fn list_chats(&self) -> Result<Vec<Chat>> {
        Ok(self.record(Call::ListChats).chats.clone())
    }

    async fn create_chat(&self, request: CreateChatRequest) -> Result<Chat> {
        let mut state = self.record(Call::CreateChat(request.clone()));
        if let Some(status) = state.create_chat_failure.take() {
            return Err(status_error("/chats", status, "create failed"));
        }
        state.next_id += 1;
        let chat = Chat {
            id: ChatId::new(format!("chat-{}", state.next_id)),
            title: request.title,
            project_ids: request.project_ids,
            created_at: timestamp(),
        };
        state.chats.insert(0, chat.clone());
        Ok(chat)
    }

    async fn delete_chat(&self, chat_id: &ChatId) -> Result<()> {
        let mut state = self.record(Call::DeleteChat(chat_id.clone()));
        state.chats.retain(|c| c.id != *chat_id);
        Ok(())
    }

    async fn update_chat_projects(
        &self,
        chat_id: &ChatId,
        project_ids: Vec<ProjectId>,
    ) -> Result<()> {
        let mut state = self.record(Call::UpdateChatProjects(
            chat_id.clone(),
            project_ids.clone(),
        ));
        if let Some(chat) = state.chats.iter_mut().find(|c| c.id == *chat_id) {
            chat.project_ids = project_ids;
        }
        Ok(())
    }

    async fn list_messages(&self, chat_id: &ChatId) -> Result<Vec<Message>> {
        let state = self.record(Call::ListMessages(chat_id.clone()));
        Ok(state.messages.get(chat_id).cloned().unwrap_or_default())
    }

    async fn send_message(
        &self,
        chat_id: &ChatId,
        request: SendMessageRequest,
    ) -> Result<ByteStream> {
        let mut state = self.record(Call::SendMessage(chat_id.clone(), request.clone()));
        if let Some(status) = state.send_failure.take() {
            return Err(status_error("/messages", status, "send failed"));
        }
        state.next_id += 1;
        let stored = vec![
            Message {
                id: MessageId::new(format!("msg-{}", state.next_id)),
                chat_id: chat_id.clone(),
                role: Role::User,
                content: request.message,
                created_at: timestamp(),
            },
        ];
        state
            .messages
            .entry(chat_id.clone())
            .or_default()
            .extend(stored);

        let body = match state.replies.pop_front() {
            Some(rx) => futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed(),
            None => futures::stream::empty().boxed(),
        };
        Ok(body)
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.record(Call::ListProjects).projects.clone())
    }

    async fn create_project(&self, name: &str) -> Result<Project> {
        let mut state = self.record(Call::CreateProject(name.to_string()));
        state.next_id += 1;
        let project = project(&format!("proj-{}", state.next_id), name);
        state.projects.push(project.clone());
        Ok(project)
    }

    async fn delete_project(&self, project_id: &ProjectId) -> Result<()> {
        let mut state = self.record(Call::DeleteProject(project_id.clone()));
        state.projects.retain(|p| p.id != *project_id);
        Ok(())
    }

    async fn list_files(&self, project_id: &ProjectId) -> Result<Vec<FileNode>> {
        let state = self.record(Call::ListFiles(project_id.clone()));
        Ok(state.files.get(project_id).cloned().unwrap_or_default())
    }

    async fn upload_file(&self, project_id: &ProjectId, file: UploadFile) -> Result<()> {
        let mut state = self.record(Call::UploadFile(
            project_id.clone(),
            file.relative_path.clone(),
        ));
        state.next_id += 1;
        let node = file_node(&format!("file-{}", state.next_id), project_id, &file.relative_path);
        state.files.entry(project_id.clone()).or_default().push(node);
        Ok(())
    }

    async fn upload_folder(&self, project_id: &ProjectId, files: Vec<UploadFile>) -> Result<()> {
        let paths = files.iter().map(|f| f.relative_path.clone()).collect();
        self.record(Call::UploadFolder(project_id.clone(), paths));
        Ok(())
    }

    async fn delete_file(&self, file_id: &FileId) -> Result<()> {
        let mut state = self.record(Call::DeleteFile(file_id.clone()));
        for files in state.files.values_mut() {
            files.retain(|f| f.id != *file_id);
        }
        Ok(())
    }

    async fn get_git_config(&self, project_id: &ProjectId) -> Result<Option<GitConfig>> {
        let reply = {
            let mut state = self.record(Call::GetGitConfig(project_id.clone()));
            match state.git_replies.get_mut(project_id) {
                Some(replies) if replies.len() > 1 => replies.pop_front(),
                Some(replies) => replies.front().cloned(),
                None => None,
            }
        };
        match reply {
            Some(GitReply::Gated { gate, config }) => {
                gate.notified().await;
                Ok(config)
            }
            Some(GitReply::Config(config)) => Ok(config),
            Some(GitReply::Status(status)) => {
                Err(status_error("/git", status, "status check failed"))
            }
            None => Ok(None),
        }
    }

    async fn save_git_config(
        &self,
        project_id: &ProjectId,
        request: SaveGitConfigRequest,
    ) -> Result<()> {
        let mut state = self.record(Call::SaveGitConfig(project_id.clone(), request.clone()));
        let config = GitConfig {
            git_url: request.git_url,
            git_branch: request.git_branch,
            has_token: request.token.is_some(),
            last_synced_at: None,
            sync_status: None,
            sync_error: None,
        };
        state
            .git_replies
            .insert(project_id.clone(), VecDeque::from([GitReply::Config(Some(config))]));
        Ok(())
    }

    async fn remove_git_config(&self, project_id: &ProjectId) -> Result<()> {
        let mut state = self.record(Call::RemoveGitConfig(project_id.clone()));
        state.git_replies.remove(project_id);
        Ok(())
    }

    async fn trigger_git_sync(&self, project_id: &ProjectId) -> Result<()> {
        let mut state = self.record(Call::TriggerGitSync(project_id.clone()));
        match state.sync_trigger_failure.take() {
            Some(status) => Err(status_error("/git/sync", status, "sync already in progress")),
            None => Ok(()),
        }
    }
}

fn timestamp() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

pub fn chat(id: &str, title: &str, project_ids: &[&str]) -> Chat {
    Chat {
        id: ChatId::new(id),
        title: title.to_string(),
        project_ids: project_ids.iter().map(|p| ProjectId::new(*p)).collect(),
        created_at: timestamp(),
    }
}

pub fn message(id: &str, chat_id: &str, role: Role, content: &str) -> Message {
    Message {
        id: MessageId::new(id),
        chat_id: ChatId::new(chat_id),
        role,
        content: content.to_string(),
        created_at: timestamp(),
    }
}

pub fn project(id: &str, name: &str) -> Project {
    Project {
        id: ProjectId::new(id),
        name: name.to_string(),
        git_url: None,
        git_branch: None,
        last_synced_at: None,
        created_at: timestamp(),
    }
}

pub fn file_node(id: &str, project_id: &ProjectId, path: &str) -> FileNode {
    FileNode {
        id: FileId::new(id),
        project_id: project_id.clone(),
        parent_id: None,
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        path: path.to_string(),
        is_dir: false,
        created_at: timestamp(),
        children: Vec::new(),
    }
}

pub fn git_config(status: Option<SyncStatus>, error: Option<&str>) -> GitConfig {
    GitConfig {
        git_url: "https://example.com/repo.git".to_string(),
        git_branch: "main".to_string(),
        has_token: false,
        last_synced_at: None,
        sync_status: status,
        sync_error: error.map(str::to_string),
    }
}

/// Feed session events into `session` until `done` holds.
pub async fn pump_until<F>(session: &mut SessionController, mut done: F)
where
    F: FnMut(&SessionController) -> bool,
{
    tokio::time::timeout(Duration::from_secs(60), async {
        while !done(session) {
            session.step().await;
        }
    })
    .await
    .expect("timed out waiting for session state");
}

/// Apply every event that is already queued, waiting briefly for spawned
/// tasks to report back.
pub async fn drain_events(session: &mut SessionController) {
    loop {
        tokio::task::yield_now().await;
        match tokio::time::timeout(Duration::from_millis(50), session.next_event()).await {
            Ok(Some(event)) => session.handle_event(event),
            _ => return,
        }
    }
}
