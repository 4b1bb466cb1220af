use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use ragchat_protocol::Chat;
use ragchat_protocol::ChatId;
use ragchat_protocol::CreateChatRequest;
use ragchat_protocol::CreateProjectRequest;
use ragchat_protocol::FileId;
use ragchat_protocol::FileNode;
use ragchat_protocol::GitConfig;
use ragchat_protocol::Message;
use ragchat_protocol::Project;
use ragchat_protocol::ProjectId;
use ragchat_protocol::SaveGitConfigRequest;
use ragchat_protocol::SendMessageRequest;
use ragchat_protocol::UpdateChatProjectsRequest;
use ragchat_protocol::build_file_tree;
use reqwest::Method;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::header::ACCEPT;
use reqwest::multipart::Form;
use reqwest::multipart::Part;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::backend::ByteStream;
use crate::backend::RagBackend;
use crate::backend::UploadFile;
use crate::error::BackendError;
use crate::error::Result;
use crate::error::error_message_from_body;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// [`RagBackend`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_connect_timeout(base_url, DEFAULT_CONNECT_TIMEOUT)
    }

    /// No overall request timeout is set: message replies stream for as long
    /// as the model keeps generating.
    pub fn with_connect_timeout(base_url: impl Into<String>, connect_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request(&self, method: Method, path: &str) -> (String, RequestBuilder) {
        let url = self.url(path);
        let builder = self.client.request(method, &url);
        (url, builder)
    }

    async fn execute(url: &str, builder: RequestBuilder) -> Result<Response> {
        let resp = builder.send().await.map_err(|source| BackendError::Transport {
            url: url.to_string(),
            source,
        })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        debug!("{url} returned {status}: {body}");
        Err(BackendError::Status {
            url: url.to_string(),
            status,
            message: error_message_from_body(&body),
        })
    }

    async fn read_json<T: DeserializeOwned>(url: &str, resp: Response) -> Result<T> {
        let body = resp.bytes().await.map_err(|source| BackendError::Transport {
            url: url.to_string(),
            source,
        })?;
        serde_json::from_slice(&body).map_err(|source| BackendError::Decode {
            url: url.to_string(),
            source,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let (url, builder) = self.request(Method::GET, path);
        let resp = Self::execute(&url, builder).await?;
        Self::read_json(&url, resp).await
    }

    /// Lists come back as `null` rather than `[]` when empty.
    async fn get_list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let list: Option<Vec<T>> = self.get_json(path).await?;
        Ok(list.unwrap_or_default())
    }

    async fn send_unit(&self, method: Method, path: &str) -> Result<()> {
        let (url, builder) = self.request(method, path);
        Self::execute(&url, builder).await.map(|_| ())
    }
}

#[async_trait]
impl RagBackend for HttpBackend {
    async fn list_chats(&self) -> Result<Vec<Chat>> {
        self.get_list("/chats").await
    }

    async fn create_chat(&self, request: CreateChatRequest) -> Result<Chat> {
        let (url, builder) = self.request(Method::POST, "/chats");
        let resp = Self::execute(&url, builder.json(&request)).await?;
        Self::read_json(&url, resp).await
    }

    async fn delete_chat(&self, chat_id: &ChatId) -> Result<()> {
        self.send_unit(Method::DELETE, &format!("/chats/{chat_id}"))
            .await
    }

    async fn update_chat_projects(
        &self,
        chat_id: &ChatId,
        project_ids: Vec<ProjectId>,
    ) -> Result<()> {
        let (url, builder) = self.request(Method::PUT, &format!("/chats/{chat_id}/projects"));
        let body = UpdateChatProjectsRequest { project_ids };
        Self::execute(&url, builder.json(&body)).await.map(|_| ())
    }

    async fn list_messages(&self, chat_id: &ChatId) -> Result<Vec<Message>> {
        self.get_list(&format!("/chats/{chat_id}/messages")).await
    }

    async fn send_message(
        &self,
        chat_id: &ChatId,
        request: SendMessageRequest,
    ) -> Result<ByteStream> {
        let (url, builder) = self.request(Method::POST, &format!("/chats/{chat_id}/messages"));
        let builder = builder.header(ACCEPT, "text/event-stream").json(&request);
        let resp = Self::execute(&url, builder).await?;
        let stream = resp.bytes_stream().map(move |chunk| {
            chunk.map_err(|source| BackendError::Transport {
                url: url.clone(),
                source,
            })
        });
        Ok(stream.boxed())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        self.get_list("/projects").await
    }

    async fn create_project(&self, name: &str) -> Result<Project> {
        let (url, builder) = self.request(Method::POST, "/projects");
        let body = CreateProjectRequest {
            name: name.to_string(),
        };
        let resp = Self::execute(&url, builder.json(&body)).await?;
        Self::read_json(&url, resp).await
    }

    async fn delete_project(&self, project_id: &ProjectId) -> Result<()> {
        self.send_unit(Method::DELETE, &format!("/projects/{project_id}"))
            .await
    }

    /// The backend may answer with a flat list linked by `parent_id`; it is
    /// nested before being returned.
    async fn list_files(&self, project_id: &ProjectId) -> Result<Vec<FileNode>> {
        let files = self.get_list(&format!("/projects/{project_id}/files")).await?;
        Ok(build_file_tree(files))
    }

    async fn upload_file(&self, project_id: &ProjectId, file: UploadFile) -> Result<()> {
        let (url, builder) =
            self.request(Method::POST, &format!("/projects/{project_id}/upload-file"));
        let name = file.file_name().to_string();
        let form = Form::new().part("file", Part::bytes(file.contents).file_name(name));
        Self::execute(&url, builder.multipart(form))
            .await
            .map(|_| ())
    }

    async fn upload_folder(&self, project_id: &ProjectId, files: Vec<UploadFile>) -> Result<()> {
        let (url, builder) =
            self.request(Method::POST, &format!("/projects/{project_id}/upload-folder"));
        // `files` and `paths` are parallel arrays: the n-th path belongs to
        // the n-th file part.
        let mut form = Form::new();
        for file in files {
            let name = file.file_name().to_string();
            let relative_path = file.relative_path.clone();
            form = form
                .part("files", Part::bytes(file.contents).file_name(name))
                .text("paths", relative_path);
        }
        Self::execute(&url, builder.multipart(form))
            .await
            .map(|_| ())
    }

    async fn delete_file(&self, file_id: &FileId) -> Result<()> {
        self.send_unit(Method::DELETE, &format!("/files/{file_id}"))
            .await
    }

    async fn get_git_config(&self, project_id: &ProjectId) -> Result<Option<GitConfig>> {
        let path = format!("/projects/{project_id}/git");
        let value: serde_json::Value = self.get_json(&path).await?;
        GitConfig::from_response_value(value).map_err(|source| BackendError::Decode {
            url: self.url(&path),
            source,
        })
    }

    async fn save_git_config(
        &self,
        project_id: &ProjectId,
        request: SaveGitConfigRequest,
    ) -> Result<()> {
        let (url, builder) = self.request(Method::PUT, &format!("/projects/{project_id}/git"));
        Self::execute(&url, builder.json(&request)).await.map(|_| ())
    }

    async fn remove_git_config(&self, project_id: &ProjectId) -> Result<()> {
        self.send_unit(Method::DELETE, &format!("/projects/{project_id}/git"))
            .await
    }

    async fn trigger_git_sync(&self, project_id: &ProjectId) -> Result<()> {
        self.send_unit(Method::POST, &format!("/projects/{project_id}/git/sync"))
            .await
    }
}
