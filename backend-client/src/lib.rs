//! Typed client for the RAG chat backend's HTTP API.

mod backend;
mod error;
mod http;
mod upload;

pub use backend::ByteStream;
pub use backend::RagBackend;
pub use backend::UploadFile;
pub use error::BackendError;
pub use error::Result;
pub use http::DEFAULT_CONNECT_TIMEOUT;
pub use http::HttpBackend;
pub use upload::read_upload_file;
pub use upload::read_upload_folder;
