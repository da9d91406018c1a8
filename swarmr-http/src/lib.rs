mod client;
mod error;
mod multipart;
mod types;
mod wire;

pub use client::HttpClient;
pub use error::{Error, HttpTransportErrorKind, Result};
pub use multipart::MultipartForm;
pub use types::{HttpRequest, HttpResponse};
pub use wire::estimate_request_bytes;
