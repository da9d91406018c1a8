pub mod engine;

pub use engine::*;

pub use swarmr_http::{
    Error as HttpError, HttpClient, HttpRequest, HttpResponse, HttpTransportErrorKind,
    MultipartForm,
};
