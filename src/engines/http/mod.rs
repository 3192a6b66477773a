//! Reference HTTP/1.1 engine over raw tokio sockets.

pub mod engine;
pub mod framing;
pub mod response;

pub use engine::{HttpConnection, HttpEngine};
pub use framing::{encode_request, HttpTarget};
pub use response::{read_response, HttpResponse};
