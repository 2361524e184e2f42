pub mod assembler;
pub mod endpoint;
pub mod mock;
pub mod types;

pub use assembler::{StreamAssembler, collect_text, parse_payload};
pub use endpoint::{ByteStream, Endpoint, EndpointFactory, HttpEndpoint};
pub use mock::{MockEndpoint, MockResponse, error_frame, text_frame};
pub use types::{CancelToken, GenerateRequest, StreamPayload};

pub use tidings_core::{Error, Result};
