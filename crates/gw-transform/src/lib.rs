pub mod image;
pub mod list_models;
pub mod request;
pub mod response;
pub mod stream;

pub use request::translate_request;
pub use response::translate_response;
pub use stream::translate_stream_chunk;
