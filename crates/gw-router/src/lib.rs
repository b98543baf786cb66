pub mod admin;
pub mod proxy;
pub mod ws;

pub use proxy::router;
