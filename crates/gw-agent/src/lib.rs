pub mod client;
pub mod fetch;
pub mod resume;
pub mod sanitize;
pub mod session;

pub use client::AgentClient;
