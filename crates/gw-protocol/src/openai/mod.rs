pub mod chat_completions;
pub mod list_models;
