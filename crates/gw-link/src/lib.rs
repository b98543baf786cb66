pub mod frame;
pub mod link;
pub mod queue;

pub use frame::QueueFrame;
pub use link::{BrowserAgentLink, LinkError, LinkEvent};
pub use queue::{DequeueError, MessageQueue};
