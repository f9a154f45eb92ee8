mod realtime_channel;
mod session_manager;
mod subscriber_registry;

pub use realtime_channel::*;
pub use session_manager::*;
pub use subscriber_registry::*;
