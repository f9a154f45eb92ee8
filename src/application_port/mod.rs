mod realtime_service;
mod session_service;

pub use realtime_service::*;
pub use session_service::*;
