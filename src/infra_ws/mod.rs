mod push_connector_ws;

pub use push_connector_ws::*;
