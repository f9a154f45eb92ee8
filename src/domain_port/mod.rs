// store

mod token_store;

pub use token_store::*;

// remote

mod auth_api;
mod push_connector;

pub use auth_api::*;
pub use push_connector::*;
