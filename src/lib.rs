pub mod logger;
pub mod settings;

pub mod client;

pub mod application_impl;
pub mod application_port;
pub mod domain_model;
pub mod domain_port;
pub mod infra_http;
pub mod infra_store;
pub mod infra_ws;
