pub mod api;
pub mod config;
pub mod config_cache;
pub mod endpoint;
pub mod experiment;
pub mod remote;
pub mod resolver;
pub mod router;
pub mod server;
pub mod user_state;
