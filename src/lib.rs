pub mod api;
pub mod config;
pub mod error;
pub mod http_client;
pub mod lifecycle;
pub mod prompt;
pub mod sensor;
pub mod services;
pub mod system_client;
