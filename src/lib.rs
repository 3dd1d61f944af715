pub mod auth;
pub mod chat;
pub mod conf;
pub mod docs;
pub mod generator;
pub mod logging;
pub mod quota;
pub mod server;
pub mod types;
