pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod reorder;
pub mod resolver;
pub mod server;
pub mod storage;
