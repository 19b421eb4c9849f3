pub mod client;
pub mod config;
pub mod domain;
pub mod errors;
pub mod init;
pub mod logging;
pub mod shop;
