pub mod config;
pub mod credential_store;
pub mod error;
pub mod http_client;
pub mod logging;
pub mod storage;
