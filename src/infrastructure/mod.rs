pub mod config;
pub mod error;
pub mod notification;
pub mod record_store;
pub mod storage;
