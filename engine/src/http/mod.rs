//! HTTP client for remote ERP instances

pub mod client;
pub mod operations;
