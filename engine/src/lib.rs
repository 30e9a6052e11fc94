//! deployd library
//!
//! Template deployment engine for remote ERP instances: planning, step
//! execution with rollback, and a read-only monitoring facade.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod monitor;
pub mod server;
pub mod storage;
pub mod utils;
pub mod workers;
