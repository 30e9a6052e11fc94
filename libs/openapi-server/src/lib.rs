//! Request and response bodies of the deployd HTTP API

pub mod models;
