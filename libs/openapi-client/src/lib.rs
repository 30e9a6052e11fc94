//! Request and response bodies of the ERP instance deployment API

pub mod models;
