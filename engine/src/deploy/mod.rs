//! Deployment module

pub mod events;
pub mod executor;
pub mod fsm;
pub mod lock;
pub mod planner;
pub mod recorder;
pub mod remote;
pub mod rollback;
pub mod step;
