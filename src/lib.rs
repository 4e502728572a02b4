//! factory-tasks - maintenance task tracker for the factory floor
//!
//! Managers create repair tasks for technicians, technicians move them
//! through their lifecycle, and devices that share a factory code keep one
//! task list in sync through a key-value HTTP store.

pub mod bucket;
pub mod cache;
pub mod config;
pub mod models;
pub mod poller;
pub mod remote;
pub mod session;
pub mod store;
pub mod sync;
