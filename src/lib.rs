//! Data-retention enforcement for a distributed chat backend.
//!
//! Periodically purges expired message history, trims per-user conversation
//! indices, sweeps stale objects from categorized storage and notifies users
//! whose history changed. See [`retention`] for the pipeline itself and
//! [`clients`] for the service contracts it coordinates.

pub mod clients;
pub mod config;
pub mod notification;
pub mod observability;
pub mod retention;
