//! Core library for sealwatch.
//!
//! Contains the monitor configuration, the container runtime wrapper, the
//! vault control client with its seal status probe, the key acquirer, the
//! unseal orchestrator, and the monitor loop. This crate depends on
//! `sealwatch-store` for key custody and knows nothing about CLI flags or
//! process lifecycle — that lives in `sealwatch-daemon`.

pub mod acquire;
pub mod config;
pub mod error;
pub mod monitor;
pub mod runtime;
pub mod unseal;
pub mod vault;
