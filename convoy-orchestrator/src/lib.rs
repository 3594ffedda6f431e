//! Convoy Orchestrator
//!
//! The coordination core of the Convoy job service. Any number of processes
//! share one Postgres database; a unique index on `(name, running_state)`
//! guarantees that per job name at most one execution is queued and at most
//! one is running across all of them, without in-process locks or leader
//! election.
//!
//! Layers:
//! - `repository`: data access for job executions and job definitions
//! - `service`: execution dispatch, queue draining, remote polling, sweeps
//! - `scheduler`: periodic driver for the service's maintenance entry points

pub mod config;
pub mod db;
pub mod repository;
pub mod scheduler;
pub mod service;
