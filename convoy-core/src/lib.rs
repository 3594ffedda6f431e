//! Convoy Core
//!
//! Core types for the Convoy job coordination service.
//!
//! This crate contains:
//! - Domain types: Core business entities (JobInfo, JobDefinition, etc.)
//! - DTOs: Wire types for communication with remote job workers

pub mod domain;
pub mod dto;
