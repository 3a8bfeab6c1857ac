//! Core types shared across weft facilities
//!
//! This crate provides the foundational types used by the coordinator,
//! the error facility and the logging facility:
//!
//! - **Correlation types**: RequestId, TraceId, TransactionId, ScopeId
//! - **Schema constants**: Canonical field keys and event names

pub mod correlation;
pub mod schema;

pub use correlation::{RequestId, ScopeId, TraceId, TransactionId};
