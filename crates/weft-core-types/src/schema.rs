//! Canonical schema constants for structured logging
//!
//! These constants keep field names identical between the coordinator,
//! the repositories and the test capture layer.

// Canonical field keys
pub const FIELD_COMPONENT: &str = "component";
pub const FIELD_OP: &str = "op";
pub const FIELD_EVENT: &str = "event";
pub const FIELD_DURATION_MS: &str = "duration_ms";
pub const FIELD_REQUEST_ID: &str = "request_id";

// Coordinator identifiers
pub const FIELD_TX_ID: &str = "tx_id";
pub const FIELD_SCOPE_ID: &str = "scope_id";
pub const FIELD_MODEL: &str = "model";
pub const FIELD_REPOSITORY: &str = "repository";
pub const FIELD_SAVEPOINT: &str = "savepoint";

// Collection sizes
pub const FIELD_PARTICIPANTS: &str = "participants";
pub const FIELD_STACK_DEPTH: &str = "stack_depth";

// Error fields
pub const FIELD_ERR_KIND: &str = "err.kind";
pub const FIELD_ERR_CODE: &str = "err.code";

// Canonical event names
pub const EVENT_START: &str = "start";
pub const EVENT_END: &str = "end";
pub const EVENT_END_ERROR: &str = "end_error";
