use thiserror::Error;

/// Result type alias using WeftError
pub type Result<T> = std::result::Result<T, WeftError>;

/// Result type returned by repository implementations
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code that callers can match on in tests,
/// in logs and at API boundaries without depending on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Coordinator state
    TransactionClosed,
    AlreadyInTransaction,
    SavepointNotFound,
    DatabaseClosed,

    // Resolution
    RepositoryNotRegistered,
    RepositoryAlreadyRegistered,
    ModelNotRegistered,
    ModelAlreadyRegistered,

    // Validation
    InvalidModel,
    InvalidField,
    InvalidInput,
    InvalidPagination,

    // Backends
    Backend,
    Aggregate,
    NotImplemented,

    // Context
    Cancelled,
    DeadlineExceeded,

    // Integration
    Serialization,
    Config,
}

impl ErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::TransactionClosed => "ERR_TRANSACTION_CLOSED",
            ErrorKind::AlreadyInTransaction => "ERR_ALREADY_IN_TRANSACTION",
            ErrorKind::SavepointNotFound => "ERR_SAVEPOINT_NOT_FOUND",
            ErrorKind::DatabaseClosed => "ERR_DATABASE_CLOSED",
            ErrorKind::RepositoryNotRegistered => "ERR_REPOSITORY_NOT_REGISTERED",
            ErrorKind::RepositoryAlreadyRegistered => "ERR_REPOSITORY_ALREADY_REGISTERED",
            ErrorKind::ModelNotRegistered => "ERR_MODEL_NOT_REGISTERED",
            ErrorKind::ModelAlreadyRegistered => "ERR_MODEL_ALREADY_REGISTERED",
            ErrorKind::InvalidModel => "ERR_INVALID_MODEL",
            ErrorKind::InvalidField => "ERR_INVALID_FIELD",
            ErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ErrorKind::InvalidPagination => "ERR_INVALID_PAGINATION",
            ErrorKind::Backend => "ERR_BACKEND",
            ErrorKind::Aggregate => "ERR_AGGREGATE",
            ErrorKind::NotImplemented => "ERR_NOT_IMPLEMENTED",
            ErrorKind::Cancelled => "ERR_CANCELLED",
            ErrorKind::DeadlineExceeded => "ERR_DEADLINE_EXCEEDED",
            ErrorKind::Serialization => "ERR_SERIALIZATION",
            ErrorKind::Config => "ERR_CONFIG",
        }
    }
}

/// Classification of a failure reported by a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// The addressed record or savepoint doesn't exist
    NotFound,
    /// A concurrent writer won
    Conflict,
    /// A uniqueness or integrity rule was violated
    Constraint,
    /// A write was attempted inside a read-only transaction
    ReadOnly,
    /// The backend doesn't implement the requested capability
    Unsupported,
    /// The backend observed context cancellation
    Cancelled,
    /// The request was malformed for this backend
    InvalidInput,
    /// Any other storage failure
    Storage,
}

/// Error reported by a repository implementation
///
/// Opaque to the coordinator: it is only classified, wrapped with the
/// repository identity and operation name, and surfaced to the caller.
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct RepositoryError {
    kind: RepositoryErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl RepositoryError {
    /// Create a new error with the specified kind and message
    pub fn new(kind: RepositoryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying driver error
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RepositoryErrorKind::NotFound, message)
    }

    pub fn unsupported(op: &str) -> Self {
        Self::new(
            RepositoryErrorKind::Unsupported,
            format!("operation '{}' is not supported", op),
        )
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(RepositoryErrorKind::Storage, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(RepositoryErrorKind::InvalidInput, message)
    }

    /// Get the error kind
    pub fn kind(&self) -> RepositoryErrorKind {
        self.kind
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

// ========== End Error Facility ==========

/// Error taxonomy for weft operations
#[derive(Error, Debug)]
pub enum WeftError {
    /// Operation attempted on a committed or rolled back transaction
    #[error("transaction {tx_id} is {state} and accepts no further operations")]
    TransactionClosed { tx_id: String, state: String },

    /// Begin was called with a context that already carries an active transaction
    #[error("context already carries active transaction {tx_id}")]
    AlreadyInTransaction { tx_id: String },

    /// No repository is configured for the model
    #[error("no repository registered for model '{model}'")]
    RepositoryNotRegistered { model: String },

    /// Two repositories were registered under the same id
    #[error("repository '{repository}' is already registered")]
    RepositoryAlreadyRegistered { repository: String },

    /// Savepoint lookup failed
    #[error("savepoint not found: {name}")]
    SavepointNotFound { name: String },

    /// A repository call failed
    #[error("repository '{repository}' failed during {op}: {source}")]
    Backend {
        repository: String,
        op: String,
        #[source]
        source: RepositoryError,
    },

    /// Several participants failed during a fan-out operation
    #[error("{op} failed for {} participant(s): {}", .errors.len(), join_messages(.errors))]
    Multiple { op: String, errors: Vec<WeftError> },

    /// The context was cancelled
    #[error("operation {op} cancelled")]
    Cancelled { op: String },

    /// The context deadline passed
    #[error("operation {op} exceeded its deadline")]
    DeadlineExceeded { op: String },

    /// The database handle was shut down
    #[error("database handle is closed")]
    DatabaseClosed,

    /// Model lookup failed
    #[error("model not registered: {model}")]
    ModelNotRegistered { model: String },

    /// Duplicate model registration
    #[error("model already registered: {model}")]
    ModelAlreadyRegistered { model: String },

    /// Model descriptor failed validation
    #[error("invalid model '{model}': {reason}")]
    InvalidModel { model: String, reason: String },

    /// A scope referenced a field the model doesn't declare
    #[error("model '{model}' has no field '{field}'")]
    InvalidField { model: String, field: String },

    /// Input rejected before reaching any repository
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    /// Pagination parameters are inconsistent
    #[error("invalid pagination: {reason}")]
    InvalidPagination { reason: String },

    /// The repository doesn't implement an optional capability
    #[error("repository '{repository}' doesn't implement {op}")]
    NotImplemented { repository: String, op: String },

    /// Model values could not be converted
    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    /// Configuration could not be loaded or is inconsistent
    #[error("configuration error: {reason}")]
    Config { reason: String },
}

fn join_messages(errors: &[WeftError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl WeftError {
    /// Get the canonical kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            WeftError::TransactionClosed { .. } => ErrorKind::TransactionClosed,
            WeftError::AlreadyInTransaction { .. } => ErrorKind::AlreadyInTransaction,
            WeftError::RepositoryNotRegistered { .. } => ErrorKind::RepositoryNotRegistered,
            WeftError::RepositoryAlreadyRegistered { .. } => {
                ErrorKind::RepositoryAlreadyRegistered
            }
            WeftError::SavepointNotFound { .. } => ErrorKind::SavepointNotFound,
            WeftError::Backend { .. } => ErrorKind::Backend,
            WeftError::Multiple { .. } => ErrorKind::Aggregate,
            WeftError::Cancelled { .. } => ErrorKind::Cancelled,
            WeftError::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            WeftError::DatabaseClosed => ErrorKind::DatabaseClosed,
            WeftError::ModelNotRegistered { .. } => ErrorKind::ModelNotRegistered,
            WeftError::ModelAlreadyRegistered { .. } => ErrorKind::ModelAlreadyRegistered,
            WeftError::InvalidModel { .. } => ErrorKind::InvalidModel,
            WeftError::InvalidField { .. } => ErrorKind::InvalidField,
            WeftError::InvalidInput { .. } => ErrorKind::InvalidInput,
            WeftError::InvalidPagination { .. } => ErrorKind::InvalidPagination,
            WeftError::NotImplemented { .. } => ErrorKind::NotImplemented,
            WeftError::Serialization { .. } => ErrorKind::Serialization,
            WeftError::Config { .. } => ErrorKind::Config,
        }
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Wrap a repository error with the repository identity and operation name
    pub fn backend(repository: impl Into<String>, op: impl Into<String>, source: RepositoryError) -> Self {
        let repository = repository.into();
        let op = op.into();
        if source.kind() == RepositoryErrorKind::Unsupported {
            return WeftError::NotImplemented { repository, op };
        }
        WeftError::Backend {
            repository,
            op,
            source,
        }
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        WeftError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Collapse per-participant failures into one error
    ///
    /// Returns `None` when nothing failed and the error itself when exactly
    /// one participant failed.
    pub fn aggregate(op: &str, mut errors: Vec<WeftError>) -> Option<WeftError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(WeftError::Multiple {
                op: op.to_string(),
                errors,
            }),
        }
    }

    /// Repository identity attached to a backend failure, if any
    pub fn repository(&self) -> Option<&str> {
        match self {
            WeftError::Backend { repository, .. } | WeftError::NotImplemented { repository, .. } => {
                Some(repository)
            }
            _ => None,
        }
    }

    /// Individual failures carried by an aggregated error
    pub fn causes(&self) -> &[WeftError] {
        match self {
            WeftError::Multiple { errors, .. } => errors,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for WeftError {
    fn from(err: serde_json::Error) -> Self {
        WeftError::Serialization {
            reason: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for WeftError {
    fn from(err: toml::de::Error) -> Self {
        WeftError::Config {
            reason: err.to_string(),
        }
    }
}
