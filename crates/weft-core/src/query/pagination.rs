use crate::errors::{Result, WeftError};

/// Result window of a list query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// `limit` of zero means unbounded
    LimitOffset { limit: u64, offset: u64 },
    /// One-based page number
    Paged { number: u64, size: u64 },
}

impl Pagination {
    pub fn limit_offset(limit: u64, offset: u64) -> Self {
        Pagination::LimitOffset { limit, offset }
    }

    pub fn paged(number: u64, size: u64) -> Self {
        Pagination::Paged { number, size }
    }

    /// Validate the parameters
    ///
    /// # Errors
    ///
    /// Returns `InvalidPagination` when a page number or size is zero, or
    /// when limit and offset are both zero.
    pub fn check(&self) -> Result<()> {
        let reason = match *self {
            Pagination::Paged { number: 0, .. } => "page number must be at least 1",
            Pagination::Paged { size: 0, .. } => "page size must be at least 1",
            Pagination::LimitOffset {
                limit: 0,
                offset: 0,
            } => "limit and offset are both zero",
            _ => return Ok(()),
        };
        Err(WeftError::InvalidPagination {
            reason: reason.to_string(),
        })
    }

    /// Normalize to `(limit, offset)`; `None` means no limit
    pub fn window(&self) -> (Option<u64>, u64) {
        match *self {
            Pagination::LimitOffset { limit, offset } => {
                ((limit > 0).then_some(limit), offset)
            }
            Pagination::Paged { number, size } => {
                (Some(size), number.saturating_sub(1).saturating_mul(size))
            }
        }
    }
}
