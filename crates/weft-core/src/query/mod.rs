//! Query shape carried by a `Scope`
//!
//! Filters, field selection, sorting, pagination and relationship includes
//! for one model. Repositories without a native query language can evaluate
//! a scope in memory with `Scope::matches` and `Scope::apply_window`.

pub mod filter;
pub mod include;
pub mod pagination;
pub mod scope;
pub mod sort;

pub use filter::{FilterField, FilterOperator};
pub use include::IncludedRelation;
pub use pagination::Pagination;
pub use scope::Scope;
pub use sort::{SortField, SortOrder};
