use std::sync::Arc;

use crate::repository::{Repository, RepositoryTransaction};

/// Identity of one enlistment within a transaction
///
/// A repository rolled out by `rollback_savepoint` and touched again later
/// is enlisted anew under a fresh id, so older savepoint snapshots never
/// mistake it for the participant they recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId(pub(crate) u64);

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// A repository enlisted in a transaction with its open sub-transaction
pub(crate) struct Participant {
    pub(crate) id: ParticipantId,
    pub(crate) repository: Arc<dyn Repository>,
    pub(crate) handle: Box<dyn RepositoryTransaction>,
}

impl Participant {
    pub(crate) fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            id: self.id,
            repository: self.repository.id().to_string(),
        }
    }
}

/// Read-only view of a participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub id: ParticipantId,
    pub repository: String,
}
