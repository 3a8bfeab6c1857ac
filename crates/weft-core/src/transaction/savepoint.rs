use crate::transaction::participant::ParticipantId;

/// Membership entry recorded by a savepoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enlistment {
    pub id: ParticipantId,
    pub repository: String,
}

/// Named checkpoint on a transaction's savepoint stack
///
/// `participants` is every participant enlisted when the checkpoint was
/// taken. `delta` is the subset that received a native savepoint call,
/// i.e. those enlisted since the previous checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    pub(crate) name: String,
    pub(crate) participants: Vec<Enlistment>,
    pub(crate) delta: Vec<ParticipantId>,
}

impl Savepoint {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn participants(&self) -> &[Enlistment] {
        &self.participants
    }

    pub fn delta(&self) -> &[ParticipantId] {
        &self.delta
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.participants.iter().any(|e| e.id == id)
    }

    pub fn in_delta(&self, id: ParticipantId) -> bool {
        self.delta.contains(&id)
    }

    /// Repository ids in enlistment order
    pub fn repositories(&self) -> Vec<&str> {
        self.participants
            .iter()
            .map(|e| e.repository.as_str())
            .collect()
    }
}
