/// Ledger entry status definitions
///
/// The persisted columns are `finished` and `dead_lettered`; this enum is the
/// combined view used by statistics and logging.
use std::fmt;

/// Represents where a ledger entry stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryStatus {
    /// Admitted but not yet completed; dispatched again on resume
    Pending,

    /// Completed; never dispatched again
    Finished,

    /// Unfinished, but failed too often to be retried automatically
    DeadLettered,
}

impl EntryStatus {
    /// Derives the status from the persisted flags
    ///
    /// `finished` wins over `dead_lettered`: a dead-lettered entry that is
    /// revived and later completed is simply finished.
    pub fn from_flags(finished: bool, dead_lettered: bool) -> Self {
        if finished {
            Self::Finished
        } else if dead_lettered {
            Self::DeadLettered
        } else {
            Self::Pending
        }
    }

    /// Returns true if the entry will be dispatched again on resume
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Finished => "finished",
            Self::DeadLettered => "dead_lettered",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "finished" => Some(Self::Finished),
            "dead_lettered" => Some(Self::DeadLettered),
            _ => None,
        }
    }

    pub fn all_states() -> Vec<Self> {
        vec![Self::Pending, Self::Finished, Self::DeadLettered]
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
