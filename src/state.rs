//! Transaction lifecycle states

use serde::{Deserialize, Serialize};

/// Phase of a transaction.
///
/// ```text
/// Pending -> Preparing -> Prepared -> Committing -> Committed
///               |                         |
///               v                         v
///         PrepareFailed              CommitFailed -> RollingBack -> RolledBack | RollbackFailed
///               |                                      ^
///               +--------------------------------------+
/// ```
///
/// Saga transactions go `Pending -> Forwarding -> Committed | CommitFailed`.
/// A timeout folds into `CommitFailed` from any non-terminal phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionPhase {
    Pending,
    Preparing,
    Prepared,
    Forwarding,
    Committing,
    Committed,
    PrepareFailed,
    CommitFailed,
    RollingBack,
    RolledBack,
    RollbackFailed,
}

impl TransactionPhase {
    /// Check whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: TransactionPhase) -> bool {
        use TransactionPhase::*;

        if next == CommitFailed && !self.is_terminal() && !self.is_failed() {
            return true;
        }

        matches!(
            (self, next),
            (Pending, Preparing)
                | (Pending, Forwarding)
                | (Preparing, Prepared)
                | (Preparing, PrepareFailed)
                | (Prepared, Committing)
                | (Committing, Committed)
                | (Forwarding, Committed)
                | (PrepareFailed, RollingBack)
                | (CommitFailed, RollingBack)
                | (RollingBack, RolledBack)
                | (RollingBack, RollbackFailed)
        )
    }

    /// Terminal phases end the transaction
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::RollbackFailed)
    }

    fn is_failed(&self) -> bool {
        matches!(
            self,
            Self::PrepareFailed | Self::CommitFailed | Self::RollingBack
        )
    }

    /// Short lowercase name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Preparing => "preparing",
            Self::Prepared => "prepared",
            Self::Forwarding => "forwarding",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::PrepareFailed => "prepare_failed",
            Self::CommitFailed => "commit_failed",
            Self::RollingBack => "rolling_back",
            Self::RolledBack => "rolled_back",
            Self::RollbackFailed => "rollback_failed",
        }
    }
}

impl std::fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
