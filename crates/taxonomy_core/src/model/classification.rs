//! Classification records and their lifecycle rules.
//!
//! # Invariants
//! - `confidence_score` is finite and inside `[0, 1]`.
//! - `rejected` and `expired` are terminal.
//! - A classification only becomes `expired` once `expires_at` has passed.

use crate::model::category::CategoryId;
use crate::model::metadata::Metadata;
use crate::model::taxonomy::TaxonomyId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ClassificationId = Uuid;

/// Origin of an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignedBy {
    System,
    User,
    Ai,
    Import,
}

impl AssignedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Ai => "ai",
            Self::Import => "import",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "ai" => Some(Self::Ai),
            "import" => Some(Self::Import),
            _ => None,
        }
    }

    /// System and import assignments are trusted and start confirmed.
    pub fn initial_status(self) -> ClassificationStatus {
        match self {
            Self::System | Self::Import => ClassificationStatus::Confirmed,
            Self::User | Self::Ai => ClassificationStatus::Pending,
        }
    }
}

/// Classification lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStatus {
    Pending,
    Confirmed,
    Rejected,
    Expired,
}

impl ClassificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Pending and confirmed rows count towards duplicates and quotas.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Whether a status change from `self` to `next` is allowed.
    ///
    /// The move to `Expired` additionally requires `expires_at` to have
    /// passed, see [`Classification::can_expire_at`].
    pub fn can_transition_to(self, next: ClassificationStatus) -> bool {
        use ClassificationStatus::{Confirmed, Expired, Pending, Rejected};
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Rejected)
                | (Confirmed, Rejected)
                | (Pending, Expired)
                | (Confirmed, Expired)
        )
    }
}

/// Assignment of an external entity to a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub id: ClassificationId,
    pub tenant_id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub taxonomy_id: TaxonomyId,
    pub category_id: CategoryId,
    pub confidence_score: f64,
    pub assigned_by: AssignedBy,
    pub status: ClassificationStatus,
    /// Epoch ms after which an active classification lapses.
    pub expires_at: Option<i64>,
    pub metadata: Metadata,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl Classification {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// True once `expires_at` is at or before `now_ms`.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now_ms)
    }

    /// Whether the expiry transition applies at `now_ms`.
    pub fn can_expire_at(&self, now_ms: i64) -> bool {
        self.status.can_transition_to(ClassificationStatus::Expired) && self.is_expired_at(now_ms)
    }

    /// Status a reader should observe at `now_ms`, even before the periodic
    /// sweep has persisted the expiry.
    pub fn effective_status_at(&self, now_ms: i64) -> ClassificationStatus {
        if self.can_expire_at(now_ms) {
            ClassificationStatus::Expired
        } else {
            self.status
        }
    }

    /// Returns the row with `status` replaced by its effective status.
    pub fn observed_at(mut self, now_ms: i64) -> Self {
        self.status = self.effective_status_at(now_ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{AssignedBy, Classification, ClassificationStatus};
    use crate::model::metadata::Metadata;
    use uuid::Uuid;

    fn classification(status: ClassificationStatus, expires_at: Option<i64>) -> Classification {
        Classification {
            id: Uuid::new_v4(),
            tenant_id: "t1".to_string(),
            entity_type: "event".to_string(),
            entity_id: "evt-1".to_string(),
            taxonomy_id: Uuid::new_v4(),
            category_id: Uuid::new_v4(),
            confidence_score: 0.5,
            assigned_by: AssignedBy::User,
            status,
            expires_at,
            metadata: Metadata::new(),
            created_by: "u1".to_string(),
            updated_by: "u1".to_string(),
            created_at: 0,
            updated_at: 0,
            deleted_at: None,
        }
    }

    #[test]
    fn trusted_sources_start_confirmed() {
        assert_eq!(
            AssignedBy::System.initial_status(),
            ClassificationStatus::Confirmed
        );
        assert_eq!(
            AssignedBy::Import.initial_status(),
            ClassificationStatus::Confirmed
        );
        assert_eq!(AssignedBy::User.initial_status(), ClassificationStatus::Pending);
        assert_eq!(AssignedBy::Ai.initial_status(), ClassificationStatus::Pending);
    }

    #[test]
    fn terminal_states_do_not_transition() {
        for from in [ClassificationStatus::Rejected, ClassificationStatus::Expired] {
            for to in [
                ClassificationStatus::Pending,
                ClassificationStatus::Confirmed,
                ClassificationStatus::Rejected,
                ClassificationStatus::Expired,
            ] {
                assert!(!from.can_transition_to(to), "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn expiry_requires_elapsed_deadline() {
        let row = classification(ClassificationStatus::Confirmed, Some(1_000));
        assert!(!row.can_expire_at(999));
        assert!(row.can_expire_at(1_000));
        assert_eq!(row.effective_status_at(999), ClassificationStatus::Confirmed);
        assert_eq!(row.effective_status_at(5_000), ClassificationStatus::Expired);
    }

    #[test]
    fn rows_without_deadline_never_expire() {
        let row = classification(ClassificationStatus::Pending, None);
        assert!(!row.can_expire_at(i64::MAX));
    }

    #[test]
    fn rejected_rows_stay_rejected_after_deadline() {
        let row = classification(ClassificationStatus::Rejected, Some(10));
        assert_eq!(row.effective_status_at(20), ClassificationStatus::Rejected);
    }

    #[test]
    fn observed_rows_carry_effective_status() {
        let row = classification(ClassificationStatus::Pending, Some(100));
        assert_eq!(row.clone().observed_at(50).status, ClassificationStatus::Pending);
        assert_eq!(row.observed_at(100).status, ClassificationStatus::Expired);
    }
}
