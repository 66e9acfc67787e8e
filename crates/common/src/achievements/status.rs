//! Verification state machine
//!
//! ```text
//! draft ──submit──▶ submitted ──verify──▶ verified
//!   │                   └──────reject───▶ rejected
//!   └──delete──▶ deleted
//! ```
//!
//! Every edge is applied as a conditional update on the expected source
//! status, so a stale or concurrent caller matches zero rows.

use crate::db::models::AchievementStatus;
use crate::store::StatusChange;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Submit,
    Verify,
    Reject,
    Delete,
}

impl Transition {
    pub fn from_status(&self) -> AchievementStatus {
        match self {
            Transition::Submit | Transition::Delete => AchievementStatus::Draft,
            Transition::Verify | Transition::Reject => AchievementStatus::Submitted,
        }
    }

    pub fn to_status(&self) -> AchievementStatus {
        match self {
            Transition::Submit => AchievementStatus::Submitted,
            Transition::Verify => AchievementStatus::Verified,
            Transition::Reject => AchievementStatus::Rejected,
            Transition::Delete => AchievementStatus::Deleted,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transition::Submit => "submit",
            Transition::Verify => "verify",
            Transition::Reject => "reject",
            Transition::Delete => "delete",
        }
    }

    /// Columns written when this edge is taken
    pub fn change(
        &self,
        at: DateTime<Utc>,
        verifier: Option<Uuid>,
        note: Option<String>,
    ) -> StatusChange {
        let mut change = StatusChange {
            status: self.to_status(),
            submitted_at: None,
            verified_at: None,
            verified_by: None,
            rejection_note: None,
            updated_at: at,
        };

        match self {
            Transition::Submit => change.submitted_at = Some(at),
            Transition::Verify => {
                change.verified_at = Some(at);
                change.verified_by = verifier;
            }
            Transition::Reject => {
                change.verified_at = Some(at);
                change.verified_by = verifier;
                change.rejection_note = note;
            }
            Transition::Delete => {}
        }

        change
    }
}
