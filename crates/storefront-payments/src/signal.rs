//! Provider Status Normalization
//!
//! The provider reports transaction outcomes as free-form strings whose
//! spelling varies by rail and locale. They are folded into three signals;
//! anything outside the two synonym sets is `Unknown` and never moves a
//! record.

use serde::{Deserialize, Serialize};

use crate::ledger::RecordStatus;

/// Spellings that mean the money moved
pub const SUCCESS_SYNONYMS: &[&str] = &[
    "successful",
    "success",
    "completed",
    "complete",
    "paid",
    "approved",
    "settled",
    "concluido",
    "concluído",
];

/// Spellings that mean it never will
pub const FAILURE_SYNONYMS: &[&str] = &[
    "failed",
    "failure",
    "error",
    "cancelled",
    "canceled",
    "expired",
    "rejected",
    "declined",
    "falhado",
];

/// Normalized provider status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSignal {
    Success,
    Failure,
    Unknown,
}

impl ProviderSignal {
    /// Case-insensitive match against the synonym sets
    pub fn normalize(raw: &str) -> Self {
        let status = raw.trim().to_lowercase();
        if SUCCESS_SYNONYMS.contains(&status.as_str()) {
            Self::Success
        } else if FAILURE_SYNONYMS.contains(&status.as_str()) {
            Self::Failure
        } else {
            Self::Unknown
        }
    }

    /// `None` (no status at all) is `Unknown`
    pub fn from_optional(raw: Option<&str>) -> Self {
        raw.map_or(Self::Unknown, Self::normalize)
    }

    /// Terminal ledger status this signal drives a pending record to
    pub const fn target_status(self) -> Option<RecordStatus> {
        match self {
            Self::Success => Some(RecordStatus::Settled),
            Self::Failure => Some(RecordStatus::Failed),
            Self::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_synonyms_any_case() {
        for raw in ["successful", "COMPLETED", "Paid", " approved ", "Concluído"] {
            assert_eq!(ProviderSignal::normalize(raw), ProviderSignal::Success, "{raw}");
        }
    }

    #[test]
    fn test_failure_synonyms_any_case() {
        for raw in ["failed", "Cancelled", "EXPIRED", "rejected", "error"] {
            assert_eq!(ProviderSignal::normalize(raw), ProviderSignal::Failure, "{raw}");
        }
    }

    #[test]
    fn test_everything_else_is_unknown() {
        for raw in ["", "pending", "processing", "paid-ish", "succeeded later"] {
            assert_eq!(ProviderSignal::normalize(raw), ProviderSignal::Unknown, "{raw}");
        }
        assert_eq!(ProviderSignal::from_optional(None), ProviderSignal::Unknown);
        assert_eq!(ProviderSignal::Unknown.target_status(), None);
    }

    #[test]
    fn test_target_status() {
        assert_eq!(
            ProviderSignal::Success.target_status(),
            Some(RecordStatus::Settled)
        );
        assert_eq!(
            ProviderSignal::Failure.target_status(),
            Some(RecordStatus::Failed)
        );
    }
}
