use serde::{Deserialize, Serialize};

/// Severity levels for audit entries; drives retention policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Authorization-relevant events: long-term retention, never auto-delete.
    Critical,
    #[default]
    Important,
    /// Aggressively trimmed.
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// Entities that can appear in the audit trail. The entity type becomes the
/// event-name prefix, e.g. "role.created".
pub trait Loggable: Serialize + Send + Sync {
    fn entity_type() -> &'static str;

    /// Primary key of the affected entity, when it has one.
    fn subject_id(&self) -> Option<i64>;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    /// Revocations and deletions are always retained.
    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" | "revoked" => Severity::Critical,
            _ => self.severity(),
        }
    }
}
