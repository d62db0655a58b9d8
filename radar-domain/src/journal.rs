use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalReport {
    Error {
        title: String,
        stack_trace: String,
    },
    ProfileReport {
        profile_id: i64,
        device_addresses: Vec<String>,
    },
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct JournalEntry {
    /// Assigned by the store; `None` until persisted.
    pub id: Option<i64>,
    pub time: DateTime<Utc>,
    pub report: JournalReport,
}

impl JournalEntry {
    #[must_use]
    pub fn new(time: DateTime<Utc>, report: JournalReport) -> JournalEntry {
        JournalEntry {
            id: None,
            time,
            report,
        }
    }

    pub fn error(time: DateTime<Utc>, title: impl Into<String>, stack_trace: impl Into<String>) -> JournalEntry {
        JournalEntry::new(
            time,
            JournalReport::Error {
                title: title.into(),
                stack_trace: stack_trace.into(),
            },
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self.report, JournalReport::Error { .. })
    }
}

impl std::fmt::Display for JournalReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use JournalReport::{Error, ProfileReport};
        match self {
            Error { title, .. } => write!(f, "{title}"),
            ProfileReport {
                profile_id,
                device_addresses,
            } => write!(
                f,
                "profile {profile_id} matched {}",
                device_addresses.join(", ")
            ),
        }
    }
}
