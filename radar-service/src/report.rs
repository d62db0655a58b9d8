use std::{error::Error, sync::Arc};

use chrono::{DateTime, Utc};
use tracing::error;

use radar_domain::journal::{JournalEntry, JournalReport};
use radar_sinks::store::RadarStore;

use crate::matcher::ProfileResult;

const ERROR_TITLE_PREFIX: &str = "[BLE Service Error]";

/// The display string followed by one "caused by:" line per source.
pub fn trace(error: &dyn Error) -> String {
    let mut trace = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        trace.push_str("\ncaused by: ");
        trace.push_str(&cause.to_string());
        source = cause.source();
    }
    trace
}

pub fn error_title(error: &dyn Error) -> String {
    format!("{ERROR_TITLE_PREFIX}: {error}")
}

/// Writes errors and profile matches to the journal. A journal that can't be
/// written is logged and otherwise ignored.
#[derive(Clone)]
pub struct JournalReporter {
    store: Arc<dyn RadarStore>,
}

impl JournalReporter {
    pub fn new(store: Arc<dyn RadarStore>) -> JournalReporter {
        JournalReporter { store }
    }

    pub async fn report_error(&self, e: &(dyn Error + Send + Sync)) {
        let trace = trace(e);
        error!("{}", trace.replace('\n', "; "));
        let entry = JournalEntry::error(Utc::now(), error_title(e), trace);
        if let Err(journal_error) = self.store.append(&entry).await {
            error!("Could not journal error: {journal_error}");
        }
    }

    pub async fn report_profile(&self, time: DateTime<Utc>, result: &ProfileResult) {
        let entry = JournalEntry::new(
            time,
            JournalReport::ProfileReport {
                profile_id: result.profile_id,
                device_addresses: result.matched_addresses.clone(),
            },
        );
        if let Err(journal_error) = self.store.append(&entry).await {
            error!("Could not journal profile match: {journal_error}");
        }
    }
}
