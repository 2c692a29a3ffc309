use chrono::{DateTime, Utc};
use pkg_constants::annotations::{EXCLUDE_LABEL, FORCE_SLEEP_UNTIL, LAST_SLEEP_TIME};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A tenant namespace ("project").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// True when the project opted out of hibernation.
    pub fn is_excluded(&self) -> bool {
        self.labels.get(EXCLUDE_LABEL).is_some_and(|v| v == "true")
    }

    /// Wake time persisted by a previous force-sleep, if any.
    pub fn force_sleep_until(&self) -> Option<DateTime<Utc>> {
        parse_time(self.annotations.get(FORCE_SLEEP_UNTIL)?)
    }

    pub fn last_sleep_time(&self) -> Option<DateTime<Utc>> {
        parse_time(self.annotations.get(LAST_SLEEP_TIME)?)
    }
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
