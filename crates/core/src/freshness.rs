//! Advisory freshness classification.
//!
//! Used for display and telemetry only. Nothing in the serving path branches
//! on it.

use chrono::Duration;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::key::DatasetKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessClass {
    Fresh,
    Stale,
    Old,
}

/// Threshold set a dataset is judged by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessCategory {
    /// In-progress match data.
    Live,
    /// Points table and standings.
    Standings,
    General,
}

impl FreshnessCategory {
    pub fn for_key(key: &DatasetKey) -> Self {
        match key.dataset() {
            "live" => FreshnessCategory::Live,
            "matches" if key.filter("status") == Some("live") => FreshnessCategory::Live,
            "points-table" | "standings" => FreshnessCategory::Standings,
            _ => FreshnessCategory::General,
        }
    }

    /// Upper bounds (exclusive) for `Fresh` and `Stale`, in seconds.
    pub fn thresholds(self) -> (i64, i64) {
        match self {
            FreshnessCategory::Live => (30, 120),
            FreshnessCategory::Standings => (120, 300),
            FreshnessCategory::General => (300, 900),
        }
    }

    pub fn classify(self, age: Duration) -> FreshnessClass {
        let (fresh, stale) = self.thresholds();
        let secs = age.num_seconds();
        if secs < fresh {
            FreshnessClass::Fresh
        } else if secs < stale {
            FreshnessClass::Stale
        } else {
            FreshnessClass::Old
        }
    }
}

/// Classify data for `key` that is `age` old.
pub fn classify(key: &DatasetKey, age: Duration) -> FreshnessClass {
    FreshnessCategory::for_key(key).classify(age)
}
