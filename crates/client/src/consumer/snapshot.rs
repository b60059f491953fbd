//! What a subscriber sees.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use tally_core::{Error, FreshnessClass, Source, Warning};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub key: String,
    pub value: Option<Value>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<Error>,
    pub is_loading: bool,
    /// Advisory age class of `value`. `None` when there is no fetched value.
    pub freshness: Option<FreshnessClass>,
    pub source: Option<Source>,
    pub warning: Option<Warning>,
    pub produced_at: Option<DateTime<Utc>>,
    pub last_fetch_at: Option<DateTime<Utc>>,
}

fn serialize_error<S: Serializer>(error: &Option<Error>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Local value dropped without a network call.
    Cleared,
    /// Value set locally by `mutate`.
    Mutated,
    Loading,
    Updated,
    Failed,
    /// Last subscriber left.
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotChange {
    pub key: String,
    pub kind: ChangeKind,
}
