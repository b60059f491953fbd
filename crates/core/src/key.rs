//! Dataset keys.
//!
//! A key names a logical dataset plus an optional request filter, written as
//! `dataset` or `dataset:name=value,name=value`. Filters are kept sorted so
//! `matches:team=csk,status=live` and `matches:status=live,team=csk` address
//! the same cache record.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetKey {
    dataset: String,
    filters: BTreeMap<String, String>,
}

fn valid_ident(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl DatasetKey {
    /// Key for an unfiltered dataset.
    pub fn new(dataset: impl Into<String>) -> Result<Self, Error> {
        let dataset = dataset.into();
        if !valid_ident(&dataset) {
            return Err(Error::InvalidKey(format!("bad dataset name `{dataset}`")));
        }
        Ok(Self { dataset, filters: BTreeMap::new() })
    }

    pub fn with_filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        let value = value.into();
        if !valid_ident(&name) {
            return Err(Error::InvalidKey(format!("bad filter name `{name}`")));
        }
        if value.is_empty() || value.contains([',', '=', ':']) {
            return Err(Error::InvalidKey(format!("bad value for filter `{name}`")));
        }
        self.filters.insert(name, value);
        Ok(self)
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    pub fn filters(&self) -> &BTreeMap<String, String> {
        &self.filters
    }

    pub fn filter(&self, name: &str) -> Option<&str> {
        self.filters.get(name).map(String::as_str)
    }

    /// Canonical string form; this is the cache key.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dataset)?;
        for (i, (name, value)) in self.filters.iter().enumerate() {
            f.write_str(if i == 0 { ":" } else { "," })?;
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

impl FromStr for DatasetKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (dataset, rest) = match s.split_once(':') {
            Some((dataset, rest)) => (dataset, Some(rest)),
            None => (s, None),
        };

        let mut key = DatasetKey::new(dataset.to_ascii_lowercase())?;
        if let Some(rest) = rest {
            if rest.is_empty() {
                return Err(Error::InvalidKey(format!("empty filter list in `{s}`")));
            }
            for pair in rest.split(',') {
                let (name, value) = pair
                    .split_once('=')
                    .ok_or_else(|| Error::InvalidKey(format!("filter `{pair}` is not name=value")))?;
                key = key.with_filter(name.trim().to_ascii_lowercase(), value.trim())?;
            }
        }
        Ok(key)
    }
}

impl TryFrom<String> for DatasetKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DatasetKey> for String {
    fn from(key: DatasetKey) -> Self {
        key.to_string()
    }
}
