//! Conditional responses keyed by content hash.
//!
//! The ETag of a payload is the SHA-256 of its canonical JSON, so it only
//! changes when the data does. A caller presenting the current tag gets a
//! body-less "not modified" answer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::content_hash;
use crate::clock::Clock;
use crate::origin::{Resolved, Source, Warning};

/// A payload and its tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tagged {
    pub payload: Value,
    pub etag: String,
}

/// Outbound response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<Warning>,
    pub etag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConditionalResponse {
    NotModified { etag: String },
    Modified(Envelope),
}

/// Strip an optional weak prefix and surrounding quotes from an entity tag.
fn opaque_tag(tag: &str) -> &str {
    let tag = tag.trim();
    let tag = tag.strip_prefix("W/").unwrap_or(tag);
    tag.trim_matches('"')
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConditionalResponder;

impl ConditionalResponder {
    pub fn wrap(&self, payload: Value) -> Tagged {
        Tagged { etag: content_hash(&payload), payload }
    }

    /// Whether `client_token` names the same content as `etag`.
    pub fn is_unchanged(&self, etag: &str, client_token: Option<&str>) -> bool {
        match client_token {
            Some(token) if !token.trim().is_empty() => {
                // `*` matches any current representation
                opaque_tag(token) == "*" || opaque_tag(token) == opaque_tag(etag)
            }
            _ => false,
        }
    }

    /// Turn a resolved payload into the outbound response.
    pub fn respond(&self, resolved: Resolved, client_token: Option<&str>, clock: &dyn Clock) -> ConditionalResponse {
        if self.is_unchanged(&resolved.etag, client_token) {
            tracing::debug!(key = %resolved.key, "conditional request not modified");
            return ConditionalResponse::NotModified { etag: resolved.etag };
        }

        ConditionalResponse::Modified(Envelope {
            success: true,
            data: resolved.payload,
            timestamp: clock.now(),
            source: resolved.source,
            warning: resolved.warning,
            etag: resolved.etag,
        })
    }
}
