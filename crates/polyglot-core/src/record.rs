//! Activity records as delivered by relays.
//!
//! A [`Record`] is the subset of a NIP-01 event that the analysis pipeline
//! needs. Signatures are not carried: relays are trusted for the purpose of
//! counting activity, and an incoming `sig` field is ignored on decode.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::SECONDS_PER_DAY;

/// Days since the Unix epoch.
pub type EpochDay = u32;

/// A timestamped content item produced by an author key.
///
/// Identity is the `id` field: two records with the same id are the same
/// record no matter which relay delivered them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// 32-byte event id, lowercase hex.
    pub id: String,
    /// Author public key, lowercase hex.
    pub pubkey: String,
    /// Creation time in Unix seconds.
    pub created_at: u64,
    /// Event kind.
    pub kind: u32,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    /// Language assigned from the author's language scores.
    #[serde(
        default,
        rename = "detectedLanguage",
        skip_serializing_if = "Option::is_none"
    )]
    pub detected_language: Option<String>,
}

impl Record {
    /// The author key of this record.
    pub fn author_key(&self) -> &str {
        &self.pubkey
    }

    /// Epoch day this record was created on.
    pub fn epoch_day(&self) -> EpochDay {
        timestamp_to_epoch_day(self.created_at)
    }

    /// Self-declared ISO-639-1 language labels (NIP-32 `l` tags).
    ///
    /// Accepts both `["l", "en", "ISO-639-1"]` and the namespace-less
    /// `["l", "en"]` form.
    pub fn language_labels(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().filter_map(|tag| match tag.as_slice() {
            [name, code] if name == "l" => Some(code.as_str()),
            [name, code, namespace, ..] if name == "l" && namespace == "ISO-639-1" => {
                Some(code.as_str())
            }
            _ => None,
        })
    }
}

/// Validate the identity fields of a record.
///
/// Records with malformed ids or author keys are dropped at the wire
/// boundary so they never reach deduplication or the cache.
pub fn validate_record(record: &Record) -> Result<()> {
    check_hex_field("id", &record.id)?;
    check_hex_field("pubkey", &record.pubkey)?;
    Ok(())
}

fn check_hex_field(field: &'static str, value: &str) -> Result<()> {
    if value.len() != 64 {
        return Err(Error::InvalidField {
            field,
            reason: format!("expected 64 hex characters, got {}", value.len()),
        });
    }
    if !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidField {
            field,
            reason: "contains non-hex characters".to_string(),
        });
    }
    Ok(())
}

/// Convert a Unix timestamp to its epoch day.
pub fn timestamp_to_epoch_day(timestamp: u64) -> EpochDay {
    (timestamp / SECONDS_PER_DAY) as EpochDay
}
