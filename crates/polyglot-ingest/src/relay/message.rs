//! Relay wire messages.
//!
//! Only the subscribe / stream / end-of-stream subset of NIP-01 is spoken:
//!
//! ```text
//! client → relay   ["REQ", <sub id>, {since, until, kinds?, limit}]
//! client → relay   ["CLOSE", <sub id>]
//! relay  → client  ["EVENT", <sub id>, <record>]
//! relay  → client  ["EOSE", <sub id>]
//! relay  → client  ["CLOSED", <sub id>, <message>]
//! relay  → client  ["NOTICE", <message>]
//! ```

use polyglot_core::{Record, validate_record};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Maximum number of records a single subscription asks for.
///
/// Relays cap results per request; the fetcher keeps each request under
/// this cap by splitting the window into chunks.
pub const DEFAULT_LIMIT: usize = 1000;

/// Query descriptor sent with a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub since: u64,
    pub until: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    pub limit: usize,
}

impl Filter {
    pub fn new(since: u64, until: u64) -> Self {
        Self {
            since,
            until,
            kinds: None,
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn kinds(mut self, kinds: Option<Vec<u32>>) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Whether a record falls inside this filter (inclusive bounds).
    pub fn matches(&self, record: &Record) -> bool {
        record.created_at >= self.since
            && record.created_at <= self.until
            && self
                .kinds
                .as_ref()
                .is_none_or(|kinds| kinds.contains(&record.kind))
    }
}

/// Frames sent from client to relay.
#[derive(Debug, Clone, Copy)]
pub enum ClientMessage<'a> {
    Req {
        subscription_id: &'a str,
        filter: &'a Filter,
    },
    Close {
        subscription_id: &'a str,
    },
}

impl ClientMessage<'_> {
    pub fn to_json(&self) -> Result<String> {
        let frame = match self {
            Self::Req {
                subscription_id,
                filter,
            } => serde_json::json!(["REQ", subscription_id, filter]),
            Self::Close { subscription_id } => serde_json::json!(["CLOSE", subscription_id]),
        };
        Ok(serde_json::to_string(&frame)?)
    }
}

/// Frames received from a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        record: Record,
    },
    EndOfStoredEvents {
        subscription_id: String,
    },
    Closed {
        subscription_id: String,
        message: String,
    },
    Notice {
        message: String,
    },
}

impl RelayMessage {
    /// Decode a text frame.
    ///
    /// Anything that isn't one of the frames above, or an `EVENT` whose
    /// record fails validation, is a [`Error::MalformedMessage`].
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::MalformedMessage(format!("invalid JSON: {}", e)))?;
        let Value::Array(items) = value else {
            return Err(Error::MalformedMessage("frame is not an array".to_string()));
        };

        let label = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| Error::MalformedMessage("missing frame label".to_string()))?;

        match label {
            "EVENT" => {
                let subscription_id = string_at(&items, 1, "EVENT")?;
                let raw = items
                    .get(2)
                    .cloned()
                    .ok_or_else(|| Error::MalformedMessage("EVENT without record".to_string()))?;
                let record: Record = serde_json::from_value(raw)
                    .map_err(|e| Error::MalformedMessage(format!("invalid record: {}", e)))?;
                validate_record(&record)
                    .map_err(|e| Error::MalformedMessage(format!("invalid record: {}", e)))?;
                Ok(Self::Event {
                    subscription_id,
                    record,
                })
            }
            "EOSE" => Ok(Self::EndOfStoredEvents {
                subscription_id: string_at(&items, 1, "EOSE")?,
            }),
            "CLOSED" => Ok(Self::Closed {
                subscription_id: string_at(&items, 1, "CLOSED")?,
                message: items
                    .get(2)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            "NOTICE" => Ok(Self::Notice {
                message: string_at(&items, 1, "NOTICE")?,
            }),
            other => Err(Error::MalformedMessage(format!(
                "unsupported frame label '{}'",
                other
            ))),
        }
    }
}

fn string_at(items: &[Value], index: usize, label: &str) -> Result<String> {
    items
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::MalformedMessage(format!("{} frame missing field {}", label, index)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "4ff2236ceb2fdc6dee6317cd0b841f3f020ac985bb3f99f7f4c1f973ec28d06b";
    const PUBKEY: &str = "35e433c42e5bb838daabd178d54620e427cccb214c55b95daac3dbd9506fbcaf";

    #[test]
    fn test_req_frame_shape() {
        let filter = Filter::new(100, 200).kinds(Some(vec![1, 42]));
        let json = ClientMessage::Req {
            subscription_id: "sub-1",
            filter: &filter,
        }
        .to_json()
        .unwrap();

        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0], "REQ");
        assert_eq!(value[1], "sub-1");
        assert_eq!(value[2]["since"], 100);
        assert_eq!(value[2]["until"], 200);
        assert_eq!(value[2]["kinds"], serde_json::json!([1, 42]));
        assert_eq!(value[2]["limit"], 1000);
    }

    #[test]
    fn test_req_omits_kinds_when_unset() {
        let filter = Filter::new(0, 10);
        let json = ClientMessage::Req {
            subscription_id: "s",
            filter: &filter,
        }
        .to_json()
        .unwrap();
        assert!(!json.contains("kinds"));
    }

    #[test]
    fn test_close_frame() {
        let json = ClientMessage::Close {
            subscription_id: "sub-9",
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"["CLOSE","sub-9"]"#);
    }

    #[test]
    fn test_parse_event() {
        let text = format!(
            r#"["EVENT","sub-1",{{"id":"{ID}","pubkey":"{PUBKEY}","created_at":150,"kind":1,"tags":[],"content":"hi","sig":"00"}}]"#
        );
        match RelayMessage::from_json(&text).unwrap() {
            RelayMessage::Event {
                subscription_id,
                record,
            } => {
                assert_eq!(subscription_id, "sub-1");
                assert_eq!(record.id, ID);
                assert_eq!(record.content, "hi");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_eose_notice_closed() {
        assert_eq!(
            RelayMessage::from_json(r#"["EOSE","sub-1"]"#).unwrap(),
            RelayMessage::EndOfStoredEvents {
                subscription_id: "sub-1".to_string()
            }
        );
        assert_eq!(
            RelayMessage::from_json(r#"["NOTICE","slow down"]"#).unwrap(),
            RelayMessage::Notice {
                message: "slow down".to_string()
            }
        );
        assert_eq!(
            RelayMessage::from_json(r#"["CLOSED","sub-1","error: too many"]"#).unwrap(),
            RelayMessage::Closed {
                subscription_id: "sub-1".to_string(),
                message: "error: too many".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_frames() {
        for text in [
            "not json",
            r#"{"EVENT":1}"#,
            r#"[]"#,
            r#"["EOSE"]"#,
            r#"["AUTH","challenge"]"#,
            r#"["EVENT","sub-1"]"#,
            r#"["EVENT","sub-1",{"id":"short","pubkey":"x","created_at":1,"kind":1}]"#,
        ] {
            let err = RelayMessage::from_json(text).unwrap_err();
            assert!(
                matches!(err, Error::MalformedMessage(_)),
                "{text} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_filter_matches_inclusive_bounds() {
        let filter = Filter::new(100, 200).kinds(Some(vec![1]));
        let mut record: Record = serde_json::from_value(serde_json::json!({
            "id": ID, "pubkey": PUBKEY, "created_at": 100, "kind": 1
        }))
        .unwrap();
        assert!(filter.matches(&record));
        record.created_at = 200;
        assert!(filter.matches(&record));
        record.created_at = 201;
        assert!(!filter.matches(&record));
        record.created_at = 150;
        record.kind = 7;
        assert!(!filter.matches(&record));
    }
}
