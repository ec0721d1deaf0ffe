use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A time-bounded token handed out to at most one holder at a time.
///
/// Stored under its bare id; the id itself is not repeated inside the stored
/// document (see [`Lease::encode`]). The API representation exposes it as `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    #[serde(rename = "key")]
    pub id: String,
    /// Instant after which the sweeper may reclaim the lease.
    #[serde(with = "timestamp")]
    pub expiry: DateTime<Utc>,
    /// `expiry > now` as of the last read or write.
    pub is_active: bool,
    /// True while checked out.
    pub is_blocked: bool,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Last keepalive.
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Last checkout.
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub blocked_at: Option<DateTime<Utc>>,
}

/// Flat storage document: every lease field except the id.
#[derive(Serialize, Deserialize)]
struct Document {
    #[serde(with = "timestamp")]
    expiry: DateTime<Utc>,
    is_active: bool,
    is_blocked: bool,
    #[serde(with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    blocked_at: Option<DateTime<Utc>>,
}

impl Lease {
    /// A fresh, unblocked lease living from `now` until `now + ttl`.
    pub fn new(id: String, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            id,
            expiry: now + ttl,
            is_active: true,
            is_blocked: false,
            created_at: now,
            updated_at: None,
            blocked_at: None,
        }
    }

    /// Whether the lease is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    /// Expiry as the score used by the expiry index.
    pub fn expiry_score(&self) -> i64 {
        self.expiry.timestamp_millis()
    }

    /// Encode into the flat JSON document stored under the lease id.
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let doc = Document {
            expiry: self.expiry,
            is_active: self.is_active,
            is_blocked: self.is_blocked,
            created_at: self.created_at,
            updated_at: self.updated_at,
            blocked_at: self.blocked_at,
        };
        Ok(serde_json::to_vec(&doc)?)
    }

    /// Decode a stored document. Fails when a required field is missing or a
    /// timestamp does not parse.
    pub fn decode(id: &str, bytes: &[u8]) -> anyhow::Result<Self> {
        let doc: Document = serde_json::from_slice(bytes)
            .map_err(|e| anyhow::anyhow!("malformed lease record {}: {}", id, e))?;
        Ok(Self {
            id: id.to_string(),
            expiry: doc.expiry,
            is_active: doc.is_active,
            is_blocked: doc.is_blocked,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
            blocked_at: doc.blocked_at,
        })
    }
}

/// RFC 3339 UTC timestamps with millisecond precision (`2024-01-01T00:00:00.000Z`).
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        DateTime::parse_from_rfc3339(s).map(|ts| ts.with_timezone(&Utc))
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(|e| D::Error::custom(format!("invalid timestamp '{}': {}", raw, e)))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer, de::Error};

        pub fn serialize<S: Serializer>(
            ts: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => serializer.serialize_some(&super::format(ts)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .map_err(|e| D::Error::custom(format!("invalid timestamp '{}': {}", raw, e))),
                None => Ok(None),
            }
        }
    }
}
