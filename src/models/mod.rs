//! Wire models for the BitX streaming and REST APIs.
//!
//! Numeric fields arrive as strings to preserve precision. Decimals are
//! handled by `rust_decimal`'s serde support; sequence numbers go through
//! [`sequence`] below.

pub mod book;
pub mod update;

use serde::{Deserialize, Deserializer, Serialize};
use zeroize::Zeroizing;

/// Credential envelope sent once as the first frame of a stream connection.
#[derive(Serialize)]
pub struct CredentialsMessage<'a> {
    pub api_key_id: &'a str,
    pub api_key_secret: &'a str,
}

/// API key pair. The secret is wiped from memory on drop.
#[derive(Clone)]
pub struct Credentials {
    pub api_key_id: String,
    pub api_key_secret: Zeroizing<String>,
}

impl Credentials {
    pub fn new(api_key_id: impl Into<String>, api_key_secret: impl Into<String>) -> Self {
        Self {
            api_key_id: api_key_id.into(),
            api_key_secret: Zeroizing::new(api_key_secret.into()),
        }
    }

    /// Builds the handshake envelope borrowing these credentials.
    pub fn message(&self) -> CredentialsMessage<'_> {
        CredentialsMessage {
            api_key_id: &self.api_key_id,
            api_key_secret: self.api_key_secret.as_str(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key_id", &self.api_key_id)
            .field("api_key_secret", &"<redacted>")
            .finish()
    }
}

/// Error envelope returned by the REST API alongside (or instead of) data.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
}

/// Deserializes a JSON `null` as an empty vector.
pub(crate) fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// String-encoded `int64` sequence numbers.
///
/// Accepts both `"123"` and `123` on input and always writes a string.
pub(crate) mod sequence {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        deserializer.deserialize_any(SequenceVisitor)
    }

    struct SequenceVisitor;

    impl Visitor<'_> for SequenceVisitor {
        type Value = i64;

        fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("a string-encoded int64 sequence number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
            v.trim().parse().map_err(E::custom)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(E::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        #[serde(with = "crate::models::sequence")]
        seq: i64,
    }

    #[test]
    fn sequence_accepts_string_and_number() {
        let a: Wrapper = serde_json::from_str(r#"{"seq":"24352"}"#).unwrap();
        let b: Wrapper = serde_json::from_str(r#"{"seq":24352}"#).unwrap();
        assert_eq!(a.seq, 24352);
        assert_eq!(b.seq, 24352);
    }

    #[test]
    fn sequence_rejects_garbage() {
        assert!(serde_json::from_str::<Wrapper>(r#"{"seq":"abc"}"#).is_err());
    }

    #[test]
    fn credentials_message_serializes() {
        let creds = Credentials::new("key-id", "key-secret");
        let value = serde_json::to_value(creds.message()).unwrap();
        assert_eq!(value["api_key_id"], "key-id");
        assert_eq!(value["api_key_secret"], "key-secret");
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let creds = Credentials::new("key-id", "key-secret");
        let debug = format!("{creds:?}");
        assert!(debug.contains("key-id"));
        assert!(!debug.contains("key-secret"));
    }
}
