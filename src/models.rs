use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::IntErrorKind;

// ============================================================================
// Event Model
// ============================================================================
//
// The order record travels as a JSON payload keyed by its order id. Anything
// the pipeline needs to know about a delivery (how many attempts it has had,
// why it was dead-lettered) rides alongside as message headers so that the
// payload schema never changes between channels.
//
// ============================================================================

/// Header carrying the number of processing attempts already made
pub const RETRY_COUNT_HEADER: &str = "retry_count";

/// Header carrying the last processing error on dead-lettered messages
pub const FAILURE_REASON_HEADER: &str = "failure_reason";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub product: String,
    pub price: f64,
}

impl Order {
    pub fn new(order_id: impl Into<String>, product: impl Into<String>, price: f64) -> Self {
        Self {
            order_id: order_id.into(),
            product: product.into(),
            price,
        }
    }

    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

// ============================================================================
// Message Metadata
// ============================================================================

/// Out-of-band key/value metadata attached to a broker message
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageMetadata {
    entries: BTreeMap<String, String>,
}

impl MessageMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Attempt count carried by this message. Missing or malformed values
    /// count as a first delivery; a count too large for `u32` saturates.
    pub fn retry_count(&self) -> u32 {
        let Some(raw) = self.get(RETRY_COUNT_HEADER) else {
            return 0;
        };

        match raw.trim().parse::<u32>() {
            Ok(count) => count,
            Err(e) if *e.kind() == IntErrorKind::PosOverflow => {
                tracing::warn!(value = %raw, "retry_count header overflows, treating budget as exhausted");
                u32::MAX
            }
            Err(_) => {
                tracing::warn!(value = %raw, "Ignoring malformed retry_count header");
                0
            }
        }
    }

    pub fn with_retry_count(mut self, attempts: u32) -> Self {
        self.insert(RETRY_COUNT_HEADER, attempts.to_string());
        self
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.get(FAILURE_REASON_HEADER)
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.insert(FAILURE_REASON_HEADER, reason);
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MessageMetadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut metadata = Self::new();
        for (key, value) in iter {
            metadata.insert(key, value);
        }
        metadata
    }
}
