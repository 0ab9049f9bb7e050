//! Command and publish-result value types
//!
//! A [`Command`] is built from the topic of an inbound message on the command
//! subscription; the payload is attached right after parsing. A [`SendResult`]
//! is what every outbound publish returns, successful or not.

use bytes::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Key/value metadata carried in the `?k=v&...` suffix of a command topic
pub type PropertyBag = BTreeMap<String, String>;

/// One inbound directive addressed to this device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    /// Command name; `None` only when the topic did not match the grammar
    pub command_name: Option<String>,
    /// Correlation id; present iff the command expects a response
    pub request_id: Option<String>,
    /// Property bag entries, duplicate keys resolved last-write-wins
    pub property_bag: PropertyBag,
    /// Raw message body
    pub payload: Bytes,
    /// Status code of the response sent for this command, if any
    pub status: Option<String>,
}

impl Command {
    /// Whether the backend expects a correlated response
    pub fn is_request_response(&self) -> bool {
        self.request_id.is_some()
    }

    /// Command name, or the empty string for malformed topics
    pub fn name(&self) -> &str {
        self.command_name.as_deref().unwrap_or_default()
    }

    /// Look up a single property bag entry
    pub fn property(&self, key: &str) -> Option<&str> {
        self.property_bag.get(key).map(String::as_str)
    }

    /// Attach the message body after topic parsing
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }
}

/// MQTT v5 reason codes surfaced through [`SendResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PublishReason {
    Success,
    NoMatchingSubscribers,
    UnspecifiedError,
    ImplementationSpecificError,
    NotAuthorized,
    TopicNameInvalid,
    QuotaExceeded,
    PayloadFormatInvalid,
}

impl PublishReason {
    pub fn code(self) -> i32 {
        match self {
            PublishReason::Success => 0x00,
            PublishReason::NoMatchingSubscribers => 0x10,
            PublishReason::UnspecifiedError => 0x80,
            PublishReason::ImplementationSpecificError => 0x83,
            PublishReason::NotAuthorized => 0x87,
            PublishReason::TopicNameInvalid => 0x90,
            PublishReason::QuotaExceeded => 0x97,
            PublishReason::PayloadFormatInvalid => 0x99,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PublishReason::Success => "Success",
            PublishReason::NoMatchingSubscribers => "NoMatchingSubscribers",
            PublishReason::UnspecifiedError => "UnspecifiedError",
            PublishReason::ImplementationSpecificError => "ImplementationSpecificError",
            PublishReason::NotAuthorized => "NotAuthorized",
            PublishReason::TopicNameInvalid => "TopicNameInvalid",
            PublishReason::QuotaExceeded => "QuotaExceeded",
            PublishReason::PayloadFormatInvalid => "PayloadFormatInvalid",
        }
    }
}

impl fmt::Display for PublishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a telemetry, event or command-response publish.
///
/// A success code reports local acceptance by the MQTT client, not broker
/// acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendResult {
    pub result_code: i32,
    pub result_code_text: String,
    pub result_message: String,
}

impl SendResult {
    pub fn new(
        result_code: i32,
        result_code_text: impl Into<String>,
        result_message: impl Into<String>,
    ) -> Self {
        Self {
            result_code,
            result_code_text: result_code_text.into(),
            result_message: result_message.into(),
        }
    }

    pub fn from_reason(reason: PublishReason, message: impl Into<String>) -> Self {
        Self::new(reason.code(), reason.as_str(), message)
    }

    pub fn success() -> Self {
        Self::from_reason(PublishReason::Success, "")
    }

    pub fn is_success(&self) -> bool {
        self.result_code == 0
    }
}
