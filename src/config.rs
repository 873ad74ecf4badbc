//! Client configuration

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// What to do when a conversation outlives its validity window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryPolicy {
    /// Report expiry to the watcher and keep waiting for the counterparty
    #[default]
    Warn,
    /// Fail the ceremony with [`Error::Expired`](crate::Error::Expired)
    Abort,
}

/// Configuration of [`CeremonyClient`](crate::CeremonyClient)
///
/// Can be deserialized from JSON (camelCase keys, durations in milliseconds); missing fields take
/// default values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Base URL of relay and token endpoint. Must end with `/`
    pub relay_url: Option<String>,
    /// Validity window written into every conversation record
    #[serde(rename = "conversationExpiryMs", deserialize_with = "millis")]
    pub conversation_expiry: Duration,
    /// Token is refreshed when it's going to expire within this margin
    #[serde(rename = "tokenRefreshMarginMs", deserialize_with = "millis")]
    pub token_refresh_margin: Duration,
    pub expiry_policy: ExpiryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: None,
            conversation_expiry: Duration::from_secs(30),
            token_refresh_margin: Duration::from_secs(60),
            expiry_policy: ExpiryPolicy::Warn,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn set_relay_url(self, relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: Some(relay_url.into()),
            ..self
        }
    }

    pub fn set_conversation_expiry(self, conversation_expiry: Duration) -> Self {
        Self {
            conversation_expiry,
            ..self
        }
    }

    pub fn set_token_refresh_margin(self, token_refresh_margin: Duration) -> Self {
        Self {
            token_refresh_margin,
            ..self
        }
    }

    pub fn set_expiry_policy(self, expiry_policy: ExpiryPolicy) -> Self {
        Self {
            expiry_policy,
            ..self
        }
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}
