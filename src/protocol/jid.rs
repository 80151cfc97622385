//! Participant identifiers and phone number normalization
//!
//! The transport addresses every chat participant by a canonical identifier
//! (`user@server`, optionally `user:device@server`). Individual chats live on
//! the default user server, so a phone number maps to one by stripping the
//! formatting characters and appending [`DEFAULT_USER_SERVER`].

use crate::error::BridgeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Server suffix for individual (non-group) chat participants
pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";

/// Characters stripped from phone numbers before building an identifier
const PHONE_FORMATTING_CHARS: [char; 3] = ['+', '-', ' '];

/// Canonical participant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    /// User part, for individual chats the phone number digits
    pub user: String,
    /// Device index when the identifier addresses a single linked device
    pub device: Option<u16>,
    /// Server / domain part
    pub server: String,
}

impl Jid {
    /// Create an identifier on the given server
    pub fn new(user: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            device: None,
            server: server.into(),
        }
    }

    /// Create an identifier on the default user server
    pub fn user(user: impl Into<String>) -> Self {
        Self::new(user, DEFAULT_USER_SERVER)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device {
            Some(device) => write!(f, "{}:{}@{}", self.user, device, self.server),
            None => write!(f, "{}@{}", self.user, self.server),
        }
    }
}

impl FromStr for Jid {
    type Err = std::convert::Infallible;

    /// Parse without validation; values come from the transport itself
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (user_part, server) = match s.split_once('@') {
            Some((user_part, server)) => (user_part, server),
            None => (s, DEFAULT_USER_SERVER),
        };

        let (user, device) = match user_part.split_once(':') {
            Some((user, device)) => match device.parse::<u16>() {
                Ok(device) => (user, Some(device)),
                Err(_) => (user_part, None),
            },
            None => (user_part, None),
        };

        Ok(Jid {
            user: user.to_string(),
            device,
            server: server.to_string(),
        })
    }
}

impl Serialize for Jid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Jid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.parse::<Jid>() {
            Ok(jid) => Ok(jid),
            Err(never) => match never {},
        }
    }
}

/// Converts between human phone numbers and canonical identifiers
pub struct IdentifierNormalizer;

impl IdentifierNormalizer {
    /// Strip formatting characters, keeping every other character in order
    pub fn clean_phone(phone: &str) -> String {
        phone
            .chars()
            .filter(|c| !PHONE_FORMATTING_CHARS.contains(c))
            .collect()
    }

    /// Build the canonical identifier for a phone number
    ///
    /// Fails with [`BridgeError::InvalidPhoneNumber`] when nothing is left
    /// after stripping `+`, `-` and spaces.
    pub fn to_canonical_identifier(phone: &str) -> Result<Jid, BridgeError> {
        let clean = Self::clean_phone(phone);
        if clean.is_empty() {
            return Err(BridgeError::invalid_phone(phone));
        }
        Ok(Jid::user(clean))
    }

    /// Extract the user part (the phone number for individual chats)
    pub fn from_canonical_identifier(jid: &Jid) -> &str {
        &jid.user
    }
}
