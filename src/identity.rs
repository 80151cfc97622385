//! Sender identity resolution
//!
//! Turns a sender phone into the [`UserContext`] handed to workflows. The
//! placeholder resolver accepts everyone with a fixed identity; the directory
//! resolver only admits active registered users.

use crate::error::BridgeError;
use crate::protocol::UserContext;
use crate::store::UserDirectory;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

pub const PLACEHOLDER_NAME: &str = "Dummy";
pub const PLACEHOLDER_EMAIL: &str = "dummy@email.com";

/// Outcome of resolving a sender
#[derive(Debug, Clone, PartialEq)]
pub enum IdentityResolution {
    Resolved(UserContext),
    /// Unknown or inactive sender; `notify` asks for an unregistered notice
    Ineligible { notify: bool },
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, phone: &str) -> Result<IdentityResolution, BridgeError>;
}

/// Everyone is "Dummy" with a fresh id per message
pub struct PlaceholderIdentityResolver;

#[async_trait]
impl IdentityResolver for PlaceholderIdentityResolver {
    async fn resolve(&self, phone: &str) -> Result<IdentityResolution, BridgeError> {
        Ok(IdentityResolution::Resolved(UserContext {
            user_id: Uuid::new_v4(),
            name: PLACEHOLDER_NAME.to_string(),
            phone: phone.to_string(),
            email: PLACEHOLDER_EMAIL.to_string(),
        }))
    }
}

/// Eligibility-checked lookup against the user directory
pub struct DirectoryIdentityResolver {
    directory: Arc<dyn UserDirectory>,
    notify_unregistered: bool,
}

impl DirectoryIdentityResolver {
    pub fn new(directory: Arc<dyn UserDirectory>, notify_unregistered: bool) -> Self {
        Self {
            directory,
            notify_unregistered,
        }
    }
}

#[async_trait]
impl IdentityResolver for DirectoryIdentityResolver {
    async fn resolve(&self, phone: &str) -> Result<IdentityResolution, BridgeError> {
        let user = self
            .directory
            .find_by_phone(phone)
            .await
            .map_err(|e| BridgeError::identity(e.to_string()))?;

        Ok(match user {
            Some(user) if user.is_active => {
                let mut context = UserContext::from(&user);
                // Workflows key sessions on the phone as the transport reports it
                context.phone = phone.to_string();
                IdentityResolution::Resolved(context)
            }
            _ => IdentityResolution::Ineligible {
                notify: self.notify_unregistered,
            },
        })
    }
}
