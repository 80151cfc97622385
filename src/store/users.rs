//! Registered user directory

use super::StoreError;
use crate::protocol::{IdentifierNormalizer, User};
use async_trait::async_trait;
use std::collections::HashMap;

/// Lookup of registered users by phone number
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError>;

    /// A phone is eligible when it belongs to an active user
    async fn is_eligible(&self, phone: &str) -> Result<bool, StoreError> {
        Ok(self
            .find_by_phone(phone)
            .await?
            .is_some_and(|user| user.is_active))
    }
}

/// Directory loaded once from configuration
///
/// Phones are compared after stripping formatting, so `+62 812-3456` and
/// `628123456` are the same user.
pub struct InMemoryUserDirectory {
    by_phone: HashMap<String, User>,
}

impl InMemoryUserDirectory {
    pub fn new(users: impl IntoIterator<Item = User>) -> Self {
        let by_phone = users
            .into_iter()
            .map(|user| (IdentifierNormalizer::clean_phone(&user.phone), user))
            .collect();
        Self { by_phone }
    }

    pub fn len(&self) -> usize {
        self.by_phone.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_phone.is_empty()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError> {
        let key = IdentifierNormalizer::clean_phone(phone);
        Ok(self.by_phone.get(&key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn user(phone: &str, is_active: bool) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Sari".to_string(),
            phone: phone.to_string(),
            email: "sari@example.com".to_string(),
            is_active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_lookup_ignores_formatting() {
        let directory = InMemoryUserDirectory::new([user("+62 812-3456", true)]);

        let found = directory.find_by_phone("628123456").await.unwrap();
        assert_eq!(found.unwrap().name, "Sari");
        assert!(directory.is_eligible("62 812 3456").await.unwrap());
    }

    #[tokio::test]
    async fn test_inactive_and_unknown_users_are_ineligible() {
        let directory = InMemoryUserDirectory::new([user("628111", false)]);

        assert!(!directory.is_eligible("628111").await.unwrap());
        assert!(!directory.is_eligible("628999").await.unwrap());
        assert_eq!(directory.len(), 1);
        assert!(!directory.is_empty());
    }
}
