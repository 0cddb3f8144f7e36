use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::notify::EmergencyContact;
use crate::snapshot::UserId;

/// Source of a user's crisis/emergency contacts.
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn crisis_contacts(&self, user: &UserId) -> Result<Vec<EmergencyContact>>;
}

#[derive(Debug, Default)]
pub struct InMemoryContactDirectory {
    inner: RwLock<HashMap<UserId, Vec<EmergencyContact>>>,
}

impl InMemoryContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, user: UserId, contacts: Vec<EmergencyContact>) {
        let mut g = match self.inner.write() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        g.insert(user, contacts);
    }
}

#[async_trait]
impl ContactDirectory for InMemoryContactDirectory {
    async fn crisis_contacts(&self, user: &UserId) -> Result<Vec<EmergencyContact>> {
        let g = match self.inner.read() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        Ok(g.get(user).cloned().unwrap_or_default())
    }
}
