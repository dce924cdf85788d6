//! Principal identity and the authentication collaborators.
//!
//! Token issuance lives outside this crate. The relay only needs to turn a
//! bearer token into a [`Principal`] and to look principals up by id or
//! username.

use crate::config::{ConfigError, PrincipalEntry};
use crate::error::LinkError;
use async_trait::async_trait;
use link_types::PrincipalId;
use serde::Serialize;
use std::collections::HashMap;

/// An authenticated actor: a user or a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    /// Principal id.
    pub id: PrincipalId,
    /// Unique username.
    pub username: String,
    /// Whether the principal is a device.
    pub is_device: bool,
}

impl Principal {
    /// Create a user principal.
    pub fn user(id: u64, username: impl Into<String>) -> Self {
        Self {
            id: PrincipalId::new(id),
            username: username.into(),
            is_device: false,
        }
    }

    /// Create a device principal.
    pub fn device(id: u64, username: impl Into<String>) -> Self {
        Self {
            id: PrincipalId::new(id),
            username: username.into(),
            is_device: true,
        }
    }
}

/// Resolves bearer credentials to principals.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve `token`, failing with [`LinkError::Unauthorized`].
    async fn authenticate(&self, token: &str) -> Result<Principal, LinkError>;
}

/// Looks up known principals.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    /// Principal with this id.
    async fn lookup(&self, id: PrincipalId) -> Result<Option<Principal>, LinkError>;

    /// Principal with this username.
    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, LinkError>;
}

/// Fixed set of principals loaded from `[[principals]]` config entries.
#[derive(Debug, Default)]
pub struct StaticAuthenticator {
    principals: HashMap<PrincipalId, Principal>,
    tokens: HashMap<String, PrincipalId>,
    usernames: HashMap<String, PrincipalId>,
}

impl StaticAuthenticator {
    /// Build from config entries.
    ///
    /// # Errors
    ///
    /// Fails if an id, username or token appears twice.
    pub fn from_entries(entries: &[PrincipalEntry]) -> Result<Self, ConfigError> {
        let mut auth = Self::default();
        for entry in entries {
            let principal = Principal {
                id: entry.id,
                username: entry.username.clone(),
                is_device: entry.is_device,
            };
            auth.insert(principal, &entry.token)?;
        }
        Ok(auth)
    }

    /// Add one principal with its token.
    pub fn insert(&mut self, principal: Principal, token: &str) -> Result<(), ConfigError> {
        if self.principals.contains_key(&principal.id) {
            return Err(ConfigError::Invalid(format!(
                "duplicate principal id {}",
                principal.id
            )));
        }
        if self.usernames.contains_key(&principal.username) {
            return Err(ConfigError::Invalid(format!(
                "duplicate username {:?}",
                principal.username
            )));
        }
        if self.tokens.contains_key(token) {
            return Err(ConfigError::Invalid(format!(
                "duplicate token for principal {}",
                principal.id
            )));
        }

        self.tokens.insert(token.to_string(), principal.id);
        self.usernames.insert(principal.username.clone(), principal.id);
        self.principals.insert(principal.id, principal);
        Ok(())
    }

    /// Number of known principals.
    pub fn len(&self) -> usize {
        self.principals.len()
    }

    /// Whether no principals are configured.
    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Principal, LinkError> {
        self.tokens
            .get(token)
            .and_then(|id| self.principals.get(id))
            .cloned()
            .ok_or(LinkError::Unauthorized)
    }
}

#[async_trait]
impl PrincipalDirectory for StaticAuthenticator {
    async fn lookup(&self, id: PrincipalId) -> Result<Option<Principal>, LinkError> {
        Ok(self.principals.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Principal>, LinkError> {
        Ok(self
            .usernames
            .get(username)
            .and_then(|id| self.principals.get(id))
            .cloned())
    }
}
