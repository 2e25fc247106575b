use crate::models::{normalize_username, User};
use crate::search_index::SearchIndex;
use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Error, Debug)]
pub enum SignupError {
    #[error("Empty password or username")]
    EmptyCredentials,

    #[error("User {0} already exists")]
    AlreadyExists(String),

    #[error("Credential store failure: {0:#}")]
    Backend(anyhow::Error),
}

/// Username/password records kept in the credential projection of the
/// search index. Every username is lower-cased before it is used.
#[derive(Clone)]
pub struct CredentialStore {
    index: Arc<dyn SearchIndex>,
}

impl CredentialStore {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }

    pub async fn find_user(&self, username: &str) -> Result<Option<User>> {
        self.index
            .find_user_by_name(&normalize_username(username))
            .await
    }

    /// Not atomic with a following [`insert_user`](Self::insert_user)
    pub async fn user_exists(&self, username: &str) -> Result<bool> {
        Ok(self.find_user(username).await?.is_some())
    }

    /// Write the record keyed by username. Callers check existence first.
    pub async fn insert_user(&self, user: &User) -> Result<()> {
        let user = User {
            username: normalize_username(&user.username),
            ..user.clone()
        };
        self.index.index_user(&user).await
    }

    /// Validate, check for an existing record, then insert.
    ///
    /// Two concurrent signups for the same name can both pass the existence
    /// check; the later write then replaces the earlier record.
    #[instrument(skip(self, user), fields(username = %user.username))]
    pub async fn signup(&self, user: User) -> Result<User, SignupError> {
        let user = User {
            username: normalize_username(&user.username),
            ..user
        };

        if user.username.is_empty() || user.password.is_empty() {
            warn!("Empty password or username");
            return Err(SignupError::EmptyCredentials);
        }

        if self
            .user_exists(&user.username)
            .await
            .map_err(SignupError::Backend)?
        {
            warn!("User already exists, cannot create duplicate users");
            return Err(SignupError::AlreadyExists(user.username));
        }

        self.insert_user(&user)
            .await
            .map_err(SignupError::Backend)?;

        info!("User added successfully");
        Ok(user)
    }
}
