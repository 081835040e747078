//! User records keyed by identity-provider subject.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::models::User;
use crate::storage::Storage;

pub struct UserService {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
}

impl UserService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Find the user for an identity-provider subject, creating them on
    /// first contact.
    pub async fn ensure_user(&self, subject: &str, display_name: Option<&str>) -> Result<User> {
        if let Some(user) = self
            .storage
            .get_user_by_subject(subject)
            .await
            .context("Failed to look up user")?
        {
            return Ok(user);
        }

        let user = User::new(
            subject,
            display_name.unwrap_or(subject),
            self.clock.now(),
        );
        self.storage
            .save_user(&user)
            .await
            .context("Failed to save user")?;
        info!(user_id = %user.id, "created user");
        Ok(user)
    }

    pub async fn complete_onboarding(&self, user_id: Uuid) -> Result<User> {
        let Some(mut user) = self.storage.get_user(user_id).await? else {
            bail!("user {user_id} not found");
        };
        if !user.onboarded {
            user.onboarded = true;
            self.storage.save_user(&user).await?;
        }
        Ok(user)
    }
}
