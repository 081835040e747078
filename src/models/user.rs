use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An end user of the system, created on first authenticated contact.
///
/// `subject` is the external identity provider's stable subject claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub subject: String,
    pub display_name: String,
    #[serde(default)]
    pub onboarded: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        subject: impl Into<String>,
        display_name: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            display_name: display_name.into(),
            onboarded: false,
            created_at,
        }
    }
}
