//! The account linking state machine.
//!
//! Linking an institution walks Agreement -> Requisition -> user
//! authorization -> linked accounts. This module owns the first two steps
//! and the idempotency rules around repeat attempts; account discovery
//! happens later, driven by the sync pipeline.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::models::{Agreement, Id, LinkStatus, Requisition};
use crate::provider::BankProvider;
use crate::storage::Storage;

/// Consent defaults applied when an institution does not advertise its own
/// limits.
const DEFAULT_HISTORICAL_DAYS: u32 = 90;
const DEFAULT_ACCESS_VALID_DAYS: u32 = 90;

/// Result of a linking attempt.
#[derive(Debug, Clone)]
pub struct LinkOutcome {
    /// URL the user must visit to authorize (or re-visit, for a pending
    /// attempt).
    pub authorization_link: Option<String>,
    pub status: LinkStatus,
    /// True when an existing requisition satisfied the request and nothing
    /// new was created.
    pub is_already_linked: bool,
    pub requisition_id: Id,
}

impl LinkOutcome {
    fn existing(requisition: &Requisition) -> Self {
        Self {
            authorization_link: requisition.authorization_link.clone(),
            status: requisition.status,
            is_already_linked: true,
            requisition_id: requisition.id.clone(),
        }
    }

    fn created(requisition: &Requisition) -> Self {
        Self {
            authorization_link: requisition.authorization_link.clone(),
            status: requisition.status,
            is_already_linked: false,
            requisition_id: requisition.id.clone(),
        }
    }
}

pub struct LinkingService {
    storage: Arc<dyn Storage>,
    provider: Arc<dyn BankProvider>,
    redirect_url: String,
    clock: Arc<dyn Clock>,
}

impl LinkingService {
    pub fn new(
        storage: Arc<dyn Storage>,
        provider: Arc<dyn BankProvider>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            provider,
            redirect_url: redirect_url.into(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Link an institution for a user, or return the attempt already in
    /// flight.
    ///
    /// Repeat calls never create duplicate agreements or requisitions: a
    /// linked requisition with accounts, or a pending one, short-circuits.
    /// Pending requisitions are refreshed from the provider first, so a
    /// user who just finished authorizing sees `Linked` here without
    /// waiting for a sync.
    pub async fn link_institution(&self, user_id: Uuid, institution_id: &Id) -> Result<LinkOutcome> {
        let existing = self
            .storage
            .requisitions_for_institution(institution_id, user_id)
            .await
            .context("Failed to list requisitions")?;

        for requisition in &existing {
            if requisition.is_linked_with_accounts() {
                debug!(
                    requisition_id = %requisition.id,
                    institution_id = %institution_id,
                    "institution already linked"
                );
                return Ok(LinkOutcome::existing(requisition));
            }

            if requisition.status == LinkStatus::Pending {
                let refreshed = self.refresh_pending(requisition, user_id).await?;
                if !refreshed.status.is_terminal() || refreshed.is_linked_with_accounts() {
                    return Ok(LinkOutcome::existing(&refreshed));
                }
                // Failed or expired while we weren't looking; fall through
                // and start over.
            }
        }

        self.create_link(user_id, institution_id, &existing).await
    }

    pub async fn get_requisition(&self, id: &Id) -> Result<Option<Requisition>> {
        self.storage.get_requisition(id).await
    }

    /// Pull the provider's current view of a pending requisition and
    /// persist it if anything moved.
    async fn refresh_pending(
        &self,
        stored: &Requisition,
        user_id: Uuid,
    ) -> Result<Requisition> {
        let Some(remote) = self
            .provider
            .requisition(&stored.id, user_id)
            .await
            .context("Failed to refresh requisition")?
        else {
            // Gone on the provider side; treat as expired so a new attempt
            // can start.
            let mut expired = stored.clone();
            expired.status = LinkStatus::Expired;
            self.storage.save_requisition(&expired).await?;
            return Ok(expired);
        };

        if remote.status != stored.status || remote.accounts != stored.accounts {
            info!(
                requisition_id = %remote.id,
                status = ?remote.status,
                accounts = remote.accounts.len(),
                "requisition status changed"
            );
            self.storage.save_requisition(&remote).await?;
        }
        Ok(remote)
    }

    async fn create_link(
        &self,
        user_id: Uuid,
        institution_id: &Id,
        existing_requisitions: &[Requisition],
    ) -> Result<LinkOutcome> {
        let institution = self
            .provider
            .institution(institution_id)
            .await
            .with_context(|| format!("Failed to fetch institution {institution_id}"))?;

        let max_historical_days = institution
            .transaction_total_days
            .unwrap_or(DEFAULT_HISTORICAL_DAYS);
        let access_valid_for_days = institution
            .max_access_valid_for_days
            .unwrap_or(DEFAULT_ACCESS_VALID_DAYS);

        let agreement = match self
            .reusable_agreement(user_id, institution_id, existing_requisitions)
            .await?
        {
            Some(agreement) => {
                info!(agreement_id = %agreement.id, "reusing unreferenced agreement");
                agreement
            }
            None => {
                let agreement = self
                    .provider
                    .create_agreement(
                        user_id,
                        institution_id,
                        max_historical_days,
                        access_valid_for_days,
                    )
                    .await
                    .context("Failed to create agreement")?;
                self.storage
                    .save_agreement(&agreement)
                    .await
                    .context("Failed to persist agreement")?;
                agreement
            }
        };

        let redirect = format!("{}?institutionId={institution_id}", self.redirect_url);
        let reference = Uuid::new_v4().to_string();

        let requisition = self
            .provider
            .create_requisition(user_id, institution_id, &agreement.id, &redirect, &reference)
            .await
            .context("Failed to create requisition")?;
        self.storage
            .save_requisition(&requisition)
            .await
            .context("Failed to persist requisition")?;

        info!(
            requisition_id = %requisition.id,
            institution_id = %institution_id,
            "created new link attempt"
        );
        Ok(LinkOutcome::created(&requisition))
    }

    /// The newest stored agreement for this (user, institution) that no
    /// requisition references and whose validity window is still open.
    async fn reusable_agreement(
        &self,
        user_id: Uuid,
        institution_id: &Id,
        requisitions: &[Requisition],
    ) -> Result<Option<Agreement>> {
        let agreements = self
            .storage
            .agreements_for_institution(institution_id, user_id)
            .await
            .context("Failed to list agreements")?;

        let now = self.clock.now();
        Ok(agreements.into_iter().find(|agreement| {
            !agreement.is_expired(now)
                && !requisitions.iter().any(|r| r.agreement_id == agreement.id)
        }))
    }
}
