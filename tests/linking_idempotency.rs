mod support;

use std::sync::Arc;

use anyhow::Result;
use ledgerlink::linking::LinkingService;
use ledgerlink::models::{Id, LinkStatus};
use ledgerlink::storage::{MemoryStorage, Storage};
use uuid::Uuid;

use support::{institution, StubProvider};

const REDIRECT: &str = "https://app.example/callback";

fn service(
    storage: &Arc<MemoryStorage>,
    provider: &Arc<StubProvider>,
) -> LinkingService {
    LinkingService::new(
        Arc::clone(storage) as Arc<dyn Storage>,
        Arc::clone(provider) as Arc<dyn ledgerlink::provider::BankProvider>,
        REDIRECT,
    )
}

#[tokio::test]
async fn repeat_link_reuses_the_pending_requisition() -> Result<()> {
    let storage = Arc::new(MemoryStorage::new());
    let provider = Arc::new(StubProvider::new(vec![institution("BANK_A")]));
    let linking = service(&storage, &provider);
    let user_id = Uuid::new_v4();

    let first = linking.link_institution(user_id, &Id::from("BANK_A")).await?;
    assert!(!first.is_already_linked);
    assert_eq!(first.status, LinkStatus::Pending);
    let link = first.authorization_link.clone().expect("authorization link");

    let second = linking.link_institution(user_id, &Id::from("BANK_A")).await?;
    assert!(second.is_already_linked);
    assert_eq!(second.requisition_id, first.requisition_id);
    assert_eq!(second.authorization_link.as_deref(), Some(link.as_str()));

    let state = provider.state.lock().unwrap();
    assert_eq!(state.agreements_created, 1);
    assert_eq!(state.requisitions_created, 1);
    Ok(())
}

#[tokio::test]
async fn pending_requisition_is_refreshed_before_short_circuiting() -> Result<()> {
    let storage = Arc::new(MemoryStorage::new());
    let provider = Arc::new(StubProvider::new(vec![institution("BANK_A")]));
    let linking = service(&storage, &provider);
    let user_id = Uuid::new_v4();

    let first = linking.link_institution(user_id, &Id::from("BANK_A")).await?;

    // The user completes authorization out of band.
    provider.set_linked(&first.requisition_id, &["acct-1", "acct-2"]);

    let second = linking.link_institution(user_id, &Id::from("BANK_A")).await?;
    assert!(second.is_already_linked);
    assert_eq!(second.status, LinkStatus::Linked);

    // The refreshed status was persisted.
    let stored = storage
        .get_requisition(&first.requisition_id)
        .await?
        .expect("requisition stored");
    assert_eq!(stored.status, LinkStatus::Linked);
    assert_eq!(stored.accounts.len(), 2);
    Ok(())
}

#[tokio::test]
async fn agreement_is_created_before_the_requisition() -> Result<()> {
    let storage = Arc::new(MemoryStorage::new());
    let provider = Arc::new(StubProvider::new(vec![institution("BANK_A")]));
    let linking = service(&storage, &provider);
    let user_id = Uuid::new_v4();

    let outcome = linking.link_institution(user_id, &Id::from("BANK_A")).await?;

    let requisition = storage
        .get_requisition(&outcome.requisition_id)
        .await?
        .expect("requisition stored");
    let agreement = storage
        .get_agreement(&requisition.agreement_id)
        .await?
        .expect("agreement stored");
    assert_eq!(agreement.institution_id, Id::from("BANK_A"));
    // Limits come from the institution's advertised capabilities.
    assert_eq!(agreement.max_historical_days, 180);
    assert_eq!(agreement.access_valid_for_days, 90);
    assert!(requisition
        .redirect
        .as_deref()
        .unwrap()
        .starts_with(REDIRECT));
    Ok(())
}

#[tokio::test]
async fn new_attempt_starts_after_a_failed_link() -> Result<()> {
    let storage = Arc::new(MemoryStorage::new());
    let provider = Arc::new(StubProvider::new(vec![institution("BANK_A")]));
    let linking = service(&storage, &provider);
    let user_id = Uuid::new_v4();

    let first = linking.link_institution(user_id, &Id::from("BANK_A")).await?;

    // The provider rejects the attempt.
    {
        let mut state = provider.state.lock().unwrap();
        state
            .requisitions
            .get_mut(&first.requisition_id)
            .unwrap()
            .status = LinkStatus::Failed;
    }

    let second = linking.link_institution(user_id, &Id::from("BANK_A")).await?;
    assert!(!second.is_already_linked);
    assert_ne!(second.requisition_id, first.requisition_id);
    Ok(())
}
