mod support;

use std::sync::Arc;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use ledgerlink::models::{Account, AccountStatus, Id, LinkStatus, Requisition};
use ledgerlink::storage::{JsonFileStorage, MemoryStorage, Storage};
use rust_decimal::Decimal;
use tempfile::TempDir;
use uuid::Uuid;

use support::{snapshot, transaction};

fn account(id: &str, user_id: Uuid) -> Account {
    Account {
        id: Id::from(id),
        user_id,
        institution_id: Id::from("BANK_A"),
        requisition_id: Id::from("req-1"),
        currency: Some("EUR".to_string()),
        name: Some("Current".to_string()),
        display_name: None,
        category: None,
        status: AccountStatus::Pending,
        last_synced: None,
        created_at: Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap(),
    }
}

async fn upsert_is_keyed_on_external_id(storage: Arc<dyn Storage>) -> Result<()> {
    let account_id = Id::from("acct-1");
    let first = vec![
        transaction("acct-1", "tx-1", 1, -10),
        transaction("acct-1", "tx-2", 2, 50),
    ];
    let outcome = storage.upsert_transactions(&account_id, &first).await?;
    assert_eq!(outcome.inserted, 2);
    assert_eq!(outcome.existing, 0);

    // Redelivery: one known row, one new one.
    let second = vec![
        transaction("acct-1", "tx-2", 2, 50),
        transaction("acct-1", "tx-3", 3, 7),
    ];
    let outcome = storage.upsert_transactions(&account_id, &second).await?;
    assert_eq!(outcome.inserted, 1);
    assert_eq!(outcome.existing, 1);

    assert_eq!(storage.get_transactions(&account_id).await?.len(), 3);
    Ok(())
}

async fn account_upsert_preserves_user_edits(storage: Arc<dyn Storage>) -> Result<()> {
    let user_id = Uuid::new_v4();
    let mut edited = account("acct-1", user_id);
    edited.display_name = Some("Household".to_string());
    edited.category = Some("daily spending".to_string());
    storage.upsert_account(&edited).await?;

    // A later sync re-upserts provider data without the user's edits.
    let mut synced = account("acct-1", user_id);
    synced.name = Some("Current Account".to_string());
    synced.status = AccountStatus::Linked;
    storage.upsert_account(&synced).await?;

    let stored = storage.get_account(&Id::from("acct-1")).await?.unwrap();
    assert_eq!(stored.display_name.as_deref(), Some("Household"));
    assert_eq!(stored.category.as_deref(), Some("daily spending"));
    assert_eq!(stored.name.as_deref(), Some("Current Account"));
    assert_eq!(stored.status, AccountStatus::Linked);
    Ok(())
}

async fn balances_are_append_only(storage: Arc<dyn Storage>) -> Result<()> {
    let account_id = Id::from("acct-1");
    storage.append_balances(&account_id, &[snapshot(100)]).await?;
    storage.append_balances(&account_id, &[snapshot(120)]).await?;

    assert_eq!(storage.get_balances(&account_id).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn memory_upsert_is_keyed_on_external_id() -> Result<()> {
    upsert_is_keyed_on_external_id(Arc::new(MemoryStorage::new())).await
}

#[tokio::test]
async fn json_upsert_is_keyed_on_external_id() -> Result<()> {
    let dir = TempDir::new()?;
    upsert_is_keyed_on_external_id(Arc::new(JsonFileStorage::new(dir.path()))).await
}

#[tokio::test]
async fn memory_account_upsert_preserves_user_edits() -> Result<()> {
    account_upsert_preserves_user_edits(Arc::new(MemoryStorage::new())).await
}

#[tokio::test]
async fn json_account_upsert_preserves_user_edits() -> Result<()> {
    let dir = TempDir::new()?;
    account_upsert_preserves_user_edits(Arc::new(JsonFileStorage::new(dir.path()))).await
}

#[tokio::test]
async fn memory_balances_are_append_only() -> Result<()> {
    balances_are_append_only(Arc::new(MemoryStorage::new())).await
}

#[tokio::test]
async fn json_balances_are_append_only() -> Result<()> {
    let dir = TempDir::new()?;
    balances_are_append_only(Arc::new(JsonFileStorage::new(dir.path()))).await
}

#[tokio::test]
async fn json_storage_survives_a_reopen() -> Result<()> {
    let dir = TempDir::new()?;
    let user_id = Uuid::new_v4();

    {
        let storage = JsonFileStorage::new(dir.path());
        storage.upsert_account(&account("acct-1", user_id)).await?;
        storage
            .upsert_transactions(
                &Id::from("acct-1"),
                &[transaction("acct-1", "tx-1", 1, -10)],
            )
            .await?;
        storage
            .store_running_balances(&Id::from("acct-1"), &[("tx-1".to_string(), Decimal::from(90))])
            .await?;
    }

    let reopened = JsonFileStorage::new(dir.path());
    let accounts = reopened.accounts_for_user(user_id).await?;
    assert_eq!(accounts.len(), 1);

    let transactions = reopened.get_transactions(&Id::from("acct-1")).await?;
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].running_balance, Some(Decimal::from(90)));
    Ok(())
}

#[tokio::test]
async fn json_storage_skips_stray_account_directories() -> Result<()> {
    let dir = TempDir::new()?;
    let storage = JsonFileStorage::new(dir.path());
    let user_id = Uuid::new_v4();
    storage.upsert_account(&account("acct-1", user_id)).await?;

    // A directory with no account record inside is skipped, not an error.
    std::fs::create_dir_all(dir.path().join("accounts").join("leftover"))?;

    let accounts = storage.accounts_for_user(user_id).await?;
    assert_eq!(accounts.len(), 1);
    Ok(())
}

#[tokio::test]
async fn json_storage_refuses_traversal_ids() -> Result<()> {
    let dir = TempDir::new()?;
    let base = dir.path().join("nested").join("data");
    std::fs::create_dir_all(&base)?;
    let storage = JsonFileStorage::new(&base);

    let requisition = Requisition {
        id: Id::from("../../escaped"),
        user_id: Uuid::new_v4(),
        institution_id: Id::from("BANK_A"),
        agreement_id: Id::from("agr-1"),
        redirect: Some("https://app.example/callback".to_string()),
        reference: "ref-1".to_string(),
        authorization_link: None,
        status: LinkStatus::Pending,
        accounts: Vec::new(),
        created_at: Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap(),
    };
    assert!(storage.save_requisition(&requisition).await.is_err());
    assert!(!dir.path().join("escaped.json").exists());

    let hostile = Id::from("../../escaped");
    assert!(storage.get_account(&hostile).await.is_err());
    assert!(storage
        .append_balances(&hostile, &[snapshot(100)])
        .await
        .is_err());
    Ok(())
}
