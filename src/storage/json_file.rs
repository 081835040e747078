use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::models::{
    Account, AccountStatus, Agreement, BalanceSnapshot, CacheMetadata, Id, InstitutionMetadata,
    Requisition, Transaction, User,
};

use super::{Storage, UpsertOutcome};

/// JSON file-based storage implementation.
///
/// Directory structure:
/// ```text
/// data/
///   users/
///     {uuid}.json
///   catalog/
///     {country}/
///       institutions.json
///       metadata.json
///   agreements/
///     {id}.json
///   requisitions/
///     {id}.json
///   accounts/
///     {id}/
///       account.json
///       balances.jsonl
///       transactions.jsonl
/// ```
/// Ids become path segments; refuse anything that could leave the data dir.
fn safe_segment(id: &Id) -> Result<&str> {
    if !Id::is_path_safe(id.as_str()) {
        bail!("id {:?} is not a valid path segment", id.as_str());
    }
    Ok(id.as_str())
}

pub struct JsonFileStorage {
    base_path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn users_dir(&self) -> PathBuf {
        self.base_path.join("users")
    }

    fn user_file(&self, id: Uuid) -> PathBuf {
        self.users_dir().join(format!("{id}.json"))
    }

    fn catalog_dir(&self) -> PathBuf {
        self.base_path.join("catalog")
    }

    fn institutions_file(&self, country: &str) -> PathBuf {
        self.catalog_dir().join(country).join("institutions.json")
    }

    fn catalog_metadata_file(&self, country: &str) -> PathBuf {
        self.catalog_dir().join(country).join("metadata.json")
    }

    fn agreements_dir(&self) -> PathBuf {
        self.base_path.join("agreements")
    }

    fn agreement_file(&self, id: &Id) -> Result<PathBuf> {
        Ok(self.agreements_dir().join(format!("{}.json", safe_segment(id)?)))
    }

    fn requisitions_dir(&self) -> PathBuf {
        self.base_path.join("requisitions")
    }

    fn requisition_file(&self, id: &Id) -> Result<PathBuf> {
        Ok(self.requisitions_dir().join(format!("{}.json", safe_segment(id)?)))
    }

    fn accounts_dir(&self) -> PathBuf {
        self.base_path.join("accounts")
    }

    fn account_dir(&self, id: &Id) -> Result<PathBuf> {
        Ok(self.accounts_dir().join(safe_segment(id)?))
    }

    fn account_file(&self, id: &Id) -> Result<PathBuf> {
        Ok(self.account_dir(id)?.join("account.json"))
    }

    fn balances_file(&self, account_id: &Id) -> Result<PathBuf> {
        Ok(self.account_dir(account_id)?.join("balances.jsonl"))
    }

    fn transactions_file(&self, account_id: &Id) -> Result<PathBuf> {
        Ok(self.account_dir(account_id)?.join("transactions.jsonl"))
    }

    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create directory")?;
        }
        Ok(())
    }

    async fn read_json<T: for<'de> serde::Deserialize<'de>>(
        &self,
        path: &Path,
    ) -> Result<Option<T>> {
        match fs::read_to_string(path).await {
            Ok(content) => {
                let value = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse JSON from {:?}", path))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context("Failed to read file"),
        }
    }

    async fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        self.ensure_dir(path).await?;
        let content = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
        fs::write(path, content)
            .await
            .context("Failed to write file")?;
        Ok(())
    }

    async fn read_jsonl<T: for<'de> serde::Deserialize<'de>>(&self, path: &Path) -> Result<Vec<T>> {
        let file = match fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Failed to open file"),
        };

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut items = Vec::new();

        while let Some(line) = lines.next_line().await.context("Failed to read line")? {
            if line.trim().is_empty() {
                continue;
            }
            let item: T = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse JSONL line: {}", line))?;
            items.push(item);
        }

        Ok(items)
    }

    async fn append_jsonl<T: serde::Serialize>(&self, path: &Path, items: &[T]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        self.ensure_dir(path).await?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .context("Failed to open file for append")?;

        for item in items {
            let line = serde_json::to_string(item).context("Failed to serialize item")?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
        }

        Ok(())
    }

    async fn write_jsonl<T: serde::Serialize>(&self, path: &Path, items: &[T]) -> Result<()> {
        self.ensure_dir(path).await?;

        let mut content = String::new();
        for item in items {
            content.push_str(&serde_json::to_string(item).context("Failed to serialize item")?);
            content.push('\n');
        }

        fs::write(path, content)
            .await
            .context("Failed to write file")?;
        Ok(())
    }

    async fn list_files(&self, path: &Path, extension: &str) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        let mut entries = match fs::read_dir(path).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e).context("Failed to read directory"),
        };

        while let Some(entry) = entries.next_entry().await.context("Failed to read entry")? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(extension) {
                files.push(path);
            }
        }

        Ok(files)
    }

    async fn list_dirs(&self, path: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();

        let mut entries = match fs::read_dir(path).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e).context("Failed to read directory"),
        };

        while let Some(entry) = entries.next_entry().await.context("Failed to read entry")? {
            if let Ok(file_type) = entry.file_type().await {
                if file_type.is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        if Id::is_path_safe(name) {
                            names.push(name.to_string());
                        }
                    }
                }
            }
        }

        Ok(names)
    }

    async fn mutate_account<F>(&self, id: &Id, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Account),
    {
        let path = self.account_file(id)?;
        let Some(mut account) = self.read_json::<Account>(&path).await? else {
            bail!("account {id} not found");
        };
        mutate(&mut account);
        self.write_json(&path, &account).await
    }
}

#[async_trait::async_trait]
impl Storage for JsonFileStorage {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        self.read_json(&self.user_file(id)).await
    }

    async fn get_user_by_subject(&self, subject: &str) -> Result<Option<User>> {
        for path in self.list_files(&self.users_dir(), "json").await? {
            if let Some(user) = self.read_json::<User>(&path).await? {
                if user.subject == subject {
                    return Ok(Some(user));
                }
            }
        }
        Ok(None)
    }

    async fn save_user(&self, user: &User) -> Result<()> {
        self.write_json(&self.user_file(user.id), user).await
    }

    async fn get_cached_institutions(&self, country: &str) -> Result<Vec<InstitutionMetadata>> {
        Ok(self
            .read_json(&self.institutions_file(country))
            .await?
            .unwrap_or_default())
    }

    async fn replace_cached_institutions(
        &self,
        country: &str,
        institutions: &[InstitutionMetadata],
        metadata: &CacheMetadata,
    ) -> Result<()> {
        self.write_json(&self.institutions_file(country), &institutions.to_vec())
            .await?;
        self.write_json(&self.catalog_metadata_file(country), metadata)
            .await
    }

    async fn get_cache_metadata(&self, key: &str) -> Result<Option<CacheMetadata>> {
        for country in self.list_dirs(&self.catalog_dir()).await? {
            if let Some(metadata) = self
                .read_json::<CacheMetadata>(&self.catalog_metadata_file(&country))
                .await?
            {
                if metadata.key == key {
                    return Ok(Some(metadata));
                }
            }
        }
        Ok(None)
    }

    async fn save_agreement(&self, agreement: &Agreement) -> Result<()> {
        self.write_json(&self.agreement_file(&agreement.id)?, agreement)
            .await
    }

    async fn get_agreement(&self, id: &Id) -> Result<Option<Agreement>> {
        self.read_json(&self.agreement_file(id)?).await
    }

    async fn agreements_for_institution(
        &self,
        institution_id: &Id,
        user_id: Uuid,
    ) -> Result<Vec<Agreement>> {
        let mut matching = Vec::new();
        for path in self.list_files(&self.agreements_dir(), "json").await? {
            if let Some(agreement) = self.read_json::<Agreement>(&path).await? {
                if &agreement.institution_id == institution_id && agreement.user_id == user_id {
                    matching.push(agreement);
                }
            }
        }
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn save_requisition(&self, requisition: &Requisition) -> Result<()> {
        self.write_json(&self.requisition_file(&requisition.id)?, requisition)
            .await
    }

    async fn get_requisition(&self, id: &Id) -> Result<Option<Requisition>> {
        self.read_json(&self.requisition_file(id)?).await
    }

    async fn requisitions_for_institution(
        &self,
        institution_id: &Id,
        user_id: Uuid,
    ) -> Result<Vec<Requisition>> {
        let mut matching = Vec::new();
        for path in self.list_files(&self.requisitions_dir(), "json").await? {
            if let Some(requisition) = self.read_json::<Requisition>(&path).await? {
                if &requisition.institution_id == institution_id && requisition.user_id == user_id {
                    matching.push(requisition);
                }
            }
        }
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn upsert_account(&self, account: &Account) -> Result<()> {
        let path = self.account_file(&account.id)?;
        match self.read_json::<Account>(&path).await? {
            Some(mut existing) => {
                existing.name = account.name.clone().or(existing.name.take());
                existing.currency = account.currency.clone().or(existing.currency.take());
                existing.institution_id = account.institution_id.clone();
                existing.requisition_id = account.requisition_id.clone();
                existing.status = account.status;
                self.write_json(&path, &existing).await
            }
            None => self.write_json(&path, account).await,
        }
    }

    async fn get_account(&self, id: &Id) -> Result<Option<Account>> {
        self.read_json(&self.account_file(id)?).await
    }

    async fn accounts_for_user(&self, user_id: Uuid) -> Result<Vec<Account>> {
        let mut matching = Vec::new();
        for name in self.list_dirs(&self.accounts_dir()).await? {
            let id = Id::from(name);
            if let Some(account) = self.get_account(&id).await? {
                if account.user_id == user_id {
                    matching.push(account);
                }
            }
        }
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }

    async fn update_account_status(&self, id: &Id, status: AccountStatus) -> Result<()> {
        self.mutate_account(id, |account| account.status = status)
            .await
    }

    async fn update_last_synced(&self, id: &Id, at: DateTime<Utc>) -> Result<()> {
        self.mutate_account(id, |account| account.last_synced = Some(at))
            .await
    }

    async fn append_balances(&self, account_id: &Id, snapshots: &[BalanceSnapshot]) -> Result<()> {
        self.append_jsonl(&self.balances_file(account_id)?, snapshots)
            .await
    }

    async fn get_balances(&self, account_id: &Id) -> Result<Vec<BalanceSnapshot>> {
        self.read_jsonl(&self.balances_file(account_id)?).await
    }

    async fn upsert_transactions(
        &self,
        account_id: &Id,
        transactions: &[Transaction],
    ) -> Result<UpsertOutcome> {
        let path = self.transactions_file(account_id)?;
        let mut rows: Vec<Transaction> = self.read_jsonl(&path).await?;

        let mut outcome = UpsertOutcome::default();
        for tx in transactions {
            if rows.iter().any(|r| r.external_id == tx.external_id) {
                outcome.existing += 1;
            } else {
                rows.push(tx.clone());
                outcome.inserted += 1;
            }
        }

        if outcome.inserted > 0 {
            self.write_jsonl(&path, &rows).await?;
        }
        Ok(outcome)
    }

    async fn get_transactions(&self, account_id: &Id) -> Result<Vec<Transaction>> {
        self.read_jsonl(&self.transactions_file(account_id)?).await
    }

    async fn store_running_balances(
        &self,
        account_id: &Id,
        balances: &[(String, Decimal)],
    ) -> Result<usize> {
        let path = self.transactions_file(account_id)?;
        let mut rows: Vec<Transaction> = self.read_jsonl(&path).await?;

        let mut updated = 0;
        for (external_id, balance) in balances {
            if let Some(row) = rows.iter_mut().find(|r| &r.external_id == external_id) {
                row.running_balance = Some(*balance);
                updated += 1;
            }
        }

        if updated > 0 {
            self.write_jsonl(&path, &rows).await?;
        }
        Ok(updated)
    }
}
