//! # Storage Management Module
//!
//! ## Purpose
//! Persistent record store for voter records, category nodes and status audit
//! entries, backed by an embedded database.
//!
//! ## Input/Output Specification
//! - **Input**: Category/voter creation, status-change commits, scan predicates
//! - **Output**: Stored records, filtered scans, registry statistics
//! - **Storage**: Sled embedded database, one tree per record type
//!
//! ## Key Features
//! - Bulk voter insertion with derived-field computation on the write path
//! - Predicate scans used by the search and suggestion engines
//! - Transactional status-change commit (record update + audit append as one
//!   atomic unit)

use crate::config::StorageConfig;
use crate::errors::{RegistryError, Result};
use crate::{
    compute_search_text, derive_category_code, CategoryId, CategoryNode, Gender, NewVoter,
    StatusAuditEntry, VoterId, VoterRecord,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::transaction::Transactional;
use std::collections::HashSet;
use uuid::Uuid;

/// Main record store
pub struct RecordStore {
    config: StorageConfig,
    db: sled::Db,
    categories: sled::Tree,
    voters: sled::Tree,
    audits: sled::Tree,
}

/// Registry statistics for the dashboard/stats endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_voters: usize,
    pub total_categories: usize,
    pub male_count: usize,
    pub female_count: usize,
    pub total_audit_entries: usize,
    pub database_size_bytes: u64,
}

impl RecordStore {
    /// Open (or create) the record store at the configured path
    pub fn new(config: StorageConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = sled::open(&config.db_path)?;
        let categories = db.open_tree("categories")?;
        let voters = db.open_tree("voters")?;
        let audits = db.open_tree("status_audits")?;

        let store = Self {
            config,
            db,
            categories,
            voters,
            audits,
        };

        tracing::info!(
            "Record store opened with {} voters across {} categories",
            store.voters.len(),
            store.categories.len()
        );

        Ok(store)
    }

    // ---- categories ----

    /// Create a category node under `parent_id` (None for a root).
    ///
    /// `full_path`, `level` and `code` are derived here; they are immutable
    /// afterwards.
    pub fn create_category(
        &self,
        name: &str,
        parent_id: Option<CategoryId>,
    ) -> Result<CategoryNode> {
        let (full_path, level) = match parent_id {
            Some(pid) => {
                let parent = self
                    .get_category(&pid)?
                    .ok_or_else(|| RegistryError::not_found("category", pid))?;
                (format!("{}/{}", parent.full_path, name), parent.level + 1)
            }
            None => (name.to_string(), 0),
        };

        let node = CategoryNode {
            id: Uuid::new_v4(),
            name: name.to_string(),
            code: derive_category_code(name),
            parent_id,
            full_path,
            level,
            has_source_data: false,
            created_at: Utc::now(),
        };

        let value = bincode::serialize(&node)?;
        self.categories.insert(node.id.as_bytes(), value)?;

        tracing::debug!("Created category: {}", node.full_path);
        Ok(node)
    }

    /// One-time flip when the first leaf data source is attached
    pub fn mark_source_data(&self, id: &CategoryId) -> Result<()> {
        let mut node = self
            .get_category(id)?
            .ok_or_else(|| RegistryError::not_found("category", id))?;
        if !node.has_source_data {
            node.has_source_data = true;
            let value = bincode::serialize(&node)?;
            self.categories.insert(node.id.as_bytes(), value)?;
        }
        Ok(())
    }

    /// Retrieve a category node by ID
    pub fn get_category(&self, id: &CategoryId) -> Result<Option<CategoryNode>> {
        match self.categories.get(id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// All category nodes, unordered
    pub fn all_categories(&self) -> Result<Vec<CategoryNode>> {
        let mut nodes = Vec::with_capacity(self.categories.len());
        for result in self.categories.iter() {
            let (_, value) = result?;
            nodes.push(bincode::deserialize::<CategoryNode>(&value)?);
        }
        Ok(nodes)
    }

    /// Direct children of `parent_id` (roots when `None`), ordered by name
    pub fn categories_by_parent(&self, parent_id: Option<CategoryId>) -> Result<Vec<CategoryNode>> {
        let mut nodes: Vec<CategoryNode> = self
            .all_categories()?
            .into_iter()
            .filter(|c| c.parent_id == parent_id)
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(nodes)
    }

    /// All nodes at a hierarchy level, ordered by name
    pub fn categories_at_level(&self, level: u32) -> Result<Vec<CategoryNode>> {
        let mut nodes: Vec<CategoryNode> = self
            .all_categories()?
            .into_iter()
            .filter(|c| c.level == level)
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(nodes)
    }

    // ---- voters ----

    /// Bulk-insert voter records. Assigns ids and timestamps and computes
    /// `search_text`; returns the assigned ids in input order.
    pub fn insert_voters(&self, new_voters: Vec<NewVoter>) -> Result<Vec<VoterId>> {
        let mut batch = sled::Batch::default();
        let mut ids = Vec::with_capacity(new_voters.len());

        for new_voter in new_voters {
            let search_text = compute_search_text(&new_voter);
            let record = VoterRecord {
                id: Uuid::new_v4(),
                category_id: new_voter.category_id,
                serial: new_voter.serial,
                name: new_voter.name,
                voter_no: new_voter.voter_no,
                father: new_voter.father,
                mother: new_voter.mother,
                profession: new_voter.profession,
                dob: new_voter.dob,
                address: new_voter.address,
                gender: new_voter.gender,
                status: new_voter.status,
                source_file: new_voter.source_file,
                extra_data: new_voter.extra_data,
                search_text,
                created_at: Utc::now(),
            };
            let value = bincode::serialize(&record)?;
            batch.insert(record.id.as_bytes().to_vec(), value);
            ids.push(record.id);
        }

        self.voters.apply_batch(batch)?;
        tracing::info!("Inserted {} voter records", ids.len());
        Ok(ids)
    }

    /// Retrieve a voter record by ID
    pub fn get_voter(&self, id: &VoterId) -> Result<Option<VoterRecord>> {
        match self.voters.get(id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Scan voter records, keeping those matching `keep`
    pub fn scan_voters<F>(&self, mut keep: F) -> Result<Vec<VoterRecord>>
    where
        F: FnMut(&VoterRecord) -> bool,
    {
        let mut matched = Vec::new();
        for result in self.voters.iter() {
            let (_, value) = result?;
            let record: VoterRecord = bincode::deserialize(&value)?;
            if keep(&record) {
                matched.push(record);
            }
        }
        Ok(matched)
    }

    /// Count voters owned by the given category scope
    pub fn voter_count_in_scope(&self, scope: &HashSet<CategoryId>) -> Result<usize> {
        let mut count = 0;
        for result in self.voters.iter() {
            let (_, value) = result?;
            let record: VoterRecord = bincode::deserialize(&value)?;
            if scope.contains(&record.category_id) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Commit a status change: the updated record and its audit entry are
    /// written as one atomic unit. A crash between the two writes cannot
    /// leave a change without its audit record.
    pub fn commit_status_change(
        &self,
        voter: &VoterRecord,
        entry: &StatusAuditEntry,
    ) -> Result<()> {
        debug_assert_eq!(voter.id, entry.voter_id);
        debug_assert_eq!(voter.status, entry.new_status);

        let voter_bytes = bincode::serialize(voter)?;
        let entry_bytes = bincode::serialize(entry)?;

        let result: std::result::Result<(), sled::transaction::TransactionError<RegistryError>> =
            (&self.voters, &self.audits).transaction(|(voters, audits)| {
                voters.insert(voter.id.as_bytes(), voter_bytes.clone())?;
                audits.insert(entry.id.as_bytes(), entry_bytes.clone())?;
                Ok(())
            });
        result.map_err(RegistryError::from)?;

        self.db.flush()?;
        Ok(())
    }

    // ---- audits ----

    /// All audit entries, unordered; callers sort and filter
    pub fn all_audit_entries(&self) -> Result<Vec<StatusAuditEntry>> {
        let mut entries = Vec::with_capacity(self.audits.len());
        for result in self.audits.iter() {
            let (_, value) = result?;
            entries.push(bincode::deserialize::<StatusAuditEntry>(&value)?);
        }
        Ok(entries)
    }

    // ---- maintenance ----

    /// Registry statistics for the stats endpoint
    pub fn stats(&self) -> Result<RegistryStats> {
        let mut male_count = 0;
        let mut female_count = 0;
        for result in self.voters.iter() {
            let (_, value) = result?;
            let record: VoterRecord = bincode::deserialize(&value)?;
            match record.gender {
                Gender::Male => male_count += 1,
                Gender::Female => female_count += 1,
                Gender::Unknown => {}
            }
        }

        Ok(RegistryStats {
            total_voters: self.voters.len(),
            total_categories: self.categories.len(),
            male_count,
            female_count,
            total_audit_entries: self.audits.len(),
            database_size_bytes: self.db.size_on_disk()?,
        })
    }

    /// Health check: probe a write/read/remove cycle
    pub fn health_check(&self) -> Result<()> {
        let test_key = b"__health_check";
        self.categories.insert(test_key, b"ok")?;
        let value = self.categories.get(test_key)?;
        if value.is_none() {
            return Err(RegistryError::Internal {
                message: format!(
                    "Health check value not found in {:?}",
                    self.config.db_path
                ),
            });
        }
        self.categories.remove(test_key)?;
        Ok(())
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::temp_store;
    use super::*;
    use crate::VoterStatus;

    #[test]
    fn test_create_category_derives_path_and_level() {
        let (store, _dir) = temp_store();
        let root = store.create_category("Sadar", None).unwrap();
        let child = store.create_category("1234567", Some(root.id)).unwrap();

        assert_eq!(root.level, 0);
        assert_eq!(root.full_path, "Sadar");
        assert_eq!(child.level, 1);
        assert_eq!(child.full_path, "Sadar/1234567");
        assert_eq!(child.code.as_deref(), Some("34567"));
        assert_eq!(root.code, None);
    }

    #[test]
    fn test_mark_source_data_is_one_time_flip() {
        let (store, _dir) = temp_store();
        let node = store.create_category("Area", None).unwrap();
        assert!(!node.has_source_data);

        store.mark_source_data(&node.id).unwrap();
        store.mark_source_data(&node.id).unwrap();
        assert!(store.get_category(&node.id).unwrap().unwrap().has_source_data);
    }

    #[test]
    fn test_insert_voters_computes_search_text() {
        let (store, _dir) = temp_store();
        let cat = store.create_category("Area", None).unwrap();

        let ids = store
            .insert_voters(vec![NewVoter {
                category_id: cat.id,
                name: Some("Karim Uddin".to_string()),
                voter_no: Some("123456".to_string()),
                source_file: "area_male.xlsx".to_string(),
                ..Default::default()
            }])
            .unwrap();

        let record = store.get_voter(&ids[0]).unwrap().unwrap();
        assert_eq!(record.search_text, "karim uddin 123456");
        assert_eq!(record.status, VoterStatus::Present);
    }

    #[test]
    fn test_commit_status_change_writes_both_records() {
        let (store, _dir) = temp_store();
        let cat = store.create_category("Area", None).unwrap();
        let ids = store
            .insert_voters(vec![NewVoter {
                category_id: cat.id,
                name: Some("Rahim".to_string()),
                source_file: "f.xlsx".to_string(),
                ..Default::default()
            }])
            .unwrap();

        let mut voter = store.get_voter(&ids[0]).unwrap().unwrap();
        let old_status = voter.status;
        voter.status = VoterStatus::Dead;
        let entry = StatusAuditEntry {
            id: Uuid::new_v4(),
            voter_id: voter.id,
            changed_by: Some("admin".to_string()),
            old_status,
            new_status: VoterStatus::Dead,
            remarks: None,
            changed_at: Utc::now(),
            ip_address: None,
        };

        store.commit_status_change(&voter, &entry).unwrap();

        assert_eq!(
            store.get_voter(&ids[0]).unwrap().unwrap().status,
            VoterStatus::Dead
        );
        let audits = store.all_audit_entries().unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].old_status, VoterStatus::Present);
    }

    #[test]
    fn test_scope_count_and_stats() {
        let (store, _dir) = temp_store();
        let a = store.create_category("A", None).unwrap();
        let b = store.create_category("B", None).unwrap();
        store
            .insert_voters(vec![
                NewVoter {
                    category_id: a.id,
                    gender: Gender::Male,
                    source_file: "a.xlsx".to_string(),
                    ..Default::default()
                },
                NewVoter {
                    category_id: b.id,
                    gender: Gender::Female,
                    source_file: "b.xlsx".to_string(),
                    ..Default::default()
                },
            ])
            .unwrap();

        let scope: HashSet<CategoryId> = [a.id].into_iter().collect();
        assert_eq!(store.voter_count_in_scope(&scope).unwrap(), 1);

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_voters, 2);
        assert_eq!(stats.male_count, 1);
        assert_eq!(stats.female_count, 1);
    }

    #[test]
    fn test_health_check() {
        let (store, _dir) = temp_store();
        assert!(store.health_check().is_ok());
    }
}
