//! # Status Audit Trail Module
//!
//! ## Purpose
//! Records and exposes the immutable history of voter status transitions.
//!
//! ## Input/Output Specification
//! - **Input**: Status transitions (voter, actor, new status, remarks, ip)
//! - **Output**: Transition outcomes, filtered newest-first audit listings
//! - **Guarantee**: One audit entry per committed change, none for no-ops
//!
//! ## Key Features
//! - Per-voter serialization of racing transitions
//! - Status update and audit append committed as one atomic unit
//! - Retrieval filtered by actor, resulting status, free-text voter match
//!   and date range

use crate::errors::Result;
use crate::storage::RecordStore;
use crate::{RegistryError, StatusAuditEntry, VoterId, VoterStatus};
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of a transition request; "unchanged" is a distinct, explicit
/// result rather than a silently absorbed write
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Changed(StatusAuditEntry),
    Unchanged,
}

/// Filters for audit retrieval; all optional, combined with AND
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Actor identity (exact match)
    pub actor: Option<String>,
    /// Resulting status
    pub status: Option<VoterStatus>,
    /// Case-insensitive substring match against voter name or voter_no
    pub search: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

/// Audit entry joined with the owning voter's display fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntryView {
    pub id: Uuid,
    pub voter_id: VoterId,
    pub voter_name: String,
    pub voter_no: String,
    pub changed_by: Option<String>,
    pub old_status: VoterStatus,
    pub new_status: VoterStatus,
    pub remarks: Option<String>,
    pub changed_at: chrono::DateTime<Utc>,
    pub ip_address: Option<String>,
}

/// One page of the audit listing, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditPage {
    pub entries: Vec<AuditEntryView>,
    pub total: usize,
    pub page: usize,
    pub total_pages: usize,
}

/// Append-only status transition trail
pub struct StatusAuditTrail {
    store: Arc<RecordStore>,
    /// Per-voter locks serializing concurrent transitions
    locks: DashMap<VoterId, Arc<Mutex<()>>>,
    page_size: usize,
}

impl StatusAuditTrail {
    pub fn new(store: Arc<RecordStore>, page_size: usize) -> Self {
        Self {
            store,
            locks: DashMap::new(),
            page_size,
        }
    }

    /// Apply a status transition.
    ///
    /// No-op when the status is unchanged (no entry written). Otherwise the
    /// record update and exactly one audit entry commit atomically; the
    /// per-voter lock keeps racing transitions from interleaving between the
    /// read and the commit.
    pub fn record_transition(
        &self,
        voter_id: VoterId,
        actor: Option<&str>,
        new_status: VoterStatus,
        remarks: Option<String>,
        client_ip: Option<String>,
    ) -> Result<TransitionOutcome> {
        let lock = self
            .locks
            .entry(voter_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();

        let mut voter = self
            .store
            .get_voter(&voter_id)?
            .ok_or_else(|| RegistryError::not_found("voter", voter_id))?;

        if voter.status == new_status {
            return Ok(TransitionOutcome::Unchanged);
        }

        let entry = StatusAuditEntry {
            id: Uuid::new_v4(),
            voter_id,
            changed_by: actor.map(str::to_string),
            old_status: voter.status,
            new_status,
            remarks: remarks.filter(|r| !r.trim().is_empty()),
            changed_at: Utc::now(),
            ip_address: client_ip,
        };

        voter.status = new_status;
        self.store.commit_status_change(&voter, &entry)?;

        tracing::info!(
            "Voter {} status {} -> {} by {}",
            voter_id,
            entry.old_status.as_str(),
            entry.new_status.as_str(),
            entry.changed_by.as_deref().unwrap_or("unknown")
        );

        Ok(TransitionOutcome::Changed(entry))
    }

    /// Filtered audit listing, newest first, paginated
    pub fn entries(&self, filter: &AuditFilter, page: usize) -> Result<AuditPage> {
        let search_lower = filter.search.as_ref().map(|s| s.to_lowercase());

        let mut matched = Vec::new();
        for entry in self.store.all_audit_entries()? {
            if let Some(actor) = &filter.actor {
                if entry.changed_by.as_deref() != Some(actor.as_str()) {
                    continue;
                }
            }
            if let Some(status) = filter.status {
                if entry.new_status != status {
                    continue;
                }
            }
            let date = entry.changed_at.date_naive();
            if let Some(from) = filter.date_from {
                if date < from {
                    continue;
                }
            }
            if let Some(to) = filter.date_to {
                if date > to {
                    continue;
                }
            }

            let voter = self.store.get_voter(&entry.voter_id)?;
            if let Some(needle) = &search_lower {
                let matches = voter.as_ref().is_some_and(|v| {
                    v.name
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(needle))
                        || v.voter_no
                            .as_deref()
                            .is_some_and(|n| n.to_lowercase().contains(needle))
                });
                if !matches {
                    continue;
                }
            }

            matched.push(AuditEntryView {
                id: entry.id,
                voter_id: entry.voter_id,
                voter_name: voter
                    .as_ref()
                    .and_then(|v| v.name.clone())
                    .unwrap_or_default(),
                voter_no: voter
                    .as_ref()
                    .and_then(|v| v.voter_no.clone())
                    .unwrap_or_default(),
                changed_by: entry.changed_by,
                old_status: entry.old_status,
                new_status: entry.new_status,
                remarks: entry.remarks,
                changed_at: entry.changed_at,
                ip_address: entry.ip_address,
            });
        }

        matched.sort_by(|a, b| b.changed_at.cmp(&a.changed_at).then(a.id.cmp(&b.id)));

        let total = matched.len();
        let total_pages = total.div_ceil(self.page_size);
        let page = page.max(1).min(total_pages.max(1));
        let start = (page - 1) * self.page_size;
        let entries = matched
            .into_iter()
            .skip(start)
            .take(self.page_size)
            .collect();

        Ok(AuditPage {
            entries,
            total,
            page,
            total_pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::temp_store;
    use crate::NewVoter;

    fn trail_with_voter() -> (StatusAuditTrail, Arc<RecordStore>, VoterId, tempfile::TempDir) {
        let (store, dir) = temp_store();
        let store = Arc::new(store);
        let cat = store.create_category("Area", None).unwrap();
        let ids = store
            .insert_voters(vec![NewVoter {
                category_id: cat.id,
                name: Some("Karim Uddin".to_string()),
                voter_no: Some("123456".to_string()),
                source_file: "a.xlsx".to_string(),
                ..Default::default()
            }])
            .unwrap();
        let trail = StatusAuditTrail::new(store.clone(), 50);
        (trail, store, ids[0], dir)
    }

    #[test]
    fn test_unchanged_status_is_noop() {
        let (trail, store, voter_id, _dir) = trail_with_voter();

        let outcome = trail
            .record_transition(voter_id, Some("admin"), VoterStatus::Present, None, None)
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Unchanged));
        assert!(store.all_audit_entries().unwrap().is_empty());
    }

    #[test]
    fn test_changed_status_appends_exactly_one_entry() {
        let (trail, store, voter_id, _dir) = trail_with_voter();

        let outcome = trail
            .record_transition(
                voter_id,
                Some("admin"),
                VoterStatus::Dead,
                Some("verified by field team".to_string()),
                Some("203.0.113.9".to_string()),
            )
            .unwrap();

        let entry = match outcome {
            TransitionOutcome::Changed(entry) => entry,
            TransitionOutcome::Unchanged => panic!("expected a change"),
        };
        assert_eq!(entry.old_status, VoterStatus::Present);
        assert_eq!(entry.new_status, VoterStatus::Dead);

        let entries = store.all_audit_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            store.get_voter(&voter_id).unwrap().unwrap().status,
            VoterStatus::Dead
        );
    }

    #[test]
    fn test_second_transition_chains_old_status() {
        let (trail, _store, voter_id, _dir) = trail_with_voter();

        trail
            .record_transition(voter_id, Some("admin"), VoterStatus::Absent, None, None)
            .unwrap();
        let outcome = trail
            .record_transition(voter_id, Some("admin"), VoterStatus::Dead, None, None)
            .unwrap();

        match outcome {
            TransitionOutcome::Changed(entry) => {
                assert_eq!(entry.old_status, VoterStatus::Absent);
            }
            TransitionOutcome::Unchanged => panic!("expected a change"),
        }
    }

    #[test]
    fn test_unknown_voter_is_not_found() {
        let (trail, _store, _voter_id, _dir) = trail_with_voter();
        let err = trail
            .record_transition(Uuid::new_v4(), None, VoterStatus::Dead, None, None)
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[test]
    fn test_entries_newest_first_with_filters() {
        let (trail, _store, voter_id, _dir) = trail_with_voter();

        trail
            .record_transition(voter_id, Some("admin"), VoterStatus::Absent, None, None)
            .unwrap();
        trail
            .record_transition(voter_id, Some("clerk"), VoterStatus::Dead, None, None)
            .unwrap();

        let page = trail.entries(&AuditFilter::default(), 1).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.entries[0].new_status, VoterStatus::Dead);
        assert_eq!(page.entries[0].voter_name, "Karim Uddin");

        let by_actor = trail
            .entries(
                &AuditFilter {
                    actor: Some("clerk".to_string()),
                    ..Default::default()
                },
                1,
            )
            .unwrap();
        assert_eq!(by_actor.total, 1);
        assert_eq!(by_actor.entries[0].changed_by.as_deref(), Some("clerk"));

        let by_status = trail
            .entries(
                &AuditFilter {
                    status: Some(VoterStatus::Absent),
                    ..Default::default()
                },
                1,
            )
            .unwrap();
        assert_eq!(by_status.total, 1);

        let by_search = trail
            .entries(
                &AuditFilter {
                    search: Some("karim".to_string()),
                    ..Default::default()
                },
                1,
            )
            .unwrap();
        assert_eq!(by_search.total, 2);

        let by_search_miss = trail
            .entries(
                &AuditFilter {
                    search: Some("nonexistent".to_string()),
                    ..Default::default()
                },
                1,
            )
            .unwrap();
        assert_eq!(by_search_miss.total, 0);
    }

    #[test]
    fn test_racing_transitions_serialize_into_consistent_chain() {
        let (trail, store, voter_id, _dir) = trail_with_voter();
        let trail = Arc::new(trail);

        let statuses = [VoterStatus::Absent, VoterStatus::Dead, VoterStatus::Present];
        let handles: Vec<_> = (0..9)
            .map(|i| {
                let trail = trail.clone();
                let new_status = statuses[i % statuses.len()];
                std::thread::spawn(move || {
                    trail
                        .record_transition(voter_id, Some("admin"), new_status, None, None)
                        .unwrap()
                })
            })
            .collect();
        let changed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| matches!(outcome, TransitionOutcome::Changed(_)))
            .count();

        // Exactly one entry per Changed outcome, and the entries chain:
        // each old_status is the previous entry's new_status
        let mut entries = store.all_audit_entries().unwrap();
        entries.sort_by_key(|e| e.changed_at);
        assert_eq!(entries.len(), changed);

        let mut expected_old = VoterStatus::Present;
        for entry in &entries {
            assert_eq!(entry.old_status, expected_old);
            assert_ne!(entry.old_status, entry.new_status);
            expected_old = entry.new_status;
        }
        assert_eq!(
            store.get_voter(&voter_id).unwrap().unwrap().status,
            expected_old
        );
    }

    #[test]
    fn test_date_range_filter() {
        let (trail, _store, voter_id, _dir) = trail_with_voter();
        trail
            .record_transition(voter_id, None, VoterStatus::Dead, None, None)
            .unwrap();

        let today = Utc::now().date_naive();
        let in_range = trail
            .entries(
                &AuditFilter {
                    date_from: Some(today),
                    date_to: Some(today),
                    ..Default::default()
                },
                1,
            )
            .unwrap();
        assert_eq!(in_range.total, 1);

        let out_of_range = trail
            .entries(
                &AuditFilter {
                    date_to: Some(today.pred_opt().unwrap()),
                    ..Default::default()
                },
                1,
            )
            .unwrap();
        assert_eq!(out_of_range.total, 0);
    }
}
