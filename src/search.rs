//! # Search Engine Module
//!
//! ## Purpose
//! Ranked multi-field search over voter records with deterministic relevance
//! scoring, plus the filtered listing used by the results page.
//!
//! ## Input/Output Specification
//! - **Input**: Query text, category scope, gender/status filters, caller trust
//! - **Output**: Score-ordered voter hits with optional highlighted fields
//! - **Determinism**: Integer score tiers with a fixed secondary sort
//!
//! ## Key Features
//! - Numeric queries score against `voter_no` only; text queries rank across
//!   name, father, mother, voter_no and address
//! - First matching rule wins, top to bottom; scores are never summed
//! - Result caps per caller trust level with a `has_more` continuation hint
//! - Safe match highlighting for autocomplete rendering

use crate::config::SearchConfig;
use crate::errors::{RegistryError, Result};
use crate::storage::RecordStore;
use crate::utils::{highlight_match, is_numeric_query, normalize_text};
use crate::{CallerTrust, CategoryId, Gender, VoterId, VoterRecord, VoterStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Relevance score floor assigned to candidates matching no specific rule
const BASELINE_NUMERIC: i32 = 50;
const BASELINE_TEXT: i32 = 40;

/// Whether the caller wants highlighted fields in the response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Autocomplete,
    Full,
}

impl Default for SearchMode {
    fn default() -> Self {
        SearchMode::Autocomplete
    }
}

/// Search request parameters
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Free-text query; empty queries return empty results
    pub query: String,
    /// Resolved category scope; `None` means unscoped
    pub scope: Option<HashSet<CategoryId>>,
    pub gender: Option<Gender>,
    pub status: Option<VoterStatus>,
    /// Requested result count, clamped to the trust-level cap
    pub limit: Option<usize>,
    pub mode: SearchMode,
    pub trust: CallerTrust,
}

/// One ranked search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: VoterId,
    pub serial: String,
    pub name: String,
    pub voter_no: String,
    pub father: String,
    pub mother: String,
    pub gender: Gender,
    pub address: String,
    pub category: String,
    pub category_id: Option<CategoryId>,
    pub relevance: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_highlighted: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voter_no_highlighted: Option<String>,
}

/// Ranked search response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub voters: Vec<SearchHit>,
    pub count: usize,
    pub query: String,
    /// Approximation: true when the result filled the limit exactly
    pub has_more: bool,
}

/// Per-field filters for the listing endpoint; every populated text field
/// narrows by case-insensitive substring match
#[derive(Debug, Clone, Default)]
pub struct VoterFilter {
    pub search: Option<String>,
    pub name: Option<String>,
    pub father: Option<String>,
    pub mother: Option<String>,
    pub voter_no: Option<String>,
    pub serial: Option<String>,
    pub address: Option<String>,
    pub profession: Option<String>,
    pub scope: Option<HashSet<CategoryId>>,
    pub gender: Option<Gender>,
    pub status: Option<VoterStatus>,
    /// Equality filter against one `extra_data` key (trusted callers)
    pub extra: Option<(String, String)>,
}

impl VoterFilter {
    /// Whether any filter is set; the listing refuses to run unfiltered
    pub fn is_empty(&self) -> bool {
        self.search.is_none()
            && self.name.is_none()
            && self.father.is_none()
            && self.mother.is_none()
            && self.voter_no.is_none()
            && self.serial.is_none()
            && self.address.is_none()
            && self.profession.is_none()
            && self.scope.is_none()
            && self.gender.is_none()
            && self.status.is_none()
            && self.extra.is_none()
    }
}

/// One page of the filtered listing, newest records first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoterPage {
    pub voters: Vec<VoterRecord>,
    pub total: usize,
    pub page: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

/// Ranked search engine over the record store
pub struct RelevanceSearchEngine {
    store: Arc<RecordStore>,
    config: SearchConfig,
}

impl RelevanceSearchEngine {
    pub fn new(store: Arc<RecordStore>, config: SearchConfig) -> Self {
        Self { store, config }
    }

    /// Execute a ranked search. Empty or too-short queries yield an empty
    /// response; search never degrades to an unfiltered table scan.
    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let query = request.query.trim();
        let min_len = match request.trust {
            CallerTrust::Public => self.config.public_min_query_len,
            CallerTrust::Trusted => self.config.trusted_min_query_len,
        };

        if query.chars().count() < min_len {
            return Ok(SearchResponse {
                voters: Vec::new(),
                count: 0,
                query: query.to_string(),
                has_more: false,
            });
        }
        if query.chars().count() > self.config.max_query_length {
            return Err(RegistryError::validation(
                "q",
                format!(
                    "Query too long: maximum {} characters",
                    self.config.max_query_length
                ),
            ));
        }

        let cap = match request.trust {
            CallerTrust::Public => self.config.public_result_cap,
            CallerTrust::Trusted => self.config.trusted_result_cap,
        };
        let limit = request.limit.unwrap_or(self.config.default_limit).min(cap);

        let query_lower = normalize_text(query);
        let numeric = is_numeric_query(query);

        let mut scored: Vec<(i32, VoterRecord)> = self
            .store
            .scan_voters(|record| {
                record_passes_filters(record, request) && is_candidate(record, &query_lower, numeric)
            })?
            .into_iter()
            .map(|record| {
                let score = if numeric {
                    relevance_numeric(&record, &query_lower)
                } else {
                    relevance_text(&record, &query_lower)
                };
                (score, record)
            })
            .collect();

        // Descending score, then the deterministic secondary sort: ascending
        // voter_no for numeric queries, ascending name otherwise.
        scored.sort_by(|(score_a, a), (score_b, b)| {
            score_b.cmp(score_a).then_with(|| {
                if numeric {
                    sort_key(&a.voter_no).cmp(&sort_key(&b.voter_no))
                } else {
                    sort_key(&a.name).cmp(&sort_key(&b.name))
                }
            })
        });
        scored.truncate(limit);

        let highlight = request.mode == SearchMode::Autocomplete;
        let mut hits = Vec::with_capacity(scored.len());
        for (relevance, record) in scored {
            hits.push(self.to_hit(record, relevance, query, highlight)?);
        }

        let count = hits.len();
        tracing::debug!("Search '{}' returned {} hits", query, count);

        Ok(SearchResponse {
            voters: hits,
            count,
            query: query.to_string(),
            has_more: count == limit,
        })
    }

    /// Filtered listing with pagination, newest-first. An empty filter set
    /// returns an empty page: unfiltered listing is refused for privacy and
    /// scan cost.
    pub fn filter_voters(&self, filter: &VoterFilter, page: usize) -> Result<VoterPage> {
        if filter.is_empty() {
            return Ok(VoterPage {
                voters: Vec::new(),
                total: 0,
                page: 1,
                total_pages: 0,
                has_next: false,
                has_prev: false,
            });
        }

        let mut matched = self
            .store
            .scan_voters(|record| record_matches_filter(record, filter))?;
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        let total = matched.len();
        let page_size = self.config.page_size;
        let total_pages = total.div_ceil(page_size);
        let page = page.max(1).min(total_pages.max(1));

        let start = (page - 1) * page_size;
        let voters: Vec<VoterRecord> = matched.into_iter().skip(start).take(page_size).collect();

        Ok(VoterPage {
            voters,
            total,
            page,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1 && total_pages > 0,
        })
    }

    fn to_hit(
        &self,
        record: VoterRecord,
        relevance: i32,
        query: &str,
        highlight: bool,
    ) -> Result<SearchHit> {
        let category = match self.store.get_category(&record.category_id)? {
            Some(node) => node.name,
            None => String::new(),
        };

        let name = record.name.clone().unwrap_or_default();
        let voter_no = record.voter_no.clone().unwrap_or_default();
        let (name_highlighted, voter_no_highlighted) = if highlight {
            (
                Some(highlight_match(&name, query)),
                Some(highlight_match(&voter_no, query)),
            )
        } else {
            (None, None)
        };

        Ok(SearchHit {
            id: record.id,
            serial: record.serial.unwrap_or_default(),
            name,
            voter_no,
            father: record.father.unwrap_or_default(),
            mother: record.mother.unwrap_or_default(),
            gender: record.gender,
            address: record.address.unwrap_or_default(),
            category,
            category_id: Some(record.category_id),
            relevance,
            name_highlighted,
            voter_no_highlighted,
        })
    }
}

fn sort_key(field: &Option<String>) -> String {
    field.as_deref().unwrap_or_default().to_lowercase()
}

fn field_contains(field: &Option<String>, query_lower: &str) -> bool {
    field
        .as_deref()
        .map(|f| f.to_lowercase().contains(query_lower))
        .unwrap_or(false)
}

fn field_starts_with(field: &Option<String>, query_lower: &str) -> bool {
    field
        .as_deref()
        .map(|f| f.to_lowercase().starts_with(query_lower))
        .unwrap_or(false)
}

fn field_equals(field: &Option<String>, query_lower: &str) -> bool {
    field
        .as_deref()
        .map(|f| f.to_lowercase() == query_lower)
        .unwrap_or(false)
}

fn record_passes_filters(record: &VoterRecord, request: &SearchRequest) -> bool {
    if let Some(scope) = &request.scope {
        if !scope.contains(&record.category_id) {
            return false;
        }
    }
    if let Some(gender) = request.gender {
        if record.gender != gender {
            return false;
        }
    }
    if let Some(status) = request.status {
        if record.status != status {
            return false;
        }
    }
    true
}

fn is_candidate(record: &VoterRecord, query_lower: &str, numeric: bool) -> bool {
    if numeric {
        field_contains(&record.voter_no, query_lower)
    } else {
        field_contains(&record.name, query_lower)
            || field_contains(&record.father, query_lower)
            || field_contains(&record.mother, query_lower)
            || field_contains(&record.voter_no, query_lower)
            || field_contains(&record.address, query_lower)
            || record.search_text.contains(query_lower)
    }
}

/// Score a candidate for an all-digit query; only `voter_no` participates
fn relevance_numeric(record: &VoterRecord, query_lower: &str) -> i32 {
    if field_equals(&record.voter_no, query_lower) {
        100
    } else if field_starts_with(&record.voter_no, query_lower) {
        90
    } else if field_contains(&record.voter_no, query_lower) {
        70
    } else {
        BASELINE_NUMERIC
    }
}

/// Score a candidate for a text query; the first matching rule wins
fn relevance_text(record: &VoterRecord, query_lower: &str) -> i32 {
    if field_equals(&record.name, query_lower) {
        100
    } else if field_starts_with(&record.name, query_lower) {
        90
    } else if field_contains(&record.name, query_lower) {
        80
    } else if field_contains(&record.voter_no, query_lower) {
        75
    } else if field_starts_with(&record.father, query_lower)
        || field_starts_with(&record.mother, query_lower)
    {
        70
    } else if field_contains(&record.father, query_lower)
        || field_contains(&record.mother, query_lower)
    {
        60
    } else if field_contains(&record.address, query_lower) {
        50
    } else {
        BASELINE_TEXT
    }
}

fn record_matches_filter(record: &VoterRecord, filter: &VoterFilter) -> bool {
    if let Some(scope) = &filter.scope {
        if !scope.contains(&record.category_id) {
            return false;
        }
    }
    if let Some(gender) = filter.gender {
        if record.gender != gender {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if record.status != status {
            return false;
        }
    }

    if let Some(q) = &filter.search {
        let q = q.to_lowercase();
        let any = field_contains(&record.serial, &q)
            || field_contains(&record.name, &q)
            || field_contains(&record.voter_no, &q)
            || field_contains(&record.father, &q)
            || field_contains(&record.mother, &q)
            || field_contains(&record.address, &q)
            || field_contains(&record.profession, &q);
        if !any {
            return false;
        }
    }

    let per_field = [
        (&filter.name, &record.name),
        (&filter.father, &record.father),
        (&filter.mother, &record.mother),
        (&filter.voter_no, &record.voter_no),
        (&filter.serial, &record.serial),
        (&filter.address, &record.address),
        (&filter.profession, &record.profession),
    ];
    for (wanted, actual) in per_field {
        if let Some(q) = wanted {
            if !field_contains(actual, &q.to_lowercase()) {
                return false;
            }
        }
    }

    if let Some((key, value)) = &filter.extra {
        match record.extra_data.get(key) {
            Some(serde_json::Value::String(s)) => {
                if s != value {
                    return false;
                }
            }
            Some(other) => {
                if other.to_string() != *value {
                    return false;
                }
            }
            None => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::test_support::temp_store;
    use crate::NewVoter;

    fn engine_with_records(records: Vec<NewVoter>) -> (RelevanceSearchEngine, tempfile::TempDir) {
        let (store, dir) = temp_store();
        let store = Arc::new(store);
        store.insert_voters(records).unwrap();
        let engine = RelevanceSearchEngine::new(store, Config::default().search);
        (engine, dir)
    }

    fn voter(name: &str, voter_no: &str) -> NewVoter {
        NewVoter {
            name: Some(name.to_string()),
            voter_no: Some(voter_no.to_string()),
            source_file: "test.xlsx".to_string(),
            ..Default::default()
        }
    }

    fn request(query: &str) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            scope: None,
            gender: None,
            status: None,
            limit: None,
            mode: SearchMode::Autocomplete,
            trust: CallerTrust::Public,
        }
    }

    #[test]
    fn test_empty_query_returns_empty() {
        let (engine, _dir) = engine_with_records(vec![voter("Karim", "123")]);
        let response = engine.search(&request("")).unwrap();
        assert_eq!(response.count, 0);
        assert!(!response.has_more);
    }

    #[test]
    fn test_numeric_query_ranks_exact_prefix_substring() {
        let (engine, _dir) = engine_with_records(vec![
            voter("A", "4123"),
            voter("B", "123"),
            voter("C", "1234"),
        ]);
        let response = engine.search(&request("123")).unwrap();
        let voter_nos: Vec<&str> = response.voters.iter().map(|h| h.voter_no.as_str()).collect();
        assert_eq!(voter_nos, vec!["123", "1234", "4123"]);
        assert_eq!(response.voters[0].relevance, 100);
        assert_eq!(response.voters[1].relevance, 90);
        assert_eq!(response.voters[2].relevance, 70);
    }

    #[test]
    fn test_numeric_query_ignores_name_matches() {
        let (engine, _dir) = engine_with_records(vec![NewVoter {
            name: Some("123".to_string()),
            voter_no: Some("999".to_string()),
            source_file: "t.xlsx".to_string(),
            ..Default::default()
        }]);
        let response = engine.search(&request("123")).unwrap();
        assert_eq!(response.count, 0);
    }

    #[test]
    fn test_text_query_exact_name_first() {
        let (engine, _dir) =
            engine_with_records(vec![voter("Karim Uddin", "456"), voter("Karim", "123")]);
        let response = engine.search(&request("karim")).unwrap();
        assert_eq!(response.count, 2);
        assert_eq!(response.voters[0].name, "Karim");
        assert_eq!(response.voters[0].relevance, 100);
        assert_eq!(response.voters[1].name, "Karim Uddin");
        assert_eq!(response.voters[1].relevance, 90);
    }

    #[test]
    fn test_text_query_tie_break_ascending_name() {
        let (engine, _dir) = engine_with_records(vec![
            voter("Karim Zaman", "2"),
            voter("Karim Ahmed", "1"),
        ]);
        let response = engine.search(&request("karim")).unwrap();
        assert_eq!(response.voters[0].name, "Karim Ahmed");
        assert_eq!(response.voters[1].name, "Karim Zaman");
    }

    #[test]
    fn test_text_query_parent_name_tiers() {
        let (engine, _dir) = engine_with_records(vec![
            NewVoter {
                name: Some("Alpha".to_string()),
                father: Some("Karim Mia".to_string()),
                source_file: "t.xlsx".to_string(),
                ..Default::default()
            },
            NewVoter {
                name: Some("Beta".to_string()),
                mother: Some("Mst Karim Begum".to_string()),
                source_file: "t.xlsx".to_string(),
                ..Default::default()
            },
        ]);
        let response = engine.search(&request("karim")).unwrap();
        assert_eq!(response.voters[0].name, "Alpha");
        assert_eq!(response.voters[0].relevance, 70);
        assert_eq!(response.voters[1].relevance, 60);
    }

    #[test]
    fn test_limit_clamped_to_public_cap_with_has_more() {
        let records: Vec<NewVoter> = (0..30).map(|i| voter(&format!("Karim {i:02}"), &i.to_string())).collect();
        let (engine, _dir) = engine_with_records(records);
        let mut req = request("karim");
        req.limit = Some(100);
        let response = engine.search(&req).unwrap();
        assert_eq!(response.count, 20);
        assert!(response.has_more);
    }

    #[test]
    fn test_trusted_cap_higher() {
        let records: Vec<NewVoter> = (0..30).map(|i| voter(&format!("Karim {i:02}"), &i.to_string())).collect();
        let (engine, _dir) = engine_with_records(records);
        let mut req = request("karim");
        req.limit = Some(100);
        req.trust = CallerTrust::Trusted;
        let response = engine.search(&req).unwrap();
        assert_eq!(response.count, 30);
        assert!(!response.has_more);
    }

    #[test]
    fn test_scope_filter_restricts_candidates() {
        let (store, _dir) = temp_store();
        let store = Arc::new(store);
        let a = store.create_category("A", None).unwrap();
        let b = store.create_category("B", None).unwrap();
        store
            .insert_voters(vec![
                NewVoter {
                    category_id: a.id,
                    name: Some("Karim".to_string()),
                    source_file: "a.xlsx".to_string(),
                    ..Default::default()
                },
                NewVoter {
                    category_id: b.id,
                    name: Some("Karim Mia".to_string()),
                    source_file: "b.xlsx".to_string(),
                    ..Default::default()
                },
            ])
            .unwrap();
        let engine = RelevanceSearchEngine::new(store, Config::default().search);

        let mut req = request("karim");
        req.scope = Some([a.id].into_iter().collect());
        let response = engine.search(&req).unwrap();
        assert_eq!(response.count, 1);
        assert_eq!(response.voters[0].name, "Karim");
        assert_eq!(response.voters[0].category, "A");
    }

    #[test]
    fn test_full_mode_omits_highlights() {
        let (engine, _dir) = engine_with_records(vec![voter("Karim", "123")]);
        let mut req = request("karim");
        req.mode = SearchMode::Full;
        let response = engine.search(&req).unwrap();
        assert!(response.voters[0].name_highlighted.is_none());

        let req = request("karim");
        let response = engine.search(&req).unwrap();
        assert_eq!(
            response.voters[0].name_highlighted.as_deref(),
            Some("<mark>Karim</mark>")
        );
    }

    #[test]
    fn test_filter_voters_refuses_unfiltered_listing() {
        let (engine, _dir) = engine_with_records(vec![voter("Karim", "123")]);
        let page = engine.filter_voters(&VoterFilter::default(), 1).unwrap();
        assert_eq!(page.total, 0);
        assert!(page.voters.is_empty());
    }

    #[test]
    fn test_filter_voters_paginates_newest_first() {
        let records: Vec<NewVoter> = (0..75).map(|i| voter(&format!("Karim {i:02}"), &i.to_string())).collect();
        let (engine, _dir) = engine_with_records(records);
        let filter = VoterFilter {
            name: Some("karim".to_string()),
            ..Default::default()
        };

        let page1 = engine.filter_voters(&filter, 1).unwrap();
        assert_eq!(page1.total, 75);
        assert_eq!(page1.voters.len(), 50);
        assert_eq!(page1.total_pages, 2);
        assert!(page1.has_next);
        assert!(!page1.has_prev);

        let page2 = engine.filter_voters(&filter, 2).unwrap();
        assert_eq!(page2.voters.len(), 25);
        assert!(!page2.has_next);

        // Out-of-range pages clamp into range
        let clamped = engine.filter_voters(&filter, 99).unwrap();
        assert_eq!(clamped.page, 2);
    }

    #[test]
    fn test_filter_voters_extra_data_equality() {
        let mut extra = serde_json::Map::new();
        extra.insert(
            "ward".to_string(),
            serde_json::Value::String("7".to_string()),
        );
        let (engine, _dir) = engine_with_records(vec![
            NewVoter {
                name: Some("Karim".to_string()),
                extra_data: extra,
                source_file: "t.xlsx".to_string(),
                ..Default::default()
            },
            voter("Karim Mia", "1"),
        ]);

        let filter = VoterFilter {
            extra: Some(("ward".to_string(), "7".to_string())),
            ..Default::default()
        };
        let page = engine.filter_voters(&filter, 1).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.voters[0].name.as_deref(), Some("Karim"));
    }
}
