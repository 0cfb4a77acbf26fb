//! # Suggestion Engine Module
//!
//! ## Purpose
//! Field-specific autocomplete suggestions: deduplicated, scope-filtered
//! candidate values drawn from voter records.
//!
//! ## Input/Output Specification
//! - **Input**: Query prefix, target field, optional category scope
//! - **Output**: Ordered list of distinct suggestion strings
//! - **Ordering**: Prefix matches first, then ascending lexicographic
//!
//! ## Key Features
//! - Field allow-list with silent fallback to `name`
//! - Case-insensitive deduplication keeping the first-seen casing
//! - Working set of 2x the limit so deduplication never truncates early
//! - Inline scope resolution (node, children, children-of-children)

use crate::config::SuggestionConfig;
use crate::errors::Result;
use crate::storage::RecordStore;
use crate::utils::normalize_text;
use crate::{CallerTrust, CategoryId, VoterRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Fields eligible for suggestions; anything else normalizes to `Name`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestField {
    Name,
    Father,
    Mother,
    Address,
}

impl SuggestField {
    /// Parse a caller-supplied field name; unknown values silently fall
    /// back to `Name` rather than erroring
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "father" => SuggestField::Father,
            "mother" => SuggestField::Mother,
            "address" => SuggestField::Address,
            _ => SuggestField::Name,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestField::Name => "name",
            SuggestField::Father => "father",
            SuggestField::Mother => "mother",
            SuggestField::Address => "address",
        }
    }

    fn value<'a>(&self, record: &'a VoterRecord) -> Option<&'a str> {
        match self {
            SuggestField::Name => record.name.as_deref(),
            SuggestField::Father => record.father.as_deref(),
            SuggestField::Mother => record.mother.as_deref(),
            SuggestField::Address => record.address.as_deref(),
        }
    }
}

/// Category scope selector, most specific variant first
#[derive(Debug, Clone, Copy)]
pub enum SuggestScope {
    /// A leaf voter area: exactly that node
    LocalArea(CategoryId),
    /// A union: the node plus its immediate children
    SubRegion(CategoryId),
    /// An upazila: the node, its children and their children
    Region(CategoryId),
}

/// Suggestion request parameters
#[derive(Debug, Clone)]
pub struct SuggestionRequest {
    pub query: String,
    /// Raw caller-supplied field name; normalized via [`SuggestField::from_raw`]
    pub field: String,
    pub scope: Option<SuggestScope>,
    pub limit: Option<usize>,
    pub trust: CallerTrust,
}

/// One suggestion candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    pub field: SuggestField,
}

/// Suggestion engine over the record store
pub struct SuggestionEngine {
    store: Arc<RecordStore>,
    config: SuggestionConfig,
}

impl SuggestionEngine {
    pub fn new(store: Arc<RecordStore>, config: SuggestionConfig) -> Self {
        Self { store, config }
    }

    /// Produce deduplicated suggestions for one field. Queries below the
    /// minimum length return empty without touching the store.
    pub fn suggest(&self, request: &SuggestionRequest) -> Result<Vec<Suggestion>> {
        let query = request.query.trim();
        if query.chars().count() < self.config.min_query_length {
            return Ok(Vec::new());
        }

        let field = SuggestField::from_raw(&request.field);
        let cap = match request.trust {
            CallerTrust::Public => self.config.public_limit_cap,
            CallerTrust::Trusted => self.config.trusted_limit_cap,
        };
        let limit = request.limit.unwrap_or(self.config.default_limit).min(cap);

        let scope_ids = self.resolve_inline_scope(request.scope)?;
        let query_lower = normalize_text(query);

        // Draw a working set of 2x the limit distinct raw values so that
        // case-insensitive deduplication below never truncates too early.
        let working_cap = limit * 2;
        let mut distinct_raw: Vec<String> = Vec::new();
        let mut seen_raw: HashSet<String> = HashSet::new();
        self.store.scan_voters(|record| {
            if distinct_raw.len() >= working_cap {
                return false;
            }
            if let Some(scope) = &scope_ids {
                if !scope.contains(&record.category_id) {
                    return false;
                }
            }
            if let Some(value) = field.value(record) {
                let trimmed = value.trim();
                if !trimmed.is_empty() && trimmed.to_lowercase().contains(&query_lower) {
                    if seen_raw.insert(trimmed.to_string()) {
                        distinct_raw.push(trimmed.to_string());
                    }
                }
            }
            false
        })?;

        // Case-insensitive dedup, first-seen casing wins
        let mut seen_lower: HashSet<String> = HashSet::new();
        let mut suggestions: Vec<Suggestion> = Vec::new();
        for value in distinct_raw {
            let lower = value.to_lowercase();
            if seen_lower.insert(lower) {
                suggestions.push(Suggestion {
                    text: value,
                    field,
                });
                if suggestions.len() >= limit {
                    break;
                }
            }
        }

        // Prefix matches sort before substring matches; ascending lowercase
        // order within each group
        suggestions.sort_by(|a, b| {
            let a_lower = a.text.to_lowercase();
            let b_lower = b.text.to_lowercase();
            let a_group = usize::from(!a_lower.starts_with(&query_lower));
            let b_group = usize::from(!b_lower.starts_with(&query_lower));
            a_group.cmp(&b_group).then(a_lower.cmp(&b_lower))
        });

        Ok(suggestions)
    }

    /// Inline scope resolution, computed per call rather than via the full
    /// descendant resolver: a leaf area is itself; a sub-region adds its
    /// children; a region adds children and grandchildren. Unknown ids drop
    /// the filter.
    fn resolve_inline_scope(
        &self,
        scope: Option<SuggestScope>,
    ) -> Result<Option<HashSet<CategoryId>>> {
        let scope = match scope {
            Some(s) => s,
            None => return Ok(None),
        };

        match scope {
            SuggestScope::LocalArea(id) => Ok(Some([id].into_iter().collect())),
            SuggestScope::SubRegion(id) => {
                if self.store.get_category(&id)?.is_none() {
                    return Ok(None);
                }
                let mut ids: HashSet<CategoryId> = [id].into_iter().collect();
                for child in self.store.categories_by_parent(Some(id))? {
                    ids.insert(child.id);
                }
                Ok(Some(ids))
            }
            SuggestScope::Region(id) => {
                if self.store.get_category(&id)?.is_none() {
                    return Ok(None);
                }
                let mut ids: HashSet<CategoryId> = [id].into_iter().collect();
                for child in self.store.categories_by_parent(Some(id))? {
                    ids.insert(child.id);
                    for grandchild in self.store.categories_by_parent(Some(child.id))? {
                        ids.insert(grandchild.id);
                    }
                }
                Ok(Some(ids))
            }
        }
    }
}
