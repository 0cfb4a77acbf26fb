//! # Voter Registry Search Service
//!
//! ## Overview
//! This library implements a searchable, hierarchically organized registry of
//! voter records grouped under a multi-level geographic category tree
//! (district → upazila → union → voter area).
//!
//! ## Architecture
//! The system is composed of several key modules:
//! - `storage`: Embedded record store for voters, categories and audit entries
//! - `category`: Category tree queries and descendant scope resolution
//! - `search`: Ranked multi-field search engine with relevance scoring
//! - `suggest`: Deduplicated field-specific autocomplete suggestions
//! - `rate_limit`: Per-client request quotas over a rolling window
//! - `audit`: Append-only voter status transition trail
//! - `api`: REST API endpoints
//! - `config`: Configuration management and settings
//! - `errors`: Centralized error handling and types
//!
//! ## Input/Output Specification
//! - **Input**: Search queries, category scope identifiers, status transitions
//! - **Output**: Ranked voter records, suggestion lists, audit histories
//! - **Performance**: Deterministic ordering, bounded result sizes
//!
//! ## Usage
//! ```rust,no_run
//! use voter_registry_search::{Config, storage::RecordStore, search::RelevanceSearchEngine};
//! use std::sync::Arc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config.toml")?;
//!     let store = Arc::new(RecordStore::new(config.storage.clone())?);
//!     let engine = RelevanceSearchEngine::new(store, config.search.clone());
//!     Ok(())
//! }
//! ```

// Core modules
pub mod audit;
pub mod category;
pub mod config;
pub mod errors;
pub mod rate_limit;
pub mod search;
pub mod storage;
pub mod suggest;

// API surface
pub mod api;

// Utilities
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use errors::{RegistryError, Result};
pub use search::{RelevanceSearchEngine, SearchRequest, SearchResponse};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for voter records
pub type VoterId = Uuid;

/// Trust level of the calling client; trusted callers present the configured
/// API key and receive higher result caps and quotas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerTrust {
    Public,
    Trusted,
}

/// Unique identifier for category nodes
pub type CategoryId = Uuid;

/// Voter gender, as recorded in the source data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Unknown => "unknown",
        }
    }
}

impl Default for Gender {
    fn default() -> Self {
        Gender::Unknown
    }
}

impl FromStr for Gender {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            "unknown" => Ok(Gender::Unknown),
            other => Err(RegistryError::validation(
                "gender",
                format!("unknown gender value: {other}"),
            )),
        }
    }
}

/// Voter status; the only field that mutates after record creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoterStatus {
    Present,
    Absent,
    Dead,
}

impl VoterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoterStatus::Present => "present",
            VoterStatus::Absent => "absent",
            VoterStatus::Dead => "dead",
        }
    }
}

impl Default for VoterStatus {
    fn default() -> Self {
        VoterStatus::Present
    }
}

impl FromStr for VoterStatus {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "present" => Ok(VoterStatus::Present),
            "absent" => Ok(VoterStatus::Absent),
            "dead" => Ok(VoterStatus::Dead),
            other => Err(RegistryError::validation(
                "status",
                format!("invalid status value: {other}"),
            )),
        }
    }
}

/// A node in the geographic category hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryNode {
    /// Store-assigned unique identifier
    pub id: CategoryId,
    /// Raw node name (often a numeric area code in source data)
    pub name: String,
    /// Derived short code; see [`derive_category_code`]
    pub code: Option<String>,
    /// Parent node, `None` for roots
    pub parent_id: Option<CategoryId>,
    /// Ancestor names joined with `/`, unique per node
    pub full_path: String,
    /// Distance from the nearest root; roots are level 0
    pub level: u32,
    /// True iff a leaf data source was attached under this node at import
    pub has_source_data: bool,
    pub created_at: DateTime<Utc>,
}

/// A single voter record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoterRecord {
    pub id: VoterId,
    /// Owning category node
    pub category_id: CategoryId,
    pub serial: Option<String>,
    pub name: Option<String>,
    pub voter_no: Option<String>,
    pub father: Option<String>,
    pub mother: Option<String>,
    pub profession: Option<String>,
    pub dob: Option<String>,
    pub address: Option<String>,
    pub gender: Gender,
    pub status: VoterStatus,
    /// Provenance: source file the record was imported from
    pub source_file: String,
    /// Unanticipated source columns, kept as-is
    pub extra_data: serde_json::Map<String, serde_json::Value>,
    /// Derived lowercase concatenation of the searchable fields;
    /// recomputed on every write, never independently authored
    pub search_text: String,
    pub created_at: DateTime<Utc>,
}

/// Input shape for bulk voter creation; the store assigns `id`,
/// `search_text` and `created_at`
#[derive(Debug, Clone, Default)]
pub struct NewVoter {
    pub category_id: CategoryId,
    pub serial: Option<String>,
    pub name: Option<String>,
    pub voter_no: Option<String>,
    pub father: Option<String>,
    pub mother: Option<String>,
    pub profession: Option<String>,
    pub dob: Option<String>,
    pub address: Option<String>,
    pub gender: Gender,
    pub status: VoterStatus,
    pub source_file: String,
    pub extra_data: serde_json::Map<String, serde_json::Value>,
}

/// Immutable record of one voter status transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusAuditEntry {
    pub id: Uuid,
    pub voter_id: VoterId,
    /// Actor identity; `None` when the actor is unknown or was deleted
    pub changed_by: Option<String>,
    pub old_status: VoterStatus,
    pub new_status: VoterStatus,
    pub remarks: Option<String>,
    /// Server-assigned, monotonically non-decreasing per voter
    pub changed_at: DateTime<Utc>,
    pub ip_address: Option<String>,
}

/// Combine the searchable fields into one lowercase text blob.
///
/// Field order matches the source data layout: serial, name, father, mother,
/// address, voter_no, profession. Empty fields are skipped.
pub fn compute_search_text(voter: &NewVoter) -> String {
    let parts = [
        voter.serial.as_deref(),
        voter.name.as_deref(),
        voter.father.as_deref(),
        voter.mother.as_deref(),
        voter.address.as_deref(),
        voter.voter_no.as_deref(),
        voter.profession.as_deref(),
    ];
    parts
        .iter()
        .filter_map(|p| *p)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Derive a category short code from the raw node name.
///
/// Source folder names are area codes like `1234567`; the first two digits
/// carry the district prefix and are stripped. Non-numeric or short names
/// have no code.
pub fn derive_category_code(name: &str) -> Option<String> {
    if name.len() > 2 && name.chars().all(|c| c.is_ascii_digit()) {
        Some(name[2..].to_string())
    } else {
        None
    }
}

/// Application state shared across request handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Config>,
    pub store: Arc<storage::RecordStore>,
    pub search_engine: Arc<search::RelevanceSearchEngine>,
    pub suggestion_engine: Arc<suggest::SuggestionEngine>,
    pub category_tree: Arc<category::CategoryTree>,
    pub rate_limiter: Arc<rate_limit::RateLimiter>,
    pub audit_trail: Arc<audit::StatusAuditTrail>,
}
