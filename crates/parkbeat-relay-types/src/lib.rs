use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub mod errors;
pub mod events;
pub mod geo;
pub mod rooms;

use crate::errors::RelayError;

pub type RelayResult<T> = Result<T, RelayError>;

/// A subscription record without a ping for this long is stale.
pub const IDLE_EXPIRY_MS: i64 = 15_000;
/// A subscriber this far behind gets an opportunistic cleanup scheduled by readers.
pub const STALE_EXPIRY_MS: i64 = 20_000;
/// Re-subscribes younger than this skip the KV write to damp client resubscribe storms.
pub const RECENCY_WINDOW_MS: i64 = IDLE_EXPIRY_MS;
pub const HEARTBEAT_INTERVAL_MS: u64 = (IDLE_EXPIRY_MS / 3) as u64;
/// Cleanup queue entries older than this are dropped unconditionally.
pub const CLEANUP_ENTRY_TTL_MS: i64 = 24 * 60 * 60 * 1000;
pub const GEOHASH_PRECISION: usize = 9;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Server-assigned opaque connection identifier. Ephemeral, destroyed on disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SocketId(String);

impl SocketId {
    pub fn new() -> Self {
        SocketId(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SocketId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SocketId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SocketId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(SocketId(s.to_string()))
    }
}

impl From<&str> for SocketId {
    fn from(s: &str) -> Self {
        SocketId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Draft,
    Active,
    Funded,
    Completed,
    Archived,
}

impl Display for ProjectStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ProjectStatus::Draft => write!(f, "draft"),
            ProjectStatus::Active => write!(f, "active"),
            ProjectStatus::Funded => write!(f, "funded"),
            ProjectStatus::Completed => write!(f, "completed"),
            ProjectStatus::Archived => write!(f, "archived"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub materials_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labor_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permits_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_cents: Option<i64>,
}

/// A community project pinned to a map location. `geohash` is always derived
/// from `(lat, lng)`; location updates recompute it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub lat: f64,
    pub lng: f64,
    pub geohash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zoom: Option<f64>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_breakdown: Option<CostBreakdown>,
}

/// `setProject` payload: a project as the client knows it, without the
/// server-owned fields (timestamps, derived geohash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDraft {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zoom: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_breakdown: Option<CostBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectImage {
    pub id: String,
    pub project_id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSuggestion {
    pub id: String,
    pub project_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContributionKind {
    Funding,
    Social,
}

/// Append-only, deduplicated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectContribution {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub kind: ContributionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// `addContribution` payload: the row as the client proposes it. Like
/// [`ProjectDraft`], timestamps are server-owned; `created_at` is stamped by
/// the store on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionDraft {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub kind: ContributionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopContributor {
    pub user_id: String,
    pub amount_cents: i64,
}

/// Derived on read for every `projectData` emission, never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionSummary {
    pub total_amount_cents: i64,
    pub contributor_count: u64,
    pub top_contributors: Vec<TopContributor>,
    pub recent_contributions: Vec<ProjectContribution>,
}

/// The full per-project state delivered to `project:<id>` subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub project: Project,
    pub images: Vec<ProjectImage>,
    pub suggestions: Vec<ProjectSuggestion>,
    pub contribution_summary: ContributionSummary,
}

/// A far-away cell of projects collapsed into one marker for the initial
/// `subscribe` snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCluster {
    pub geohash: String,
    pub count: u64,
    pub lat: f64,
    pub lng: f64,
}
