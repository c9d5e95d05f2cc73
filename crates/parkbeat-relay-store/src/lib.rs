use async_trait::async_trait;
use parkbeat_relay_types::{
    ContributionDraft, Project, ProjectContribution, ProjectDraft, ProjectImage, ProjectSnapshot,
    ProjectSuggestion, RelayResult,
};

pub mod clusters;
pub mod memory;
pub mod summary;

pub use memory::MemoryProjectStore;

/// Contract of the external relational store. The relay holds no authoritative
/// copy of any project; everything it fans out is read back through this
/// interface. Operations on distinct project ids are independent.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Insert or update. The store owns timestamps and the authoritative
    /// record; `geohash` is the derived cell for the draft's coordinates.
    async fn upsert_project(
        &self,
        draft: &ProjectDraft,
        geohash: &str,
        user_id: &str,
    ) -> RelayResult<Project>;

    async fn get_project(&self, id: &str) -> RelayResult<Option<Project>>;

    /// Removes the record, returning what was stored. The caller needs the
    /// previous record to walk its geohash during delete fan-out.
    async fn delete_project(&self, id: &str) -> RelayResult<Option<Project>>;

    /// All projects whose geohash starts with `prefix`.
    async fn projects_with_prefix(&self, prefix: &str) -> RelayResult<Vec<Project>>;

    async fn images(&self, project_id: &str) -> RelayResult<Vec<ProjectImage>>;

    async fn suggestions(&self, project_id: &str) -> RelayResult<Vec<ProjectSuggestion>>;

    async fn contributions(&self, project_id: &str) -> RelayResult<Vec<ProjectContribution>>;

    /// Append-only with dedup: when a contribution with the same id already
    /// exists, the stored row is returned unchanged. The store stamps
    /// `created_at` on insert.
    async fn add_contribution(&self, draft: &ContributionDraft)
    -> RelayResult<ProjectContribution>;

    /// The full per-project state embedded in every `projectData` emission.
    /// The contribution summary is recomputed on every call.
    async fn snapshot(&self, project_id: &str) -> RelayResult<Option<ProjectSnapshot>> {
        let Some(project) = self.get_project(project_id).await? else {
            return Ok(None);
        };
        let images = self.images(project_id).await?;
        let suggestions = self.suggestions(project_id).await?;
        let contributions = self.contributions(project_id).await?;
        Ok(Some(ProjectSnapshot {
            project,
            images,
            suggestions,
            contribution_summary: summary::summarize(&contributions),
        }))
    }
}
