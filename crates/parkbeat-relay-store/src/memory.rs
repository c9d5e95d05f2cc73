use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parkbeat_relay_types::errors::RelayError;
use parkbeat_relay_types::{
    ContributionDraft, Project, ProjectContribution, ProjectDraft, ProjectImage,
    ProjectSuggestion, RelayResult,
};
use tracing::debug;

use super::ProjectStore;

/// Reference in-process backend for the project-store contract, used by the
/// memory run mode and the test suites. The production deployment points the
/// same trait at the relational store.
#[derive(Default)]
pub struct MemoryProjectStore {
    projects: DashMap<String, Project>,
    images: DashMap<String, Vec<ProjectImage>>,
    suggestions: DashMap<String, Vec<ProjectSuggestion>>,
    contributions: DashMap<String, Vec<ProjectContribution>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/fixture hook; in production images arrive through the image
    /// pipeline, not the relay.
    pub fn insert_image(&self, image: ProjectImage) {
        self.images
            .entry(image.project_id.clone())
            .or_default()
            .push(image);
    }

    pub fn insert_suggestion(&self, suggestion: ProjectSuggestion) {
        self.suggestions
            .entry(suggestion.project_id.clone())
            .or_default()
            .push(suggestion);
    }

    pub fn project_count(&self) -> usize {
        self.projects.len()
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn upsert_project(
        &self,
        draft: &ProjectDraft,
        geohash: &str,
        user_id: &str,
    ) -> RelayResult<Project> {
        let now = Utc::now();
        let project = match self.projects.get(&draft.id) {
            Some(existing) => Project {
                id: draft.id.clone(),
                name: draft.name.clone(),
                description: draft.description.clone(),
                status: draft.status,
                lat: draft.lat,
                lng: draft.lng,
                geohash: geohash.to_string(),
                heading: draft.heading,
                pitch: draft.pitch,
                zoom: draft.zoom,
                created_by: existing.created_by.clone(),
                updated_by: user_id.to_string(),
                created_at: existing.created_at,
                updated_at: now,
                cost_breakdown: draft.cost_breakdown.clone(),
            },
            None => Project {
                id: draft.id.clone(),
                name: draft.name.clone(),
                description: draft.description.clone(),
                status: draft.status,
                lat: draft.lat,
                lng: draft.lng,
                geohash: geohash.to_string(),
                heading: draft.heading,
                pitch: draft.pitch,
                zoom: draft.zoom,
                created_by: user_id.to_string(),
                updated_by: user_id.to_string(),
                created_at: now,
                updated_at: now,
                cost_breakdown: draft.cost_breakdown.clone(),
            },
        };
        debug!("Upserted project {} at {}", project.id, project.geohash);
        self.projects.insert(project.id.clone(), project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: &str) -> RelayResult<Option<Project>> {
        Ok(self.projects.get(id).map(|p| p.clone()))
    }

    async fn delete_project(&self, id: &str) -> RelayResult<Option<Project>> {
        self.images.remove(id);
        self.suggestions.remove(id);
        self.contributions.remove(id);
        Ok(self.projects.remove(id).map(|(_, p)| p))
    }

    async fn projects_with_prefix(&self, prefix: &str) -> RelayResult<Vec<Project>> {
        let mut matches: Vec<Project> = self
            .projects
            .iter()
            .filter(|p| p.geohash.starts_with(prefix))
            .map(|p| p.clone())
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches)
    }

    async fn images(&self, project_id: &str) -> RelayResult<Vec<ProjectImage>> {
        Ok(self
            .images
            .get(project_id)
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn suggestions(&self, project_id: &str) -> RelayResult<Vec<ProjectSuggestion>> {
        Ok(self
            .suggestions
            .get(project_id)
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn contributions(&self, project_id: &str) -> RelayResult<Vec<ProjectContribution>> {
        Ok(self
            .contributions
            .get(project_id)
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn add_contribution(
        &self,
        draft: &ContributionDraft,
    ) -> RelayResult<ProjectContribution> {
        if !self.projects.contains_key(&draft.project_id) {
            return Err(RelayError::ProjectNotFound(draft.project_id.clone()));
        }
        let mut rows = self
            .contributions
            .entry(draft.project_id.clone())
            .or_default();
        if let Some(existing) = rows.iter().find(|c| c.id == draft.id) {
            return Ok(existing.clone());
        }
        let contribution = ProjectContribution {
            id: draft.id.clone(),
            project_id: draft.project_id.clone(),
            user_id: draft.user_id.clone(),
            kind: draft.kind,
            amount_cents: draft.amount_cents,
            message: draft.message.clone(),
            created_at: Utc::now(),
        };
        rows.push(contribution.clone());
        Ok(contribution)
    }
}
