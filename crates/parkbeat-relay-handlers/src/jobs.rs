use parkbeat_relay_appstate::AppState;
use parkbeat_relay_types::errors::RelayError;
use parkbeat_relay_types::events::{ImageValidationResult, ServerEvent, ValidateImageRequest};
use parkbeat_relay_types::{RelayResult, SocketId};
use tracing::warn;

use crate::project::retry_once;

/// Accepts the request and hands it to a detached job. The job survives the
/// requesting socket: it completes and publishes to the project room, where
/// current subscribers see it live and later ones pick the state up from the
/// snapshot path.
pub async fn validate_image(
    state: &AppState,
    _socket_id: &SocketId,
    request: ValidateImageRequest,
) -> RelayResult<()> {
    retry_once(|| state.store.get_project(&request.project_id))
        .await?
        .ok_or_else(|| RelayError::ProjectNotFound(request.project_id.clone()))?;

    let state = state.clone();
    tokio::spawn(async move {
        let result = run_validation(&request);
        let project_id = result.project_id.clone();
        if let Err(e) = state
            .fanout
            .fanout_project(&project_id, &ServerEvent::ImageValidation(result), None)
            .await
        {
            warn!("Publishing image validation for {project_id} failed: {e}");
        }
    });
    Ok(())
}

/// Contract stub for the vision pipeline: only the structural checks the
/// relay can do itself. The full analysis lives in the image service and
/// flows back through the same `imageValidation` frame.
fn run_validation(request: &ValidateImageRequest) -> ImageValidationResult {
    let source_ok = request.image_source.starts_with("https://")
        || request.image_source.starts_with("data:image/");
    ImageValidationResult {
        project_id: request.project_id.clone(),
        fundraiser_id: request.fundraiser_id.clone(),
        request_id: request.request_id.clone(),
        valid: source_ok,
        reason: (!source_ok).then(|| "unsupported image source".to_string()),
    }
}
