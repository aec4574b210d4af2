//! Turn a registry entry into an invocable model

use crate::error::{PipelineError, Result};
use crate::models::{ForecastModel, ModelBlob, ModelFamily};
use crate::records::ModelDescriptor;
use std::path::Path;
use tracing::{debug, warn};

/// Decode a model from its stored blob, or from the legacy file path when no
/// blob is present
pub async fn load_model(blob: Option<&[u8]>, path: Option<&Path>) -> Result<ModelBlob> {
    let bytes = match (blob, path) {
        (Some(bytes), _) => bytes.to_vec(),
        (None, Some(path)) => {
            debug!(path = %path.display(), "Loading model from legacy path");
            tokio::fs::read(path).await.map_err(|e| {
                PipelineError::ModelLoad(format!("cannot read {}: {}", path.display(), e))
            })?
        }
        (None, None) => {
            return Err(PipelineError::ModelLoad("no model blob or path".to_string()));
        }
    };

    tokio::task::spawn_blocking(move || ModelBlob::decode(&bytes))
        .await
        .map_err(|e| PipelineError::ModelLoad(format!("decode task failed: {}", e)))?
        .map_err(|e| PipelineError::ModelLoad(e.to_string()))
}

/// Load the model for a registry entry and check it against the declared
/// family
pub async fn load_for(descriptor: &ModelDescriptor) -> Result<ModelBlob> {
    let model = load_model(
        descriptor.model_blob.as_deref(),
        descriptor.model_path.as_deref().map(Path::new),
    )
    .await?;

    match descriptor.model_type.parse::<ModelFamily>() {
        Ok(declared) if declared != model.family() => warn!(
            model_id = descriptor.model_id,
            declared = %declared,
            loaded = %model.family(),
            "Registry model type does not match the stored model"
        ),
        Ok(_) => {}
        Err(e) => warn!(model_id = descriptor.model_id, error = %e, "Unrecognized registry model type"),
    }

    Ok(model)
}
