//! Session file endpoints: listing, download, removal and read-back.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::api::envelope::ApiErrorResponse;
use crate::config::defaults::SESSION_FILE_EXTENSION;
use crate::pipeline::AppContext;
use crate::storage::{disk_capacity, FileAccessError, MeasurementFileDetails, SessionFileContents};
use crate::types::DiskCapacity;

#[derive(Debug, Serialize)]
pub struct FileListResponse {
    pub capacity: DiskCapacity,
    pub files: Vec<MeasurementFileDetails>,
    pub directory: String,
}

#[derive(Debug, Serialize)]
pub struct Dataset {
    pub name: String,
    pub data: Vec<f32>,
}

/// Stored samples of one session file, one dataset per channel.
#[derive(Debug, Serialize)]
pub struct ParsedMeasurement {
    pub name: String,
    pub counter: Vec<u8>,
    pub timestamp: Vec<f64>,
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Serialize)]
pub struct ParsedMetadata {
    pub name: String,
    pub channel_count: usize,
    pub sample_count: usize,
    /// `null` for a file whose session never closed it.
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

fn file_error(name: &str, e: FileAccessError) -> Response {
    match e {
        e if e.is_rejected_name() => {
            warn!(file = %name, "Refused file request: {}", e);
            ApiErrorResponse::method_not_allowed(format!("Method not allowed: {e}"))
        }
        FileAccessError::NotFound => ApiErrorResponse::not_found("File not found"),
        e => {
            error!(file = %name, "File request failed: {}", e);
            ApiErrorResponse::internal(e.to_string())
        }
    }
}

/// Dataset names from the stored sensor list, positional names otherwise.
fn dataset_names(contents: &SessionFileContents) -> Vec<String> {
    let sensor_ids: Vec<String> = contents
        .metadata
        .as_ref()
        .and_then(|m| m.get("sensors"))
        .and_then(serde_json::Value::as_array)
        .map(|sensors| {
            sensors
                .iter()
                .filter_map(|s| s["sensor_id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    if sensor_ids.len() == contents.channel_count {
        sensor_ids
    } else {
        (1..=contents.channel_count).map(|i| format!("channel_{i}")).collect()
    }
}

/// GET /api/v1/files - session files plus disk capacity
pub async fn list_files(State(ctx): State<AppContext>) -> Response {
    match ctx.files.list().await {
        Ok(files) => Json(FileListResponse {
            capacity: disk_capacity(ctx.files.dir()),
            files,
            directory: ctx.files.dir().display().to_string(),
        })
        .into_response(),
        Err(e) => {
            error!(dir = %ctx.files.dir().display(), "Failed to list session files: {}", e);
            ApiErrorResponse::internal(e.to_string())
        }
    }
}

/// GET /api/v1/files/:name - download
pub async fn download_file(State(ctx): State<AppContext>, Path(name): Path<String>) -> Response {
    match ctx.files.read_bytes(&name).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{name}\""),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => file_error(&name, e),
    }
}

/// DELETE /api/v1/files/:name
///
/// The file of the running session cannot be deleted.
pub async fn delete_file(State(ctx): State<AppContext>, Path(name): Path<String>) -> Response {
    if let Some(active) = ctx.registry.status().await.name {
        if name == format!("{active}.{SESSION_FILE_EXTENSION}") {
            return ApiErrorResponse::conflict(format!(
                "File '{name}' belongs to the running measurement"
            ));
        }
    }
    match ctx.files.delete(&name).await {
        Ok(()) => {
            info!(file = %name, "Session file deleted on request");
            Json(serde_json::json!({ "detail": format!("File '{name}' deleted successfully") }))
                .into_response()
        }
        Err(e) => file_error(&name, e),
    }
}

/// GET /api/v1/files/analyze/:name - decoded samples
pub async fn analyze_file(State(ctx): State<AppContext>, Path(name): Path<String>) -> Response {
    match ctx.files.decode(&name).await {
        Ok(contents) => {
            let names = dataset_names(&contents);
            let SessionFileContents {
                timestamps,
                counters,
                channels,
                ..
            } = contents;
            let datasets = names
                .into_iter()
                .zip(channels)
                .map(|(name, data)| Dataset { name, data })
                .collect();
            Json(ParsedMeasurement {
                name,
                counter: counters,
                timestamp: timestamps,
                datasets,
            })
            .into_response()
        }
        Err(e) => file_error(&name, e),
    }
}

/// GET /api/v1/files/meta/:name - metadata trailer
pub async fn file_meta(State(ctx): State<AppContext>, Path(name): Path<String>) -> Response {
    match ctx.files.decode(&name).await {
        Ok(contents) => Json(ParsedMetadata {
            channel_count: contents.channel_count,
            sample_count: contents.timestamps.len(),
            metadata: contents.metadata,
            name,
        })
        .into_response(),
        Err(e) => file_error(&name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(channel_count: usize, meta: Option<serde_json::Value>) -> SessionFileContents {
        SessionFileContents {
            channel_count,
            channels: vec![Vec::new(); channel_count],
            metadata: meta.and_then(|m| m.as_object().cloned()),
            ..SessionFileContents::default()
        }
    }

    #[test]
    fn test_dataset_names_from_sensor_list() {
        let meta = serde_json::json!({
            "sensors": [{ "sensor_id": "acc100g_01" }, { "sensor_id": "acc40g_z" }]
        });
        assert_eq!(dataset_names(&contents(2, Some(meta))), ["acc100g_01", "acc40g_z"]);
    }

    #[test]
    fn test_dataset_names_fall_back_to_positions() {
        assert_eq!(dataset_names(&contents(2, None)), ["channel_1", "channel_2"]);
        let mismatched = serde_json::json!({ "sensors": [{ "sensor_id": "only_one" }] });
        assert_eq!(
            dataset_names(&contents(2, Some(mismatched))),
            ["channel_1", "channel_2"]
        );
    }
}
