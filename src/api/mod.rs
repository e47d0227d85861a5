//! Route handlers, grouped by feature.
//!
//! Handlers validate request shape, call into the orchestrators or
//! persistence modules, and return JSON. Every failure is a
//! [`GatewayError`](crate::error::GatewayError), rendered by its
//! `IntoResponse` impl.

pub mod chat;
pub mod rag;
pub mod speech;
pub mod translate;
pub mod vision;
pub mod voice;

use axum::extract::{multipart::MultipartRejection, Multipart};
use axum::Json;
use std::collections::HashMap;

use crate::error::{GatewayError, GatewayResult};
use crate::history::{self, HistoryKind};
use crate::server::AppState;

/// A file part from a multipart form.
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// A multipart form read fully into memory: file parts by field name and
/// plain text fields by name.
#[derive(Default)]
pub struct FormData {
    files: HashMap<String, UploadedFile>,
    fields: HashMap<String, String>,
}

impl FormData {
    pub async fn read(multipart: Result<Multipart, MultipartRejection>) -> GatewayResult<Self> {
        let mut multipart =
            multipart.map_err(|e| GatewayError::invalid(format!("Invalid multipart payload: {}", e.body_text())))?;
        let mut form = FormData::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(String::from) {
                Some(filename) => {
                    let bytes = field.bytes().await?.to_vec();
                    form.files.insert(name, UploadedFile { filename, bytes });
                }
                None => {
                    let value = field.text().await?;
                    form.fields.insert(name, value);
                }
            }
        }
        Ok(form)
    }

    /// Takes a required file part.
    pub fn file(&mut self, name: &str) -> GatewayResult<UploadedFile> {
        let file = self
            .files
            .remove(name)
            .ok_or_else(|| GatewayError::invalid(format!("Missing file field '{}'", name)))?;
        if file.bytes.is_empty() {
            return Err(GatewayError::invalid(format!("File field '{}' is empty", name)));
        }
        Ok(file)
    }

    /// A text field, `None` when absent or blank.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(String::from)
    }

    pub fn parsed<T: std::str::FromStr>(&self, name: &str) -> GatewayResult<Option<T>> {
        match self.text(name) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|_| GatewayError::invalid(format!("Invalid value for '{}': {}", name, raw))),
        }
    }
}

/// Playback speed for synthesis, `1.0` when absent.
pub(crate) fn speech_speed(speed: Option<f64>) -> GatewayResult<f64> {
    let speed = speed.unwrap_or(1.0);
    if !(speed.is_finite() && speed > 0.0) {
        return Err(GatewayError::invalid("speed must be a positive number"));
    }
    Ok(speed)
}

/// Deletes a history row, then its media file if it had one.
pub(crate) async fn delete_history_row(
    state: &AppState,
    kind: HistoryKind,
    id: i64,
) -> GatewayResult<Json<serde_json::Value>> {
    if let Some(url) = history::delete(&state.pool, kind, id).await? {
        state.media.remove_url(&url).await;
    }
    Ok(Json(serde_json::json!({ "message": "History entry deleted successfully" })))
}
