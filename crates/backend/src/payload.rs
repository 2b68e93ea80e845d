//! Construction of the per-task submission payload.
//!
//! The operator supplies one settings template for the whole run. Each
//! task's animation schedule is embedded into a copy of it, with backend
//! auto-scheduling switched off so the embedded schedule is authoritative.

use std::path::Path;

use serde_json::{json, Map, Value};

use framefarm_core::error::DispatchError;
use framefarm_core::naming;

use crate::messages::BatchRequest;

/// Settings key carrying the serialized animation schedule.
pub const SCHEDULE_KEY: &str = "parseq_manifest";

/// Settings key that makes the embedded schedule override backend defaults.
pub const SCHEDULE_OVERRIDES_KEY: &str = "parseq_non_schedule_overrides";

/// Settings key naming the batch (and therefore its output directory).
pub const BATCH_NAME_KEY: &str = "batch_name";

/// Render settings shared by every task of a run.
#[derive(Debug, Clone)]
pub struct SettingsTemplate {
    settings: Map<String, Value>,
}

impl SettingsTemplate {
    /// Wrap an already-parsed settings document. It must be a JSON object.
    pub fn from_value(value: Value) -> Result<Self, DispatchError> {
        match value {
            Value::Object(settings) => Ok(Self { settings }),
            other => Err(DispatchError::Configuration(format!(
                "settings template must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Read and parse the settings template from disk.
    pub async fn load(path: &Path) -> Result<Self, DispatchError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| DispatchError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let value: Value = serde_json::from_str(&raw).map_err(|e| {
            DispatchError::Configuration(format!(
                "settings template {} is not valid JSON: {e}",
                path.display()
            ))
        })?;
        Self::from_value(value)
    }

    /// Merge `schedule` into a copy of the template for task number `n`.
    pub fn render_for(&self, n: usize, schedule: &Value) -> Result<Value, DispatchError> {
        let manifest = serde_json::to_string(schedule).map_err(|e| {
            DispatchError::Configuration(format!("schedule for task {n} cannot be serialized: {e}"))
        })?;

        let mut settings = self.settings.clone();
        settings.insert(SCHEDULE_KEY.to_string(), Value::String(manifest));
        settings.insert(SCHEDULE_OVERRIDES_KEY.to_string(), Value::Bool(true));
        settings.insert(
            BATCH_NAME_KEY.to_string(),
            Value::String(naming::batch_name(n)),
        );
        Ok(Value::Object(settings))
    }

    /// Build the full batch submission for task number `n`.
    pub fn batch_request(&self, n: usize, schedule: &Value) -> Result<BatchRequest, DispatchError> {
        Ok(BatchRequest {
            job_configs: vec![self.render_for(n, schedule)?],
            option_overrides: default_option_overrides(),
        })
    }
}

/// Option overrides sent with every batch: keep the per-frame generation
/// info next to the rendered video.
pub fn default_option_overrides() -> Value {
    json!({
        "deforum_save_gen_info_as_srt": true,
        "deforum_save_gen_info_as_srt_params": {},
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
