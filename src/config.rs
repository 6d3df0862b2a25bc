use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::error::{CopilotError, Result};

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ModelPaths {
    pub fare_model: PathBuf,
    pub fare_meta: PathBuf,
    pub hotspot_model: PathBuf,
    pub hotspot_meta: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            fare_model: "taxi_fare_predictor.pt".into(),
            fare_meta: "taxi_fare_predictor.meta.json".into(),
            hotspot_model: "driver_hotspot_classifier.pt".into(),
            hotspot_meta: "driver_hotspot_classifier.meta.json".into(),
        }
    }
}

impl ModelPaths {
    pub fn all(&self) -> [&Path; 4] {
        [
            self.fare_model.as_path(),
            self.fare_meta.as_path(),
            self.hotspot_model.as_path(),
            self.hotspot_meta.as_path(),
        ]
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub models: ModelPaths,
    /// Max remembered map sessions before the least recently used is dropped.
    pub session_capacity: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            models: ModelPaths::default(),
            session_capacity: crate::session::DEFAULT_CAPACITY,
        }
    }
}

impl ServiceConfig {
    /// Reads a JSON config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| {
            CopilotError::invalid("COPILOT_CONFIG", format!("{}: {e}", path.display()))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            CopilotError::invalid("COPILOT_CONFIG", format!("invalid config JSON: {e}"))
        })
    }

    /// File named by `COPILOT_CONFIG` (if any), then env overrides.
    pub fn from_env() -> Result<Self> {
        let base = match std::env::var("COPILOT_CONFIG") {
            Ok(p) => Self::load(Path::new(&p))?,
            Err(_) => Self::default(),
        };
        base.with_overrides(|k| std::env::var(k).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(host) = var("HOST") {
            self.host = host;
        }
        if let Some(port) = var("PORT") {
            self.port = port
                .parse()
                .map_err(|_| CopilotError::invalid("PORT", format!("{port:?} is not a port")))?;
        }
        if let Some(cap) = var("SESSION_CAPACITY") {
            self.session_capacity = cap.parse().map_err(|_| {
                CopilotError::invalid("SESSION_CAPACITY", format!("{cap:?} is not a count"))
            })?;
        }
        if let Some(p) = var("FARE_MODEL_PATH") {
            self.models.fare_model = p.into();
        }
        if let Some(p) = var("FARE_META_PATH") {
            self.models.fare_meta = p.into();
        }
        if let Some(p) = var("HOTSPOT_MODEL_PATH") {
            self.models.hotspot_model = p.into();
        }
        if let Some(p) = var("HOTSPOT_META_PATH") {
            self.models.hotspot_meta = p.into();
        }
        Ok(self)
    }
}
