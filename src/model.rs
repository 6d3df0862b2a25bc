use anyhow::{bail, Context};
use serde::Deserialize;
use std::{fs, path::Path, sync::Arc};
use tch::{kind::Kind, CModule, Device, Tensor};

use crate::config::ModelPaths;
use crate::error::{CopilotError, Result};
use crate::features::{FareFeatures, HotspotFeatures};

/// Regression model: feature row -> fare in dollars.
pub trait FareModel: Send + Sync {
    fn predict(&self, features: &FareFeatures) -> anyhow::Result<f64>;
}

/// Binary classifier: class 1 is a hotspot, class 0 a coldspot.
pub trait HotspotModel: Send + Sync {
    /// `[p_coldspot, p_hotspot]`
    fn predict_proba(&self, features: &HotspotFeatures) -> anyhow::Result<[f64; 2]>;

    /// Argmax of `predict_proba`.
    fn predict(&self, features: &HotspotFeatures) -> anyhow::Result<u8> {
        Ok(argmax_class(self.predict_proba(features)?))
    }
}

/// Class with the higher probability; ties go to class 0.
pub fn argmax_class([p0, p1]: [f64; 2]) -> u8 {
    u8::from(p1 > p0)
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    #[default]
    Logits,
    Probabilities,
}

// Sidecar written next to each exported TorchScript module.
#[derive(Deserialize, Debug)]
pub struct MetaJson {
    pub feat_list: Vec<String>,
    pub in_dim: Option<usize>,
    #[serde(default)]
    pub output: OutputKind,
}

/// Reads a sidecar and checks its `feat_list` against the columns this crate derives.
pub fn read_meta(meta_path: &Path, expected: &[&str]) -> Result<MetaJson> {
    let meta_txt = fs::read_to_string(meta_path)
        .map_err(|e| CopilotError::model_load(meta_path, e.to_string()))?;
    let meta: MetaJson = serde_json::from_str(&meta_txt)
        .map_err(|e| CopilotError::model_load(meta_path, format!("bad meta json: {e}")))?;

    if meta.feat_list.iter().map(String::as_str).ne(expected.iter().copied()) {
        return Err(CopilotError::model_load(
            meta_path,
            format!(
                "feature schema mismatch: model expects {:?}, service derives {:?}",
                meta.feat_list, expected
            ),
        ));
    }
    if let Some(in_dim) = meta.in_dim {
        if in_dim != meta.feat_list.len() {
            return Err(CopilotError::model_load(
                meta_path,
                format!("in_dim {} != feat_list.len() {}", in_dim, meta.feat_list.len()),
            ));
        }
    }
    Ok(meta)
}

struct TorchModule {
    module: CModule,
    device: Device,
    in_dim: usize,
}

impl TorchModule {
    fn load(model_path: &Path, in_dim: usize) -> Result<Self> {
        let device = Device::Cpu;
        let module = CModule::load_on_device(model_path, device)
            .map_err(|e| CopilotError::model_load(model_path, format!("bad TorchScript: {e}")))?;
        Ok(Self {
            module,
            device,
            in_dim,
        })
    }

    fn forward(&self, x: &[f32]) -> anyhow::Result<Tensor> {
        if x.len() != self.in_dim {
            bail!(
                "feature length mismatch: got {}, expected {}",
                x.len(),
                self.in_dim
            );
        }
        let input = Tensor::from_slice(x)
            .reshape([1, self.in_dim as i64])
            .to_device(self.device);
        let out = self
            .module
            .forward_ts(&[input])
            .context("forward pass failed")?;
        Ok(out)
    }
}

pub struct TorchFareModel {
    inner: TorchModule,
}

impl TorchFareModel {
    pub fn new(model_path: &Path, meta_path: &Path) -> Result<Self> {
        let meta = read_meta(meta_path, &FareFeatures::COLUMNS)?;
        let inner = TorchModule::load(model_path, meta.feat_list.len())?;
        Ok(Self { inner })
    }
}

impl FareModel for TorchFareModel {
    fn predict(&self, features: &FareFeatures) -> anyhow::Result<f64> {
        let t = self.inner.forward(&features.to_vec())?;
        fare_value(&t)
    }
}

fn fare_value(t: &Tensor) -> anyhow::Result<f64> {
    if t.numel() != 1 {
        bail!("regression output should hold one value, got shape {:?}", t.size());
    }
    Ok(t.reshape([1]).to_kind(Kind::Double).double_value(&[0]))
}

pub struct TorchHotspotModel {
    inner: TorchModule,
    output: OutputKind,
}

impl TorchHotspotModel {
    pub fn new(model_path: &Path, meta_path: &Path) -> Result<Self> {
        let meta = read_meta(meta_path, &HotspotFeatures::COLUMNS)?;
        let inner = TorchModule::load(model_path, meta.feat_list.len())?;
        Ok(Self {
            inner,
            output: meta.output,
        })
    }
}

impl HotspotModel for TorchHotspotModel {
    fn predict_proba(&self, features: &HotspotFeatures) -> anyhow::Result<[f64; 2]> {
        let t = self.inner.forward(&features.to_vec())?;
        class_probs(&t, self.output)
    }
}

fn class_probs(t: &Tensor, output: OutputKind) -> anyhow::Result<[f64; 2]> {
    let sz = t.size();
    if sz != [1, 2] {
        bail!("unexpected classifier output size: {:?}", sz);
    }
    let probs = match output {
        OutputKind::Logits => t.softmax(1, Kind::Double),
        OutputKind::Probabilities => t.to_kind(Kind::Double),
    };
    Ok([probs.double_value(&[0, 0]), probs.double_value(&[0, 1])])
}

/// Both models, loaded once at startup and shared for the life of the process.
#[derive(Clone)]
pub struct ModelRegistry {
    pub fare: Arc<dyn FareModel>,
    pub hotspot: Arc<dyn HotspotModel>,
}

impl ModelRegistry {
    /// Loads both models or neither. Every artifact is checked for existence
    /// before anything is loaded, so the error names the file that is missing.
    pub fn load(paths: &ModelPaths) -> Result<Self> {
        for p in paths.all() {
            if !p.is_file() {
                return Err(CopilotError::model_load(p, "file not found"));
            }
        }

        let fare = TorchFareModel::new(&paths.fare_model, &paths.fare_meta)?;
        tracing::info!(
            "loaded fare model {}; feat_list[{}]: {:?}",
            paths.fare_model.display(),
            FareFeatures::COLUMNS.len(),
            FareFeatures::COLUMNS
        );
        let hotspot = TorchHotspotModel::new(&paths.hotspot_model, &paths.hotspot_meta)?;
        tracing::info!(
            "loaded hotspot model {} (output={:?}); feat_list[{}]: {:?}",
            paths.hotspot_model.display(),
            hotspot.output,
            HotspotFeatures::COLUMNS.len(),
            HotspotFeatures::COLUMNS
        );

        // Warmup: input width and output shape must both match what predict decodes
        fare.inner
            .forward(&[0.0_f32; FareFeatures::COLUMNS.len()])
            .and_then(|t| fare_value(&t))
            .map_err(|e| CopilotError::model_load(&paths.fare_model, format!("warmup: {e:#}")))?;
        hotspot
            .inner
            .forward(&[0.0_f32; HotspotFeatures::COLUMNS.len()])
            .and_then(|t| class_probs(&t, hotspot.output))
            .map_err(|e| {
                CopilotError::model_load(&paths.hotspot_model, format!("warmup: {e:#}"))
            })?;
        tracing::info!("warmup forward ok");

        Ok(Self {
            fare: Arc::new(fare),
            hotspot: Arc::new(hotspot),
        })
    }

    pub fn from_models(fare: Arc<dyn FareModel>, hotspot: Arc<dyn HotspotModel>) -> Self {
        Self { fare, hotspot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let p = dir.path().join(name);
        fs::write(&p, body).unwrap();
        p
    }

    #[test]
    fn test_meta_matching_schema_accepted() {
        let dir = TempDir::new().unwrap();
        let body = serde_json::json!({ "feat_list": HotspotFeatures::COLUMNS, "in_dim": 5 });
        let p = write(&dir, "hot.meta.json", &body.to_string());
        let meta = read_meta(&p, &HotspotFeatures::COLUMNS).unwrap();
        assert_eq!(meta.output, OutputKind::Logits);
    }

    #[test]
    fn test_meta_reordered_columns_rejected() {
        let dir = TempDir::new().unwrap();
        let mut cols = HotspotFeatures::COLUMNS.to_vec();
        cols.swap(0, 1);
        let body = serde_json::json!({ "feat_list": cols, "output": "probabilities" });
        let p = write(&dir, "hot.meta.json", &body.to_string());
        let err = read_meta(&p, &HotspotFeatures::COLUMNS).unwrap_err();
        assert!(err.to_string().contains("feature schema mismatch"), "{err}");
    }

    #[test]
    fn test_meta_in_dim_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let body = serde_json::json!({ "feat_list": FareFeatures::COLUMNS, "in_dim": 12 });
        let p = write(&dir, "fare.meta.json", &body.to_string());
        assert!(read_meta(&p, &FareFeatures::COLUMNS).is_err());
    }

    struct Fixed([f64; 2]);

    impl HotspotModel for Fixed {
        fn predict_proba(&self, _: &HotspotFeatures) -> anyhow::Result<[f64; 2]> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_predict_is_argmax_of_proba() {
        let f = HotspotFeatures {
            pickup_longitude: -73.98,
            pickup_latitude: 40.75,
            pickup_hour: 19,
            pickup_day_of_week: 4,
            is_weekend: 0,
        };
        assert_eq!(Fixed([0.2, 0.8]).predict(&f).unwrap(), 1);
        assert_eq!(Fixed([0.7, 0.3]).predict(&f).unwrap(), 0);
        assert_eq!(Fixed([0.5, 0.5]).predict(&f).unwrap(), 0);
    }

    #[test]
    fn test_torch_models_shared_without_lock() {
        fn shared<T: Send + Sync>() {}
        shared::<TorchModule>();
        shared::<TorchFareModel>();
        shared::<TorchHotspotModel>();
    }

    #[test]
    fn test_fare_output_must_be_single_value() {
        let one = Tensor::from_slice(&[12.5_f32]).reshape([1, 1]);
        assert_eq!(fare_value(&one).unwrap(), 12.5);

        let many = Tensor::from_slice(&[1.0_f32, 2.0, 3.0]).reshape([1, 3]);
        let err = fare_value(&many).unwrap_err();
        assert!(err.to_string().contains("one value"), "{err}");
    }

    #[test]
    fn test_classifier_output_must_be_one_by_two() {
        let logits = Tensor::from_slice(&[0.0_f32, 0.0]).reshape([1, 2]);
        let [p0, p1] = class_probs(&logits, OutputKind::Logits).unwrap();
        assert!((p0 - 0.5).abs() < 1e-9 && (p1 - 0.5).abs() < 1e-9);

        let probs = Tensor::from_slice(&[0.25_f32, 0.75]).reshape([1, 2]);
        assert_eq!(class_probs(&probs, OutputKind::Probabilities).unwrap(), [0.25, 0.75]);

        let wide = Tensor::from_slice(&[0.1_f32, 0.2, 0.7]).reshape([1, 3]);
        assert!(class_probs(&wide, OutputKind::Logits).is_err());
        let flat = Tensor::from_slice(&[0.1_f32, 0.9]);
        assert!(class_probs(&flat, OutputKind::Probabilities).is_err());
    }
}
