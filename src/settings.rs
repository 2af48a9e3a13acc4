use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::metrics::MetricsConfig;
use crate::policy::PolicyConfig;
use crate::region::{guide_rect, BoundsMode, RoiSpec, Size, ID_CARD_ASPECT_RATIO};
use crate::session::SessionConfig;

/// Guide overlay layout. When a viewport is known the ROI is the centred
/// card-shaped guide; otherwise whole frames are analyzed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegionConfig {
    pub viewport: Option<Size>,
    pub aspect_ratio: f64,
    /// Fraction of the viewport the guide spans.
    pub fill: f64,
    pub bounds: BoundsMode,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            viewport: None,
            aspect_ratio: ID_CARD_ASPECT_RATIO,
            fill: 0.85,
            bounds: BoundsMode::Strict,
        }
    }
}

impl RegionConfig {
    pub fn roi(&self) -> Result<Option<RoiSpec>> {
        let Some(viewport) = self.viewport else {
            return Ok(None);
        };
        let rect = guide_rect(viewport, self.aspect_ratio, self.fill)
            .context("Failed to lay out the guide rectangle")?;
        Ok(Some(RoiSpec::new(rect, viewport, self.bounds)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QualitySettings {
    pub metrics: MetricsConfig,
    pub policy: PolicyConfig,
    pub region: RegionConfig,
    /// Worker threads for batch analysis; all cores when unset.
    pub analysis_threads: Option<usize>,
}

impl QualitySettings {
    /// Get the settings file path
    fn settings_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?;
        let app_dir = config_dir.join("capture-quality");
        fs::create_dir_all(&app_dir)?;
        Ok(app_dir.join("settings.json"))
    }

    /// Load settings from the user config directory, writing defaults on
    /// first run
    pub fn load() -> Result<Self> {
        let path = Self::settings_path()?;

        if !path.exists() {
            let settings = Self::default();
            settings.save_to(&path)?;
            info!("wrote default settings to {}", path.display());
            return Ok(settings);
        }

        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))?;
        Ok(settings)
    }

    /// Save settings to the user config directory
    pub fn save(&self) -> Result<()> {
        let path = Self::settings_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        Ok(())
    }

    pub fn session_config(&self) -> Result<SessionConfig> {
        Ok(SessionConfig {
            metrics: self.metrics,
            policy: self.policy.clone(),
            roi: self.region.roi()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{BurstSelection, GlareAggregate};
    use crate::sharpness::SharpnessScope;

    #[test]
    fn test_settings_serialization() {
        let settings = QualitySettings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let parsed: QualitySettings = serde_json::from_str(&json).unwrap();
        assert_eq!(settings, parsed);
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let json = r#"{
            "metrics": { "glareThreshold": 230 },
            "policy": {
                "burstCount": 5,
                "glareAggregate": "mean",
                "selection": { "mode": "sharpest", "scope": { "kind": "global" } }
            },
            "region": { "viewport": { "width": 1080, "height": 1920 } }
        }"#;
        let settings: QualitySettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.metrics.glare_threshold, 230);
        assert_eq!(settings.metrics.min_glare_component_area, 100);
        assert_eq!(settings.policy.burst_count, 5);
        assert_eq!(settings.policy.debounce_ms, 2000);
        assert_eq!(settings.policy.glare_aggregate, GlareAggregate::Mean);
        assert_eq!(
            settings.policy.selection,
            BurstSelection::Sharpest {
                scope: SharpnessScope::Global
            }
        );

        let roi = settings.region.roi().unwrap().unwrap();
        assert!(roi.rect.fits_within(roi.viewport));
        assert_eq!(roi.viewport, Size::new(1080, 1920));
    }

    #[test]
    fn test_no_viewport_means_whole_frame() {
        let config = QualitySettings::default().session_config().unwrap();
        assert!(config.roi.is_none());
    }

    #[test]
    fn test_save_and_load_roundtrip_on_disk() {
        let path = std::env::temp_dir().join(format!(
            "capture-quality-settings-{}.json",
            std::process::id()
        ));
        let mut settings = QualitySettings::default();
        settings.analysis_threads = Some(2);
        settings.save_to(&path).unwrap();
        let loaded = QualitySettings::load_from(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded.analysis_threads, Some(2));
        assert!(QualitySettings::load_from(&path).is_err());
    }
}
