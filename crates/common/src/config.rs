//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FocusError, FocusResult};

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Built-in correlation aligner settings.
    pub alignment: AlignmentConfig,

    /// Mask rasterization and fusion tool settings.
    pub fusion: FusionConfig,

    /// Optional external aligner (`align_image_stack`).
    pub external_align: ExternalAlignConfig,

    /// Preview rendering.
    pub preview: PreviewConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Remembered user preferences.
    pub prefs: Prefs,
}

/// Parameters of the coarse-to-fine correlation aligner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Iteration cap per pyramid level.
    pub iterations: u32,

    /// Stop a level once the correlation changes by less than this.
    pub epsilon: f64,

    /// Worker threads. `None` uses half of the available parallelism.
    pub pool_size: Option<usize>,

    /// Pyramid level override. `None` derives it from the anchor width.
    pub pyramid_levels: Option<u32>,

    /// Reject solves whose final correlation falls below this value.
    pub min_correlation: Option<f64>,

    /// Filename prefix for aligned outputs (`{prefix}0000.png`).
    pub output_prefix: String,
}

/// Settings for the mask stage and the external fusion tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Fusion binary name or path.
    pub binary: String,

    /// Output file name written into the work directory.
    pub output_name: String,

    /// Pass `--hard-mask` to the fusion tool.
    pub hard_mask: bool,

    /// Alpha written inside exclude regions.
    pub exclude_alpha: u8,

    /// Additional arguments appended verbatim.
    pub extra_args: Vec<String>,
}

/// Options forwarded to `align_image_stack` when it replaces the built-in aligner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalAlignConfig {
    /// Use the external aligner instead of the built-in one.
    pub enabled: bool,

    /// Aligner binary name or path.
    pub binary: String,

    /// Crop the output to the area covered by all images.
    pub autocrop: bool,

    /// Optimize the image center shift.
    pub center_shift: bool,

    /// Optimize the field of view.
    pub field_of_view: bool,

    /// Correlation threshold for control points, `[0.0, 1.0]`.
    pub correlation_threshold: f64,

    /// Control points per grid cell, `0..=50`.
    pub control_points: u32,

    /// Grid size, `1..=10`.
    pub grid_size: u32,

    /// Downscale factor for control point detection, `1..=5`.
    pub scale_factor: u32,
}

/// Viewport used when rendering previews outside an interactive surface.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub width: u32,
    pub height: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "stackfuse=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

/// Small bits of UI state remembered between sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Prefs {
    /// Directory of the most recently added images.
    pub last_opened_location: Option<PathBuf>,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            iterations: 50,
            epsilon: 0.001,
            pool_size: None,
            pyramid_levels: None,
            min_correlation: None,
            output_prefix: "aligned_".to_string(),
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            binary: "enfuse".to_string(),
            output_name: "stacked.tif".to_string(),
            hard_mask: false,
            exclude_alpha: 16,
            extra_args: vec![],
        }
    }
}

impl Default for ExternalAlignConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            binary: "align_image_stack".to_string(),
            autocrop: true,
            center_shift: false,
            field_of_view: false,
            correlation_threshold: 0.9,
            control_points: 8,
            grid_size: 5,
            scale_factor: 1,
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from `path`, falling back to defaults on any problem.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
                    Ok(config) => match config.validate() {
                        Ok(()) => return config,
                        Err(e) => {
                            tracing::warn!("Ignoring invalid config at {:?}: {}", path, e);
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    /// Save config as pretty JSON at `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Check numeric options against the ranges the tools accept.
    pub fn validate(&self) -> FocusResult<()> {
        let a = &self.alignment;
        if a.iterations == 0 {
            return Err(FocusError::config("alignment.iterations must be >= 1"));
        }
        if !a.epsilon.is_finite() || a.epsilon < 0.0 {
            return Err(FocusError::config(
                "alignment.epsilon must be a non-negative number",
            ));
        }
        if a.pool_size == Some(0) {
            return Err(FocusError::config("alignment.pool_size must be >= 1 when set"));
        }

        if self.preview.width == 0 || self.preview.height == 0 {
            return Err(FocusError::config("preview viewport must be non-empty"));
        }

        let e = &self.external_align;
        if !(0.0..=1.0).contains(&e.correlation_threshold) {
            return Err(FocusError::config(
                "external_align.correlation_threshold must be in [0, 1]",
            ));
        }
        if e.control_points > 50 {
            return Err(FocusError::config(
                "external_align.control_points must be in 0..=50",
            ));
        }
        if !(1..=10).contains(&e.grid_size) {
            return Err(FocusError::config("external_align.grid_size must be in 1..=10"));
        }
        if !(1..=5).contains(&e.scale_factor) {
            return Err(FocusError::config(
                "external_align.scale_factor must be in 1..=5",
            ));
        }
        Ok(())
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("stackfuse").join("config.json")
}
