//! Export configuration loaded from `~/.config/nbpdf/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ExportError, Result};
use crate::finish::OutlineStyle;

/// Adobe Reader refuses pages taller than 200 inches.
pub const DEFAULT_PAGE_CEILING_PT: f64 = 200.0 * 72.0;

/// CSS pixels to PDF points: 96 dpi screen into 72 dpi points.
pub const DEFAULT_PIXEL_SCALE: f64 = 1.0 - 72.0 / 288.0;

/// Distance kept between a bookmark target and the top edge of the page.
pub const DEFAULT_BOOKMARK_LEEWAY_PT: f64 = 20.0;

pub const DEFAULT_IPYWIDGETS_BASE_URL: &str = "https://unpkg.com/";

/// Settings for one or more exports.
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Browser binary; auto-detected when unset.
    pub chrome_executable: Option<PathBuf>,
    /// Pass `--no-sandbox` to the browser.
    pub no_sandbox: bool,
    /// Extra browser launch flags.
    pub extra_args: Vec<String>,
    pub page_ceiling_pt: f64,
    pub pixel_scale: f64,
    pub bookmark_leeway_pt: f64,
    pub outline: OutlineStyle,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub navigation_timeout_secs: u64,
    pub launch_timeout_secs: u64,
    pub ipywidgets_base_url: String,
    pub attachment_extension: String,
    /// Parent directory for per-export scratch directories.
    pub temp_dir: Option<PathBuf>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            no_sandbox: true,
            extra_args: Vec::new(),
            page_ceiling_pt: DEFAULT_PAGE_CEILING_PT,
            pixel_scale: DEFAULT_PIXEL_SCALE,
            bookmark_leeway_pt: DEFAULT_BOOKMARK_LEEWAY_PT,
            outline: OutlineStyle::Flat,
            viewport_width: 994,
            viewport_height: 768,
            navigation_timeout_secs: 30,
            launch_timeout_secs: 30,
            ipywidgets_base_url: DEFAULT_IPYWIDGETS_BASE_URL.to_string(),
            attachment_extension: ".ipynb".to_string(),
            temp_dir: None,
        }
    }
}

impl ExportConfig {
    /// Load from the default config path.
    ///
    /// Returns the defaults if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::from_path(&path)
    }

    /// Load from an explicit path. The file must exist.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExportError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ExportError::Config(msg) => ExportError::Config(format!("{msg} ({})", path.display())),
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ExportError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break the page arithmetic.
    pub fn validate(&self) -> Result<()> {
        if !(self.page_ceiling_pt.is_finite() && self.page_ceiling_pt > 0.0) {
            return Err(ExportError::Config(format!(
                "page_ceiling_pt must be positive, got {}",
                self.page_ceiling_pt
            )));
        }
        if !(self.pixel_scale.is_finite() && self.pixel_scale > 0.0) {
            return Err(ExportError::Config(format!(
                "pixel_scale must be positive, got {}",
                self.pixel_scale
            )));
        }
        if !(self.bookmark_leeway_pt.is_finite() && self.bookmark_leeway_pt >= 0.0) {
            return Err(ExportError::Config(format!(
                "bookmark_leeway_pt must not be negative, got {}",
                self.bookmark_leeway_pt
            )));
        }
        if self.viewport_width == 0 || self.viewport_height == 0 {
            return Err(ExportError::Config("viewport must be non-empty".to_string()));
        }
        Ok(())
    }

    /// Browser flags for this configuration.
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.extra_args.len() + 1);
        if self.no_sandbox {
            args.push("--no-sandbox".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }
}

/// Return the path to the default config file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nbpdf")
        .join("config.toml")
}
