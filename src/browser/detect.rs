//! Chromium Detection
//!
//! Finds a Chromium-family browser that can print to PDF headlessly.
//! Supports macOS, Linux, and Windows.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ExportError, Result};

/// Executable names probed in `PATH`, most specific first.
const PATH_CANDIDATES: [&str; 7] = [
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
    "chrome",
    "microsoft-edge",
    "brave-browser",
];

#[cfg(target_os = "macos")]
const INSTALL_CANDIDATES: [&str; 4] = [
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
    "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
];

#[cfg(target_os = "windows")]
const INSTALL_CANDIDATES: [&str; 4] = [
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
    r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const INSTALL_CANDIDATES: [&str; 2] = ["/usr/lib/chromium/chromium", "/opt/google/chrome/chrome"];

/// Resolve the browser to launch.
///
/// An explicit path must exist; otherwise `PATH` and the usual install
/// locations are searched.
pub fn find_browser(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        // Allow bare names like "chromium" in the config file
        if let Ok(found) = which::which(path) {
            return Ok(found);
        }
        return Err(ExportError::BrowserNotFound(format!(
            "configured browser {} does not exist",
            path.display()
        )));
    }

    for name in PATH_CANDIDATES {
        if let Ok(found) = which::which(name) {
            debug!("Found browser {} in PATH", found.display());
            return Ok(found);
        }
    }

    INSTALL_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or_else(|| {
            ExportError::BrowserNotFound(format!(
                "none of {} found in PATH; set chrome_executable in {}",
                PATH_CANDIDATES.join(", "),
                crate::config::config_path().display()
            ))
        })
}
