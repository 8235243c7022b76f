//! Screenshots taken through the OS keyboard shortcut.
//!
//! The OS saves the file itself under a locale-specific default name, so the
//! capture is recognized by prefix on the Desktop and then moved into the
//! screenshots directory.

use crate::automation::run_osascript;
use crate::types::WatchError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default save-name prefixes of the OS screenshot shortcut
pub const SCREENSHOT_PREFIXES: &[&str] = &[
    // English: "Screenshot 2024-01-01 at 10.00.00.png"
    "Screenshot",
    // Traditional Chinese
    "螢幕截圖",
    // Simplified Chinese
    "截屏",
    // Japanese
    "スクリーンショット",
];

/// Cmd+Shift+3
const SHORTCUT_SCRIPT: &str = r#"
    tell application "System Events"
        key code 20 using {command down, shift down}
    end tell
"#;

/// Whether a file name looks like an OS screenshot
pub fn is_os_screenshot_name(name: &str) -> bool {
    SCREENSHOT_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// All OS screenshots currently in `dir`
pub fn list_os_screenshots(dir: &Path) -> HashSet<PathBuf> {
    let mut found = HashSet::new();
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());

    for prefix in SCREENSHOT_PREFIXES {
        let pattern = format!("{}/{}*", escaped, prefix);
        let entries = match glob::glob(&pattern) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Invalid screenshot pattern '{}': {}", pattern, e);
                continue;
            }
        };
        for path in entries.flatten() {
            if path.is_file() {
                found.insert(path);
            }
        }
    }

    found
}

/// Most recently modified screenshot in `dir` that is not in `existing`.
///
/// Localized names do not sort by time, so the modification time decides.
pub fn find_new_screenshot(dir: &Path, existing: &HashSet<PathBuf>) -> Option<PathBuf> {
    list_os_screenshots(dir)
        .into_iter()
        .filter(|path| !existing.contains(path))
        .filter_map(|path| {
            let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
            Some((modified, path))
        })
        .max()
        .map(|(_, path)| path)
}

/// Captures via the keyboard shortcut and collects the file from `watch_dir`
#[derive(Debug, Clone)]
pub struct ShortcutCapture {
    watch_dir: PathBuf,
    wait: Duration,
}

impl ShortcutCapture {
    pub fn new(watch_dir: PathBuf, wait: Duration) -> Self {
        Self { watch_dir, wait }
    }

    /// Desktop of the current user
    pub fn default_watch_dir() -> PathBuf {
        dirs::desktop_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join("Desktop")))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// Press the shortcut and move the new screenshot to `dest`.
    ///
    /// `Ok(false)` means no new file showed up in time.
    pub async fn capture_to(&self, dest: &Path) -> Result<bool, WatchError> {
        let existing = list_os_screenshots(&self.watch_dir);
        debug!("Found {} existing screenshots in {:?}", existing.len(), self.watch_dir);

        run_osascript(SHORTCUT_SCRIPT).await?;
        tokio::time::sleep(self.wait).await;

        let new_file = match find_new_screenshot(&self.watch_dir, &existing) {
            Some(path) => path,
            None => {
                debug!("No new screenshot appeared in {:?}", self.watch_dir);
                return Ok(false);
            }
        };

        info!("Picked up OS screenshot {:?}", new_file);
        move_file(&new_file, dest)?;
        Ok(true)
    }
}

/// Rename, falling back to copy + delete across filesystems
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to)?;
    if let Err(e) = std::fs::remove_file(from) {
        warn!("Could not remove {:?} after copying: {}", from, e);
    }
    Ok(())
}
