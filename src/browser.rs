//! Headless Chromium lifecycle for deep extraction.
//!
//! A [`BrowserSession`] owns one browser process, its private profile
//! directory, and the task driving its CDP handler. Callers must `close()`
//! it when done; dropping it without closing still aborts the handler and
//! removes the profile, and chromiumoxide kills the child process when the
//! `Browser` is dropped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::error::RenderError;
use crate::extract::USER_AGENT;

static PROFILE_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    profile_dir: Option<PathBuf>,
}

impl BrowserSession {
    pub async fn launch(
        chrome_path: Option<&Path>,
        request_timeout: Duration,
    ) -> Result<Self, RenderError> {
        let profile_dir = create_profile_dir()?;
        match Self::start(chrome_path, request_timeout, &profile_dir).await {
            Ok((browser, handler)) => {
                tracing::info!(profile = %profile_dir.display(), "launched headless browser");
                Ok(Self {
                    browser,
                    handler,
                    profile_dir: Some(profile_dir),
                })
            }
            Err(e) => {
                remove_profile_dir(&profile_dir);
                Err(e)
            }
        }
    }

    async fn start(
        chrome_path: Option<&Path>,
        request_timeout: Duration,
        profile_dir: &Path,
    ) -> Result<(Browser, JoinHandle<()>), RenderError> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(request_timeout)
            .user_data_dir(profile_dir)
            .window_size(1366, 900)
            .no_sandbox()
            .arg(format!("--user-agent={}", USER_AGENT))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-notifications")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--mute-audio")
            .arg("--hide-scrollbars");

        if let Some(path) = chrome_path
            .map(Path::to_path_buf)
            .or_else(find_browser_executable)
        {
            tracing::debug!(path = %path.display(), "using browser executable");
            builder = builder.chrome_executable(path);
        }

        let config = builder.build().map_err(RenderError::Launch)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    // chromiumoxide does not know every CDP event; these are noise.
                    tracing::trace!(error = %e, "browser handler error");
                }
            }
        });

        Ok((browser, handler))
    }

    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    pub fn profile_dir(&self) -> Option<&Path> {
        self.profile_dir.as_deref()
    }

    /// Close the browser and wait for the process to exit.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::warn!(error = %e, "failed to close browser cleanly");
        }
        if let Err(e) = self.browser.wait().await {
            tracing::warn!(error = %e, "failed to wait for browser exit");
        }
        self.handler.abort();
        // Chrome holds the profile open until it exits.
        if let Some(dir) = self.profile_dir.take() {
            remove_profile_dir(&dir);
        }
        tracing::debug!("browser session closed");
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
        if let Some(dir) = self.profile_dir.take() {
            tracing::warn!("browser session dropped without close()");
            remove_profile_dir(&dir);
        }
    }
}

/// Fresh profile directory so concurrent sessions never share Chrome's
/// profile lock.
fn create_profile_dir() -> Result<PathBuf, RenderError> {
    let dir = std::env::temp_dir().join(format!(
        "link-poster-chrome-{}-{}",
        std::process::id(),
        PROFILE_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir)
        .map_err(|e| RenderError::Launch(format!("profile dir {}: {}", dir.display(), e)))?;
    Ok(dir)
}

fn remove_profile_dir(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        tracing::warn!(path = %dir.display(), error = %e, "failed to remove browser profile");
    }
}

/// Look for a Chrome/Chromium binary in the usual install locations.
/// Returns `None` to let chromiumoxide run its own detection.
pub fn find_browser_executable() -> Option<PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        &[
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/snap/bin/chromium",
        ]
    };

    candidates
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_dirs_are_unique_and_removable() {
        let first = create_profile_dir().unwrap();
        let second = create_profile_dir().unwrap();
        assert_ne!(first, second);
        assert!(first.is_dir() && second.is_dir());

        remove_profile_dir(&first);
        remove_profile_dir(&second);
        assert!(!first.exists());
        assert!(!second.exists());
    }
}
