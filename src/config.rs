use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use dotenvy::dotenv;

pub const PLACEHOLDER_TOKEN: &str = "change-this-token-in-production";
const DEFAULT_GITHUB_API: &str = "https://api.github.com";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub debug_mode: bool,
    pub host: String,
    pub port: u16,
    pub api_token: String,
    pub github_token: Option<String>,
    pub github_repo: Option<String>,
    pub github_branch: String,
    pub github_api_url: String,
    pub chrome_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            debug_mode: non_empty("DEBUG_MODE")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            host: non_empty("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: non_empty("PORT")
                .unwrap_or_else(|| "5001".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            api_token: non_empty("LINK_POSTER_TOKEN").unwrap_or_else(|| PLACEHOLDER_TOKEN.to_string()),
            github_token: non_empty("GITHUB_TOKEN"),
            github_repo: non_empty("GITHUB_REPO"),
            github_branch: non_empty("GITHUB_BRANCH").unwrap_or_else(|| "main".to_string()),
            github_api_url: non_empty("GITHUB_API_URL")
                .unwrap_or_else(|| DEFAULT_GITHUB_API.to_string()),
            chrome_path: non_empty("CHROME_PATH").map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    /// Outside debug mode every secret must be set and the login token must
    /// not be the placeholder.
    fn validate(&self) -> Result<()> {
        if self.debug_mode {
            return Ok(());
        }
        let mut missing = Vec::new();
        if self.api_token == PLACEHOLDER_TOKEN {
            missing.push("LINK_POSTER_TOKEN");
        }
        if self.github_token.is_none() {
            missing.push("GITHUB_TOKEN");
        }
        if self.github_repo.is_none() {
            missing.push("GITHUB_REPO");
        }
        if !missing.is_empty() {
            bail!(
                "missing required environment variables: {} (set them in .env or enable DEBUG_MODE)",
                missing.join(", ")
            );
        }
        if let Some(repo) = &self.github_repo {
            if repo.split('/').filter(|p| !p.is_empty()).count() != 2 {
                bail!("GITHUB_REPO must look like owner/repo, got '{}'", repo);
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_debug_mode_needs_nothing_else() {
        let config = load(&[("DEBUG_MODE", "TRUE")]).unwrap();
        assert!(config.debug_mode);
        assert_eq!(config.bind_addr(), "127.0.0.1:5001");
        assert_eq!(config.github_branch, "main");
        assert_eq!(config.api_token, PLACEHOLDER_TOKEN);
    }

    #[test]
    fn test_production_requires_secrets() {
        let err = load(&[]).unwrap_err().to_string();
        assert!(err.contains("LINK_POSTER_TOKEN"));
        assert!(err.contains("GITHUB_TOKEN"));
        assert!(err.contains("GITHUB_REPO"));
    }

    #[test]
    fn test_placeholder_token_rejected() {
        let err = load(&[
            ("LINK_POSTER_TOKEN", PLACEHOLDER_TOKEN),
            ("GITHUB_TOKEN", "ghp_x"),
            ("GITHUB_REPO", "me/site"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("LINK_POSTER_TOKEN"));
    }

    #[test]
    fn test_full_production_config() {
        let config = load(&[
            ("LINK_POSTER_TOKEN", "tok"),
            ("GITHUB_TOKEN", "ghp_x"),
            ("GITHUB_REPO", "me/site"),
            ("GITHUB_BRANCH", "publish"),
            ("PORT", "8080"),
            ("HOST", "0.0.0.0"),
            ("CHROME_PATH", "/usr/bin/chromium"),
        ])
        .unwrap();
        assert!(!config.debug_mode);
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.github_branch, "publish");
        assert_eq!(config.chrome_path, Some(PathBuf::from("/usr/bin/chromium")));
    }

    #[test]
    fn test_bad_port_and_repo_rejected() {
        assert!(load(&[("DEBUG_MODE", "true"), ("PORT", "http")]).is_err());
        let err = load(&[
            ("LINK_POSTER_TOKEN", "tok"),
            ("GITHUB_TOKEN", "ghp_x"),
            ("GITHUB_REPO", "just-a-name"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("owner/repo"));
    }
}
