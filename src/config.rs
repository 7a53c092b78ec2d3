//! Process-wide settings, loaded once at startup
//!
//! Sources, later ones winning: built-in defaults, an optional TOML file,
//! then environment variables (a `.env` file is loaded into the environment
//! by `main` before this runs).

use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::{DeployError, Result};
use crate::logging::DEFAULT_MAX_LOG_FILES;

pub const DEFAULT_CONFIG_PATH: &str = "home_deployer.toml";
pub const DEFAULT_TARGET_REF: &str = "refs/heads/main";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app_name: String,
    pub debug: bool,
    pub host: String,
    pub port: u16,
    /// Shared secret for `X-Hub-Signature-256`; empty or absent disables the webhook.
    pub github_webhook_secret: Option<SecretString>,
    pub database_url: String,
    pub cors_origins: Vec<String>,
    /// When set, logs are also written to daily rotated files in this directory.
    pub log_directory: Option<PathBuf>,
    /// Rotated log files kept in `log_directory`.
    pub log_max_files: usize,
    pub deploy: DeploySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "Home Server API".to_string(),
            debug: false,
            host: "0.0.0.0".to_string(),
            port: 8000,
            github_webhook_secret: None,
            database_url: "sqlite::memory:".to_string(),
            cors_origins: Vec::new(),
            log_directory: None,
            log_max_files: DEFAULT_MAX_LOG_FILES,
            deploy: DeploySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeploySettings {
    /// The only ref whose pushes trigger a deployment, compared verbatim.
    pub target_ref: String,
    /// Root the script path is resolved against; also the script's working directory.
    pub app_root: PathBuf,
    pub script: PathBuf,
    pub interpreter: String,
    /// Queue overlapping deployments instead of running them side by side.
    pub serialize: bool,
    pub timeout_secs: Option<u64>,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            target_ref: DEFAULT_TARGET_REF.to_string(),
            app_root: PathBuf::from("."),
            script: PathBuf::from("deploy.sh"),
            interpreter: "bash".to_string(),
            serialize: true,
            timeout_secs: None,
        }
    }
}

impl DeploySettings {
    pub fn script_path(&self) -> PathBuf {
        self.app_root.join(&self.script)
    }
}

impl Settings {
    /// Load settings from `path` (if it exists) and the process environment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                DeployError::ConfigError(format!(
                    "Failed to read config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            Self::from_toml_str(&content)?
        } else {
            Self::default()
        };

        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Applies `APP_NAME`, `DEBUG`, `HOST`, `PORT`, `GITHUB_WEBHOOK_SECRET`,
    /// `DATABASE_URL`, `CORS_ORIGINS` and `LOG_DIRECTORY` from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(app_name) = lookup("APP_NAME") {
            self.app_name = app_name;
        }
        if let Some(debug) = lookup("DEBUG") {
            self.debug = parse_bool(&debug).ok_or_else(|| {
                DeployError::ConfigError(format!("DEBUG must be a boolean, got '{}'", debug))
            })?;
        }
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = port.trim().parse().map_err(|e| {
                DeployError::ConfigError(format!("PORT must be a port number, got '{}': {}", port, e))
            })?;
        }
        if let Some(secret) = lookup("GITHUB_WEBHOOK_SECRET") {
            self.github_webhook_secret = Some(SecretString::from(secret));
        }
        if let Some(database_url) = lookup("DATABASE_URL") {
            self.database_url = database_url;
        }
        if let Some(origins) = lookup("CORS_ORIGINS") {
            self.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(dir) = lookup("LOG_DIRECTORY") {
            self.log_directory = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Returns the webhook secret, or None if it is unset or empty.
    pub fn webhook_secret(&self) -> Option<&[u8]> {
        self.github_webhook_secret
            .as_ref()
            .map(|s| s.expose_secret().as_bytes())
            .filter(|s| !s.is_empty())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.app_name, "Home Server API");
        assert_eq!(settings.bind_address(), "0.0.0.0:8000");
        assert!(settings.webhook_secret().is_none());
        assert_eq!(settings.deploy.target_ref, "refs/heads/main");
        assert_eq!(settings.deploy.script_path(), PathBuf::from("./deploy.sh"));
        assert!(settings.deploy.serialize);
        assert_eq!(settings.deploy.timeout_secs, None);
        assert_eq!(settings.log_max_files, 5);
    }

    #[test]
    fn test_from_toml() {
        let settings = Settings::from_toml_str(
            r#"
            app_name = "Lab"
            port = 9000
            github_webhook_secret = "s3cr3t"
            cors_origins = ["https://example.com"]
            log_max_files = 10

            [deploy]
            app_root = "/srv/app"
            script = "scripts/deploy.sh"
            timeout_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(settings.app_name, "Lab");
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.host, "0.0.0.0");
        assert_eq!(settings.webhook_secret(), Some(&b"s3cr3t"[..]));
        assert_eq!(settings.cors_origins, vec!["https://example.com"]);
        assert_eq!(settings.log_max_files, 10);
        assert_eq!(
            settings.deploy.script_path(),
            PathBuf::from("/srv/app/scripts/deploy.sh")
        );
        assert_eq!(settings.deploy.timeout_secs, Some(600));
        assert_eq!(settings.deploy.interpreter, "bash");
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let result = Settings::from_toml_str("port = \"not a number\"");
        assert!(matches!(result, Err(DeployError::TomlParseError(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_overrides(lookup_from(&[
                ("PORT", "8080"),
                ("DEBUG", "true"),
                ("GITHUB_WEBHOOK_SECRET", "from-env"),
                ("CORS_ORIGINS", "https://a.example, https://b.example,"),
            ]))
            .unwrap();

        assert_eq!(settings.port, 8080);
        assert!(settings.debug);
        assert_eq!(settings.webhook_secret(), Some(&b"from-env"[..]));
        assert_eq!(
            settings.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn test_invalid_env_overrides() {
        let mut settings = Settings::default();
        let result = settings.apply_overrides(lookup_from(&[("PORT", "eighty")]));
        assert!(matches!(result, Err(DeployError::ConfigError(_))));

        let result = settings.apply_overrides(lookup_from(&[("DEBUG", "maybe")]));
        assert!(matches!(result, Err(DeployError::ConfigError(_))));
    }

    #[test]
    fn test_empty_secret_counts_as_unset() {
        let mut settings = Settings::default();
        settings
            .apply_overrides(lookup_from(&[("GITHUB_WEBHOOK_SECRET", "")]))
            .unwrap();
        assert!(settings.webhook_secret().is_none());
    }

    #[test]
    fn test_secret_is_not_printed() {
        let mut settings = Settings::default();
        settings.github_webhook_secret = Some(SecretString::from("s3cr3t".to_string()));
        assert!(!format!("{:?}", settings).contains("s3cr3t"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let settings = Settings::load(Path::new("/nonexistent/home_deployer.toml")).unwrap();
        assert_eq!(settings.deploy.target_ref, DEFAULT_TARGET_REF);
    }
}
