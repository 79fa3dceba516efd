//! Configuration for golive.
//!
//! Reads `golive.toml`, searching the current directory and its parents when
//! no explicit path is given. Command-line overrides are layered on top via
//! [`CliSettings`] and the result is validated again.
//!
//! ## Environment Variables
//!
//! A few string values may reference the environment:
//!
//! - `${VAR}` is replaced by VAR and fails when VAR is unset
//! - `${VAR:-default}` falls back to `default` when VAR is unset
//!
//! This applies to `server.host`, `server.root`, `server.browser`, every
//! `[proxy]` target, and `tls.cert` / `tls.key`.

mod expand;

use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Command-line overrides. `None` keeps the value from the file.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override the served root directory.
    pub root: Option<PathBuf>,
    /// Override bind host.
    pub host: Option<String>,
    /// Override preferred port.
    pub port: Option<u16>,
    /// Override HTTPS flag.
    pub https: Option<bool>,
    /// Override CORS flag.
    pub cors: Option<bool>,
    /// Replace the ignore patterns.
    pub ignore: Option<Vec<String>>,
}

/// File name looked up during discovery.
const CONFIG_FILENAME: &str = "golive.toml";

/// Application configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Reverse proxy rules, prefix to upstream URL, in routing order.
    pub proxy: IndexMap<String, String>,
    /// Change watching configuration.
    pub watch: WatchConfig,
    /// TLS certificate locations (paths are relative strings from TOML).
    tls: TlsConfigRaw,

    /// Resolved root directory (set after loading).
    #[serde(skip)]
    pub root_dir: PathBuf,
    /// Resolved TLS certificate pair (set after loading).
    #[serde(skip)]
    pub tls_resolved: TlsConfig,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    #[allow(clippy::derivable_impls)]
    fn default() -> Self {
        Self::default_with_base(Path::new("."))
    }
}

/// Server configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host address.
    pub host: String,
    /// Preferred port; the next free port is used when it is taken.
    pub port: u16,
    /// Number of consecutive ports to try before giving up.
    pub max_port_attempts: u16,
    /// Root directory, relative to the config directory.
    pub root: String,
    /// Browser override handed to the host (empty means system default).
    pub browser: String,
    /// Serve over HTTPS with the configured certificate pair.
    pub https: bool,
    /// Send permissive CORS headers.
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 5500,
            max_port_attempts: 10,
            root: "/".to_owned(),
            browser: String::new(),
            https: false,
            cors: true,
        }
    }
}

impl ServerConfig {
    /// Browser override, if one is configured.
    #[must_use]
    pub fn browser(&self) -> Option<&str> {
        Some(self.browser.as_str()).filter(|b| !b.is_empty())
    }
}

/// Change watching configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Glob patterns matched against path segments to exclude from watching.
    pub ignore: Vec<String>,
    /// Window in which repeated events for one path collapse into one reload.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            ignore: vec![
                ".git".to_owned(),
                ".vscode".to_owned(),
                "node_modules".to_owned(),
            ],
            debounce_ms: 100,
        }
    }
}

/// Raw TLS configuration as parsed from TOML (paths as strings).
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TlsConfigRaw {
    cert: Option<String>,
    key: Option<String>,
}

/// Resolved certificate and private key locations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM certificate chain.
    pub cert: PathBuf,
    /// PEM private key.
    pub key: PathBuf,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`server.root`").
        field: String,
        /// Error message (e.g., "${`SITE_ROOT`} not set").
        message: String,
    },
}

/// Require a string field to be non-empty.
fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Require a URL field to use http:// or https:// scheme.
fn require_http_url(url: &str, field: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{field} must start with http:// or https://"
        )));
    }
    Ok(())
}

/// Join a configured root onto `base`.
///
/// A leading slash does not make the root absolute: `"/"` is the base itself
/// and `"/public"` is `base/public`.
fn join_root(base: &Path, root: &str) -> PathBuf {
    let relative = root.trim_start_matches(['/', '\\']);
    if relative.is_empty() {
        base.to_path_buf()
    } else {
        base.join(relative)
    }
}

/// Directory containing `config_path`; a bare file name lives in `.`.
fn config_dir(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `golive.toml` in current directory and parents.
    ///
    /// CLI settings are applied after loading and path resolution, allowing CLI
    /// arguments to take precedence over config file values.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist or parsing fails.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
            config.validate()?;
        }

        Ok(config)
    }

    /// Layer command-line overrides over file values.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(root) = &settings.root {
            self.root_dir.clone_from(root);
        }
        if let Some(host) = &settings.host {
            self.server.host.clone_from(host);
        }
        if let Some(port) = settings.port {
            self.server.port = port;
        }
        if let Some(https) = settings.https {
            self.server.https = https;
        }
        if let Some(cors) = settings.cors {
            self.server.cors = cors;
        }
        if let Some(ignore) = &settings.ignore {
            self.watch.ignore.clone_from(ignore);
        }
    }

    /// Walk up from the current directory looking for `golive.toml`.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Create default config with paths relative to current working directory.
    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::default_with_base(&cwd)
    }

    /// Create default config with paths relative to given base directory.
    fn default_with_base(base: &Path) -> Self {
        Self {
            server: ServerConfig::default(),
            proxy: IndexMap::new(),
            watch: WatchConfig::default(),
            tls: TlsConfigRaw::default(),
            root_dir: base.to_path_buf(),
            tls_resolved: TlsConfig {
                cert: base.join("certificates/cert.pem"),
                key: base.join("certificates/key.pem"),
            },
            config_path: None,
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        // Expand environment variables before path resolution
        config.expand_env_vars()?;

        config.resolve_paths(config_dir(path));
        config.config_path = Some(path.to_path_buf());

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_proxy()?;
        self.validate_watch()?;
        Ok(())
    }

    /// Validate server configuration.
    fn validate_server(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.server.host, "server.host")?;

        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server.port cannot be 0".to_owned(),
            ));
        }
        if self.server.max_port_attempts == 0 {
            return Err(ConfigError::Validation(
                "server.max_port_attempts must be at least 1".to_owned(),
            ));
        }

        Ok(())
    }

    /// Validate proxy rules.
    fn validate_proxy(&self) -> Result<(), ConfigError> {
        for (prefix, target) in &self.proxy {
            if !prefix.starts_with('/') {
                return Err(ConfigError::Validation(format!(
                    "proxy prefix {prefix:?} must start with /"
                )));
            }
            let field = format!("proxy.{prefix}");
            require_non_empty(target, &field)?;
            require_http_url(target, &field)?;
        }
        Ok(())
    }

    /// Validate watch configuration.
    fn validate_watch(&self) -> Result<(), ConfigError> {
        const MAX_DEBOUNCE_MS: u64 = 10_000;

        if self.watch.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(ConfigError::Validation(format!(
                "watch.debounce_ms cannot exceed {MAX_DEBOUNCE_MS}"
            )));
        }
        if let Some(empty) = self.watch.ignore.iter().position(String::is_empty) {
            return Err(ConfigError::Validation(format!(
                "watch.ignore[{empty}] cannot be empty"
            )));
        }
        Ok(())
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        self.server.host = expand::expand_env(&self.server.host, "server.host")?;
        self.server.root = expand::expand_env(&self.server.root, "server.root")?;
        self.server.browser = expand::expand_env(&self.server.browser, "server.browser")?;

        for (prefix, target) in &mut self.proxy {
            *target = expand::expand_env(target, &format!("proxy.{prefix}"))?;
        }

        if let Some(ref cert) = self.tls.cert {
            self.tls.cert = Some(expand::expand_env(cert, "tls.cert")?);
        }
        if let Some(ref key) = self.tls.key {
            self.tls.key = Some(expand::expand_env(key, "tls.key")?);
        }

        Ok(())
    }

    /// Resolve relative paths to absolute paths based on config directory.
    fn resolve_paths(&mut self, config_dir: &Path) {
        self.root_dir = join_root(config_dir, &self.server.root);

        let resolve = |path: Option<&str>, default: &str| config_dir.join(path.unwrap_or(default));
        self.tls_resolved = TlsConfig {
            cert: resolve(self.tls.cert.as_deref(), "certificates/cert.pem"),
            key: resolve(self.tls.key.as_deref(), "certificates/key.pem"),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default_with_base(Path::new("/test"));
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 5500);
        assert_eq!(config.server.max_port_attempts, 10);
        assert_eq!(config.server.root, "/");
        assert!(config.server.browser().is_none());
        assert!(!config.server.https);
        assert!(config.server.cors);
        assert!(config.proxy.is_empty());
        assert_eq!(config.watch.ignore, vec![".git", ".vscode", "node_modules"]);
        assert_eq!(config.watch.debounce_ms, 100);
        assert_eq!(config.root_dir, PathBuf::from("/test"));
        assert_eq!(
            config.tls_resolved.cert,
            PathBuf::from("/test/certificates/cert.pem")
        );
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 5500);
        assert!(config.server.cors);
    }

    #[test]
    fn test_parse_server_config() {
        let toml = r#"
[server]
host = "0.0.0.0"
port = 8080
root = "/public"
browser = "firefox"
https = true
cors = false
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.root, "/public");
        assert_eq!(config.server.browser(), Some("firefox"));
        assert!(config.server.https);
        assert!(!config.server.cors);
    }

    #[test]
    fn test_proxy_rules_keep_file_order() {
        let toml = r#"
[proxy]
"/api/v2" = "http://localhost:9001"
"/api" = "http://localhost:9000"
"/auth" = "http://localhost:9002"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let prefixes: Vec<_> = config.proxy.keys().map(String::as_str).collect();
        assert_eq!(prefixes, vec!["/api/v2", "/api", "/auth"]);
    }

    #[test]
    fn test_parse_watch_config() {
        let toml = r#"
[watch]
ignore = ["dist", "*.log"]
debounce_ms = 250
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.watch.ignore, vec!["dist", "*.log"]);
        assert_eq!(config.watch.debounce_ms, 250);
    }

    #[test]
    fn test_resolve_paths() {
        let toml = r#"
[server]
root = "/site"

[tls]
cert = "certs/dev.crt"
"#;
        let mut config: Config = toml::from_str(toml).unwrap();
        config.resolve_paths(Path::new("/project"));

        assert_eq!(config.root_dir, PathBuf::from("/project/site"));
        assert_eq!(
            config.tls_resolved,
            TlsConfig {
                cert: PathBuf::from("/project/certs/dev.crt"),
                key: PathBuf::from("/project/certificates/key.pem"),
            }
        );
    }

    #[test]
    fn test_join_root_variants() {
        let base = Path::new("/project");
        assert_eq!(join_root(base, "/"), PathBuf::from("/project"));
        assert_eq!(join_root(base, ""), PathBuf::from("/project"));
        assert_eq!(join_root(base, "public"), PathBuf::from("/project/public"));
        assert_eq!(join_root(base, "/public/"), PathBuf::from("/project/public/"));
    }

    #[test]
    fn test_config_dir_of_bare_file_name() {
        assert_eq!(config_dir(Path::new("golive.toml")), Path::new("."));
        assert_eq!(config_dir(Path::new("site/golive.toml")), Path::new("site"));
        assert_eq!(config_dir(Path::new("/project/golive.toml")), Path::new("/project"));
    }

    #[test]
    fn test_bare_config_name_resolves_against_current_dir() {
        let toml = r#"
[server]
root = "/"
"#;
        let mut config: Config = toml::from_str(toml).unwrap();
        config.resolve_paths(config_dir(Path::new(CONFIG_FILENAME)));

        assert_eq!(config.root_dir, PathBuf::from("."));
        assert!(config.root_dir.canonicalize().is_ok());
        assert_eq!(
            config.tls_resolved.cert,
            PathBuf::from("./certificates/cert.pem")
        );
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(
            &path,
            r#"
[server]
port = 6000
root = "www"

[proxy]
"/api" = "http://localhost:9000"
"#,
        )
        .unwrap();

        let config = Config::load(Some(&path), None).unwrap();
        assert_eq!(config.server.port, 6000);
        assert_eq!(config.root_dir, dir.path().join("www"));
        assert_eq!(config.config_path, Some(path));
        assert_eq!(config.proxy["/api"], "http://localhost:9000");
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/nonexistent/golive.toml")), None).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "[server\nport = ").unwrap();

        let err = Config::load(Some(&path), None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_apply_cli_settings_port() {
        let mut config = Config::default_with_base(Path::new("/test"));
        let overrides = CliSettings {
            port: Some(9000),
            ..Default::default()
        };

        config.apply_cli_settings(&overrides);

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1"); // Unchanged
    }

    #[test]
    fn test_apply_cli_settings_root() {
        let mut config = Config::default_with_base(Path::new("/test"));
        let overrides = CliSettings {
            root: Some(PathBuf::from("/custom/site")),
            ..Default::default()
        };

        config.apply_cli_settings(&overrides);

        assert_eq!(config.root_dir, PathBuf::from("/custom/site"));
    }

    #[test]
    fn test_apply_cli_settings_multiple() {
        let mut config = Config::default_with_base(Path::new("/test"));
        let overrides = CliSettings {
            host: Some("0.0.0.0".to_owned()),
            https: Some(true),
            cors: Some(false),
            ignore: Some(vec!["target".to_owned()]),
            ..Default::default()
        };

        config.apply_cli_settings(&overrides);

        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.server.https);
        assert!(!config.server.cors);
        assert_eq!(config.watch.ignore, vec!["target"]);
    }

    #[test]
    fn test_apply_cli_settings_empty() {
        let before = Config::default_with_base(Path::new("/test"));
        let mut config = Config::default_with_base(Path::new("/test"));

        config.apply_cli_settings(&CliSettings::default());

        assert_eq!(config.server.port, before.server.port);
        assert_eq!(config.root_dir, before.root_dir);
        assert_eq!(config.watch.ignore, before.watch.ignore);
    }

    #[test]
    fn test_expand_env_vars_root_and_proxy() {
        // SAFETY: test runs single-threaded per test function
        unsafe {
            std::env::set_var("GOLIVE_TEST_ROOT", "dist");
            std::env::set_var("GOLIVE_TEST_API", "http://127.0.0.1:4000");
        }

        let toml = r#"
[server]
root = "${GOLIVE_TEST_ROOT}"

[proxy]
"/api" = "${GOLIVE_TEST_API}"
"/auth" = "${GOLIVE_TEST_AUTH:-http://127.0.0.1:4001}"
"#;
        let mut config: Config = toml::from_str(toml).unwrap();
        config.expand_env_vars().unwrap();

        assert_eq!(config.server.root, "dist");
        assert_eq!(config.proxy["/api"], "http://127.0.0.1:4000");
        assert_eq!(config.proxy["/auth"], "http://127.0.0.1:4001");

        unsafe {
            std::env::remove_var("GOLIVE_TEST_ROOT");
            std::env::remove_var("GOLIVE_TEST_API");
        }
    }

    #[test]
    fn test_expand_env_vars_missing_required_var() {
        // SAFETY: test runs single-threaded per test function
        unsafe {
            std::env::remove_var("MISSING_VAR_GOLIVE_TEST");
        }

        let toml = r#"
[tls]
key = "${MISSING_VAR_GOLIVE_TEST}/key.pem"
"#;
        let mut config: Config = toml::from_str(toml).unwrap();
        let err = config.expand_env_vars().unwrap_err();

        assert!(matches!(err, ConfigError::EnvVar { .. }));
        assert!(err.to_string().contains("MISSING_VAR_GOLIVE_TEST"));
        assert!(err.to_string().contains("tls.key"));
    }

    // Validation tests

    /// Assert that validation fails with expected substrings in the error message.
    fn assert_validation_error(config: &Config, expected_substrings: &[&str]) {
        let result = config.validate();
        assert!(result.is_err(), "Expected validation to fail");
        let err = result.unwrap_err();
        assert!(
            matches!(err, ConfigError::Validation(_)),
            "Expected ConfigError::Validation, got {err:?}"
        );
        let msg = err.to_string();
        for s in expected_substrings {
            assert!(
                msg.contains(s),
                "Expected error to contain '{s}', got: {msg}"
            );
        }
    }

    #[test]
    fn test_validate_default_config_passes() {
        let config = Config::default_with_base(Path::new("/test"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_server_host_empty() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.server.host = String::new();
        assert_validation_error(&config, &["server.host", "empty"]);
    }

    #[test]
    fn test_validate_server_port_zero() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.server.port = 0;
        assert_validation_error(&config, &["server.port"]);
    }

    #[test]
    fn test_validate_max_port_attempts_zero() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.server.max_port_attempts = 0;
        assert_validation_error(&config, &["max_port_attempts"]);
    }

    #[test]
    fn test_validate_proxy_prefix_without_slash() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config
            .proxy
            .insert("api".to_owned(), "http://localhost:9000".to_owned());
        assert_validation_error(&config, &["api", "must start with /"]);
    }

    #[test]
    fn test_validate_proxy_target_invalid_scheme() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config
            .proxy
            .insert("/api".to_owned(), "ftp://localhost".to_owned());
        assert_validation_error(&config, &["proxy./api", "http"]);
    }

    #[test]
    fn test_validate_proxy_target_valid() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config
            .proxy
            .insert("/api".to_owned(), "https://api.example.com/v1".to_owned());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_debounce_too_high() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.watch.debounce_ms = 60_000;
        assert_validation_error(&config, &["debounce_ms", "10000"]);
    }

    #[test]
    fn test_validate_empty_ignore_pattern() {
        let mut config = Config::default_with_base(Path::new("/test"));
        config.watch.ignore.push(String::new());
        assert_validation_error(&config, &["watch.ignore[3]", "empty"]);
    }
}
