//! Configuration for Lightpad tools.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext), and
//! translation to `lightpad_core::ClientConfig` plus the profile's named
//! pads as `DeviceEndpoint`s.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use lightpad_core::{ClientConfig, Credentials, DeviceEndpoint, TlsMode};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const KEYRING_SERVICE: &str = "lightpad";
const ENV_PREFIX: &str = "LIGHTPAD_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("pad '{name}' not found in profile '{profile}'")]
    UnknownPad { profile: String, name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile<'a>(
        &'a self,
        name: Option<&'a str>,
    ) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }
}

/// Settings a profile inherits unless it overrides them.
#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// House service request timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Pad connect and handshake budget, milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Pad command reply budget, milliseconds.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Default `tracing` filter directive.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            connect_timeout_ms: default_connect_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            log_level: default_log_level(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_command_timeout_ms() -> u64 {
    5_000
}
fn default_log_level() -> String {
    "warn".into()
}

/// A named account/house profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Plum account email.
    pub email: Option<String>,

    /// Password (plaintext; prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// House to use; first house on the account when unset.
    pub house_id: Option<String>,

    /// Override the house service URL.
    pub cloud_url: Option<String>,

    /// Verify pad certificates against the web PKI roots.
    pub verify_tls: Option<bool>,

    /// Verify pad certificates against this CA bundle instead.
    pub ca_cert: Option<PathBuf>,

    /// Override the house service timeout, seconds.
    pub timeout: Option<u64>,

    /// Override the command reply budget, milliseconds.
    pub command_timeout_ms: Option<u64>,

    /// Treat issued sessions as expired after this many seconds.
    pub session_ttl_secs: Option<u64>,

    /// Named pads, e.g. `[profiles.default.pads.kitchen]`.
    #[serde(default)]
    pub pads: BTreeMap<String, PadProfile>,
}

/// One Lightpad reachable on the local network.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PadProfile {
    /// Logical load the pad drives.
    pub load_id: String,
    pub address: IpAddr,
    pub port: Option<u16>,
    /// `false` only for simulators.
    pub encrypted: Option<bool>,
}

impl PadProfile {
    pub fn endpoint(&self) -> DeviceEndpoint {
        let mut endpoint = DeviceEndpoint::new(self.load_id.clone(), self.address);
        if let Some(port) = self.port {
            endpoint = endpoint.with_port(port);
        }
        if self.encrypted == Some(false) {
            endpoint = endpoint.plaintext();
        }
        endpoint
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "lightpad", "lightpad").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("lightpad");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + `LIGHTPAD_`-prefixed environment variables.
/// Nested keys use a double underscore: `LIGHTPAD_DEFAULTS__TIMEOUT=10`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Account email: profile, then `LIGHTPAD_EMAIL`.
pub fn resolve_email(profile: &Profile, profile_name: &str) -> Result<String, ConfigError> {
    resolve_email_with(profile, profile_name, |k| std::env::var(k).ok())
}

fn resolve_email_with(
    profile: &Profile,
    profile_name: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    profile
        .email
        .clone()
        .or_else(|| env("LIGHTPAD_EMAIL"))
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })
}

/// Password chain: `password_env` → `LIGHTPAD_PASSWORD` → keyring → plaintext.
pub fn resolve_password(
    profile: &Profile,
    profile_name: &str,
) -> Result<SecretString, ConfigError> {
    resolve_password_with(profile, profile_name, |k| std::env::var(k).ok())
}

fn resolve_password_with(
    profile: &Profile,
    profile_name: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's password_env → env var lookup
    if let Some(val) = profile.password_env.as_deref().and_then(&env) {
        return Ok(SecretString::from(val));
    }

    // 2. Global env var
    if let Some(val) = env("LIGHTPAD_PASSWORD") {
        return Ok(SecretString::from(val));
    }

    // 3. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &keyring_user(profile_name)) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 4. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store `password` for `profile_name` in the system keyring.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &keyring_user(profile_name))?.set_password(password)?;
    Ok(())
}

fn keyring_user(profile_name: &str) -> String {
    format!("{profile_name}/password")
}

// ── Logging ─────────────────────────────────────────────────────────

/// Install the global subscriber at `defaults.log_level`. `RUST_LOG`
/// still takes precedence. Returns `false` if one was already installed.
pub fn init_logging(cfg: &Config, json: bool) -> bool {
    lightpad_core::init_tracing(&cfg.defaults.log_level, json)
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `ClientConfig` from a profile and the global defaults.
pub fn profile_to_client_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ClientConfig, ConfigError> {
    let email = resolve_email(profile, profile_name)?;
    let password = resolve_password(profile, profile_name)?;
    build_client_config(profile, defaults, Credentials::new(email, password))
}

fn build_client_config(
    profile: &Profile,
    defaults: &Defaults,
    credentials: Credentials,
) -> Result<ClientConfig, ConfigError> {
    let mut config = ClientConfig::new(credentials);

    if let Some(ref raw) = profile.cloud_url {
        let url = url::Url::parse(raw).map_err(|e| ConfigError::Validation {
            field: "cloud_url".into(),
            reason: format!("invalid URL {raw}: {e}"),
        })?;
        config.cloud_url = Some(url);
    }

    config.house_id.clone_from(&profile.house_id);
    config.tls = if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else if profile.verify_tls.unwrap_or(false) {
        TlsMode::System
    } else {
        TlsMode::DangerAcceptInvalid // pads present self-signed certificates
    };

    config.http_timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.connect_timeout = Duration::from_millis(defaults.connect_timeout_ms);
    config.handshake_timeout = Duration::from_millis(defaults.connect_timeout_ms);
    config.command_timeout = Duration::from_millis(
        profile
            .command_timeout_ms
            .unwrap_or(defaults.command_timeout_ms),
    );
    config.session_ttl = profile.session_ttl_secs.map(Duration::from_secs);

    Ok(config)
}

/// The profile's pads as endpoints, keyed by pad name.
pub fn endpoints(profile: &Profile) -> BTreeMap<String, DeviceEndpoint> {
    profile
        .pads
        .iter()
        .map(|(name, pad)| (name.clone(), pad.endpoint()))
        .collect()
}

/// A single named pad.
pub fn endpoint(
    profile: &Profile,
    profile_name: &str,
    pad_name: &str,
) -> Result<DeviceEndpoint, ConfigError> {
    profile
        .pads
        .get(pad_name)
        .map(PadProfile::endpoint)
        .ok_or_else(|| ConfigError::UnknownPad {
            profile: profile_name.into(),
            name: pad_name.into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    const SAMPLE: &str = r#"
default_profile = "home"

[defaults]
timeout = 15
command_timeout_ms = 2500

[profiles.home]
email = "owner@example.com"
password = "from-file"
house_id = "house-1"
session_ttl_secs = 3600

[profiles.home.pads.kitchen]
load_id = "load-k"
address = "192.168.1.20"

[profiles.home.pads.sim]
load_id = "load-s"
address = "127.0.0.1"
port = 9443
encrypted = false

[profiles.lab]
email = "lab@example.com"
cloud_url = "http://127.0.0.1:8080"
verify_tls = true
command_timeout_ms = 900
"#;

    fn sample() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = load_config_from(&path).unwrap();
        (dir, config)
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn log_level_defaults_to_warn_and_is_overridable() {
        let (_dir, config) = sample();
        assert_eq!(config.defaults.log_level, "warn");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[defaults]\nlog_level = \"lightpad_api=debug\"\n").unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.defaults.log_level, "lightpad_api=debug");

        let _ = init_logging(&config, false);
        assert!(!init_logging(&config, true));
    }

    #[test]
    fn loads_profiles_and_defaults() {
        let (_dir, config) = sample();
        assert_eq!(config.defaults.timeout, 15);
        assert_eq!(config.defaults.connect_timeout_ms, 5_000);

        let (name, home) = config.profile(None).unwrap();
        assert_eq!(name, "home");
        assert_eq!(home.house_id.as_deref(), Some("house-1"));
        assert_eq!(home.pads.len(), 2);

        assert!(matches!(
            config.profile(Some("missing")),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn pads_become_endpoints() {
        let (_dir, config) = sample();
        let (name, home) = config.profile(Some("home")).unwrap();

        let all = endpoints(home);
        assert_eq!(all["kitchen"].port, 8443);
        assert!(all["kitchen"].encrypted);

        let sim = endpoint(home, name, "sim").unwrap();
        assert_eq!(sim.id, "load-s");
        assert_eq!(sim.port, 9443);
        assert!(!sim.encrypted);

        assert!(matches!(
            endpoint(home, name, "garage"),
            Err(ConfigError::UnknownPad { .. })
        ));
    }

    #[test]
    fn client_config_from_profile() {
        let (_dir, config) = sample();
        let (_, home) = config.profile(Some("home")).unwrap();
        let creds = Credentials::new("owner@example.com", SecretString::from("pw".to_string()));

        let client = build_client_config(home, &config.defaults, creds).unwrap();
        assert_eq!(client.house_id.as_deref(), Some("house-1"));
        assert_eq!(client.http_timeout, Duration::from_secs(15));
        assert_eq!(client.command_timeout, Duration::from_millis(2500));
        assert_eq!(client.session_ttl, Some(Duration::from_secs(3600)));
        assert_eq!(client.tls, TlsMode::DangerAcceptInvalid);
        assert!(client.cloud_url.is_none());
    }

    #[test]
    fn profile_overrides_apply() {
        let (_dir, config) = sample();
        let (_, lab) = config.profile(Some("lab")).unwrap();
        let creds = Credentials::new("lab@example.com", SecretString::from("pw".to_string()));

        let client = build_client_config(lab, &config.defaults, creds).unwrap();
        assert_eq!(client.tls, TlsMode::System);
        assert_eq!(client.command_timeout, Duration::from_millis(900));
        assert_eq!(
            client.cloud_url.unwrap().as_str(),
            "http://127.0.0.1:8080/"
        );
    }

    #[test]
    fn bad_cloud_url_is_validation_error() {
        let profile = Profile {
            cloud_url: Some("not a url".into()),
            ..Profile::default()
        };
        let creds = Credentials::new("e", SecretString::from("p".to_string()));
        assert!(matches!(
            build_client_config(&profile, &Defaults::default(), creds),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn password_env_wins_over_plaintext() {
        let profile = Profile {
            password: Some("plain".into()),
            password_env: Some("MY_PAD_PW".into()),
            ..Profile::default()
        };
        let env = |k: &str| (k == "MY_PAD_PW").then(|| "from-env".to_string());

        let pw = resolve_password_with(&profile, "lightpad-test-env", env).unwrap();
        assert_eq!(pw.expose_secret(), "from-env");
    }

    #[test]
    fn global_env_beats_plaintext() {
        let profile = Profile {
            password: Some("plain".into()),
            ..Profile::default()
        };
        let env = |k: &str| (k == "LIGHTPAD_PASSWORD").then(|| "global".to_string());

        let pw = resolve_password_with(&profile, "lightpad-test-global", env).unwrap();
        assert_eq!(pw.expose_secret(), "global");
    }

    #[test]
    fn plaintext_is_last_resort() {
        let profile = Profile {
            password: Some("plain".into()),
            ..Profile::default()
        };
        let pw = resolve_password_with(&profile, "lightpad-test-plain-9f3a", no_env).unwrap();
        assert_eq!(pw.expose_secret(), "plain");
    }

    #[test]
    fn no_email_anywhere_is_no_credentials() {
        let err = resolve_email_with(&Profile::default(), "empty", no_env).unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { .. }));

        let email = resolve_email_with(&Profile::default(), "empty", |k| {
            (k == "LIGHTPAD_EMAIL").then(|| "env@example.com".to_string())
        })
        .unwrap();
        assert_eq!(email, "env@example.com");
    }

    #[test]
    fn save_then_load_preserves_pads() {
        let (_dir, config) = sample();
        let out = tempfile::tempdir().unwrap();
        let path = out.path().join("nested").join("config.toml");

        save_config_to(&config, &path).unwrap();
        let reloaded = load_config_from(&path).unwrap();

        let (_, home) = reloaded.profile(Some("home")).unwrap();
        assert_eq!(home.pads["kitchen"].load_id, "load-k");
        assert_eq!(reloaded.defaults.command_timeout_ms, 2500);
    }
}
