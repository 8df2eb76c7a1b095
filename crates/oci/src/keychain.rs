//! Default credential resolution.
//!
//! The [`DockerKeychain`] reads the same files container tooling writes:
//! Docker's `config.json` and Podman's `auth.json`. Entries may carry
//! credentials inline (`auths`) or delegate to a `docker-credential-*`
//! helper (`credHelpers` / `credsStore`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, trace};

use crate::auth::{AuthConfig, Authenticator, decode_auth};
use crate::reference::DOCKER_HUB_REGISTRY;
use crate::{Error, Result};

/// Key Docker uses for Docker Hub credentials.
pub const DOCKER_HUB_CONFIG_KEY: &str = "https://index.docker.io/v1/";

/// Username a credential helper returns when the secret is an identity token.
const IDENTITY_TOKEN_USERNAME: &str = "<token>";

/// Source of credentials for registries that have none configured explicitly.
#[async_trait]
pub trait Keychain: Send + Sync {
    /// Resolve the authenticator for a registry (e.g. `ghcr.io`,
    /// `index.docker.io`). Registries without credentials resolve to
    /// [`Authenticator::Anonymous`].
    async fn resolve(&self, registry: &str) -> Result<Authenticator>;
}

/// Keychain backed by Docker/Podman config files and credential helpers.
#[derive(Debug, Clone, Default)]
pub struct DockerKeychain {
    config_path: Option<PathBuf>,
}

impl DockerKeychain {
    /// Keychain that discovers its config file from the environment on every
    /// lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keychain reading a specific config file.
    #[must_use]
    pub fn with_config_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    fn config_path(&self) -> Option<PathBuf> {
        self.config_path.clone().or_else(discover_config_path)
    }
}

#[async_trait]
impl Keychain for DockerKeychain {
    #[instrument(name = "keychain_resolve", skip(self))]
    async fn resolve(&self, registry: &str) -> Result<Authenticator> {
        let Some(path) = self.config_path() else {
            debug!("No container credential file found, using anonymous access");
            return Ok(Authenticator::Anonymous);
        };

        let config = DockerConfigFile::load(&path).await?;
        let key = server_key(registry);

        if let Some(helper) = config.helper_for(registry, &key) {
            debug!(helper, path = %path.display(), "Resolving credentials via helper");
            return run_credential_helper(helper, &key).await;
        }

        match config.find_entry(registry, &key) {
            Some(entry) => {
                debug!(path = %path.display(), "Found credentials in config file");
                Ok(Authenticator::from_config(entry.to_auth_config()))
            }
            None => {
                trace!(path = %path.display(), "No credentials for registry");
                Ok(Authenticator::Anonymous)
            }
        }
    }
}

/// Keychain with a fixed set of credentials, keyed by registry.
#[derive(Debug, Clone, Default)]
pub struct StaticKeychain {
    entries: HashMap<String, AuthConfig>,
}

impl StaticKeychain {
    /// Empty keychain; every registry resolves to anonymous.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add credentials for a registry.
    #[must_use]
    pub fn with(mut self, registry: impl Into<String>, config: AuthConfig) -> Self {
        self.entries.insert(registry.into(), config);
        self
    }
}

#[async_trait]
impl Keychain for StaticKeychain {
    async fn resolve(&self, registry: &str) -> Result<Authenticator> {
        Ok(self
            .entries
            .get(registry)
            .cloned()
            .map_or(Authenticator::Anonymous, Authenticator::from_config))
    }
}

/// Locate the credential file.
///
/// Order: `$DOCKER_CONFIG/config.json`, `~/.docker/config.json`,
/// `$REGISTRY_AUTH_FILE`, `$XDG_RUNTIME_DIR/containers/auth.json`.
#[must_use]
pub fn discover_config_path() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("DOCKER_CONFIG") {
        return Some(PathBuf::from(dir).join("config.json"));
    }

    let candidates = [
        dirs::home_dir().map(|home| home.join(".docker").join("config.json")),
        std::env::var_os("REGISTRY_AUTH_FILE").map(PathBuf::from),
        std::env::var_os("XDG_RUNTIME_DIR")
            .map(|dir| PathBuf::from(dir).join("containers").join("auth.json")),
    ];

    candidates.into_iter().flatten().find(|p| p.is_file())
}

/// Key under which a registry's credentials are stored.
#[must_use]
pub fn server_key(registry: &str) -> String {
    if registry == DOCKER_HUB_REGISTRY || registry == "docker.io" {
        DOCKER_HUB_CONFIG_KEY.to_string()
    } else {
        registry.to_string()
    }
}

/// Strip scheme and path from a config key (`https://ghcr.io/v1/` → `ghcr.io`).
fn normalize_key(key: &str) -> &str {
    let without_scheme = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    without_scheme.split('/').next().unwrap_or(without_scheme)
}

fn same_registry(a: &str, b: &str) -> bool {
    let hub = |r: &str| r == DOCKER_HUB_REGISTRY || r == "docker.io" || r == "registry-1.docker.io";
    a == b || (hub(a) && hub(b))
}

/// The subset of Docker's `config.json` needed for credential lookup.
#[derive(Debug, Default, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    #[serde(default, rename = "credsStore")]
    creds_store: Option<String>,
    #[serde(default, rename = "credHelpers")]
    cred_helpers: HashMap<String, String>,
}

/// Authentication entry in a config file.
#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    auth: Option<String>,
    username: Option<String>,
    password: Option<String>,
    identitytoken: Option<String>,
    registrytoken: Option<String>,
}

impl DockerConfigFile {
    async fn load(path: &Path) -> Result<Self> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };

        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(&contents).map_err(|e| {
            Error::keychain(format!("failed to parse {}: {e}", path.display()))
        })
    }

    fn helper_for(&self, registry: &str, key: &str) -> Option<&str> {
        self.cred_helpers
            .get(key)
            .or_else(|| self.cred_helpers.get(registry))
            .or(self.creds_store.as_ref())
            .map(String::as_str)
            .filter(|h| !h.is_empty())
    }

    fn find_entry(&self, registry: &str, key: &str) -> Option<&AuthEntry> {
        if let Some(entry) = self.auths.get(key).or_else(|| self.auths.get(registry)) {
            return Some(entry);
        }

        self.auths
            .iter()
            .find(|(k, _)| same_registry(normalize_key(k), registry))
            .map(|(_, entry)| entry)
    }
}

impl AuthEntry {
    fn to_auth_config(&self) -> AuthConfig {
        let (username, password) = match (&self.username, &self.password, &self.auth) {
            (None, None, Some(auth)) => {
                decode_auth(auth).map_or((None, None), |(u, p)| (Some(u), Some(p)))
            }
            _ => (self.username.clone(), self.password.clone()),
        };

        AuthConfig::from_parts(
            username,
            password,
            None,
            self.identitytoken.clone(),
            self.registrytoken.clone(),
        )
    }
}

/// Response of `docker-credential-<helper> get`.
#[derive(Debug, Deserialize)]
struct HelperCredentials {
    #[serde(rename = "Username", default)]
    username: String,
    #[serde(rename = "Secret", default)]
    secret: String,
}

/// Run `docker-credential-<helper> get` for a server URL.
async fn run_credential_helper(helper: &str, server_url: &str) -> Result<Authenticator> {
    let program = format!("docker-credential-{helper}");

    let mut child = Command::new(&program)
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::keychain(format!("failed to run {program}: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(server_url.as_bytes()).await?;
        stdin.shutdown().await?;
    }

    let output = child.wait_with_output().await?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stdout.contains("credentials not found") || stderr.contains("credentials not found") {
            trace!(helper, "Credential helper has no entry");
            return Ok(Authenticator::Anonymous);
        }
        return Err(Error::keychain(format!(
            "{program} get failed: {} {}",
            stdout.trim(),
            stderr.trim()
        )));
    }

    let creds: HelperCredentials = serde_json::from_str(stdout.trim())
        .map_err(|e| Error::keychain(format!("invalid output from {program}: {e}")))?;

    let config = if creds.username == IDENTITY_TOKEN_USERNAME {
        AuthConfig::from_parts(None, None, None, Some(creds.secret), None)
    } else {
        AuthConfig::from_parts(Some(creds.username), Some(creds.secret), None, None, None)
    };

    Ok(Authenticator::from_config(config))
}
