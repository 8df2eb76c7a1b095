//! Registry authenticators.
//!
//! An [`AuthConfig`] is the credential bundle a registry client presents. It
//! mirrors the fields of a Docker `config.json` auth entry so that provider
//! blocks, credential helpers and config files all land in the same shape.

use base64::Engine;
use secrecy::{ExposeSecret, SecretString};

/// Credential bundle for a single registry.
///
/// Secret fields are wrapped so `Debug` output never contains them.
#[derive(Debug, Default)]
pub struct AuthConfig {
    /// Username for basic authentication.
    pub username: Option<String>,
    /// Password for basic authentication.
    pub password: Option<SecretString>,
    /// Pre-encoded `base64(username:password)` string.
    pub auth: Option<SecretString>,
    /// OAuth2 refresh token exchanged for a registry token.
    pub identity_token: Option<SecretString>,
    /// Bearer token sent to the registry as-is.
    pub registry_token: Option<SecretString>,
}

impl Clone for AuthConfig {
    fn clone(&self) -> Self {
        let copy = |secret: &Option<SecretString>| {
            secret
                .as_ref()
                .map(|s| SecretString::from(s.expose_secret().to_string()))
        };
        Self {
            username: self.username.clone(),
            password: copy(&self.password),
            auth: copy(&self.auth),
            identity_token: copy(&self.identity_token),
            registry_token: copy(&self.registry_token),
        }
    }
}

impl AuthConfig {
    /// Build a config from optional plain strings, dropping empty values.
    #[must_use]
    pub fn from_parts(
        username: Option<String>,
        password: Option<String>,
        auth: Option<String>,
        identity_token: Option<String>,
        registry_token: Option<String>,
    ) -> Self {
        Self {
            username: non_empty(username),
            password: non_empty(password).map(SecretString::from),
            auth: non_empty(auth).map(SecretString::from),
            identity_token: non_empty(identity_token).map(SecretString::from),
            registry_token: non_empty(registry_token).map(SecretString::from),
        }
    }

    /// Whether no credential field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.password.is_none()
            && self.auth.is_none()
            && self.identity_token.is_none()
            && self.registry_token.is_none()
    }

    /// Username and password, decoding the `auth` field when the plain
    /// fields are absent.
    #[must_use]
    pub fn basic_credentials(&self) -> Option<(String, String)> {
        if self.username.is_some() || self.password.is_some() {
            return Some((
                self.username.clone().unwrap_or_default(),
                self.password
                    .as_ref()
                    .map(|p| p.expose_secret().to_string())
                    .unwrap_or_default(),
            ));
        }

        self.auth
            .as_ref()
            .and_then(|auth| decode_auth(auth.expose_secret()))
    }

    /// `Authorization` header for a registry that issued a Basic challenge
    /// (or for the token endpoint of a Bearer challenge).
    ///
    /// Precedence: `auth`, identity token, registry token, then
    /// username/password.
    #[must_use]
    pub fn basic_authorization(&self) -> Option<String> {
        if let Some(auth) = &self.auth {
            return Some(format!("Basic {}", auth.expose_secret()));
        }
        if let Some(token) = &self.identity_token {
            return Some(format!("Bearer {}", token.expose_secret()));
        }
        if let Some(token) = &self.registry_token {
            return Some(format!("Bearer {}", token.expose_secret()));
        }
        if self.username.is_some() || self.password.is_some() {
            let (username, password) = self.basic_credentials().unwrap_or_default();
            let encoded = base64::engine::general_purpose::STANDARD
                .encode(format!("{username}:{password}"));
            return Some(format!("Basic {encoded}"));
        }
        None
    }
}

/// Credentials used for a registry request.
#[derive(Debug, Clone, Default)]
pub enum Authenticator {
    /// No credentials.
    #[default]
    Anonymous,
    /// An explicit credential bundle.
    Credentials(AuthConfig),
}

impl Authenticator {
    /// Wrap a config, collapsing an empty one to [`Authenticator::Anonymous`].
    #[must_use]
    pub fn from_config(config: AuthConfig) -> Self {
        if config.is_empty() {
            Self::Anonymous
        } else {
            Self::Credentials(config)
        }
    }

    /// The underlying credential bundle, if any.
    #[must_use]
    pub const fn config(&self) -> Option<&AuthConfig> {
        match self {
            Self::Anonymous => None,
            Self::Credentials(config) => Some(config),
        }
    }

    /// Short label for logs; never contains secret material.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self.config() {
            None => "anonymous",
            Some(c) if c.registry_token.is_some() => "registry_token",
            Some(c) if c.identity_token.is_some() => "identity_token",
            Some(c) if c.auth.is_some() => "auth",
            Some(_) => "basic",
        }
    }

    /// See [`AuthConfig::basic_authorization`].
    #[must_use]
    pub fn basic_authorization(&self) -> Option<String> {
        self.config().and_then(AuthConfig::basic_authorization)
    }
}

impl From<AuthConfig> for Authenticator {
    fn from(config: AuthConfig) -> Self {
        Self::from_config(config)
    }
}

/// Decode a base64-encoded `username:password` auth string.
#[must_use]
pub fn decode_auth(auth: &str) -> Option<(String, String)> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(auth.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
