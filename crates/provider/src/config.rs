//! Provider configuration: credentials keyed by registry address.

use std::collections::HashMap;
use std::fmt;

use containerregistry_oci::{AuthConfig, Authenticator, ImageReference};
use containerregistry_tfplugin::value::ObjectView;
use containerregistry_tfplugin::{AttrValue, Diagnostics, ProviderDiagnostic};
use tracing::{debug, warn};

/// Name of the credentials block, on the provider and on the data source.
pub const AUTH_BLOCK: &str = "auth";
/// Registry address attribute of a provider `auth` block.
pub const ADDRESS: &str = "address";
/// Username attribute.
pub const USERNAME: &str = "username";
/// Password attribute.
pub const PASSWORD: &str = "password";
/// Base64 `user:pass` attribute.
pub const AUTH: &str = "auth";
/// Identity (refresh) token attribute.
pub const IDENTITY_TOKEN: &str = "identity_token";
/// Registry (bearer) token attribute.
pub const REGISTRY_TOKEN: &str = "registry_token";

/// Credential attributes shared by both `auth` block flavours.
pub const CREDENTIAL_FIELDS: [&str; 5] = [USERNAME, PASSWORD, AUTH, IDENTITY_TOKEN, REGISTRY_TOKEN];

/// One `auth` block as written in configuration.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthBlock {
    /// Registry the credentials apply to (provider blocks only)
    pub address: Option<String>,
    /// Registry username
    pub username: Option<String>,
    /// Registry password
    pub password: Option<String>,
    /// Base64 encoded `username:password`
    pub auth: Option<String>,
    /// OAuth2 refresh token
    pub identity_token: Option<String>,
    /// Bearer token sent to the registry as is
    pub registry_token: Option<String>,
}

impl AuthBlock {
    /// Reads a block. Null and unknown attributes are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns an error if an attribute is not a string.
    pub fn from_view(view: &ObjectView<'_>) -> containerregistry_tfplugin::Result<Self> {
        Ok(Self {
            address: view.optional_string(ADDRESS)?,
            username: view.optional_string(USERNAME)?,
            password: view.optional_string(PASSWORD)?,
            auth: view.optional_string(AUTH)?,
            identity_token: view.optional_string(IDENTITY_TOKEN)?,
            registry_token: view.optional_string(REGISTRY_TOKEN)?,
        })
    }

    /// Credential attributes of `view` whose value is not known yet.
    ///
    /// # Errors
    ///
    /// Returns an error if an attribute is not a string.
    pub fn unknown_fields(view: &ObjectView<'_>) -> containerregistry_tfplugin::Result<Vec<&'static str>> {
        let mut unknown = Vec::new();
        for field in std::iter::once(ADDRESS).chain(CREDENTIAL_FIELDS) {
            if view.string(field)?.is_unknown() {
                unknown.push(field);
            }
        }
        Ok(unknown)
    }

    /// Credential bundle for the registry client.
    #[must_use]
    pub fn to_auth_config(&self) -> AuthConfig {
        AuthConfig::from_parts(
            self.username.clone(),
            self.password.clone(),
            self.auth.clone(),
            self.identity_token.clone(),
            self.registry_token.clone(),
        )
    }

    /// Authenticator built from the block; anonymous when every credential
    /// is empty.
    #[must_use]
    pub fn authenticator(&self) -> Authenticator {
        Authenticator::from_config(self.to_auth_config())
    }
}

impl fmt::Debug for AuthBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("AuthBlock")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("auth", &redact(&self.auth))
            .field("identity_token", &redact(&self.identity_token))
            .field("registry_token", &redact(&self.registry_token))
            .finish()
    }
}

/// Configured provider state: one authenticator per registry address.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    authenticators: HashMap<String, Authenticator>,
}

impl ProviderConfig {
    /// Builds the map from `auth` blocks. A later block for the same address
    /// replaces an earlier one; blocks without an address are skipped.
    #[must_use]
    pub fn from_blocks(blocks: impl IntoIterator<Item = AuthBlock>) -> Self {
        let mut authenticators = HashMap::new();
        for block in blocks {
            let Some(address) = block.address.clone() else {
                continue;
            };
            let authenticator = block.authenticator();
            debug!(address = %address, kind = authenticator.kind(), "Configured registry credentials");
            if authenticators.insert(address.clone(), authenticator).is_some() {
                debug!(address = %address, "Later auth block overrides earlier one");
            }
        }
        Self { authenticators }
    }

    /// Decodes the provider block sent with `ConfigureProvider`.
    ///
    /// Values Terraform does not know yet cannot be used; they are dropped
    /// with a warning rather than failing the whole configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not have the provider schema's shape.
    pub fn from_value(value: &rmpv::Value) -> containerregistry_tfplugin::Result<(Self, Diagnostics)> {
        let mut diagnostics = Diagnostics::new();
        let Some(root) = ObjectView::new(value)? else {
            return Ok((Self::default(), diagnostics));
        };

        let blocks = match root.blocks(AUTH_BLOCK)? {
            AttrValue::Known(blocks) => blocks,
            AttrValue::Null => Vec::new(),
            AttrValue::Unknown => {
                warn!("Provider auth blocks are not known yet, ignoring them");
                diagnostics.push(
                    ProviderDiagnostic::warning("Provider credentials not known yet")
                        .with_detail(
                            "The auth blocks depend on values that are only known after apply; \
                             registries will be queried with the default keychain.",
                        )
                        .with_attribute([AUTH_BLOCK]),
                );
                Vec::new()
            }
        };

        let mut parsed = Vec::with_capacity(blocks.len());
        for (index, block) in blocks.iter().enumerate() {
            for field in AuthBlock::unknown_fields(block)? {
                diagnostics.push(
                    ProviderDiagnostic::warning(format!("Value of {field} not known yet"))
                        .with_detail("The attribute is ignored until its value is known.")
                        .with_attribute([AUTH_BLOCK.to_string(), index.to_string(), field.to_string()]),
                );
            }
            parsed.push(AuthBlock::from_view(block)?);
        }

        Ok((Self::from_blocks(parsed), diagnostics))
    }

    /// The authenticator configured for the reference's registry.
    #[must_use]
    pub fn authenticator_for(&self, reference: &ImageReference) -> Option<&Authenticator> {
        reference
            .registry_aliases()
            .into_iter()
            .find_map(|registry| self.authenticators.get(registry))
    }

    /// Number of configured registries.
    #[must_use]
    pub fn registry_count(&self) -> usize {
        self.authenticators.len()
    }
}

/// Checks a provider block before it is configured.
///
/// # Errors
///
/// Returns an error if the value does not have the provider schema's shape.
pub fn validate(value: &rmpv::Value) -> containerregistry_tfplugin::Result<Diagnostics> {
    let mut diagnostics = Diagnostics::new();
    let Some(root) = ObjectView::new(value)? else {
        return Ok(diagnostics);
    };
    let AttrValue::Known(blocks) = root.blocks(AUTH_BLOCK)? else {
        return Ok(diagnostics);
    };

    for (index, block) in blocks.iter().enumerate() {
        let AttrValue::Known(address) = block.string(ADDRESS)? else {
            continue;
        };
        if address.trim().is_empty() {
            diagnostics.push(
                ProviderDiagnostic::error("Invalid registry address")
                    .with_detail("The address of an auth block must name a registry, e.g. \"ghcr.io\".")
                    .with_attribute([AUTH_BLOCK.to_string(), index.to_string(), ADDRESS.to_string()]),
            );
        }
    }
    Ok(diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmpv::Value;

    fn unknown() -> Value {
        Value::Ext(0, vec![0])
    }

    fn object(entries: Vec<(&str, Value)>) -> Value {
        Value::Map(entries.into_iter().map(|(k, v)| (Value::from(k), v)).collect())
    }

    fn auth_block(address: &str, username: &str, password: &str) -> Value {
        object(vec![
            (ADDRESS, Value::from(address)),
            (USERNAME, Value::from(username)),
            (PASSWORD, Value::from(password)),
            (AUTH, Value::Nil),
            (IDENTITY_TOKEN, Value::Nil),
            (REGISTRY_TOKEN, Value::Nil),
        ])
    }

    fn provider(blocks: Vec<Value>) -> Value {
        object(vec![(AUTH_BLOCK, Value::Array(blocks))])
    }

    fn username(authenticator: &Authenticator) -> Option<&str> {
        authenticator.config().and_then(|c| c.username.as_deref())
    }

    fn lookup<'a>(config: &'a ProviderConfig, image: &str) -> Option<&'a Authenticator> {
        config.authenticator_for(&ImageReference::parse(image).unwrap())
    }

    // ==========================================================================
    // configure
    // ==========================================================================

    #[test]
    fn test_blocks_keyed_by_address() {
        let (config, diagnostics) = ProviderConfig::from_value(&provider(vec![
            auth_block("ghcr.io", "octo", "pat"),
            auth_block("quay.io", "red", "hat"),
        ]))
        .unwrap();

        assert!(diagnostics.is_empty());
        assert_eq!(config.registry_count(), 2);
        assert_eq!(username(lookup(&config, "ghcr.io/owner/app").unwrap()), Some("octo"));
        assert_eq!(username(lookup(&config, "quay.io/owner/app").unwrap()), Some("red"));
    }

    #[test]
    fn test_later_block_overrides_earlier() {
        let (config, _) = ProviderConfig::from_value(&provider(vec![
            auth_block("ghcr.io", "first", "a"),
            auth_block("ghcr.io", "second", "b"),
        ]))
        .unwrap();

        assert_eq!(config.registry_count(), 1);
        assert_eq!(username(lookup(&config, "ghcr.io/owner/app").unwrap()), Some("second"));
    }

    #[test]
    fn test_null_config_is_empty() {
        let (config, diagnostics) = ProviderConfig::from_value(&Value::Nil).unwrap();
        assert_eq!(config.registry_count(), 0);
        assert!(diagnostics.is_empty());

        let (config, _) = ProviderConfig::from_value(&object(vec![(AUTH_BLOCK, Value::Nil)])).unwrap();
        assert_eq!(config.registry_count(), 0);
    }

    #[test]
    fn test_empty_credentials_are_anonymous() {
        let (config, _) =
            ProviderConfig::from_value(&provider(vec![auth_block("ghcr.io", "", "")])).unwrap();
        assert!(matches!(lookup(&config, "ghcr.io/owner/app"), Some(Authenticator::Anonymous)));
    }

    #[test]
    fn test_unknown_values_warn() {
        let block = object(vec![
            (ADDRESS, Value::from("ghcr.io")),
            (USERNAME, Value::from("octo")),
            (REGISTRY_TOKEN, unknown()),
        ]);
        let (config, diagnostics) = ProviderConfig::from_value(&provider(vec![block])).unwrap();
        assert_eq!(config.registry_count(), 1);
        assert!(!diagnostics.has_errors());
        assert_eq!(diagnostics.iter().count(), 1);

        let (config, diagnostics) =
            ProviderConfig::from_value(&object(vec![(AUTH_BLOCK, unknown())])).unwrap();
        assert_eq!(config.registry_count(), 0);
        assert!(!diagnostics.is_empty());
    }

    #[test]
    fn test_wrong_shape_is_error() {
        assert!(ProviderConfig::from_value(&Value::from("nope")).is_err());
        assert!(ProviderConfig::from_value(&object(vec![(AUTH_BLOCK, Value::from(1))])).is_err());
    }

    #[test]
    fn test_docker_hub_aliases() {
        let config = ProviderConfig::from_blocks([AuthBlock {
            address: Some("docker.io".to_string()),
            username: Some("whale".to_string()),
            password: Some("pw".to_string()),
            ..AuthBlock::default()
        }]);

        let reference = ImageReference::parse("library/alpine:3.20").unwrap();
        assert_eq!(username(config.authenticator_for(&reference).unwrap()), Some("whale"));

        let other = ImageReference::parse("ghcr.io/octo/app:1").unwrap();
        assert!(config.authenticator_for(&other).is_none());
    }

    #[test]
    fn test_canonical_docker_hub_address_wins() {
        let config = ProviderConfig::from_blocks([
            AuthBlock {
                address: Some("index.docker.io".to_string()),
                username: Some("canonical".to_string()),
                ..AuthBlock::default()
            },
            AuthBlock {
                address: Some("docker.io".to_string()),
                username: Some("short".to_string()),
                ..AuthBlock::default()
            },
        ]);

        assert_eq!(username(lookup(&config, "docker.io/library/alpine").unwrap()), Some("canonical"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let block = AuthBlock {
            address: Some("ghcr.io".to_string()),
            username: Some("octo".to_string()),
            password: Some("hunter2".to_string()),
            ..AuthBlock::default()
        };
        let debug = format!("{block:?}");
        assert!(debug.contains("octo"));
        assert!(!debug.contains("hunter2"));
    }

    // ==========================================================================
    // validate
    // ==========================================================================

    #[test]
    fn test_validate_rejects_empty_address() {
        let diagnostics = validate(&provider(vec![
            auth_block("ghcr.io", "a", "b"),
            auth_block(" ", "a", "b"),
        ]))
        .unwrap();

        assert!(diagnostics.has_errors());
        let diagnostic = diagnostics.iter().next().unwrap();
        assert_eq!(
            diagnostic.attribute_path.as_deref(),
            Some(&["auth".to_string(), "1".to_string(), "address".to_string()][..])
        );
    }

    #[test]
    fn test_validate_accepts_unknown_address() {
        let block = object(vec![(ADDRESS, unknown())]);
        assert!(validate(&provider(vec![block])).unwrap().is_empty());
        assert!(validate(&Value::Nil).unwrap().is_empty());
    }
}
