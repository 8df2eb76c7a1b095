//! The `containerregistry_image` data source.
//!
//! A read parses the image reference, picks credentials and asks the
//! registry for the manifest digest. Credentials are chosen in a fixed
//! order: the data source's own `auth` block, then the provider block for
//! the reference's registry, then the default keychain.

use std::fmt;

use containerregistry_oci::{Authenticator, DigestResolver, ImageReference, Keychain};
use containerregistry_tfplugin::value::ObjectView;
use containerregistry_tfplugin::{AttrValue, Diagnostics, ProviderDiagnostic};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::{AUTH_BLOCK, AuthBlock, ProviderConfig};
use crate::schema::NAME;

/// Where the credentials for a read came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSource {
    /// The data source's own `auth` block.
    Explicit,
    /// The provider `auth` block for the registry.
    Provider,
    /// The default keychain.
    Keychain,
}

impl fmt::Display for AuthSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Explicit => "explicit",
            Self::Provider => "provider",
            Self::Keychain => "keychain",
        })
    }
}

/// Data source configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    /// Image reference as written
    pub name: AttrValue<String>,
    /// Per-read credentials
    pub auth: Option<AuthBlock>,
}

impl ImageConfig {
    /// Decodes the data source configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not have the data source schema's
    /// shape.
    pub fn from_value(value: &rmpv::Value) -> containerregistry_tfplugin::Result<Self> {
        let Some(root) = ObjectView::new(value)? else {
            return Ok(Self {
                name: AttrValue::Null,
                auth: None,
            });
        };

        let auth = match root.blocks(AUTH_BLOCK)? {
            AttrValue::Known(blocks) => blocks.first().map(AuthBlock::from_view).transpose()?,
            AttrValue::Null | AttrValue::Unknown => None,
        };

        Ok(Self {
            name: root.string(NAME)?,
            auth,
        })
    }
}

/// Credentials echoed into state, mirroring the configured `auth` block.
#[derive(Clone, Serialize, PartialEq, Eq)]
pub struct AuthState {
    username: Option<String>,
    password: Option<String>,
    auth: Option<String>,
    identity_token: Option<String>,
    registry_token: Option<String>,
}

impl From<&AuthBlock> for AuthState {
    fn from(block: &AuthBlock) -> Self {
        Self {
            username: block.username.clone(),
            password: block.password.clone(),
            auth: block.auth.clone(),
            identity_token: block.identity_token.clone(),
            registry_token: block.registry_token.clone(),
        }
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthState")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// State written after a successful read.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImageState {
    /// Resource identifier; always the digest
    pub id: String,
    /// Image reference as written
    pub name: String,
    /// Manifest digest
    pub digest: String,
    /// Configured `auth` block, if any
    pub auth: Vec<AuthState>,
}

/// Picks the authenticator for `reference`.
///
/// # Errors
///
/// Returns an error if the keychain has to be consulted and fails.
pub async fn select_authenticator(
    explicit: Option<&AuthBlock>,
    provider: &ProviderConfig,
    reference: &ImageReference,
    keychain: &dyn Keychain,
) -> containerregistry_oci::Result<(Authenticator, AuthSource)> {
    if let Some(block) = explicit {
        return Ok((block.authenticator(), AuthSource::Explicit));
    }
    if let Some(authenticator) = provider.authenticator_for(reference) {
        return Ok((authenticator.clone(), AuthSource::Provider));
    }
    let authenticator = keychain.resolve(reference.registry_str()).await?;
    Ok((authenticator, AuthSource::Keychain))
}

/// Summary of a reference parse failure.
#[must_use]
pub fn parse_error(err: &containerregistry_oci::Error) -> ProviderDiagnostic {
    ProviderDiagnostic::error(format!("Error parsing reference: {err}"))
}

/// Summary of a registry or keychain failure.
#[must_use]
pub fn query_error(err: &dyn fmt::Display) -> ProviderDiagnostic {
    ProviderDiagnostic::error(format!("Error querying image: {err}"))
}

/// Resolves the digest for a configured data source.
///
/// # Errors
///
/// Returns the diagnostic to report when the name is missing or cannot be
/// parsed, or when the registry query fails.
#[instrument(name = "image_read", skip_all, fields(name = tracing::field::Empty))]
pub async fn read(
    config: &ImageConfig,
    provider: &ProviderConfig,
    keychain: &dyn Keychain,
    resolver: &dyn DigestResolver,
) -> Result<ImageState, ProviderDiagnostic> {
    let AttrValue::Known(name) = &config.name else {
        return Err(ProviderDiagnostic::error("Missing image name")
            .with_detail("The name attribute must be known before the image can be read.")
            .with_attribute([NAME]));
    };
    tracing::Span::current().record("name", name.as_str());

    let reference = ImageReference::parse(name).map_err(|e| parse_error(&e))?;

    let (authenticator, source) =
        select_authenticator(config.auth.as_ref(), provider, &reference, keychain)
            .await
            .map_err(|e| query_error(&e))?;
    debug!(
        registry = reference.registry_str(),
        %source,
        kind = authenticator.kind(),
        "Selected authenticator"
    );

    let digest = resolver
        .resolve_digest(&reference, &authenticator)
        .await
        .map_err(|e| query_error(&e))?;
    info!(reference = %reference, %digest, "Resolved image digest");

    Ok(ImageState {
        id: digest.clone(),
        name: name.clone(),
        digest,
        auth: config.auth.iter().map(AuthState::from).collect(),
    })
}

/// Early checks for `ValidateDataResourceConfig`: a known name must parse.
#[must_use]
pub fn validate(config: &ImageConfig) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    if let AttrValue::Known(name) = &config.name {
        if let Err(err) = ImageReference::parse(name) {
            diagnostics.push(parse_error(&err).with_attribute([NAME]));
        }
    }
    diagnostics
}
