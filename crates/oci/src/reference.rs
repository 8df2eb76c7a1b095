//! Image reference parsing.
//!
//! Wraps `oci_distribution::Reference` and layers on the registry naming
//! rules the provider needs: Docker Hub is always keyed as
//! `index.docker.io`, and loopback or private-network registries may be spoken
//! to over plain HTTP.

use std::fmt;
use std::net::IpAddr;

use oci_distribution::Reference;

use crate::{Error, Result};

/// Canonical registry name for Docker Hub.
pub const DOCKER_HUB_REGISTRY: &str = "index.docker.io";

/// Registry names that all mean Docker Hub.
const DOCKER_HUB_ALIASES: &[&str] = &["docker.io", "index.docker.io", "registry-1.docker.io"];

/// Tag used when a reference names neither a tag nor a digest.
const DEFAULT_TAG: &str = "latest";

/// A parsed image reference (`registry/repository[:tag][@digest]`).
#[derive(Debug, Clone)]
pub struct ImageReference {
    inner: Reference,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidReference`] when the string is not a valid
    /// reference.
    pub fn parse(image: &str) -> Result<Self> {
        let inner: Reference = image.parse().map_err(|e: oci_distribution::ParseError| {
            Error::invalid_reference(image, e.to_string())
        })?;

        Ok(Self { inner })
    }

    /// The registry key used to look up per-registry authenticators.
    ///
    /// Docker Hub references normalise to [`DOCKER_HUB_REGISTRY`].
    #[must_use]
    pub fn registry_str(&self) -> &str {
        let registry = self.inner.registry();
        if is_docker_hub(registry) {
            DOCKER_HUB_REGISTRY
        } else {
            registry
        }
    }

    /// Every registry name a configured authenticator may use for this
    /// reference, most specific first.
    #[must_use]
    pub fn registry_aliases(&self) -> Vec<&str> {
        if is_docker_hub(self.inner.registry()) {
            vec![DOCKER_HUB_REGISTRY, "docker.io"]
        } else {
            vec![self.registry_str()]
        }
    }

    /// Repository path within the registry (e.g. `library/nginx`).
    #[must_use]
    pub fn repository(&self) -> &str {
        self.inner.repository()
    }

    /// Tag, if the reference carries one.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.inner.tag()
    }

    /// Digest, if the reference pins one.
    #[must_use]
    pub fn digest(&self) -> Option<&str> {
        self.inner.digest()
    }

    /// The `<reference>` path segment of a manifest request.
    ///
    /// A pinned digest wins over the tag.
    #[must_use]
    pub fn manifest_reference(&self) -> &str {
        self.digest().or_else(|| self.tag()).unwrap_or(DEFAULT_TAG)
    }

    /// Fully-qualified form of the reference.
    #[must_use]
    pub fn whole(&self) -> String {
        self.inner.whole()
    }

    /// Whether the registry may be spoken to over plain HTTP: loopback and
    /// private (RFC 1918) addresses.
    #[must_use]
    pub fn allows_plain_http(&self) -> bool {
        allows_plain_http(self.registry_str())
    }

    /// HTTPS scheme and authority for registry API requests.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("https://{}", self.registry_str())
    }

    /// Plain HTTP scheme and authority, tried when the HTTPS endpoint cannot
    /// be reached. `None` unless [`allows_plain_http`](Self::allows_plain_http).
    #[must_use]
    pub fn plain_http_endpoint(&self) -> Option<String> {
        self.allows_plain_http()
            .then(|| format!("http://{}", self.registry_str()))
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.whole())
    }
}

fn is_docker_hub(registry: &str) -> bool {
    DOCKER_HUB_ALIASES.contains(&registry)
}

/// Whether a registry host (optionally with port) is a loopback or private
/// network address.
fn allows_plain_http(registry: &str) -> bool {
    let host = if let Some(rest) = registry.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else if registry.matches(':').count() > 1 {
        registry
    } else {
        registry.split(':').next().unwrap_or(registry)
    };

    if host == "localhost" {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ip.is_loopback() || ip.is_private(),
        Ok(IpAddr::V6(ip)) => ip.is_loopback(),
        Err(_) => false,
    }
}
