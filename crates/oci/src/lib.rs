//! Container registry access for the containerregistry provider.
//!
//! This crate provides functionality to:
//! - Parse image references and derive the registry they live on
//! - Model registry credentials ([`Authenticator`]) and resolve them from the
//!   local Docker/Podman credential stores ([`DockerKeychain`])
//! - Resolve an image reference to its manifest digest ([`RegistryClient`])
//!
//! # Example
//!
//! ```ignore
//! use containerregistry_oci::{
//!     DigestResolver, DockerKeychain, ImageReference, Keychain, RegistryClient,
//! };
//!
//! let reference = ImageReference::parse("ghcr.io/distroless/static:nonroot")?;
//! let auth = DockerKeychain::new().resolve(reference.registry_str()).await?;
//! let digest = RegistryClient::new()?.resolve_digest(&reference, &auth).await?;
//! ```

#![warn(missing_docs)]

mod auth;
mod challenge;
mod error;
mod keychain;
mod platform;
mod reference;
mod registry;

pub use auth::{AuthConfig, Authenticator, decode_auth};
pub use challenge::Challenge;
pub use error::{Error, Result};
pub use keychain::{
    DOCKER_HUB_CONFIG_KEY, DockerKeychain, Keychain, StaticKeychain, discover_config_path,
    server_key,
};
pub use platform::Platform;
pub use reference::{DOCKER_HUB_REGISTRY, ImageReference};
pub use registry::{
    DOCKER_MANIFEST_LIST_MEDIA_TYPE, DOCKER_MANIFEST_MEDIA_TYPE, DigestResolver,
    OCI_INDEX_MEDIA_TYPE, OCI_MANIFEST_MEDIA_TYPE, RegistryClient, sha256_digest,
};
