//! # terraform-provider-containerregistry
//!
//! A Terraform provider with a single data source, `containerregistry_image`,
//! that resolves a container image reference to its manifest digest.
//!
//! ```hcl
//! provider "containerregistry" {
//!   auth {
//!     address  = "ghcr.io"
//!     username = "octo"
//!     password = var.ghcr_token
//!   }
//! }
//!
//! data "containerregistry_image" "app" {
//!   name = "ghcr.io/octo/app:1.2.3"
//! }
//! ```
//!
//! Credentials for a read come from the data source's `auth` block, then the
//! provider `auth` block for the registry, then the Docker keychain.

#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod data_source;
pub mod error;
pub mod schema;
pub mod service;
pub mod tracing;

pub use error::{Error, Result};
pub use service::ContainerRegistryProvider;
