//! # containerregistry-tfplugin
//!
//! Server side of the Terraform plugin protocol, version 6.
//!
//! Terraform talks to providers through HashiCorp's go-plugin: it starts the
//! provider binary, reads a handshake line from its stdout and connects over
//! gRPC, usually with mutual TLS. This crate provides those pieces:
//!
//! - [`handshake`]: environment checks and the handshake line
//! - [`tls`]: AutoMTLS with a per-process certificate
//! - [`value`]: msgpack `DynamicValue` decoding and encoding
//! - [`schema`] and [`diagnostics`]: builders for the wire types
//! - [`serve`]: runs a [`proto::provider_server::Provider`] implementation
//!
//! ## Example
//!
//! ```ignore
//! use containerregistry_tfplugin::{ServeConfig, serve};
//!
//! serve(MyProvider::default(), ServeConfig::default()).await?;
//! ```

#![warn(missing_docs)]

pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod handshake;
pub mod proto;
pub mod schema;
pub mod server;
pub mod tls;
pub mod value;

pub use diagnostics::{DiagnosticSeverity, Diagnostics, ProviderDiagnostic};
pub use error::{Error, Result};
pub use handshake::{HandshakeLine, PluginEnv};
pub use schema::{AttributeBuilder, BlockBuilder};
pub use server::{PluginServer, ServeConfig, serve};
pub use value::{AttrValue, ObjectView};
