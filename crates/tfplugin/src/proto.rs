//! Generated protocol bindings.
//!
//! `tfplugin6` is the Terraform provider protocol; `plugin` carries
//! go-plugin's controller service used for graceful shutdown.

#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used
)]
pub mod tfplugin6 {
    tonic::include_proto!("tfplugin6");
}

#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used
)]
pub mod plugin {
    tonic::include_proto!("plugin");
}

pub use tfplugin6::*;
