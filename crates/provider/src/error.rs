//! Error types for the provider.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using the provider error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while starting or running the provider.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Registry client or keychain failure.
    #[error(transparent)]
    #[diagnostic(code(containerregistry_provider::registry))]
    Registry(#[from] containerregistry_oci::Error),

    /// Plugin protocol failure.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Plugin(#[from] containerregistry_tfplugin::Error),

    /// The read was cancelled by `StopProvider`.
    #[error("provider is stopping")]
    #[diagnostic(code(containerregistry_provider::stopped))]
    Stopped,
}
