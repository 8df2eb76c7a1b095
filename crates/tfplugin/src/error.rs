//! Error types for the plugin server.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using the plugin error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving a provider.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// The process was not launched by Terraform.
    #[error(
        "This binary is a plugin. These are not meant to be executed directly. \
         Please execute the program that consumes these plugins, which will \
         load any plugins automatically"
    )]
    #[diagnostic(
        code(containerregistry_tfplugin::not_a_plugin_host),
        help("Run with --debug to start the provider for TF_REATTACH_PROVIDERS")
    )]
    MagicCookieMismatch,

    /// Terraform and the provider share no protocol version.
    #[error("Incompatible plugin protocol: Terraform offers {offered:?}, provider speaks {supported}")]
    #[diagnostic(
        code(containerregistry_tfplugin::protocol_mismatch),
        help("Use a Terraform release that supports plugin protocol v6 (Terraform 1.0+)")
    )]
    ProtocolMismatch {
        /// Versions listed in PLUGIN_PROTOCOL_VERSIONS
        offered: Vec<u32>,
        /// Version this provider implements
        supported: u32,
    },

    /// A go-plugin environment variable could not be interpreted.
    #[error("Invalid plugin environment {name}={value}: {message}")]
    #[diagnostic(code(containerregistry_tfplugin::invalid_environment))]
    InvalidEnvironment {
        /// Variable name
        name: String,
        /// Raw value
        value: String,
        /// What was wrong with it
        message: String,
    },

    /// No port in the configured range could be bound.
    #[error("Could not bind a port between {min} and {max}")]
    #[diagnostic(code(containerregistry_tfplugin::no_port))]
    NoAvailablePort {
        /// Lower bound
        min: u16,
        /// Upper bound
        max: u16,
    },

    /// gRPC transport error.
    #[error("gRPC transport error: {0}")]
    #[diagnostic(code(containerregistry_tfplugin::grpc_transport_error))]
    GrpcTransport(#[from] tonic::transport::Error),

    /// MessagePack encoding or decoding error.
    #[error("MessagePack serialization error: {0}")]
    #[diagnostic(code(containerregistry_tfplugin::msgpack_error))]
    MsgPack(String),

    /// A DynamicValue did not have the expected shape.
    #[error("Unexpected value for {path}: {message}")]
    #[diagnostic(code(containerregistry_tfplugin::invalid_value))]
    InvalidValue {
        /// Attribute path, dotted
        path: String,
        /// What was wrong with it
        message: String,
    },

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(containerregistry_tfplugin::serialization_error))]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    #[diagnostic(code(containerregistry_tfplugin::io_error))]
    Io(#[from] std::io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    #[diagnostic(code(containerregistry_tfplugin::tls_error))]
    Tls(String),
}

impl Error {
    /// Creates an invalid value error.
    #[must_use]
    pub fn invalid_value(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid environment error.
    #[must_use]
    pub fn invalid_environment(
        name: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidEnvironment {
            name: name.into(),
            value: value.into(),
            message: message.into(),
        }
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::MsgPack(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::MsgPack(err.to_string())
    }
}

impl From<rmpv::decode::Error> for Error {
    fn from(err: rmpv::decode::Error) -> Self {
        Self::MsgPack(err.to_string())
    }
}

impl From<rcgen::Error> for Error {
    fn from(err: rcgen::Error) -> Self {
        Self::Tls(err.to_string())
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Self::Tls(err.to_string())
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        match err {
            Error::MsgPack(_) | Error::InvalidValue { .. } | Error::Serialization(_) => {
                Self::invalid_argument(err.to_string())
            }
            _ => Self::internal(err.to_string()),
        }
    }
}
