//! Error types for registry operations.

use thiserror::Error;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving an image digest.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to parse image reference.
    #[error("could not parse reference: {0}: {1}")]
    InvalidReference(String, String),

    /// Registry rejected the supplied credentials.
    #[error("authentication failed for registry '{0}': {1}")]
    AuthenticationFailed(String, String),

    /// Image, tag or manifest not found.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// No manifest in an index matches the requested platform.
    #[error("no child with platform {platform} in index {image}")]
    PlatformNotAvailable {
        /// The image reference.
        image: String,
        /// The requested platform.
        platform: String,
    },

    /// The registry answered with an unexpected status.
    #[error("unexpected status code {status} from {url}: {body}")]
    UnexpectedStatus {
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body (possibly truncated).
        body: String,
    },

    /// The registry sent a challenge we cannot answer.
    #[error("unsupported authentication challenge from {registry}: {challenge}")]
    UnsupportedChallenge {
        /// Registry host.
        registry: String,
        /// Raw `WWW-Authenticate` header.
        challenge: String,
    },

    /// Manifest content does not match the pinned or advertised digest.
    #[error("manifest digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The expected digest.
        expected: String,
        /// The computed digest.
        actual: String,
    },

    /// Credential store lookup failed.
    #[error("keychain error: {0}")]
    Keychain(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid reference error.
    #[must_use]
    pub fn invalid_reference(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidReference(reference.into(), message.into())
    }

    /// Create a platform not available error.
    #[must_use]
    pub fn platform_not_available(image: impl Into<String>, platform: impl Into<String>) -> Self {
        Self::PlatformNotAvailable {
            image: image.into(),
            platform: platform.into(),
        }
    }

    /// Create a digest mismatch error.
    #[must_use]
    pub fn digest_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::DigestMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a keychain error.
    #[must_use]
    pub fn keychain(message: impl Into<String>) -> Self {
        Self::Keychain(message.into())
    }

    /// Whether the error came from parsing the reference rather than talking
    /// to a registry.
    #[must_use]
    pub const fn is_invalid_reference(&self) -> bool {
        matches!(self, Self::InvalidReference(..))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_mismatch_error() {
        let err = Error::digest_mismatch("sha256:expected", "sha256:actual");
        let msg = err.to_string();
        assert!(msg.contains("sha256:expected"));
        assert!(msg.contains("sha256:actual"));
    }

    #[test]
    fn test_invalid_reference_error() {
        let err = Error::invalid_reference("bad image", "invalid reference format");
        assert!(err.is_invalid_reference());
        assert_eq!(
            err.to_string(),
            "could not parse reference: bad image: invalid reference format"
        );
    }

    #[test]
    fn test_platform_not_available_error() {
        let err = Error::platform_not_available("nginx:latest", "linux/s390x");
        assert!(!err.is_invalid_reference());
        assert!(err.to_string().contains("linux/s390x"));
    }
}
