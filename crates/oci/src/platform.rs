//! Platform selection for multi-platform images.
//!
//! An image index lists one manifest per platform; resolving a digest picks
//! the child whose platform satisfies the client's. The default is
//! `linux/amd64`, which is what registry tooling assumes when nothing else is
//! requested.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// An OCI platform (`os/architecture[/variant]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct Platform {
    /// Operating system (linux, windows, ...).
    pub os: String,
    /// CPU architecture in OCI spelling (amd64, arm64, ...).
    pub architecture: String,
    /// Architecture variant (v7, v8, ...).
    #[serde(default)]
    pub variant: Option<String>,
}

impl Platform {
    /// Create a new platform without a variant.
    #[must_use]
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
            variant: None,
        }
    }

    /// Set the architecture variant.
    #[must_use]
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// Whether `candidate` (from an index entry) is acceptable for this
    /// platform.
    ///
    /// OS and architecture must be equal; the variant is only compared when
    /// this platform names one.
    #[must_use]
    pub fn satisfied_by(&self, candidate: &Self) -> bool {
        if self.os != candidate.os || self.architecture != candidate.architecture {
            return false;
        }
        match &self.variant {
            Some(variant) => candidate.variant.as_deref() == Some(variant.as_str()),
            None => true,
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::new("linux", "amd64")
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{variant}")?;
        }
        Ok(())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [os, arch] if !os.is_empty() && !arch.is_empty() => {
                Ok(Self::new(*os, normalize_architecture(arch)))
            }
            [os, arch, variant] if !os.is_empty() && !arch.is_empty() && !variant.is_empty() => {
                Ok(Self::new(*os, normalize_architecture(arch)).with_variant(*variant))
            }
            _ => Err(format!("invalid platform '{s}': expected os/arch[/variant]")),
        }
    }
}

/// Map common architecture spellings to the OCI ones.
fn normalize_architecture(arch: &str) -> String {
    match arch.to_lowercase().as_str() {
        "x86_64" | "x86-64" => "amd64".to_string(),
        "aarch64" => "arm64".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_platform() {
        let p = Platform::default();
        assert_eq!(p.os, "linux");
        assert_eq!(p.architecture, "amd64");
        assert_eq!(p.to_string(), "linux/amd64");
    }

    #[test]
    fn test_platform_parse() {
        let p: Platform = "linux/arm64".parse().unwrap();
        assert_eq!(p, Platform::new("linux", "arm64"));

        let p: Platform = "linux/arm/v7".parse().unwrap();
        assert_eq!(p.variant.as_deref(), Some("v7"));
        assert_eq!(p.to_string(), "linux/arm/v7");
    }

    #[test]
    fn test_platform_parse_normalizes_arch() {
        let p: Platform = "linux/x86_64".parse().unwrap();
        assert_eq!(p.architecture, "amd64");

        let p: Platform = "linux/aarch64".parse().unwrap();
        assert_eq!(p.architecture, "arm64");
    }

    #[test]
    fn test_platform_parse_invalid() {
        assert!("linux".parse::<Platform>().is_err());
        assert!("linux/".parse::<Platform>().is_err());
        assert!("a/b/c/d".parse::<Platform>().is_err());
    }

    #[test]
    fn test_satisfied_by_ignores_variant_when_unset() {
        let wanted = Platform::new("linux", "arm64");
        assert!(wanted.satisfied_by(&Platform::new("linux", "arm64").with_variant("v8")));
        assert!(!wanted.satisfied_by(&Platform::new("linux", "amd64")));
        assert!(!wanted.satisfied_by(&Platform::new("windows", "arm64")));
    }

    #[test]
    fn test_satisfied_by_checks_variant_when_set() {
        let wanted = Platform::new("linux", "arm").with_variant("v7");
        assert!(wanted.satisfied_by(&Platform::new("linux", "arm").with_variant("v7")));
        assert!(!wanted.satisfied_by(&Platform::new("linux", "arm").with_variant("v6")));
        assert!(!wanted.satisfied_by(&Platform::new("linux", "arm")));
    }

    #[test]
    fn test_platform_deserialize() {
        let p: Platform =
            serde_json::from_str(r#"{"architecture":"arm64","os":"linux","variant":"v8"}"#)
                .unwrap();
        assert_eq!(p, Platform::new("linux", "arm64").with_variant("v8"));
    }
}
