//! `WWW-Authenticate` challenge parsing.

use http_auth::ChallengeRef;
use http_auth::parser::ChallengeParser;

/// An authentication challenge issued by a registry's `/v2/` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    /// HTTP basic authentication.
    Basic {
        /// Protection space, if the registry named one.
        realm: Option<String>,
    },
    /// Docker token authentication.
    Bearer {
        /// Token endpoint URL.
        realm: String,
        /// Service the token is issued for.
        service: Option<String>,
        /// Scope the registry asked for, if any.
        scope: Option<String>,
    },
}

impl Challenge {
    /// Parse a `WWW-Authenticate` header value.
    ///
    /// A header may carry several challenges; Bearer wins over Basic.
    /// Returns `None` when neither scheme is offered, when a Bearer
    /// challenge has no realm, or when the header is malformed.
    #[must_use]
    pub fn parse(header: &str) -> Option<Self> {
        let challenges: Vec<ChallengeRef<'_>> =
            ChallengeParser::new(header).collect::<Result<_, _>>().ok()?;

        challenges
            .iter()
            .find_map(Self::bearer)
            .or_else(|| challenges.iter().find_map(Self::basic))
    }

    fn bearer(challenge: &ChallengeRef<'_>) -> Option<Self> {
        if !challenge.scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        Some(Self::Bearer {
            realm: param(challenge, "realm")?,
            service: param(challenge, "service"),
            scope: param(challenge, "scope"),
        })
    }

    fn basic(challenge: &ChallengeRef<'_>) -> Option<Self> {
        challenge
            .scheme
            .eq_ignore_ascii_case("basic")
            .then(|| Self::Basic {
                realm: param(challenge, "realm"),
            })
    }
}

/// Unescaped value of a challenge parameter; names compare case-insensitively.
fn param(challenge: &ChallengeRef<'_>, name: &str) -> Option<String> {
    challenge
        .params
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.to_unescaped())
}
