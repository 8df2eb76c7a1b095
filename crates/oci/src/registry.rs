//! OCI distribution client for resolving manifest digests.
//!
//! Speaks just enough of the distribution API to answer "what digest does
//! this reference point at": the `/v2/` ping, Basic and Bearer token
//! challenges, and manifest / index fetches.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, trace, warn};

use crate::auth::{AuthConfig, Authenticator};
use crate::challenge::Challenge;
use crate::platform::Platform;
use crate::reference::ImageReference;
use crate::{Error, Result};

/// OCI image manifest.
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index.
pub const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
/// Docker image manifest, schema 2.
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
/// Docker manifest list.
pub const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

const ACCEPTED_MEDIA_TYPES: &[&str] = &[
    OCI_MANIFEST_MEDIA_TYPE,
    OCI_INDEX_MEDIA_TYPE,
    DOCKER_MANIFEST_MEDIA_TYPE,
    DOCKER_MANIFEST_LIST_MEDIA_TYPE,
];

/// OAuth2 client id sent with refresh-token grants.
const OAUTH_CLIENT_ID: &str = "containerregistry-provider";

/// Longest error body carried into an error message.
const MAX_ERROR_BODY: usize = 512;

/// Resolves an image reference to a content digest.
///
/// The provider depends on this trait rather than on [`RegistryClient`] so
/// reads can be exercised without a registry.
#[async_trait]
pub trait DigestResolver: Send + Sync {
    /// Resolve `reference` to the `sha256:` digest of its image manifest.
    async fn resolve_digest(
        &self,
        reference: &ImageReference,
        authenticator: &Authenticator,
    ) -> Result<String>;
}

/// HTTP client for the OCI distribution API.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: Client,
    platform: Platform,
}

impl RegistryClient {
    /// Create a client resolving indexes for the default platform
    /// (`linux/amd64`).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("containerregistry-oci/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            http,
            platform: Platform::default(),
        })
    }

    /// Resolve indexes to the child matching `platform` instead.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// `GET /v2/` over HTTPS, then over plain HTTP for registries that allow
    /// it. Returns the endpoint that answered along with its response.
    ///
    /// Only transport failures fall back; any HTTP response settles the
    /// scheme.
    async fn ping(&self, reference: &ImageReference) -> Result<(String, Response)> {
        let endpoint = reference.endpoint();
        let err = match self.http.get(format!("{endpoint}/v2/")).send().await {
            Ok(response) => return Ok((endpoint, response)),
            Err(err) => err,
        };

        let Some(fallback) = reference.plain_http_endpoint() else {
            return Err(err.into());
        };
        debug!(error = %err, %fallback, "HTTPS ping failed, retrying over plain HTTP");
        let response = self.http.get(format!("{fallback}/v2/")).send().await?;
        Ok((fallback, response))
    }

    /// Work out the endpoint and `Authorization` header for requests to the
    /// reference's repository.
    #[instrument(name = "registry_authorize", skip_all, fields(registry = %reference.registry_str()))]
    async fn authorize(
        &self,
        reference: &ImageReference,
        authenticator: &Authenticator,
    ) -> Result<Session> {
        let (endpoint, response) = self.ping(reference).await?;
        let status = response.status();
        trace!(%endpoint, %status, "Pinged registry");

        if status.is_success() {
            trace!("Registry allows unauthenticated ping");
            return Ok(Session::new(endpoint, authenticator.basic_authorization()));
        }

        if status != StatusCode::UNAUTHORIZED {
            return Err(unexpected_status(&format!("{endpoint}/v2/"), response).await);
        }

        let header = challenge_header(response.headers());
        match Challenge::parse(&header) {
            Some(Challenge::Basic { .. }) => {
                debug!(auth = authenticator.kind(), "Registry uses basic authentication");
                Ok(Session::new(endpoint, authenticator.basic_authorization()))
            }
            Some(Challenge::Bearer {
                realm,
                service,
                scope,
            }) => {
                debug!(%realm, auth = authenticator.kind(), "Registry uses token authentication");
                let scopes = token_scopes(reference, scope);
                let token = self
                    .fetch_token(reference, authenticator, &realm, service.as_deref(), &scopes)
                    .await?;
                Ok(Session::new(endpoint, Some(format!("Bearer {token}"))))
            }
            None => Err(Error::UnsupportedChallenge {
                registry: reference.registry_str().to_string(),
                challenge: header,
            }),
        }
    }

    /// Obtain a bearer token from a token server.
    async fn fetch_token(
        &self,
        reference: &ImageReference,
        authenticator: &Authenticator,
        realm: &str,
        service: Option<&str>,
        scopes: &[String],
    ) -> Result<String> {
        let config = authenticator.config();

        if let Some(token) = config.and_then(|c| c.registry_token.as_ref()) {
            return Ok(token.expose_secret().to_string());
        }

        let body = match config.filter(|c| c.identity_token.is_some()) {
            Some(config) => match self.fetch_oauth_token(realm, service, scopes, config).await? {
                Some(body) => body,
                None => {
                    debug!("Token server does not support OAuth2, falling back to GET");
                    self.fetch_basic_token(reference, authenticator, realm, service, scopes)
                        .await?
                }
            },
            None => {
                self.fetch_basic_token(reference, authenticator, realm, service, scopes)
                    .await?
            }
        };

        let response: TokenResponse = serde_json::from_str(&body)?;
        response
            .into_token()
            .ok_or_else(|| {
                Error::AuthenticationFailed(
                    reference.registry_str().to_string(),
                    "token response contained no token".to_string(),
                )
            })
    }

    /// `POST` refresh-token grant. `Ok(None)` when the server does not
    /// implement OAuth2 (404).
    async fn fetch_oauth_token(
        &self,
        realm: &str,
        service: Option<&str>,
        scopes: &[String],
        config: &AuthConfig,
    ) -> Result<Option<String>> {
        let refresh_token = config
            .identity_token
            .as_ref()
            .map(|t| t.expose_secret().to_string())
            .unwrap_or_default();
        let scope = scopes.join(" ");

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", OAUTH_CLIENT_ID),
            ("scope", scope.as_str()),
        ];
        if let Some(service) = service {
            form.push(("service", service));
        }

        let response = self.http.post(realm).form(&form).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.text().await?)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::AuthenticationFailed(
                realm.to_string(),
                error_body(response).await,
            )),
            _ => Err(unexpected_status(realm, response).await),
        }
    }

    /// `GET` token request, authenticated with basic credentials when present.
    async fn fetch_basic_token(
        &self,
        reference: &ImageReference,
        authenticator: &Authenticator,
        realm: &str,
        service: Option<&str>,
        scopes: &[String],
    ) -> Result<String> {
        let mut query: Vec<(&str, &str)> = scopes.iter().map(|s| ("scope", s.as_str())).collect();
        if let Some(service) = service {
            query.push(("service", service));
        }

        let mut request = self.http.get(realm).query(&query);
        if let Some(header) = authenticator.basic_authorization() {
            request = request.header(AUTHORIZATION, header);
        }

        let response = request.send().await?;
        match response.status() {
            status if status.is_success() => Ok(response.text().await?),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::AuthenticationFailed(
                reference.registry_str().to_string(),
                error_body(response).await,
            )),
            _ => Err(unexpected_status(realm, response).await),
        }
    }

    /// Fetch a manifest and return its media type, body and digest.
    ///
    /// When `manifest_ref` is a digest the body must hash to it.
    async fn fetch_manifest(
        &self,
        session: &Session,
        reference: &ImageReference,
        manifest_ref: &str,
    ) -> Result<FetchedManifest> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            session.endpoint,
            reference.repository(),
            manifest_ref
        );
        trace!(%url, "Fetching manifest");

        let mut request = self
            .http
            .get(&url)
            .header(ACCEPT, ACCEPTED_MEDIA_TYPES.join(", "));
        if let Some(authorization) = &session.authorization {
            request = request.header(AUTHORIZATION, authorization);
        }

        let response = request.send().await?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(Error::AuthenticationFailed(
                    reference.registry_str().to_string(),
                    error_body(response).await,
                ));
            }
            StatusCode::NOT_FOUND => {
                return Err(Error::ImageNotFound(format!(
                    "{}/{}:{manifest_ref}",
                    reference.registry_str(),
                    reference.repository()
                )));
            }
            _ => return Err(unexpected_status(&url, response).await),
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let body = response.bytes().await?.to_vec();
        let digest = sha256_digest(&body);

        if manifest_ref.contains(':') && manifest_ref != digest {
            return Err(Error::digest_mismatch(manifest_ref, digest));
        }

        let media_type = match content_type.filter(|ct| ACCEPTED_MEDIA_TYPES.contains(&ct.as_str())) {
            Some(media_type) => media_type,
            None => serde_json::from_slice::<MediaTypeField>(&body)
                .ok()
                .and_then(|field| field.media_type)
                .unwrap_or_default(),
        };

        Ok(FetchedManifest {
            media_type,
            body,
            digest,
        })
    }

    /// Pick the child manifest for this client's platform out of an index.
    fn select_child<'a>(&self, reference: &ImageReference, index: &'a ImageIndex) -> Result<&'a IndexEntry> {
        index
            .manifests
            .iter()
            .find(|entry| {
                entry
                    .platform
                    .as_ref()
                    .is_some_and(|p| self.platform.satisfied_by(p))
            })
            .ok_or_else(|| Error::platform_not_available(reference.whole(), self.platform.to_string()))
    }
}

#[async_trait]
impl DigestResolver for RegistryClient {
    #[instrument(
        name = "resolve_digest",
        skip_all,
        fields(image = %reference, auth = authenticator.kind())
    )]
    async fn resolve_digest(
        &self,
        reference: &ImageReference,
        authenticator: &Authenticator,
    ) -> Result<String> {
        info!("Resolving image digest");

        let session = self.authorize(reference, authenticator).await?;
        let manifest = self
            .fetch_manifest(&session, reference, reference.manifest_reference())
            .await?;

        match manifest.media_type.as_str() {
            OCI_INDEX_MEDIA_TYPE | DOCKER_MANIFEST_LIST_MEDIA_TYPE => {
                let index: ImageIndex = serde_json::from_slice(&manifest.body)?;
                let child = self.select_child(reference, &index)?;
                debug!(
                    index = %manifest.digest,
                    child = %child.digest,
                    platform = %self.platform,
                    "Resolved index to platform manifest"
                );

                let child_manifest = self
                    .fetch_manifest(&session, reference, &child.digest)
                    .await?;
                Ok(child_manifest.digest)
            }
            OCI_MANIFEST_MEDIA_TYPE | DOCKER_MANIFEST_MEDIA_TYPE => {
                debug!(digest = %manifest.digest, media_type = %manifest.media_type, "Resolved image manifest");
                Ok(manifest.digest)
            }
            // `mediaType` is optional in image manifests; anything that is
            // not an index is taken as an image.
            other => {
                warn!(media_type = %other, digest = %manifest.digest, "Unexpected manifest media type, treating as image");
                Ok(manifest.digest)
            }
        }
    }
}

/// Endpoint and credentials settled by the `/v2/` ping.
#[derive(Debug)]
struct Session {
    endpoint: String,
    authorization: Option<String>,
}

impl Session {
    const fn new(endpoint: String, authorization: Option<String>) -> Self {
        Self {
            endpoint,
            authorization,
        }
    }
}

/// A fetched manifest.
#[derive(Debug)]
struct FetchedManifest {
    media_type: String,
    body: Vec<u8>,
    digest: String,
}

/// An image index or Docker manifest list.
#[derive(Debug, Deserialize)]
struct ImageIndex {
    #[serde(default)]
    manifests: Vec<IndexEntry>,
}

/// A manifest descriptor inside an index.
#[derive(Debug, Deserialize)]
struct IndexEntry {
    digest: String,
    #[serde(default)]
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct MediaTypeField {
    #[serde(default, rename = "mediaType")]
    media_type: Option<String>,
}

/// Token server response; registries differ on the field name.
#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl TokenResponse {
    fn into_token(self) -> Option<String> {
        self.access_token
            .filter(|t| !t.is_empty())
            .or(self.token)
            .filter(|t| !t.is_empty())
    }
}

/// Compute the OCI digest (`sha256:<hex>`) of a byte slice.
#[must_use]
pub fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// Scopes to request: repository pull, plus whatever the registry asked for.
fn token_scopes(reference: &ImageReference, challenge_scope: Option<String>) -> Vec<String> {
    let mut scopes = vec![format!("repository:{}:pull", reference.repository())];
    if let Some(scope) = challenge_scope.filter(|s| !s.is_empty() && !scopes.contains(s)) {
        scopes.push(scope);
    }
    scopes
}

fn challenge_header(headers: &HeaderMap) -> String {
    headers
        .get(WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn error_body(response: Response) -> String {
    let status = response.status();
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    if body.trim().is_empty() {
        status.to_string()
    } else {
        body.trim().to_string()
    }
}

async fn unexpected_status(url: &str, response: Response) -> Error {
    let status = response.status().as_u16();
    Error::UnexpectedStatus {
        url: url.to_string(),
        status,
        body: error_body(response).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_digest() {
        assert_eq!(
            sha256_digest(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_digest(b"hello"),
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_token_scopes() {
        let reference = ImageReference::parse("ghcr.io/owner/repo:tag").unwrap();
        assert_eq!(
            token_scopes(&reference, None),
            vec!["repository:owner/repo:pull".to_string()]
        );
        assert_eq!(
            token_scopes(&reference, Some("repository:owner/repo:pull".to_string())),
            vec!["repository:owner/repo:pull".to_string()]
        );
        assert_eq!(
            token_scopes(&reference, Some("registry:catalog:*".to_string())).len(),
            2
        );
    }

    #[test]
    fn test_token_response_prefers_access_token() {
        let r: TokenResponse =
            serde_json::from_str(r#"{"token": "a", "access_token": "b"}"#).unwrap();
        assert_eq!(r.into_token().as_deref(), Some("b"));

        let r: TokenResponse = serde_json::from_str(r#"{"token": "a"}"#).unwrap();
        assert_eq!(r.into_token().as_deref(), Some("a"));

        let r: TokenResponse = serde_json::from_str(r#"{"token": ""}"#).unwrap();
        assert!(r.into_token().is_none());
    }

    #[test]
    fn test_select_child_for_platform() {
        let index: ImageIndex = serde_json::from_str(
            r#"{
                "schemaVersion": 2,
                "manifests": [
                    {"digest": "sha256:arm", "platform": {"os": "linux", "architecture": "arm64", "variant": "v8"}},
                    {"digest": "sha256:amd", "platform": {"os": "linux", "architecture": "amd64"}},
                    {"digest": "sha256:att", "platform": {"os": "unknown", "architecture": "unknown"}}
                ]
            }"#,
        )
        .unwrap();
        let reference = ImageReference::parse("nginx:latest").unwrap();

        let client = RegistryClient::new().unwrap();
        assert_eq!(client.select_child(&reference, &index).unwrap().digest, "sha256:amd");

        let client = client.with_platform(Platform::new("linux", "arm64"));
        assert_eq!(client.select_child(&reference, &index).unwrap().digest, "sha256:arm");

        let client = client.with_platform(Platform::new("linux", "s390x"));
        assert!(matches!(
            client.select_child(&reference, &index),
            Err(Error::PlatformNotAvailable { .. })
        ));
    }
}
