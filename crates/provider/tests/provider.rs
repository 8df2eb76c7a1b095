//! Drives the provider through its plugin protocol service.

use std::sync::{Arc, Mutex};

use containerregistry_oci::{
    AuthConfig, Authenticator, DigestResolver, Error, ImageReference, OCI_MANIFEST_MEDIA_TYPE,
    RegistryClient, StaticKeychain, sha256_digest,
};
use containerregistry_provider::ContainerRegistryProvider;
use containerregistry_tfplugin::proto::provider_server::Provider;
use containerregistry_tfplugin::proto::{
    DynamicValue, configure_provider, read_data_source, validate_data_resource_config,
    validate_provider_config,
};
use rmpv::Value;
use tonic::Request;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Fixtures
// ============================================================================

/// Records which credentials each lookup used and answers with a fixed digest.
#[derive(Default)]
struct RecordingResolver {
    seen: Mutex<Vec<(String, Option<String>)>>,
    fail: bool,
}

impl RecordingResolver {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn usernames(&self) -> Vec<Option<String>> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, user)| user.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl DigestResolver for RecordingResolver {
    async fn resolve_digest(
        &self,
        reference: &ImageReference,
        authenticator: &Authenticator,
    ) -> containerregistry_oci::Result<String> {
        let username = authenticator.config().and_then(|c| c.username.clone());
        self.seen
            .lock()
            .unwrap()
            .push((reference.registry_str().to_string(), username));
        if self.fail {
            return Err(Error::ImageNotFound(reference.to_string()));
        }
        Ok("sha256:0123456789abcdef".to_string())
    }
}

fn keychain(registry: &str, username: &str) -> StaticKeychain {
    StaticKeychain::new().with(
        registry,
        AuthConfig::from_parts(
            Some(username.to_string()),
            Some("keychain-pw".to_string()),
            None,
            None,
            None,
        ),
    )
}

fn object(entries: Vec<(&str, Value)>) -> Value {
    Value::Map(
        entries
            .into_iter()
            .map(|(k, v)| (Value::from(k), v))
            .collect(),
    )
}

fn dynamic(value: &Value) -> DynamicValue {
    let mut msgpack = Vec::new();
    rmpv::encode::write_value(&mut msgpack, value).unwrap();
    DynamicValue {
        msgpack,
        json: Vec::new(),
    }
}

fn credentials(address: Option<&str>, username: &str) -> Value {
    let mut entries = vec![
        ("username", Value::from(username)),
        ("password", Value::from("pw")),
        ("auth", Value::Nil),
        ("identity_token", Value::Nil),
        ("registry_token", Value::Nil),
    ];
    if let Some(address) = address {
        entries.push(("address", Value::from(address)));
    }
    object(entries)
}

fn image_config(name: &str, auth: Option<Value>) -> DynamicValue {
    dynamic(&object(vec![
        ("id", Value::Nil),
        ("name", Value::from(name)),
        ("digest", Value::Nil),
        ("auth", Value::Array(auth.into_iter().collect())),
    ]))
}

async fn configure(provider: &ContainerRegistryProvider, blocks: Vec<Value>) {
    let response = provider
        .configure_provider(Request::new(configure_provider::Request {
            terraform_version: "1.9.0".to_string(),
            config: Some(dynamic(&object(vec![("auth", Value::Array(blocks))]))),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(response.diagnostics.is_empty(), "{:?}", response.diagnostics);
}

async fn read(
    provider: &ContainerRegistryProvider,
    config: DynamicValue,
) -> read_data_source::Response {
    provider
        .read_data_source(Request::new(read_data_source::Request {
            type_name: "containerregistry_image".to_string(),
            config: Some(config),
            provider_meta: None,
        }))
        .await
        .unwrap()
        .into_inner()
}

fn state_field<'a>(state: &'a Value, name: &str) -> &'a Value {
    state
        .as_map()
        .unwrap()
        .iter()
        .find(|(k, _)| k.as_str() == Some(name))
        .map(|(_, v)| v)
        .unwrap()
}

fn decode_state(response: &read_data_source::Response) -> Value {
    response.state.as_ref().unwrap().decode().unwrap()
}

// ============================================================================
// Credential precedence
// ============================================================================

#[tokio::test]
async fn test_explicit_auth_overrides_provider_and_keychain() {
    let resolver = Arc::new(RecordingResolver::default());
    let provider = ContainerRegistryProvider::with_clients(
        resolver.clone(),
        Arc::new(keychain("ghcr.io", "from-keychain")),
    );
    configure(&provider, vec![credentials(Some("ghcr.io"), "from-provider")]).await;

    let response = read(
        &provider,
        image_config("ghcr.io/octo/app:1", Some(credentials(None, "explicit"))),
    )
    .await;

    assert!(response.diagnostics.is_empty(), "{:?}", response.diagnostics);
    assert_eq!(resolver.usernames(), vec![Some("explicit".to_string())]);
}

#[tokio::test]
async fn test_provider_auth_used_without_explicit_block() {
    let resolver = Arc::new(RecordingResolver::default());
    let provider = ContainerRegistryProvider::with_clients(
        resolver.clone(),
        Arc::new(keychain("ghcr.io", "from-keychain")),
    );
    configure(
        &provider,
        vec![
            credentials(Some("quay.io"), "quay-user"),
            credentials(Some("ghcr.io"), "from-provider"),
        ],
    )
    .await;

    read(&provider, image_config("ghcr.io/octo/app:1", None)).await;

    assert_eq!(resolver.usernames(), vec![Some("from-provider".to_string())]);
}

#[tokio::test]
async fn test_docker_hub_provider_auth_matches_short_names() {
    let resolver = Arc::new(RecordingResolver::default());
    let provider =
        ContainerRegistryProvider::with_clients(resolver.clone(), Arc::new(StaticKeychain::new()));
    configure(&provider, vec![credentials(Some("index.docker.io"), "hub-user")]).await;

    read(&provider, image_config("alpine:3.20", None)).await;

    assert_eq!(resolver.usernames(), vec![Some("hub-user".to_string())]);
}

#[tokio::test]
async fn test_keychain_fallback_when_registry_not_configured() {
    let resolver = Arc::new(RecordingResolver::default());
    let provider = ContainerRegistryProvider::with_clients(
        resolver.clone(),
        Arc::new(keychain("ghcr.io", "from-keychain")),
    );
    configure(&provider, vec![credentials(Some("quay.io"), "quay-user")]).await;

    read(&provider, image_config("ghcr.io/octo/app:1", None)).await;

    assert_eq!(resolver.usernames(), vec![Some("from-keychain".to_string())]);
}

#[tokio::test]
async fn test_anonymous_when_nothing_matches() {
    let resolver = Arc::new(RecordingResolver::default());
    let provider =
        ContainerRegistryProvider::with_clients(resolver.clone(), Arc::new(StaticKeychain::new()));

    read(&provider, image_config("ghcr.io/octo/app:1", None)).await;

    assert_eq!(resolver.usernames(), vec![None]);
}

// ============================================================================
// State and diagnostics
// ============================================================================

#[tokio::test]
async fn test_state_id_is_digest() {
    let provider = ContainerRegistryProvider::with_clients(
        Arc::new(RecordingResolver::default()),
        Arc::new(StaticKeychain::new()),
    );

    let response = read(&provider, image_config("ghcr.io/octo/app:1", None)).await;
    let state = decode_state(&response);

    assert_eq!(state_field(&state, "digest").as_str(), Some("sha256:0123456789abcdef"));
    assert_eq!(state_field(&state, "id"), state_field(&state, "digest"));
    assert_eq!(state_field(&state, "name").as_str(), Some("ghcr.io/octo/app:1"));
    assert_eq!(state_field(&state, "auth").as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn test_unparsable_name_reports_parse_error() {
    let resolver = Arc::new(RecordingResolver::default());
    let provider =
        ContainerRegistryProvider::with_clients(resolver.clone(), Arc::new(StaticKeychain::new()));

    let response = read(&provider, image_config("not a reference!", None)).await;

    assert!(response.state.is_none());
    assert_eq!(response.diagnostics.len(), 1);
    assert!(
        response.diagnostics[0]
            .summary
            .starts_with("Error parsing reference: ")
    );
    assert!(resolver.usernames().is_empty());
}

#[tokio::test]
async fn test_registry_failure_reports_query_error() {
    let provider = ContainerRegistryProvider::with_clients(
        Arc::new(RecordingResolver::failing()),
        Arc::new(StaticKeychain::new()),
    );

    let response = read(&provider, image_config("ghcr.io/octo/app:missing", None)).await;

    assert!(response.state.is_none());
    assert_eq!(
        response.diagnostics[0].summary,
        "Error querying image: image not found: ghcr.io/octo/app:missing"
    );
}

#[tokio::test]
async fn test_validation_flags_bad_inputs() {
    let provider = ContainerRegistryProvider::with_clients(
        Arc::new(RecordingResolver::default()),
        Arc::new(StaticKeychain::new()),
    );

    let data_source = provider
        .validate_data_resource_config(Request::new(validate_data_resource_config::Request {
            type_name: "containerregistry_image".to_string(),
            config: Some(image_config("not a reference!", None)),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(data_source.diagnostics.len(), 1);

    let provider_config = provider
        .validate_provider_config(Request::new(validate_provider_config::Request {
            config: Some(dynamic(&object(vec![(
                "auth",
                Value::Array(vec![credentials(Some(""), "me")]),
            )]))),
        }))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(provider_config.diagnostics.len(), 1);
}

// ============================================================================
// End to end against a fake registry
// ============================================================================

#[tokio::test]
async fn test_read_against_registry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let manifest = format!(
        r#"{{"schemaVersion":2,"mediaType":"{OCI_MANIFEST_MEDIA_TYPE}","config":{{"mediaType":"application/vnd.oci.image.config.v1+json","digest":"sha256:aa","size":2}},"layers":[]}}"#
    )
    .into_bytes();
    Mock::given(method("GET"))
        .and(path("/v2/octo/app/manifests/1.0"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(manifest.clone(), OCI_MANIFEST_MEDIA_TYPE),
        )
        .mount(&server)
        .await;

    let provider = ContainerRegistryProvider::with_clients(
        Arc::new(RegistryClient::new().unwrap()),
        Arc::new(StaticKeychain::new()),
    );
    let host = server.uri().trim_start_matches("http://").to_string();
    let response = read(&provider, image_config(&format!("{host}/octo/app:1.0"), None)).await;

    assert!(response.diagnostics.is_empty(), "{:?}", response.diagnostics);
    let state = decode_state(&response);
    assert_eq!(
        state_field(&state, "digest").as_str(),
        Some(sha256_digest(&manifest).as_str())
    );
}
