//! The provider's plugin protocol service.

use std::fmt;
use std::sync::Arc;

use containerregistry_oci::{DigestResolver, DockerKeychain, Keychain, RegistryClient};
use containerregistry_tfplugin::proto::provider_server::Provider;
use containerregistry_tfplugin::proto::{
    self, DynamicValue, ServerCapabilities, apply_resource_change, configure_provider,
    get_metadata, get_provider_schema, import_resource_state, plan_resource_change,
    read_data_source, read_resource, stop_provider, upgrade_resource_state,
    validate_data_resource_config, validate_provider_config, validate_resource_config,
};
use containerregistry_tfplugin::{Diagnostics, ProviderDiagnostic, value};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use crate::config::{self, ProviderConfig};
use crate::data_source::{self, ImageConfig};
use crate::error::{Error, Result};
use crate::schema::{IMAGE_DATA_SOURCE, image_schema, provider_schema};

/// Serves the `containerregistry` provider.
pub struct ContainerRegistryProvider {
    resolver: Arc<dyn DigestResolver>,
    keychain: Arc<dyn Keychain>,
    config: RwLock<ProviderConfig>,
    stop: CancellationToken,
}

impl ContainerRegistryProvider {
    /// Creates a provider backed by the HTTP registry client and the Docker
    /// keychain.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Ok(Self::with_clients(
            Arc::new(RegistryClient::new()?),
            Arc::new(DockerKeychain::new()),
        ))
    }

    /// Creates a provider with the given registry client and keychain.
    #[must_use]
    pub fn with_clients(resolver: Arc<dyn DigestResolver>, keychain: Arc<dyn Keychain>) -> Self {
        Self {
            resolver,
            keychain,
            config: RwLock::new(ProviderConfig::default()),
            stop: CancellationToken::new(),
        }
    }

    /// Credentials from the last `ConfigureProvider` call.
    pub async fn provider_config(&self) -> ProviderConfig {
        self.config.read().await.clone()
    }

    async fn read_image(&self, config: &ImageConfig) -> std::result::Result<DynamicValue, Diagnostics> {
        let provider = self.provider_config().await;

        let read = data_source::read(
            config,
            &provider,
            self.keychain.as_ref(),
            self.resolver.as_ref(),
        );
        let state = tokio::select! {
            biased;
            () = self.stop.cancelled() => {
                warn!("Read interrupted by StopProvider");
                return Err(data_source::query_error(&Error::Stopped).into());
            }
            state = read => state.map_err(Diagnostics::from)?,
        };

        DynamicValue::encode(&state)
            .map_err(|e| ProviderDiagnostic::error(format!("Error encoding state: {e}")).into())
    }
}

impl fmt::Debug for ContainerRegistryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerRegistryProvider")
            .field("stopped", &self.stop.is_cancelled())
            .finish_non_exhaustive()
    }
}

fn unknown_data_source(type_name: &str) -> Vec<proto::Diagnostic> {
    Diagnostics::from(
        ProviderDiagnostic::error("Unknown data source type")
            .with_detail(format!("This provider has no data source named {type_name:?}.")),
    )
    .into_proto()
}

fn unsupported_resource(type_name: &str) -> Vec<proto::Diagnostic> {
    Diagnostics::from(
        ProviderDiagnostic::error("Unsupported resource type")
            .with_detail(format!(
                "This provider only offers the {IMAGE_DATA_SOURCE} data source; {type_name:?} is not a resource it manages."
            )),
    )
    .into_proto()
}

fn capabilities() -> ServerCapabilities {
    ServerCapabilities {
        get_provider_schema_optional: true,
        ..Default::default()
    }
}

#[tonic::async_trait]
impl Provider for ContainerRegistryProvider {
    async fn get_metadata(
        &self,
        _request: Request<get_metadata::Request>,
    ) -> std::result::Result<Response<get_metadata::Response>, Status> {
        Ok(Response::new(get_metadata::Response {
            server_capabilities: Some(capabilities()),
            diagnostics: Vec::new(),
            data_sources: vec![get_metadata::DataSourceMetadata {
                type_name: IMAGE_DATA_SOURCE.to_string(),
            }],
            resources: Vec::new(),
        }))
    }

    async fn get_provider_schema(
        &self,
        _request: Request<get_provider_schema::Request>,
    ) -> std::result::Result<Response<get_provider_schema::Response>, Status> {
        Ok(Response::new(get_provider_schema::Response {
            provider: Some(provider_schema()),
            data_source_schemas: [(IMAGE_DATA_SOURCE.to_string(), image_schema())]
                .into_iter()
                .collect(),
            server_capabilities: Some(capabilities()),
            ..Default::default()
        }))
    }

    #[instrument(skip_all)]
    async fn validate_provider_config(
        &self,
        request: Request<validate_provider_config::Request>,
    ) -> std::result::Result<Response<validate_provider_config::Response>, Status> {
        let config = value::decode(request.get_ref().config.as_ref())?;
        let diagnostics = config::validate(&config)?;

        Ok(Response::new(validate_provider_config::Response {
            diagnostics: diagnostics.into_proto(),
        }))
    }

    async fn validate_resource_config(
        &self,
        request: Request<validate_resource_config::Request>,
    ) -> std::result::Result<Response<validate_resource_config::Response>, Status> {
        Ok(Response::new(validate_resource_config::Response {
            diagnostics: unsupported_resource(&request.get_ref().type_name),
        }))
    }

    #[instrument(skip_all, fields(type_name = %request.get_ref().type_name))]
    async fn validate_data_resource_config(
        &self,
        request: Request<validate_data_resource_config::Request>,
    ) -> std::result::Result<Response<validate_data_resource_config::Response>, Status> {
        let request = request.into_inner();
        if request.type_name != IMAGE_DATA_SOURCE {
            return Ok(Response::new(validate_data_resource_config::Response {
                diagnostics: unknown_data_source(&request.type_name),
            }));
        }

        let config = ImageConfig::from_value(&value::decode(request.config.as_ref())?)?;
        Ok(Response::new(validate_data_resource_config::Response {
            diagnostics: data_source::validate(&config).into_proto(),
        }))
    }

    async fn upgrade_resource_state(
        &self,
        request: Request<upgrade_resource_state::Request>,
    ) -> std::result::Result<Response<upgrade_resource_state::Response>, Status> {
        Ok(Response::new(upgrade_resource_state::Response {
            upgraded_state: None,
            diagnostics: unsupported_resource(&request.get_ref().type_name),
        }))
    }

    #[instrument(skip_all, fields(terraform_version = %request.get_ref().terraform_version))]
    async fn configure_provider(
        &self,
        request: Request<configure_provider::Request>,
    ) -> std::result::Result<Response<configure_provider::Response>, Status> {
        let config = value::decode(request.get_ref().config.as_ref())?;
        let (config, diagnostics) = ProviderConfig::from_value(&config)?;
        info!(registries = config.registry_count(), "Configured provider");

        *self.config.write().await = config;
        Ok(Response::new(configure_provider::Response {
            diagnostics: diagnostics.into_proto(),
        }))
    }

    async fn read_resource(
        &self,
        request: Request<read_resource::Request>,
    ) -> std::result::Result<Response<read_resource::Response>, Status> {
        Ok(Response::new(read_resource::Response {
            diagnostics: unsupported_resource(&request.get_ref().type_name),
            ..Default::default()
        }))
    }

    async fn plan_resource_change(
        &self,
        request: Request<plan_resource_change::Request>,
    ) -> std::result::Result<Response<plan_resource_change::Response>, Status> {
        Ok(Response::new(plan_resource_change::Response {
            diagnostics: unsupported_resource(&request.get_ref().type_name),
            ..Default::default()
        }))
    }

    async fn apply_resource_change(
        &self,
        request: Request<apply_resource_change::Request>,
    ) -> std::result::Result<Response<apply_resource_change::Response>, Status> {
        Ok(Response::new(apply_resource_change::Response {
            diagnostics: unsupported_resource(&request.get_ref().type_name),
            ..Default::default()
        }))
    }

    async fn import_resource_state(
        &self,
        request: Request<import_resource_state::Request>,
    ) -> std::result::Result<Response<import_resource_state::Response>, Status> {
        Ok(Response::new(import_resource_state::Response {
            diagnostics: unsupported_resource(&request.get_ref().type_name),
            ..Default::default()
        }))
    }

    #[instrument(skip_all, fields(type_name = %request.get_ref().type_name))]
    async fn read_data_source(
        &self,
        request: Request<read_data_source::Request>,
    ) -> std::result::Result<Response<read_data_source::Response>, Status> {
        let request = request.into_inner();
        if request.type_name != IMAGE_DATA_SOURCE {
            return Ok(Response::new(read_data_source::Response {
                state: None,
                diagnostics: unknown_data_source(&request.type_name),
            }));
        }

        let config = ImageConfig::from_value(&value::decode(request.config.as_ref())?)?;
        let response = match self.read_image(&config).await {
            Ok(state) => read_data_source::Response {
                state: Some(state),
                diagnostics: Vec::new(),
            },
            Err(diagnostics) => {
                debug!(?diagnostics, "Image read failed");
                read_data_source::Response {
                    state: None,
                    diagnostics: diagnostics.into_proto(),
                }
            }
        };
        Ok(Response::new(response))
    }

    async fn stop_provider(
        &self,
        _request: Request<stop_provider::Request>,
    ) -> std::result::Result<Response<stop_provider::Response>, Status> {
        info!("Stopping in-flight reads");
        self.stop.cancel();
        Ok(Response::new(stop_provider::Response::default()))
    }
}
