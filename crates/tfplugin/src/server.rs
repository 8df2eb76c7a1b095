//! Plugin server bootstrap.
//!
//! Binds the listener, announces it to Terraform (handshake line, or
//! reattach instructions in debug mode) and serves the provider together
//! with gRPC health and the go-plugin controller.

use std::collections::BTreeMap;
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr};
use std::ops::RangeInclusive;

use serde::Serialize;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic_health::ServingStatus;
use tracing::{debug, info, instrument};

use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::handshake::{HandshakeLine, PROTOCOL_VERSION, PluginEnv};
use crate::proto::plugin::grpc_controller_server::GrpcControllerServer;
use crate::proto::provider_server::{Provider, ProviderServer};
use crate::tls::{AutoMtls, accept_tls};

/// Service name go-plugin checks in the gRPC health service.
pub const HEALTH_SERVICE_NAME: &str = "plugin";

/// How the provider is being run.
#[derive(Debug, Clone, Default)]
pub struct ServeConfig {
    /// Run standalone and print `TF_REATTACH_PROVIDERS` instead of the
    /// go-plugin handshake.
    pub debug: bool,

    /// Provider source address, e.g. `registry.terraform.io/foo/bar`. Keys
    /// the reattach configuration in debug mode.
    pub provider_address: String,
}

/// Serves `provider` until Terraform asks it to stop.
///
/// # Errors
///
/// Returns an error if the process was not started by Terraform (outside
/// debug mode), the listener cannot be bound, or the transport fails.
pub async fn serve<P: Provider>(provider: P, config: ServeConfig) -> Result<()> {
    let env = PluginEnv::from_env()?;
    let server = PluginServer::bind(&env, config.debug).await?;

    if config.debug {
        server.announce_reattach(&config.provider_address)?;
        let shutdown = server.shutdown_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, stopping provider");
                shutdown.cancel();
            }
        });
    } else {
        server.announce_handshake()?;
    }

    server.run(provider).await
}

/// A bound, not yet serving plugin server.
#[derive(Debug)]
pub struct PluginServer {
    listener: TcpListener,
    tls: Option<AutoMtls>,
    protocol_version: u32,
    shutdown: CancellationToken,
}

impl PluginServer {
    /// Validates the go-plugin environment and binds the listener.
    ///
    /// Debug mode skips the magic cookie and protocol negotiation and never
    /// uses TLS, matching what Terraform does for reattached providers.
    ///
    /// # Errors
    ///
    /// Returns an error on a bad environment or when no port can be bound.
    #[instrument(name = "plugin_bind", skip(env))]
    pub async fn bind(env: &PluginEnv, debug_mode: bool) -> Result<Self> {
        let (protocol_version, tls) = if debug_mode {
            (PROTOCOL_VERSION, None)
        } else {
            env.verify_magic_cookie()?;
            let version = env.negotiate_protocol()?;
            let tls = env.client_cert().map(AutoMtls::from_client_pem).transpose()?;
            (version, tls)
        };

        let listener = bind_in_range(env.port_range()).await?;
        debug!(
            address = %listener.local_addr()?,
            tls = tls.is_some(),
            "Plugin listener bound"
        );

        Ok(Self {
            listener,
            tls,
            protocol_version,
            shutdown: CancellationToken::new(),
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Token that stops the server when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The go-plugin handshake line for this server.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn handshake_line(&self) -> Result<HandshakeLine> {
        Ok(HandshakeLine {
            protocol_version: self.protocol_version,
            address: self.local_addr()?,
            server_cert: self.tls.as_ref().map(|t| t.server_cert_der().to_vec()),
        })
    }

    /// Writes the handshake line to stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if stdout is closed.
    pub fn announce_handshake(&self) -> Result<()> {
        let line = self.handshake_line()?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
        Ok(())
    }

    /// Writes `TF_REATTACH_PROVIDERS` instructions to stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if stdout is closed.
    pub fn announce_reattach(&self, provider_address: &str) -> Result<()> {
        let reattach = reattach_config(provider_address, self.local_addr()?)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(
            stdout,
            "Provider started. To attach Terraform CLI, set the TF_REATTACH_PROVIDERS \
             environment variable with the following:\n\n\tTF_REATTACH_PROVIDERS='{reattach}'\n"
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Serves until the shutdown token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the gRPC transport fails.
    pub async fn run<P: Provider>(self, provider: P) -> Result<()> {
        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_service_status(HEALTH_SERVICE_NAME, ServingStatus::Serving)
            .await;

        let router = Server::builder()
            .add_service(health_service)
            .add_service(GrpcControllerServer::new(Controller::new(
                self.shutdown.clone(),
            )))
            .add_service(ProviderServer::new(provider));

        let shutdown = self.shutdown.clone();
        let signal = async move { shutdown.cancelled().await };

        info!(address = %self.listener.local_addr()?, "Serving provider");
        match self.tls {
            Some(tls) => {
                router
                    .serve_with_incoming_shutdown(accept_tls(self.listener, tls.acceptor()), signal)
                    .await?;
            }
            None => {
                router
                    .serve_with_incoming_shutdown(TcpListenerStream::new(self.listener), signal)
                    .await?;
            }
        }

        info!("Provider stopped");
        Ok(())
    }
}

async fn bind_in_range(ports: RangeInclusive<u16>) -> Result<TcpListener> {
    let (min, max) = (*ports.start(), *ports.end());
    for port in ports {
        match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => debug!(port, error = %e, "Port unavailable"),
        }
    }
    Err(Error::NoAvailablePort { min, max })
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ReattachConfig {
    protocol: &'static str,
    protocol_version: u32,
    pid: u32,
    test: bool,
    addr: ReattachAddr,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ReattachAddr {
    network: &'static str,
    string: String,
}

fn reattach_config(provider_address: &str, address: SocketAddr) -> Result<String> {
    let mut providers = BTreeMap::new();
    providers.insert(
        provider_address,
        ReattachConfig {
            protocol: "grpc",
            protocol_version: PROTOCOL_VERSION,
            pid: std::process::id(),
            test: true,
            addr: ReattachAddr {
                network: "tcp",
                string: address.to_string(),
            },
        },
    );
    Ok(serde_json::to_string(&providers)?)
}
