//! go-plugin AutoMTLS.
//!
//! Terraform generates a throwaway client certificate per plugin process and
//! passes it in `PLUGIN_CLIENT_CERT`. The provider answers with its own
//! self-signed certificate in the handshake line; each side then trusts
//! exactly the other's certificate.

use std::io;
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{CertificateError, DigitallySignedStruct, DistinguishedName, ServerConfig, SignatureScheme};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Host name Terraform expects on the server certificate.
pub const SERVER_NAME: &str = "localhost";

/// TLS material for one plugin process.
#[derive(Clone)]
pub struct AutoMtls {
    server_cert: CertificateDer<'static>,
    config: Arc<ServerConfig>,
}

impl AutoMtls {
    /// Builds a server configuration that only accepts the given PEM client
    /// certificate(s).
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM holds no certificate or the server
    /// certificate cannot be generated.
    pub fn from_client_pem(client_pem: &str) -> Result<Self> {
        let client_certs = rustls_pemfile::certs(&mut client_pem.as_bytes())
            .collect::<io::Result<Vec<_>>>()?;
        if client_certs.is_empty() {
            return Err(Error::Tls("PLUGIN_CLIENT_CERT holds no certificate".to_string()));
        }

        let (server_cert, server_key) = generate_server_certificate()?;

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let verifier = Arc::new(PinnedClientCert::new(
            client_certs,
            &provider,
        ));
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_client_cert_verifier(verifier)
            .with_single_cert(vec![server_cert.clone()], server_key)?;
        config.alpn_protocols = vec![b"h2".to_vec()];

        debug!("AutoMTLS configured");
        Ok(Self {
            server_cert,
            config: Arc::new(config),
        })
    }

    /// DER server certificate, announced in the handshake line.
    #[must_use]
    pub fn server_cert_der(&self) -> &[u8] {
        self.server_cert.as_ref()
    }

    /// Acceptor for incoming connections.
    #[must_use]
    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(Arc::clone(&self.config))
    }
}

impl std::fmt::Debug for AutoMtls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoMtls")
            .field("server_cert_len", &self.server_cert.len())
            .finish_non_exhaustive()
    }
}

/// Generates the self-signed certificate the provider serves with.
///
/// go-plugin marks its certificates as CA so the peer can use them directly
/// as a trust root.
///
/// # Errors
///
/// Returns an error if key or certificate generation fails.
pub fn generate_server_certificate() -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>)> {
    let key_pair = KeyPair::generate()?;

    let mut params = CertificateParams::new(vec![SERVER_NAME.to_string()])?;
    params
        .distinguished_name
        .push(DnType::OrganizationName, "HashiCorp");
    params.distinguished_name.push(DnType::CommonName, SERVER_NAME);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::KeyCertSign,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsagePurpose::ServerAuth,
    ];

    let cert = params.self_signed(&key_pair)?;
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    Ok((cert.der().clone(), key))
}

/// Accepts exactly the client certificates Terraform handed over.
#[derive(Debug)]
struct PinnedClientCert {
    certs: Vec<CertificateDer<'static>>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl PinnedClientCert {
    fn new(certs: Vec<CertificateDer<'static>>, provider: &CryptoProvider) -> Self {
        Self {
            certs,
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ClientCertVerifier for PinnedClientCert {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        if self
            .certs
            .iter()
            .any(|pinned| pinned.as_ref() == end_entity.as_ref())
        {
            Ok(ClientCertVerified::assertion())
        } else {
            warn!("Rejected client certificate that Terraform did not announce");
            Err(rustls::Error::InvalidCertificate(
                CertificateError::UnknownIssuer,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Turns a TCP listener into a stream of TLS connections.
///
/// Handshakes run concurrently; failed handshakes are logged and dropped
/// without affecting the listener.
#[must_use]
pub fn accept_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
) -> ReceiverStream<io::Result<TlsStream<TcpStream>>> {
    let (tx, rx) = mpsc::channel(16);

    tokio::spawn(async move {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    if tx.send(Err(e)).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let acceptor = acceptor.clone();
            let conn_tx = tx.clone();
            tokio::spawn(async move {
                match acceptor.accept(stream).await {
                    Ok(tls) => {
                        let _ = conn_tx.send(Ok(tls)).await;
                    }
                    Err(e) => warn!(%peer, error = %e, "TLS handshake failed"),
                }
            });

            if tx.is_closed() {
                break;
            }
        }
    });

    ReceiverStream::new(rx)
}
