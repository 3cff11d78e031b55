//! TLS interception with leaf certificates minted from the built-in CA.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Context;
use hostlink_shared::errors::{HostlinkError, HostlinkResult};
use hyper::body::Incoming;
use hyper::header::{HOST, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use rcgen::{Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, KeyPair};
use rustls::ServerConfig;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use super::Proxy;
use super::forward::{self, ProxyBody, host_of};

/// The CA certificate the guest must trust for re-encrypted traffic.
pub const CA_CERT_PEM: &str = include_str!("ca/ca.pem");
const CA_KEY_PEM: &str = include_str!("ca/ca-key.pem");

fn tls_err(e: impl std::fmt::Display) -> HostlinkError {
    HostlinkError::Daemon(format!("certificate authority: {}", e))
}

/// Signs per-host leaf certificates; one TLS server config per host is cached
/// for the life of the process.
pub struct CertAuthority {
    issuer: Certificate,
    key: KeyPair,
    leaves: Mutex<HashMap<String, Arc<ServerConfig>>>,
}

impl std::fmt::Debug for CertAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertAuthority")
            .field("cached_hosts", &self.leaves.lock().len())
            .finish_non_exhaustive()
    }
}

impl CertAuthority {
    /// Load the CA compiled into the binary.
    pub fn builtin() -> HostlinkResult<Self> {
        Self::from_pem(CA_CERT_PEM, CA_KEY_PEM)
    }

    pub fn from_pem(cert_pem: &str, key_pem: &str) -> HostlinkResult<Self> {
        let key = KeyPair::from_pem(key_pem).map_err(tls_err)?;
        let params = CertificateParams::from_ca_cert_pem(cert_pem).map_err(tls_err)?;
        let issuer = params.self_signed(&key).map_err(tls_err)?;
        Ok(Self {
            issuer,
            key,
            leaves: Mutex::new(HashMap::new()),
        })
    }

    /// TLS server config presenting a leaf for `host`, minted on first use.
    pub fn server_config(&self, host: &str) -> HostlinkResult<Arc<ServerConfig>> {
        if let Some(config) = self.leaves.lock().get(host) {
            return Ok(config.clone());
        }

        let config = Arc::new(self.mint(host)?);
        tracing::debug!(host, "minted leaf certificate");
        Ok(self
            .leaves
            .lock()
            .entry(host.to_string())
            .or_insert(config)
            .clone())
    }

    fn mint(&self, host: &str) -> HostlinkResult<ServerConfig> {
        let mut params = CertificateParams::new(vec![host.to_string()]).map_err(tls_err)?;
        params.distinguished_name.push(DnType::CommonName, host);
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let leaf_key = KeyPair::generate().map_err(tls_err)?;
        let leaf = params
            .signed_by(&leaf_key, &self.issuer, &self.key)
            .map_err(tls_err)?;

        let chain: Vec<CertificateDer<'static>> = vec![leaf.der().clone()];
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der()));

        let mut config = ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(tls_err)?
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .map_err(tls_err)?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(config)
    }

    pub fn cached_hosts(&self) -> usize {
        self.leaves.lock().len()
    }
}

/// Terminate the client's TLS inside a CONNECT tunnel and replay each
/// request to `authority` over a fresh TLS connection.
pub(super) async fn intercept(
    proxy: Arc<Proxy>,
    upgraded: Upgraded,
    authority: String,
    config: Arc<ServerConfig>,
) -> anyhow::Result<()> {
    let tls = TlsAcceptor::from(config)
        .accept(TokioIo::new(upgraded))
        .await
        .context("client TLS handshake")?;

    let service = service_fn(move |req| {
        let proxy = proxy.clone();
        let authority = authority.clone();
        async move {
            let res = match reencrypt(&proxy, &authority, req).await {
                Ok(res) => res,
                Err(e) => {
                    tracing::debug!(%authority, error = ?e, "re-encrypted request failed");
                    forward::status_response(StatusCode::BAD_GATEWAY, format!("{:#}\n", e))
                }
            };
            Ok::<_, Infallible>(res)
        }
    });

    http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(TokioIo::new(tls), service)
        .await
        .context("intercepted connection")?;
    Ok(())
}

async fn reencrypt(
    proxy: &Proxy,
    authority: &str,
    mut req: Request<Incoming>,
) -> anyhow::Result<Response<ProxyBody>> {
    let host = host_of(authority).to_string();
    let stream = forward::dial(proxy, authority).await?;
    let name = ServerName::try_from(host.clone()).context("origin server name")?;
    let tls = TlsConnector::from(proxy.client_tls().clone())
        .connect(name, stream)
        .await
        .with_context(|| format!("TLS handshake with {}", authority))?;

    *req.uri_mut() = forward::origin_form(req.uri())?;
    if !req.headers().contains_key(HOST) {
        req.headers_mut().insert(HOST, HeaderValue::from_str(&host)?);
    }
    forward::send(Box::new(tls), req).await
}

/// The built-in CA certificate, for clients that should trust the proxy.
pub fn ca_cert_der() -> HostlinkResult<CertificateDer<'static>> {
    CertificateDer::from_pem_slice(CA_CERT_PEM.as_bytes()).map_err(tls_err)
}
