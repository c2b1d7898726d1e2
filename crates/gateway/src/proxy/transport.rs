//! Per-request upstream transport: TLS material from the datasource secret, the dial, and the
//! HTTP exchange over the resulting connection.

use anyhow::Context as _;
use axum::body::Body;
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderValue, Request, Response, Uri, Version, header};
use dashproxy_model::SecretSpec;
use hyper::body::Incoming;
use hyper::client::conn::{http1, http2};
use hyper_util::client::proxy::matcher::{Intercept, Matcher};
use hyper_util::rt::{TokioExecutor, TokioIo};
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use socket2::{SockRef, TcpKeepalive};
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use zeroize::Zeroizing;

const DIAL_TIMEOUT: Duration = Duration::from_secs(30);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

static SYSTEM_ROOTS: LazyLock<Arc<RootCertStore>> = LazyLock::new(load_system_roots);
static ENV_PROXIES: LazyLock<Matcher> = LazyLock::new(Matcher::from_env);

fn load_system_roots() -> Arc<RootCertStore> {
    let loaded = rustls_native_certs::load_native_certs();
    for e in &loaded.errors {
        tracing::warn!(error = %e, "unable to load part of the system trust store");
    }
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    if roots.is_empty() {
        tracing::warn!("system trust store is empty, using the bundled web PKI roots");
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    } else {
        tracing::debug!(added, ignored, "loaded system trust roots");
    }
    Arc::new(roots)
}

/// TLS parameters for one upstream. Protocol versions are always TLS 1.2 to TLS 1.3.
#[derive(Default)]
pub struct TlsSettings {
    /// PEM bundle replacing the system trust roots.
    pub ca: Option<Vec<u8>>,
    /// PEM certificate chain and private key presented to the upstream.
    pub identity: Option<(Vec<u8>, Zeroizing<Vec<u8>>)>,
    /// Sent as SNI and used to verify the certificate instead of the URL host.
    pub server_name: Option<String>,
    pub insecure_skip_verify: bool,
}

impl TlsSettings {
    pub const VERSIONS: &'static [&'static rustls::SupportedProtocolVersion] =
        &[&rustls::version::TLS12, &rustls::version::TLS13];

    /// Derive settings from the TLS block of a secret. No secret, or no TLS block, gives the
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when an inline value and its file are both set, a file cannot be read,
    /// or only one of certificate and key is given.
    pub fn from_secret(secret: Option<&SecretSpec>) -> anyhow::Result<Self> {
        let Some(tls) = secret.and_then(|s| s.tls_config.as_ref()) else {
            return Ok(Self::default());
        };

        let ca = tls.ca_source()?.map(|src| src.load()).transpose()?;
        let cert = tls.cert_source()?.map(|src| src.load()).transpose()?;
        let key = tls
            .key_source()?
            .map(|src| src.load().map(Zeroizing::new))
            .transpose()?;
        let identity = match (cert, key) {
            (Some(cert), Some(key)) => Some((cert, key)),
            (None, None) => None,
            _ => anyhow::bail!("client certificate and key must be configured together"),
        };

        Ok(Self {
            ca,
            identity,
            server_name: tls.server_name.clone().filter(|s| !s.is_empty()),
            insecure_skip_verify: tls.insecure_skip_verify,
        })
    }

    /// # Errors
    ///
    /// Returns an error when PEM material does not parse.
    pub fn client_config(&self) -> anyhow::Result<rustls::ClientConfig> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let verifier: Arc<dyn ServerCertVerifier> = if self.insecure_skip_verify {
            Arc::new(SkipCertificateVerification {
                provider: provider.clone(),
            })
        } else {
            let roots = match &self.ca {
                Some(pem) => Arc::new(roots_from_pem(pem)?),
                None => SYSTEM_ROOTS.clone(),
            };
            WebPkiServerVerifier::builder_with_provider(roots, provider.clone())
                .build()
                .context("build certificate verifier")?
        };

        let builder = rustls::ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(Self::VERSIONS)
            .context("TLS protocol versions")?
            .dangerous()
            .with_custom_certificate_verifier(verifier);

        let mut config = match &self.identity {
            Some((cert, key)) => {
                let chain = certs_from_pem(cert)?;
                let key = key_from_pem(key)?;
                builder
                    .with_client_auth_cert(chain, key)
                    .context("client certificate")?
            }
            None => builder.with_no_client_auth(),
        };
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(config)
    }
}

fn certs_from_pem(pem: &[u8]) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .context("parse PEM certificates")?;
    if certs.is_empty() {
        anyhow::bail!("no certificate found in PEM data");
    }
    Ok(certs)
}

fn key_from_pem(pem: &[u8]) -> anyhow::Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..])
        .context("parse PEM private key")?
        .context("no private key found in PEM data")
}

fn roots_from_pem(pem: &[u8]) -> anyhow::Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in certs_from_pem(pem)? {
        roots.add(cert).context("add CA certificate")?;
    }
    Ok(roots)
}

/// Build the dedicated transport for one proxied request.
///
/// # Errors
///
/// Returns an error when the TLS config cannot be built or the server name is invalid.
pub fn build_transport(settings: &TlsSettings) -> anyhow::Result<UpstreamTransport> {
    let server_name = settings
        .server_name
        .as_deref()
        .map(|name| {
            ServerName::try_from(name.to_string())
                .with_context(|| format!("invalid TLS server name '{name}'"))
        })
        .transpose()?;
    Ok(UpstreamTransport {
        connector: TlsConnector::from(Arc::new(settings.client_config()?)),
        server_name,
    })
}

/// One connection per request, never pooled. Redirects are not followed; the caller sees the
/// upstream's redirect response as-is.
pub struct UpstreamTransport {
    connector: TlsConnector,
    server_name: Option<ServerName<'static>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// HTTP/1.1 with an origin-form request target.
    Origin,
    /// HTTP/1.1 with an absolute-form target, for plain requests sent through a proxy.
    Absolute,
    Http2,
}

impl UpstreamTransport {
    /// Send `request`, whose URI must be absolute, and return the upstream response. The
    /// response body streams from a connection task that ends with it.
    ///
    /// # Errors
    ///
    /// Returns an error when the dial, the TLS handshake, or the exchange fails or times out.
    pub async fn send(&self, mut request: Request<Body>) -> anyhow::Result<Response<Incoming>> {
        let uri = request.uri().clone();
        let https = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            other => anyhow::bail!("unsupported upstream scheme {other:?}"),
        };
        let host = bare_host(&uri)?;
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });
        let proxy = if is_loopback(&host) {
            None
        } else {
            ENV_PROXIES.intercept(&uri)
        };

        if !https {
            return match proxy {
                Some(proxy) => {
                    if let Some(auth) = proxy.basic_auth() {
                        request
                            .headers_mut()
                            .insert(header::PROXY_AUTHORIZATION, auth.clone());
                    }
                    let (proxy_host, proxy_port) = proxy_address(&proxy)?;
                    let tcp = dial(&proxy_host, proxy_port).await?;
                    exchange(TokioIo::new(tcp), Framing::Absolute, request).await
                }
                None => {
                    let tcp = dial(&host, port).await?;
                    exchange(TokioIo::new(tcp), Framing::Origin, request).await
                }
            };
        }

        let tcp = match proxy {
            Some(proxy) => {
                let (proxy_host, proxy_port) = proxy_address(&proxy)?;
                let tcp = dial(&proxy_host, proxy_port).await?;
                tunnel(tcp, proxy.basic_auth(), &host, port).await?
            }
            None => dial(&host, port).await?,
        };
        let name = match &self.server_name {
            Some(name) => name.clone(),
            None => ServerName::try_from(host.clone())
                .with_context(|| format!("invalid upstream host '{host}'"))?,
        };
        let tls = timeout(TLS_HANDSHAKE_TIMEOUT, self.connector.connect(name, tcp))
            .await
            .map_err(|_| {
                anyhow::anyhow!("TLS handshake timed out after {TLS_HANDSHAKE_TIMEOUT:?}")
            })?
            .context("TLS handshake")?;
        let framing = if tls.get_ref().1.alpn_protocol() == Some(&b"h2"[..]) {
            Framing::Http2
        } else {
            Framing::Origin
        };
        exchange(TokioIo::new(tls), framing, request).await
    }
}

/// Loopback targets never go through an environment proxy.
fn is_loopback(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

fn bare_host(uri: &Uri) -> anyhow::Result<String> {
    let host = uri.host().context("upstream URL has no host")?;
    Ok(host.trim_start_matches('[').trim_end_matches(']').to_string())
}

fn proxy_address(proxy: &Intercept) -> anyhow::Result<(String, u16)> {
    let uri = proxy.uri();
    if uri.scheme_str().is_some_and(|s| s != "http") {
        anyhow::bail!("unsupported proxy scheme in {uri}");
    }
    Ok((bare_host(uri)?, uri.port_u16().unwrap_or(80)))
}

async fn dial(host: &str, port: u16) -> anyhow::Result<TcpStream> {
    let tcp = timeout(DIAL_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .map_err(|_| anyhow::anyhow!("dial {host}:{port} timed out after {DIAL_TIMEOUT:?}"))?
        .with_context(|| format!("dial {host}:{port}"))?;
    let keepalive = TcpKeepalive::new().with_time(TCP_KEEPALIVE);
    if let Err(e) = SockRef::from(&tcp).set_tcp_keepalive(&keepalive) {
        tracing::debug!(error = %e, "unable to enable TCP keep-alive");
    }
    Ok(tcp)
}

/// Open a `CONNECT` tunnel to `host:port` over a connection to an HTTP proxy.
async fn tunnel(
    mut tcp: TcpStream,
    auth: Option<&HeaderValue>,
    host: &str,
    port: u16,
) -> anyhow::Result<TcpStream> {
    let authority = if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    let mut head = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
    if let Some(auth) = auth.and_then(|v| v.to_str().ok()) {
        head.push_str(&format!("Proxy-Authorization: {auth}\r\n"));
    }
    head.push_str("\r\n");

    timeout(DIAL_TIMEOUT, async {
        tcp.write_all(head.as_bytes()).await?;
        let mut response: Vec<u8> = Vec::with_capacity(256);
        let mut chunk = [0u8; 512];
        while !response.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = tcp.read(&mut chunk).await?;
            if n == 0 {
                anyhow::bail!("proxy closed the connection during CONNECT");
            }
            response.extend_from_slice(&chunk[..n]);
            if response.len() > MAX_CONNECT_RESPONSE {
                anyhow::bail!("proxy CONNECT response too large");
            }
        }
        let status = response.split(|b| *b == b' ').nth(1).unwrap_or_default();
        if status != b"200" {
            let line = response.split(|b| *b == b'\r').next().unwrap_or_default();
            anyhow::bail!("proxy refused CONNECT: {}", String::from_utf8_lossy(line));
        }
        Ok::<(), anyhow::Error>(())
    })
    .await
    .map_err(|_| anyhow::anyhow!("proxy CONNECT timed out after {DIAL_TIMEOUT:?}"))??;
    Ok(tcp)
}

async fn exchange<T>(
    io: T,
    framing: Framing,
    mut request: Request<Body>,
) -> anyhow::Result<Response<Incoming>>
where
    T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    if framing == Framing::Http2 {
        *request.version_mut() = Version::HTTP_2;
        let (mut sender, conn) = http2::handshake(TokioExecutor::new(), io)
            .await
            .context("HTTP/2 handshake")?;
        tokio::spawn(drive(conn));
        return sender.send_request(request).await.context("send request");
    }

    *request.version_mut() = Version::HTTP_11;
    if framing == Framing::Origin {
        let target = request
            .uri()
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));
        *request.uri_mut() = Uri::from(target);
    }
    let (mut sender, conn) = http1::handshake(io).await.context("HTTP/1.1 handshake")?;
    tokio::spawn(drive(conn));
    sender.send_request(request).await.context("send request")
}

async fn drive<F>(conn: F)
where
    F: Future<Output = hyper::Result<()>>,
{
    if let Err(e) = conn.await {
        tracing::debug!(error = %e, "upstream connection ended with an error");
    }
}

/// Accepts any certificate chain. Handshake signatures are still checked.
#[derive(Debug)]
struct SkipCertificateVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for SkipCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
