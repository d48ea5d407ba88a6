//! HTTP Probe (§4.2): one HTTP GET through one proxy (HTTP/HTTPS CONNECT,
//! or SOCKS4/4a/5/5h tunnel), with per-phase latency instrumentation.
//!
//! There is no connection reuse across attempts (§4.2 "without connection
//! reuse") — every call opens a fresh TCP connection and tears it down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use bytes::BytesMut;
use chrono::Utc;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};

use crate::model::{ProbeError, ProbeErrorKind, ProbeResult, ProxyEndpoint, ProxyScheme, TargetSpec};

const USER_AGENT: &str = "proxychick/1.0";

/// Trait object boundary between "how we got a byte pipe to the target"
/// (plain TCP, SOCKS tunnel, or TLS over either) and the HTTP GET that
/// runs over it — mirrors the dynamic-transport boxing pattern used for
/// multi-protocol proxy tunnels elsewhere in the ecosystem.
type BoxedIo = Box<dyn AsyncReadWrite>;

trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}

fn tls_client_config() -> Arc<ClientConfig> {
    let mut cfg = ClientConfig::builder_with_provider(rustls::crypto::aws_lc_rs::default_provider().into())
        .with_safe_default_protocol_versions()
        .expect("rustls default protocol versions")
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier))
        .with_no_client_auth();
    cfg.alpn_protocols = vec![b"http/1.1".to_vec()];
    Arc::new(cfg)
}

/// Proxy endpoints under test are usually fronting arbitrary, often
/// self-signed, upstream certs; the probe measures reachability and
/// latency, not certificate trust, so verification is intentionally
/// disabled here (never used for anything but this benchmark traffic).
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

/// Drives one HTTP GET of `target` through `proxy`, returning a
/// `ProbeResult` that is never an `Err` — every failure is folded into
/// `Status=false` + `Error` per §7.
pub async fn probe_http(proxy: &ProxyEndpoint, target: &TargetSpec, timeout: Duration) -> ProbeResult {
    let (target_scheme, target_host, target_port, target_path, host_header) = match target {
        TargetSpec::Tcp {
            scheme,
            host,
            port,
            path,
        } => {
            let default_port = if scheme == "https" { 443 } else { 80 };
            let host_header = if *port == default_port {
                host.clone()
            } else {
                format!("{host}:{port}")
            };
            (scheme.clone(), host.clone(), *port, path.clone(), host_header)
        }
        TargetSpec::Udp { .. } => unreachable!("HTTP probe invoked with a UDP target"),
    };

    let mut result = ProbeResult::new(proxy.display_url(), target.url_string(), Utc::now());
    let start = Instant::now();

    // --- DNS resolve + TCP connect to the proxy itself ---
    let dns_start = Instant::now();
    let resolved = match tokio::time::timeout(
        timeout,
        tokio::net::lookup_host((proxy.host.as_str(), proxy.port)),
    )
    .await
    {
        Ok(Ok(mut addrs)) => addrs.next(),
        _ => None,
    };
    let Some(proxy_addr) = resolved else {
        result.error = Some(ProbeError::new(
            ProbeErrorKind::ProxyConnectFailure,
            format!("could not resolve proxy host {}", proxy.host),
        ));
        return result;
    };
    result.latency.dns_resolve = dns_start.elapsed().as_millis() as u64;

    let connect_start = Instant::now();
    let tcp = match tokio::time::timeout(timeout, TcpStream::connect(proxy_addr)).await {
        Ok(Ok(tcp)) => tcp,
        _ => {
            result.error = Some(ProbeError::new(
                ProbeErrorKind::ProxyConnectFailure,
                format!("could not connect to proxy {proxy_addr}"),
            ));
            return result;
        }
    };
    result.latency.connect = connect_start.elapsed().as_millis() as u64;
    result.proxy_serv_ip_addr = proxy_addr.ip().to_string();
    let _ = tcp.set_nodelay(true);

    // --- Get a byte pipe to the target, through whichever tunnel the
    // proxy scheme implies ---
    let tunnel: BoxedIo = match proxy.scheme {
        ProxyScheme::Socks4 | ProxyScheme::Socks4a => {
            match tokio::time::timeout(
                timeout,
                Socks4Stream::connect_with_socket(tcp, (target_host.as_str(), target_port)),
            )
            .await
            {
                Ok(Ok(stream)) => Box::new(stream),
                _ => {
                    result.error = Some(ProbeError::new(
                        ProbeErrorKind::ProxyConnectFailure,
                        "socks4 handshake with proxy failed",
                    ));
                    return result;
                }
            }
        }
        ProxyScheme::Socks5 | ProxyScheme::Socks5h => {
            let connect = match (&proxy.user, &proxy.password) {
                (Some(u), p) => tokio::time::timeout(
                    timeout,
                    Socks5Stream::connect_with_password_and_socket(
                        tcp,
                        (target_host.as_str(), target_port),
                        u,
                        p.as_deref().unwrap_or(""),
                    ),
                )
                .await
                .map(|r| r.map(|s| Box::new(s) as BoxedIo)),
                (None, _) => tokio::time::timeout(
                    timeout,
                    Socks5Stream::connect_with_socket(tcp, (target_host.as_str(), target_port)),
                )
                .await
                .map(|r| r.map(|s| Box::new(s) as BoxedIo)),
            };
            match connect {
                Ok(Ok(stream)) => stream,
                _ => {
                    result.error = Some(ProbeError::new(
                        ProbeErrorKind::ProxyConnectFailure,
                        "socks5 handshake with proxy failed",
                    ));
                    return result;
                }
            }
        }
        ProxyScheme::Http | ProxyScheme::Https => {
            let mut io: BoxedIo = if proxy.scheme == ProxyScheme::Https {
                let tls_start = Instant::now();
                match tls_connect(tcp, &proxy.host, timeout).await {
                    Ok(tls) => {
                        result.latency.tls_handshake = tls_start.elapsed().as_millis() as u64;
                        Box::new(tls)
                    }
                    Err(e) => {
                        result.error = Some(ProbeError::new(
                            ProbeErrorKind::ProxyConnectFailure,
                            format!("TLS handshake with proxy failed: {e}"),
                        ));
                        return result;
                    }
                }
            } else {
                Box::new(tcp)
            };

            if target_scheme == "https" {
                let connect_start = Instant::now();
                match send_connect(&mut io, &target_host, target_port, timeout).await {
                    Ok((code, headers)) => {
                        result.proxy_status_code = code;
                        result.proxy_resp_header = headers;
                        result.latency.proxy_resp = connect_start.elapsed().as_millis() as u64;
                        if code != 200 {
                            result.error = Some(ProbeError::new(
                                ProbeErrorKind::ProxyProtocolError,
                                format!("proxy CONNECT failed with status {code}"),
                            ));
                            return result;
                        }
                    }
                    Err(e) => {
                        result.error = Some(ProbeError::new(
                            ProbeErrorKind::ProxyConnectFailure,
                            format!("proxy CONNECT request failed: {e}"),
                        ));
                        return result;
                    }
                }
            }
            io
        }
    };

    // --- Target-facing TLS, when the target itself is HTTPS and we
    // tunnelled rather than let the proxy terminate TLS for us ---
    let mut app_stream: BoxedIo = if target_scheme == "https" {
        // tls_handshake already holds the proxy-facing TLS time when the
        // proxy itself is HTTPS (§4.2); only overwrite it here for the
        // HTTP-CONNECT-proxy case, where this is the only TLS handshake.
        let tls_start = Instant::now();
        match tls_connect(tunnel, &target_host, timeout).await {
            Ok(tls) => {
                if result.latency.tls_handshake == 0 {
                    result.latency.tls_handshake = tls_start.elapsed().as_millis() as u64;
                }
                Box::new(tls)
            }
            Err(e) => {
                result.error = Some(ProbeError::new(
                    ProbeErrorKind::TargetConnectFailure,
                    format!("TLS handshake with target failed: {e}"),
                ));
                return result;
            }
        }
    } else {
        tunnel
    };

    let request_line = if proxy.scheme.is_http_family() && target_scheme != "https" {
        // Classic forward-proxy form: absolute-URI in the request line.
        format!("{target_scheme}://{host_header}{target_path}")
    } else {
        target_path.clone()
    };
    let req = format!(
        "GET {request_line} HTTP/1.1\r\nHost: {host_header}\r\nUser-Agent: {USER_AGENT}\r\nAccept: */*\r\nConnection: close\r\n\r\n"
    );

    if let Err(e) = tokio::time::timeout(timeout, app_stream.write_all(req.as_bytes())).await {
        result.error = Some(ProbeError::new(
            ProbeErrorKind::TargetConnectFailure,
            format!("failed to write request: {e}"),
        ));
        return result;
    }

    match tokio::time::timeout(timeout, read_http_response(&mut app_stream)).await {
        Ok(Ok((status, body))) => {
            result.latency.ttfb = start.elapsed().as_millis() as u64;
            result.target_status_code = status;
            result.resp_payload = body;
            result.status = true;
        }
        Ok(Err(e)) => {
            result.error = Some(ProbeError::new(
                ProbeErrorKind::TargetConnectFailure,
                format!("failed to read target response: {e}"),
            ));
        }
        Err(_) => {
            result.error = Some(ProbeError::new(
                ProbeErrorKind::TargetConnectFailure,
                "timed out waiting for target response",
            ));
        }
    }
    result
}

async fn tls_connect<S>(stream: S, sni_host: &str, timeout: Duration) -> Result<tokio_rustls::client::TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let connector = TlsConnector::from(tls_client_config());
    let server_name = ServerName::try_from(sni_host.to_string())
        .map_err(|_| anyhow!("invalid SNI hostname {sni_host}"))?;
    tokio::time::timeout(timeout, connector.connect(server_name, stream))
        .await
        .context("TLS handshake timed out")?
        .context("TLS handshake failed")
}

/// Issues `CONNECT host:port HTTP/1.1` and returns the response status
/// code and headers (§4.2 "a hook on the CONNECT response").
async fn send_connect(
    io: &mut BoxedIo,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<(u16, Vec<(String, String)>)> {
    let req = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\nProxy-Connection: Keep-Alive\r\n\r\n");
    tokio::time::timeout(timeout, io.write_all(req.as_bytes()))
        .await
        .context("CONNECT write timed out")??;

    let mut buf = BytesMut::with_capacity(512);
    let mut tmp = [0u8; 512];
    loop {
        let n = tokio::time::timeout(timeout, io.read(&mut tmp))
            .await
            .context("CONNECT read timed out")??;
        if n == 0 {
            return Err(anyhow!("proxy closed connection during CONNECT"));
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = &buf[..pos];
            let mut headers = [httparse::EMPTY_HEADER; 32];
            let mut resp = httparse::Response::new(&mut headers);
            resp.parse(&buf[..pos + 4]).context("parse CONNECT response")?;
            let code = resp.code.unwrap_or(0);
            let parsed_headers = resp
                .headers
                .iter()
                .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).to_string()))
                .collect();
            let _ = head;
            return Ok((code, parsed_headers));
        }
        if buf.len() > 8192 {
            return Err(anyhow!("CONNECT response too large"));
        }
    }
}

/// Reads a full HTTP response (headers + body, respecting
/// `Content-Length` when present) and returns `(status, body)`.
async fn read_http_response<S: AsyncRead + Unpin>(io: &mut S) -> Result<(u16, String)> {
    let mut buf = BytesMut::with_capacity(4096);
    let mut tmp = [0u8; 4096];
    let header_end = loop {
        let n = io.read(&mut tmp).await.context("read response")?;
        if n == 0 {
            if buf.is_empty() {
                return Err(anyhow!("connection closed before any response bytes"));
            }
            break None;
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break Some(pos + 4);
        }
        if buf.len() > 1 << 20 {
            return Err(anyhow!("response headers too large"));
        }
    };

    let Some(header_end) = header_end else {
        return Err(anyhow!("connection closed before headers completed"));
    };

    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut resp = httparse::Response::new(&mut headers);
    resp.parse(&buf[..header_end]).context("parse HTTP response")?;
    let status = resp.code.unwrap_or(0);
    let content_length: Option<usize> = resp
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .and_then(|v| v.trim().parse().ok());

    let mut body = buf.split_off(header_end);
    if let Some(want) = content_length {
        while body.len() < want {
            let n = io.read(&mut tmp).await.context("read response body")?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&tmp[..n]);
        }
        body.truncate(want);
    } else {
        // No Content-Length: drain until EOF (matches "Connection: close").
        loop {
            match io.read(&mut tmp).await {
                Ok(0) => break,
                Ok(n) => body.extend_from_slice(&tmp[..n]),
                Err(_) => break,
            }
        }
    }

    Ok((status, String::from_utf8_lossy(&body).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{generate_simple_self_signed, CertifiedKey};
    use rustls::pki_types::PrivatePkcs8KeyDer;
    use rustls::ServerConfig;
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    fn test_server_config() -> Arc<ServerConfig> {
        let CertifiedKey { cert, signing_key } =
            generate_simple_self_signed(vec!["127.0.0.1".to_string()]).expect("self-signed cert");
        let key = PrivatePkcs8KeyDer::from(signing_key.serialize_der());
        let config = ServerConfig::builder_with_provider(rustls::crypto::aws_lc_rs::default_provider().into())
            .with_safe_default_protocol_versions()
            .expect("rustls default protocol versions")
            .with_no_client_auth()
            .with_single_cert(vec![cert.der().clone()], key.into())
            .expect("valid self-signed cert/key pair");
        Arc::new(config)
    }

    /// Fake HTTPS target: accepts one TLS connection, reads a request up to
    /// the blank line, and replies 200 with `body` (§8 scenario 1).
    async fn spawn_fake_https_target(body: &'static str) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let acceptor = TlsAcceptor::from(test_server_config());
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut tls = acceptor.accept(tcp).await.unwrap();
            let mut buf = [0u8; 4096];
            loop {
                let n = tls.read(&mut buf).await.unwrap();
                if buf[..n].windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            tls.write_all(response.as_bytes()).await.unwrap();
            tls.shutdown().await.ok();
        });
        addr
    }

    /// Fake HTTP-CONNECT proxy that tunnels the bytes on to `upstream`
    /// after replying `200 Connection established` (§8 scenario 1).
    async fn spawn_tunneling_http_proxy(upstream: std::net::SocketAddr) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut client, _) = listener.accept().await.unwrap();
            let mut buf = BytesMut::with_capacity(512);
            let mut tmp = [0u8; 512];
            loop {
                let n = client.read(&mut tmp).await.unwrap();
                buf.extend_from_slice(&tmp[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            client
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
            let mut upstream_conn = TcpStream::connect(upstream).await.unwrap();
            tokio::io::copy_bidirectional(&mut client, &mut upstream_conn)
                .await
                .ok();
        });
        addr
    }

    /// Fake HTTP-CONNECT proxy that rejects the CONNECT with a vendor error
    /// header (§8 scenario 2).
    async fn spawn_rejecting_http_proxy() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut client, _) = listener.accept().await.unwrap();
            let mut buf = BytesMut::with_capacity(512);
            let mut tmp = [0u8; 512];
            loop {
                let n = client.read(&mut tmp).await.unwrap();
                buf.extend_from_slice(&tmp[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            client
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\nReason: quota exceeded; retry later\r\n\r\n")
                .await
                .unwrap();
        });
        addr
    }

    fn http_proxy(addr: std::net::SocketAddr, user: Option<&str>, password: Option<&str>) -> ProxyEndpoint {
        ProxyEndpoint {
            scheme: ProxyScheme::Http,
            host: addr.ip().to_string(),
            port: addr.port(),
            user: user.map(str::to_string),
            password: password.map(str::to_string),
        }
    }

    fn https_target(addr: std::net::SocketAddr) -> TargetSpec {
        TargetSpec::Tcp {
            scheme: "https".to_string(),
            host: addr.ip().to_string(),
            port: addr.port(),
            path: "/ip".to_string(),
        }
    }

    #[tokio::test]
    async fn http_connect_happy_path_reports_all_latency_phases() {
        let target_addr = spawn_fake_https_target("1.2.3.4").await;
        let proxy_addr = spawn_tunneling_http_proxy(target_addr).await;
        let proxy = http_proxy(proxy_addr, Some("user"), Some("pw"));
        let target = https_target(target_addr);

        let result = probe_http(&proxy, &target, Duration::from_secs(5)).await;

        assert!(result.status, "{:?}", result.error);
        assert_eq!(result.target_status_code, 200);
        assert_eq!(result.proxy_status_code, 200);
        assert_eq!(result.resp_payload, "1.2.3.4");
        assert!(result.latency.dns_resolve > 0);
        assert!(result.latency.connect > 0);
        assert!(result.latency.tls_handshake > 0);
        assert!(result.latency.proxy_resp > 0);
        assert!(result.latency.ttfb > 0);
    }

    #[tokio::test]
    async fn vendor_proxy_error_is_reclassified() {
        let proxy_addr = spawn_rejecting_http_proxy().await;
        let proxy = http_proxy(proxy_addr, None, None);
        let target = https_target("127.0.0.1:1".parse().unwrap());

        let result = probe_http(&proxy, &target, Duration::from_secs(5)).await;

        assert!(!result.status);
        assert_eq!(result.proxy_status_code, 407);
        assert_eq!(result.target_status_code, 0);
        let err = result.error.as_ref().unwrap();
        assert_eq!(err.message, "proxy CONNECT failed with status 407");
    }

    #[tokio::test]
    async fn closed_proxy_port_is_a_connect_failure() {
        let proxy = ProxyEndpoint {
            scheme: ProxyScheme::Http,
            host: "127.0.0.1".to_string(),
            port: 1, // almost certainly closed
            user: None,
            password: None,
        };
        let target = https_target("127.0.0.1:2".parse().unwrap());

        let result = probe_http(&proxy, &target, Duration::from_millis(300)).await;

        assert!(!result.status);
        assert_eq!(result.latency.connect, 0);
        assert_eq!(result.latency.tls_handshake, 0);
        assert!(result.error.is_some());
    }
}
