//! UDP Probe (§4.3): SOCKS5 UDP-ASSOCIATE echo test.

use std::time::{Duration, Instant};

use chrono::Utc;

use crate::model::{ProbeError, ProbeErrorKind, ProbeResult, ProxyEndpoint, TargetSpec};
use crate::socks5::Socks5UdpSession;

const ECHO_PAYLOAD: &[u8] = b"Hello from ProxyChick";

/// Drives one SOCKS5 UDP-ASSOCIATE echo probe through `proxy` against
/// `target`, returning a `ProbeResult` that is never an `Err` — transport
/// failures are folded into `Status=false` + `Error` per §7.
pub async fn probe_udp(proxy: &ProxyEndpoint, target: &TargetSpec, timeout: Duration) -> ProbeResult {
    let (target_host, target_port) = match target {
        TargetSpec::Udp { host, port } => (host.clone(), *port),
        TargetSpec::Tcp { .. } => unreachable!("UDP probe invoked with a TCP target"),
    };

    let mut result = ProbeResult::new(
        proxy.display_url(),
        target.url_string(),
        Utc::now(),
    );

    let start = Instant::now();

    let establish = tokio::time::timeout(
        timeout,
        Socks5UdpSession::establish(
            &proxy.host,
            proxy.port,
            proxy.user.as_deref(),
            proxy.password.as_deref(),
        ),
    )
    .await;

    let session = match establish {
        Err(_) => {
            result.error = Some(ProbeError::new(
                ProbeErrorKind::ProxyConnectFailure,
                "c2p transport: failed to establish TCP connection to proxy",
            ));
            return result;
        }
        Ok(Err(e)) => {
            // The handshake itself failed somewhere after the TCP dial
            // succeeded (auth rejected, ASSOCIATE rejected) — still
            // classified as "couldn't get a UDP tunnel".
            tracing::debug!(error = %e, "socks5 udp associate failed");
            result.error = Some(ProbeError::new(
                ProbeErrorKind::TargetConnectFailure,
                "c2t transport: failed to establish UDP connection",
            ));
            return result;
        }
        Ok(Ok(session)) => session,
    };
    result.latency.proxy_resp = start.elapsed().as_millis() as u64;
    result.proxy_serv_ip_addr = session.relay_addr().ip().to_string();

    if let Err(e) = session.send_to(&target_host, target_port, ECHO_PAYLOAD).await {
        tracing::debug!(error = %e, "udp send failed");
        result.error = Some(ProbeError::new(
            ProbeErrorKind::TargetConnectFailure,
            "c2t transport: failed to read from UDP socket",
        ));
        return result;
    }

    let mut buf = [0u8; 1024];
    let read = tokio::time::timeout(timeout, session.recv(&mut buf)).await;
    let payload = match read {
        Err(_) | Ok(Err(_)) => {
            result.error = Some(ProbeError::new(
                ProbeErrorKind::TargetConnectFailure,
                "c2t transport: failed to read from UDP socket",
            ));
            return result;
        }
        Ok(Ok(payload)) => payload,
    };

    result.latency.ttfb = start.elapsed().as_millis() as u64;
    result.resp_payload = String::from_utf8_lossy(&payload).to_string();
    result.status = true;
    result
}
