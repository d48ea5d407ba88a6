//! Result Enricher (§4.4): post-processes a `ProbeResult` after the probe
//! returns — reclassifies proxy vendor error headers, and extracts the
//! observed exit-node IP from the target response body.

use crate::model::{ProbeError, ProbeErrorKind, ProbeResult};

const CLOUDFLARE_TRACE: &str = "https://www.cloudflare.com/cdn-cgi/trace";
const DATASCRAPE_IP: &str = "https://api.datascrape.tech/latest/ip";

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Enriches the outcome of an HTTP probe in place (§4.4 "HTTP enricher").
pub fn enrich_http(result: &mut ProbeResult) {
    if result.proxy_status_code != 0 && result.proxy_status_code != 200 {
        if let Some(reason) = header_value(&result.proxy_resp_header, "Reason") {
            let message = reason.split(';').next().unwrap_or(reason);
            result.error = Some(ProbeError::new(
                ProbeErrorKind::ProxyProtocolError,
                format!("Proxy Error:{message}"),
            ));
        } else if let Some(luminati) = header_value(&result.proxy_resp_header, "X-Luminati-Error") {
            result.error = Some(ProbeError::new(
                ProbeErrorKind::ProxyProtocolError,
                format!("Proxy Error:{luminati}"),
            ));
        }
    }

    if !result.resp_payload.is_empty() {
        if result.target_url == CLOUDFLARE_TRACE {
            if let Some(ip) = result
                .resp_payload
                .lines()
                .find_map(|line| line.strip_prefix("ip="))
            {
                result.proxy_node_ip_addr = ip.to_string();
            }
        } else if result.target_url == DATASCRAPE_IP {
            result.proxy_node_ip_addr = result.resp_payload.trim().to_string();
        }
    }
}

/// Enriches the outcome of a UDP echo probe in place (§4.4 "UDP enricher").
/// The echo service returns JSON with a `clent_ip_addr` field (preserving
/// the upstream service's own typo, not introducing a new one).
pub fn enrich_udp(result: &mut ProbeResult) {
    if result.resp_payload.is_empty() {
        return;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&result.resp_payload) {
        if let Some(ip) = value.get("clent_ip_addr").and_then(|v| v.as_str()) {
            result.proxy_node_ip_addr = ip.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn base_result(target_url: &str) -> ProbeResult {
        let mut r = ProbeResult::new("http://p".into(), target_url.into(), Utc::now());
        r.status = true;
        r
    }

    #[test]
    fn rewrites_soax_reason_header() {
        let mut r = base_result(DATASCRAPE_IP);
        r.proxy_status_code = 407;
        r.proxy_resp_header = vec![("Reason".to_string(), "quota exceeded; retry later".to_string())];
        enrich_http(&mut r);
        assert_eq!(r.error_message(), "Proxy Error:quota exceeded");
    }

    #[test]
    fn rewrites_luminati_header() {
        let mut r = base_result(DATASCRAPE_IP);
        r.proxy_status_code = 403;
        r.proxy_resp_header = vec![("X-Luminati-Error".to_string(), "session expired".to_string())];
        enrich_http(&mut r);
        assert_eq!(r.error_message(), "Proxy Error:session expired");
    }

    #[test]
    fn unknown_vendor_header_is_ignored() {
        let mut r = base_result(DATASCRAPE_IP);
        r.proxy_status_code = 403;
        r.proxy_resp_header = vec![("X-Other-Vendor".to_string(), "nope".to_string())];
        enrich_http(&mut r);
        assert!(r.error.is_none());
    }

    #[test]
    fn extracts_cloudflare_trace_ip() {
        let mut r = base_result(CLOUDFLARE_TRACE);
        r.resp_payload = "fl=1\nip=1.2.3.4\nts=123\n".to_string();
        enrich_http(&mut r);
        assert_eq!(r.proxy_node_ip_addr, "1.2.3.4");
    }

    #[test]
    fn extracts_datascrape_body_as_ip() {
        let mut r = base_result(DATASCRAPE_IP);
        r.resp_payload = "9.8.7.6".to_string();
        enrich_http(&mut r);
        assert_eq!(r.proxy_node_ip_addr, "9.8.7.6");
    }

    #[test]
    fn unknown_target_leaves_ip_empty() {
        let mut r = base_result("https://example.com/");
        r.resp_payload = "whatever".to_string();
        enrich_http(&mut r);
        assert_eq!(r.proxy_node_ip_addr, "");
    }

    #[test]
    fn udp_enricher_parses_clent_ip_addr_field() {
        let mut r = base_result("127.0.0.1:9");
        r.resp_payload = r#"{"clent_ip_addr":"9.9.9.9"}"#.to_string();
        enrich_udp(&mut r);
        assert_eq!(r.proxy_node_ip_addr, "9.9.9.9");
    }

    #[test]
    fn udp_enricher_ignores_malformed_json() {
        let mut r = base_result("127.0.0.1:9");
        r.resp_payload = "not json".to_string();
        enrich_udp(&mut r);
        assert_eq!(r.proxy_node_ip_addr, "");
    }
}
