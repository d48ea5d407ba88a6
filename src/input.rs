//! Input Reader (§4.8, ADDED): turns a path (or the literal `STDIN`) into a
//! `Vec<String>` of normalized, decoded, sentinel-substituted proxy lines.

use std::io::Read;
use std::path::Path;

use crate::error::ConfigError;
use crate::normalize::substitute_session_token;

const UTF16LE_BOM: [u8; 2] = [0xFF, 0xFE];

/// Reads and decodes the proxy list at `path`, or stdin if `path == "STDIN"`
/// (§6). Each returned line has already had its `%s` sentinel substituted.
pub fn read_proxy_lines(path: &str) -> Result<Vec<String>, ConfigError> {
    let bytes = if path == "STDIN" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .map_err(|source| ConfigError::UnreadableInput {
                path: path.to_string(),
                source,
            })?;
        buf
    } else {
        std::fs::read(Path::new(path)).map_err(|source| ConfigError::UnreadableInput {
            path: path.to_string(),
            source,
        })?
    };

    let text = decode(&bytes);
    Ok(text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(substitute_session_token)
        .collect())
}

/// Decodes raw file bytes to a UTF-8 `String`, transparently handling
/// UTF-16LE input with or without a BOM (§6 scenario 6).
fn decode(bytes: &[u8]) -> String {
    if bytes.starts_with(&UTF16LE_BOM) {
        let (decoded, _, _) = encoding_rs::UTF_16LE.decode(&bytes[2..]);
        return decoded.into_owned();
    }
    if looks_like_bomless_utf16le(bytes) {
        let (decoded, _, _) = encoding_rs::UTF_16LE.decode(bytes);
        return decoded.into_owned();
    }
    String::from_utf8_lossy(bytes).into_owned()
}

/// Heuristic for BOM-less UTF-16LE: every ASCII character in UTF-16LE is
/// followed by a `0x00` byte, so a majority of even-indexed bytes being
/// `0x00` is a strong signal (§4.8).
fn looks_like_bomless_utf16le(bytes: &[u8]) -> bool {
    if bytes.len() < 4 {
        return false;
    }
    let sample_len = bytes.len().min(256);
    let pairs = sample_len / 2;
    if pairs == 0 {
        return false;
    }
    let zero_high_bytes = bytes[..sample_len / 2 * 2]
        .chunks_exact(2)
        .filter(|pair| pair[1] == 0x00)
        .count();
    (zero_high_bytes as f64 / pairs as f64) > 0.6
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn decodes_plain_utf8() {
        let text = decode(b"http://1.2.3.4:8080\nhttp://5.6.7.8:8080\n");
        assert_eq!(text, "http://1.2.3.4:8080\nhttp://5.6.7.8:8080\n");
    }

    #[test]
    fn decodes_utf16le_with_bom() {
        let mut bytes = UTF16LE_BOM.to_vec();
        for unit in "http://1.2.3.4:8080\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let text = decode(&bytes);
        assert_eq!(text, "http://1.2.3.4:8080\n");
    }

    #[test]
    fn decodes_utf16le_without_bom_via_heuristic() {
        let mut bytes = Vec::new();
        for unit in "http://1.2.3.4:8080\nhttp://5.6.7.8:1080\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let text = decode(&bytes);
        assert_eq!(text, "http://1.2.3.4:8080\nhttp://5.6.7.8:1080\n");
    }

    #[test]
    fn strips_cr_and_drops_blank_lines() {
        let lines = {
            let text = "http://1.2.3.4:8080\r\n\r\nhttp://5.6.7.8:1080\r\n";
            text.split('\n')
                .map(|l| l.strip_suffix('\r').unwrap_or(l))
                .filter(|l| !l.is_empty())
                .map(|l| l.to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(lines, vec!["http://1.2.3.4:8080", "http://5.6.7.8:1080"]);
    }

    #[test]
    fn reads_from_a_real_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "http://1.2.3.4:8080").unwrap();
        writeln!(file, "http://5.6.7.8:1080").unwrap();
        let lines = read_proxy_lines(file.path().to_str().unwrap()).unwrap();
        assert_eq!(lines, vec!["http://1.2.3.4:8080", "http://5.6.7.8:1080"]);
    }

    #[test]
    fn missing_file_is_an_unreadable_input_error() {
        let err = read_proxy_lines("/nonexistent/path/proxies.txt");
        assert!(matches!(err, Err(ConfigError::UnreadableInput { .. })));
    }
}
