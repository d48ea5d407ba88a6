//! GeoIP Resolver (§4.10, ADDED): wraps a `maxminddb::Reader` to map an
//! observed exit-node IP to an ISO country code + name for the Aggregator's
//! country distribution table. Grounded on `duan78-proxy-rs`'s use of the
//! `maxminddb` crate (`other_examples/manifests/duan78-proxy-rs/Cargo.toml`).

use std::path::Path;

use maxminddb::geoip2;

use crate::error::ConfigError;

pub struct GeoipResolver {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl GeoipResolver {
    /// Opens an MMDB Country or City database from disk. Any error reading
    /// or parsing the file is fatal (§7) — a bad `-countryMmdb` path is a
    /// misconfiguration, not a per-probe failure.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let reader = maxminddb::Reader::open_readfile(path).map_err(|source| ConfigError::UnreadableGeoipDb {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { reader })
    }

    /// Looks up `ip`'s country. Returns `None` for unparsable addresses,
    /// addresses absent from the database, or records with no country
    /// name in English — all treated as "can't classify this exit", not
    /// as errors.
    pub fn lookup(&self, ip: &str) -> Option<(String, String)> {
        let addr: std::net::IpAddr = ip.parse().ok()?;
        let record: Option<geoip2::Country> = self.reader.lookup(addr).ok()?;
        let country = record?.country?;
        let iso = country.iso_code?.to_string();
        let name = country
            .names
            .as_ref()
            .and_then(|names| names.get("en"))
            .map(|s| s.to_string())
            .unwrap_or_else(|| iso.clone());
        Some((iso, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_reports_config_error_for_missing_file() {
        let err = GeoipResolver::open("/nonexistent/path/to/Country.mmdb");
        assert!(err.is_err());
    }
}
