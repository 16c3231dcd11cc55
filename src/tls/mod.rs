//! Certificate checks that sit on top of the TLS library.
//!
//! The TLS library validates the chain. Host names are matched here, so
//! the rules are the same on every platform:
//!
//! - DNS subject alternative names take precedence over the common name.
//!   If any DNS SAN is present, the common name is never consulted.
//! - A wildcard is only allowed as the whole leftmost label (`*.example.com`)
//!   and matches exactly one label.
//! - IP-address hosts match IP SANs and are never matched by a wildcard.

use std::net::IpAddr;

use sha2::{Digest, Sha256};
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use crate::error::{Error, Result};

/// Names a certificate is valid for.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CertificateNames {
    pub dns: Vec<String>,
    pub ips: Vec<IpAddr>,
    pub common_names: Vec<String>,
}

impl CertificateNames {
    /// Read names from a DER-encoded certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Decode(format!("malformed certificate: {}", e)))?;
        let mut names = Self::default();
        let san = cert
            .subject_alternative_name()
            .map_err(|e| Error::Decode(format!("malformed subjectAltName: {}", e)))?;
        for name in san.iter().flat_map(|ext| ext.value.general_names.iter()) {
            match name {
                GeneralName::DNSName(dns) => names.dns.push((*dns).to_owned()),
                GeneralName::IPAddress(bytes) => {
                    if let Some(ip) = ip_from_bytes(bytes) {
                        names.ips.push(ip);
                    }
                }
                _ => {}
            }
        }
        names.common_names = cert
            .subject()
            .iter_common_name()
            .filter_map(|cn| cn.as_str().ok())
            .map(str::to_owned)
            .collect();
        Ok(names)
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}

/// Check that the certificate `der` names `host`.
pub fn verify_host_name(host: &str, der: &[u8]) -> Result<()> {
    let names = CertificateNames::from_der(der)?;
    verify_names(host, &names)
}

/// [`verify_host_name`] over already extracted names.
pub fn verify_names(host: &str, names: &CertificateNames) -> Result<()> {
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    let host_ip: Option<IpAddr> = host.parse().ok();

    if let Some(ip) = host_ip {
        if names.ips.contains(&ip) {
            return Ok(());
        }
    } else if names.dns.iter().any(|pattern| match_host_name(host, pattern)) {
        tracing::debug!(host, "host name matched a DNS subject alternative name");
        return Ok(());
    }

    if !names.dns.is_empty() {
        return Err(Error::HostNameMismatch(format!(
            "'{}' does not match any DNS subject alternative name",
            host
        )));
    }

    let common_name = most_specific(&names.common_names)
        .ok_or_else(|| Error::HostNameMismatch("certificate subject has no common name".into()))?;
    let matched = match host_ip {
        Some(ip) => common_name.parse::<IpAddr>().is_ok_and(|cn| cn == ip),
        None => match_host_name(host, common_name),
    };
    if matched {
        Ok(())
    } else {
        Err(Error::HostNameMismatch(format!(
            "'{}' does not match certificate common name '{}'",
            host, common_name
        )))
    }
}

/// Case-insensitive match of `host` against a certificate name that may
/// begin with a single `*.` wildcard label.
pub fn match_host_name(host: &str, pattern: &str) -> bool {
    if host.parse::<IpAddr>().is_ok() {
        return !pattern.contains('*') && host.eq_ignore_ascii_case(pattern);
    }
    let Some(suffix) = pattern.strip_prefix("*.") else {
        return !pattern.contains('*') && host.eq_ignore_ascii_case(pattern);
    };
    if suffix.contains('*') || !suffix.contains('.') {
        return false;
    }
    match host.split_once('.') {
        Some((label, rest)) => !label.is_empty() && rest.eq_ignore_ascii_case(suffix),
        None => false,
    }
}

/// Among several common names, the one with the most labels, then the
/// fewest wildcards, then the longest.
fn most_specific(names: &[String]) -> Option<&str> {
    names
        .iter()
        .max_by_key(|n| {
            (
                n.matches('.').count(),
                std::cmp::Reverse(n.matches('*').count()),
                n.len(),
            )
        })
        .map(String::as_str)
}

/// `tls-server-end-point` channel binding data for SCRAM-SHA-256-PLUS.
pub fn channel_binding_hash(der: &[u8]) -> Vec<u8> {
    Sha256::digest(der).to_vec()
}

/// Connector configured for `mode`.
///
/// The library never checks host names; `VerifyFull` does that through
/// [`verify_host_name`] once the handshake is done. `Prefer` and `Require`
/// accept any certificate.
#[cfg(any(feature = "sync-tls", feature = "tokio-tls"))]
pub fn connector(mode: crate::opts::SslMode) -> Result<native_tls::TlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();
    builder.danger_accept_invalid_hostnames(true);
    if !mode.verifies_certificate() {
        builder.danger_accept_invalid_certs(true);
    }
    Ok(builder.build()?)
}

/// DER bytes of the peer certificate, if the server sent one.
#[cfg(any(feature = "sync-tls", feature = "tokio-tls"))]
pub fn peer_certificate_der<S>(stream: &native_tls::TlsStream<S>) -> Result<Option<Vec<u8>>>
where
    S: std::io::Read + std::io::Write,
{
    match stream.peer_certificate()? {
        Some(cert) => Ok(Some(cert.to_der()?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

    use super::*;

    fn names(dns: &[&str], ips: &[&str], cns: &[&str]) -> CertificateNames {
        CertificateNames {
            dns: dns.iter().map(|s| s.to_string()).collect(),
            ips: ips.iter().map(|s| s.parse().unwrap()).collect(),
            common_names: cns.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_wildcard_matches_one_label() {
        assert!(match_host_name("db.example.com", "*.example.com"));
        assert!(match_host_name("DB.Example.COM", "*.example.com"));
        assert!(!match_host_name("a.b.example.com", "*.example.com"));
        assert!(!match_host_name("example.com", "*.example.com"));
        assert!(!match_host_name("db.example.com", "db*.example.com"));
        assert!(!match_host_name("db.com", "*.com"));
        assert!(!match_host_name("10.0.0.1", "*.0.0.1"));
    }

    #[test]
    fn test_dns_san_takes_precedence() {
        let certs = names(&["db.example.com"], &[], &["other.example.com"]);
        assert!(verify_names("db.example.com", &certs).is_ok());
        assert!(matches!(
            verify_names("other.example.com", &certs),
            Err(Error::HostNameMismatch(_))
        ));
    }

    #[test]
    fn test_common_name_fallback() {
        let certs = names(&[], &[], &["*.example.com", "db.eu.example.com"]);
        assert!(verify_names("db.eu.example.com", &certs).is_ok());
        assert!(verify_names("api.example.com", &certs).is_err());
    }

    #[test]
    fn test_ip_hosts() {
        let certs = names(&[], &["10.0.0.5", "::1"], &["10.0.0.9"]);
        assert!(verify_names("10.0.0.5", &certs).is_ok());
        assert!(verify_names("[::1]", &certs).is_ok());
        // no DNS SAN, so the CN is consulted
        assert!(verify_names("10.0.0.9", &certs).is_ok());
        assert!(verify_names("10.0.0.7", &certs).is_err());

        let with_dns = names(&["db.example.com"], &[], &["10.0.0.9"]);
        assert!(verify_names("10.0.0.9", &with_dns).is_err());
    }

    fn self_signed(sans: &[&str], common_name: Option<&str>) -> Vec<u8> {
        let mut params =
            CertificateParams::new(sans.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap();
        params.distinguished_name = DistinguishedName::new();
        if let Some(cn) = common_name {
            params.distinguished_name.push(DnType::CommonName, cn);
        }
        let key = KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().der().to_vec()
    }

    #[test]
    fn test_verify_from_der() {
        let der = self_signed(&["*.example.com", "192.168.1.10"], Some("ignored"));
        let names = CertificateNames::from_der(&der).unwrap();
        assert_eq!(names.dns, vec!["*.example.com".to_string()]);
        assert_eq!(names.ips, vec!["192.168.1.10".parse::<IpAddr>().unwrap()]);
        assert_eq!(names.common_names, vec!["ignored".to_string()]);

        assert!(verify_host_name("pg.example.com", &der).is_ok());
        assert!(verify_host_name("192.168.1.10", &der).is_ok());
        assert!(verify_host_name("ignored", &der).is_err());
    }

    #[test]
    fn test_common_name_from_der() {
        let der = self_signed(&[], Some("db.example.com"));
        assert!(verify_host_name("db.example.com", &der).is_ok());
        assert!(matches!(
            verify_host_name("other.example.com", &der),
            Err(Error::HostNameMismatch(_))
        ));

        let anonymous = self_signed(&[], None);
        assert!(matches!(
            verify_host_name("db.example.com", &anonymous),
            Err(Error::HostNameMismatch(_))
        ));
    }

    #[test]
    fn test_malformed_certificate() {
        assert!(matches!(
            CertificateNames::from_der(&[0x30, 0x03, 0x02, 0x01]),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn test_channel_binding_hash_is_sha256() {
        let hash = channel_binding_hash(b"cert");
        assert_eq!(hash.len(), 32);
        assert_eq!(hash, Sha256::digest(b"cert").to_vec());
    }
}
