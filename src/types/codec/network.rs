//! INET, CIDR and MACADDR.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{Error, Result};

use super::Reader;

const PGSQL_AF_INET: u8 = 2;
const PGSQL_AF_INET6: u8 = 3;

/// A host or network address with its prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Inet {
    pub addr: IpAddr,
    pub netmask: u8,
}

impl Inet {
    /// A single host (full-length prefix).
    pub fn host(addr: IpAddr) -> Self {
        Self {
            addr,
            netmask: max_prefix(&addr),
        }
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "INET");
        let family = r.u8()?;
        let netmask = r.u8()?;
        let _is_cidr = r.u8()?;
        let len = r.u8()? as usize;
        let raw = r.bytes(len)?;
        r.finish()?;
        let addr = match (family, raw.len()) {
            (PGSQL_AF_INET, 4) => IpAddr::V4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])),
            (PGSQL_AF_INET6, 16) => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(raw);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            _ => {
                return Err(Error::Decode(format!(
                    "invalid INET family {} with {} address bytes",
                    family, len
                )));
            }
        };
        if netmask > max_prefix(&addr) {
            return Err(Error::Decode(format!("invalid INET prefix length {}", netmask)));
        }
        Ok(Self { addr, netmask })
    }

    pub fn write_binary(&self, buf: &mut Vec<u8>, is_cidr: bool) {
        match self.addr {
            IpAddr::V4(v4) => {
                buf.extend_from_slice(&[PGSQL_AF_INET, self.netmask, is_cidr as u8, 4]);
                buf.extend_from_slice(&v4.octets());
            }
            IpAddr::V6(v6) => {
                buf.extend_from_slice(&[PGSQL_AF_INET6, self.netmask, is_cidr as u8, 16]);
                buf.extend_from_slice(&v6.octets());
            }
        }
    }

    /// Parse `addr` or `addr/prefix`.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || Error::Decode(format!("invalid INET: {:?}", s));
        let (addr, netmask) = match s.split_once('/') {
            Some((addr, bits)) => (addr, Some(bits.parse::<u8>().map_err(|_| invalid())?)),
            None => (s, None),
        };
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let max = max_prefix(&addr);
        let netmask = netmask.unwrap_or(max);
        if netmask > max {
            return Err(invalid());
        }
        Ok(Self { addr, netmask })
    }

    /// Text form for CIDR, which always shows the prefix.
    pub fn display_cidr(&self) -> impl fmt::Display + '_ {
        CidrDisplay(self)
    }
}

fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

impl fmt::Display for Inet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.netmask == max_prefix(&self.addr) {
            write!(f, "{}", self.addr)
        } else {
            write!(f, "{}/{}", self.addr, self.netmask)
        }
    }
}

struct CidrDisplay<'a>(&'a Inet);

impl fmt::Display for CidrDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0.addr, self.0.netmask)
    }
}

/// A 6-byte MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let octets: [u8; 6] = bytes
            .try_into()
            .map_err(|_| Error::Decode(format!("invalid MACADDR length: {}", bytes.len())))?;
        Ok(MacAddr(octets))
    }

    /// Accepts `:` or `-` separated hex pairs.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || Error::Decode(format!("invalid MACADDR: {:?}", s));
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in &mut octets {
            let part = parts.next().ok_or_else(invalid)?;
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(MacAddr(octets))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}", a, b, c, d, e, g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inet_text() {
        let host = Inet::parse("192.168.0.1").unwrap();
        assert_eq!(host.netmask, 32);
        assert_eq!(host.to_string(), "192.168.0.1");
        let net = Inet::parse("10.0.0.0/8").unwrap();
        assert_eq!(net.to_string(), "10.0.0.0/8");
        assert_eq!(host.display_cidr().to_string(), "192.168.0.1/32");
        assert!(Inet::parse("10.0.0.0/33").is_err());
        assert_eq!(Inet::parse("::1/128").unwrap().to_string(), "::1");
    }

    #[test]
    fn test_inet_binary() {
        let net = Inet::parse("2001:db8::/32").unwrap();
        let mut buf = Vec::new();
        net.write_binary(&mut buf, true);
        assert_eq!(&buf[..4], &[PGSQL_AF_INET6, 32, 1, 16]);
        assert_eq!(Inet::from_binary(&buf).unwrap(), net);
        assert!(Inet::from_binary(&[PGSQL_AF_INET, 32, 0, 16, 1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_macaddr() {
        let mac = MacAddr::parse("08-00-2B-01-02-03").unwrap();
        assert_eq!(mac.to_string(), "08:00:2b:01:02:03");
        assert_eq!(MacAddr::from_binary(&mac.0).unwrap(), mac);
        assert!(MacAddr::parse("08:00:2b:01:02").is_err());
    }
}
