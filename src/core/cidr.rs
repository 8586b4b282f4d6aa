//! CIDR expansion for the scanner job (§4.6, §8 scenario 6). IPv4 and IPv6
//! are both supported; addresses are produced lazily in network order so a
//! large IPv6 block never has to be materialized in memory up front.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid CIDR {cidr}: {source}")]
pub struct CidrError {
    cidr: String,
    #[source]
    source: ipnet::AddrParseError,
}

/// Lazily walks every address in a CIDR block, network address through
/// broadcast address inclusive, incrementing the address as a byte-wise
/// counter (wrapping at 256 per octet, i.e. ordinary big-endian addition).
pub enum CidrIter {
    V4 { next: u32, end: u32, done: bool },
    V6 { next: u128, end: u128, done: bool },
}

impl CidrIter {
    /// Total number of addresses this iterator will yield, without
    /// consuming it.
    pub fn len(&self) -> u64 {
        match self {
            CidrIter::V4 { next, end, done } => {
                if *done {
                    0
                } else {
                    (*end as u64) - (*next as u64) + 1
                }
            }
            CidrIter::V6 { next, end, done } => {
                if *done {
                    0
                } else {
                    ((*end - *next) as u64).saturating_add(1)
                }
            }
        }
    }
}

impl Iterator for CidrIter {
    type Item = IpAddr;

    fn next(&mut self) -> Option<IpAddr> {
        match self {
            CidrIter::V4 { next, end, done } => {
                if *done {
                    return None;
                }
                let addr = Ipv4Addr::from(*next);
                if *next == *end {
                    *done = true;
                } else {
                    *next += 1;
                }
                Some(IpAddr::V4(addr))
            }
            CidrIter::V6 { next, end, done } => {
                if *done {
                    return None;
                }
                let addr = Ipv6Addr::from(*next);
                if *next == *end {
                    *done = true;
                } else {
                    *next += 1;
                }
                Some(IpAddr::V6(addr))
            }
        }
    }
}

pub fn expand_cidr(cidr: &str) -> Result<CidrIter, CidrError> {
    let net: IpNet = cidr
        .parse()
        .map_err(|source| CidrError {
            cidr: cidr.to_string(),
            source,
        })?;

    Ok(match net {
        IpNet::V4(v4) => CidrIter::V4 {
            next: u32::from(v4.network()),
            end: u32::from(v4.broadcast()),
            done: false,
        },
        IpNet::V6(v6) => CidrIter::V6 {
            next: u128::from(v6.network()),
            end: u128::from(v6.broadcast()),
            done: false,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_ipv4_30_in_network_order() {
        let addrs: Vec<IpAddr> = expand_cidr("104.16.0.0/30").unwrap().collect();
        assert_eq!(
            addrs,
            vec![
                "104.16.0.0".parse::<IpAddr>().unwrap(),
                "104.16.0.1".parse::<IpAddr>().unwrap(),
                "104.16.0.2".parse::<IpAddr>().unwrap(),
                "104.16.0.3".parse::<IpAddr>().unwrap(),
            ]
        );
    }

    #[test]
    fn expands_ipv6_126_in_network_order() {
        let addrs: Vec<IpAddr> = expand_cidr("2606:4700::/126").unwrap().collect();
        assert_eq!(addrs.len(), 4);
        assert_eq!(addrs[0], "2606:4700::".parse::<IpAddr>().unwrap());
        assert_eq!(addrs[3], "2606:4700::3".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn len_matches_iterator_count() {
        let iter = expand_cidr("104.16.0.0/28").unwrap();
        assert_eq!(iter.len(), 16);
        assert_eq!(iter.count(), 16);
    }
}
