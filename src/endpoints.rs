//! Known gateways and pinning services

use rand::seq::SliceRandom;
use serde::Serialize;
use url::Url;

/// A named HTTP endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub name: &'static str,
    pub location: &'static str,
    pub url: &'static str,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}) {}", self.name, self.location, self.url)
    }
}

/// Gateways that accept signature-authenticated uploads
pub const AUTH_GATEWAYS: &[Endpoint] = &[
    Endpoint {
        name: "DCF",
        location: "Singapore",
        url: "https://crustipfs.xyz",
    },
    Endpoint {
        name: "Crust Network",
        location: "Seattle",
        url: "https://gw.crustfiles.app",
    },
    Endpoint {
        name: "Thunder Gateway",
        location: "Berlin",
        url: "https://gw.crustfiles.net",
    },
    Endpoint {
        name: "Crust Network",
        location: "Cloud",
        url: "https://ipfs-gw.decloud.foundation",
    },
];

/// Pinning services
pub const PINNERS: &[Endpoint] = &[Endpoint {
    name: "Crust Pinner",
    location: "Global",
    url: "http://pinning-service.decoo-cloud.cn",
}];

/// Gateway and pinner one upload goes through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEndpoints {
    pub gateway: String,
    pub pinner: String,
}

impl UploadEndpoints {
    pub fn new(gateway: impl Into<String>, pinner: impl Into<String>) -> Self {
        Self {
            gateway: gateway.into().trim_end_matches('/').to_string(),
            pinner: pinner.into().trim_end_matches('/').to_string(),
        }
    }

    /// Use the given endpoints, filling gaps from the registry. A missing
    /// gateway is picked at random so load spreads across gateways.
    pub fn select(gateway: Option<&str>, pinner: Option<&str>) -> Self {
        let gateway = gateway
            .map(str::to_string)
            .unwrap_or_else(|| random_gateway().url.to_string());
        let pinner = pinner
            .map(str::to_string)
            .unwrap_or_else(|| default_pinner().url.to_string());
        Self::new(gateway, pinner)
    }
}

/// Parse an endpoint URL, accepting only `http`/`https` with a host
pub fn parse_http_url(value: &str) -> Result<Url, String> {
    let url = Url::parse(value).map_err(|e| format!("{value:?} is not a valid URL: {e}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("{value:?} must use http or https"));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(format!("{value:?} has no host")),
    }
}

/// `base` with `segments` appended to its path
pub fn service_url(base: &str, segments: &[&str]) -> Result<Url, String> {
    let mut url = parse_http_url(base)?;
    url.path_segments_mut()
        .map_err(|_| format!("{base:?} cannot carry a path"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

pub fn random_gateway() -> &'static Endpoint {
    AUTH_GATEWAYS
        .choose(&mut rand::thread_rng())
        .unwrap_or(&AUTH_GATEWAYS[0])
}

pub fn default_pinner() -> &'static Endpoint {
    &PINNERS[0]
}
