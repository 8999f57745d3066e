//! Catalog of probe targets, built once from configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;
use url::Url;

use crate::config::RegionConfig;
use crate::flags::Enablement;

const DEFAULT_PORT: u16 = 5432;

/// Transport security used when dialing an endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    Disable,
    #[default]
    Require,
}

impl TlsMode {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "disable" | "off" | "false" => Ok(TlsMode::Disable),
            "require" | "verify-ca" | "verify-full" | "on" | "true" => Ok(TlsMode::Require),
            other => bail!("unsupported tls mode '{other}'"),
        }
    }
}

/// Connection descriptor of one database endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    password: Option<String>,
    pub tls: TlsMode,
    pub ca_cert_path: Option<PathBuf>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, database: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            user: user.into(),
            password: None,
            tls: TlsMode::default(),
            ca_cert_path: None,
        }
    }

    pub fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .field("ca_cert_path", &self.ca_cert_path)
            .finish()
    }
}

/// A probe target
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: String,
    pub display_name: String,
    pub endpoint: Endpoint,
    /// Static default; enablement providers may still hide the region
    pub enabled: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Map marker for a region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionLocation {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RegionRegistry {
    regions: BTreeMap<String, Region>,
}

impl RegionRegistry {
    /// Build the registry, resolving `password_env` references through `lookup`
    pub fn from_config<F>(configs: &[RegionConfig], lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut regions = BTreeMap::new();
        for config in configs {
            let region = region_from_config(config, &lookup)
                .with_context(|| format!("invalid region '{}'", config.id))?;
            if regions.insert(region.id.clone(), region).is_some() {
                bail!("duplicate region id: {}", config.id);
            }
        }
        Ok(Self { regions })
    }

    pub fn from_regions(regions: impl IntoIterator<Item = Region>) -> Self {
        Self { regions: regions.into_iter().map(|r| (r.id.clone(), r)).collect() }
    }

    pub fn get(&self, id: &str) -> Option<&Region> {
        self.regions.get(id)
    }

    /// Regions ordered by id
    pub fn all(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    pub fn ids(&self) -> Vec<String> {
        self.regions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Enabled regions with coordinates, for map display
    pub fn locations(&self, enablement: &dyn Enablement, actor_key: Option<&str>) -> Vec<RegionLocation> {
        self.all()
            .filter(|region| enablement.region_enabled(region, actor_key))
            .filter_map(|region| {
                Some(RegionLocation {
                    id: region.id.clone(),
                    name: region.display_name.clone(),
                    latitude: region.latitude?,
                    longitude: region.longitude?,
                })
            })
            .collect()
    }
}

fn region_from_config<F>(config: &RegionConfig, lookup: &F) -> Result<Region>
where
    F: Fn(&str) -> Option<String>,
{
    if config.id.trim().is_empty() {
        bail!("region id cannot be empty");
    }

    let mut endpoint = match (&config.url, &config.host) {
        (Some(url), _) => parse_endpoint_url(url)?,
        (None, Some(host)) => {
            let database = config.database.clone().unwrap_or_else(|| "postgres".to_string());
            let user = config.user.clone().ok_or_else(|| anyhow!("user is required with host"))?;
            Endpoint::new(host.clone(), config.port.unwrap_or(DEFAULT_PORT), database, user)
        }
        (None, None) => bail!("either url or host must be set"),
    };

    if endpoint.host.trim().is_empty() {
        bail!("endpoint host cannot be empty");
    }
    if endpoint.port == 0 {
        bail!("endpoint port cannot be 0");
    }

    // An explicit sslmode in the url takes precedence over the tls key
    let url_sets_tls = config.url.as_deref().is_some_and(|u| u.contains("sslmode="));
    if let (Some(tls), false) = (&config.tls, url_sets_tls) {
        endpoint.tls = TlsMode::parse(tls)?;
    }
    endpoint.ca_cert_path = config.ca_cert_path.clone();

    if let Some(var) = &config.password_env {
        let password = lookup(var).ok_or_else(|| anyhow!("environment variable {var} is not set"))?;
        endpoint.password = Some(password);
    }

    Ok(Region {
        id: config.id.clone(),
        display_name: config.display_name.clone(),
        endpoint,
        enabled: config.enabled,
        latitude: config.latitude,
        longitude: config.longitude,
    })
}

fn parse_endpoint_url(raw: &str) -> Result<Endpoint> {
    let url = Url::parse(raw).map_err(|e| anyhow!("invalid endpoint url: {e}"))?;
    match url.scheme() {
        "postgres" | "postgresql" => {}
        other => bail!("unsupported endpoint scheme '{other}'"),
    }

    let host = url.host_str().ok_or_else(|| anyhow!("endpoint url must have a host"))?;
    let database = url.path().trim_start_matches('/');
    let database = if database.is_empty() { "postgres" } else { database };
    if url.username().is_empty() {
        bail!("endpoint url must include a user");
    }

    let mut endpoint = Endpoint::new(host, url.port().unwrap_or(DEFAULT_PORT), database, url.username());
    endpoint.password = url.password().map(str::to_string);
    for (key, value) in url.query_pairs() {
        if key == "sslmode" {
            endpoint.tls = TlsMode::parse(&value)?;
        }
    }
    Ok(endpoint)
}
