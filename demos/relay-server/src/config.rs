//! Server configuration from `relay.toml` or the environment.

use std::{env, fs, path::Path, time::Duration};

use serde::Deserialize;
use session_relay_resolver::{CacheConfig, ResolverConfig};
use session_relay_session::{AssemblerConfig, MergeConfig};
use url::Url;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// URL peers use to reach this server; resource URLs are built on it.
    pub public_url: Url,
    /// Shared bearer token. `None` disables authorization.
    pub token: Option<String>,
    /// Hosts the token is sent to on outbound fetches.
    pub trusted_hosts: Vec<String>,
    pub resolver: ResolverConfig,
    pub assembler: AssemblerConfig,
    pub merge: MergeConfig,
    pub forwards: Vec<ForwardConfig>,
}

/// An upstream to expose through the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct ForwardConfig {
    pub id: String,
    pub upstream: Url,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    auth: AuthSection,
    #[serde(default)]
    resolver: ResolverSection,
    #[serde(default)]
    session: SessionSection,
    #[serde(default, rename = "forward")]
    forwards: Vec<ForwardConfig>,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    public_url: Option<Url>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct AuthSection {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    trusted_hosts: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ResolverSection {
    #[serde(default = "default_fetch_timeout_ms")]
    fetch_timeout_ms: u64,
    #[serde(default = "default_negative_ttl_ms")]
    negative_ttl_ms: u64,
    #[serde(default = "default_cache_entries")]
    cache_max_entries: usize,
    #[serde(default = "default_cache_bytes")]
    cache_max_bytes: usize,
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: default_fetch_timeout_ms(),
            negative_ttl_ms: default_negative_ttl_ms(),
            cache_max_entries: default_cache_entries(),
            cache_max_bytes: default_cache_bytes(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionSection {
    #[serde(default = "default_fan_out")]
    fan_out: usize,
    #[serde(default = "default_inline_threshold")]
    inline_threshold: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            fan_out: default_fan_out(),
            inline_threshold: default_inline_threshold(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    7400
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_fetch_timeout_ms() -> u64 {
    u64::try_from(ResolverConfig::default().fetch_timeout.as_millis()).unwrap_or(10_000)
}

fn default_negative_ttl_ms() -> u64 {
    u64::try_from(ResolverConfig::default().negative_ttl.as_millis()).unwrap_or(2_000)
}

fn default_cache_entries() -> usize {
    CacheConfig::default().max_entries
}

fn default_cache_bytes() -> usize {
    CacheConfig::default().max_bytes
}

fn default_fan_out() -> usize {
    AssemblerConfig::default().fan_out
}

fn default_inline_threshold() -> usize {
    MergeConfig::default().inline_threshold
}

impl RelayConfig {
    /// Load from the config file if one exists, otherwise the environment.
    pub fn load() -> anyhow::Result<Self> {
        if let Some(file_config) = load_from_file()? {
            return Self::from_file_config(file_config);
        }
        Self::from_env()
    }

    fn from_file_config(file: FileConfig) -> anyhow::Result<Self> {
        let public_url = match file.server.public_url {
            Some(url) => url,
            None => default_public_url(&file.server.host, file.server.port)?,
        };

        Ok(Self {
            host: file.server.host,
            port: file.server.port,
            public_url,
            token: file.auth.token,
            trusted_hosts: file.auth.trusted_hosts,
            resolver: ResolverConfig {
                fetch_timeout: Duration::from_millis(file.resolver.fetch_timeout_ms),
                negative_ttl: Duration::from_millis(file.resolver.negative_ttl_ms),
                cache: CacheConfig {
                    max_entries: file.resolver.cache_max_entries,
                    max_bytes: file.resolver.cache_max_bytes,
                },
            },
            assembler: AssemblerConfig {
                fan_out: file.session.fan_out,
            },
            merge: MergeConfig {
                inline_threshold: file.session.inline_threshold,
            },
            forwards: file.forwards,
        })
    }

    fn from_env() -> anyhow::Result<Self> {
        let host = env::var("SESSION_RELAY_HOST").unwrap_or_else(|_| default_host());
        let port = env::var("SESSION_RELAY_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or_else(default_port);
        let public_url = match env::var("SESSION_RELAY_PUBLIC_URL") {
            Ok(raw) => Url::parse(&raw)
                .map_err(|err| anyhow::anyhow!("Invalid SESSION_RELAY_PUBLIC_URL {raw}: {err}"))?,
            Err(_) => default_public_url(&host, port)?,
        };
        let token = env::var("SESSION_RELAY_TOKEN").ok();
        let trusted_hosts = env::var("SESSION_RELAY_TRUSTED_HOSTS")
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host,
            port,
            public_url,
            token,
            trusted_hosts,
            resolver: ResolverConfig::default(),
            assembler: AssemblerConfig::default(),
            merge: MergeConfig::default(),
            forwards: Vec::new(),
        })
    }
}

fn default_public_url(host: &str, port: u16) -> anyhow::Result<Url> {
    Url::parse(&format!("http://{host}:{port}/"))
        .map_err(|err| anyhow::anyhow!("Cannot derive public URL from {host}:{port}: {err}"))
}

fn load_from_file() -> anyhow::Result<Option<FileConfig>> {
    let config_path = env::var("SESSION_RELAY_CONFIG").ok();
    let path = if let Some(path) = config_path {
        Some(path)
    } else if Path::new("relay.toml").exists() {
        Some("relay.toml".to_string())
    } else {
        None
    };

    let Some(path) = path else {
        return Ok(None);
    };

    let contents = fs::read_to_string(&path)
        .map_err(|err| anyhow::anyhow!("Failed to read config {path}: {err}"))?;
    let parsed: FileConfig = toml::from_str(&contents)
        .map_err(|err| anyhow::anyhow!("Failed to parse config {path}: {err}"))?;
    Ok(Some(parsed))
}
