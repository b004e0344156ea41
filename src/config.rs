use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use url::Url;

use crate::fetch::DEFAULT_TIMEOUT;
use crate::manifest::DEFAULT_MANIFEST_PATH;

pub const ENV_BASE_URL: &str = "COURSEPRESS_BASE_URL";
pub const ENV_MANIFEST_PATH: &str = "COURSEPRESS_MANIFEST_PATH";
pub const ENV_CACHE_DIR: &str = "COURSEPRESS_CACHE_DIR";
pub const ENV_FETCH_TIMEOUT_SECS: &str = "COURSEPRESS_FETCH_TIMEOUT_SECS";

#[derive(Debug, Clone)]
pub struct Config {
    /// Site the manifest and lesson sources are served from.
    pub base_url: Url,
    pub manifest_path: String,
    /// Session cache directory. `None` keeps the cache in memory.
    pub cache_dir: Option<PathBuf>,
    pub fetch_timeout: Duration,
}

impl Config {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            manifest_path: DEFAULT_MANIFEST_PATH.to_owned(),
            cache_dir: None,
            fetch_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Read configuration from `COURSEPRESS_*` environment variables.
    ///
    /// An explicit `base_url` (e.g. from a CLI flag) wins over the variable.
    pub fn from_env(base_url: Option<&str>) -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok(), base_url)
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        base_url: Option<&str>,
    ) -> anyhow::Result<Self> {
        let base_url = base_url
            .map(str::to_owned)
            .or_else(|| lookup(ENV_BASE_URL))
            .ok_or_else(|| anyhow::anyhow!("{ENV_BASE_URL} is not set"))?;
        let base_url = parse_base_url(&base_url)?;

        let mut config = Self::new(base_url);
        if let Some(path) = lookup(ENV_MANIFEST_PATH) {
            config.manifest_path = path;
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|dir| !dir.trim().is_empty()) {
            config.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(secs) = lookup(ENV_FETCH_TIMEOUT_SECS) {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("parse {ENV_FETCH_TIMEOUT_SECS}: {secs:?}"))?;
            config.fetch_timeout = Duration::from_secs(secs.max(1));
        }

        Ok(config)
    }
}

pub fn parse_base_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("parse base url: {raw}"))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("base url must be http/https: {url}");
    }
    Ok(url)
}
