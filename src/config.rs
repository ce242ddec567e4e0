//! Configuration for the dashboard engine
//!
//! Configuration is a JSON document describing pages of widgets, loaded
//! from disk with a couple of environment overrides on top. Validation
//! happens up front so a bad config fails the process at startup instead
//! of surfacing as a half-broken dashboard later.

use crate::errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between background refresh passes
    pub refresh_interval_seconds: u64,

    /// Seconds to wait after startup before the first refresh pass
    pub warmup_seconds: u64,

    /// Dashboard pages
    pub pages: Vec<PageConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: 300,
            warmup_seconds: 2,
            pages: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Apply environment variable overrides on top of a loaded configuration.
    pub fn apply_env(&mut self) {
        if let Ok(interval) = env::var("DASHGRID_REFRESH_INTERVAL_SECONDS") {
            if let Ok(seconds) = interval.parse() {
                self.refresh_interval_seconds = seconds;
            }
        }

        if let Ok(warmup) = env::var("DASHGRID_WARMUP_SECONDS") {
            if let Ok(seconds) = warmup.parse() {
                self.warmup_seconds = seconds;
            }
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_seconds)
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.refresh_interval_seconds == 0 {
            return Err("refresh_interval_seconds must be greater than 0".to_string());
        }

        if self.pages.is_empty() {
            return Err("at least one page must be configured".to_string());
        }

        let mut slugs = HashSet::new();
        for page in &self.pages {
            if page.title.is_empty() {
                return Err("page title cannot be empty".to_string());
            }

            let slug = page.effective_slug();
            if slug.is_empty() {
                return Err(format!("page \"{}\" produces an empty slug", page.title));
            }
            if !slugs.insert(slug.clone()) {
                return Err(format!("duplicate page slug: {}", slug));
            }

            if page.head_widgets.is_empty() && page.columns.iter().all(|c| c.widgets.is_empty()) {
                return Err(format!("page \"{}\" has no widgets", page.title));
            }

            for widget in page.widgets() {
                widget.validate()?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageConfig {
    pub title: String,

    /// URL-safe page identifier, derived from the title when omitted
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub slug: String,

    /// Widgets shown above the columns, rendered without headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub head_widgets: Vec<WidgetConfig>,

    #[serde(default)]
    pub columns: Vec<ColumnConfig>,
}

impl PageConfig {
    pub fn effective_slug(&self) -> String {
        if self.slug.is_empty() {
            title_to_slug(&self.title)
        } else {
            self.slug.clone()
        }
    }

    /// All widget configs on the page, head widgets first.
    pub fn widgets(&self) -> impl Iterator<Item = &WidgetConfig> {
        self.head_widgets
            .iter()
            .chain(self.columns.iter().flat_map(|c| c.widgets.iter()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    #[serde(default)]
    pub size: ColumnSize,

    #[serde(default)]
    pub widgets: Vec<WidgetConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnSize {
    Small,
    #[default]
    Full,
}

/// Per-widget configuration, selected by the `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WidgetConfig {
    Clock(ClockConfig),
    Monitor(MonitorConfig),
    Feeds(FeedsConfig),
    PublicIp(PublicIpConfig),
}

impl WidgetConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            WidgetConfig::Clock(_) => Ok(()),
            WidgetConfig::Monitor(cfg) => {
                if cfg.sites.is_empty() {
                    return Err("monitor widget requires at least one site".to_string());
                }

                for site in &cfg.sites {
                    if site.title.is_empty() {
                        return Err("monitored site title cannot be empty".to_string());
                    }
                    validate_http_url(&site.url)?;
                    if let Some(check_url) = &site.check_url {
                        validate_http_url(check_url)?;
                    }
                }

                Ok(())
            }
            WidgetConfig::Feeds(cfg) => {
                if cfg.feeds.is_empty() {
                    return Err("feeds widget requires at least one feed".to_string());
                }

                for feed in &cfg.feeds {
                    validate_http_url(&feed.url)?;
                }

                Ok(())
            }
            WidgetConfig::PublicIp(cfg) => {
                if let Some(url) = &cfg.lookup_url {
                    if !url.is_empty() {
                        validate_http_url(url)?;
                    }
                }

                Ok(())
            }
        }
    }
}

/// Settings shared by every widget kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonWidgetConfig {
    /// Title shown in the widget header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Override of the widget's built-in cache duration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_seconds: Option<u64>,

    /// Render the widget without its header
    pub hide_header: bool,
}

impl CommonWidgetConfig {
    pub fn custom_cache(&self) -> Option<Duration> {
        self.cache_seconds.map(Duration::from_secs)
    }

    pub fn title_or(&self, default: &str) -> String {
        match &self.title {
            Some(title) if !title.is_empty() => title.clone(),
            _ => default.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    #[serde(flatten)]
    pub common: CommonWidgetConfig,

    pub hour_format: HourFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HourFormat {
    #[default]
    #[serde(rename = "24h")]
    TwentyFourHour,
    #[serde(rename = "12h")]
    TwelveHour,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    #[serde(flatten)]
    pub common: CommonWidgetConfig,

    pub sites: Vec<SiteConfig>,

    /// Hide sites that are up unless something is failing
    pub show_failing_only: bool,

    /// Show the shared internet reachability check as an extra row
    pub show_internet_status: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub title: String,

    /// URL shown to the user and probed unless `check_url` is set
    pub url: String,

    /// Probe this URL instead of `url`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_url: Option<String>,

    /// Link target to fall back to while the site is failing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_url: Option<String>,

    /// Skip TLS certificate verification for this site
    #[serde(default)]
    pub allow_insecure: bool,

    /// Per-site probe timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    /// Status codes other than 200 that still count as up
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alt_status_codes: Vec<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuthConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedsConfig {
    #[serde(flatten)]
    pub common: CommonWidgetConfig,

    pub feeds: Vec<FeedConfig>,

    /// Maximum number of items shown across all feeds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Keep feed order instead of sorting by publish date
    pub preserve_order: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub url: String,

    /// Display name overriding the feed's own title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Extra request headers, e.g. for authenticated feeds
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Per-feed cap on items taken from this feed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Prefix applied to relative item links
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_link_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PublicIpConfig {
    #[serde(flatten)]
    pub common: CommonWidgetConfig,

    /// Endpoint returning the caller's public address as JSON. An empty
    /// string disables the lookup entirely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup_url: Option<String>,
}

fn validate_http_url(url: &str) -> std::result::Result<(), String> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(format!(
            "invalid URL \"{}\": must start with http:// or https://",
            url
        ))
    }
}

/// Derive a URL-safe slug from a page title.
pub fn title_to_slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(c.to_ascii_lowercase());
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }

    slug
}
