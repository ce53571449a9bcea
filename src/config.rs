//! Runtime settings from the environment and the site selector map

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::models::Field;

pub const DEFAULT_SELLER_URL: &str = "https://www.ozon.ru/seller/1/products/";
pub const DEFAULT_DATABASE_URL: &str = "sqlite:database/products.db";
pub const DEFAULT_PRODUCTS_COUNT: usize = 10;
pub const MAX_PRODUCTS_COUNT: usize = 50;
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// What to do when one item fails validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and move on to the next item
    SkipInvalid,
    /// Discard everything collected so far and stop the batch
    AbortBatch,
}

impl FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" | "skip_invalid" => Ok(FailurePolicy::SkipInvalid),
            "abort" | "abort_batch" => Ok(FailurePolicy::AbortBatch),
            other => Err(anyhow!("unknown failure policy `{other}` (expected `skip` or `abort`)")),
        }
    }
}

/// Browser timing and identity
#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub navigation_timeout: Duration,
    pub marker_timeout: Duration,
    pub marker_settle: Duration,
    pub settle_delay: Duration,
    pub poll_interval: Duration,
    pub user_agent: String,
    pub chrome_executable: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(30),
            marker_timeout: Duration::from_secs(8),
            marker_settle: Duration::from_secs(2),
            settle_delay: Duration::from_secs(7),
            poll_interval: Duration::from_millis(200),
            user_agent: CHROME_USER_AGENT.to_string(),
            chrome_executable: None,
        }
    }
}

/// Everything the binary reads from the environment
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub seller_url: String,
    pub products_count: usize,
    pub failure_policy: FailurePolicy,
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub schedule: Option<String>,
    pub browser: BrowserSettings,
    pub site: SiteConfig,
}

impl Settings {
    /// Read settings from the process environment (after `dotenvy` has run)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let products_count = match var("PRODUCTS_COUNT") {
            Some(raw) => parse_products_count(&raw)?,
            None => DEFAULT_PRODUCTS_COUNT,
        };
        let failure_policy = match var("FAILURE_POLICY") {
            Some(raw) => raw.parse()?,
            None => FailurePolicy::SkipInvalid,
        };

        let defaults = BrowserSettings::default();
        let browser = BrowserSettings {
            navigation_timeout: secs(var("NAVIGATION_TIMEOUT_SECS"), "NAVIGATION_TIMEOUT_SECS")?
                .unwrap_or(defaults.navigation_timeout),
            marker_timeout: secs(var("MARKER_TIMEOUT_SECS"), "MARKER_TIMEOUT_SECS")?
                .unwrap_or(defaults.marker_timeout),
            marker_settle: secs(var("MARKER_SETTLE_SECS"), "MARKER_SETTLE_SECS")?
                .unwrap_or(defaults.marker_settle),
            settle_delay: secs(var("SETTLE_DELAY_SECS"), "SETTLE_DELAY_SECS")?
                .unwrap_or(defaults.settle_delay),
            poll_interval: defaults.poll_interval,
            user_agent: var("USER_AGENT").unwrap_or(defaults.user_agent),
            chrome_executable: var("CHROMIUM_PATH").map(PathBuf::from),
        };

        let site = match var("SELECTORS_PATH") {
            Some(path) => SiteConfig::from_file(Path::new(&path))?,
            None => SiteConfig::default(),
        };

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            seller_url: var("SELLER_URL").unwrap_or_else(|| DEFAULT_SELLER_URL.to_string()),
            products_count,
            failure_policy,
            telegram_token: var("TELEGRAM_TOKEN"),
            telegram_chat_id: var("TELEGRAM_CHAT_ID"),
            schedule: var("SCHEDULE"),
            browser,
            site,
        })
    }
}

/// Parse a requested product count, bounded to `0..=50`
pub fn parse_products_count(raw: &str) -> Result<usize> {
    let count: usize = raw
        .trim()
        .parse()
        .with_context(|| format!("PRODUCTS_COUNT must be a non-negative integer, got `{raw}`"))?;
    if count > MAX_PRODUCTS_COUNT {
        bail!("PRODUCTS_COUNT must be at most {MAX_PRODUCTS_COUNT}, got {count}");
    }
    Ok(count)
}

fn secs(raw: Option<String>, key: &str) -> Result<Option<Duration>> {
    raw.map(|v| {
        v.trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .with_context(|| format!("{key} must be a whole number of seconds, got `{v}`"))
    })
    .transpose()
}

/// Tag name plus class attribute, optionally narrowed to a nested tag or attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSelector {
    pub tag: String,
    pub class: String,
    /// Nested element to read instead of the container itself
    #[serde(default)]
    pub child: Option<String>,
    /// Attribute to read instead of the element text
    #[serde(default)]
    pub attr: Option<String>,
}

impl TagSelector {
    pub fn new(tag: &str, class: &str) -> Self {
        Self {
            tag: tag.to_string(),
            class: class.to_string(),
            child: None,
            attr: None,
        }
    }

    pub fn child(mut self, tag: &str) -> Self {
        self.child = Some(tag.to_string());
        self
    }

    pub fn attr(mut self, name: &str) -> Self {
        self.attr = Some(name.to_string());
        self
    }

    /// CSS for the container: `div` + `"u1i ui2"` becomes `div.u1i.ui2`
    pub fn css(&self) -> String {
        let mut css = self.tag.clone();
        for class in self.class.split_whitespace() {
            css.push('.');
            css.push_str(class);
        }
        css
    }
}

/// Per-field selectors for a detail page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSelectors {
    pub name: TagSelector,
    pub price: TagSelector,
    pub description: TagSelector,
    pub image_url: TagSelector,
    pub discount: TagSelector,
}

impl FieldSelectors {
    pub fn get(&self, field: Field) -> &TagSelector {
        match field {
            Field::Name => &self.name,
            Field::Price => &self.price,
            Field::Description => &self.description,
            Field::ImageUrl => &self.image_url,
            Field::Discount => &self.discount,
        }
    }
}

/// Markup knowledge about one seller site, kept out of the extraction logic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub product_url_prefix: String,
    /// Marker waited for on listing pages; `None` falls back to the settle delay
    #[serde(default)]
    pub listing_marker: Option<String>,
    pub detail_marker: Option<String>,
    /// Literal text that precedes the total page count in the listing document
    pub page_count_token: String,
    pub page_param: String,
    pub listing_container: TagSelector,
    pub listing_item: TagSelector,
    pub fields: FieldSelectors,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            product_url_prefix: "https://www.ozon.ru/product/".to_string(),
            listing_marker: Some("div.wi4".to_string()),
            detail_marker: Some("span.kz1".to_string()),
            page_count_token: "\"totalPages\":".to_string(),
            page_param: "page".to_string(),
            listing_container: TagSelector::new("div", "wi4"),
            listing_item: TagSelector::new("div", "u1i ui2"),
            fields: FieldSelectors {
                name: TagSelector::new("h1", "kz5"),
                price: TagSelector::new("span", "kz1"),
                description: TagSelector::new("div", "ra-a1"),
                image_url: TagSelector::new("div", "jm2").child("img").attr("src"),
                discount: TagSelector::new("div", "i2 j2 p9k").child("span"),
            },
        }
    }
}

impl SiteConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read selectors from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse selectors in {}", path.display()))
    }

    pub fn product_url(&self, id: crate::models::ItemId) -> String {
        format!("{}{}", self.product_url_prefix, id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::models::ItemId;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_environment() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings.products_count, DEFAULT_PRODUCTS_COUNT);
        assert_eq!(settings.failure_policy, FailurePolicy::SkipInvalid);
        assert_eq!(settings.seller_url, DEFAULT_SELLER_URL);
        assert_eq!(settings.browser.marker_timeout, Duration::from_secs(8));
        assert_eq!(settings.browser.navigation_timeout, Duration::from_secs(30));
        assert!(settings.telegram_token.is_none());
    }

    #[test]
    fn environment_overrides_defaults() {
        let settings = Settings::from_lookup(lookup(&[
            ("PRODUCTS_COUNT", "25"),
            ("FAILURE_POLICY", "abort"),
            ("MARKER_TIMEOUT_SECS", "20"),
            ("NAVIGATION_TIMEOUT_SECS", "45"),
            ("SCHEDULE", "0 0 * * * *"),
        ]))
        .unwrap();
        assert_eq!(settings.products_count, 25);
        assert_eq!(settings.failure_policy, FailurePolicy::AbortBatch);
        assert_eq!(settings.browser.marker_timeout, Duration::from_secs(20));
        assert_eq!(settings.browser.navigation_timeout, Duration::from_secs(45));
        assert_eq!(settings.schedule.as_deref(), Some("0 0 * * * *"));
    }

    #[test]
    fn products_count_is_bounded() {
        assert_eq!(parse_products_count("0").unwrap(), 0);
        assert_eq!(parse_products_count("50").unwrap(), 50);
        assert!(parse_products_count("51").is_err());
        assert!(parse_products_count("-1").is_err());
        assert!(parse_products_count("ten").is_err());
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(Settings::from_lookup(lookup(&[("FAILURE_POLICY", "maybe")])).is_err());
    }

    #[test]
    fn tag_selector_joins_classes() {
        assert_eq!(TagSelector::new("div", "u1i ui2").css(), "div.u1i.ui2");
        assert_eq!(TagSelector::new("h1", "kz5").css(), "h1.kz5");
    }

    #[test]
    fn site_config_round_trips_through_json() {
        let json = serde_json::to_string(&SiteConfig::default()).unwrap();
        let parsed: SiteConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, SiteConfig::default());
        assert_eq!(
            parsed.product_url(ItemId(15)),
            "https://www.ozon.ru/product/15"
        );
    }

    #[test]
    fn shipped_selectors_match_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("selectors.json");
        assert_eq!(SiteConfig::from_file(&path).unwrap(), SiteConfig::default());
    }
}
