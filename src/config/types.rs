use crate::extract::StageSchema;
use crate::task::{CrawlPass, Stage};
use crate::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Main configuration structure for Delta-Crawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(default)]
    pub session: SessionConfig,

    pub storage: StorageConfig,

    #[serde(default)]
    pub accumulator: AccumulatorConfig,

    /// Seed cities for entity discovery
    #[serde(default, rename = "city")]
    pub cities: Vec<CityEntry>,

    #[serde(default)]
    pub templates: TemplateConfig,

    /// Per-stage extraction overrides, keyed by stage name
    #[serde(default)]
    pub extract: BTreeMap<String, StageSchema>,
}

impl Config {
    /// Resolves the `[extract.<stage>]` tables to stages
    pub fn extract_overrides(&self) -> Result<BTreeMap<Stage, StageSchema>, ConfigError> {
        self.extract
            .iter()
            .map(|(name, schema)| {
                let stage = Stage::from_db_string(name).ok_or_else(|| {
                    ConfigError::Validation(format!("Unknown stage '{}' in [extract]", name))
                })?;
                Ok((stage, schema.clone()))
            })
            .collect()
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Minimum time between requests to the same host (milliseconds)
    #[serde(rename = "request-delay-ms", default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    /// Failed attempts after which a task is dead-lettered; 0 retries forever
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base address of the source site
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(rename = "category-id", default = "default_category_id")]
    pub category_id: u32,

    #[serde(rename = "category-url-name", default = "default_category_url_name")]
    pub category_url_name: String,
}

impl CrawlerConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    /// The host without a trailing slash, as substituted for `{host}`
    pub fn host_base(&self) -> &str {
        self.host.trim_end_matches('/')
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            request_delay_ms: default_request_delay_ms(),
            max_attempts: default_max_attempts(),
            host: default_host(),
            category_id: default_category_id(),
            category_url_name: default_category_url_name(),
        }
    }
}

fn default_workers() -> u32 {
    2
}

fn default_request_delay_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_host() -> String {
    "http://www.dianping.com".to_string()
}

fn default_category_id() -> u32 {
    10
}

fn default_category_url_name() -> String {
    "food".to_string()
}

/// HTTP session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Cookie header string, `name=value` pairs separated by `;`
    #[serde(default)]
    pub cookies: String,

    /// Proxy addresses, rotated round-robin
    #[serde(default)]
    pub proxies: Vec<String>,

    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra default request headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl SessionConfig {
    /// Splits the cookie string into `(name, value)` pairs
    pub fn cookie_pairs(&self) -> Result<Vec<(String, String)>, ConfigError> {
        self.cookies
            .split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (name, value) = part.split_once('=').ok_or_else(|| {
                    ConfigError::Validation(format!("Cookie '{}' is not a name=value pair", part))
                })?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "Cookie '{}' has an empty name",
                        part
                    )));
                }
                Ok((name.to_string(), value.trim().to_string()))
            })
            .collect()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            cookies: String::new(),
            proxies: Vec::new(),
            timeout_secs: default_timeout_secs(),
            headers: BTreeMap::new(),
        }
    }
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_10_5) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/55.0.2883.95 Safari/537.36"
        .to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Collection holding discovered shops
    #[serde(default = "default_shops")]
    pub shops: String,

    /// Collection holding feedback groups
    #[serde(default = "default_feedback")]
    pub feedback: String,

    /// Collection holding actor profiles
    #[serde(default = "default_actors")]
    pub actors: String,
}

impl StorageConfig {
    /// The collection a crawl pass creates records in
    pub fn collection_for(&self, pass: CrawlPass) -> &str {
        match pass {
            CrawlPass::Discovery => &self.shops,
            CrawlPass::Feedback => &self.feedback,
            CrawlPass::Actor => &self.actors,
        }
    }
}

fn default_shops() -> String {
    "shops".to_string()
}

fn default_feedback() -> String {
    "feedback".to_string()
}

fn default_actors() -> String {
    "actors".to_string()
}

/// Accumulator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AccumulatorConfig {
    /// Key each append by the contributing task so redelivery is a no-op
    #[serde(rename = "fragment-dedup", default = "default_fragment_dedup")]
    pub fragment_dedup: bool,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            fragment_dedup: default_fragment_dedup(),
        }
    }
}

fn default_fragment_dedup() -> bool {
    true
}

/// A seed city
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CityEntry {
    pub id: u32,
    pub name: String,
}

/// Address templates
///
/// Placeholders are written `{name}` and filled from the task context plus
/// `host`, `category_id` and `category_url_name`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TemplateConfig {
    #[serde(rename = "city-index", default = "default_city_index")]
    pub city_index: String,

    #[serde(rename = "summary-api", default = "default_summary_api")]
    pub summary_api: String,

    #[serde(default = "default_feedback_page")]
    pub feedback: String,

    #[serde(rename = "tagged-feedback", default = "default_tagged_feedback")]
    pub tagged_feedback: String,

    #[serde(default = "default_profile")]
    pub profile: String,

    #[serde(default = "default_followees")]
    pub followees: String,

    #[serde(default = "default_followers")]
    pub followers: String,

    #[serde(default = "default_collections")]
    pub collections: String,
}

impl TemplateConfig {
    /// Every template with its name and the placeholders it may use
    pub fn entries(&self) -> Vec<(&'static str, &str, &'static [&'static str])> {
        const CITY: &[&str] = &[
            "host",
            "city_id",
            "city_name",
            "category_id",
            "category_url_name",
        ];
        const SUMMARY: &[&str] = &[
            "host",
            "shop_id",
            "city_id",
            "city_name",
            "category_id",
            "category_url_name",
        ];
        const FEEDBACK: &[&str] = &["host", "shop_id", "shop_url"];
        const TAGGED: &[&str] = &["host", "shop_id", "tag"];
        const ACTOR: &[&str] = &["host", "user_id"];

        vec![
            ("city-index", self.city_index.as_str(), CITY),
            ("summary-api", self.summary_api.as_str(), SUMMARY),
            ("feedback", self.feedback.as_str(), FEEDBACK),
            ("tagged-feedback", self.tagged_feedback.as_str(), TAGGED),
            ("profile", self.profile.as_str(), ACTOR),
            ("followees", self.followees.as_str(), ACTOR),
            ("followers", self.followers.as_str(), ACTOR),
            ("collections", self.collections.as_str(), ACTOR),
        ]
    }

    /// Template of a relation stage
    pub fn relation(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Followees => Some(&self.followees),
            Stage::Followers => Some(&self.followers),
            Stage::Collections => Some(&self.collections),
            _ => None,
        }
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            city_index: default_city_index(),
            summary_api: default_summary_api(),
            feedback: default_feedback_page(),
            tagged_feedback: default_tagged_feedback(),
            profile: default_profile(),
            followees: default_followees(),
            followers: default_followers(),
            collections: default_collections(),
        }
    }
}

fn default_city_index() -> String {
    "{host}/search/category/{city_id}/{category_id}".to_string()
}

fn default_summary_api() -> String {
    "{host}/ajax/json/shopDynamic/allReview?shopId={shop_id}&cityId={city_id}\
     &categoryURLName={category_url_name}&power=5&cityEnName={city_name}&shopType={category_id}"
        .to_string()
}

fn default_feedback_page() -> String {
    "{shop_url}/review_all".to_string()
}

fn default_tagged_feedback() -> String {
    "{host}/ajax/json/shopfood/wizard/getReviewListFPAjax?act=getreviewlist&tab=default\
     &order=summary&summaryName={tag}&shopId={shop_id}"
        .to_string()
}

fn default_profile() -> String {
    "{host}/member/{user_id}".to_string()
}

fn default_followees() -> String {
    "{host}/member/{user_id}/follows".to_string()
}

fn default_followers() -> String {
    "{host}/member/{user_id}/fans".to_string()
}

fn default_collections() -> String {
    "{host}/member/{user_id}/wishlists".to_string()
}
