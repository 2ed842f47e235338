use crate::config::types::{
    CityEntry, Config, CrawlerConfig, SessionConfig, StorageConfig, TemplateConfig,
};
use crate::extract::SelectorExtractor;
use crate::task::CrawlPass;
use crate::url::{parse_address, placeholders};
use crate::ConfigError;
use std::collections::HashSet;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_session_config(&config.session)?;
    validate_storage_config(&config.storage)?;
    validate_cities(&config.cities)?;
    validate_templates(&config.templates)?;
    validate_extract_overrides(config)?;
    Ok(())
}

/// Validates what a specific crawl pass needs beyond the base checks
pub fn validate_for_pass(config: &Config, pass: CrawlPass) -> Result<(), ConfigError> {
    if pass == CrawlPass::Discovery && config.cities.is_empty() {
        return Err(ConfigError::Validation(
            "The discovery pass needs at least one [[city]] entry".to_string(),
        ));
    }
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > 64 {
        return Err(ConfigError::Validation(format!(
            "workers must be between 1 and 64, got {}",
            config.workers
        )));
    }

    if config.request_delay_ms > 600_000 {
        return Err(ConfigError::Validation(format!(
            "request-delay-ms must be <= 600000ms, got {}ms",
            config.request_delay_ms
        )));
    }

    parse_address(&config.host)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid host '{}': {}", config.host, e)))?;

    if config.category_url_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "category-url-name cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates session configuration
fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout-secs must be >= 1".to_string(),
        ));
    }

    config.cookie_pairs()?;

    for proxy in &config.proxies {
        ::url::Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;
    }

    for name in config.headers.keys() {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_graphic() && c != ':') {
            return Err(ConfigError::Validation(format!(
                "Invalid header name '{}'",
                name
            )));
        }
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    let collections = [&config.shops, &config.feedback, &config.actors];
    if collections.iter().any(|c| c.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "Collection names cannot be empty".to_string(),
        ));
    }

    let distinct: HashSet<&String> = collections.iter().copied().collect();
    if distinct.len() != collections.len() {
        return Err(ConfigError::Validation(
            "shops, feedback and actors must name different collections".to_string(),
        ));
    }

    Ok(())
}

/// Validates seed cities
fn validate_cities(cities: &[CityEntry]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for city in cities {
        if city.name.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "City {} must have a name",
                city.id
            )));
        }

        if !seen.insert(city.id) {
            return Err(ConfigError::Validation(format!(
                "City {} is listed twice",
                city.id
            )));
        }
    }

    Ok(())
}

/// Validates that templates only use placeholders their stage can fill
fn validate_templates(templates: &TemplateConfig) -> Result<(), ConfigError> {
    for (name, template, allowed) in templates.entries() {
        let used = placeholders(template)
            .map_err(|e| ConfigError::InvalidTemplate(format!("{}: {}", name, e)))?;

        if let Some(unknown) = used.iter().find(|p| !allowed.contains(&p.as_str())) {
            return Err(ConfigError::InvalidTemplate(format!(
                "{} uses unknown placeholder '{{{}}}' (allowed: {})",
                name,
                unknown,
                allowed.join(", ")
            )));
        }
    }

    Ok(())
}

/// Validates extraction overrides by compiling them
fn validate_extract_overrides(config: &Config) -> Result<(), ConfigError> {
    let overrides = config.extract_overrides()?;
    SelectorExtractor::new(&overrides)
        .map_err(|e| ConfigError::Validation(format!("Invalid [extract] table: {}", e)))?;
    Ok(())
}
