//! Field rules
//!
//! A rule names where a value lives in the markup and how to post-process it:
//!
//! ```text
//! selector[@attribute][|filter...]
//! ```
//!
//! - `#basic-info .shop-name|own-text` - text of the element's own text nodes
//! - `div.pic > a@user-id|int` - attribute value, integer part
//! - `.favor-list li div.tit a@href|last-segment|int`
//! - `@data-id|int` - attribute of the item element itself (item fields only)

use crate::extract::ExtractError;
use crate::url::parse_address;
use scraper::{ElementRef, Selector};
use serde_json::Value;

/// Post-processing step applied to an extracted string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Use only the element's direct text nodes
    OwnText,

    /// First run of ASCII digits as an integer, null if there is none
    Int,

    /// Last `/`-separated segment of an address or path
    LastSegment,
}

impl Filter {
    fn parse(name: &str) -> Result<Self, ExtractError> {
        match name.trim() {
            "own-text" => Ok(Self::OwnText),
            "int" => Ok(Self::Int),
            "last-segment" => Ok(Self::LastSegment),
            other => Err(ExtractError::Selector(format!("unknown filter '{}'", other))),
        }
    }
}

/// A compiled field rule
#[derive(Debug, Clone)]
pub struct FieldRule {
    /// None targets the context element itself
    selector: Option<Selector>,
    attribute: Option<String>,
    filters: Vec<Filter>,
}

impl FieldRule {
    pub fn parse(rule: &str) -> Result<Self, ExtractError> {
        let mut parts = rule.split('|');
        let target = parts.next().unwrap_or_default().trim();
        let filters = parts.map(Filter::parse).collect::<Result<Vec<_>, _>>()?;

        let (selector, attribute) = match target.rfind('@') {
            Some(at) if is_attribute_name(&target[at + 1..]) => {
                (target[..at].trim(), Some(target[at + 1..].to_string()))
            }
            _ => (target, None),
        };

        let selector = if selector.is_empty() {
            None
        } else {
            Some(
                Selector::parse(selector)
                    .map_err(|e| ExtractError::Selector(format!("'{}': {:?}", selector, e)))?,
            )
        };

        Ok(Self {
            selector,
            attribute,
            filters,
        })
    }

    pub fn targets_self(&self) -> bool {
        self.selector.is_none()
    }

    /// Value of the first match below `scope`, or null when nothing matches
    pub fn first(&self, scope: ElementRef<'_>) -> Value {
        self.matches(scope)
            .into_iter()
            .next()
            .map(|el| self.value_of(el))
            .unwrap_or(Value::Null)
    }

    /// Values of every match below `scope`
    pub fn all(&self, scope: ElementRef<'_>) -> Vec<Value> {
        self.matches(scope)
            .into_iter()
            .map(|el| self.value_of(el))
            .filter(|v| !v.is_null())
            .collect()
    }

    /// Raw strings of every match, before filters; used for links
    pub fn strings(&self, scope: ElementRef<'_>) -> Vec<String> {
        self.matches(scope)
            .into_iter()
            .filter_map(|el| self.raw_of(el))
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn matches<'a>(&self, scope: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        match &self.selector {
            Some(selector) => scope.select(selector).collect(),
            None => vec![scope],
        }
    }

    fn raw_of(&self, el: ElementRef<'_>) -> Option<String> {
        match &self.attribute {
            Some(attr) => el.value().attr(attr).map(|s| s.trim().to_string()),
            None if self.filters.contains(&Filter::OwnText) => Some(
                el.children()
                    .filter_map(|node| node.value().as_text().map(|t| t.to_string()))
                    .collect::<String>()
                    .trim()
                    .to_string(),
            ),
            None => Some(normalize_whitespace(&el.text().collect::<String>())),
        }
    }

    fn value_of(&self, el: ElementRef<'_>) -> Value {
        let Some(raw) = self.raw_of(el) else {
            return Value::Null;
        };
        apply_filters(raw, &self.filters)
    }
}

fn is_attribute_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn apply_filters(raw: String, filters: &[Filter]) -> Value {
    let mut value = Value::String(raw);
    for filter in filters {
        value = match (filter, value) {
            (Filter::OwnText, v) => v,
            (Filter::Int, Value::String(s)) => extract_int(&s).map_or(Value::Null, Value::from),
            (Filter::LastSegment, Value::String(s)) => Value::String(last_segment(&s)),
            (_, v) => v,
        };
    }
    value
}

/// Parses the first run of ASCII digits in `text`
pub fn extract_int(text: &str) -> Option<i64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn last_segment(s: &str) -> String {
    if let Ok(url) = parse_address(s) {
        if let Some(segment) = crate::url::last_path_segment(&url) {
            return segment;
        }
    }
    s.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;
    use serde_json::json;

    fn doc(html: &str) -> Html {
        Html::parse_document(html)
    }

    #[test]
    fn test_text_rule() {
        let html = doc(r#"<div class="address"><span class="item"> 东城区  王府井 </span></div>"#);
        let rule = FieldRule::parse(".address .item").unwrap();
        assert_eq!(rule.first(html.root_element()), json!("东城区 王府井"));
    }

    #[test]
    fn test_own_text_skips_children() {
        let html = doc(r#"<h1 class="shop-name">Noodle Bar <a>add branch</a></h1>"#);
        let rule = FieldRule::parse(".shop-name|own-text").unwrap();
        assert_eq!(rule.first(html.root_element()), json!("Noodle Bar"));
    }

    #[test]
    fn test_attribute_and_int() {
        let html = doc(r#"<div class="pic"><a user-id="u123">x</a></div>"#);
        let rule = FieldRule::parse("div.pic > a@user-id|int").unwrap();
        assert_eq!(rule.first(html.root_element()), json!(123));
    }

    #[test]
    fn test_last_segment_then_int() {
        let html = doc(r#"<ul class="favor-list"><li><div class="tit"><a href="/shop/991">s</a></div></li>
               <li><div class="tit"><a href="http://example.com/shop/992">t</a></div></li></ul>"#);
        let rule = FieldRule::parse(".favor-list li div.tit a@href|last-segment|int").unwrap();
        assert_eq!(rule.all(html.root_element()), vec![json!(991), json!(992)]);
    }

    #[test]
    fn test_missing_match_is_null() {
        let html = doc("<p>nothing</p>");
        let rule = FieldRule::parse("#J_col_exp|int").unwrap();
        assert_eq!(rule.first(html.root_element()), Value::Null);
    }

    #[test]
    fn test_self_target() {
        let rule = FieldRule::parse("@data-id|int").unwrap();
        assert!(rule.targets_self());
    }

    #[test]
    fn test_invalid_rules() {
        assert!(matches!(
            FieldRule::parse("div[[|int"),
            Err(ExtractError::Selector(_))
        ));
        assert!(matches!(
            FieldRule::parse("div|shout"),
            Err(ExtractError::Selector(_))
        ));
    }

    #[test]
    fn test_extract_int() {
        assert_eq!(extract_int("人均：￥88"), Some(88));
        assert_eq!(extract_int("贡献值 1024 点"), Some(1024));
        assert_eq!(extract_int("none"), None);
    }
}
