use crate::UrlError;
use std::collections::BTreeMap;

/// Renders an address template such as `{host}/member/{user_id}`
///
/// Every `{name}` placeholder must have a value in `vars`; values are
/// inserted verbatim, so callers encode query values before rendering.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use delta_crawl::url::render_template;
///
/// let mut vars = BTreeMap::new();
/// vars.insert("host".to_string(), "http://example.com".to_string());
/// vars.insert("user_id".to_string(), "42".to_string());
///
/// let url = render_template("{host}/member/{user_id}", &vars).unwrap();
/// assert_eq!(url, "http://example.com/member/42");
/// ```
pub fn render_template(
    template: &str,
    vars: &BTreeMap<String, String>,
) -> Result<String, UrlError> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        rendered.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| UrlError::UnterminatedPlaceholder(template.to_string()))?;
        let name = &after[..end];

        let value = vars.get(name).ok_or_else(|| UrlError::UnknownPlaceholder {
            template: template.to_string(),
            placeholder: name.to_string(),
        })?;
        rendered.push_str(value);
        rest = &after[end + 1..];
    }

    rendered.push_str(rest);
    Ok(rendered)
}

/// Lists the placeholder names used by a template, in order of appearance
pub fn placeholders(template: &str) -> Result<Vec<String>, UrlError> {
    let mut names = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| UrlError::UnterminatedPlaceholder(template.to_string()))?;
        names.push(after[..end].to_string());
        rest = &after[end + 1..];
    }

    Ok(names)
}

/// Percent-encodes a value for use inside a query string
pub fn encode_query_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
