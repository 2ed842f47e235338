use crate::UrlError;
use url::Url;

/// Parses and validates a target address
///
/// Only `http` and `https` addresses with a host are accepted.
///
/// # Arguments
///
/// * `address` - The address string to parse
///
/// # Returns
///
/// * `Ok(Url)` - The parsed address
/// * `Err(UrlError)` - The address is malformed or not crawlable
pub fn parse_address(address: &str) -> Result<Url, UrlError> {
    let url = Url::parse(address).map_err(|e| UrlError::Parse(format!("{}: {}", address, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    if url.host_str().is_none() {
        return Err(UrlError::MissingHost);
    }

    Ok(url)
}

/// Produces the canonical form of an address used in task identities
///
/// # Canonicalization Steps
///
/// 1. Lowercase scheme and host (done by the URL parser)
/// 2. Drop the default port (done by the URL parser)
/// 3. Remove the fragment
/// 4. Sort query parameters by key, keeping the relative order of repeated keys
/// 5. Remove an empty query string
///
/// The fetched address is never rewritten; canonicalization only decides
/// whether two addresses name the same task.
///
/// # Examples
///
/// ```
/// use delta_crawl::url::canonical_address;
/// use url::Url;
///
/// let url = Url::parse("HTTP://Example.COM:80/a?b=2&a=1#top").unwrap();
/// assert_eq!(canonical_address(&url), "http://example.com/a?a=1&b=2");
/// ```
pub fn canonical_address(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);

    let mut pairs: Vec<(String, String)> = canonical
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.is_empty() {
        canonical.set_query(None);
    } else {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        canonical.query_pairs_mut().clear().extend_pairs(pairs);
    }

    canonical.to_string()
}

/// Resolves a possibly relative link against the address it was found on
pub fn join_address(base: &Url, href: &str) -> Result<Url, UrlError> {
    let joined = base
        .join(href.trim())
        .map_err(|e| UrlError::Parse(format!("{}: {}", href, e)))?;
    parse_address(joined.as_str())
}

/// Returns the last non-empty path segment of an address
///
/// Entity identifiers are carried in the final path segment of detail
/// and profile links (`/shop/38230595`, `/member/24903566`).
pub fn last_path_segment(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|s| s.to_string())
}
