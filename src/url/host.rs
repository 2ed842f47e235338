use url::Url;

/// Extracts the destination host used for request spacing
///
/// The port is kept when it is not the scheme default, so two services on
/// the same machine are spaced independently.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use delta_crawl::url::extract_host;
///
/// let url = Url::parse("http://WWW.Example.com/path").unwrap();
/// assert_eq!(extract_host(&url), "www.example.com");
///
/// let url = Url::parse("http://127.0.0.1:8080/path").unwrap();
/// assert_eq!(extract_host(&url), "127.0.0.1:8080");
/// ```
pub fn extract_host(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    }
}
