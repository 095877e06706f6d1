use crate::{UrlError, UrlResult};
use url::{Host, Url};

/// Extracts the lowercase host from a URL
///
/// # Arguments
///
/// * `url` - The URL to extract the host from
///
/// # Returns
///
/// * `Some(String)` - The lowercase host, without port
/// * `None` - If the URL has no host
///
/// # Examples
///
/// ```
/// use url::Url;
/// use tidepool::url::extract_host;
///
/// let url = Url::parse("https://EXAMPLE.COM:8080/path").unwrap();
/// assert_eq!(extract_host(&url), Some("example.com".to_string()));
/// ```
pub fn extract_host(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Parses a URL string and returns it together with its host
///
/// Fetch tasks are keyed by host, so a URL without one cannot be scheduled.
pub fn parse_with_host(url_str: &str) -> UrlResult<(Url, String)> {
    let url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(format!("{}: {}", url_str, e)))?;
    let host = extract_host(&url).ok_or_else(|| UrlError::MissingHost(url_str.to_string()))?;
    Ok((url, host))
}

/// Approximates the registered domain of a URL's host
///
/// Returns the last two labels of a DNS host (`news.example.com` -> `example.com`).
/// IP addresses and single-label hosts are returned unchanged. This does not
/// consult a public suffix list, so `a.co.uk` and `b.co.uk` share `co.uk`.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use tidepool::url::registered_domain;
///
/// let url = Url::parse("http://www.news.example.com/").unwrap();
/// assert_eq!(registered_domain(&url), Some("example.com".to_string()));
/// ```
pub fn registered_domain(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_lowercase();
            let labels: Vec<&str> = domain.split('.').collect();
            if labels.len() <= 2 {
                Some(domain)
            } else {
                Some(labels[labels.len() - 2..].join("."))
            }
        }
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
    }
}

/// Returns the path plus query of a URL, the part that follows the authority
pub(crate) fn file_part(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Returns true if the URL points at the site root (`http://a.com` or `http://a.com/`)
pub fn is_root(url: &Url) -> bool {
    let file = file_part(url);
    file.is_empty() || file == "/"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_simple_host() {
        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(extract_host(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_extract_host_drops_port() {
        let url = Url::parse("https://example.com:8080/").unwrap();
        assert_eq!(extract_host(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_extract_host_lowercases() {
        let url = Url::parse("https://Example.COM/").unwrap();
        assert_eq!(extract_host(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_parse_with_host() {
        let (url, host) = parse_with_host("http://blog.example.com/post?id=1").unwrap();
        assert_eq!(host, "blog.example.com");
        assert_eq!(url.path(), "/post");
    }

    #[test]
    fn test_parse_with_host_rejects_garbage() {
        assert!(matches!(
            parse_with_host("not a url"),
            Err(UrlError::Parse(_))
        ));
    }

    #[test]
    fn test_parse_with_host_rejects_hostless() {
        assert!(matches!(
            parse_with_host("data:text/plain,hello"),
            Err(UrlError::MissingHost(_))
        ));
    }

    #[test]
    fn test_registered_domain() {
        let url = Url::parse("http://api.v2.example.com/x").unwrap();
        assert_eq!(registered_domain(&url), Some("example.com".to_string()));

        let url = Url::parse("http://example.com/").unwrap();
        assert_eq!(registered_domain(&url), Some("example.com".to_string()));

        let url = Url::parse("http://127.0.0.1:9000/").unwrap();
        assert_eq!(registered_domain(&url), Some("127.0.0.1".to_string()));
    }

    #[test]
    fn test_is_root() {
        assert!(is_root(&Url::parse("http://a.com").unwrap()));
        assert!(is_root(&Url::parse("http://a.com/").unwrap()));
        assert!(!is_root(&Url::parse("http://a.com?y=1").unwrap()));
        assert!(!is_root(&Url::parse("http://a.com/xyz/index.html").unwrap()));
    }
}
