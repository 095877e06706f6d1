use crate::url::domain::{file_part, is_root, registered_domain};
use url::Url;

/// The shortest URL that can still be a meaningful representative URL
pub const SHORTEST_VALID_URL: &str = "ftp://t.tt";

/// Shortest length a representative URL may have before it is ignored
pub const SHORTEST_VALID_URL_LENGTH: usize = SHORTEST_VALID_URL.len();

/// Chooses the representative URL of a redirect
///
/// Given the source and destination of a redirect, picks the URL that best
/// stands for the page, so that a chain of redirects converges on one URL.
///
/// - Different registered domains: the destination wins.
/// - Permanent redirect: the source if it is the site root, else the destination.
/// - Temporary redirect:
///   - root to non-root keeps the source, non-root to root keeps the destination
///   - two non-root URLs on the same host keep the one with fewer path
///     segments, then the shorter path (ties keep the source)
///   - otherwise the one with fewer host labels (ties keep the source)
///
/// Malformed input returns the destination unchanged.
///
/// # Examples
///
/// ```
/// use tidepool::url::choose_repr;
///
/// assert_eq!(choose_repr("http://www.a.com", "http://www.b.com", true), "http://www.b.com");
/// assert_eq!(choose_repr("http://www.a.com", "http://www.a.com/x.html", false), "http://www.a.com");
/// ```
pub fn choose_repr<'a>(src: &'a str, dst: &'a str, temp: bool) -> &'a str {
    let (src_url, dst_url) = match (Url::parse(src), Url::parse(dst)) {
        (Ok(s), Ok(d)) => (s, d),
        _ => return dst,
    };

    if registered_domain(&src_url) != registered_domain(&dst_url) {
        return dst;
    }

    let src_root = is_root(&src_url);
    let dst_root = is_root(&dst_url);

    if !temp {
        return if src_root { src } else { dst };
    }

    if src_root && !dst_root {
        return src;
    }
    if !src_root && dst_root {
        return dst;
    }

    let src_host = src_url.host_str().unwrap_or_default();
    let dst_host = dst_url.host_str().unwrap_or_default();

    if !src_root && !dst_root && src_host == dst_host {
        let src_file = file_part(&src_url);
        let dst_file = file_part(&dst_url);
        let src_segments = src_file.split('/').count();
        let dst_segments = dst_file.split('/').count();

        if src_segments != dst_segments {
            return if dst_segments < src_segments { dst } else { src };
        }
        return if dst_file.len() < src_file.len() { dst } else { src };
    }

    let src_labels = src_host.split('.').count();
    let dst_labels = dst_host.split('.').count();
    if dst_labels < src_labels {
        dst
    } else {
        src
    }
}
