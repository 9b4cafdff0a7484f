//! Edge function URL construction.

/// Strip trailing slashes so endpoints can be appended safely.
///
/// ```
/// use parley::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("https://edge.example.com/functions/v1/"), "https://edge.example.com/functions/v1");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join the edge base URL and a function name without doubling slashes.
///
/// ```
/// use parley::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("https://edge.example.com/functions/v1/", "/ai-chat"),
///     "https://edge.example.com/functions/v1/ai-chat"
/// );
/// ```
pub fn construct_api_url(base_url: &str, endpoint: &str) -> String {
    let endpoint = endpoint.trim_start_matches('/');
    format!("{}/{}", normalize_base_url(base_url), endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_strips_every_trailing_slash() {
        assert_eq!(
            normalize_base_url("https://edge.example.com/functions/v1///"),
            "https://edge.example.com/functions/v1"
        );
        assert_eq!(normalize_base_url("https://edge.example.com"), "https://edge.example.com");
        assert_eq!(normalize_base_url("///"), "");
    }

    #[test]
    fn construct_api_url_joins_edge_functions() {
        let base = "http://127.0.0.1:54321/functions/v1";
        assert_eq!(construct_api_url(base, "ai-chat"), format!("{base}/ai-chat"));
        assert_eq!(
            construct_api_url(&format!("{base}/"), "//react-search"),
            format!("{base}/react-search")
        );
    }
}
