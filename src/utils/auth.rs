//! Request authentication helpers.

/// Attach `Authorization: Bearer <token>` when a session token is available.
/// Anonymous requests are sent unchanged and left for the edge function to
/// reject.
pub fn add_bearer_auth(
    request: reqwest::RequestBuilder,
    access_token: Option<&str>,
) -> reqwest::RequestBuilder {
    match access_token.map(str::trim).filter(|token| !token.is_empty()) {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}
