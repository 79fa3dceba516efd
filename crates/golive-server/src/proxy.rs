//! Reverse proxy for configured path prefixes.
//!
//! Rules are tried in registration order and the first matching prefix wins.
//! A prefix matches a path that equals it or continues with `/` after it; the
//! prefix is stripped and the remainder is appended to the target URL.

use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A single prefix → upstream mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyRule {
    /// Path prefix, starting with `/`.
    pub prefix: String,
    /// Upstream base URL.
    pub target: String,
}

impl ProxyRule {
    /// Create a rule.
    pub fn new(prefix: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            target: target.into(),
        }
    }

    /// Return the path remainder if `path` falls under this rule's prefix.
    fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        let prefix = self.prefix.trim_end_matches('/');
        let rest = path.strip_prefix(prefix)?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }
}

/// Ordered proxy rules. Insertion order is routing precedence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProxyRules(Vec<ProxyRule>);

impl ProxyRules {
    /// Create an empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule with the lowest precedence so far.
    pub fn push(&mut self, prefix: impl Into<String>, target: impl Into<String>) {
        self.0.push(ProxyRule::new(prefix, target));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProxyRule> {
        self.0.iter()
    }

    /// Find the first rule matching `path` and the path remainder after its prefix.
    pub fn route<'a>(&self, path: &'a str) -> Option<(&ProxyRule, &'a str)> {
        self.0
            .iter()
            .find_map(|rule| rule.strip(path).map(|rest| (rule, rest)))
    }
}

impl<P: Into<String>, T: Into<String>> FromIterator<(P, T)> for ProxyRules {
    fn from_iter<I: IntoIterator<Item = (P, T)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(prefix, target)| ProxyRule::new(prefix, target))
                .collect(),
        )
    }
}

/// Per-request proxy failure.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ProxyError {
    /// Upstream could not be reached or returned a broken response.
    #[error("Upstream unreachable: {0}")]
    Unreachable(String),

    /// Request body could not be read from the client.
    #[error("Failed to read request body: {0}")]
    Body(#[from] axum::Error),

    /// Server is shutting down.
    #[error("Server is shutting down")]
    Cancelled,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unreachable(_) => StatusCode::BAD_GATEWAY,
            Self::Body(_) => StatusCode::BAD_REQUEST,
            Self::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, self.to_string()).into_response()
    }
}

/// Forwards matching requests to their upstream.
pub(crate) struct ProxyRouter {
    rules: ProxyRules,
    client: reqwest::Client,
    shutdown: CancellationToken,
}

impl ProxyRouter {
    /// Create a router whose in-flight requests end when `shutdown` fires.
    pub(crate) fn new(rules: ProxyRules, shutdown: CancellationToken) -> Result<Self, ServerError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            rules,
            client,
            shutdown,
        })
    }

    /// Find the rule for `path`, if any.
    pub(crate) fn route<'a>(&self, path: &'a str) -> Option<(&ProxyRule, &'a str)> {
        self.rules.route(path)
    }

    /// Forward `request` to `rule`'s target with `rest` as the upstream path.
    pub(crate) async fn forward(&self, rule: &ProxyRule, rest: &str, request: Request) -> Response {
        match self.try_forward(rule, rest, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(prefix = %rule.prefix, target = %rule.target, error = %e, "Proxy request failed");
                e.into_response()
            }
        }
    }

    async fn try_forward(
        &self,
        rule: &ProxyRule,
        rest: &str,
        request: Request,
    ) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let url = upstream_url(&rule.target, rest, parts.uri.query());

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        let body = axum::body::to_bytes(body, usize::MAX).await?;

        let send = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(body)
            .send();

        let upstream = tokio::select! {
            () = self.shutdown.cancelled() => return Err(ProxyError::Cancelled),
            result = send => result.map_err(|e| ProxyError::Unreachable(e.to_string()))?,
        };

        tracing::debug!(url = %url, status = %upstream.status(), "Proxied request");

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Join a target base URL, the path remainder and the query string.
fn upstream_url(target: &str, rest: &str, query: Option<&str>) -> String {
    let mut url = target.trim_end_matches('/').to_owned();
    url.push_str(if rest.is_empty() { "/" } else { rest });
    if let Some(query) = query {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();

    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    for name in &listed {
        headers.remove(name);
    }
}
