use std::fmt;

/// Classified engine error — tells the caller *why* the chat call failed so
/// the governor can pick the right recovery strategy.
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// 401/403 — bad API key or permissions.
    Auth,
    /// 400/422 — the request itself is malformed.
    BadRequest,
    /// 429 — rate limited; the governor snoozes and retries this one.
    RateLimit,
    /// 404 or "model not found".
    NotFound,
    /// 408 or the provider took too long.
    Timeout,
    /// Connection refused, DNS failure, reset, etc.
    Network,
    /// 500/502/503/504 — provider-side outage.
    ServerError,
    /// Anything else, including malformed response bodies.
    Unknown,
}

impl ProviderError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            400 | 422 => ProviderErrorKind::BadRequest,
            401 | 403 => ProviderErrorKind::Auth,
            404 => ProviderErrorKind::NotFound,
            408 => ProviderErrorKind::Timeout,
            429 => ProviderErrorKind::RateLimit,
            500 | 502 | 503 | 504 => ProviderErrorKind::ServerError,
            _ => ProviderErrorKind::Unknown,
        };

        Self {
            kind,
            status: Some(status),
            message: extract_vendor_message(body).unwrap_or_else(|| truncate_body(body)),
        }
    }

    pub fn network(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ProviderErrorKind::Timeout
        } else {
            ProviderErrorKind::Network
        };
        Self {
            kind,
            status: None,
            message: err.to_string(),
        }
    }

    /// A 200 response whose body did not decode as a chat completion.
    pub fn malformed(err: &serde_json::Error) -> Self {
        Self {
            kind: ProviderErrorKind::Unknown,
            status: Some(200),
            message: format!("malformed response from the LLM provider: {}", err),
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        self.kind == ProviderErrorKind::RateLimit
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(status) = self.status {
            write!(f, "provider error ({}, {:?}): {}", status, self.kind, self.message)
        } else {
            write!(f, "provider error ({:?}): {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for ProviderError {}

/// Pull the human-readable message out of an OpenAI-style error envelope:
/// `{"error": {"message": "...", ...}}`.
fn extract_vendor_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value["error"]["message"]
        .as_str()
        .filter(|message| !message.is_empty())
        .map(|message| message.to_string())
}

fn truncate_body(body: &str) -> String {
    const LIMIT: usize = 300;
    if body.chars().count() > LIMIT {
        let cut: String = body.chars().take(LIMIT).collect();
        format!("{}...", cut)
    } else {
        body.to_string()
    }
}
