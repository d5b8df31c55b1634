//! Top-level error types for Tutorbot.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Classified provider failures.
///
/// Adapters never let a raw provider exception escape: every failure is
/// mapped to one of these at the adapter boundary, and the orchestrator
/// turns the classification into a fixed user-facing message via
/// [`ProviderError::user_message`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("missing or rejected credential: {0}")]
    Unauthorized(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timed out after {budget_ms}ms")]
    Timeout { budget_ms: u64 },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("no credential configured for {0} capability")]
    CapabilityUnavailable(crate::Capability),

    #[error("provider failure: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// Classify an HTTP error status from a provider.
    ///
    /// `Transport` is reserved for connection-level failures; a provider
    /// that answered with 5xx still produced a well-formed HTTP exchange
    /// and classifies as `Unknown`.
    pub fn from_status(status: u16, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match status {
            401 | 403 => ProviderError::Unauthorized(detail),
            429 => ProviderError::RateLimited(detail),
            _ => ProviderError::Unknown(format!("HTTP {status}: {detail}")),
        }
    }

    /// Classify a reqwest error at the adapter boundary.
    pub fn from_transport(error: &reqwest::Error, budget_ms: u64) -> Self {
        if error.is_timeout() {
            ProviderError::Timeout { budget_ms }
        } else if error.is_connect() || error.is_request() {
            ProviderError::Transport(error.to_string())
        } else if error.is_decode() {
            ProviderError::MalformedResponse(error.to_string())
        } else {
            ProviderError::Unknown(error.to_string())
        }
    }

    /// The fixed, friendly message shown to the learner for this
    /// classification. Raw provider detail never appears here.
    pub fn user_message(&self) -> &'static str {
        match self {
            ProviderError::Unauthorized(_) => {
                "抱歉，AI助手需要配置有效的API密钥才能正常工作。请先配置密钥后重试。"
            }
            ProviderError::RateLimited(_) => "AI服务当前请求过于频繁，请稍等片刻后再试。",
            ProviderError::Timeout { .. } => "请求超时了，请检查网络连接后重试。",
            ProviderError::Transport(_) => "网络连接似乎有问题，请检查网络后重试。",
            ProviderError::MalformedResponse(_) => {
                "AI服务返回了无法识别的内容，我们正在努力修复中，请稍后再试。"
            }
            ProviderError::CapabilityUnavailable(_) => {
                "这个功能需要配置相应的AI服务密钥才能使用。"
            }
            ProviderError::Unknown(_) => "抱歉，AI助手暂时遇到了一些问题，请稍后再试。",
        }
    }
}

/// Content catalog loading errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to parse catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("catalog contains no subjects")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ProviderError::from_status(401, "bad key"),
            ProviderError::Unauthorized(_)
        ));
        assert!(matches!(
            ProviderError::from_status(403, "forbidden"),
            ProviderError::Unauthorized(_)
        ));
        assert!(matches!(
            ProviderError::from_status(429, "slow down"),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            ProviderError::from_status(500, "boom"),
            ProviderError::Unknown(_)
        ));
        assert!(matches!(
            ProviderError::from_status(404, "missing"),
            ProviderError::Unknown(_)
        ));
    }

    #[test]
    fn test_user_messages_are_fixed_and_clean() {
        let raw = "sk-secret-key leaked into error text";
        let classified = [
            ProviderError::Unauthorized(raw.into()),
            ProviderError::RateLimited(raw.into()),
            ProviderError::Timeout { budget_ms: 30_000 },
            ProviderError::Transport(raw.into()),
            ProviderError::MalformedResponse(raw.into()),
            ProviderError::CapabilityUnavailable(crate::Capability::Vision),
            ProviderError::Unknown(raw.into()),
        ];
        for error in classified {
            let message = error.user_message();
            assert!(!message.is_empty());
            assert!(!message.contains("sk-secret"));
        }
    }
}
