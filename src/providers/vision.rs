//! Vision (image understanding) adapter family.
//!
//! Three interchangeable backends with different wire shapes: OpenAI
//! chat-completions with `image_url`, Gemini `generateContent` with
//! `inline_data`, and Claude messages with a base64 `image` source.
//! [`VisionRouter`] selects exactly one by fixed priority order.

use crate::Difficulty;
use crate::credentials::{CredentialStore, ProviderId};
use crate::error::ProviderError;
use crate::providers::{VisionInput, VisionProvider};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

/// Hard cap per vision request. Image analysis gets a longer allowance
/// than text chat while staying strictly under the orchestrator's outer
/// budget, so inner timeouts classify before the outer race fires.
pub const VISION_TIMEOUT: Duration = Duration::from_secs(40);

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const OPENAI_VISION_MODEL: &str = "gpt-4-vision-preview";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const GEMINI_VISION_MODEL: &str = "gemini-pro-vision";
const CLAUDE_BASE_URL: &str = "https://api.anthropic.com";
const CLAUDE_VISION_MODEL: &str = "claude-3-sonnet-20240229";

const MAX_OUTPUT_TOKENS: u32 = 1000;
const ANALYSIS_TEMPERATURE: f32 = 0.3;

const VISION_SYSTEM_PROMPT: &str =
    "你是一个专业的教育AI助手，擅长分析学习相关的图片内容。请用中文回答，格式要清晰易懂。";

/// Structured result of an image analysis.
///
/// `description` is the full provider answer; the optional fields are
/// parsed out of it heuristically and preserved for structured callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisionAnalysis {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub formulas: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

fn formula_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?:公式|方程|等式)[：:]\s*([^。\n]+)").expect("formula regex compiles")
    })
}

fn suggestion_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?:建议|下一步)[：:]\s*([^。\n]+)").expect("suggestion regex compiles")
    })
}

/// Parse a free-text analysis answer into its structured form.
///
/// Heuristic extraction: labeled formulas via regex, subject and
/// difficulty via keyword presence. Difficulty defaults to intermediate
/// when the text gives no signal either way.
pub fn parse_analysis(content: &str) -> VisionAnalysis {
    let formulas: Vec<String> = formula_regex()
        .captures_iter(content)
        .map(|c| c[1].trim().to_string())
        .collect();

    let suggestions: Vec<String> = suggestion_regex()
        .captures_iter(content)
        .map(|c| c[1].trim().to_string())
        .collect();

    let subject_table: &[(&str, &[&str])] = &[
        ("数学", &["数学", "几何", "代数", "微积分", "统计"]),
        ("物理", &["物理", "力学", "电学", "光学"]),
        ("化学", &["化学", "分子", "原子", "反应"]),
        ("生物", &["生物", "细胞", "基因", "DNA"]),
    ];
    let subjects: Vec<String> = subject_table
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| content.contains(k)))
        .map(|(subject, _)| subject.to_string())
        .collect();

    let difficulty = if ["基础", "简单", "入门"].iter().any(|k| content.contains(k)) {
        Some(Difficulty::Basic)
    } else if ["高级", "复杂", "困难"].iter().any(|k| content.contains(k)) {
        Some(Difficulty::Advanced)
    } else {
        Some(Difficulty::Intermediate)
    };

    VisionAnalysis {
        description: content.to_string(),
        detected_text: None,
        formulas,
        subjects,
        difficulty,
        suggestions,
    }
}

/// Shared send-and-classify plumbing for the three backends.
async fn post_and_read(
    request: reqwest::RequestBuilder,
    budget: Duration,
    provider: ProviderId,
) -> Result<serde_json::Value, ProviderError> {
    let budget_ms = budget.as_millis() as u64;

    let response = tokio::time::timeout(budget, request.send())
        .await
        .map_err(|_| ProviderError::Timeout { budget_ms })?
        .map_err(|e| ProviderError::from_transport(&e, budget_ms))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ProviderError::MalformedResponse(e.to_string()))?;

    if !status.is_success() {
        tracing::warn!(provider = %provider, status = %status, "vision request rejected");
        return Err(ProviderError::from_status(status.as_u16(), text));
    }

    serde_json::from_str(&text)
        .map_err(|e| ProviderError::MalformedResponse(format!("invalid JSON: {e}")))
}

/// OpenAI vision backend: chat-completions with an `image_url` part.
pub struct OpenAiVision {
    credentials: Arc<CredentialStore>,
    http: reqwest::Client,
    base_url: String,
}

impl OpenAiVision {
    pub fn new(credentials: Arc<CredentialStore>, http: reqwest::Client) -> Self {
        Self {
            credentials,
            http,
            base_url: OPENAI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl VisionProvider for OpenAiVision {
    fn provider(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    fn has_credential(&self) -> bool {
        self.credentials.has(ProviderId::OpenAi)
    }

    async fn analyze(
        &self,
        input: &VisionInput,
        budget: Duration,
    ) -> Result<VisionAnalysis, ProviderError> {
        let Some(api_key) = self.credentials.secret(ProviderId::OpenAi) else {
            return Err(ProviderError::Unauthorized("no OpenAI credential".into()));
        };

        let body = serde_json::json!({
            "model": OPENAI_VISION_MODEL,
            "messages": [
                { "role": "system", "content": VISION_SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": input.prompt },
                        {
                            "type": "image_url",
                            "image_url": { "url": format!("data:image/jpeg;base64,{}", input.image_base64) }
                        }
                    ]
                }
            ],
            "max_tokens": MAX_OUTPUT_TOKENS,
            "temperature": ANALYSIS_TEMPERATURE,
        });

        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let request = self.http.post(&url).bearer_auth(&api_key).json(&body);
        let parsed = post_and_read(request, budget, self.provider()).await?;

        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                ProviderError::MalformedResponse("response carries no completion content".into())
            })?;

        Ok(parse_analysis(content))
    }
}

/// Gemini vision backend: `generateContent` with `inline_data`.
pub struct GeminiVision {
    credentials: Arc<CredentialStore>,
    http: reqwest::Client,
    base_url: String,
}

impl GeminiVision {
    pub fn new(credentials: Arc<CredentialStore>, http: reqwest::Client) -> Self {
        Self {
            credentials,
            http,
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl VisionProvider for GeminiVision {
    fn provider(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn has_credential(&self) -> bool {
        self.credentials.has(ProviderId::Gemini)
    }

    async fn analyze(
        &self,
        input: &VisionInput,
        budget: Duration,
    ) -> Result<VisionAnalysis, ProviderError> {
        let Some(api_key) = self.credentials.secret(ProviderId::Gemini) else {
            return Err(ProviderError::Unauthorized("no Gemini credential".into()));
        };

        let body = serde_json::json!({
            "contents": [{
                "parts": [
                    { "text": format!("{VISION_SYSTEM_PROMPT}\n\n{}", input.prompt) },
                    {
                        "inline_data": {
                            "mime_type": "image/jpeg",
                            "data": input.image_base64,
                        }
                    }
                ]
            }],
            "generationConfig": {
                "temperature": ANALYSIS_TEMPERATURE,
                "maxOutputTokens": MAX_OUTPUT_TOKENS,
            }
        });

        let url = format!(
            "{}/v1beta/models/{GEMINI_VISION_MODEL}:generateContent?key={api_key}",
            self.base_url.trim_end_matches('/'),
        );
        let request = self.http.post(&url).json(&body);
        let parsed = post_and_read(request, budget, self.provider()).await?;

        let content = parsed["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                ProviderError::MalformedResponse("response carries no candidate text".into())
            })?;

        Ok(parse_analysis(content))
    }
}

/// Claude vision backend: messages API with a base64 `image` source.
pub struct ClaudeVision {
    credentials: Arc<CredentialStore>,
    http: reqwest::Client,
    base_url: String,
}

impl ClaudeVision {
    pub fn new(credentials: Arc<CredentialStore>, http: reqwest::Client) -> Self {
        Self {
            credentials,
            http,
            base_url: CLAUDE_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl VisionProvider for ClaudeVision {
    fn provider(&self) -> ProviderId {
        ProviderId::Claude
    }

    fn has_credential(&self) -> bool {
        self.credentials.has(ProviderId::Claude)
    }

    async fn analyze(
        &self,
        input: &VisionInput,
        budget: Duration,
    ) -> Result<VisionAnalysis, ProviderError> {
        let Some(api_key) = self.credentials.secret(ProviderId::Claude) else {
            return Err(ProviderError::Unauthorized("no Claude credential".into()));
        };

        let body = serde_json::json!({
            "model": CLAUDE_VISION_MODEL,
            "max_tokens": MAX_OUTPUT_TOKENS,
            "system": VISION_SYSTEM_PROMPT,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": input.prompt },
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": "image/jpeg",
                            "data": input.image_base64,
                        }
                    }
                ]
            }]
        });

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let request = self
            .http
            .post(&url)
            .header("x-api-key", &api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body);
        let parsed = post_and_read(request, budget, self.provider()).await?;

        let content = parsed["content"][0]["text"]
            .as_str()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                ProviderError::MalformedResponse("response carries no content block".into())
            })?;

        Ok(parse_analysis(content))
    }
}

/// Selects one vision backend by fixed priority order.
///
/// The order is documented, not randomized: the first backend in the
/// list holding a credential wins. With no credentialed backend the
/// capability is unavailable.
pub struct VisionRouter {
    backends: Vec<Arc<dyn VisionProvider>>,
}

impl VisionRouter {
    pub fn new(backends: Vec<Arc<dyn VisionProvider>>) -> Self {
        Self { backends }
    }

    /// The default family: OpenAI, then Gemini, then Claude.
    pub fn with_default_priority(credentials: Arc<CredentialStore>, http: reqwest::Client) -> Self {
        Self::new(vec![
            Arc::new(OpenAiVision::new(credentials.clone(), http.clone())),
            Arc::new(GeminiVision::new(credentials.clone(), http.clone())),
            Arc::new(ClaudeVision::new(credentials, http)),
        ])
    }

    pub fn has_credential(&self) -> bool {
        self.backends.iter().any(|b| b.has_credential())
    }

    /// The backend that would serve the next request, if any.
    pub fn select(&self) -> Option<&Arc<dyn VisionProvider>> {
        self.backends.iter().find(|b| b.has_credential())
    }

    pub async fn analyze(
        &self,
        input: &VisionInput,
        budget: Duration,
    ) -> Result<VisionAnalysis, ProviderError> {
        let Some(backend) = self.select() else {
            return Err(ProviderError::CapabilityUnavailable(crate::Capability::Vision));
        };
        tracing::debug!(provider = %backend.provider(), "vision request routed");
        backend.analyze(input, budget).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemorySecretStore;

    fn credential_store() -> Arc<CredentialStore> {
        Arc::new(CredentialStore::new(Arc::new(MemorySecretStore::default())))
    }

    #[test]
    fn test_parse_analysis_extracts_formulas() {
        let content = "这是一道二次方程题。公式：x² + 2x + 1 = 0\n另外有等式：a = b + c。属于数学中的代数，难度入门。";
        let analysis = parse_analysis(content);
        assert_eq!(analysis.formulas, vec!["x² + 2x + 1 = 0", "a = b + c"]);
        assert_eq!(analysis.subjects, vec!["数学"]);
        assert_eq!(analysis.difficulty, Some(Difficulty::Basic));
    }

    #[test]
    fn test_parse_analysis_detects_multiple_subjects() {
        let content = "图中既有力学受力分析，也涉及微积分计算，内容比较复杂。";
        let analysis = parse_analysis(content);
        assert!(analysis.subjects.contains(&"数学".to_string()));
        assert!(analysis.subjects.contains(&"物理".to_string()));
        assert_eq!(analysis.difficulty, Some(Difficulty::Advanced));
    }

    #[test]
    fn test_parse_analysis_defaults_to_intermediate() {
        let analysis = parse_analysis("一张普通的题目照片。");
        assert_eq!(analysis.difficulty, Some(Difficulty::Intermediate));
        assert!(analysis.formulas.is_empty());
        assert!(analysis.subjects.is_empty());
    }

    #[test]
    fn test_router_priority_order() {
        let credentials = credential_store();
        let http = reqwest::Client::new();
        let router = VisionRouter::with_default_priority(credentials.clone(), http);

        assert!(!router.has_credential());
        assert!(router.select().is_none());

        // Only the lower-priority backends are configured: Gemini wins
        // over Claude.
        credentials.save(ProviderId::Gemini, "gm-key");
        credentials.save(ProviderId::Claude, "sk-ant-key");
        assert_eq!(router.select().unwrap().provider(), ProviderId::Gemini);

        // OpenAI outranks both once configured.
        credentials.save(ProviderId::OpenAi, "sk-key");
        assert_eq!(router.select().unwrap().provider(), ProviderId::OpenAi);
    }

    #[tokio::test]
    async fn test_analyze_without_credentials_is_capability_unavailable() {
        let router =
            VisionRouter::with_default_priority(credential_store(), reqwest::Client::new());
        let result = router
            .analyze(
                &VisionInput {
                    image_base64: "aGVsbG8=".into(),
                    prompt: "分析这张图片".into(),
                },
                VISION_TIMEOUT,
            )
            .await;
        assert!(matches!(
            result,
            Err(ProviderError::CapabilityUnavailable(crate::Capability::Vision))
        ));
    }
}
