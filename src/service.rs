//! Exposed service surface for the host UI layer.
//!
//! Bundles the orchestrator, conversation store, credential store, and
//! context assembly behind the small interface the (out-of-scope) view
//! layer consumes: fire-and-forget sends, store snapshots, capability
//! queries, credential management, and the learner-selection signal.

use crate::catalog::Catalog;
use crate::context::{ContextAssembler, KnowledgeContext, LearnerProgress};
use crate::credentials::{CredentialStore, ProviderId, SaveOutcome};
use crate::orchestrator::Orchestrator;
use crate::providers::deepseek::{DeepSeekChat, TEXT_TIMEOUT};
use crate::providers::{ChatInput, ChatProvider, VisionRouter};
use crate::store::ConversationStore;
use crate::{Attachment, Capability, ConversationSession, Difficulty, fallback};

use std::sync::{Arc, RwLock};

/// Runtime options for the real-adapter constructor.
#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    /// Append raw classified-error detail to failure turns.
    pub diagnostics: bool,
    /// Override the DeepSeek endpoint (testing, proxies).
    pub deepseek_base_url: Option<String>,
}

/// The tutoring service: one instance per open conversation surface.
pub struct TutorService {
    store: Arc<ConversationStore>,
    orchestrator: Arc<Orchestrator>,
    credentials: Arc<CredentialStore>,
    text: Arc<dyn ChatProvider>,
    vision: Arc<VisionRouter>,
    assembler: ContextAssembler,
    /// Learner-selection signal: the currently selected concept id.
    selection: RwLock<Option<String>>,
    progress: RwLock<Option<LearnerProgress>>,
}

impl TutorService {
    /// Build a service over the real provider adapters.
    pub fn new(catalog: Arc<Catalog>, credentials: Arc<CredentialStore>) -> Self {
        Self::from_config(catalog, credentials, &Default::default())
    }

    /// Build a service over the real adapters with runtime options applied.
    pub fn from_config(
        catalog: Arc<Catalog>,
        credentials: Arc<CredentialStore>,
        options: &ServiceOptions,
    ) -> Self {
        let http = reqwest::Client::new();
        let mut deepseek = DeepSeekChat::new(credentials.clone(), http.clone());
        if let Some(base_url) = &options.deepseek_base_url {
            deepseek = deepseek.with_base_url(base_url);
        }
        let text: Arc<dyn ChatProvider> = Arc::new(deepseek);
        let vision = Arc::new(VisionRouter::with_default_priority(
            credentials.clone(),
            http,
        ));
        Self::build(catalog, credentials, text, vision, options.diagnostics)
    }

    /// Build a service over injected adapters (tests substitute fakes).
    pub fn with_adapters(
        catalog: Arc<Catalog>,
        credentials: Arc<CredentialStore>,
        text: Arc<dyn ChatProvider>,
        vision: Arc<VisionRouter>,
    ) -> Self {
        Self::build(catalog, credentials, text, vision, false)
    }

    fn build(
        catalog: Arc<Catalog>,
        credentials: Arc<CredentialStore>,
        text: Arc<dyn ChatProvider>,
        vision: Arc<VisionRouter>,
        diagnostics: bool,
    ) -> Self {
        let store = Arc::new(ConversationStore::new());
        let orchestrator = Arc::new(
            Orchestrator::new(store.clone(), text.clone(), vision.clone())
                .with_diagnostics(diagnostics),
        );
        Self {
            store,
            orchestrator,
            credentials,
            text,
            vision,
            assembler: ContextAssembler::new(catalog),
            selection: RwLock::new(None),
            progress: RwLock::new(None),
        }
    }

    /// Update the learner-selection signal. The next send snapshots the
    /// context derived from this selection.
    pub fn set_current_concept(&self, concept_id: Option<String>) {
        *self.selection.write().expect("selection lock") = concept_id;
    }

    pub fn set_progress(&self, progress: Option<LearnerProgress>) {
        *self.progress.write().expect("progress lock") = progress;
    }

    /// Context derived from the current selection.
    pub fn current_context(&self) -> KnowledgeContext {
        let selection = self.selection.read().expect("selection lock").clone();
        let progress = *self.progress.read().expect("progress lock");
        self.assembler.assemble(selection.as_deref(), progress)
    }

    /// Fire-and-forget send. The result is observed through the
    /// conversation store, never returned.
    pub fn send_user_message(self: &Arc<Self>, text: impl Into<String>, attachments: Vec<Attachment>) {
        let service = self.clone();
        let message = text.into();
        tokio::spawn(async move {
            service.handle_user_message(message, attachments).await;
        });
    }

    /// Send and wait for the dispatch to settle. Used by hosts that want
    /// to sequence on completion (the CLI, tests).
    pub async fn handle_user_message(&self, text: String, attachments: Vec<Attachment>) {
        let context = self.current_context();
        self.orchestrator.handle(text, attachments, context).await;
    }

    pub fn conversation(&self) -> Option<ConversationSession> {
        self.store.snapshot()
    }

    pub fn clear_conversation(&self) {
        self.store.clear();
    }

    pub fn is_processing(&self) -> bool {
        self.store.is_processing()
    }

    pub fn last_error(&self) -> Option<String> {
        self.store.last_error()
    }

    /// Whether a capability can reach a real provider. Text tutoring
    /// itself always works (degraded mode), but this reports credential
    /// presence so the UI can badge demo mode.
    pub fn has_capability(&self, kind: Capability) -> bool {
        match kind {
            Capability::Text => self.text.has_credential(),
            Capability::Vision => self.vision.has_credential(),
        }
    }

    // Credential management passthroughs.

    pub fn save_credential(&self, provider: ProviderId, input: &str) -> SaveOutcome {
        self.credentials.save(provider, input)
    }

    pub fn clear_credential(&self, provider: ProviderId) {
        self.credentials.clear(provider);
    }

    pub fn masked_credential(&self, provider: ProviderId) -> Option<String> {
        self.credentials.masked(provider)
    }

    /// Verify the text credential with a minimal round trip.
    pub async fn test_connection(&self) -> bool {
        if !self.text.has_credential() {
            return false;
        }
        let input = ChatInput {
            preamble: self.text.build_system_preamble(&KnowledgeContext::default()),
            history: vec![],
            message: "你好".into(),
        };
        match self.text.send(input, TEXT_TIMEOUT).await {
            Ok(_) => true,
            Err(error) => {
                tracing::warn!(%error, "credential test failed");
                false
            }
        }
    }

    /// Generate 3-5 short study tips for a concept, falling back to the
    /// fixed difficulty-tiered set when no provider is reachable.
    pub async fn learning_tips(&self, concept_title: &str, difficulty: Difficulty) -> Vec<String> {
        if !self.text.has_credential() {
            return fallback::default_learning_tips(difficulty);
        }

        let prompt = format!(
            "请为\"{concept_title}\"这个{difficulty}难度的知识点生成3-5条具体的学习建议。\n\
             要求：\n\
             1. 建议要具体可操作\n\
             2. 适合{difficulty}水平的学生\n\
             3. 每条建议不超过30字\n\
             4. 用简洁的中文表达，每条建议一行\n\n\
             请直接返回建议内容，不要其他解释。"
        );
        let input = ChatInput {
            preamble: self.text.build_system_preamble(&KnowledgeContext::default()),
            history: vec![],
            message: prompt,
        };

        match self.text.send(input, TEXT_TIMEOUT).await {
            Ok(output) => {
                let tips: Vec<String> = output
                    .content
                    .lines()
                    .map(|line| {
                        line.trim()
                            .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == '、')
                            .trim()
                            .to_string()
                    })
                    .filter(|tip| !tip.is_empty() && tip.chars().count() <= 50)
                    .take(5)
                    .collect();
                if tips.is_empty() {
                    fallback::default_learning_tips(difficulty)
                } else {
                    tips
                }
            }
            Err(error) => {
                tracing::warn!(%error, "tip generation failed, using defaults");
                fallback::default_learning_tips(difficulty)
            }
        }
    }

    /// Fixed practice guidance for a concept.
    pub fn exercise_suggestions(&self, concept_title: &str) -> Vec<String> {
        fallback::exercise_suggestions(concept_title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::sample_catalog;
    use crate::credentials::MemorySecretStore;
    use crate::error::ProviderError;
    use crate::fallback::DEMO_MODE_MARKER;
    use crate::providers::ChatOutput;
    use async_trait::async_trait;
    use std::time::Duration;

    struct ScriptedChat {
        credentialed: bool,
        reply: Result<String, ProviderError>,
    }

    #[async_trait]
    impl ChatProvider for ScriptedChat {
        fn has_credential(&self) -> bool {
            self.credentialed
        }

        fn build_system_preamble(&self, context: &KnowledgeContext) -> String {
            crate::providers::deepseek::build_system_preamble(context)
        }

        async fn send(
            &self,
            _input: ChatInput,
            _budget: Duration,
        ) -> Result<ChatOutput, ProviderError> {
            self.reply.clone().map(|content| ChatOutput { content })
        }
    }

    fn service_with(text: ScriptedChat) -> TutorService {
        TutorService::with_adapters(
            Arc::new(sample_catalog()),
            Arc::new(CredentialStore::new(Arc::new(MemorySecretStore::default()))),
            Arc::new(text),
            Arc::new(VisionRouter::new(vec![])),
        )
    }

    fn demo_service() -> TutorService {
        service_with(ScriptedChat {
            credentialed: false,
            reply: Ok(String::new()),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_drives_context_snapshot() {
        let service = demo_service();
        service.set_current_concept(Some("set-basics".into()));
        service
            .handle_user_message("请解释这个概念".into(), vec![])
            .await;

        let session = service.conversation().expect("session exists");
        let context = session.turns[0]
            .knowledge_context
            .as_ref()
            .expect("context snapshot attached");
        assert_eq!(context.concept_title(), "集合的基本概念");

        // Changing the selection later never rewrites history.
        service.set_current_concept(Some("fn-concept".into()));
        let session = service.conversation().unwrap();
        assert_eq!(
            session.turns[0].knowledge_context.as_ref().unwrap().concept_title(),
            "集合的基本概念"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_mode_replies_without_credential() {
        let service = demo_service();
        service.handle_user_message("你好".into(), vec![]).await;
        let session = service.conversation().unwrap();
        assert_eq!(session.turns.len(), 2);
        assert!(session.turns[1].content.contains(DEMO_MODE_MARKER));
    }

    #[tokio::test]
    async fn test_capability_reporting() {
        let service = demo_service();
        assert!(!service.has_capability(Capability::Text));
        assert!(!service.has_capability(Capability::Vision));

        let credentialed = service_with(ScriptedChat {
            credentialed: true,
            reply: Ok("好".into()),
        });
        assert!(credentialed.has_capability(Capability::Text));
        assert!(!credentialed.has_capability(Capability::Vision));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_conversation_resets_session() {
        let service = demo_service();
        service.handle_user_message("你好".into(), vec![]).await;
        assert!(service.conversation().is_some());

        service.clear_conversation();
        assert!(service.conversation().is_none());
        assert!(!service.is_processing());
        assert!(service.last_error().is_none());
    }

    #[tokio::test]
    async fn test_learning_tips_fallback_without_credential() {
        let service = demo_service();
        let tips = service.learning_tips("集合的基本概念", Difficulty::Basic).await;
        assert_eq!(tips, fallback::default_learning_tips(Difficulty::Basic));
    }

    #[tokio::test]
    async fn test_learning_tips_parse_provider_lines() {
        let service = service_with(ScriptedChat {
            credentialed: true,
            reply: Ok("1. 多画图理解集合关系\n2. 每天做五道基础题\n\n3、整理错题本".into()),
        });
        let tips = service.learning_tips("集合", Difficulty::Basic).await;
        assert_eq!(
            tips,
            vec!["多画图理解集合关系", "每天做五道基础题", "整理错题本"]
        );
    }

    #[tokio::test]
    async fn test_learning_tips_fallback_on_provider_error() {
        let service = service_with(ScriptedChat {
            credentialed: true,
            reply: Err(ProviderError::Transport("reset".into())),
        });
        let tips = service.learning_tips("集合", Difficulty::Advanced).await;
        assert_eq!(tips, fallback::default_learning_tips(Difficulty::Advanced));
    }

    #[tokio::test]
    async fn test_test_connection_reports_credential_state() {
        assert!(!demo_service().test_connection().await);
        let up = service_with(ScriptedChat {
            credentialed: true,
            reply: Ok("你好！".into()),
        });
        assert!(up.test_connection().await);
        let down = service_with(ScriptedChat {
            credentialed: true,
            reply: Err(ProviderError::Unauthorized("bad key".into())),
        });
        assert!(!down.test_connection().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_and_forget_send_lands_in_store() {
        let service = Arc::new(demo_service());
        service.send_user_message("你好", vec![]);
        // Drive the spawned dispatch to completion under the paused clock.
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if service
                .conversation()
                .is_some_and(|s| s.turns.len() == 2)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let session = service.conversation().expect("session created");
        assert_eq!(session.turns.len(), 2);
    }
}
