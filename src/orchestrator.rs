//! Dispatch state machine for inbound user turns.
//!
//! Each turn moves `Idle → Dispatched → (Success | Recovered-Fallback |
//! Failed) → Idle`. The orchestrator never throws to its caller: every
//! outcome lands in the conversation store as an assistant turn, plus an
//! error flag on failure, so the UI always has something renderable.

use crate::context::KnowledgeContext;
use crate::error::ProviderError;
use crate::providers::deepseek::TEXT_TIMEOUT;
use crate::providers::vision::VISION_TIMEOUT;
use crate::providers::{
    ChatInput, ChatProvider, VisionAnalysis, VisionInput, VisionRouter, window_history,
};
use crate::store::ConversationStore;
use crate::{Attachment, Turn, fallback};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Outer budget for a whole dispatch. Strictly greater than every
/// adapter's inner timeout so adapter-classified errors surface before
/// the outer race fires.
pub const OUTER_TIMEOUT: Duration = Duration::from_secs(45);

/// Guard against a stale late resolution of a dispatch.
///
/// Whichever side of the timeout race resolves first claims the
/// dispatch; the loser's result is discarded instead of appended.
#[derive(Debug, Default)]
pub(crate) struct DispatchGuard {
    resolved: AtomicBool,
}

impl DispatchGuard {
    /// Claim the dispatch. Returns false if it was already claimed.
    pub(crate) fn try_resolve(&self) -> bool {
        self.resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// How a dispatch concluded, before it is flattened into an assistant turn.
enum Reply {
    /// A provider answered.
    Answer(String),
    /// Degraded mode answered deterministically (no credential).
    Fallback(String),
    /// The vision family answered; structured analysis preserved.
    Vision {
        content: String,
        analysis: VisionAnalysis,
    },
}

/// Orchestrates provider selection, timeout enforcement, and fallback
/// for one conversation. All collaborators are constructor-injected so
/// tests can substitute fakes.
pub struct Orchestrator {
    store: Arc<ConversationStore>,
    text: Arc<dyn ChatProvider>,
    vision: Arc<VisionRouter>,
    /// Serializes dispatches: a second send while one is in flight queues
    /// behind it (tokio mutexes are fair, so queued sends run in arrival
    /// order). See DESIGN.md for the queue-vs-reject decision.
    dispatch_lock: tokio::sync::Mutex<()>,
    /// Append raw classified-error detail to failure turns. Off in
    /// production; the fixed friendly message is always the lead.
    diagnostics: bool,
}

impl Orchestrator {
    pub fn new(
        store: Arc<ConversationStore>,
        text: Arc<dyn ChatProvider>,
        vision: Arc<VisionRouter>,
    ) -> Self {
        Self {
            store,
            text,
            vision,
            dispatch_lock: tokio::sync::Mutex::new(()),
            diagnostics: false,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: bool) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Handle one inbound user turn end to end.
    ///
    /// Appends the user turn, runs the dispatch under the outer timeout,
    /// and appends exactly one assistant (or failure) turn. Ordering is
    /// causal: the response turn for a message always directly follows
    /// that message's user turn.
    pub async fn handle(
        &self,
        message: String,
        attachments: Vec<Attachment>,
        context: KnowledgeContext,
    ) {
        let _flight = self.dispatch_lock.lock().await;

        let history = self.store.turns();
        let user_turn = Turn::user(message.clone(), Some(context.clone()), attachments.clone());
        self.store.append(user_turn);
        self.store.set_processing(true);
        self.store.set_error(None);

        let has_image = attachments
            .iter()
            .any(|a| a.kind == crate::AttachmentKind::Image);
        tracing::debug!(has_image, history_len = history.len(), "dispatching user turn");

        let guard = DispatchGuard::default();
        let cancel = CancellationToken::new();
        let deadline = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(OUTER_TIMEOUT).await;
                cancel.cancel();
            }
        });

        let dispatch = async {
            if has_image {
                self.dispatch_vision(&message, &attachments, &context).await
            } else {
                self.dispatch_text(&message, &history, &context).await
            }
        };

        // Cancelling the token drops the in-flight dispatch (and its
        // underlying request); a resolution that loses the race is
        // discarded, never appended.
        let outcome = match cancel.run_until_cancelled(dispatch).await {
            Some(outcome) if guard.try_resolve() => Some(outcome),
            Some(_) => {
                tracing::warn!("discarding stale dispatch resolution");
                None
            }
            None if guard.try_resolve() => Some(Err(ProviderError::Timeout {
                budget_ms: OUTER_TIMEOUT.as_millis() as u64,
            })),
            None => None,
        };
        deadline.abort();

        if let Some(outcome) = outcome {
            self.conclude(outcome, &context);
        }
        self.store.set_processing(false);
    }

    /// Flatten a dispatch outcome into the store.
    fn conclude(&self, outcome: Result<Reply, ProviderError>, context: &KnowledgeContext) {
        match outcome {
            Ok(Reply::Answer(content)) => {
                tracing::debug!("dispatch succeeded");
                self.store
                    .append(Turn::assistant(content, Some(context.clone())));
            }
            Ok(Reply::Fallback(content)) => {
                tracing::debug!("dispatch recovered via fallback");
                self.store
                    .append(Turn::assistant(content, Some(context.clone())));
            }
            Ok(Reply::Vision { content, analysis }) => {
                tracing::debug!("vision dispatch succeeded");
                self.store.append(
                    Turn::assistant(content, Some(context.clone())).with_analysis(analysis),
                );
            }
            Err(error) => {
                tracing::warn!(%error, "dispatch failed");
                let mut content = error.user_message().to_string();
                if self.diagnostics {
                    content.push_str(&format!("\n\n错误详情: {error}"));
                }
                self.store
                    .append(Turn::assistant(content, Some(context.clone())));
                self.store.set_error(Some(error.to_string()));
            }
        }
    }

    async fn dispatch_text(
        &self,
        message: &str,
        history: &[Turn],
        context: &KnowledgeContext,
    ) -> Result<Reply, ProviderError> {
        if !self.text.has_credential() {
            // Degraded mode is a documented recovery, not an error: text
            // fallback is always available.
            tracing::info!("no text credential, answering in degraded mode");
            tokio::time::sleep(fallback::typing_delay(message)).await;
            return Ok(Reply::Fallback(fallback::respond(
                message,
                Some(context),
                history.len(),
            )));
        }

        let input = ChatInput {
            preamble: self.text.build_system_preamble(context),
            history: window_history(history),
            message: message.to_string(),
        };

        let output = self.text.send(input, TEXT_TIMEOUT).await?;
        Ok(Reply::Answer(output.content))
    }

    async fn dispatch_vision(
        &self,
        message: &str,
        attachments: &[Attachment],
        context: &KnowledgeContext,
    ) -> Result<Reply, ProviderError> {
        let Some(image) = attachments
            .iter()
            .find(|a| a.kind == crate::AttachmentKind::Image)
        else {
            return Err(ProviderError::Unknown(
                "vision dispatch without an image attachment".into(),
            ));
        };

        let input = VisionInput {
            image_base64: image.data.clone(),
            prompt: build_analysis_prompt(message, context),
        };

        let analysis = self.vision.analyze(&input, VISION_TIMEOUT).await?;
        let content = format_analysis(&analysis, message);
        Ok(Reply::Vision { content, analysis })
    }
}

/// Merge the fixed analysis checklist, the learning context, and the
/// user's free-text question into one vision instruction.
pub fn build_analysis_prompt(question: &str, context: &KnowledgeContext) -> String {
    let mut prompt = String::from(
        "请分析这张图片中的学习内容，特别关注：\n\
         1. 图片中的文字内容（如题目、公式等）\n\
         2. 数学公式或图形的识别\n\
         3. 题目的解题思路和步骤\n\
         4. 涉及的学科领域和难度等级\n\
         5. 相关的知识点和后续学习建议\n\n",
    );

    if context.subject.is_some() || context.chapter.is_some() || context.concept.is_some() {
        prompt.push_str("当前学习上下文：\n");
        if let Some(subject) = &context.subject {
            prompt.push_str(&format!("- 学科：{subject}\n"));
        }
        if let Some(chapter) = &context.chapter {
            prompt.push_str(&format!("- 章节：{chapter}\n"));
        }
        if let Some(concept) = &context.concept {
            prompt.push_str(&format!("- 知识点：{}\n", concept.title));
        }
        prompt.push('\n');
    }

    if !question.trim().is_empty() {
        prompt.push_str(&format!("用户的具体问题：{question}\n\n"));
    }

    prompt.push_str("请用中文回答，语言要清晰易懂，适合学生理解。如果是数学题，请提供详细的解题步骤。");
    prompt
}

/// Flatten a structured analysis into the same turn shape text answers
/// use, so downstream consumers need not distinguish turn origin.
pub fn format_analysis(analysis: &VisionAnalysis, question: &str) -> String {
    let mut response = String::from("📸 **图片分析结果**\n\n");
    response.push_str(&format!("**图片内容：**\n{}\n\n", analysis.description));

    if !analysis.formulas.is_empty() {
        response.push_str("**识别到的数学公式：**\n");
        for (index, formula) in analysis.formulas.iter().enumerate() {
            response.push_str(&format!("{}. {formula}\n", index + 1));
        }
        response.push('\n');
    }

    if !analysis.subjects.is_empty() {
        response.push_str(&format!("**涉及学科：** {}\n\n", analysis.subjects.join("、")));
    }

    if let Some(difficulty) = analysis.difficulty {
        let label = match difficulty {
            crate::Difficulty::Basic => "基础",
            crate::Difficulty::Intermediate => "中等",
            crate::Difficulty::Advanced => "高级",
        };
        response.push_str(&format!("**难度等级：** {label}\n\n"));
    }

    if !analysis.suggestions.is_empty() {
        response.push_str("**学习建议：**\n");
        for (index, suggestion) in analysis.suggestions.iter().enumerate() {
            response.push_str(&format!("{}. {suggestion}\n", index + 1));
        }
        response.push('\n');
    }

    if !question.trim().is_empty() {
        response.push_str(
            "**针对你的问题：**\n基于图片内容，我建议你从以上分析入手。如果某个步骤需要更详细的解答，请告诉我。\n\n",
        );
    }

    response.push_str("💡 **提示：** 如果你需要更详细的解题步骤或有其他疑问，请继续提问！");
    response
}
