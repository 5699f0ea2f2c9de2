//! LLM 服务 - 业务能力层
//!
//! 只负责"带保护规则地调用 LLM"能力，不关心流程
//!
//! ## 职责
//! - 组装最小上下文的提示词（系统规则 + 相关片段 + 问题）
//! - 单次调用超时，失败后自动重试（默认 1 次）
//! - 不做摘录限制，输出必须交给 `ExcerptLimiter`

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::clients::{LlmClient, LlmRequest};
use crate::config::Config;
use crate::error::LlmError;
use crate::models::Chunk;

/// LLM 服务
pub struct LlmService {
    client: Arc<dyn LlmClient>,
    timeout: Duration,
    max_retries: usize,
    max_excerpt_words: usize,
    max_quote_chars: usize,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(client: Arc<dyn LlmClient>, config: &Config) -> Self {
        Self {
            client,
            timeout: config.llm_timeout(),
            max_retries: config.llm_max_retries,
            max_excerpt_words: config.protection.max_excerpt_words,
            max_quote_chars: config.protection.max_quote_chars,
        }
    }

    /// 通用的 LLM 调用函数
    ///
    /// 每次尝试都有超时；失败后最多重试 `max_retries` 次，返回最后一次的错误
    pub async fn send_to_llm(&self, request: &LlmRequest) -> Result<String, LlmError> {
        let model = self.client.model().to_string();
        let attempts = self.max_retries + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            let result = match tokio::time::timeout(self.timeout, self.client.complete(request)).await {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout {
                    model: model.clone(),
                    timeout_secs: self.timeout.as_secs(),
                }),
            };

            match result {
                Ok(content) if content.trim().is_empty() => {
                    warn!("LLM 返回内容为空 (尝试 {}/{})", attempt, attempts);
                    last_error = Some(LlmError::EmptyContent { model: model.clone() });
                }
                Ok(content) => return Ok(content),
                Err(e) => {
                    warn!("LLM 调用失败 (尝试 {}/{}): {}", attempt, attempts, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(LlmError::EmptyContent { model }))
    }

    /// 根据相关片段回答问题
    pub async fn answer_from_context(&self, question: &str, chunks: &[&Chunk]) -> Result<String, LlmError> {
        let request = LlmRequest::new(self.answer_system_message(), build_context_message(question, chunks));
        debug!("回答问题，上下文片段数: {}", chunks.len());
        self.send_to_llm(&request).await
    }

    /// 第二轮：只输出高层次概括，不含原文
    pub async fn summarize_without_extraction(&self, question: &str, chunks: &[&Chunk]) -> Result<String, LlmError> {
        let request = LlmRequest::new(self.summary_system_message(), build_context_message(question, chunks))
            .with_max_tokens(300);
        debug!("请求受保护的概括回答");
        self.send_to_llm(&request).await
    }

    /// 生成导航问题（原始 JSON 文本，由调用方解析）
    pub async fn suggest_questions(&self, prompt: &str) -> Result<String, LlmError> {
        let request = LlmRequest::new(
            "You are an assistant that generates helpful navigation questions for document exploration. \
             Your questions should be insightful and help evaluators understand the document deeply.",
            prompt,
        )
        .with_temperature(0.7)
        .with_max_tokens(500);
        self.send_to_llm(&request).await
    }

    fn answer_system_message(&self) -> String {
        format!(
            r#"You are a secure academic assistant helping evaluate an assignment. Follow these strict rules:

1. Answer ONLY based on the provided context. If the answer is not in the context, say "I don't have information about that in this assignment."
2. Do not use any external knowledge beyond the provided context.
3. Do not reproduce more than {words} consecutive words of the assignment verbatim.
4. Keep direct quotes under {chars} characters and always put them in quotation marks.
5. Prefer paraphrasing over quoting whenever possible.
6. Never provide complete code solutions or full paragraphs from the assignment.
7. If asked to extract large sections of content, refuse and explain the policy.

Your purpose is to help evaluate the quality of the work while protecting the assignment content."#,
            words = self.max_excerpt_words,
            chars = self.max_quote_chars,
        )
    }

    fn summary_system_message(&self) -> String {
        "Answer the question with a high-level summary of the context. Focus on general concepts and ideas \
         rather than specific details. Do not include any direct quotes longer than a few words. Make the \
         answer abstract enough that the original text cannot be reconstructed from it, while still \
         conveying the main points."
            .to_string()
    }
}

/// 构建用户消息：问题 + 相关片段
fn build_context_message(question: &str, chunks: &[&Chunk]) -> String {
    let context: String = chunks
        .iter()
        .map(|c| format!("\n[page {}]\n{}\n", c.page, c.text))
        .collect();
    format!("Question: {}\n\nContext from the assignment:\n{}", question, context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 前 `failures` 次失败，之后返回固定文本
    struct FlakyClient {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        fn model(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _request: &LlmRequest) -> Result<String, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(LlmError::RateLimited {
                    model: "flaky".to_string(),
                })
            } else {
                Ok("  ok  ".to_string())
            }
        }
    }

    struct SlowClient;

    #[async_trait]
    impl LlmClient for SlowClient {
        fn model(&self) -> &str {
            "slow"
        }

        async fn complete(&self, _request: &LlmRequest) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }
    }

    fn service(client: Arc<dyn LlmClient>) -> LlmService {
        let mut config = Config::default();
        config.llm_timeout_secs = 1;
        LlmService::new(client, &config)
    }

    #[tokio::test]
    async fn test_single_retry_recovers() {
        let client = Arc::new(FlakyClient {
            failures: 1,
            calls: AtomicUsize::new(0),
        });
        let result = service(client.clone()).send_to_llm(&LlmRequest::new("s", "u")).await;

        assert_eq!(result.unwrap(), "  ok  ");
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_one_retry() {
        let client = Arc::new(FlakyClient {
            failures: 5,
            calls: AtomicUsize::new(0),
        });
        let result = service(client.clone()).send_to_llm(&LlmRequest::new("s", "u")).await;

        assert!(matches!(result, Err(LlmError::RateLimited { .. })));
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let result = service(Arc::new(SlowClient)).send_to_llm(&LlmRequest::new("s", "u")).await;
        assert!(matches!(result, Err(LlmError::Timeout { timeout_secs: 1, .. })));
    }

    #[test]
    fn test_context_message_contains_only_given_chunks() {
        let chunk = Chunk {
            index: 2,
            text: "Relevant part.".to_string(),
            page: 3,
            start_char: 0,
            end_char: 14,
            topics: vec![],
        };
        let message = build_context_message("What is it?", &[&chunk]);
        assert!(message.starts_with("Question: What is it?"));
        assert!(message.contains("[page 3]\nRelevant part."));
    }
}
