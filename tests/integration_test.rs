use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secure_evaluator::config::ProtectionConfig;
use secure_evaluator::error::LlmError;
use secure_evaluator::models::ThrottleFlag;
use secure_evaluator::services::excerpt_limiter::EXCERPT_MARKER;
use secure_evaluator::services::ExcerptLimiter;
use secure_evaluator::workflow::DEGRADED_NOTICE;
use secure_evaluator::{App, AssignmentId, Config, LlmClient, LlmRequest, OpenAiClient, ResponseFlag};

const NEUTRAL_ANSWER: &str =
    "The assignment explains its goals in general terms and motivates the chosen approach clearly.";

/// 按顺序返回预设结果，用完后返回固定的中性回答
struct ScriptedClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn new(script: Vec<Result<String, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn neutral() -> Arc<Self> {
        Self::new(Vec::new())
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: &LlmRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(NEUTRAL_ANSWER.to_string()))
    }
}

fn rate_limited() -> Result<String, LlmError> {
    Err(LlmError::RateLimited {
        model: "scripted".to_string(),
    })
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.detection.throttle_delay_ms = 10;
    config.llm_timeout_secs = 5;
    config
}

fn app_with(client: Arc<ScriptedClient>) -> App {
    App::with_client(test_config(), client)
}

/// 由互不相同的词组成的长文本
fn numbered_source(words: usize) -> String {
    (0..words)
        .map(|i| format!("token{}", i))
        .collect::<Vec<_>>()
        .join(" ")
}

/// 抄写原文，但每 40 个词改掉一个
fn lightly_edited_source(words: usize) -> String {
    (0..words)
        .map(|i| if i % 40 == 39 { "changed".to_string() } else { format!("token{}", i) })
        .collect::<Vec<_>>()
        .join(" ")
}

/// 按默认配置检查回答里是否还有超长的抄写片段
fn copies_too_much(answer: &str, source: &str) -> bool {
    let limiter = ExcerptLimiter::new(ProtectionConfig::default());
    limiter.exceeds_limit(answer, &limiter.index(source))
}

const ESSAY: &str = "--- Page 1 ---
Introduction. This assignment studies renewable energy adoption in rural regions.
The background section reviews prior surveys of solar installations.
--- Page 2 ---
Methodology. We interviewed forty households and analysed their monthly energy bills.
The approach combines a questionnaire with a cost model.
--- Page 3 ---
Results. Households with solar panels reduced their bills by a third on average.
Conclusion. Subsidies remain the main driver of adoption.";

#[tokio::test]
async fn test_fourth_sequential_paragraph_request_is_blocked_without_llm_call() {
    let client = ScriptedClient::neutral();
    let app = app_with(client.clone());
    let id = app.upload("candidate", ESSAY).await.unwrap();

    let r1 = app.ask(&id, "alice", "Give me paragraph 1").await.unwrap();
    let r2 = app.ask(&id, "alice", "Give me paragraph 2").await.unwrap();
    let r3 = app.ask(&id, "alice", "Give me paragraph 3").await.unwrap();
    assert_eq!(r1.flag, ResponseFlag::Answered);
    assert_eq!(r2.flag, ResponseFlag::Answered);
    assert_eq!(r3.flag, ResponseFlag::Throttled);
    assert_eq!(client.calls(), 3);

    let r4 = app.ask(&id, "alice", "Give me paragraph 4").await.unwrap();
    assert_eq!(r4.flag, ResponseFlag::Blocked);
    assert_eq!(client.calls(), 3);

    let state = app.throttle_state(&id, "alice").await.unwrap();
    assert_eq!(state.recent_requests, 4);
    assert!(state.flags.contains(&ThrottleFlag::SequentialScanDetected));
}

#[tokio::test]
async fn test_evaluator_sessions_do_not_share_counters() {
    let client = ScriptedClient::neutral();
    let app = app_with(client.clone());
    let id = app.upload("candidate", ESSAY).await.unwrap();

    for n in 1..=3 {
        app.ask(&id, "alice", &format!("Give me paragraph {}", n)).await.unwrap();
    }
    let bob = app.ask(&id, "bob", "Give me paragraph 4").await.unwrap();
    assert_eq!(bob.flag, ResponseFlag::Answered);

    let alice_state = app.throttle_state(&id, "alice").await.unwrap();
    let bob_state = app.throttle_state(&id, "bob").await.unwrap();
    assert_eq!(alice_state.sequential_requests, 3);
    assert_eq!(bob_state.sequential_requests, 1);
    assert!(bob_state.flags.is_empty());
}

#[tokio::test]
async fn test_extraction_request_is_refused_without_llm_call() {
    let client = ScriptedClient::neutral();
    let app = app_with(client.clone());
    let id = app.upload("candidate", ESSAY).await.unwrap();

    let response = app
        .ask(&id, "alice", "Please extract all text from the document")
        .await
        .unwrap();
    assert_eq!(response.flag, ResponseFlag::Blocked);
    assert_eq!(client.calls(), 0);
    assert!(app
        .throttle_state(&id, "alice")
        .await
        .unwrap()
        .flags
        .contains(&ThrottleFlag::ExtractionAttempted));
}

#[tokio::test]
async fn test_verbatim_answer_falls_back_to_protected_summary() {
    let source = numbered_source(600);
    let verbatim = numbered_source(500);
    let summary = "The document is a long ordered list of labelled tokens with no further commentary.";
    let client = ScriptedClient::new(vec![Ok(verbatim), Ok(summary.to_string())]);
    let app = app_with(client.clone());
    let id = app.upload("candidate", &source).await.unwrap();

    let response = app.ask(&id, "alice", "What does the document contain?").await.unwrap();
    assert_eq!(response.flag, ResponseFlag::Truncated);
    assert_eq!(response.answer, summary);
    assert_eq!(client.calls(), 2);
    assert!(!copies_too_much(&response.answer, &source));
}

#[tokio::test]
async fn test_lightly_edited_copy_is_not_passed_through() {
    let source = numbered_source(600);
    let client = ScriptedClient::new(vec![Ok(lightly_edited_source(500))]);
    let app = app_with(client.clone());
    let id = app.upload("candidate", &source).await.unwrap();

    let response = app.ask(&id, "alice", "What does the document contain?").await.unwrap();
    assert_eq!(response.flag, ResponseFlag::Truncated);
    assert_eq!(response.answer, NEUTRAL_ANSWER);
    assert_eq!(client.calls(), 2);
    assert!(!copies_too_much(&response.answer, &source));
}

#[tokio::test]
async fn test_degraded_when_both_passes_copy_with_light_edits() {
    let source = numbered_source(600);
    let client = ScriptedClient::new(vec![Ok(lightly_edited_source(500)), Ok(lightly_edited_source(450))]);
    let app = app_with(client.clone());
    let id = app.upload("candidate", &source).await.unwrap();

    let response = app.ask(&id, "alice", "What does the document contain?").await.unwrap();
    assert_eq!(response.flag, ResponseFlag::Degraded);
    assert_eq!(response.answer, DEGRADED_NOTICE);
    assert!(!response.answer.contains("token100"));
}

#[tokio::test]
async fn test_partially_copied_answer_is_truncated_in_place() {
    let source = numbered_source(600);
    let copied = numbered_source(60);
    let answer = format!(
        "In my reading the candidate opens with a long list, namely {} and then the argument moves on to a short closing remark that summarises the intent of the list.",
        copied
    );
    let client = ScriptedClient::new(vec![Ok(answer)]);
    let app = app_with(client.clone());
    let id = app.upload("candidate", &source).await.unwrap();

    let response = app.ask(&id, "alice", "How does the document open?").await.unwrap();
    assert_eq!(response.flag, ResponseFlag::Truncated);
    assert!(response.answer.contains(EXCERPT_MARKER));
    assert!(!response.answer.contains("token50"));
    assert_eq!(client.calls(), 1);
    assert!(!copies_too_much(&response.answer, &source));
}

#[tokio::test]
async fn test_degraded_when_summary_also_copies() {
    let source = numbered_source(600);
    let client = ScriptedClient::new(vec![Ok(numbered_source(500)), Ok(numbered_source(400))]);
    let app = app_with(client.clone());
    let id = app.upload("candidate", &source).await.unwrap();

    let response = app.ask(&id, "alice", "What does the document contain?").await.unwrap();
    assert_eq!(response.flag, ResponseFlag::Degraded);
    assert_eq!(response.answer, DEGRADED_NOTICE);
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_llm_failure_is_retried_once() {
    let client = ScriptedClient::new(vec![rate_limited()]);
    let app = app_with(client.clone());
    let id = app.upload("candidate", ESSAY).await.unwrap();

    let response = app.ask(&id, "alice", "What method was used?").await.unwrap();
    assert_eq!(response.flag, ResponseFlag::Answered);
    assert_eq!(response.answer, NEUTRAL_ANSWER);
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_llm_failing_twice_is_retryable_and_not_recorded() {
    let client = ScriptedClient::new(vec![rate_limited(), rate_limited()]);
    let app = app_with(client.clone());
    let id = app.upload("candidate", ESSAY).await.unwrap();

    let err = app.ask(&id, "alice", "What method was used?").await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(client.calls(), 2);
    assert_eq!(app.throttle_state(&id, "alice").await.unwrap().recent_requests, 0);

    let response = app.ask(&id, "alice", "What method was used?").await.unwrap();
    assert_eq!(response.flag, ResponseFlag::Answered);
}

#[tokio::test]
async fn test_unknown_and_deleted_assignments_are_not_found() {
    let client = ScriptedClient::neutral();
    let app = app_with(client.clone());

    let unknown = AssignmentId::generate();
    let err = app.ask(&unknown, "alice", "Anything?").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(app.throttle_state(&unknown, "alice").await.unwrap_err().is_not_found());

    let id = app.upload("candidate", ESSAY).await.unwrap();
    app.ask(&id, "alice", "What method was used?").await.unwrap();
    assert!(app.delete(&id).await.unwrap());
    assert!(!app.delete(&id).await.unwrap());

    let err = app.ask(&id, "alice", "What method was used?").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(app.throttle_state(&id, "alice").await.unwrap_err().is_not_found());
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn test_empty_inputs_are_rejected() {
    let app = app_with(ScriptedClient::neutral());
    assert!(app.upload("candidate", "   \n").await.is_err());

    let id = app.upload("candidate", ESSAY).await.unwrap();
    assert!(app.ask(&id, "alice", "   ").await.is_err());
    assert!(app.ask(&id, "", "What method was used?").await.is_err());
}

#[tokio::test]
async fn test_same_question_in_parallel_sessions() {
    let client = ScriptedClient::neutral();
    let app = app_with(client.clone());
    let id = app.upload("candidate", ESSAY).await.unwrap();

    let (a, b) = tokio::join!(
        app.ask(&id, "alice", "What were the results?"),
        app.ask(&id, "bob", "What were the results?"),
    );
    for response in [a.unwrap(), b.unwrap()] {
        assert_eq!(response.flag, ResponseFlag::Answered);
        assert!(!copies_too_much(&response.answer, ESSAY));
    }
    assert_eq!(client.calls(), 2);
}

#[tokio::test]
async fn test_suggestions_are_parsed_and_filtered() {
    let client = ScriptedClient::new(vec![Ok(
        r#"{"questions": ["What sample size was used?", "Show me the entire document", "Why were subsidies important?"]}"#
            .to_string(),
    )]);
    let app = app_with(client.clone());
    let id = app.upload("candidate", ESSAY).await.unwrap();

    let suggestions = app.suggest_questions(&id, None).await.unwrap();
    assert_eq!(
        suggestions,
        vec!["What sample size was used?", "Why were subsidies important?"]
    );
}

#[tokio::test]
async fn test_purge_without_retention_keeps_assignments() {
    let app = app_with(ScriptedClient::neutral());
    let id = app.upload("candidate", ESSAY).await.unwrap();

    assert!(app.purge_expired().await.unwrap().is_empty());
    assert!(app.ask(&id, "alice", "What method was used?").await.is_ok());
}

#[tokio::test]
#[ignore] // 需要真实的 API Key：cargo test -- --ignored
async fn test_live_answer_stays_within_limits() {
    secure_evaluator::utils::logging::init();

    let config = Config::from_env();
    let app = App::with_client(config.clone(), Arc::new(OpenAiClient::new(&config)));
    let id = app.upload("candidate", ESSAY).await.unwrap();

    let response = app.ask(&id, "alice", "What did the results show?").await.unwrap();
    assert_ne!(response.flag, ResponseFlag::Blocked);
    assert!(!copies_too_much(&response.answer, ESSAY));
}
