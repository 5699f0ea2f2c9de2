//! 请求模式检测 - 业务能力层
//!
//! 根据会话历史判断新请求是否像是在逐段还原原文。
//! 这是威慑手段而非安全边界：换一种问法总能绕过，不保证没有漏判。

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::config::DetectionConfig;
use crate::models::{Decision, Exchange, OrdinalRef, RequestSignals, Session, SuspicionReason};

/// 直接要求导出大段内容，命中即拒绝
static EXTRACTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"extract\s+(?:all|complete|entire|full|whole)\s+(?:the\s+)?(?:text|content|document|assignment|pdf)",
        r"(?:show|give|provide|print|display)\s+(?:me|us)?\s*(?:the\s+)?(?:all|complete|entire|full|whole)\s+(?:text|content|document|assignment|pdf)",
        r"(?:copy|paste)\s+(?:all|complete|entire|full|whole)\s+(?:the\s+)?(?:text|content|document|assignment|pdf)",
        r"(?:show|give|provide|print)\s+(?:me|us)?\s*(?:the\s+)?(?:text|content)\s+word\s+(?:for|by)\s+word",
        r#"(?:what|show)\s+(?:is|are|comes)\s+(?:right\s+)?(?:after|before)\s+["'].*?["']"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("extraction regex"))
    .collect()
});

/// "继续/下一段"类请求
static CONTINUATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bcontinue\b",
        r"\bkeep\s+going\b",
        r"\bgo\s+on\b",
        r"\bproceed\b",
        r"where\s+you\s+(?:left|stopped)\s+off",
        r"\b(?:next|following|remaining|subsequent)\s+(?:\d+\s+)?(?:words?|lines?|sentences?|paragraphs?|parts?|sections?|pages?|chunks?|bits?|portions?)\b",
        r"\b(?:the\s+)?rest\s+of\s+(?:the\s+)?(?:text|content|document|section|paragraph|page|assignment)",
        r"\bthen\s+what\b",
        r"\bwhat\s+(?:follows|happens\s+next|comes\s+next)\b",
        r"\b(?:previous|preceding|prior)\s+(?:\d+\s+)?(?:words?|lines?|sentences?|paragraphs?|parts?|sections?|pages?)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("continuation regex"))
    .collect()
});

static ORDINAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(paragraph|section|page|chapter|line|sentence|part|step|slide|chunk)s?\s*(?:#|no\.?\s*|number\s+)?(\d{1,4}|one|two|three|four|five|six|seven|eight|nine|ten)\b",
    )
    .expect("ordinal regex")
});

/// 要求原样给出内容的动词
static RETRIEVAL_VERB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:give|show|print|quote|write|type|reproduce|output|display|read|recite|paste)\b")
        .expect("retrieval verb regex")
});

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").expect("word regex"));

static NUMBER_WORDS: phf::Map<&'static str, u32> = phf::phf_map! {
    "one" => 1, "two" => 2, "three" => 3, "four" => 4, "five" => 5,
    "six" => 6, "seven" => 7, "eight" => 8, "nine" => 9, "ten" => 10,
};

/// 待判断的请求
#[derive(Debug, Clone, Copy)]
pub struct PendingRequest<'a> {
    pub question: &'a str,
    /// 检索器为该问题挑出的片段序号
    pub chunk_ids: &'a [usize],
}

/// 检测结果：结论 + 记录进历史的请求特征
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: Decision,
    pub signals: RequestSignals,
}

/// 可替换的请求检测策略
pub trait RequestPolicy: Send + Sync {
    fn evaluate(&self, session: &Session, request: &PendingRequest<'_>, now: DateTime<Utc>) -> Evaluation;
}

/// 默认的启发式策略
#[derive(Debug, Clone)]
pub struct HeuristicPolicy {
    config: DetectionConfig,
}

impl HeuristicPolicy {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    /// 从问题中提取特征（不看历史之外的任何东西）
    pub fn signals(&self, question: &str, recent: &[Exchange], chunk_ids: &[usize]) -> RequestSignals {
        let lower = question.to_lowercase();
        let extraction = is_extraction_request(&lower);
        let ordinal = parse_ordinal(&lower);

        let steps_from_previous = ordinal.as_ref().is_some_and(|current| {
            recent.iter().filter_map(|e| e.signals.ordinal.as_ref()).any(|prev| {
                prev.unit == current.unit && prev.number.abs_diff(current.number) == 1
            })
        });
        let positional_retrieval = ordinal.is_some() && RETRIEVAL_VERB.is_match(&lower);

        RequestSignals {
            extraction,
            continuation: is_continuation(&lower) || steps_from_previous || positional_retrieval,
            ordinal,
            chunk_ids: chunk_ids.to_vec(),
        }
    }

    fn throttle(&self, reason: SuspicionReason) -> Decision {
        Decision::Throttle {
            delay: self.config.throttle_delay(),
            reason,
        }
    }

    /// 最近连续多次问同一区域、且问题几乎相同
    fn is_repeated_region(&self, recent: &[Exchange], question: &str, chunk_ids: &[usize]) -> bool {
        let needed = self.config.max_consecutive_overlaps;
        if needed == 0 || recent.len() < needed || chunk_ids.is_empty() {
            return false;
        }
        recent.iter().rev().take(needed).all(|e| {
            overlaps(&e.signals.chunk_ids, chunk_ids)
                && similarity(&e.question, question) >= self.config.similarity_threshold
        })
    }

    /// 窗口内大量"几乎相同的问题"却命中互不相交的区域
    fn is_rephrase_scan(&self, recent: &[Exchange], question: &str, chunk_ids: &[usize]) -> bool {
        if recent.is_empty() || chunk_ids.is_empty() {
            return false;
        }
        let scanning = recent
            .iter()
            .filter(|e| {
                !e.signals.chunk_ids.is_empty()
                    && !overlaps(&e.signals.chunk_ids, chunk_ids)
                    && similarity(&e.question, question) >= self.config.similarity_threshold
            })
            .count();
        scanning >= 2 && scanning as f64 / recent.len() as f64 >= self.config.rephrase_ratio
    }
}

impl RequestPolicy for HeuristicPolicy {
    fn evaluate(&self, session: &Session, request: &PendingRequest<'_>, now: DateTime<Utc>) -> Evaluation {
        let recent = session.recent(self.config.window(), self.config.history_depth, now);
        let signals = self.signals(request.question, recent, request.chunk_ids);

        let decision = if signals.extraction {
            Decision::Block {
                reason: SuspicionReason::ExtractionRequest,
            }
        } else if signals.continuation && sequential_count(recent) >= self.config.sequential_threshold {
            Decision::Block {
                reason: SuspicionReason::SequentialScan,
            }
        } else if self.is_repeated_region(recent, request.question, request.chunk_ids) {
            Decision::Block {
                reason: SuspicionReason::RepeatedRegion,
            }
        } else if signals.continuation && sequential_count(recent) + 1 == self.config.sequential_threshold {
            self.throttle(SuspicionReason::SequentialScan)
        } else if self.is_rephrase_scan(recent, request.question, request.chunk_ids) {
            self.throttle(SuspicionReason::RephraseScan)
        } else {
            Decision::Allow
        };

        debug!(
            "{} 请求检测: {:?} (窗口内 {} 条, 连续请求 {} 条)",
            session.key,
            decision,
            recent.len(),
            sequential_count(recent)
        );

        Evaluation { decision, signals }
    }
}

fn sequential_count(recent: &[Exchange]) -> usize {
    recent.iter().filter(|e| e.signals.continuation).count()
}

pub fn is_extraction_request(lower: &str) -> bool {
    EXTRACTION_PATTERNS.iter().any(|p| p.is_match(lower))
}

pub fn is_continuation(lower: &str) -> bool {
    CONTINUATION_PATTERNS.iter().any(|p| p.is_match(lower))
}

fn parse_ordinal(lower: &str) -> Option<OrdinalRef> {
    let caps = ORDINAL.captures(lower)?;
    let unit = caps.get(1)?.as_str().to_string();
    let raw = caps.get(2)?.as_str();
    let number = raw
        .parse::<u32>()
        .ok()
        .or_else(|| NUMBER_WORDS.get(raw).copied())?;
    Some(OrdinalRef { unit, number })
}

fn overlaps(a: &[usize], b: &[usize]) -> bool {
    a.iter().any(|x| b.contains(x))
}

/// 词集 Jaccard 相似度
pub fn similarity(a: &str, b: &str) -> f64 {
    let words = |s: &str| -> HashSet<String> {
        WORD.find_iter(&s.to_lowercase())
            .map(|m| m.as_str().to_string())
            .collect()
    };
    let (wa, wb) = (words(a), words(b));
    if wa.is_empty() && wb.is_empty() {
        return 1.0;
    }
    let inter = wa.intersection(&wb).count() as f64;
    let union = wa.union(&wb).count() as f64;
    inter / union
}
