//! 摘录限制 - 业务能力层
//!
//! 对 LLM 的原始回答做后处理：找出与原文（忽略大小写和标点）几乎逐字相同的连续词序列，
//! 超过上限的部分替换为截断标记；过长的引号引用也会被缩短。
//!
//! "几乎逐字"：以 `seed_words` 个连续相同词为种子定位抄写位置，相邻种子之间
//! 最多夹杂 `max_gap_words` 个改动词时仍算同一段摘录，零星改词无法绕过上限。
//! 只改写回答本身，不会把原文中被隐藏的内容重新带出来。

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::config::ProtectionConfig;

/// 截断标记
pub const EXCERPT_MARKER: &str = "[excerpt truncated]";

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+(?:['’][\p{L}\p{N}]+)*").expect("word regex"));

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"]+)"|“([^”]+)”"#).expect("quote regex"));

/// 一个归一化后的词及其在原字符串中的字节范围
struct Token {
    norm: String,
    span: Range<usize>,
}

fn tokenize(text: &str) -> Vec<Token> {
    WORD.find_iter(text)
        .map(|m| Token {
            norm: m.as_str().to_lowercase().replace('’', "'"),
            span: m.range(),
        })
        .collect()
}

fn window_hash(words: &[Token]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for w in words {
        w.norm.hash(&mut hasher);
    }
    hasher.finish()
}

/// 原文的 n 元词组索引
pub struct SourceIndex {
    n: usize,
    max_gap: usize,
    grams: HashSet<u64>,
}

impl SourceIndex {
    /// `seed_words`: 种子长度（n 元词组的 n）；`max_gap`: 两段种子之间允许的改动词数
    pub fn new(source: &str, seed_words: usize, max_gap: usize) -> Self {
        let tokens = tokenize(source);
        let grams = if seed_words == 0 || tokens.len() < seed_words {
            HashSet::new()
        } else {
            tokens.windows(seed_words).map(window_hash).collect()
        };
        Self {
            n: seed_words,
            max_gap,
            grams,
        }
    }

    fn contains(&self, window: &[Token]) -> bool {
        window.len() == self.n && self.grams.contains(&window_hash(window))
    }

    /// 标记回答中每个词是否落在某个与原文相同的 n 元词组里
    fn coverage(&self, tokens: &[Token]) -> Vec<bool> {
        let mut covered = vec![false; tokens.len()];
        if self.n == 0 || tokens.len() < self.n {
            return covered;
        }
        for start in 0..=tokens.len() - self.n {
            if self.contains(&tokens[start..start + self.n]) {
                covered[start..start + self.n].iter_mut().for_each(|c| *c = true);
            }
        }
        covered
    }

    /// 回答中的抄写片段（词下标范围），间隔不超过 `max_gap` 的相邻片段合并
    fn copied_runs(&self, tokens: &[Token]) -> Vec<Range<usize>> {
        let covered = self.coverage(tokens);
        let mut runs: Vec<Range<usize>> = Vec::new();

        let mut i = 0;
        while i < covered.len() {
            if !covered[i] {
                i += 1;
                continue;
            }
            let start = i;
            while i < covered.len() && covered[i] {
                i += 1;
            }
            match runs.last_mut() {
                Some(prev) if start - prev.end <= self.max_gap => prev.end = i,
                _ => runs.push(start..i),
            }
        }
        runs
    }
}

/// 限制后的回答
#[derive(Debug, Clone, PartialEq)]
pub struct LimitedAnswer {
    pub text: String,
    /// 被截断的原文摘录段数
    pub truncated_excerpts: usize,
    /// 被缩短的引号引用数
    pub shortened_quotes: usize,
    pub original_words: usize,
    pub removed_words: usize,
    /// 截断后是否仍是一个可读的回答
    pub coherent: bool,
}

impl LimitedAnswer {
    pub fn was_modified(&self) -> bool {
        self.truncated_excerpts > 0 || self.shortened_quotes > 0
    }
}

/// 摘录限制器
#[derive(Debug, Clone)]
pub struct ExcerptLimiter {
    config: ProtectionConfig,
}

impl ExcerptLimiter {
    pub fn new(config: ProtectionConfig) -> Self {
        Self { config }
    }

    pub fn max_excerpt_words(&self) -> usize {
        self.config.max_excerpt_words
    }

    /// 为原文建立索引，种子长度不超过 `max_excerpt_words + 1`，保证逐字抄写一定能被发现
    pub fn index(&self, source: &str) -> SourceIndex {
        let seed = self.config.seed_words.clamp(1, self.config.max_excerpt_words + 1);
        SourceIndex::new(source, seed, self.config.max_gap_words)
    }

    /// 回答中是否仍有超过上限的抄写片段
    pub fn exceeds_limit(&self, text: &str, index: &SourceIndex) -> bool {
        exceeds_excerpt_limit(text, index, self.config.max_excerpt_words)
    }

    /// 对回答应用摘录限制
    pub fn limit(&self, answer: &str, source: &str) -> LimitedAnswer {
        self.limit_with_index(answer, &self.index(source))
    }

    pub fn limit_with_index(&self, answer: &str, index: &SourceIndex) -> LimitedAnswer {
        let original_words = tokenize(answer).len();
        let (quoted, shortened_quotes) = self.shorten_quotes(answer);
        let (text, truncated_excerpts, cut_words) = self.truncate_excerpts(&quoted, index);

        let retained = tokenize(&text)
            .len()
            .saturating_sub(truncated_excerpts * tokenize(EXCERPT_MARKER).len());
        let removed_words = original_words.saturating_sub(retained);
        let coherent = truncated_excerpts == 0
            || (retained >= self.config.min_coherent_words
                && retained as f64 >= original_words as f64 * self.config.min_retained_ratio);

        if truncated_excerpts > 0 || shortened_quotes > 0 {
            debug!(
                "摘录限制: 截断 {} 段 ({} 词), 缩短引用 {} 处, 保留 {}/{} 词, 连贯: {}",
                truncated_excerpts, cut_words, shortened_quotes, retained, original_words, coherent
            );
        }

        LimitedAnswer {
            text,
            truncated_excerpts,
            shortened_quotes,
            original_words,
            removed_words,
            coherent,
        }
    }

    /// 缩短超过字符上限的引号引用
    fn shorten_quotes(&self, answer: &str) -> (String, usize) {
        let max = self.config.max_quote_chars;
        let mut count = 0;
        let text = QUOTED
            .replace_all(answer, |caps: &regex::Captures| {
                let (inner, open, close) = match (caps.get(1), caps.get(2)) {
                    (Some(m), _) => (m.as_str(), "\"", "\""),
                    (None, Some(m)) => (m.as_str(), "“", "”"),
                    _ => return caps[0].to_string(),
                };
                if inner.chars().count() <= max {
                    return caps[0].to_string();
                }
                count += 1;
                let kept: String = inner.chars().take(max.saturating_sub(3)).collect();
                format!("{}{}...{}", open, kept, close)
            })
            .into_owned();
        (text, count)
    }

    /// 每段抄写片段只保留前 `max_excerpt_words` 个词
    fn truncate_excerpts(&self, answer: &str, index: &SourceIndex) -> (String, usize, usize) {
        let keep = self.config.max_excerpt_words;
        let tokens = tokenize(answer);

        let mut out = String::with_capacity(answer.len());
        let mut cursor = 0;
        let mut runs = 0;
        let mut cut_words = 0;

        for run in index.copied_runs(&tokens) {
            if run.len() <= keep {
                continue;
            }

            // 保留 [start, start + keep)，删除 [start + keep, end)
            let cut_from = if keep == 0 {
                tokens[run.start].span.start
            } else {
                tokens[run.start + keep - 1].span.end
            };
            let cut_to = tokens[run.end - 1].span.end;
            out.push_str(&answer[cursor..cut_from]);
            out.push(' ');
            out.push_str(EXCERPT_MARKER);
            cursor = cut_to;
            runs += 1;
            cut_words += run.len() - keep;
        }
        out.push_str(&answer[cursor..]);

        (out, runs, cut_words)
    }
}

/// 检查文本中是否还有超过 `max_words` 个词的抄写片段（截断标记视为分隔）
pub fn exceeds_excerpt_limit(text: &str, index: &SourceIndex, max_words: usize) -> bool {
    text.split(EXCERPT_MARKER).any(|segment| {
        let tokens = tokenize(segment);
        index.copied_runs(&tokens).iter().any(|run| run.len() > max_words)
    })
}
