//! 文本分块与片段检索 - 业务能力层
//!
//! 只负责"把文档切成片段、挑出和问题相关的片段"，不关心流程

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

static PAGE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"---\s*Page\s+\d+\s*---").expect("page marker regex"));

/// 句子：到句末标点（含其后的引号/括号和空白）为止，或到文本结尾
static SENTENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[^.!?]+(?:[.!?]+["')\]]*\s*|$)|[.!?]+\s*"#).expect("sentence regex")
});

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").expect("word regex"));

/// 主题关键词表
static TOPIC_KEYWORDS: phf::OrderedMap<&'static str, &'static [&'static str]> = phf::phf_ordered_map! {
    "introduction" => &["introduction", "overview", "background", "begin", "start"],
    "methodology" => &["method", "approach", "procedure", "technique", "algorithm"],
    "results" => &["result", "finding", "outcome", "analysis", "data", "figure", "table"],
    "discussion" => &["discuss", "implication", "interpret", "meaning", "significance"],
    "conclusion" => &["conclusion", "summary", "future work", "recommend", "end"],
    "reference" => &["reference", "citation", "bibliography", "cite", "source"],
    "code" => &["function", "class", "method", "variable", "code", "algorithm", "pseudo"],
};

/// 检索时忽略的常见词
static STOPWORDS: phf::Set<&'static str> = phf::phf_set! {
    "the", "and", "for", "are", "was", "were", "what", "which", "who", "how", "why",
    "this", "that", "with", "from", "does", "did", "about", "into", "their", "there",
    "you", "your", "can", "give", "tell", "show", "please",
};

/// 一个句子及其在页内的字符起点
struct Sentence<'a> {
    start_char: usize,
    text: &'a str,
}

/// 将文档切分为带重叠的片段
///
/// 先按 `--- Page N ---` 分页，再在页内按句子累积，超过 `max_chunk_chars`
/// 时输出一个片段，并把末尾不超过 `overlap_chars` 的若干完整句子带入下一个片段
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for (page_number, (page_offset, page_text)) in split_pages(text).into_iter().enumerate() {
        let sentences = split_sentences(page_text);
        let mut current: Vec<&Sentence> = Vec::new();
        let mut current_len = 0usize;

        for sentence in &sentences {
            let sentence_len = sentence.text.chars().count();
            if current_len + sentence_len > config.max_chunk_chars && !current.is_empty() {
                chunks.push(build_chunk(chunks.len(), page_number + 1, page_offset, &current));

                // 从末尾向前取完整句子作为重叠部分
                let mut remaining = config.overlap_chars.min(current_len);
                let mut keep_from = current.len();
                for (i, s) in current.iter().enumerate().rev() {
                    let len = s.text.chars().count();
                    if len > remaining {
                        break;
                    }
                    remaining -= len;
                    keep_from = i;
                }
                current.drain(..keep_from);
                current_len = current.iter().map(|s| s.text.chars().count()).sum();
            }

            current.push(sentence);
            current_len += sentence_len;
        }

        if !current.is_empty() {
            chunks.push(build_chunk(chunks.len(), page_number + 1, page_offset, &current));
        }
    }

    for chunk in &mut chunks {
        chunk.topics = identify_topics(&chunk.text);
    }

    debug!("文档分块完成，共 {} 个片段", chunks.len());
    chunks
}

/// 按分页标记切分，返回 (页起始字符位置, 页文本)，跳过空页
fn split_pages(text: &str) -> Vec<(usize, &str)> {
    let mut pages = Vec::new();
    let mut last_byte = 0;

    let mut push_page = |start_byte: usize, end_byte: usize| {
        let page = &text[start_byte..end_byte];
        if !page.trim().is_empty() {
            pages.push((text[..start_byte].chars().count(), page));
        }
    };

    for marker in PAGE_MARKER.find_iter(text) {
        push_page(last_byte, marker.start());
        last_byte = marker.end();
    }
    push_page(last_byte, text.len());

    pages
}

fn split_sentences(page: &str) -> Vec<Sentence<'_>> {
    let mut sentences = Vec::new();
    let mut last_byte = 0;
    let mut last_char = 0;

    for m in SENTENCE.find_iter(page) {
        if m.as_str().trim().is_empty() {
            continue;
        }
        last_char += page[last_byte..m.start()].chars().count();
        last_byte = m.start();
        sentences.push(Sentence {
            start_char: last_char,
            text: m.as_str(),
        });
    }

    sentences
}

fn build_chunk(index: usize, page: usize, page_offset: usize, sentences: &[&Sentence]) -> Chunk {
    let text: String = sentences.iter().map(|s| s.text).collect();
    let start_char = page_offset + sentences.first().map(|s| s.start_char).unwrap_or(0);
    Chunk {
        index,
        page,
        start_char,
        end_char: start_char + text.chars().count(),
        text,
        topics: Vec::new(),
    }
}

/// 基于关键词的粗略主题标注
pub fn identify_topics(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let topics: Vec<String> = TOPIC_KEYWORDS
        .entries()
        .filter(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(topic, _)| topic.to_string())
        .collect();

    if topics.is_empty() {
        vec!["content".to_string()]
    } else {
        topics
    }
}

/// 片段检索能力
///
/// 选出与问题相关的片段。默认实现是关键词计数，可替换为向量检索等外部组件。
pub trait ChunkRetriever: Send + Sync {
    fn relevant_chunks<'a>(&self, question: &str, chunks: &'a [Chunk], top_k: usize) -> Vec<&'a Chunk>;
}

/// 关键词检索
///
/// 按片段中出现的问题词数量排序；都不相关时退回第一个片段
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordRetriever;

impl ChunkRetriever for KeywordRetriever {
    fn relevant_chunks<'a>(&self, question: &str, chunks: &'a [Chunk], top_k: usize) -> Vec<&'a Chunk> {
        let query_words = query_terms(question);

        let mut scored: Vec<(usize, &Chunk)> = chunks
            .iter()
            .map(|chunk| {
                let lower = chunk.text.to_lowercase();
                let score = query_words.iter().filter(|w| lower.contains(w.as_str())).count();
                (score, chunk)
            })
            .collect();
        // 稳定排序，同分时保持文档顺序
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let mut top: Vec<&Chunk> = scored
            .into_iter()
            .take(top_k)
            .filter(|(score, _)| *score > 0)
            .map(|(_, chunk)| chunk)
            .collect();

        if top.is_empty() {
            if let Some(first) = chunks.first() {
                top.push(first);
            }
        }

        debug!(
            "检索到 {} 个相关片段: {:?}",
            top.len(),
            top.iter().map(|c| c.index).collect::<Vec<_>>()
        );
        top
    }
}

fn query_terms(question: &str) -> HashSet<String> {
    WORD.find_iter(&question.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(w.as_str()))
        .collect()
}
