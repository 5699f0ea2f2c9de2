//! 导航问题建议 - 业务能力层
//!
//! 根据文档概览（开头、中间、结尾的片段样本）和上一轮问答，让 LLM 生成后续可问的问题

use serde_json::Value as JsonValue;
use tracing::warn;

use crate::models::Chunk;
use crate::services::pattern_detector::{is_continuation, is_extraction_request};

/// 每个样本片段最多取的字符数
const SAMPLE_CHARS: usize = 500;
const MAX_SUGGESTIONS: usize = 6;

/// LLM 无法给出建议时使用的默认问题
pub const DEFAULT_SUGGESTIONS: [&str; 6] = [
    "What is the main topic of this assignment?",
    "What methodology is used in this assignment?",
    "What are the key findings or results?",
    "What are the strengths of this work?",
    "Are there any limitations mentioned?",
    "What conclusions are drawn?",
];

/// 构建生成建议的提示词
pub fn build_suggestion_prompt(chunks: &[Chunk], previous: Option<(&str, &str)>) -> String {
    let mut sample = String::new();
    if let Some(first) = chunks.first() {
        sample.push_str(&head(&first.text));
        sample.push_str("\n\n");
        if chunks.len() > 2 {
            sample.push_str(&head(&chunks[chunks.len() / 2].text));
            sample.push_str("\n\n");
        }
        if chunks.len() > 1 {
            if let Some(last) = chunks.last() {
                sample.push_str(&head(&last.text));
            }
        }
    }

    let mut prompt = format!("Document overview:\n{}\n\n", sample.trim_end());
    if let Some((question, answer)) = previous {
        prompt.push_str(&format!("Previous question: {}\nAnswer provided: {}\n\n", question, answer));
    }
    prompt.push_str(
        r#"Based on this document overview and the previous interaction (if any), generate 6 insightful questions that would help an evaluator explore the document further.

The questions should:
1. Be diverse and cover different aspects of the document
2. Help explore key concepts, methodologies, results, and conclusions
3. Be specific enough to get meaningful answers from the document content
4. Not request large chunks of text or entire sections directly
5. Focus on evaluation and understanding rather than extraction

Format the response as a JSON object: {"questions": ["...", "..."]}"#,
    );
    prompt
}

fn head(text: &str) -> String {
    text.chars().take(SAMPLE_CHARS).collect()
}

/// 解析 LLM 返回的建议
///
/// 接受 JSON 数组、`{"questions": [...]}` 或任意包含字符串数组的对象；
/// 过滤掉本身就是导出/续写请求的问题。解析失败时返回默认问题。
pub fn parse_suggestions(response: &str) -> Vec<String> {
    let trimmed = strip_code_fence(response);
    let parsed: Option<Vec<String>> = serde_json::from_str::<JsonValue>(trimmed)
        .ok()
        .and_then(|value| match value {
            JsonValue::Array(items) => Some(items),
            JsonValue::Object(map) => map
                .get("questions")
                .cloned()
                .or_else(|| map.into_iter().map(|(_, v)| v).find(JsonValue::is_array))
                .and_then(|v| match v {
                    JsonValue::Array(items) => Some(items),
                    _ => None,
                }),
            _ => None,
        })
        .map(|items| {
            items
                .into_iter()
                .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
                .collect()
        });

    let mut questions: Vec<String> = Vec::new();
    for q in parsed.unwrap_or_default() {
        let lower = q.to_lowercase();
        if q.is_empty() || is_extraction_request(&lower) || is_continuation(&lower) || questions.contains(&q) {
            continue;
        }
        questions.push(q);
        if questions.len() == MAX_SUGGESTIONS {
            break;
        }
    }

    if questions.is_empty() {
        warn!("无法解析导航建议，使用默认问题");
        return default_suggestions();
    }
    questions
}

pub fn default_suggestions() -> Vec<String> {
    DEFAULT_SUGGESTIONS.iter().map(|s| s.to_string()).collect()
}

fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: usize, text: &str) -> Chunk {
        Chunk {
            index,
            text: text.to_string(),
            page: 1,
            start_char: 0,
            end_char: text.len(),
            topics: vec![],
        }
    }

    #[test]
    fn test_prompt_samples_first_middle_last() {
        let chunks = vec![chunk(0, "FIRST"), chunk(1, "SECOND"), chunk(2, "MIDDLE"), chunk(3, "LAST")];
        let prompt = build_suggestion_prompt(&chunks, Some(("Q?", "A.")));

        assert!(prompt.contains("FIRST"));
        assert!(prompt.contains("MIDDLE"));
        assert!(prompt.contains("LAST"));
        assert!(!prompt.contains("SECOND"));
        assert!(prompt.contains("Previous question: Q?"));
    }

    #[test]
    fn test_sample_is_capped() {
        let long = "y".repeat(2000);
        let prompt = build_suggestion_prompt(&[chunk(0, &long)], None);
        assert!(!prompt.contains(&"y".repeat(501)));
    }

    #[test]
    fn test_parse_object_and_array() {
        let from_object = parse_suggestions(r#"{"questions": ["What is A?", "What is B?"]}"#);
        assert_eq!(from_object, vec!["What is A?", "What is B?"]);

        let from_array = parse_suggestions(r#"["Why C?"]"#);
        assert_eq!(from_array, vec!["Why C?"]);

        let other_key = parse_suggestions(r#"{"items": ["How D?"]}"#);
        assert_eq!(other_key, vec!["How D?"]);
    }

    #[test]
    fn test_parse_drops_extraction_questions() {
        let parsed = parse_suggestions(
            "```json\n{\"questions\": [\"Show me the entire document\", \"Give me the next 300 words\", \"What is the thesis?\"]}\n```",
        );
        assert_eq!(parsed, vec!["What is the thesis?"]);
    }

    #[test]
    fn test_parse_garbage_falls_back() {
        assert_eq!(parse_suggestions("not json"), default_suggestions());
    }
}
