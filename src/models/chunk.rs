use serde::{Deserialize, Serialize};

/// 文档片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// 片段在文档中的序号（从0开始）
    pub index: usize,
    pub text: String,
    /// 所在页码（从1开始）
    pub page: usize,
    /// 片段在全文中的起止字符位置
    pub start_char: usize,
    pub end_char: usize,
    /// 粗略的主题标签，如 "methodology"
    #[serde(default)]
    pub topics: Vec<String>,
}
