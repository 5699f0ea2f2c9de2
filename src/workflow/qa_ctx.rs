//! 问答处理上下文
//!
//! 封装"我正在处理哪个作业、哪位评估者的第几个问题"这一信息

use std::fmt::Display;

use crate::models::SessionKey;

/// 问答处理上下文
#[derive(Debug, Clone)]
pub struct QaCtx {
    pub key: SessionKey,

    /// 问题在会话中的序号（从1开始，仅用于日志显示）
    pub question_index: usize,
}

impl QaCtx {
    pub fn new(key: SessionKey, question_index: usize) -> Self {
        Self { key, question_index }
    }
}

impl Display for QaCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[作业 #{} 评估者 #{} 问题#{}]",
            self.key.assignment_id, self.key.evaluator, self.question_index
        )
    }
}
