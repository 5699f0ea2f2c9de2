use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::chunk::Chunk;

/// 作业 ID
///
/// 可分享、不可猜测（uuid v4，去掉连字符）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentId(String);

impl AssignmentId {
    /// 生成新的随机 ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 用于存储文件名的 ID 摘要，不直接暴露 ID 本身
    pub fn storage_digest(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl From<&str> for AssignmentId {
    fn from(s: &str) -> Self {
        Self(s.trim().to_string())
    }
}

impl From<String> for AssignmentId {
    fn from(s: String) -> Self {
        Self(s.trim().to_string())
    }
}

impl Display for AssignmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 上传的作业
///
/// 上传后内容不可变。`source_text` 只在服务端使用，从不整体返回给评估者。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    /// 上传者（候选人）身份
    pub owner: String,
    pub source_text: String,
    pub chunks: Vec<Chunk>,
    /// 原文的 sha256，用于识别重复上传
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(owner: impl Into<String>, source_text: String, chunks: Vec<Chunk>) -> Self {
        Self {
            id: AssignmentId::generate(),
            owner: owner.into(),
            content_hash: content_hash(&source_text),
            source_text,
            chunks,
            created_at: Utc::now(),
        }
    }

    /// 是否已超过保留期限
    pub fn is_expired(&self, retention: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.created_at > retention
    }
}

/// 计算文档内容摘要
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}
