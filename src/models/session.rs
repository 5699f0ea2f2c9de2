//! 评估会话
//!
//! 每个 (作业ID, 评估者) 一个会话，只保存在内存中，用于计算限流判断

use std::collections::BTreeSet;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DetectionConfig;
use crate::models::assignment::AssignmentId;
use crate::models::decision::{ResponseFlag, SuspicionReason};

/// 会话键
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub assignment_id: AssignmentId,
    pub evaluator: String,
}

impl SessionKey {
    pub fn new(assignment_id: AssignmentId, evaluator: impl Into<String>) -> Self {
        Self {
            assignment_id,
            evaluator: evaluator.into(),
        }
    }
}

impl Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[作业 #{} 评估者 #{}]", self.assignment_id, self.evaluator)
    }
}

/// 按序号引用文档的某一部分，如 "paragraph 3"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdinalRef {
    pub unit: String,
    pub number: u32,
}

/// 单个请求的特征，由检测器从问题中提取
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSignals {
    /// 直接要求导出大段内容
    pub extraction: bool,
    /// "继续"/"下一段"类请求（含序号递增）
    pub continuation: bool,
    pub ordinal: Option<OrdinalRef>,
    /// 本次请求命中的片段序号
    pub chunk_ids: Vec<usize>,
}

/// 一次问答记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
    pub flag: ResponseFlag,
    pub reason: Option<SuspicionReason>,
    pub signals: RequestSignals,
}

/// 评估会话
#[derive(Debug, Clone)]
pub struct Session {
    pub key: SessionKey,
    exchanges: Vec<Exchange>,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            exchanges: Vec::new(),
        }
    }

    /// 追加一条记录（只增不减）
    pub fn record(&mut self, exchange: Exchange) {
        self.exchanges.push(exchange);
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    /// 检测窗口内的最近记录：时间在窗口内，且不超过 `depth` 条
    pub fn recent(&self, window: chrono::Duration, depth: usize, now: DateTime<Utc>) -> &[Exchange] {
        let cutoff = now - window;
        let tail_start = self.exchanges.len().saturating_sub(depth);
        let tail = &self.exchanges[tail_start..];
        let first_in_window = tail
            .iter()
            .position(|e| e.timestamp >= cutoff)
            .unwrap_or(tail.len());
        &tail[first_in_window..]
    }
}

/// 限流状态标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleFlag {
    SequentialScanDetected,
    ExtractionAttempted,
    RepeatedRegion,
    RephraseScan,
}

impl From<SuspicionReason> for ThrottleFlag {
    fn from(reason: SuspicionReason) -> Self {
        match reason {
            SuspicionReason::ExtractionRequest => ThrottleFlag::ExtractionAttempted,
            SuspicionReason::SequentialScan => ThrottleFlag::SequentialScanDetected,
            SuspicionReason::RepeatedRegion => ThrottleFlag::RepeatedRegion,
            SuspicionReason::RephraseScan => ThrottleFlag::RephraseScan,
        }
    }
}

/// 限流状态
///
/// 完全由会话历史推导，不单独持久化
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThrottleState {
    pub session: SessionKey,
    pub recent_requests: usize,
    pub sequential_requests: usize,
    pub flags: BTreeSet<ThrottleFlag>,
}

impl ThrottleState {
    pub fn derive(session: &Session, config: &DetectionConfig, now: DateTime<Utc>) -> Self {
        let recent = session.recent(config.window(), config.history_depth, now);
        let sequential_requests = recent.iter().filter(|e| e.signals.continuation).count();

        let mut flags: BTreeSet<ThrottleFlag> = recent
            .iter()
            .filter_map(|e| e.reason)
            .map(ThrottleFlag::from)
            .collect();
        if sequential_requests >= config.sequential_threshold {
            flags.insert(ThrottleFlag::SequentialScanDetected);
        }
        if recent.iter().any(|e| e.signals.extraction) {
            flags.insert(ThrottleFlag::ExtractionAttempted);
        }

        Self {
            session: session.key.clone(),
            recent_requests: recent.len(),
            sequential_requests,
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(at: DateTime<Utc>, continuation: bool) -> Exchange {
        Exchange {
            question: "q".to_string(),
            answer: "a".to_string(),
            timestamp: at,
            flag: ResponseFlag::Answered,
            reason: None,
            signals: RequestSignals {
                continuation,
                ..Default::default()
            },
        }
    }

    fn session() -> Session {
        Session::new(SessionKey::new(AssignmentId::from("a1"), "bob"))
    }

    #[test]
    fn test_recent_respects_window_and_depth() {
        let now = Utc::now();
        let mut s = session();
        s.record(exchange(now - chrono::Duration::minutes(30), true));
        for i in 0..5 {
            s.record(exchange(now - chrono::Duration::seconds(50 - i), false));
        }

        assert_eq!(s.recent(chrono::Duration::minutes(10), 10, now).len(), 5);
        assert_eq!(s.recent(chrono::Duration::minutes(60), 10, now).len(), 6);
        assert_eq!(s.recent(chrono::Duration::minutes(60), 3, now).len(), 3);
    }

    #[test]
    fn test_throttle_state_flags_sequential_scan() {
        let now = Utc::now();
        let config = DetectionConfig::default();
        let mut s = session();
        for _ in 0..config.sequential_threshold {
            s.record(exchange(now, true));
        }

        let state = ThrottleState::derive(&s, &config, now);
        assert_eq!(state.sequential_requests, config.sequential_threshold);
        assert!(state.flags.contains(&ThrottleFlag::SequentialScanDetected));
    }

    #[test]
    fn test_throttle_state_ignores_old_requests() {
        let now = Utc::now();
        let config = DetectionConfig::default();
        let mut s = session();
        for _ in 0..5 {
            s.record(exchange(now - chrono::Duration::hours(2), true));
        }

        let state = ThrottleState::derive(&s, &config, now);
        assert_eq!(state.recent_requests, 0);
        assert!(state.flags.is_empty());
    }
}
