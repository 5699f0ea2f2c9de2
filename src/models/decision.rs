use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 请求被标记为可疑的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspicionReason {
    /// 直接要求导出全文/整段
    ExtractionRequest,
    /// 连续"接着给我下一段"
    SequentialScan,
    /// 连续多次请求同一区域
    RepeatedRegion,
    /// 换说法扫描不同区域
    RephraseScan,
}

impl Display for SuspicionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SuspicionReason::ExtractionRequest => "extraction_request",
            SuspicionReason::SequentialScan => "sequential_scan_detected",
            SuspicionReason::RepeatedRegion => "repeated_region",
            SuspicionReason::RephraseScan => "rephrase_scan",
        };
        f.write_str(s)
    }
}

/// 请求模式检测的结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// 延迟后放行
    Throttle {
        delay: Duration,
        reason: SuspicionReason,
    },
    /// 拒绝，不调用 LLM
    Block { reason: SuspicionReason },
}

impl Decision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Decision::Block { .. })
    }

    pub fn is_suspicious(&self) -> bool {
        !matches!(self, Decision::Allow)
    }

    pub fn reason(&self) -> Option<SuspicionReason> {
        match self {
            Decision::Allow => None,
            Decision::Throttle { reason, .. } | Decision::Block { reason } => Some(*reason),
        }
    }
}

/// 返回给界面的结果标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFlag {
    /// 正常回答
    Answered,
    /// 回答中有原文被截断
    Truncated,
    /// 经过限流延迟后回答
    Throttled,
    /// 请求被拒绝
    Blocked,
    /// 无法在保护限制内回答
    Degraded,
}
