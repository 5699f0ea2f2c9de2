use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, AppResult, ConfigError, FileError};

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 作业数据存放目录
    pub data_dir: String,
    /// 作业保留时长（小时），None 表示不自动过期
    pub retention_hours: Option<u64>,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    /// 单次 LLM 调用超时（秒）
    pub llm_timeout_secs: u64,
    /// 失败后自动重试次数
    pub llm_max_retries: usize,
    // --- 内容保护 ---
    pub protection: ProtectionConfig,
    // --- 请求模式检测 ---
    pub detection: DetectionConfig,
    // --- 文本分块 ---
    pub chunking: ChunkingConfig,
}

/// 摘录限制配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    /// 答案中允许出现的最长原文连续词数
    pub max_excerpt_words: usize,
    /// 引号内直接引用的最大字符数
    pub max_quote_chars: usize,
    /// 截断后至少保留的词数，否则视为答案不连贯
    pub min_coherent_words: usize,
    /// 截断后保留词数占原答案的最小比例
    pub min_retained_ratio: f64,
    /// 判定"抄自原文"的最短连续相同词数（超过 max_excerpt_words + 1 时按后者计）
    pub seed_words: usize,
    /// 抄写片段中允许夹杂的改动词数，不超过该数时前后两段视为同一段摘录
    pub max_gap_words: usize,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            max_excerpt_words: 50,
            max_quote_chars: 150,
            min_coherent_words: 8,
            min_retained_ratio: 0.25,
            seed_words: 6,
            max_gap_words: 2,
        }
    }
}

/// 请求模式检测配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// 检测时间窗口（秒）
    pub window_secs: u64,
    /// 参与检测的最近问答条数
    pub history_depth: usize,
    /// 窗口内允许的连续"接着给我"类请求数 K，第 K+1 次被拦截
    pub sequential_threshold: usize,
    /// 限流延迟（毫秒）
    pub throttle_delay_ms: u64,
    /// 连续请求重叠片段的最大次数
    pub max_consecutive_overlaps: usize,
    /// 判断"几乎相同问题"的词集相似度阈值
    pub similarity_threshold: f64,
    /// 窗口内换说法扫描的比例阈值
    pub rephrase_ratio: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_secs: 600,
            history_depth: 10,
            sequential_threshold: 3,
            throttle_delay_ms: 2000,
            max_consecutive_overlaps: 3,
            similarity_threshold: 0.7,
            rephrase_ratio: 0.5,
        }
    }
}

impl DetectionConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs as i64)
    }

    pub fn throttle_delay(&self) -> Duration {
        Duration::from_millis(self.throttle_delay_ms)
    }
}

/// 文本分块配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// 单个片段最大字符数
    pub max_chunk_chars: usize,
    /// 相邻片段重叠字符数
    pub overlap_chars: usize,
    /// 每个问题最多提供给 LLM 的片段数
    pub top_k: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: 1000,
            overlap_chars: 200,
            top_k: 3,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbose_logging: false,
            data_dir: "data".to_string(),
            retention_hours: None,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o".to_string(),
            llm_timeout_secs: 30,
            llm_max_retries: 1,
            protection: ProtectionConfig::default(),
            detection: DetectionConfig::default(),
            chunking: ChunkingConfig::default(),
        }
    }
}

impl Config {
    /// 从环境变量读取配置，未设置的项使用默认值
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件读取配置，再用环境变量覆盖
    pub fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            AppError::File(FileError::TomlParseFailed {
                path: path.display().to_string(),
                source: e,
            })
        })?;
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn with_env_overrides(self) -> Self {
        let env = |name: &str| std::env::var(name).ok();
        Self {
            verbose_logging: env("VERBOSE_LOGGING").and_then(|v| v.parse().ok()).unwrap_or(self.verbose_logging),
            data_dir: env("DATA_DIR").unwrap_or(self.data_dir),
            retention_hours: env("RETENTION_HOURS").and_then(|v| v.parse().ok()).or(self.retention_hours),
            llm_api_key: env("OPENAI_API_KEY").or_else(|| env("LLM_API_KEY")).unwrap_or(self.llm_api_key),
            llm_api_base_url: env("LLM_API_BASE_URL").unwrap_or(self.llm_api_base_url),
            llm_model_name: env("LLM_MODEL_NAME").unwrap_or(self.llm_model_name),
            llm_timeout_secs: env("LLM_TIMEOUT_SECS").and_then(|v| v.parse().ok()).unwrap_or(self.llm_timeout_secs),
            llm_max_retries: env("LLM_MAX_RETRIES").and_then(|v| v.parse().ok()).unwrap_or(self.llm_max_retries),
            protection: ProtectionConfig {
                max_excerpt_words: env("MAX_EXCERPT_WORDS").and_then(|v| v.parse().ok()).unwrap_or(self.protection.max_excerpt_words),
                ..self.protection
            },
            detection: DetectionConfig {
                sequential_threshold: env("SEQUENTIAL_THRESHOLD").and_then(|v| v.parse().ok()).unwrap_or(self.detection.sequential_threshold),
                ..self.detection
            },
            chunking: self.chunking,
        }
    }

    /// 校验配置
    pub fn validate(&self) -> AppResult<()> {
        if self.protection.max_excerpt_words == 0 {
            return Err(invalid("protection.max_excerpt_words", "必须大于 0"));
        }
        if self.protection.max_quote_chars < 4 {
            return Err(invalid("protection.max_quote_chars", "必须至少为 4"));
        }
        if self.protection.seed_words == 0 {
            return Err(invalid("protection.seed_words", "必须大于 0"));
        }
        if self.detection.sequential_threshold == 0 {
            return Err(invalid("detection.sequential_threshold", "必须大于 0"));
        }
        if self.chunking.overlap_chars >= self.chunking.max_chunk_chars {
            return Err(invalid("chunking.overlap_chars", "必须小于 max_chunk_chars"));
        }
        if self.chunking.top_k == 0 {
            return Err(invalid("chunking.top_k", "必须大于 0"));
        }
        Ok(())
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn retention(&self) -> Option<chrono::Duration> {
        self.retention_hours.map(|h| chrono::Duration::hours(h as i64))
    }
}

fn invalid(field: &str, reason: &str) -> AppError {
    AppError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.protection.max_quote_chars, 150);
        assert_eq!(config.detection.sequential_threshold, 3);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            llm_model_name = "gpt-4o-mini"

            [protection]
            max_excerpt_words = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.llm_model_name, "gpt-4o-mini");
        assert_eq!(config.protection.max_excerpt_words, 20);
        assert_eq!(config.protection.max_quote_chars, 150);
        assert_eq!(config.chunking.top_k, 3);
    }

    #[test]
    fn test_validate_rejects_overlap_larger_than_chunk() {
        let mut config = Config::default();
        config.chunking.overlap_chars = 2000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_seed_words() {
        let mut config = Config::default();
        config.protection.seed_words = 0;
        assert!(config.validate().is_err());
    }
}
