/// LLM API 客户端
///
/// 封装所有与 LLM API 相关的调用逻辑。LLM 被视为不可信、不确定的外部能力：
/// 输入提示词，输出自由文本。
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::LlmError;

/// 一次 LLM 请求
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub system_message: String,
    pub user_message: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl LlmRequest {
    pub fn new(system_message: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            system_message: system_message.into(),
            user_message: user_message.into(),
            temperature: 0.3,
            max_tokens: 800,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// LLM 调用能力
///
/// 测试中可以替换为返回固定文本的实现
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 模型名称（仅用于日志和错误信息）
    fn model(&self) -> &str;

    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError>;
}

/// OpenAI 兼容接口的客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl OpenAiClient {
    /// 创建新的 LLM 客户端
    pub fn new(config: &Config) -> Self {
        Self::with_model(config, config.llm_model_name.clone())
    }

    /// 创建自定义模型的 LLM 客户端
    pub fn with_model(config: &Config, model_name: impl Into<String>) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: model_name.into(),
        }
    }

    fn build_err(&self, e: impl std::fmt::Display) -> LlmError {
        LlmError::RequestBuildFailed {
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!(
            "系统消息长度: {} 字符, 用户消息长度: {} 字符",
            request.system_message.len(),
            request.user_message.len()
        );

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(request.system_message.as_str())
            .build()
            .map_err(|e| self.build_err(e))?;
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(request.user_message.as_str())
            .build()
            .map_err(|e| self.build_err(e))?;

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(request.temperature)
            .max_tokens(request.max_tokens)
            .build()
            .map_err(|e| self.build_err(e))?;

        let response = self.client.chat().create(chat_request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            let message = e.to_string().to_lowercase();
            if message.contains("rate limit") || message.contains("rate_limit") {
                LlmError::RateLimited {
                    model: self.model_name.clone(),
                }
            } else {
                LlmError::api_failed(&self.model_name, e)
            }
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| LlmError::EmptyContent {
                model: self.model_name.clone(),
            })?;

        Ok(content.trim().to_string())
    }
}
