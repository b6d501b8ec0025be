//! LLM 服务 - 业务能力层
//!
//! 只负责"看图说话"能力，不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）

use std::future::Future;

use anyhow::Result;
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppResult, TransportError};

/// 一次描述请求
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub system_message: String,
    pub user_message: String,
    /// `data:` URL 形式的图片
    pub image_url: String,
    pub max_tokens: u32,
}

impl VisionRequest {
    /// 按主题和受众构建请求
    pub fn new(subject: &str, audience: &str, image_url: String, max_tokens: u32) -> Self {
        let (system_message, user_message) = build_description_messages(subject, audience);
        Self {
            system_message,
            user_message,
            image_url,
            max_tokens,
        }
    }
}

/// 图片描述后端
///
/// 生产环境使用 [`LlmService`]；测试中可以替换为脚本化的假实现。
pub trait VisionBackend: Send + Sync {
    /// 模型名称（仅用于日志）
    fn model_name(&self) -> &str;

    /// 发送一次请求并返回生成的文本
    fn describe(&self, request: &VisionRequest) -> impl Future<Output = Result<String>> + Send;
}

/// 构建描述用的 (system_message, user_message)
pub fn build_description_messages(subject: &str, audience: &str) -> (String, String) {
    let system_message = format!(
        "You are an accessibility specialist writing image descriptions for {audience} \
         (including blind and low-vision learners) studying {subject}. \
         Write a concise description that does not rely on sight or touch, \
         moving from the general to the specific. \
         Leave out colour and incidental detail unless it matters for {subject}. \
         Match the tone and vocabulary to {audience}. \
         Keep descriptions between 100-150 words. \
         Be factual, educational, and appropriate for the audience level."
    );

    let user_message = format!(
        "Please describe this image for {audience} (blind students) studying {subject}."
    );

    (system_message, user_message)
}

/// LLM 服务
///
/// 职责：
/// - 调用兼容 OpenAI 的 Vision API 生成图片描述
/// - 只处理单张图片的单次请求
/// - 不重试、不计时，这些由 `DescriptionService` 负责
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl LlmService {
    /// 创建新的 LLM 服务
    ///
    /// 未配置凭据时返回配置错误。
    pub fn new(config: &Config) -> AppResult<Self> {
        let api_key = config.require_api_key()?;

        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&config.api_base_url);

        let client = Client::with_config(openai_config);

        Ok(Self {
            client,
            model_name: config.model_name.clone(),
        })
    }

    /// 通用的 LLM 调用函数
    ///
    /// # 参数
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息（可选）
    /// - `imgs`: 图片 URL 列表（可选），会追加到用户消息中
    /// - `max_tokens`: 回复长度上限
    ///
    /// # 返回
    /// 返回 LLM 的响应内容（字符串）
    pub async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: Option<&str>,
        imgs: Option<&[String]>,
        max_tokens: u32,
    ) -> Result<String> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        if let Some(img_urls) = imgs {
            debug!("包含 {} 张图片", img_urls.len());
        }

        // 构建消息列表
        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg)
                .build()?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        // 构建用户消息内容（支持图片）
        let user_msg = match imgs {
            Some(img_urls) if !img_urls.is_empty() => {
                let mut content_parts: Vec<ChatCompletionRequestUserMessageContentPart> =
                    Vec::new();

                content_parts.push(ChatCompletionRequestUserMessageContentPart::Text(
                    ChatCompletionRequestMessageContentPartText {
                        text: user_message.to_string(),
                    },
                ));

                for url in img_urls.iter() {
                    content_parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                        ChatCompletionRequestMessageContentPartImage {
                            image_url: ImageUrl {
                                url: url.clone(),
                                detail: Some(ImageDetail::Auto),
                            },
                        },
                    ));
                }

                ChatCompletionRequestUserMessageArgs::default()
                    .content(ChatCompletionRequestUserMessageContent::Array(
                        content_parts,
                    ))
                    .build()?
            }
            _ => ChatCompletionRequestUserMessageArgs::default()
                .content(user_message)
                .build()?,
        };

        messages.push(ChatCompletionRequestMessage::User(user_msg));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .max_tokens(max_tokens)
            .build()?;

        // 连接失败、非 2xx 状态、响应体无法解析、接口返回 error 都会走到这里
        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            TransportError::ApiCallFailed {
                model: self.model_name.clone(),
                message: e.to_string(),
            }
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| TransportError::EmptyContent {
                model: self.model_name.clone(),
            })?;

        Ok(content.trim().to_string())
    }
}

impl VisionBackend for LlmService {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn describe(&self, request: &VisionRequest) -> Result<String> {
        self.send_to_llm(
            &request.user_message,
            Some(&request.system_message),
            Some(std::slice::from_ref(&request.image_url)),
            request.max_tokens,
        )
        .await
    }
}
