//! # 试穿请求客户端
//!
//! ## 设计思路
//!
//! 发送前先做本地校验（载荷齐全、长度超过最小门槛），把"头像还没上传"
//! 这类必然失败挡在网络往返之前，并给出按字段区分的提示文案。
//! 网络结果映射为三态：成功、需要登录、带人话文案的失败。
//! 客户端绝不自动重试，失败需要用户重新发起。

use crate::broker::BrokerHandle;
use crate::relay::{BrokerRequest, TryOnEnvelope, TryOnPayload};

/// 载荷最小长度门槛（Base64 字符数）。低于此值视为明显损坏的载荷。
pub const MIN_PAYLOAD_LEN: usize = 100;

/// 试穿请求结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TryOnResponse {
    /// 试穿成功，携带结果图（Base64）。
    Success(String),
    /// 失败，携带面向用户的文案。
    Failure(String),
    /// 会话或凭据缺失，应引导用户打开主界面登录。
    AuthRequired,
}

/// 试穿请求客户端。
pub struct RelayClient {
    broker: BrokerHandle,
}

impl RelayClient {
    pub fn new(broker: BrokerHandle) -> Self {
        Self { broker }
    }

    /// 发起一次试穿请求。
    ///
    /// 校验失败直接返回 `Failure`，不触达网络层。
    pub async fn request_try_on(
        &self,
        avatar_image_base64: &str,
        clothing_image_base64: &str,
        clothing_url: Option<&str>,
    ) -> TryOnResponse {
        if avatar_image_base64.len() < MIN_PAYLOAD_LEN {
            return TryOnResponse::Failure("Avatar image is invalid or too small".to_string());
        }

        if clothing_image_base64.len() < MIN_PAYLOAD_LEN {
            return TryOnResponse::Failure("Clothing image is invalid or too small".to_string());
        }

        log::info!(
            "📨 发送试穿请求 - avatar={}B clothing={}B",
            avatar_image_base64.len(),
            clothing_image_base64.len()
        );

        let request = BrokerRequest::RequestVirtualTryOn(TryOnPayload {
            avatar_image_base64: avatar_image_base64.to_string(),
            clothing_image_base64: clothing_image_base64.to_string(),
            clothing_url: clothing_url.map(str::to_string),
        });

        let response = match self.broker.request(&request).await {
            Ok(response) => response,
            Err(err) => {
                log::warn!("📨 代理通道不可用：{}", err);
                return TryOnResponse::Failure(
                    "Failed to connect to the Virtual Try-On service".to_string(),
                );
            }
        };

        let envelope: TryOnEnvelope = match serde_json::from_value(response) {
            Ok(envelope) => envelope,
            Err(err) => {
                log::warn!("📨 试穿响应格式错误：{}", err);
                return TryOnResponse::Failure(
                    "Virtual Try-On service returned an unreadable response.".to_string(),
                );
            }
        };

        if envelope.requires_auth.unwrap_or(false) {
            return TryOnResponse::AuthRequired;
        }

        if envelope.success {
            match envelope.try_on_image_base64 {
                Some(image) => TryOnResponse::Success(image),
                None => TryOnResponse::Failure(
                    "Virtual Try-On service returned no image.".to_string(),
                ),
            }
        } else {
            TryOnResponse::Failure(
                envelope.error.unwrap_or_else(|| "Try-on failed".to_string()),
            )
        }
    }
}

/// HTTP 状态码到用户文案的映射表。
///
/// 400 回显服务端细节（服务端报错往往已经是句子），其余常见状态给固定
/// 文案，兜底文案带状态码便于用户反馈时定位。
pub(crate) fn failure_message_for_status(status: u16, detail: &str) -> String {
    match status {
        503 => "Virtual Try-On service is temporarily unavailable. Please try again later."
            .to_string(),
        500 => "Virtual Try-On service ran into a server error. Please try again.".to_string(),
        400 => {
            if detail.trim().is_empty() {
                "The try-on request was rejected by the service.".to_string()
            } else {
                detail.trim().to_string()
            }
        }
        other => format!("Virtual Try-On service error ({})", other),
    }
}
