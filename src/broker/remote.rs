//! # 远端试穿调用
//!
//! ## 设计思路
//!
//! 试穿请求单次投递，代理不做自动重试，失败由用户重新发起。
//! HTTP 级结果在这里归类为信封三态：成功、需要登录、带人话文案的失败。
//! 凭据类状态码（401/403）单独标记 `requiresAuth`，由内容侧引导用户登录，
//! 不与普通失败混为一谈。
//!
//! ## 实现思路
//!
//! - 调用带总超时（配置项，默认 90 秒），避免请求无限挂起。
//! - 2xx 响应解析 `tryOnImageBase64`，服务端自报的 `error` 字段视为失败。
//! - 非 2xx 响应交给 `relay::client` 的状态码文案表生成用户可读信息。

use serde_json::Value;

use super::Broker;
use crate::relay::client::failure_message_for_status;
use crate::relay::{TryOnEnvelope, TryOnPayload};

impl Broker {
    /// 处理 REQUEST_VIRTUAL_TRY_ON。
    pub(super) async fn handle_try_on(&self, payload: TryOnPayload) -> TryOnEnvelope {
        log::info!(
            "👔 转发试穿请求 - avatar={}B clothing={}B",
            payload.avatar_image_base64.len(),
            payload.clothing_image_base64.len()
        );

        let body = serde_json::json!({
            "avatarImageBase64": payload.avatar_image_base64,
            "clothingImageBase64": payload.clothing_image_base64,
            "clothingUrl": payload.clothing_url,
        });

        let response = self
            .http
            .post(&self.config.try_on_url)
            .json(&body)
            .timeout(self.config.try_on_timeout)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                let message = if err.is_timeout() {
                    "Virtual Try-On request timed out. Please try again.".to_string()
                } else {
                    "Could not reach the Virtual Try-On service. Please check your connection and try again.".to_string()
                };
                log::warn!("👔 试穿请求传输失败：{}", err);
                return failure_envelope(message);
            }
        };

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            log::info!("👔 试穿请求被拒（HTTP {}），需要登录", status.as_u16());
            return TryOnEnvelope {
                success: false,
                requires_auth: Some(true),
                ..TryOnEnvelope::default()
            };
        }

        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail = extract_error_detail(&detail);
            log::warn!("👔 试穿服务返回 HTTP {}：{}", status.as_u16(), detail);
            return failure_envelope(failure_message_for_status(status.as_u16(), &detail));
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                log::warn!("👔 试穿响应解析失败：{}", err);
                return failure_envelope(
                    "Virtual Try-On service returned an unreadable response.".to_string(),
                );
            }
        };

        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return failure_envelope(error.to_string());
        }

        match body.get("tryOnImageBase64").and_then(Value::as_str) {
            Some(image) => {
                log::info!("👔 试穿成功 - 结果 {}B", image.len());
                TryOnEnvelope {
                    success: true,
                    try_on_image_base64: Some(image.to_string()),
                    ..TryOnEnvelope::default()
                }
            }
            None => failure_envelope(
                "Virtual Try-On service returned no image.".to_string(),
            ),
        }
    }
}

fn failure_envelope(message: String) -> TryOnEnvelope {
    TryOnEnvelope {
        success: false,
        error: Some(message),
        ..TryOnEnvelope::default()
    }
}

/// 从错误响应体中提取细节：优先取 JSON 的 `error` 字段，否则用原文。
fn extract_error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
