//! # 消息协议
//!
//! ## 设计思路
//!
//! 跨上下文消息在线上是 `{ "action": "...", "data": {...} }` 形式的 JSON。
//! 这里把动作名收敛为枚举并穷尽匹配：动作字符串派发在解析期完成，
//! 未知动作返回显式错误，而不是被静默忽略。
//!
//! ## 实现思路
//!
//! - 载荷字段统一 camelCase 线上命名。
//! - 响应信封的可选字段缺省时不序列化，与对端约定保持一致。
//! - `BrokerRequest::from_value` 手工解析 `action` 字段再反序列化载荷，
//!   保证 `data` 缺省的无参动作（如 CHECK_AUTH_STATUS）也能解析。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 协议层错误。
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("消息缺少 action 字段")]
    MissingAction,

    #[error("未知动作：{0}")]
    UnknownAction(String),

    #[error("载荷格式错误（{action}）：{detail}")]
    MalformedPayload { action: &'static str, detail: String },
}

/// 试穿请求载荷。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TryOnPayload {
    pub avatar_image_base64: String,
    pub clothing_image_base64: String,
    /// 仅用于诊断的来源地址。
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub clothing_url: Option<String>,
}

/// 代理取图载荷（跨源回退路径）。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchImagePayload {
    pub image_url: String,
}

/// 头像安全审查载荷（Data URL 形式的图片）。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAvatarPayload {
    pub image_data: String,
}

/// 内容上下文发往代理的动作集合。
#[derive(Debug, Clone)]
pub enum BrokerRequest {
    RequestVirtualTryOn(TryOnPayload),
    FetchImage(FetchImagePayload),
    CheckAuthStatus,
    CheckAvatar(CheckAvatarPayload),
}

const ACTION_REQUEST_VIRTUAL_TRY_ON: &str = "REQUEST_VIRTUAL_TRY_ON";
const ACTION_FETCH_IMAGE: &str = "FETCH_IMAGE";
const ACTION_CHECK_AUTH_STATUS: &str = "CHECK_AUTH_STATUS";
const ACTION_CHECK_AVATAR: &str = "CHECK_AVATAR";

impl BrokerRequest {
    /// 动作的线上名称。
    pub fn action(&self) -> &'static str {
        match self {
            Self::RequestVirtualTryOn(_) => ACTION_REQUEST_VIRTUAL_TRY_ON,
            Self::FetchImage(_) => ACTION_FETCH_IMAGE,
            Self::CheckAuthStatus => ACTION_CHECK_AUTH_STATUS,
            Self::CheckAvatar(_) => ACTION_CHECK_AVATAR,
        }
    }

    /// 序列化为线上形式 `{ action, data }`。
    pub fn to_value(&self) -> Value {
        let data = match self {
            Self::RequestVirtualTryOn(payload) => {
                serde_json::to_value(payload).unwrap_or(Value::Null)
            }
            Self::FetchImage(payload) => serde_json::to_value(payload).unwrap_or(Value::Null),
            Self::CheckAuthStatus => Value::Object(serde_json::Map::new()),
            Self::CheckAvatar(payload) => serde_json::to_value(payload).unwrap_or(Value::Null),
        };

        serde_json::json!({ "action": self.action(), "data": data })
    }

    /// 从线上形式解析动作。未知动作显式拒绝。
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingAction)?;

        let data = value.get("data").cloned().unwrap_or(Value::Null);

        match action {
            ACTION_REQUEST_VIRTUAL_TRY_ON => {
                let payload = serde_json::from_value(data).map_err(|e| {
                    ProtocolError::MalformedPayload {
                        action: ACTION_REQUEST_VIRTUAL_TRY_ON,
                        detail: e.to_string(),
                    }
                })?;
                Ok(Self::RequestVirtualTryOn(payload))
            }
            ACTION_FETCH_IMAGE => {
                let payload = serde_json::from_value(data).map_err(|e| {
                    ProtocolError::MalformedPayload {
                        action: ACTION_FETCH_IMAGE,
                        detail: e.to_string(),
                    }
                })?;
                Ok(Self::FetchImage(payload))
            }
            ACTION_CHECK_AUTH_STATUS => Ok(Self::CheckAuthStatus),
            ACTION_CHECK_AVATAR => {
                let payload = serde_json::from_value(data).map_err(|e| {
                    ProtocolError::MalformedPayload {
                        action: ACTION_CHECK_AVATAR,
                        detail: e.to_string(),
                    }
                })?;
                Ok(Self::CheckAvatar(payload))
            }
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }
}

/// 试穿响应信封。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TryOnEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub try_on_image_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_auth: Option<bool>,
}

/// 代理取图响应信封。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchImageEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 凭据状态响应信封。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthStatusEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firebase_initialized: Option<bool>,
}

/// 头像审查响应信封。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckAvatarEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_safe: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 弹窗发往内容上下文的模式指令（即发即忘）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    EnableManualSelection,
    DisableManualSelection,
    ClearImageSelection,
    ReloadSettings,
}

impl UiCommand {
    pub fn action(&self) -> &'static str {
        match self {
            Self::EnableManualSelection => "ENABLE_MANUAL_SELECTION",
            Self::DisableManualSelection => "DISABLE_MANUAL_SELECTION",
            Self::ClearImageSelection => "CLEAR_IMAGE_SELECTION",
            Self::ReloadSettings => "RELOAD_SETTINGS",
        }
    }

    pub fn from_action(action: &str) -> Result<Self, ProtocolError> {
        match action {
            "ENABLE_MANUAL_SELECTION" => Ok(Self::EnableManualSelection),
            "DISABLE_MANUAL_SELECTION" => Ok(Self::DisableManualSelection),
            "CLEAR_IMAGE_SELECTION" => Ok(Self::ClearImageSelection),
            "RELOAD_SETTINGS" => Ok(Self::ReloadSettings),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }
}

/// 图片尺寸（IMAGE_SELECTED 载荷内嵌结构）。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

/// 手动选择结果通知（内容上下文发往弹窗，仅告知）。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSelectedPayload {
    pub src: String,
    pub alt: String,
    pub domain: String,
    pub dimensions: ImageDimensions,
}
