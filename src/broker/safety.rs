//! # 本地安全审查
//!
//! ## 设计思路
//!
//! 头像在发往远端前可经本地分类器做一次安全筛查。分类器是宿主提供的
//! 不透明能力，这里只约定窄接口：单轮提示词（固定审查准则 + 内联图片），
//! 期望回复恰好一个 JSON 对象 `{"is_safe_for_tryon": bool, "reason": "..."}`。
//!
//! 回复不可解析是"软失败"：既不默认放行也不默认拒绝，而是以显式的
//! "回复不可读"错误上抛，由调用方决定策略。
//!
//! ## 实现思路
//!
//! - 能力按设备内存门槛启用（`sysinfo` 探测，测试可注入覆盖值）。
//! - 解析时截取回复中首个大括号配对段再反序列化，容忍模型前后赘述。

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;

use super::{Broker, BrokerError};
use crate::relay::{CheckAvatarEnvelope, CheckAvatarPayload};

/// 固定审查准则。与图片一起构成单轮提示词。
const SAFETY_RUBRIC: &str = "\
You are screening a user-provided photo before it is used for virtual \
clothing try-on. The photo is acceptable only if it shows one clearly \
visible, fully clothed person, contains no minors, no nudity or sexually \
suggestive content, no violence, and no identity documents. Reply with \
exactly one JSON object and nothing else, in the form \
{\"is_safe_for_tryon\": true or false, \"reason\": \"short explanation\"}.";

/// 宿主提供的本地分类器能力。
#[async_trait]
pub trait SafetyClassifier: Send + Sync {
    /// 以固定准则与内联图片执行单轮审查，返回模型原始回复文本。
    async fn complete(&self, prompt: &str, image_data: &str) -> Result<String, BrokerError>;
}

/// 审查结论。
#[derive(Debug, Clone, Deserialize)]
struct SafetyVerdict {
    is_safe_for_tryon: bool,
    #[serde(default)]
    reason: String,
}

static DEVICE_MEMORY_BYTES: Lazy<u64> = Lazy::new(|| {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    system.total_memory()
});

impl Broker {
    fn device_memory_bytes(&self) -> u64 {
        self.config
            .device_memory_override
            .unwrap_or_else(|| *DEVICE_MEMORY_BYTES)
    }

    /// 处理 CHECK_AVATAR。
    pub(super) async fn handle_check_avatar(&self, payload: CheckAvatarPayload) -> CheckAvatarEnvelope {
        let memory = self.device_memory_bytes();
        if memory < self.config.min_safety_memory_bytes {
            log::info!(
                "🛡️ 设备内存不足，跳过本地安全审查（{}MB < {}MB）",
                memory / 1024 / 1024,
                self.config.min_safety_memory_bytes / 1024 / 1024
            );
            return unavailable_envelope(
                "On-device safety screening is not available on this device.",
            );
        }

        let Some(classifier) = &self.safety else {
            return unavailable_envelope("On-device safety screening is not configured.");
        };

        let reply = match classifier.complete(SAFETY_RUBRIC, &payload.image_data).await {
            Ok(reply) => reply,
            Err(err) => {
                log::warn!("🛡️ 安全审查调用失败：{}", err);
                return CheckAvatarEnvelope {
                    success: false,
                    error: Some(err.to_string()),
                    ..CheckAvatarEnvelope::default()
                };
            }
        };

        match parse_verdict(&reply) {
            Some(verdict) => {
                log::info!(
                    "🛡️ 安全审查完成 - is_safe={} reason={}",
                    verdict.is_safe_for_tryon,
                    verdict.reason
                );
                CheckAvatarEnvelope {
                    success: true,
                    is_safe: Some(verdict.is_safe_for_tryon),
                    reason: Some(verdict.reason),
                    message: None,
                    error: None,
                }
            }
            None => {
                log::warn!("🛡️ 安全审查回复不可解析：{}", truncate_for_log(&reply));
                CheckAvatarEnvelope {
                    success: false,
                    error: Some(BrokerError::SafetyUnreadable.to_string()),
                    message: Some(
                        "The safety check returned an unreadable response. Please try a different image."
                            .to_string(),
                    ),
                    ..CheckAvatarEnvelope::default()
                }
            }
        }
    }
}

fn unavailable_envelope(message: &str) -> CheckAvatarEnvelope {
    CheckAvatarEnvelope {
        success: false,
        message: Some(message.to_string()),
        ..CheckAvatarEnvelope::default()
    }
}

/// 从回复文本中解析审查结论。
///
/// 截取首个 `{` 到最后一个 `}` 之间的内容反序列化；
/// 找不到对象或反序列化失败均视为不可解析。
fn parse_verdict(reply: &str) -> Option<SafetyVerdict> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }

    serde_json::from_str(&reply[start..=end]).ok()
}

fn truncate_for_log(reply: &str) -> String {
    const MAX: usize = 120;
    if reply.len() <= MAX {
        reply.to_string()
    } else {
        let cut = reply
            .char_indices()
            .take_while(|(idx, _)| *idx < MAX)
            .last()
            .map(|(idx, c)| idx + c.len_utf8())
            .unwrap_or(0);
        format!("{}…", &reply[..cut])
    }
}
