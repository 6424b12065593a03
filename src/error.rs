//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 各子系统维护自己的错误枚举（页面模型、画布、采集、协议、代理、
//! 存储），在边界处上转为全局 `AppError`，避免字符串拼接式错误处理。
//! 核心操作一律以结果值返回失败，不允许异常逃逸到宿主。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为各子系统错误提供 `From` 转换，无需手动 map。
//! - 实现 `Serialize` 将错误序列化为字符串，便于跨消息边界透传。

use serde::Serialize;

use crate::acquire::{AcquireError, CanvasError};
use crate::broker::BrokerError;
use crate::dom::DomError;
use crate::relay::ProtocolError;
use crate::store::StoreError;

/// 应用级统一错误类型。
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 页面模型操作失败
    #[error("页面模型错误: {0}")]
    Dom(#[from] DomError),

    /// 画布绘制或回读失败
    #[error("{0}")]
    Canvas(#[from] CanvasError),

    /// 图片采集链路失败（本地提取 / 代理回退）
    #[error("{0}")]
    Acquire(#[from] AcquireError),

    /// 消息协议解析失败
    #[error("协议错误: {0}")]
    Protocol(#[from] ProtocolError),

    /// 特权代理侧失败（网络 / 配置 / 安全审查）
    #[error("{0}")]
    Broker(#[from] BrokerError),

    /// 本地持久化失败
    #[error("存储错误: {0}")]
    Store(#[from] StoreError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),
}

/// 跨消息边界传输时序列化为人类可读字符串。
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
