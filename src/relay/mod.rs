//! # 中继模块（relay）
//!
//! ## 设计思路
//!
//! 内容上下文与特权代理之间只通过异步消息往返，没有共享内存。
//! 本模块承载边界两侧共用的部分：
//! - `protocol`：动作标签联合类型与各响应信封，未知动作显式拒绝。
//! - `client`：试穿请求客户端，先做本地校验再过网络，并把 HTTP 级结果
//!   映射为面向用户的三态结果。

pub mod client;
pub mod protocol;

pub use client::{RelayClient, TryOnResponse};
pub use protocol::{
    AuthStatusEnvelope, BrokerRequest, CheckAvatarEnvelope, CheckAvatarPayload,
    FetchImageEnvelope, FetchImagePayload, ImageDimensions, ImageSelectedPayload,
    ProtocolError, TryOnEnvelope, TryOnPayload, UiCommand,
};
