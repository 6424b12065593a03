//! # UI 协作方接口
//!
//! ## 设计思路
//!
//! 注入界面的渲染（按钮样式、弹层、动画）在本库范围之外。核心只通过
//! 一条事件通道把"该画什么"告诉渲染方，自己维护入口的可见性、忙碌
//! 状态与定时器语义。事件消费方掉线不影响核心流程（发送失败即忽略）。

use tokio::sync::mpsc;

use crate::config::ButtonPlacement;
use crate::relay::ImageSelectedPayload;

/// 发往渲染方的事件。
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// 图片获得悬停试穿入口（自动模式）。插入位置取自站点档案。
    AffordanceAttached { src: String, placement: ButtonPlacement },
    /// 入口转为可见。
    AffordanceShown { src: String },
    /// 入口转为隐藏。
    AffordanceHidden { src: String },
    /// 入口忙碌状态变化（请求期间禁用并显示处理中文案）。
    AffordanceBusy { src: String, busy: bool },
    /// 图片获得点击拦截（手动模式）。
    ClickTargetEnabled { src: String },
    /// 点击拦截移除，恢复默认交互样式。
    ClickTargetDisabled { src: String },
    /// 手动模式提示层显示/隐藏。
    SelectionOverlayShown,
    SelectionOverlayHidden,
    /// 选中反馈（打勾动画等）。
    SelectionFeedback { src: String },
    /// 当前手动选择被清除。
    SelectionCleared,
    /// 手动选择结果，转发给弹窗（IMAGE_SELECTED）。
    ImageSelected(ImageSelectedPayload),
    /// 试穿结果图（Base64）。
    TryOnResult { image_base64: String },
    /// 面向用户的错误文案。
    TryOnError { message: String },
    /// 需要登录：引导用户打开主界面。
    AuthRequired,
}

pub type UiEventSender = mpsc::UnboundedSender<UiEvent>;
pub type UiEventReceiver = mpsc::UnboundedReceiver<UiEvent>;

/// 创建事件通道。
pub fn channel() -> (UiEventSender, UiEventReceiver) {
    mpsc::unbounded_channel()
}
