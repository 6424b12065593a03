//! # 悬停入口生命周期
//!
//! ## 设计思路
//!
//! 自动模式下每张接纳图片有一个懒创建的悬停入口，可见性由指针事件与
//! 定时器共同驱动：
//! - 指针进入图片：取消待隐藏，显示入口，并重置自动隐藏计时。
//! - 指针离开图片：延迟补隐藏（给用户移向入口的时间）。
//! - 指针进入入口本体：取消待隐藏。
//! - 指针离开入口本体：以更短的延迟补隐藏。
//!
//! 请求期间入口带忙碌标志：重复点击被抑制，待隐藏定时器到点也不隐藏，
//! 请求结束后标志必被清除（由控制器的收尾路径保证）。
//!
//! ## 实现思路
//!
//! 隐藏定时器是每入口一个的可取消任务，重排程前先中止旧任务。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::PageWatcher;
use crate::ui::UiEvent;

/// 单个悬停入口的状态。
pub(crate) struct AffordanceState {
    visible: bool,
    hide_timer: Option<JoinHandle<()>>,
}

impl AffordanceState {
    pub(crate) fn new() -> Self {
        Self {
            visible: false,
            hide_timer: None,
        }
    }

    pub(crate) fn abort_timer(&self) {
        if let Some(timer) = &self.hide_timer {
            timer.abort();
        }
    }
}

impl PageWatcher {
    /// 指针进入图片：显示入口并重置自动隐藏计时。
    pub fn pointer_enter_image(self: &Arc<Self>, src: &str) {
        let shown = {
            let mut state = self.lock_state();
            let Some(affordance) = state.affordances.get_mut(src) else {
                return;
            };

            if let Some(timer) = affordance.hide_timer.take() {
                timer.abort();
            }

            if affordance.visible {
                false
            } else {
                affordance.visible = true;
                true
            }
        };

        if shown {
            self.emit(UiEvent::AffordanceShown {
                src: src.to_string(),
            });
        }

        self.schedule_hide(src, self.config.auto_hide_delay);
    }

    /// 指针离开图片：延迟补隐藏。
    pub fn pointer_leave_image(self: &Arc<Self>, src: &str) {
        self.schedule_hide(src, self.config.image_leave_hide_delay);
    }

    /// 指针进入入口本体：保持可见。
    pub fn pointer_enter_affordance(self: &Arc<Self>, src: &str) {
        let mut state = self.lock_state();
        if let Some(affordance) = state.affordances.get_mut(src) {
            if let Some(timer) = affordance.hide_timer.take() {
                timer.abort();
            }
        }
    }

    /// 指针离开入口本体：以更短延迟补隐藏。
    pub fn pointer_leave_affordance(self: &Arc<Self>, src: &str) {
        self.schedule_hide(src, self.config.button_leave_hide_delay);
    }

    /// 重排程隐藏定时器。
    fn schedule_hide(self: &Arc<Self>, src: &str, delay: Duration) {
        let mut state = self.lock_state();
        let Some(affordance) = state.affordances.get_mut(src) else {
            return;
        };

        if let Some(timer) = affordance.hide_timer.take() {
            timer.abort();
        }

        let watcher = Arc::clone(self);
        let task_src = src.to_string();
        affordance.hide_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            watcher.hide_affordance_now(&task_src);
        }));
    }

    fn hide_affordance_now(&self, src: &str) {
        let hidden = {
            let mut state = self.lock_state();

            // 请求进行中的入口保持可见
            if state.busy_requests.contains(src) {
                return;
            }

            let Some(affordance) = state.affordances.get_mut(src) else {
                return;
            };

            affordance.hide_timer = None;
            if affordance.visible {
                affordance.visible = false;
                true
            } else {
                false
            }
        };

        if hidden {
            self.emit(UiEvent::AffordanceHidden {
                src: src.to_string(),
            });
        }
    }

    /// 测试与渲染方查询用：入口当前是否可见。
    pub fn is_affordance_visible(&self, src: &str) -> bool {
        self.lock_state()
            .affordances
            .get(src)
            .map(|a| a.visible)
            .unwrap_or(false)
    }

    /// 标记入口进入忙碌态。已在请求中返回 `false`（抑制重复提交）。
    pub fn try_begin_request(&self, src: &str) -> bool {
        let begun = {
            let mut state = self.lock_state();
            state.busy_requests.insert(src.to_string())
        };

        if begun {
            self.emit(UiEvent::AffordanceBusy {
                src: src.to_string(),
                busy: true,
            });
        }

        begun
    }

    /// 清除忙碌态，入口恢复空闲。无论请求结局如何都必须调用。
    pub fn finish_request(&self, src: &str) {
        let finished = {
            let mut state = self.lock_state();
            state.busy_requests.remove(src)
        };

        if finished {
            self.emit(UiEvent::AffordanceBusy {
                src: src.to_string(),
                busy: false,
            });
        }
    }
}
