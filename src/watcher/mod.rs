//! # 页面监视模块（watcher）
//!
//! ## 设计思路
//!
//! 监视器把"发现图片"与"提供入口"连接起来：
//! - 启动时做一次全文档扫描，覆盖订阅前已存在的图片。
//! - 随后订阅节点新增批次，新节点（及其图片后代）逐一过图片级检测。
//! - 已评估过的地址记入 ProcessedSet，重复出现即为空操作。
//! - 新接纳的图片延迟一小段再挂入口（可取消的定时任务），避免图片
//!   批量涌入时的布局抖动。
//!
//! 选择模式状态机：`automatic` 与 `manual` 互斥，运行时可切换。
//! 自动模式按图片提供悬停入口；手动模式改为点击拦截，单击指定唯一
//! 选中图片并通知 UI 协作方。模式切换时先拆除另一模式的全部交互。
//!
//! ## 实现思路
//!
//! - 内部状态单锁保护，锁内只做状态变更，事件发送与任务派生在锁外。
//! - 各类延时（挂载防抖、自动隐藏、离开补隐藏）均为可取消的 tokio
//!   任务，停止时统一中止，不留悬挂回调。

pub mod affordance;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::{DetectionConfig, SiteProfile};
use crate::detect::{is_product_image, CandidateImage};
use crate::dom::{collect_images, Document, Node, NodeHandle, Selector};
use crate::relay::{ImageDimensions, ImageSelectedPayload};
use crate::ui::{UiEvent, UiEventSender};

use affordance::AffordanceState;

/// 选择模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Automatic,
    Manual,
}

/// 监视器时序配置。
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// 接纳图片到挂入口之间的防抖延迟。
    pub attach_debounce: Duration,
    /// 入口显示后的自动隐藏延迟。
    pub auto_hide_delay: Duration,
    /// 指针离开图片后的补隐藏延迟。
    pub image_leave_hide_delay: Duration,
    /// 指针离开入口本体后的补隐藏延迟（比离开图片更短）。
    pub button_leave_hide_delay: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            attach_debounce: Duration::from_millis(150),
            auto_hide_delay: Duration::from_millis(2_000),
            image_leave_hide_delay: Duration::from_millis(600),
            button_leave_hide_delay: Duration::from_millis(200),
        }
    }
}

pub(crate) struct WatcherState {
    running: bool,
    mode: SelectionMode,
    /// 已评估过的图片地址（去重键）。
    processed: HashSet<String>,
    /// 已接纳图片的节点弱引用，模式切换重建交互时使用。
    accepted: HashMap<String, Weak<Node>>,
    /// 自动模式下的入口状态。
    pub(crate) affordances: HashMap<String, AffordanceState>,
    /// 手动模式下已挂点击拦截的地址。
    click_targets: HashSet<String>,
    /// 当前手动选中。
    selected: Option<String>,
    /// 正在进行试穿请求的地址（入口忙碌标志，抑制重复提交）。
    pub(crate) busy_requests: HashSet<String>,
    /// 挂载防抖任务。
    pending_attach: HashMap<String, JoinHandle<()>>,
    /// 变更订阅任务。
    observer: Option<JoinHandle<()>>,
}

impl WatcherState {
    fn new() -> Self {
        Self {
            running: false,
            mode: SelectionMode::Automatic,
            processed: HashSet::new(),
            accepted: HashMap::new(),
            affordances: HashMap::new(),
            click_targets: HashSet::new(),
            selected: None,
            busy_requests: HashSet::new(),
            pending_attach: HashMap::new(),
            observer: None,
        }
    }
}

/// 页面监视器。
pub struct PageWatcher {
    document: Document,
    profile: SiteProfile,
    detection: DetectionConfig,
    config: WatcherConfig,
    ui_tx: UiEventSender,
    pub(crate) state: Mutex<WatcherState>,
}

impl PageWatcher {
    pub fn new(
        document: Document,
        profile: SiteProfile,
        detection: DetectionConfig,
        config: WatcherConfig,
        ui_tx: UiEventSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            document,
            profile,
            detection,
            config,
            ui_tx,
            state: Mutex::new(WatcherState::new()),
        })
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, WatcherState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn emit(&self, event: UiEvent) {
        // 渲染方掉线不影响核心流程
        let _ = self.ui_tx.send(event);
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    pub fn mode(&self) -> SelectionMode {
        self.lock_state().mode
    }

    pub fn selected_src(&self) -> Option<String> {
        self.lock_state().selected.clone()
    }

    /// 按地址取回已接纳图片的节点（可能已随页面移除）。
    pub fn node_for(&self, src: &str) -> Option<NodeHandle> {
        self.lock_state().accepted.get(src).and_then(Weak::upgrade)
    }

    /// 启动监视：先全量扫描，再订阅后续变更。重复启动为空操作。
    pub fn start(self: &Arc<Self>) {
        {
            let mut state = self.lock_state();
            if state.running {
                return;
            }
            state.running = true;
        }

        log::info!("👀 页面监视已启动 - {}", self.document.hostname());

        for node in self.document.images() {
            self.process_image(&node);
        }

        let mut rx = self.document.observe();
        let watcher = Arc::clone(self);
        let observer = tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                for node in batch.added {
                    watcher.process_node(&node);
                }
            }
        });

        self.lock_state().observer = Some(observer);
    }

    /// 停止监视：退订变更、中止全部延时任务、拆除全部交互。
    pub fn stop(&self) {
        let (observer, pending, affordance_srcs, click_srcs) = {
            let mut state = self.lock_state();
            if !state.running {
                return;
            }
            state.running = false;

            let observer = state.observer.take();
            let pending: Vec<JoinHandle<()>> =
                state.pending_attach.drain().map(|(_, handle)| handle).collect();

            let mut affordance_srcs = Vec::new();
            for (src, affordance) in state.affordances.drain() {
                affordance.abort_timer();
                affordance_srcs.push(src);
            }

            let click_srcs: Vec<String> = state.click_targets.drain().collect();
            state.selected = None;
            state.busy_requests.clear();

            (observer, pending, affordance_srcs, click_srcs)
        };

        if let Some(observer) = observer {
            observer.abort();
        }
        for handle in pending {
            handle.abort();
        }
        for src in affordance_srcs {
            self.emit(UiEvent::AffordanceHidden { src });
        }
        for src in click_srcs {
            self.emit(UiEvent::ClickTargetDisabled { src });
        }

        log::info!("👀 页面监视已停止");
    }

    /// 处理一个新增节点：图片直接评估，容器节点评估其图片后代。
    pub fn process_node(self: &Arc<Self>, node: &NodeHandle) {
        for image in collect_images(node) {
            self.process_image(&image);
        }
    }

    /// 评估单张图片。
    ///
    /// 已评估过的地址是空操作；接纳后按当前模式挂接交互。
    pub fn process_image(self: &Arc<Self>, node: &NodeHandle) {
        let Some(candidate) = CandidateImage::from_node(node) else {
            return;
        };

        let src = candidate.src().to_string();
        if src.is_empty() {
            return;
        }

        {
            let mut state = self.lock_state();
            if !state.running {
                return;
            }
            // 每个地址整个页面生命周期内只评估一次
            if !state.processed.insert(src.clone()) {
                return;
            }
        }

        if !is_product_image(&candidate, &self.profile, &self.detection) {
            log::debug!("👀 图片未通过检测：{}", src);
            return;
        }

        log::debug!("👀 接纳商品图：{}", src);

        let mode = {
            let mut state = self.lock_state();
            state.accepted.insert(src.clone(), Arc::downgrade(node));
            state.mode
        };

        match mode {
            SelectionMode::Automatic => self.schedule_attach(&src),
            SelectionMode::Manual => self.enable_click_target(&src),
        }
    }

    /// 防抖后挂悬停入口。已有同名任务时不重复排程。
    fn schedule_attach(self: &Arc<Self>, src: &str) {
        let mut state = self.lock_state();
        if state.pending_attach.contains_key(src) || state.affordances.contains_key(src) {
            return;
        }

        let watcher = Arc::clone(self);
        let delay = self.config.attach_debounce;
        let task_src = src.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            watcher.attach_affordance(&task_src);
        });

        state.pending_attach.insert(src.to_string(), handle);
    }

    fn attach_affordance(self: &Arc<Self>, src: &str) {
        let attached = {
            let mut state = self.lock_state();
            state.pending_attach.remove(src);

            // 等待期间模式可能已切换或监视已停止
            if !state.running || state.mode != SelectionMode::Automatic {
                false
            } else {
                state
                    .affordances
                    .insert(src.to_string(), AffordanceState::new());
                true
            }
        };

        if attached {
            self.emit(UiEvent::AffordanceAttached {
                src: src.to_string(),
                placement: self.profile.button_placement,
            });
        }
    }

    /// 依站点档案定位图片的容器元素（渲染方的入口插入点提示）。
    ///
    /// 容器选择器按精确度排序，每个选择器取最近祖先；全部落空时退回
    /// 图片的直接父节点。
    pub fn find_image_container(&self, src: &str) -> Option<NodeHandle> {
        let node = self.node_for(src)?;

        for raw in &self.profile.container_selectors {
            let Ok(selector) = Selector::parse(raw) else {
                continue;
            };

            let mut current = Some(Arc::clone(&node));
            while let Some(candidate) = current {
                if selector.matches(&candidate) {
                    return Some(candidate);
                }
                current = candidate.parent();
            }
        }

        node.parent()
    }

    fn enable_click_target(&self, src: &str) {
        let enabled = {
            let mut state = self.lock_state();
            state.running && state.mode == SelectionMode::Manual && state.click_targets.insert(src.to_string())
        };

        if enabled {
            self.emit(UiEvent::ClickTargetEnabled {
                src: src.to_string(),
            });
        }
    }

    // ------------------------------------------------------------------
    // 选择模式状态机
    // ------------------------------------------------------------------

    /// 进入手动模式：先拆除全部自动入口，再给已接纳图片挂点击拦截。
    pub fn enable_manual(self: &Arc<Self>) {
        let (hidden, targets) = {
            let mut state = self.lock_state();
            if state.mode == SelectionMode::Manual {
                return;
            }
            state.mode = SelectionMode::Manual;

            for (_, handle) in state.pending_attach.drain() {
                handle.abort();
            }

            let mut hidden = Vec::new();
            for (src, affordance) in state.affordances.drain() {
                affordance.abort_timer();
                hidden.push(src);
            }

            let mut targets = Vec::new();
            let accepted: Vec<String> = state.accepted.keys().cloned().collect();
            for src in accepted {
                if state.click_targets.insert(src.clone()) {
                    targets.push(src);
                }
            }

            (hidden, targets)
        };

        for src in hidden {
            self.emit(UiEvent::AffordanceHidden { src });
        }
        for src in targets {
            self.emit(UiEvent::ClickTargetEnabled { src });
        }
        self.emit(UiEvent::SelectionOverlayShown);

        log::info!("🖱️ 已进入手动选择模式");
    }

    /// 退出手动模式：移除全部点击拦截，恢复已接纳图片的自动入口。
    pub fn disable_manual(self: &Arc<Self>) {
        let (disabled, rebuild) = {
            let mut state = self.lock_state();
            if state.mode == SelectionMode::Automatic {
                return;
            }
            state.mode = SelectionMode::Automatic;
            state.selected = None;

            let disabled: Vec<String> = state.click_targets.drain().collect();
            let rebuild: Vec<String> = state.accepted.keys().cloned().collect();
            (disabled, rebuild)
        };

        for src in disabled {
            self.emit(UiEvent::ClickTargetDisabled { src });
        }
        self.emit(UiEvent::SelectionOverlayHidden);

        for src in rebuild {
            self.schedule_attach(&src);
        }

        log::info!("🖱️ 已退出手动选择模式");
    }

    /// 清除当前手动选中，不改变模式。
    pub fn clear_selection(&self) {
        let cleared = {
            let mut state = self.lock_state();
            state.selected.take().is_some()
        };

        if cleared {
            self.emit(UiEvent::SelectionCleared);
        }
    }

    /// 手动模式下的图片点击。
    ///
    /// 返回 `true` 表示点击已被消费，调用方应抑制默认跳转行为。
    pub fn click_image(&self, src: &str) -> bool {
        let payload = {
            let mut state = self.lock_state();
            if state.mode != SelectionMode::Manual || !state.click_targets.contains(src) {
                return false;
            }

            state.selected = Some(src.to_string());
            state.accepted.get(src).and_then(Weak::upgrade)
        };

        let payload = payload.and_then(|node| {
            let image = node.image_data()?;
            let (width, height) = image
                .natural_size()
                .filter(|size| *size != (0, 0))
                .unwrap_or_else(|| image.rendered_size());

            Some(ImageSelectedPayload {
                src: src.to_string(),
                alt: image.alt().to_string(),
                domain: self.document.hostname().to_string(),
                dimensions: ImageDimensions { width, height },
            })
        });

        self.emit(UiEvent::SelectionFeedback {
            src: src.to_string(),
        });

        if let Some(payload) = payload {
            log::info!(
                "🖱️ 图片已选中 - {} ({}x{})",
                payload.src,
                payload.dimensions.width,
                payload.dimensions.height
            );
            self.emit(UiEvent::ImageSelected(payload));
        }

        true
    }
}
