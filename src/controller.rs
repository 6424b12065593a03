//! # 页面控制器
//!
//! ## 设计思路
//!
//! 每个页面上下文构造一个控制器实例，启动时注册到消息派发处，不依赖
//! 任何全局单例。控制器负责三件事：
//! 1. 激活决策：读设置，手动模式无条件启动监视；自动模式要求开关开启
//!    且页面级检测为正。
//! 2. 入站指令：弹窗发来的模式切换与设置重读。
//! 3. 试穿点击编排：忙碌标志、取头像、采集衣物图、本地校验、经代理
//!    发起请求、把三态结果转成 UI 事件。无论结局如何，入口最终都会
//!    恢复空闲（收尾路径固定执行）。

use std::sync::{Arc, Mutex};

use crate::acquire::{AcquireError, ImageAcquirer};
use crate::broker::BrokerHandle;
use crate::config::{site_profile_for, DetectionConfig};
use crate::detect::is_clothing_page;
use crate::dom::{Document, NodeHandle};
use crate::relay::{RelayClient, TryOnResponse, UiCommand};
use crate::store::{Store, StoredSettings};
use crate::ui::{UiEvent, UiEventSender};
use crate::watcher::{PageWatcher, SelectionMode, WatcherConfig};

/// 页面控制器。
pub struct PageController {
    document: Document,
    watcher: Arc<PageWatcher>,
    relay: RelayClient,
    acquirer: ImageAcquirer,
    store: Arc<Store>,
    detection: DetectionConfig,
    ui_tx: UiEventSender,
    settings: Mutex<StoredSettings>,
}

impl PageController {
    /// 以默认检测与时序配置构造控制器。
    pub fn new(
        document: Document,
        broker: BrokerHandle,
        store: Arc<Store>,
        ui_tx: UiEventSender,
    ) -> Arc<Self> {
        Self::with_configs(
            document,
            broker,
            store,
            ui_tx,
            DetectionConfig::default(),
            WatcherConfig::default(),
        )
    }

    pub fn with_configs(
        document: Document,
        broker: BrokerHandle,
        store: Arc<Store>,
        ui_tx: UiEventSender,
        detection: DetectionConfig,
        watcher_config: WatcherConfig,
    ) -> Arc<Self> {
        let profile = site_profile_for(document.hostname());
        let watcher = PageWatcher::new(
            document.clone(),
            profile,
            detection.clone(),
            watcher_config,
            ui_tx.clone(),
        );

        Arc::new(Self {
            document,
            watcher,
            relay: RelayClient::new(broker.clone()),
            acquirer: ImageAcquirer::new(broker),
            store,
            detection,
            ui_tx,
            settings: Mutex::new(StoredSettings::default()),
        })
    }

    pub fn watcher(&self) -> &Arc<PageWatcher> {
        &self.watcher
    }

    fn emit(&self, event: UiEvent) {
        let _ = self.ui_tx.send(event);
    }

    fn load_settings(&self) -> StoredSettings {
        match self.store.load_settings() {
            Ok(Some(settings)) => settings,
            Ok(None) => StoredSettings::default(),
            Err(err) => {
                log::warn!("⚙️ 设置读取失败，使用默认值：{}", err);
                StoredSettings::default()
            }
        }
    }

    /// 激活：读设置并决定是否启动监视。页面加载后调用一次。
    pub fn activate(self: &Arc<Self>) {
        let settings = self.load_settings();
        log::info!(
            "⚙️ 激活 - autoDetect={} manualSelection={}",
            settings.auto_detect_enabled,
            settings.manual_selection_enabled
        );

        *lock(&self.settings) = settings.clone();
        self.apply_activation(&settings);
    }

    fn apply_activation(self: &Arc<Self>, settings: &StoredSettings) {
        if settings.manual_selection_enabled {
            // 手动模式不依赖页面级检测
            self.watcher.start();
            self.watcher.enable_manual();
            return;
        }

        if self.watcher.mode() == SelectionMode::Manual {
            self.watcher.disable_manual();
        }

        if !settings.auto_detect_enabled {
            log::info!("⚙️ 自动检测未启用，不自动提供入口");
            self.watcher.stop();
            return;
        }

        if self.watcher.is_running() {
            return;
        }

        if !is_clothing_page(&self.document, &self.detection) {
            log::info!("⚙️ 页面未判定为服装商品页，保持待机");
            return;
        }

        self.watcher.start();
    }

    /// 处理弹窗发来的模式指令。
    pub fn handle_command(self: &Arc<Self>, command: UiCommand) {
        log::debug!("⚙️ 收到指令：{}", command.action());

        match command {
            UiCommand::EnableManualSelection => {
                lock(&self.settings).manual_selection_enabled = true;
                self.watcher.start();
                self.watcher.enable_manual();
            }
            UiCommand::DisableManualSelection => {
                let auto_enabled = {
                    let mut settings = lock(&self.settings);
                    settings.manual_selection_enabled = false;
                    settings.auto_detect_enabled
                };

                self.watcher.disable_manual();
                if !auto_enabled {
                    self.watcher.stop();
                }
            }
            UiCommand::ClearImageSelection => {
                self.watcher.clear_selection();
            }
            UiCommand::ReloadSettings => {
                let settings = self.load_settings();
                *lock(&self.settings) = settings.clone();
                self.apply_activation(&settings);
            }
        }
    }

    /// 试穿点击主流程。
    ///
    /// 重复点击被忙碌标志抑制；收尾路径保证入口恢复空闲。
    pub async fn handle_try_on_click(self: &Arc<Self>, src: &str) {
        let Some(node) = self.watcher.node_for(src) else {
            self.emit(UiEvent::TryOnError {
                message: "The selected image is no longer on the page.".to_string(),
            });
            return;
        };

        if !self.watcher.try_begin_request(src) {
            log::debug!("👔 请求进行中，忽略重复点击：{}", src);
            return;
        }

        let outcome = self.run_try_on(&node, src).await;

        // 收尾：无论结局如何恢复入口空闲
        self.watcher.finish_request(src);

        match outcome {
            TryOnResponse::Success(image_base64) => {
                self.emit(UiEvent::TryOnResult { image_base64 });
            }
            TryOnResponse::AuthRequired => {
                self.emit(UiEvent::AuthRequired);
            }
            TryOnResponse::Failure(message) => {
                self.emit(UiEvent::TryOnError { message });
            }
        }
    }

    async fn run_try_on(&self, node: &NodeHandle, src: &str) -> TryOnResponse {
        let avatar = match self.store.load_avatar() {
            Ok(Some(avatar)) if !avatar.base64.is_empty() => avatar,
            Ok(_) => {
                return TryOnResponse::Failure(
                    "Please upload your photo in the extension popup first".to_string(),
                );
            }
            Err(err) => {
                log::warn!("👔 头像读取失败：{}", err);
                return TryOnResponse::Failure(
                    "Could not read your stored photo. Please re-upload it in the extension popup."
                        .to_string(),
                );
            }
        };

        let clothing = match self.acquirer.extract(node).await {
            Ok(encoded) => encoded,
            Err(AcquireError::LoadFailed(_)) => {
                return TryOnResponse::Failure(
                    "Image failed to load. Please try again.".to_string(),
                );
            }
            Err(err) => {
                log::warn!("👔 衣物图采集失败：{}", err);
                return TryOnResponse::Failure(
                    "Failed to extract image. Please try again.".to_string(),
                );
            }
        };

        self.relay
            .request_try_on(&avatar.base64, &clothing.to_data_url(), Some(src))
            .await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
