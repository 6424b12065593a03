//! # 特权代理模块（broker）
//!
//! ## 设计思路
//!
//! 页面上下文不能发起跨源请求，也不能长期持有凭据，所有网络出口与
//! 机密读取统一收敛到本代理。代理以单个异步任务运行，通过消息信道
//! 对外提供服务，每次安装期一个实例，多个页面上下文共享句柄。
//!
//! 子模块按能力拆分：
//! - `remote`：远端试穿服务调用与状态码归类
//! - `proxy`：跨源回退取图（经图片代理服务）
//! - `bootstrap`：共享服务配置获取（有界重试 + 本地缓存 + 内置兜底）
//! - `safety`：按设备能力启用的本地安全审查
//!
//! ## 实现思路
//!
//! - 请求以线上 JSON 形式进入，`BrokerRequest::from_value` 穷尽匹配动作，
//!   未知动作返回显式错误信封而不是静默丢弃。
//! - 回复经 `oneshot` 返回；请求方中途放弃时发送失败被忽略（即发即忘）。
//! - HTTP 客户端复用一个实例，超时按请求类别单独设置。

pub mod bootstrap;
pub mod proxy;
pub mod remote;
pub mod safety;

pub use bootstrap::ServiceConfig;
pub use safety::SafetyClassifier;

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use lru::LruCache;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::relay::{BrokerRequest, ProtocolError};
use crate::store::Store;

const PROXY_CACHE_MAX_ENTRIES: usize = 24;

/// 代理层统一错误类型。
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("网络错误：{0}")]
    Network(String),

    #[error("超时错误：{0}")]
    Timeout(String),

    #[error("格式错误：{0}")]
    InvalidFormat(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("配置错误：{0}")]
    Config(String),

    #[error("安全审查不可用：{0}")]
    SafetyUnavailable(String),

    #[error("安全审查回复不可解析")]
    SafetyUnreadable,

    #[error("代理通道已关闭")]
    ChannelClosed,
}

/// 代理运行配置。
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// 远端试穿服务地址。
    pub try_on_url: String,
    /// 图片代理服务地址（跨源回退路径）。
    pub image_proxy_url: String,
    /// 共享服务配置端点。
    pub config_url: String,
    /// 试穿调用总超时。生成耗时较长，上限放宽到 90 秒。
    pub try_on_timeout: Duration,
    /// 代理取图与配置获取的总超时。
    pub fetch_timeout: Duration,
    /// 建连超时。
    pub connect_timeout: Duration,
    /// 代理取图解码后的最大字节数。
    pub max_image_bytes: u64,
    /// 启用本地安全审查所需的最小设备内存。
    pub min_safety_memory_bytes: u64,
    /// 设备内存探测覆盖值（测试注入用）。
    pub device_memory_override: Option<u64>,
}

impl BrokerConfig {
    /// 以三个服务端点构造配置，其余参数取默认值。
    pub fn new(try_on_url: &str, image_proxy_url: &str, config_url: &str) -> Self {
        Self {
            try_on_url: try_on_url.to_string(),
            image_proxy_url: image_proxy_url.to_string(),
            config_url: config_url.to_string(),
            try_on_timeout: Duration::from_secs(90),
            fetch_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(8),
            max_image_bytes: 20 * 1024 * 1024,
            min_safety_memory_bytes: 4 * 1024 * 1024 * 1024,
            device_memory_override: None,
        }
    }
}

pub(crate) fn mutex_guard<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct BrokerMessage {
    request: Value,
    reply: oneshot::Sender<Value>,
}

/// 代理句柄：页面上下文持有的轻量入口，可随意克隆。
#[derive(Clone)]
pub struct BrokerHandle {
    tx: mpsc::UnboundedSender<BrokerMessage>,
}

impl BrokerHandle {
    /// 发送已解析的动作并等待回复。
    pub async fn request(&self, request: &BrokerRequest) -> Result<Value, BrokerError> {
        self.request_raw(request.to_value()).await
    }

    /// 以线上 JSON 形式发送请求并等待回复。
    pub async fn request_raw(&self, request: Value) -> Result<Value, BrokerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BrokerMessage {
                request,
                reply: reply_tx,
            })
            .map_err(|_| BrokerError::ChannelClosed)?;

        reply_rx.await.map_err(|_| BrokerError::ChannelClosed)
    }
}

/// 特权代理。
pub struct Broker {
    pub(super) http: reqwest::Client,
    pub(super) config: BrokerConfig,
    pub(super) service_config: Mutex<Option<ServiceConfig>>,
    pub(super) fetch_cache: Mutex<LruCache<String, String>>,
    pub(super) safety: Option<Arc<dyn SafetyClassifier>>,
    pub(super) store: Option<Arc<Store>>,
}

impl Broker {
    /// 构造代理并初始化复用型 HTTP 客户端。
    pub fn new(config: BrokerConfig) -> Result<Self, BrokerError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| BrokerError::Network(format!("无法创建 HTTP 客户端：{}", e)))?;

        let cache_capacity =
            NonZeroUsize::new(PROXY_CACHE_MAX_ENTRIES).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            http,
            config,
            service_config: Mutex::new(None),
            fetch_cache: Mutex::new(LruCache::new(cache_capacity)),
            safety: None,
            store: None,
        })
    }

    /// 注入本地安全审查能力（可选）。
    pub fn with_safety_classifier(mut self, classifier: Arc<dyn SafetyClassifier>) -> Self {
        self.safety = Some(classifier);
        self
    }

    /// 注入持久化存储（配置缓存用，可选）。
    pub fn with_store(mut self, store: Arc<Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// 启动代理任务，返回供页面上下文使用的句柄。
    ///
    /// 同时在后台预热共享服务配置（有界重试 + 兜底，永不失败）。
    pub fn spawn(self) -> BrokerHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<BrokerMessage>();
        let broker = Arc::new(self);

        let warmup = Arc::clone(&broker);
        tokio::spawn(async move {
            let config = warmup.ensure_service_config().await;
            log::debug!("🔐 服务配置就绪 - project={}", config.project_id);
        });

        tokio::spawn(async move {
            log::info!("📡 特权代理已启动");
            while let Some(message) = rx.recv().await {
                let response = broker.dispatch(&message.request).await;
                // 请求方可能已随页面卸载离开，发送失败直接忽略
                let _ = message.reply.send(response);
            }
            log::info!("📡 特权代理已退出");
        });

        BrokerHandle { tx }
    }

    /// 动作派发：穷尽匹配全部已知动作，未知动作显式拒绝。
    pub async fn dispatch(&self, raw: &Value) -> Value {
        match BrokerRequest::from_value(raw) {
            Ok(BrokerRequest::RequestVirtualTryOn(payload)) => {
                envelope_value(self.handle_try_on(payload).await)
            }
            Ok(BrokerRequest::FetchImage(payload)) => {
                envelope_value(self.handle_fetch_image(payload).await)
            }
            Ok(BrokerRequest::CheckAuthStatus) => envelope_value(self.handle_auth_status()),
            Ok(BrokerRequest::CheckAvatar(payload)) => {
                envelope_value(self.handle_check_avatar(payload).await)
            }
            Err(err @ ProtocolError::UnknownAction(_)) => {
                log::warn!("📡 拒绝未知动作：{}", err);
                error_value(&err.to_string())
            }
            Err(err) => {
                log::warn!("📡 消息解析失败：{}", err);
                error_value(&err.to_string())
            }
        }
    }
}

fn envelope_value<T: serde::Serialize>(envelope: T) -> Value {
    serde_json::to_value(&envelope).unwrap_or_else(|e| error_value(&e.to_string()))
}

fn error_value(message: &str) -> Value {
    serde_json::json!({ "success": false, "error": message })
}
