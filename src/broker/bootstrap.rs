//! # 共享服务配置获取
//!
//! ## 设计思路
//!
//! 远端下发的服务配置（API key 等）由代理统一获取与缓存，页面上下文
//! 永远接触不到。获取链路三层：内存缓存、持久化缓存、网络拉取。
//! 网络拉取失败时使用内置兜底配置，保证离线也能进入降级模式。
//!
//! ## 实现思路
//!
//! - 网络拉取最多 3 次，基础退避 250ms 逐次翻倍。
//! - 拉取成功后同时写回内存与持久化缓存。
//! - `CHECK_AUTH_STATUS` 只报告内存缓存是否就绪，不触发拉取。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{mutex_guard, Broker, BrokerError};
use crate::relay::AuthStatusEnvelope;

const CONFIG_RETRY_MAX_ATTEMPTS: u32 = 3;
const CONFIG_RETRY_BASE_DELAY_MS: u64 = 250;

/// 共享服务配置。
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    pub api_key: String,
    pub auth_domain: String,
    pub project_id: String,
    pub storage_bucket: String,
    pub messaging_sender_id: String,
    pub app_id: String,
}

impl ServiceConfig {
    /// 内置兜底配置：端点不可达时的降级模式。
    pub fn fallback() -> Self {
        Self {
            api_key: "demo-api-key".to_string(),
            auth_domain: "tryon-demo.firebaseapp.com".to_string(),
            project_id: "tryon-demo".to_string(),
            storage_bucket: "tryon-demo.appspot.com".to_string(),
            messaging_sender_id: "demo-sender".to_string(),
            app_id: "demo-app".to_string(),
        }
    }
}

impl Broker {
    /// 处理 CHECK_AUTH_STATUS：报告配置是否已就绪。
    pub(super) fn handle_auth_status(&self) -> AuthStatusEnvelope {
        let initialized = mutex_guard(&self.service_config).is_some();

        AuthStatusEnvelope {
            success: true,
            firebase_initialized: Some(initialized),
        }
    }

    /// 获取服务配置：内存缓存、持久化缓存、网络拉取依次尝试。
    ///
    /// 永不失败：全部落空时返回内置兜底配置。
    pub async fn ensure_service_config(&self) -> ServiceConfig {
        if let Some(config) = mutex_guard(&self.service_config).clone() {
            return config;
        }

        if let Some(store) = &self.store {
            match store.load_service_config() {
                Ok(Some(cached)) => {
                    log::debug!("🔐 使用持久化缓存的服务配置");
                    *mutex_guard(&self.service_config) = Some(cached.clone());
                    return cached;
                }
                Ok(None) => {}
                Err(err) => {
                    log::warn!("🔐 读取服务配置缓存失败：{}", err);
                }
            }
        }

        let config = match self.fetch_service_config_with_retry().await {
            Ok(config) => {
                if let Some(store) = &self.store {
                    if let Err(err) = store.save_service_config(&config) {
                        log::warn!("🔐 缓存服务配置失败：{}", err);
                    }
                }
                config
            }
            Err(err) => {
                log::warn!("🔐 服务配置端点不可用，使用内置兜底配置：{}", err);
                ServiceConfig::fallback()
            }
        };

        *mutex_guard(&self.service_config) = Some(config.clone());
        config
    }

    /// 有界重试拉取：3 次尝试，基础延迟 250ms 逐次翻倍。
    async fn fetch_service_config_with_retry(&self) -> Result<ServiceConfig, BrokerError> {
        let mut last_err: Option<BrokerError> = None;

        for attempt in 0..CONFIG_RETRY_MAX_ATTEMPTS {
            match self.fetch_service_config_once().await {
                Ok(config) => return Ok(config),
                Err(err) => {
                    let backoff_ms = CONFIG_RETRY_BASE_DELAY_MS << attempt;
                    log::warn!(
                        "🔐 服务配置拉取失败（第 {}/{} 次）：{}；{}ms 后重试",
                        attempt + 1,
                        CONFIG_RETRY_MAX_ATTEMPTS,
                        err,
                        backoff_ms
                    );
                    last_err = Some(err);

                    if attempt + 1 < CONFIG_RETRY_MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| BrokerError::Config("配置拉取异常结束".to_string())))
    }

    async fn fetch_service_config_once(&self) -> Result<ServiceConfig, BrokerError> {
        let response = self
            .http
            .get(&self.config.config_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.config.fetch_timeout)
            .send()
            .await
            .map_err(|e| BrokerError::Network(format!("配置请求失败：{}", e)))?;

        if !response.status().is_success() {
            return Err(BrokerError::Network(format!(
                "配置端点返回 HTTP {}",
                response.status().as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| BrokerError::InvalidFormat(format!("配置响应解析失败：{}", e)))?;

        // 端点两种包裹形式都接受
        let config_value = body
            .get("firebaseConfig")
            .or_else(|| body.get("config"))
            .cloned()
            .ok_or_else(|| BrokerError::InvalidFormat("配置响应缺少配置字段".to_string()))?;

        serde_json::from_value(config_value)
            .map_err(|e| BrokerError::InvalidFormat(format!("配置内容格式错误：{}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConfig;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    /// 按顺序应答的本地 HTTP 服务，用于模拟"先失败后成功"的端点。
    fn spawn_sequential_server(responses: Vec<(&'static str, String)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind test server failed");
        let addr = listener.local_addr().expect("read local addr failed");
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_thread = Arc::clone(&hits);

        thread::spawn(move || {
            for (status_line, body) in responses {
                let Ok((mut stream, _)) = listener.accept() else {
                    break;
                };
                hits_in_thread.fetch_add(1, Ordering::SeqCst);

                let mut request = [0u8; 2048];
                let _ = stream.read(&mut request);

                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.flush();
            }
        });

        (format!("http://127.0.0.1:{}/config", addr.port()), hits)
    }

    fn broker_with_config_url(config_url: &str) -> Broker {
        Broker::new(BrokerConfig::new(
            "http://127.0.0.1:9/try-on",
            "http://127.0.0.1:9/proxy",
            config_url,
        ))
        .expect("broker init failed")
    }

    #[tokio::test]
    async fn retries_with_backoff_then_uses_fetched_config() {
        let (config_url, hits) = spawn_sequential_server(vec![
            ("500 Internal Server Error", "oops".to_string()),
            ("500 Internal Server Error", "oops".to_string()),
            (
                "200 OK",
                r#"{"firebaseConfig":{"apiKey":"live-key","projectId":"live"}}"#.to_string(),
            ),
        ]);

        let broker = broker_with_config_url(&config_url);
        let config = broker.ensure_service_config().await;

        assert_eq!(config.api_key, "live-key");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_attempts_fall_back_to_builtin_config() {
        let (config_url, hits) = spawn_sequential_server(vec![
            ("500 Internal Server Error", "oops".to_string()),
            ("500 Internal Server Error", "oops".to_string()),
            ("500 Internal Server Error", "oops".to_string()),
        ]);

        let broker = broker_with_config_url(&config_url);
        let config = broker.ensure_service_config().await;

        assert_eq!(config, ServiceConfig::fallback());
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn second_call_hits_memory_cache() {
        let (config_url, hits) = spawn_sequential_server(vec![(
            "200 OK",
            r#"{"config":{"apiKey":"cached-key"}}"#.to_string(),
        )]);

        let broker = broker_with_config_url(&config_url);

        let first = broker.ensure_service_config().await;
        let second = broker.ensure_service_config().await;

        assert_eq!(first.api_key, "cached-key");
        assert_eq!(second.api_key, "cached-key");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn service_config_parses_camel_case_fields() {
        let parsed: ServiceConfig = serde_json::from_value(serde_json::json!({
            "apiKey": "k",
            "authDomain": "d",
            "projectId": "p",
        }))
        .expect("partial config should parse with defaults");

        assert_eq!(parsed.api_key, "k");
        assert_eq!(parsed.project_id, "p");
        assert_eq!(parsed.app_id, "");
    }

    #[test]
    fn fallback_config_is_marked_as_demo() {
        let fallback = ServiceConfig::fallback();
        assert!(fallback.api_key.starts_with("demo"));
    }
}
