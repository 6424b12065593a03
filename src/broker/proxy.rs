//! # 跨源回退取图
//!
//! ## 设计思路
//!
//! 页面侧画布无法回读跨源像素时，改由代理请求图片代理服务在服务端抓取，
//! 绕过页面级跨源限制。抓取结果经签名校验与体积限制后以 Data URL 返回。
//!
//! ## 实现思路
//!
//! - 发出前先校验目标 URL（协议、主机），尽快失败。
//! - 可重试错误（超时、建连失败、408/429/5xx）做有界重试，指数退避加抖动。
//! - 同一地址短期内重复抓取直接命中 LRU 缓存（点击重试的常见场景）。
//! - 返回载荷逐层校验：Data URL 结构、Base64 解码、文件签名、体积上限。

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;

use super::{mutex_guard, Broker, BrokerError};
use crate::relay::{FetchImageEnvelope, FetchImagePayload};

const FETCH_RETRY_MAX_ATTEMPTS: u8 = 3;
const FETCH_RETRY_BASE_DELAY_MS: u64 = 180;

impl Broker {
    /// 处理 FETCH_IMAGE。
    pub(super) async fn handle_fetch_image(&self, payload: FetchImagePayload) -> FetchImageEnvelope {
        match self.fetch_image_as_data_url(&payload.image_url).await {
            Ok(data_url) => FetchImageEnvelope {
                success: true,
                base64: Some(data_url),
                error: None,
            },
            Err(err) => {
                log::warn!("🌐 代理取图失败 - {}：{}", redact_url_for_log(&payload.image_url), err);
                FetchImageEnvelope {
                    success: false,
                    base64: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn fetch_image_as_data_url(&self, image_url: &str) -> Result<String, BrokerError> {
        validate_image_url(image_url)?;

        if let Some(cached) = mutex_guard(&self.fetch_cache).get(image_url).cloned() {
            log::debug!("♻️ 命中取图缓存 - {}", redact_url_for_log(image_url));
            return Ok(cached);
        }

        log::info!("🌐 经图片代理抓取 - {}", redact_url_for_log(image_url));

        let body = serde_json::json!({ "imageUrl": image_url });
        let mut attempt: u8 = 1;

        let response_body: Value = loop {
            let send_result = self
                .http
                .post(&self.config.image_proxy_url)
                .json(&body)
                .timeout(self.config.fetch_timeout)
                .send()
                .await;

            match send_result {
                Ok(response) => {
                    let status = response.status();

                    if is_retryable_http_status(status) && attempt < FETCH_RETRY_MAX_ATTEMPTS {
                        let delay_ms = compute_retry_delay_with_jitter(attempt);
                        log::warn!(
                            "⚠️ 图片代理 HTTP {}（第 {}/{} 次，可重试）；{}ms 后重试",
                            status.as_u16(),
                            attempt,
                            FETCH_RETRY_MAX_ATTEMPTS,
                            delay_ms
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        attempt = attempt.saturating_add(1);
                        continue;
                    }

                    if !status.is_success() {
                        return Err(BrokerError::Network(format!(
                            "图片代理返回 HTTP {}",
                            status.as_u16()
                        )));
                    }

                    break response
                        .json()
                        .await
                        .map_err(|e| BrokerError::InvalidFormat(format!("代理响应解析失败：{}", e)))?;
                }
                Err(err) => {
                    if attempt >= FETCH_RETRY_MAX_ATTEMPTS || !is_retryable_transport_error(&err) {
                        return Err(map_transport_error(err, self.config.fetch_timeout));
                    }

                    let delay_ms = compute_retry_delay_with_jitter(attempt);
                    log::warn!(
                        "⚠️ 图片代理请求失败（第 {}/{} 次，可重试）：{}；{}ms 后重试",
                        attempt,
                        FETCH_RETRY_MAX_ATTEMPTS,
                        err,
                        delay_ms
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        };

        if let Some(error) = response_body.get("error").and_then(Value::as_str) {
            return Err(BrokerError::Network(format!("图片代理报错：{}", error)));
        }

        let data_url = response_body
            .get("base64")
            .and_then(Value::as_str)
            .ok_or_else(|| BrokerError::InvalidFormat("代理响应缺少 base64 字段".to_string()))?;

        self.validate_fetched_data_url(data_url)?;

        mutex_guard(&self.fetch_cache).put(image_url.to_string(), data_url.to_string());
        Ok(data_url.to_string())
    }

    /// 校验代理返回的 Data URL：可解码、确为图片、未超体积上限。
    fn validate_fetched_data_url(&self, data_url: &str) -> Result<(), BrokerError> {
        let bytes = decode_data_url(data_url)?;

        if bytes.len() as u64 > self.config.max_image_bytes {
            return Err(BrokerError::ResourceLimit(format!(
                "抓取图片过大：{:.2} MB（限制：{:.2} MB）",
                bytes.len() as f64 / 1024.0 / 1024.0,
                self.config.max_image_bytes as f64 / 1024.0 / 1024.0
            )));
        }

        validate_image_signature(&bytes)
    }
}

/// 解析 Data URL（或裸 Base64）为原始字节。
pub(crate) fn decode_data_url(data: &str) -> Result<Vec<u8>, BrokerError> {
    let normalized = data.trim();

    let base64_data = if normalized.starts_with("data:") {
        let marker = normalized
            .find(";base64,")
            .ok_or_else(|| BrokerError::InvalidFormat("Data URL 缺少 base64 标记".to_string()))?;
        &normalized[marker + 8..]
    } else {
        normalized
    };

    general_purpose::STANDARD
        .decode(base64_data)
        .map_err(|e| BrokerError::InvalidFormat(format!("Base64 解码失败：{}", e)))
}

/// 通过文件签名（magic bytes）校验字节确为图片。
pub(crate) fn validate_image_signature(bytes: &[u8]) -> Result<(), BrokerError> {
    if bytes.is_empty() {
        return Err(BrokerError::InvalidFormat("图片内容为空".to_string()));
    }

    let kind = infer::get(bytes)
        .ok_or_else(|| BrokerError::InvalidFormat("无法识别图片类型".to_string()))?;

    if kind.matcher_type() != infer::MatcherType::Image {
        return Err(BrokerError::InvalidFormat(format!(
            "文件签名不是图片类型：{}",
            kind.mime_type()
        )));
    }

    Ok(())
}

fn validate_image_url(url: &str) -> Result<(), BrokerError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| BrokerError::InvalidFormat(format!("URL 格式错误：{}", e)))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(BrokerError::InvalidFormat("仅支持 HTTP/HTTPS".to_string()));
    }

    if parsed.host_str().is_none() {
        return Err(BrokerError::InvalidFormat("URL 缺少主机地址".to_string()));
    }

    Ok(())
}

fn is_retryable_http_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

fn map_transport_error(error: reqwest::Error, timeout: Duration) -> BrokerError {
    if error.is_timeout() {
        BrokerError::Timeout(format!("代理取图超时（{}秒）", timeout.as_secs()))
    } else if error.is_connect() {
        BrokerError::Network(format!("无法连接图片代理：{}", error))
    } else {
        BrokerError::Network(format!("代理请求失败：{}", error))
    }
}

fn compute_retry_delay_with_jitter(attempt: u8) -> u64 {
    let exp = FETCH_RETRY_BASE_DELAY_MS
        .saturating_mul(1_u64 << (attempt.saturating_sub(1) as u32));
    let jitter_bound = (exp / 2).max(1);
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    exp.saturating_add(seed % (jitter_bound + 1))
}

/// 日志中隐去查询串，避免带签名的图片地址进入日志。
fn redact_url_for_log(url: &str) -> String {
    let Ok(parsed) = url::Url::parse(url) else {
        return "<invalid-url>".to_string();
    };

    let host = parsed.host_str().unwrap_or("<unknown-host>");
    format!("{}://{}{}", parsed.scheme(), host, parsed.path())
}
