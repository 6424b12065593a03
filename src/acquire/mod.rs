//! # 图片采集模块（acquire）
//!
//! ## 设计思路
//!
//! 两级采集策略：
//! 1. 本地画布提取：快、无网络往返，但跨源图片会因污染无法回读。
//! 2. 代理回退：经特权代理请求图片代理服务在服务端抓取，绕过页面级
//!    跨源限制，代价是时延与带宽。
//!
//! 污染错误按类型识别；其余本地提取故障也走同一条回退路径而不是直接
//! 失败，这是有意的健壮性取舍（现实中绝大多数提取失败都与跨源有关）。
//! 回退也失败时整体失败，由调用方向用户呈现错误，绝不静默重试。
//!
//! 不变式：不会从未完成加载的图片节点读取像素（提取前先挂起等待
//! load 事件，加载出错立即以加载失败返回）。

pub mod canvas;

pub use canvas::{Canvas, CanvasError};

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;

use crate::broker::BrokerHandle;
use crate::dom::NodeHandle;
use crate::relay::{BrokerRequest, FetchImageEnvelope, FetchImagePayload};

/// JPEG 导出质量（0.92）。
pub const EXPORT_JPEG_QUALITY: u8 = 92;

/// 采集层错误。
#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("节点不是图片元素")]
    NotAnImage,

    #[error("图片加载失败：{0}")]
    LoadFailed(String),

    #[error("图片提取失败：{0}")]
    Extraction(String),

    #[error("代理回退失败：{0}")]
    ProxyFallback(String),
}

/// 已编码的静态图片缓冲。
#[derive(Debug, Clone)]
pub struct EncodedImage {
    bytes: Bytes,
    mime: String,
}

impl EncodedImage {
    /// 以 JPEG 字节构造。
    pub fn from_jpeg(bytes: Bytes) -> Self {
        Self {
            bytes,
            mime: "image/jpeg".to_string(),
        }
    }

    /// 以原始字节构造，通过文件签名推断 MIME 类型。
    pub fn from_bytes_sniffed(bytes: Bytes) -> Result<Self, AcquireError> {
        let kind = infer::get(&bytes).ok_or_else(|| {
            AcquireError::Extraction("无法识别图片类型".to_string())
        })?;

        if kind.matcher_type() != infer::MatcherType::Image {
            return Err(AcquireError::Extraction(format!(
                "文件签名不是图片类型：{}",
                kind.mime_type()
            )));
        }

        Ok(Self {
            bytes,
            mime: kind.mime_type().to_string(),
        })
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// 导出为 Data URL（试穿请求的载荷形式）。
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// 图片采集器。
pub struct ImageAcquirer {
    broker: BrokerHandle,
}

impl ImageAcquirer {
    pub fn new(broker: BrokerHandle) -> Self {
        Self { broker }
    }

    /// 提取图片为已编码缓冲。
    ///
    /// 异步：未加载完成时挂起等待 load 事件。两级策略见模块文档。
    pub async fn extract(&self, node: &NodeHandle) -> Result<EncodedImage, AcquireError> {
        let image = node.image_data().ok_or(AcquireError::NotAnImage)?;
        let src = image.src().to_string();

        node.wait_until_loaded()
            .await
            .map_err(|_| AcquireError::LoadFailed(src.clone()))?;

        match self.draw_and_encode(node) {
            Ok(bytes) => {
                log::info!("🖼️ 本地提取成功 - {}B", bytes.len());
                Ok(EncodedImage::from_jpeg(bytes))
            }
            Err(CanvasError::Tainted(detail)) => {
                log::info!("🖼️ 画布被污染（{}），改走代理回退", detail);
                self.fetch_via_broker(&src).await
            }
            Err(other) => {
                // 其余提取故障同样回退，最大化成功率
                log::warn!("🖼️ 本地提取失败（{}），改走代理回退", other);
                self.fetch_via_broker(&src).await
            }
        }
    }

    /// 本地路径：按自然尺寸绘制到离屏画布并导出 JPEG。
    fn draw_and_encode(&self, node: &NodeHandle) -> Result<Bytes, CanvasError> {
        let image = node
            .image_data()
            .ok_or_else(|| CanvasError::Draw("节点不是图片元素".to_string()))?;

        let (width, height) = image
            .natural_size()
            .filter(|size| *size != (0, 0))
            .unwrap_or_else(|| image.rendered_size());

        let mut canvas = Canvas::new(width, height)?;
        canvas.draw_image(node)?;
        canvas.encode_jpeg(EXPORT_JPEG_QUALITY)
    }

    /// 回退路径：请求特权代理在服务端抓取同一地址。
    async fn fetch_via_broker(&self, src: &str) -> Result<EncodedImage, AcquireError> {
        let request = BrokerRequest::FetchImage(FetchImagePayload {
            image_url: src.to_string(),
        });

        let response = self
            .broker
            .request(&request)
            .await
            .map_err(|e| AcquireError::ProxyFallback(e.to_string()))?;

        let envelope: FetchImageEnvelope = serde_json::from_value(response)
            .map_err(|e| AcquireError::ProxyFallback(format!("回退响应格式错误：{}", e)))?;

        if !envelope.success {
            return Err(AcquireError::ProxyFallback(
                envelope.error.unwrap_or_else(|| "未知原因".to_string()),
            ));
        }

        let data_url = envelope.base64.ok_or_else(|| {
            AcquireError::ProxyFallback("回退响应缺少图片数据".to_string())
        })?;

        let bytes = crate::broker::proxy::decode_data_url(&data_url)
            .map_err(|e| AcquireError::ProxyFallback(e.to_string()))?;

        let encoded = EncodedImage::from_bytes_sniffed(Bytes::from(bytes))?;
        log::info!("🖼️ 代理回退成功 - {} {}B", encoded.mime(), encoded.len());
        Ok(encoded)
    }
}
