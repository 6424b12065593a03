//! # 离屏画布
//!
//! ## 设计思路
//!
//! 像素提取走"离屏栅格面"语义：绘制总是成功，污染状态随跨源像素进入
//! 画布而被标记，回读（编码导出）时才以类型化错误暴露。调用方据错误
//! 类别决定回退路径，不做错误消息的字符串嗅探。
//!
//! ## 实现思路
//!
//! - 画布按自然尺寸创建，像素上限与内存估算先行校验，快速拒绝恶意尺寸。
//! - 导出为 JPEG 前将 RGBA 合成到 RGB（JPEG 无透明通道）。

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};

use crate::dom::{ImageLoadState, NodeHandle};

/// 画布像素上限（width * height）。
const MAX_CANVAS_PIXELS: u64 = 40_000_000;

/// 画布层错误。
///
/// `Tainted` 是独立类别：跨源安全限制，可恢复（代理回退），
/// 与其余提取故障区分开。
#[derive(Debug, thiserror::Error)]
pub enum CanvasError {
    #[error("画布被跨源像素污染，禁止回读：{0}")]
    Tainted(String),

    #[error("绘制失败：{0}")]
    Draw(String),

    #[error("编码失败：{0}")]
    Encode(String),

    #[error("画布尺寸非法：{0}")]
    Dimension(String),
}

/// 离屏栅格绘制面。
pub struct Canvas {
    width: u32,
    height: u32,
    surface: RgbaImage,
    tainted: bool,
}

impl Canvas {
    /// 按目标尺寸创建画布。
    pub fn new(width: u32, height: u32) -> Result<Self, CanvasError> {
        if width == 0 || height == 0 {
            return Err(CanvasError::Dimension(format!(
                "画布尺寸不能为零：{}x{}",
                width, height
            )));
        }

        let pixels = (width as u64)
            .checked_mul(height as u64)
            .ok_or_else(|| CanvasError::Dimension("画布像素数溢出".to_string()))?;

        if pixels > MAX_CANVAS_PIXELS {
            return Err(CanvasError::Dimension(format!(
                "画布像素过多：{} 像素（限制：{} 像素）",
                pixels, MAX_CANVAS_PIXELS
            )));
        }

        Ok(Self {
            width,
            height,
            surface: RgbaImage::new(width, height),
            tainted: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// 画布是否已被跨源像素污染。
    pub fn is_tainted(&self) -> bool {
        self.tainted
    }

    /// 将已加载图片绘制到画布原点。
    ///
    /// 与真实画布一致：跨源图片可以绘制，但会使画布进入污染态。
    pub fn draw_image(&mut self, node: &NodeHandle) -> Result<(), CanvasError> {
        let image = node
            .image_data()
            .ok_or_else(|| CanvasError::Draw("节点不是图片元素".to_string()))?;

        if image.load_state() != ImageLoadState::Loaded {
            return Err(CanvasError::Draw(format!(
                "图片尚未加载完成：{}",
                image.src()
            )));
        }

        let pixels = image
            .pixels()
            .ok_or_else(|| CanvasError::Draw(format!("图片像素不可用：{}", image.src())))?;

        image::imageops::replace(&mut self.surface, &pixels, 0, 0);

        if !image.cors_clean() {
            self.tainted = true;
        }

        Ok(())
    }

    /// 导出为 JPEG 字节。
    ///
    /// 污染态画布禁止回读，返回 `Tainted`。
    pub fn encode_jpeg(&self, quality: u8) -> Result<Bytes, CanvasError> {
        if self.tainted {
            return Err(CanvasError::Tainted(
                "画布包含不可回读的跨源像素".to_string(),
            ));
        }

        let rgb = DynamicImage::ImageRgba8(self.surface.clone()).into_rgb8();

        let mut buffer = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);

        rgb.write_with_encoder(encoder)
            .map_err(|e| CanvasError::Encode(format!("JPEG 编码失败：{}", e)))?;

        Ok(Bytes::from(buffer))
    }
}
