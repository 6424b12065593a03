//! # 图片级检测
//!
//! ## 设计思路
//!
//! 三级判定，精度从高到低，顺序不可变：
//! 1. 站点选择器命中（站点专属标记，精度最高）
//! 2. src/alt 中的服装关键词（中等精度）
//! 3. 尺寸兜底（自然尺寸优先，渲染尺寸次之；低精度、高覆盖）
//!
//! 判定前先做快速排除：空地址与内联 `data:` 图极少是商品主图且占内存，
//! 命中排除关键词（logo、图标、横幅等站点装饰）的直接拒绝。
//!
//! 本函数为纯函数、幂等，可安全重复调用。去重由上层 ProcessedSet 负责，
//! 那是效率手段而非正确性前提。

use std::sync::Weak;

use crate::config::{self, DetectionConfig, SiteProfile};
use crate::dom::{Node, NodeHandle, Selector};

/// 候选图片：以解析后的图片地址为身份（去重键）。
///
/// 节点为弱引用，候选对象不会延长页面节点的生命周期。
pub struct CandidateImage {
    node: Weak<Node>,
    src: String,
    alt: String,
    natural_size: Option<(u32, u32)>,
    rendered_size: (u32, u32),
}

impl CandidateImage {
    /// 从图片节点构造候选对象。非图片节点返回 `None`。
    pub fn from_node(node: &NodeHandle) -> Option<Self> {
        let image = node.image_data()?;

        Some(Self {
            node: std::sync::Arc::downgrade(node),
            src: image.src().to_string(),
            alt: image.alt().to_string(),
            natural_size: image.natural_size(),
            rendered_size: image.rendered_size(),
        })
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn alt(&self) -> &str {
        &self.alt
    }

    pub fn node(&self) -> Option<NodeHandle> {
        self.node.upgrade()
    }

    /// 判定用尺寸：自然尺寸可用则用之，否则退回渲染尺寸。
    pub fn effective_size(&self) -> (u32, u32) {
        match self.natural_size {
            Some(size) if size != (0, 0) => size,
            _ => self.rendered_size,
        }
    }
}

/// 判定候选图片是否为商品主图。
pub fn is_product_image(
    candidate: &CandidateImage,
    profile: &SiteProfile,
    config: &DetectionConfig,
) -> bool {
    let src = candidate.src().to_lowercase();

    // 快速排除
    if src.is_empty() {
        return false;
    }
    if src.starts_with("data:") || src.contains("base64") {
        return false;
    }

    let image_text = format!("{} {}", src, candidate.alt().to_lowercase());
    if config::hits_exclusion_keyword(&image_text) {
        return false;
    }

    // 一级：站点选择器
    if matches_site_selector(candidate, profile) {
        return true;
    }

    // 二级：服装关键词
    if config::contains_clothing_keyword(&image_text) {
        return true;
    }

    // 三级：尺寸兜底
    let (width, height) = candidate.effective_size();
    width >= config.min_product_dimension && height >= config.min_product_dimension
}

/// 站点选择器匹配。节点已被移除或选择器无法解析时按不命中处理。
fn matches_site_selector(candidate: &CandidateImage, profile: &SiteProfile) -> bool {
    let Some(node) = candidate.node() else {
        return false;
    };

    profile.image_selectors.iter().any(|raw| {
        Selector::parse(raw)
            .map(|selector| selector.matches(&node))
            .unwrap_or(false)
    })
}
