//! # 页面级检测
//!
//! ## 设计思路
//!
//! 五个信号按精度从高到低依次求值，首个命中即判定为服装商品页：
//! 1. URL 与标题中的服装关键词
//! 2. 结构化数据（JSON-LD）中的商品声明 + 服装关键词
//! 3. 尺码选择器特征元素
//! 4. 购买动作元素（加入购物车、立即购买）
//! 5. 批量服装图片（src+alt 命中关键词的图片数达到阈值）
//!
//! 全部未命中则判负，上层不再激活监视器。畸形的结构化数据块静默跳过，
//! 只作废该信号，不影响其余信号求值。

use crate::config::{
    self, DetectionConfig, ACTION_BUTTON_SELECTORS, SIZE_SELECTOR_PATTERNS,
};
use crate::dom::Document;

/// 判定页面是否为服装商品页。
///
/// 同步求值，激活阶段调用一次。
pub fn is_clothing_page(document: &Document, config: &DetectionConfig) -> bool {
    if url_or_title_matches(document) {
        log::debug!("🔍 页面判定：URL/标题命中服装关键词");
        return true;
    }

    if structured_data_matches(document) {
        log::debug!("🔍 页面判定：结构化数据声明了服装商品");
        return true;
    }

    if document.matches_any(SIZE_SELECTOR_PATTERNS) {
        log::debug!("🔍 页面判定：检测到尺码选择器");
        return true;
    }

    if document.matches_any(ACTION_BUTTON_SELECTORS) {
        log::debug!("🔍 页面判定：检测到购买动作元素");
        return true;
    }

    if bulk_image_text_matches(document, config) {
        log::debug!("🔍 页面判定：多张图片文本命中服装关键词");
        return true;
    }

    log::debug!("🔍 页面判定：无任何信号命中，不激活");
    false
}

fn url_or_title_matches(document: &Document) -> bool {
    let url_and_title = format!("{} {}", document.url(), document.title()).to_lowercase();
    config::contains_clothing_keyword(&url_and_title)
}

/// 结构化数据信号：序列化文本同时声明商品类型并包含服装关键词。
///
/// 解析失败只作废当前数据块，不影响判定流程。
fn structured_data_matches(document: &Document) -> bool {
    for block in document.structured_data() {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(block) else {
            continue;
        };

        let serialized = value.to_string().to_lowercase();
        let declares_product = serialized.contains(r#""@type":"product""#)
            || serialized.contains(r#""@type":"offer""#);

        if declares_product && config::contains_clothing_keyword(&serialized) {
            return true;
        }
    }

    false
}

fn bulk_image_text_matches(document: &Document, config: &DetectionConfig) -> bool {
    let mut clothing_image_count = 0usize;

    for node in document.images() {
        let Some(image) = node.image_data() else {
            continue;
        };

        let image_text = format!("{} {}", image.src(), image.alt()).to_lowercase();
        if crate::config::contains_clothing_keyword(&image_text) {
            clothing_image_count += 1;
            if clothing_image_count >= config.bulk_image_threshold {
                return true;
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Node;

    fn blank_config() -> DetectionConfig {
        DetectionConfig::default()
    }

    #[test]
    fn title_keyword_classifies_positive() {
        let doc = Document::builder("https://shop.example.com/item/9")
            .title("Women's Summer Dress — Buy Now")
            .build();

        assert!(is_clothing_page(&doc, &blank_config()));
    }

    #[test]
    fn url_keyword_classifies_positive() {
        let doc = Document::builder("https://shop.example.com/elbise/kirmizi-123").build();
        assert!(is_clothing_page(&doc, &blank_config()));
    }

    #[test]
    fn structured_product_block_with_keyword_classifies_positive() {
        let doc = Document::builder("https://shop.example.com/item/9")
            .structured_data_block(
                r#"{"@context":"https://schema.org","@type":"Product","name":"Red Dress"}"#,
            )
            .build();

        assert!(is_clothing_page(&doc, &blank_config()));
    }

    #[test]
    fn malformed_structured_block_is_swallowed() {
        let doc = Document::builder("https://shop.example.com/item/9")
            .structured_data_block("{not valid json")
            .structured_data_block(
                r#"{"@type":"Offer","itemOffered":{"name":"linen shirt"}}"#,
            )
            .build();

        assert!(is_clothing_page(&doc, &blank_config()));
    }

    #[test]
    fn structured_block_without_product_type_is_not_enough() {
        let doc = Document::builder("https://news.example.com/article")
            .structured_data_block(r#"{"@type":"NewsArticle","headline":"dress codes"}"#,)
            .build();

        // 无商品声明、无其他信号，判负
        assert!(!is_clothing_page(&doc, &blank_config()));
    }

    #[test]
    fn size_selector_element_classifies_positive() {
        let doc = Document::builder("https://shop.example.com/item/9").build();
        doc.append(
            &Node::element("select")
                .attr("name", "product-size")
                .build(),
        );

        assert!(is_clothing_page(&doc, &blank_config()));
    }

    #[test]
    fn add_to_cart_button_classifies_positive() {
        let doc = Document::builder("https://shop.example.com/item/9").build();
        doc.append(&Node::element("button").class("btn add-to-cart-primary").build());

        assert!(is_clothing_page(&doc, &blank_config()));
    }

    #[test]
    fn two_clothing_images_classify_positive() {
        let doc = Document::builder("https://shop.example.com/item/9").build();
        doc.append(&Node::image("https://cdn.example.com/p/1.jpg").alt("blue dress").build());
        doc.append(&Node::image("https://cdn.example.com/p/2.jpg").alt("dress back view").build());

        assert!(is_clothing_page(&doc, &blank_config()));
    }

    #[test]
    fn single_clothing_image_is_below_bulk_threshold() {
        let doc = Document::builder("https://shop.example.com/item/9").build();
        doc.append(&Node::image("https://cdn.example.com/p/1.jpg").alt("blue dress").build());

        assert!(!is_clothing_page(&doc, &blank_config()));
    }

    #[test]
    fn page_without_any_signal_classifies_negative() {
        let doc = Document::builder("https://news.example.com/politics/today")
            .title("Morning headlines")
            .build();
        doc.append(&Node::image("https://cdn.example.com/header.jpg").alt("city skyline").build());

        assert!(!is_clothing_page(&doc, &blank_config()));
    }
}
