//! 检测配置模块
//!
//! # 设计思路
//!
//! 将所有"可调策略"集中到一处：服装关键词表、排除关键词表、站点选择器档案、
//! 尺寸阈值。页面级与图片级两套检测共用同一份关键词表，避免多处维护不一致。
//!
//! # 实现思路
//!
//! - 关键词表为多语言（英语 + 土耳其语）小写子串集合，匹配前统一转小写。
//! - 排除关键词使用 `RegexSet` 一次性多模式匹配，`once_cell::sync::Lazy`
//!   首次调用时编译，后续零成本复用。
//! - 站点档案按主机名查表，未命中时回退到通用档案。档案在页面生命周期内不变。

use once_cell::sync::Lazy;
use regex::RegexSet;

/// 服装领域关键词（小写）。
///
/// 页面分类与图片分类共用此表。匹配语义为大小写不敏感的子串命中。
pub const CLOTHING_KEYWORDS: &[&str] = &[
    // 土耳其语
    "elbise", "gömlek", "ceket", "pantolon", "etek", "tişört",
    "ayakkabı", "ayakkabi", "giyim", "kıyafet", "kiyafet", "moda",
    "kadın", "erkek", "çocuk", "bebek", "unisex",
    // 英语
    "dress", "shirt", "jacket", "pants", "skirt", "shoes", "apparel",
    "clothing", "fashion", "blouse", "trousers", "jeans", "sweater",
    "hoodie", "coat", "blazer", "suit", "boots", "sneakers", "sandals",
    "heels", "flats", "socks", "underwear", "accessories", "bag",
    "purse", "belt", "hat", "scarf", "gloves", "t-shirt",
];

/// 预编译的排除模式集合：命中则判定图片不是商品主图。
///
/// 覆盖站点装饰元素（logo、图标、横幅、广告）与导航类图标
/// （购物车、收藏、菜单箭头等）。
static EXCLUSION_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"logo",
        r"icon",
        r"avatar",
        r"banner",
        r"advert",
        r"sprite",
        r"placeholder",
        r"cart",
        r"basket",
        r"wishlist",
        r"favorite",
        r"menu",
        r"navbar",
        r"breadcrumb",
        r"arrow",
        r"badge",
        r"rating",
        r"payment",
        r"tracking-pixel",
    ])
    .unwrap()
});

/// 判断图片文本（src + alt，已小写）是否命中排除关键词。
pub fn hits_exclusion_keyword(image_text: &str) -> bool {
    EXCLUSION_PATTERNS.is_match(image_text)
}

/// 判断文本（已小写）是否包含任一服装关键词。
pub fn contains_clothing_keyword(text: &str) -> bool {
    CLOTHING_KEYWORDS.iter().any(|keyword| text.contains(keyword))
}

/// 尺码选择器特征模式。
///
/// id/name/class 中包含 "size" 或本地化词（"beden"）的控件视为尺码选择器。
pub const SIZE_SELECTOR_PATTERNS: &[&str] = &[
    r#"[id*="size-selector"]"#,
    r#"[class*="size-selector"]"#,
    r#"[id*="beden-secimi"]"#,
    r#"[class*="beden-secimi"]"#,
    r#"select[name*="size"]"#,
    r#"select[id*="beden"]"#,
    r#"[data-testid*="size"]"#,
    r#"[aria-label*="size"]"#,
    r#"input[name*="size"]"#,
    r#"input[id*="beden"]"#,
];

/// 购买动作元素特征模式（加入购物车、立即购买等）。
pub const ACTION_BUTTON_SELECTORS: &[&str] = &[
    r#"button[class*="add-to-cart"]"#,
    r#"button[class*="buy-now"]"#,
    r#"button[class*="purchase"]"#,
    r#"button[class*="order"]"#,
    r#"a[class*="add-to-cart"]"#,
    r#"a[class*="buy-now"]"#,
    r#"[data-testid*="add-to-cart"]"#,
    r#"[data-testid*="buy-now"]"#,
];

/// 检测策略配置。
///
/// 字段覆盖图片尺寸兜底阈值与批量图片信号阈值，可按站点特性调整，
/// 但三级判定优先顺序（选择器 > 关键词 > 尺寸）不可变。
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// 尺寸兜底判定的最小宽高（像素），宽高均需达到。
    pub min_product_dimension: u32,
    /// 页面级"批量服装图片"信号的最小命中数。
    pub bulk_image_threshold: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_product_dimension: 200,
            bulk_image_threshold: 2,
        }
    }
}

/// 试穿入口的插入位置（相对图片容器）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonPlacement {
    Before,
    After,
}

/// 站点档案：一组按精确度排序的选择器与入口插入策略。
///
/// 构造后在页面生命周期内不变。
#[derive(Debug, Clone)]
pub struct SiteProfile {
    /// 商品图选择器，命中即判定为商品图（最高精度信号）。
    pub image_selectors: Vec<String>,
    /// 图片容器选择器，用于定位入口插入点。
    pub container_selectors: Vec<String>,
    /// 入口插入位置。
    pub button_placement: ButtonPlacement,
}

impl SiteProfile {
    fn from_selectors(
        image_selectors: &[&str],
        container_selectors: &[&str],
        button_placement: ButtonPlacement,
    ) -> Self {
        Self {
            image_selectors: image_selectors.iter().map(|s| s.to_string()).collect(),
            container_selectors: container_selectors.iter().map(|s| s.to_string()).collect(),
            button_placement,
        }
    }

    /// 通用档案：适用于未单独适配的站点。
    pub fn universal() -> Self {
        Self::from_selectors(
            &[
                r#"img[src*="product"]"#,
                r#"img[alt*="model"]"#,
                r#"img[alt*="clothing"]"#,
                r#"img[alt*="dress"]"#,
                r#"img[alt*="shirt"]"#,
                r#"img[alt*="pants"]"#,
                r#"img[alt*="shoes"]"#,
                r#"img[alt*="jacket"]"#,
                r#"img[alt*="elbise"]"#,
                r#"img[alt*="gömlek"]"#,
                r#"img[alt*="pantolon"]"#,
                r#"img[alt*="ayakkabı"]"#,
                r#"img[alt*="ceket"]"#,
                ".product-image img",
                ".product-detail img",
                ".main-image img",
                ".gallery img",
                ".gallery-item img",
            ],
            &[
                ".product-image",
                ".product-detail",
                ".main-image",
                ".gallery",
                ".gallery-item",
                ".image-container",
                ".product-container",
                "body",
            ],
            ButtonPlacement::After,
        )
    }

    fn amazon() -> Self {
        Self::from_selectors(
            &[
                "#landingImage",
                "#imgTagWrapperId img",
                ".a-dynamic-image",
                "#main-image-container img",
                ".image-main img",
            ],
            &[
                "#imgTagWrapperId",
                "#main-image-container",
                ".image-main",
                "#landingImage",
            ],
            ButtonPlacement::After,
        )
    }

    fn zara() -> Self {
        Self::from_selectors(
            &[
                ".product-detail-images img",
                ".media-image img",
                ".product-image img",
                r#"[data-testid="media-image"] img"#,
            ],
            &[
                ".product-detail-images",
                ".media-image",
                ".product-image",
                r#"[data-testid="media-image"]"#,
            ],
            ButtonPlacement::After,
        )
    }
}

/// 按主机名查找站点档案，未适配站点回退到通用档案。
pub fn site_profile_for(hostname: &str) -> SiteProfile {
    let host = hostname.to_lowercase();

    if host.contains("amazon") {
        SiteProfile::amazon()
    } else if host.contains("zara") {
        SiteProfile::zara()
    } else {
        SiteProfile::universal()
    }
}
