//! # 检测模块（detect）
//!
//! ## 设计思路
//!
//! 两级启发式检测，精度优先于召回：
//! - `page`：页面级判定"是否服装商品页"，激活前执行一次，负例直接不激活，
//!   避免在无关站点上注入入口。
//! - `image`：图片级判定"是否商品主图"，纯函数、可重复调用，由监视器在
//!   首扫与变更回调中逐图调用。
//!
//! 两级检测共用 `config` 中同一份关键词表。

pub mod image;
pub mod page;

pub use image::{is_product_image, CandidateImage};
pub use page::is_clothing_page;
