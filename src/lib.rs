//! # 虚拟试穿页面流水线 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  页面上下文（内容侧）                      │
//! │                                                          │
//! │  dom ──→ watcher ──→ detect ──→ UI 事件（ui::UiEvent）    │
//! │   │         │                                            │
//! │   │    controller ──→ acquire（画布 + 代理回退）           │
//! │   │         │                                            │
//! │   │      relay::RelayClient                              │
//! └───┼─────────┼────────────────────────────────────────────┘
//!     │         ↕ 消息信道（relay::protocol，action 标签联合）
//! ┌───┼─────────┼────────────────────────────────────────────┐
//! │   ↕         ↕          特权代理（broker）                 │
//! │                                                          │
//! │  ├─ remote ───── 远端试穿服务调用与状态归类                │
//! │  ├─ proxy ────── 跨源回退取图（经图片代理服务）            │
//! │  ├─ bootstrap ── 服务配置获取（重试 + 缓存 + 兜底）        │
//! │  ├─ safety ───── 按设备能力启用的本地安全审查              │
//! │  └─ store ────── 设置 / 头像 / 配置缓存（JSON 文件）       │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `AppError`，子系统错误在边界处上转 |
//! | [`config`] | 关键词表、站点选择器档案、检测阈值 |
//! | [`dom`] | 页面模型：元素树、图片加载状态、变更订阅、选择器匹配 |
//! | [`detect`] | 页面级与图片级启发式检测（精度优先） |
//! | [`watcher`] | 全量扫描 + 变更监视、去重、防抖挂载、选择模式状态机 |
//! | [`acquire`] | 离屏画布提取 + 跨源污染回退链 |
//! | [`relay`] | 消息协议与试穿请求客户端（本地校验、三态结果映射） |
//! | [`broker`] | 特权代理：网络出口、配置获取、代理取图、安全审查 |
//! | [`controller`] | 页面控制器：激活决策、入站指令、试穿点击编排 |
//! | [`store`] | 设置 / 头像 / 服务配置的本地持久化 |
//! | [`ui`] | UI 协作方事件接口（渲染在范围之外） |

pub mod acquire;
pub mod broker;
pub mod config;
pub mod controller;
pub mod detect;
pub mod dom;
pub mod error;
pub mod relay;
pub mod store;
pub mod ui;
pub mod watcher;
