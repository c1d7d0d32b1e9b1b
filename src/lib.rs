//! # 海报工作室 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  调用方 (CLI / 上层界面)                  │
//! │   上传图片 + 提示词 + 边框名   ←   进度事件 / 失败报告   │
//! └───────┼──────────────────────────────────────────────────┘
//!         ↕ Result<RunOutcome, PosterError>
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            后端 (Rust)                           │
//! │                                                          │
//! │  ┌─ error ────── AppError (统一错误类型)                  │
//! │  │                                                       │
//! │  ├─ poster ───── 会话 + 编排 + 各阶段                     │
//! │  │   ├─ remover/canvas   抠图 · 居中 · 体积上限           │
//! │  │   ├─ generator        文生图请求 (n = 1, 不重试)       │
//! │  │   ├─ fetcher          URL / Base64 场景获取            │
//! │  │   └─ compositor       alpha 合成 (失败降级为底图)      │
//! │  │                                                       │
//! │  ├─ settings           JSON 设置 + API 凭据解析           │
//! │  └─ storage            海报输出目录 (返回 Result)         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `AppError`，外围逻辑的返回类型 |
//! | [`poster`] | 海报流水线：抠图、画布规整、场景生成与获取、合成、会话缓存 |
//! | [`settings`] | 设置文件读取、默认值覆盖、API 凭据与边框路径解析 |
//! | [`storage`] | 海报输出目录的创建、保存与统计 |

pub mod error;
pub mod poster;
pub mod settings;
pub mod storage;
