//! # 海报生成模块（poster）
//!
//! ## 设计思路
//!
//! 该模块将“上传图片 → 背景移除 → 画布规整 → 场景生成 → 场景获取 → 图层合成”
//! 按职责拆分为多个子模块，避免单文件膨胀与耦合。
//!
//! - `service`：承载会话状态（`PosterSession`）
//! - `handler`：编排整条处理流水线，决定走缓存还是重算
//! - `remover`：背景移除（默认色键实现）
//! - `canvas`：等比缩小、居中、PNG 体积校验
//! - `generator`：文生图请求
//! - `fetcher`：URL / Base64 场景获取与安全校验
//! - `compositor`：双图层 alpha 合成（失败降级为底图）
//! - `frames`：命名边框集合
//! - `config/error/source/state`：配置、错误、中间数据模型、状态机与缓存
//!
//! ## 实现思路
//!
//! 对外仅暴露必要类型，解码等内部细节保持 `mod` 私有。
//! 三个外部协作方（抠图 / 生成 / 获取）以 trait 注入，测试可替换为计数桩。
//!
//! ## 新同事快速上手
//!
//! 可以按下面顺序理解调用链：
//!
//! ```text
//! main.rs（CLI 参数 + 设置加载）
//!    ↓
//! service.rs（会话：缓存 + 阶段跟踪）
//!    ↓
//! handler.rs（统一编排 + 阶段耗时日志）
//!    ├─ decode.rs + remover.rs（解码 + 抠图）
//!    ├─ canvas.rs（缩放居中 + 体积上限）
//!    ├─ generator.rs（生成请求，n = 1，不重试）
//!    ├─ fetcher.rs（下载 / 内联解码 + 签名校验）
//!    └─ compositor.rs × 2（场景 + 主体，再叠边框）
//!    ↓
//! RunOutcome / PosterError（附失败阶段）
//! ```
//!
//! ## 分层职责建议
//!
//! - 配置与策略变更优先改 `config.rs`
//! - 业务流程顺序、缓存规则变更优先改 `handler.rs` 与 `state.rs`
//! - 单阶段行为优化分别改 `remover/canvas/generator/fetcher/compositor`

mod canvas;
mod compositor;
mod config;
mod decode;
mod error;
mod fetcher;
mod frames;
mod generator;
mod handler;
mod remover;
mod service;
mod source;
mod state;

pub use canvas::{CanvasNormalizer, fit_within};
pub use compositor::Compositor;
pub use config::{CanvasSize, GenerationQuality, PosterConfig};
pub use error::{PipelineFailure, PosterError};
pub use fetcher::{HttpSceneFetcher, SceneFetcher};
pub use frames::{Frame, FrameSet};
pub use generator::{OpenAiSceneGenerator, SceneGenerator};
pub use handler::{DefaultPosterPipeline, PosterPipeline};
pub use remover::{BackgroundRemover, ColorKeyRemover};
pub use service::{DefaultPosterSession, PosterSession};
pub use source::{
    GenerationRequest, GenerationResult, RunOutcome, SceneReference, StageTimings, SubjectCanvas, UploadedImage,
};
pub use state::{PipelineStage, PipelineState, ProgressEvent, ProgressListener, StageTracker};
