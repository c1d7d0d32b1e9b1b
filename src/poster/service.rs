//! # 服务层（会话状态）
//!
//! ## 设计思路
//!
//! 使用 `PosterSession` 承载单个用户会话的缓存与阶段状态，替代进程级全局缓存。
//! 编排器（`PosterPipeline`）通过 `Arc` 在多个会话间共享，本身无状态；
//! 每个会话独占自己的 `PipelineState` 与 `StageTracker`，会话之间互不影响。
//!
//! ## 实现思路
//!
//! 对外仅暴露少量稳定 API：
//! - `run`：执行完整生成链路（命中缓存时只做合成）
//! - `select_frame`：就绪后仅更换边框
//! - `reset`：丢弃缓存并回到 `Idle`

use std::sync::Arc;

use image::DynamicImage;

use super::{
    BackgroundRemover, ColorKeyRemover, HttpSceneFetcher, OpenAiSceneGenerator, PipelineFailure, PipelineStage,
    PipelineState, PosterError, PosterPipeline, ProgressListener, RunOutcome, SceneFetcher, SceneGenerator,
    StageTracker, UploadedImage,
};

pub type DefaultPosterSession = PosterSession<ColorKeyRemover, OpenAiSceneGenerator, HttpSceneFetcher>;

/// 单个会话。
pub struct PosterSession<R, G, F> {
    pipeline: Arc<PosterPipeline<R, G, F>>,
    state: PipelineState,
    tracker: StageTracker,
}

impl<R, G, F> PosterSession<R, G, F>
where
    R: BackgroundRemover,
    G: SceneGenerator,
    F: SceneFetcher,
{
    pub fn new(pipeline: Arc<PosterPipeline<R, G, F>>) -> Self {
        Self {
            pipeline,
            state: PipelineState::new(),
            tracker: StageTracker::new(),
        }
    }

    /// 注册进度监听器，每次阶段迁移或失败时回调。
    pub fn with_progress_listener(mut self, listener: ProgressListener) -> Self {
        self.tracker.set_listener(listener);
        self
    }

    pub async fn run(
        &mut self,
        upload: &UploadedImage,
        prompt: &str,
        frame: &str,
    ) -> Result<RunOutcome, PosterError> {
        self.pipeline
            .run(&mut self.state, &mut self.tracker, upload, prompt, frame)
            .await
    }

    pub fn select_frame(&mut self, frame: &str) -> Result<RunOutcome, PosterError> {
        self.pipeline
            .recompose_frame(&mut self.state, &mut self.tracker, frame)
    }

    pub fn stage(&self) -> PipelineStage {
        self.tracker.stage()
    }

    pub fn cached_prompt(&self) -> Option<&str> {
        self.state.cached_prompt()
    }

    pub fn current_frame(&self) -> Option<&str> {
        self.state.frame()
    }

    /// 最近一次成功合成的海报（失败的运行不会覆盖它）。
    pub fn last_poster(&self) -> Option<&DynamicImage> {
        self.state.poster()
    }

    pub fn last_failure(&self) -> Option<&PipelineFailure> {
        self.tracker.last_failure()
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn frame_names(&self) -> Vec<&str> {
        self.pipeline.frames().names()
    }

    pub fn reset(&mut self) {
        log::info!("🧹 会话已重置");
        self.state.invalidate();
        self.tracker.reset();
    }
}
