//! # 会话状态模块
//!
//! ## 设计思路
//!
//! - `PipelineState`：会话级缓存，按提示词作为键保存上一次成功运行的主体画布、场景图与合成结果。
//!   由会话独占，以 `&mut` 传入编排器，不需要任何锁；多个会话各自持有独立实例。
//! - `StageTracker`：记录状态机当前阶段并校验迁移合法性，同时向监听器推送进度事件。
//!
//! ## 实现思路
//!
//! 失效规则只有一条：提示词变化时，整份缓存在新一轮运行成功后被整体替换。
//! 失败的运行不会触碰缓存，旧缓存在用户重试时依然可用。

use image::DynamicImage;

use super::{PipelineFailure, PosterError, SubjectCanvas};

/// 流水线状态机阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    #[default]
    Idle,
    SubjectProcessing,
    SceneRequesting,
    SceneFetching,
    Compositing,
    Ready,
    Error,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::SubjectProcessing => "subject_processing",
            Self::SceneRequesting => "scene_requesting",
            Self::SceneFetching => "scene_fetching",
            Self::Compositing => "compositing",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }

    /// 状态机迁移表。`Error` 为吸收态，只能由新一轮运行重置回 `Idle`。
    pub fn can_advance_to(self, next: Self) -> bool {
        use PipelineStage::*;

        match (self, next) {
            (Error, _) => false,
            (Idle, Error) => false,
            (_, Error) => true,
            (Idle, SubjectProcessing) | (Idle, Compositing) => true,
            (SubjectProcessing, SceneRequesting) => true,
            (SceneRequesting, SceneFetching) => true,
            (SceneFetching, Compositing) => true,
            (Compositing, Ready) => true,
            (Ready, Compositing) => true,
            _ => false,
        }
    }

    /// 面向进度条的百分比。
    pub fn progress_percent(self) -> u8 {
        match self {
            Self::Idle | Self::Error => 0,
            Self::SubjectProcessing => 10,
            Self::SceneRequesting => 35,
            Self::SceneFetching => 70,
            Self::Compositing => 90,
            Self::Ready => 100,
        }
    }
}

/// 推送给监听器的进度事件。
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProgressEvent {
    pub stage: PipelineStage,
    pub progress: u8,
    pub status: &'static str,
    pub error_code: Option<&'static str>,
    pub error_message: Option<String>,
}

pub type ProgressListener = Box<dyn Fn(&ProgressEvent) + Send + Sync>;

/// 阶段跟踪器。
#[derive(Default)]
pub struct StageTracker {
    stage: PipelineStage,
    last_failure: Option<PipelineFailure>,
    listener: Option<ProgressListener>,
}

impl std::fmt::Debug for StageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageTracker")
            .field("stage", &self.stage)
            .field("last_failure", &self.last_failure)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(listener: ProgressListener) -> Self {
        Self {
            listener: Some(listener),
            ..Self::default()
        }
    }

    pub fn set_listener(&mut self, listener: ProgressListener) {
        self.listener = Some(listener);
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn last_failure(&self) -> Option<&PipelineFailure> {
        self.last_failure.as_ref()
    }

    /// 新一轮运行总是从 `Idle` 开始，并清除上一轮的失败记录。
    pub fn begin_run(&mut self) {
        self.stage = PipelineStage::Idle;
        self.last_failure = None;
        self.emit("idle", None);
    }

    pub fn advance(&mut self, next: PipelineStage) -> Result<(), PosterError> {
        if !self.stage.can_advance_to(next) {
            return Err(PosterError::InvalidState(format!(
                "非法阶段迁移：{} -> {}",
                self.stage.as_str(),
                next.as_str()
            )));
        }

        log::debug!("🔀 阶段迁移：{} -> {}", self.stage.as_str(), next.as_str());
        self.stage = next;
        let status = if next == PipelineStage::Ready { "ready" } else { "running" };
        self.emit(status, None);
        Ok(())
    }

    /// 记录失败并进入 `Error`。
    pub fn fail(&mut self, error: &PosterError) {
        if self.stage != PipelineStage::Idle && self.stage != PipelineStage::Error {
            self.stage = PipelineStage::Error;
        }
        self.reject(error);
    }

    /// 记录失败但保持当前阶段，用于被拒绝的请求（如就绪后选择了未知边框）。
    pub fn reject(&mut self, error: &PosterError) {
        let failure = PipelineFailure::from(error);
        self.emit("error", Some(&failure));
        self.last_failure = Some(failure);
    }

    pub(crate) fn reset(&mut self) {
        self.stage = PipelineStage::Idle;
        self.last_failure = None;
    }

    fn emit(&self, status: &'static str, failure: Option<&PipelineFailure>) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };

        listener(&ProgressEvent {
            stage: self.stage,
            progress: self.stage.progress_percent(),
            status,
            error_code: failure.map(|f| f.code),
            error_message: failure.map(|f| f.message.clone()),
        });
    }
}

/// 上一次成功运行的缓存快照。
#[derive(Debug, Clone)]
pub(crate) struct CachedRun {
    pub(crate) prompt: String,
    pub(crate) subject: SubjectCanvas,
    pub(crate) scene: DynamicImage,
    /// 场景 + 主体的中间合成结果，换框时直接复用。
    pub(crate) intermediate: DynamicImage,
    pub(crate) frame: String,
    pub(crate) poster: DynamicImage,
}

/// 会话级流水线缓存。
#[derive(Debug, Default)]
pub struct PipelineState {
    cached: Option<CachedRun>,
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 缓存是否可直接服务该提示词。
    pub fn is_fresh_for(&self, prompt: &str) -> bool {
        self.cached
            .as_ref()
            .is_some_and(|cached| cached.prompt == prompt)
    }

    pub fn cached_prompt(&self) -> Option<&str> {
        self.cached.as_ref().map(|cached| cached.prompt.as_str())
    }

    pub fn subject(&self) -> Option<&SubjectCanvas> {
        self.cached.as_ref().map(|cached| &cached.subject)
    }

    pub fn scene(&self) -> Option<&DynamicImage> {
        self.cached.as_ref().map(|cached| &cached.scene)
    }

    pub fn frame(&self) -> Option<&str> {
        self.cached.as_ref().map(|cached| cached.frame.as_str())
    }

    pub fn poster(&self) -> Option<&DynamicImage> {
        self.cached.as_ref().map(|cached| &cached.poster)
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    pub(crate) fn cached(&self) -> Option<&CachedRun> {
        self.cached.as_ref()
    }

    /// 整体替换缓存，旧提示词对应的画布与场景随之丢弃。
    pub(crate) fn replace(&mut self, run: CachedRun) {
        if let Some(previous) = self.cached.as_ref() {
            if previous.prompt != run.prompt {
                log::debug!("🧹 提示词已变化，丢弃旧缓存");
            }
        }
        self.cached = Some(run);
    }

    pub(crate) fn record_composite(
        &mut self,
        intermediate: Option<DynamicImage>,
        frame: &str,
        poster: DynamicImage,
    ) {
        if let Some(cached) = self.cached.as_mut() {
            if let Some(intermediate) = intermediate {
                cached.intermediate = intermediate;
            }
            cached.frame = frame.to_string();
            cached.poster = poster;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use std::sync::{Arc, Mutex};

    fn cached_run(prompt: &str) -> CachedRun {
        let canvas = RgbaImage::new(4, 4);
        CachedRun {
            prompt: prompt.to_string(),
            subject: SubjectCanvas::new(canvas, vec![1, 2, 3]),
            scene: DynamicImage::new_rgba8(4, 4),
            intermediate: DynamicImage::new_rgba8(4, 4),
            frame: "frame1".to_string(),
            poster: DynamicImage::new_rgba8(4, 4),
        }
    }

    #[test]
    fn transition_table_follows_state_machine() {
        use PipelineStage::*;

        assert!(Idle.can_advance_to(SubjectProcessing));
        assert!(Idle.can_advance_to(Compositing));
        assert!(SubjectProcessing.can_advance_to(SceneRequesting));
        assert!(SceneRequesting.can_advance_to(SceneFetching));
        assert!(SceneFetching.can_advance_to(Compositing));
        assert!(Compositing.can_advance_to(Ready));
        assert!(Ready.can_advance_to(Compositing));

        assert!(SubjectProcessing.can_advance_to(Error));
        assert!(SceneFetching.can_advance_to(Error));
        assert!(!Idle.can_advance_to(Error));
        assert!(!Error.can_advance_to(Idle));
        assert!(!Idle.can_advance_to(SceneRequesting));
        assert!(!Ready.can_advance_to(SubjectProcessing));
    }

    #[test]
    fn tracker_rejects_illegal_transition() {
        let mut tracker = StageTracker::new();
        let result = tracker.advance(PipelineStage::SceneFetching);

        assert!(matches!(result, Err(PosterError::InvalidState(_))));
        assert_eq!(tracker.stage(), PipelineStage::Idle);
    }

    #[test]
    fn tracker_emits_progress_and_failure() {
        let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut tracker = StageTracker::with_listener(Box::new(move |event| {
            sink.lock().expect("lock poisoned").push(event.clone());
        }));

        tracker.begin_run();
        tracker.advance(PipelineStage::SubjectProcessing).unwrap();
        tracker.fail(&PosterError::BackgroundRemoval("boom".into()));

        let events = events.lock().expect("lock poisoned");
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].progress, 10);
        assert_eq!(events[2].status, "error");
        assert_eq!(events[2].error_code, Some("background_removal"));
        assert_eq!(tracker.stage(), PipelineStage::Error);
        assert_eq!(
            tracker.last_failure().map(|f| f.stage),
            Some(Some("subject_processing"))
        );
    }

    #[test]
    fn reject_records_failure_without_leaving_stage() {
        let events: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let mut tracker = StageTracker::with_listener(Box::new(move |event| {
            sink.lock().expect("lock poisoned").push(event.clone());
        }));
        tracker.begin_run();
        for stage in [
            PipelineStage::SubjectProcessing,
            PipelineStage::SceneRequesting,
            PipelineStage::SceneFetching,
            PipelineStage::Compositing,
            PipelineStage::Ready,
        ] {
            tracker.advance(stage).unwrap();
        }

        tracker.reject(&PosterError::FrameNotFound("frame9".into()));

        assert_eq!(tracker.stage(), PipelineStage::Ready);
        assert_eq!(tracker.last_failure().map(|f| f.code), Some("frame_not_found"));
        let events = events.lock().expect("lock poisoned");
        let last = events.last().expect("error event expected");
        assert_eq!(last.status, "error");
        assert_eq!(last.stage, PipelineStage::Ready);
    }

    #[test]
    fn state_is_keyed_on_exact_prompt() {
        let mut state = PipelineState::new();
        assert!(!state.is_fresh_for("sunset beach"));

        state.replace(cached_run("sunset beach"));
        assert!(state.is_fresh_for("sunset beach"));
        assert!(!state.is_fresh_for("sunset beach "));
        assert!(!state.is_fresh_for(""));

        state.replace(cached_run(""));
        assert!(state.is_fresh_for(""));
        assert_eq!(state.cached_prompt(), Some(""));

        state.invalidate();
        assert!(state.subject().is_none());
    }

    #[test]
    fn record_composite_keeps_subject_and_scene() {
        let mut state = PipelineState::new();
        state.replace(cached_run("city"));

        state.record_composite(None, "frame3", DynamicImage::new_rgba8(2, 2));

        assert_eq!(state.frame(), Some("frame3"));
        assert_eq!(state.poster().map(|p| p.width()), Some(2));
        assert_eq!(state.subject().map(|s| s.encoded_len()), Some(3));
        assert_eq!(state.scene().map(|s| s.width()), Some(4));
    }
}
