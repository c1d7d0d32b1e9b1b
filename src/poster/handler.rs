//! # 核心编排模块
//!
//! ## 设计思路
//!
//! `PosterPipeline` 只负责流程编排，不持有任何会话状态；缓存（`PipelineState`）与
//! 阶段跟踪（`StageTracker`）都由调用方以 `&mut` 传入。处理链路固定为：
//! 1. 解析边框名称（未知边框在任何阶段开始前失败）
//! 2. 提示词命中缓存：直接进入合成
//! 3. 未命中：背景移除 → 画布规整 → 场景生成 → 场景获取 → 合成
//! 4. 全部成功后整体写入缓存
//!
//! ## 实现思路
//!
//! - 前四个阶段为硬性中止：任何错误都立即返回，缓存保持原样，错误原文附带阶段上报。
//! - 合成阶段永不失败：`Compositor` 内部降级为底图。
//! - 记录 `remove/normalize/generate/fetch/composite/total` 阶段耗时，便于性能诊断。

use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;

use super::decode::{decode_scene, decode_upload};
use super::state::CachedRun;
use super::{
    BackgroundRemover, CanvasNormalizer, ColorKeyRemover, Compositor, Frame, FrameSet, GenerationRequest,
    HttpSceneFetcher, OpenAiSceneGenerator, PipelineStage, PipelineState, PosterConfig, PosterError,
    RunOutcome, SceneFetcher, SceneGenerator, StageTimings, StageTracker, UploadedImage,
};

/// 默认组合：色键抠图 + OpenAI 兼容生成 + HTTP 获取。
pub type DefaultPosterPipeline = PosterPipeline<ColorKeyRemover, OpenAiSceneGenerator, HttpSceneFetcher>;

/// 海报流水线编排器。
///
/// 三个外部协作方（抠图、生成、获取）以泛型注入，可在测试中替换为计数桩。
pub struct PosterPipeline<R, G, F> {
    remover: R,
    generator: G,
    fetcher: F,
    normalizer: CanvasNormalizer,
    compositor: Compositor,
    frames: Arc<FrameSet>,
    config: PosterConfig,
}

impl DefaultPosterPipeline {
    /// 使用默认协作方创建流水线。
    pub fn with_defaults(
        api_key: impl Into<String>,
        frames: Arc<FrameSet>,
        config: PosterConfig,
    ) -> Result<Self, PosterError> {
        let remover = ColorKeyRemover::from_config(&config);
        let generator = OpenAiSceneGenerator::new(api_key, &config)?;
        let fetcher = HttpSceneFetcher::new(&config)?;

        Self::new(remover, generator, fetcher, frames, config)
    }
}

impl<R, G, F> PosterPipeline<R, G, F>
where
    R: BackgroundRemover,
    G: SceneGenerator,
    F: SceneFetcher,
{
    pub fn new(
        remover: R,
        generator: G,
        fetcher: F,
        frames: Arc<FrameSet>,
        config: PosterConfig,
    ) -> Result<Self, PosterError> {
        config.validate()?;

        Ok(Self {
            remover,
            generator,
            fetcher,
            normalizer: CanvasNormalizer::from_config(&config),
            compositor: Compositor::from_config(&config),
            frames,
            config,
        })
    }

    pub fn frames(&self) -> &FrameSet {
        &self.frames
    }

    pub fn config(&self) -> &PosterConfig {
        &self.config
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    /// 处理主入口：上传图 + 提示词 + 边框 → 海报。
    ///
    /// 成功后 `state` 被整体替换为本次结果；失败时 `state` 不变，`tracker` 记录失败阶段。
    pub async fn run(
        &self,
        state: &mut PipelineState,
        tracker: &mut StageTracker,
        upload: &UploadedImage,
        prompt: &str,
        frame: &str,
    ) -> Result<RunOutcome, PosterError> {
        tracker.begin_run();

        let result = match self.frames.get(frame) {
            Ok(frame) => self.run_stages(state, tracker, upload, prompt, frame).await,
            Err(err) => Err(err),
        };

        if let Err(err) = &result {
            log::error!("❌ 海报生成失败（{}）：{}", tracker.stage().as_str(), err);
            tracker.fail(err);
        }

        result
    }

    /// 仅更换边框：复用缓存的中间合成结果，只执行一次合成。
    ///
    /// 被拒绝时阶段与缓存保持不变，`tracker` 仍记录失败原因。
    pub fn recompose_frame(
        &self,
        state: &mut PipelineState,
        tracker: &mut StageTracker,
        frame: &str,
    ) -> Result<RunOutcome, PosterError> {
        let result = self.recompose_stages(state, tracker, frame);

        if let Err(err) = &result {
            log::error!("❌ 更换边框失败（{}）：{}", tracker.stage().as_str(), err);
            tracker.reject(err);
        }

        result
    }

    fn recompose_stages(
        &self,
        state: &mut PipelineState,
        tracker: &mut StageTracker,
        frame: &str,
    ) -> Result<RunOutcome, PosterError> {
        let cached = match state.cached() {
            Some(cached) if tracker.stage() == PipelineStage::Ready => cached,
            _ => {
                return Err(PosterError::InvalidState(format!(
                    "仅在就绪状态下可更换边框（当前：{}）",
                    tracker.stage().as_str()
                )));
            }
        };

        let frame = self.frames.get(frame)?;
        tracker.advance(PipelineStage::Compositing)?;

        let mut composite_calls = 0;
        let composite_start = Instant::now();
        let poster = self.composite_counted(&mut composite_calls, &cached.intermediate, frame.image());
        let composite_ms = composite_start.elapsed().as_millis();

        state.record_composite(None, frame.name(), poster.clone());
        tracker.advance(PipelineStage::Ready)?;

        log::info!("🖼️ 已切换边框：{} - composite={}ms", frame.name(), composite_ms);

        Ok(RunOutcome {
            poster,
            frame: frame.name().to_string(),
            cache_hit: true,
            composite_calls,
            timings: StageTimings {
                composite_ms,
                total_ms: composite_ms,
                ..StageTimings::default()
            },
        })
    }

    async fn run_stages(
        &self,
        state: &mut PipelineState,
        tracker: &mut StageTracker,
        upload: &UploadedImage,
        prompt: &str,
        frame: &Frame,
    ) -> Result<RunOutcome, PosterError> {
        let total_start = Instant::now();

        if state.is_fresh_for(prompt) {
            return self.run_cached(state, tracker, frame, total_start);
        }

        let mut timings = StageTimings::default();

        tracker.advance(PipelineStage::SubjectProcessing)?;
        log::info!(
            "🚀 开始生成海报 - 上传: {} bytes（{}） 边框: {}",
            upload.len(),
            upload.source_hint,
            frame.name()
        );

        let remove_start = Instant::now();
        let decoded = decode_upload(upload, &self.config)?;
        let cutout = self.remover.remove(&decoded)?;
        timings.remove_ms = remove_start.elapsed().as_millis();

        let normalize_start = Instant::now();
        let subject = self.normalizer.normalize(cutout)?;
        timings.normalize_ms = normalize_start.elapsed().as_millis();

        tracker.advance(PipelineStage::SceneRequesting)?;
        let generate_start = Instant::now();
        let request = GenerationRequest::new(prompt, self.config.generation_size, self.config.quality);
        let generated = self.generator.generate(&request).await?;
        timings.generate_ms = generate_start.elapsed().as_millis();

        tracker.advance(PipelineStage::SceneFetching)?;
        let fetch_start = Instant::now();
        let scene_bytes = self.fetcher.fetch(&generated.reference).await?;
        let scene = decode_scene(&scene_bytes, &self.config)?;
        timings.fetch_ms = fetch_start.elapsed().as_millis();

        tracker.advance(PipelineStage::Compositing)?;
        let mut composite_calls = 0;
        let composite_start = Instant::now();
        let (intermediate, poster) = self.composite_layers(&mut composite_calls, &scene, subject.image(), frame);
        timings.composite_ms = composite_start.elapsed().as_millis();

        state.replace(CachedRun {
            prompt: prompt.to_string(),
            subject,
            scene,
            intermediate,
            frame: frame.name().to_string(),
            poster: poster.clone(),
        });
        tracker.advance(PipelineStage::Ready)?;

        timings.total_ms = total_start.elapsed().as_millis();
        log::info!(
            "✅ 海报生成完成 - remove={}ms normalize={}ms generate={}ms fetch={}ms composite={}ms total={}ms",
            timings.remove_ms,
            timings.normalize_ms,
            timings.generate_ms,
            timings.fetch_ms,
            timings.composite_ms,
            timings.total_ms
        );

        Ok(RunOutcome {
            poster,
            frame: frame.name().to_string(),
            cache_hit: false,
            composite_calls,
            timings,
        })
    }

    fn run_cached(
        &self,
        state: &mut PipelineState,
        tracker: &mut StageTracker,
        frame: &Frame,
        total_start: Instant,
    ) -> Result<RunOutcome, PosterError> {
        log::info!("♻️ 提示词命中缓存，跳过抠图与场景生成");
        tracker.advance(PipelineStage::Compositing)?;

        let mut composite_calls = 0;
        let composite_start = Instant::now();
        let (intermediate, poster) = match state.cached() {
            Some(cached) => self.composite_layers(&mut composite_calls, &cached.scene, cached.subject.image(), frame),
            None => return Err(PosterError::InvalidState("缓存已失效".to_string())),
        };
        let composite_ms = composite_start.elapsed().as_millis();

        state.record_composite(Some(intermediate), frame.name(), poster.clone());
        tracker.advance(PipelineStage::Ready)?;

        let total_ms = total_start.elapsed().as_millis();
        log::info!("✅ 海报生成完成（缓存） - composite={}ms total={}ms", composite_ms, total_ms);

        Ok(RunOutcome {
            poster,
            frame: frame.name().to_string(),
            cache_hit: true,
            composite_calls,
            timings: StageTimings {
                composite_ms,
                total_ms,
                ..StageTimings::default()
            },
        })
    }

    /// 两次合成：(场景, 主体) → 中间结果；(中间结果, 边框) → 海报。
    fn composite_layers(
        &self,
        calls: &mut u8,
        scene: &DynamicImage,
        subject: &DynamicImage,
        frame: &Frame,
    ) -> (DynamicImage, DynamicImage) {
        let intermediate = self.composite_counted(calls, scene, subject);
        let poster = self.composite_counted(calls, &intermediate, frame.image());
        (intermediate, poster)
    }

    fn composite_counted(&self, calls: &mut u8, base: &DynamicImage, overlay: &DynamicImage) -> DynamicImage {
        *calls = calls.saturating_add(1);
        self.compositor.composite(base, overlay)
    }
}
