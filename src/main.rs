//! # 海报工作室 — 命令行入口
//!
//! 本文件仅负责参数解析、设置加载与会话组装。
//! 业务逻辑分布在各子模块中，详见 `lib.rs` 架构文档。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use poster_studio::error::AppError;
use poster_studio::poster::{DefaultPosterPipeline, FrameSet, PosterSession, ProgressEvent, UploadedImage};
use poster_studio::settings::PosterSettings;
use poster_studio::storage;

/// 上传一张物品照片，按提示词生成场景并合成带边框的海报。
#[derive(Debug, Parser)]
#[command(name = "poster-studio", version, about)]
struct Args {
    /// 设置文件（JSON），边框与输出目录的相对路径以其所在目录为准
    #[arg(long, default_value = "settings.json")]
    settings: PathBuf,

    /// 物品照片（JPEG / PNG）
    #[arg(long)]
    image: PathBuf,

    /// 场景提示词
    #[arg(long)]
    prompt: String,

    /// 边框名称，缺省为第一个边框
    #[arg(long)]
    frame: Option<String>,

    /// 生成后依次换上这些边框并各自保存（逗号分隔）
    #[arg(long, value_delimiter = ',')]
    reframe: Vec<String>,

    /// 输出目录，缺省取设置中的 output_dir
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        log::error!("❌ {}", err);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    let settings = PosterSettings::load(&args.settings)?;
    let base_dir = args
        .settings
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    let config = settings.to_config()?;
    let api_key = settings.resolve_api_key()?;
    let frames = Arc::new(FrameSet::load(&settings.frame_paths(base_dir))?);
    let frame = args
        .frame
        .clone()
        .unwrap_or_else(|| frames.default_frame().name().to_string());
    let output_dir = args.output.clone().unwrap_or_else(|| settings.output_dir(base_dir));
    let upload = UploadedImage::from_file(&args.image, config.max_upload_size)?;

    let pipeline = Arc::new(DefaultPosterPipeline::with_defaults(api_key, frames, config)?);
    let mut session = PosterSession::new(pipeline).with_progress_listener(Box::new(|event: &ProgressEvent| {
        log::info!("📊 [{:>3}%] {} ({})", event.progress, event.stage.as_str(), event.status);
    }));
    log::info!("🖼️ 可选边框：{}", session.frame_names().join(" / "));

    let outcome = match session.run(&upload, &args.prompt, &frame).await {
        Ok(outcome) => outcome,
        Err(err) => {
            report_failure(&session);
            return Err(err.into());
        }
    };
    let path = storage::save_poster(&output_dir, &outcome.poster, &outcome.frame)?;
    println!("{}", path.display());

    for name in &args.reframe {
        let outcome = match session.select_frame(name) {
            Ok(outcome) => outcome,
            Err(err) => {
                report_failure(&session);
                return Err(err.into());
            }
        };
        let path = storage::save_poster(&output_dir, &outcome.poster, &outcome.frame)?;
        println!("{}", path.display());
    }

    let info = storage::output_dir_info(&output_dir)?;
    log::info!(
        "📁 输出目录 {} - {} 个文件，共 {} bytes",
        info.path,
        info.file_count,
        info.total_size
    );

    Ok(())
}

/// 以 JSON 输出失败报告（错误码 + 阶段 + 原始描述）。
fn report_failure<R, G, F>(session: &PosterSession<R, G, F>)
where
    R: poster_studio::poster::BackgroundRemover,
    G: poster_studio::poster::SceneGenerator,
    F: poster_studio::poster::SceneFetcher,
{
    if let Some(failure) = session.last_failure() {
        match serde_json::to_string(failure) {
            Ok(json) => eprintln!("{}", json),
            Err(err) => log::warn!("失败报告序列化失败: {}", err),
        }
    }
}
