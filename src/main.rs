use anyhow::{Context, Result};
use avpipe::core::EngineConfig;
use avpipe::player::SyntheticOptions;
use clap::Parser;
use log::info;
use std::path::PathBuf;

mod app;

use app::ConsoleApp;

/// avpipe - 多路流同步播放引擎（合成测试源）
#[derive(Parser, Debug)]
#[command(name = "avpipe")]
#[command(about = "Synchronized audio/video/subtitle playback over a synthetic source")]
#[command(version)]
struct Args {
    /// 引擎配置文件（JSON）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 合成源时长（秒）
    #[arg(short, long, default_value = "5")]
    duration_secs: u64,

    /// 视频帧率
    #[arg(long, default_value = "25")]
    fps: f64,

    /// 不生成音频流（视频成为主时钟）
    #[arg(long)]
    no_audio: bool,

    /// 不生成字幕流
    #[arg(long)]
    no_subtitles: bool,

    /// 每 N 个视频包损坏一个
    #[arg(long)]
    corrupt_every: Option<u64>,

    /// 尽快读取而不是按媒体时间节奏读取
    #[arg(long)]
    fast_read: bool,

    /// 启动后保持暂停
    #[arg(long)]
    start_paused: bool,

    /// 以 JSON 输出播放报告
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志（RUST_LOG 可覆盖）
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("🎬 avpipe 启动");

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("加载配置失败: {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if args.start_paused {
        config.start_paused = true;
    }

    let options = SyntheticOptions {
        duration_ms: args.duration_secs.saturating_mul(1000),
        fps: args.fps,
        audio: !args.no_audio,
        subtitles: !args.no_subtitles,
        realtime: !args.fast_read,
        corrupt_every: args.corrupt_every,
        ..SyntheticOptions::default()
    };

    let report = ConsoleApp::new(config, options).run()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        app::print_report(&report);
    }

    Ok(())
}
