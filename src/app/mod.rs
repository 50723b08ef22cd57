use anyhow::Result;
use avpipe::core::{EngineConfig, PlaybackState};
use avpipe::player::{
    synthetic_decoders, AudioOutput, DemuxerSource, PcmSink, PlaybackManager, PlaybackReport,
    SyntheticOptions, SyntheticSource, UserEvent,
};
use avpipe::renderer::{LogRenderer, PresentStats};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use log::{info, warn};
use serde::Serialize;
use std::io::BufRead;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

/// 事件循环的轮询间隔
const EVENT_POLL: Duration = Duration::from_millis(100);
/// 进度日志间隔
const PROGRESS_EVERY: Duration = Duration::from_secs(1);

/// 命令行程序的最终输出
#[derive(Debug, Serialize)]
pub struct AppReport {
    pub playback: PlaybackReport,
    pub presentation: PresentStats,
    pub audio_callbacks: u64,
    pub audio_silence_bytes: u64,
}

/// 终端播放程序：stdin 输入 p/空格 暂停切换，q 退出
pub struct ConsoleApp {
    config: EngineConfig,
    options: SyntheticOptions,
}

impl ConsoleApp {
    pub fn new(config: EngineConfig, options: SyntheticOptions) -> Self {
        Self { config, options }
    }

    pub fn run(self) -> Result<AppReport> {
        let source = SyntheticSource::new(self.options.clone())?;
        let decoders = synthetic_decoders(source.media_info());
        let renderer = LogRenderer::new();
        let device = AudioOutput::new("simulated");
        let device_stats = device.stats();

        let mut builder = PlaybackManager::builder(Box::new(source))
            .config(self.config.clone())
            .decoders(decoders)
            .video_renderer(Box::new(renderer.clone()))
            .subtitle_renderer(Box::new(renderer.clone()));
        if self.options.audio {
            builder = builder.audio(Box::new(PcmSink::new()), Box::new(device));
        }
        let manager = builder.start()?;

        info!("⌨️  输入 p 或空格 回车切换暂停，q 回车退出");
        let events = spawn_input_thread();
        Self::event_loop(&manager, events);

        let playback = manager.wait();
        let presentation = LogRenderer::summarize(&renderer.drain());

        Ok(AppReport {
            playback,
            presentation,
            audio_callbacks: device_stats.callbacks.load(Ordering::Relaxed),
            audio_silence_bytes: device_stats.silence_bytes.load(Ordering::Relaxed),
        })
    }

    fn event_loop(manager: &PlaybackManager, events: Receiver<UserEvent>) {
        let mut input_open = true;
        let mut last_progress = Instant::now();

        loop {
            if manager.is_finished() {
                info!("📄 所有流播放完毕");
                break;
            }

            if input_open {
                match events.recv_timeout(EVENT_POLL) {
                    Ok(event) => {
                        let state = manager.handle_event(event);
                        info!("⌨️  {:?} -> {:?}", event, state);
                        if state == PlaybackState::Stopped {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        input_open = false;
                    }
                }
            } else {
                thread::sleep(EVENT_POLL);
            }

            if last_progress.elapsed() >= PROGRESS_EVERY {
                last_progress = Instant::now();
                info!(
                    "⏱ {:?} 位置 {:?}ms（主时钟 {:?}）",
                    manager.state(),
                    manager.position_ms(),
                    manager.master_source()
                );
            }
        }
    }
}

/// 把一行输入解析为用户事件
fn parse_command(line: &str) -> Option<UserEvent> {
    let raw = line.trim_end_matches(['\r', '\n']);
    match raw.trim() {
        "q" | "quit" => Some(UserEvent::Quit),
        "p" | "pause" => Some(UserEvent::TogglePause),
        "" if !raw.is_empty() => Some(UserEvent::TogglePause),
        _ => None,
    }
}

/// stdin 读取线程（阻塞读取，进程退出时随之结束）
fn spawn_input_thread() -> Receiver<UserEvent> {
    let (tx, rx) = unbounded();
    let spawned = thread::Builder::new()
        .name("avpipe-input".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                match parse_command(&line) {
                    Some(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    None => warn!("⚠ 未知命令: {:?}", line),
                }
            }
        });
    if let Err(e) = spawned {
        warn!("⚠ 无法启动输入线程，仅支持自然结束: {}", e);
    }
    rx
}

pub fn print_report(report: &AppReport) {
    let playback = &report.playback;
    println!("==== avpipe 播放报告 ====");
    println!("媒体: {}", playback.media);
    println!(
        "解封装: {} 包（视频 {}，音频 {}，字幕 {}，丢弃 {}）{}",
        playback.demux.total_packets,
        playback.demux.video_packets,
        playback.demux.audio_packets,
        playback.demux.subtitle_packets,
        playback.demux.discarded_packets + playback.demux.dropped_packets,
        playback
            .demux_error
            .as_ref()
            .map(|e| format!("，错误: {}", e))
            .unwrap_or_default()
    );
    for stream in &playback.streams {
        println!(
            "{:>8}: 呈现 {}，解码错误 {}，呈现错误 {}，丢弃 {}，结束 {:?}",
            stream.kind,
            stream.presented,
            stream.decode_errors,
            stream.render_errors,
            stream.dropped_units,
            stream.end
        );
    }
    match playback.max_av_drift_ms() {
        Some(drift) => println!("最大音视频偏差: {}ms", drift),
        None => println!("最大音视频偏差: -"),
    }
    if let Some(jitter) = report.presentation.max_jitter_ms {
        println!("最大视频呈现抖动: {}ms", jitter);
    }
    println!(
        "音频回调: {} 次，静音 {} 字节",
        report.audio_callbacks, report.audio_silence_bytes
    );
    println!(
        "最终状态: {:?}，位置 {:?}ms",
        playback.final_state, playback.final_position_ms
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("q"), Some(UserEvent::Quit));
        assert_eq!(parse_command("p\r"), Some(UserEvent::TogglePause));
        assert_eq!(parse_command(" "), Some(UserEvent::TogglePause));
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("seek 10"), None);
    }

    #[test]
    fn test_run_fast_synthetic_playback() {
        let options = SyntheticOptions {
            duration_ms: 300,
            realtime: false,
            ..SyntheticOptions::default()
        };
        let config = EngineConfig {
            audio_period_ms: 10,
            ..EngineConfig::default()
        };
        let report = ConsoleApp::new(config, options).run().unwrap();

        let video = report.playback.stream(avpipe::core::StreamKind::Video).unwrap();
        assert_eq!(video.presented, 8);
        assert!(report.presentation.video_frames >= 8);
        assert!(report.audio_callbacks > 0);
    }
}
