use crate::core::{
    EngineConfig, MediaInfo, PlaybackState, PlayerError, Result, SampleFormat, StreamClock,
    StreamKind, TimeSource, WallClock,
};
use crate::player::audio_output::{AudioDevice, AudioSink, AudioSpec};
use crate::player::controller::{PlaybackController, UserEvent};
use crate::player::decoder::DecoderSet;
use crate::player::demuxer_source::DemuxerSource;
use crate::player::demuxer_thread::{DemuxSummary, DemuxerThread};
use crate::player::log_ctx;
use crate::player::master_clock::{ClockSource, MasterClock};
use crate::player::packet_queue::StreamQueues;
use crate::player::scheduler::{AudioScheduler, SchedulerParts, StreamEnd, StreamOutcome, TimedScheduler};
use crate::renderer::{SubtitleRenderer, VideoRenderer};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 播放结束后的汇总
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackReport {
    pub media: String,
    pub streams: Vec<StreamOutcome>,
    pub demux: DemuxSummary,
    pub demux_error: Option<String>,
    pub final_state: PlaybackState,
    pub final_position_ms: Option<i64>,
    pub master_source: Option<ClockSource>,
}

impl PlaybackReport {
    pub fn stream(&self, kind: StreamKind) -> Option<&StreamOutcome> {
        self.streams.iter().find(|s| s.kind == kind)
    }

    /// 视频相对音频的最大偏差
    pub fn max_av_drift_ms(&self) -> Option<i64> {
        self.stream(StreamKind::Video).and_then(|s| s.max_drift_ms)
    }
}

/// 音频路径：调度器由设备回调线程驱动
struct AudioPath {
    scheduler: Arc<Mutex<AudioScheduler>>,
    device: Box<dyn AudioDevice>,
}

/// 播放构建器
pub struct PlaybackBuilder {
    source: Box<dyn DemuxerSource>,
    config: EngineConfig,
    decoders: DecoderSet,
    video_renderer: Option<Box<dyn VideoRenderer>>,
    subtitle_renderer: Option<Box<dyn SubtitleRenderer>>,
    audio: Option<(Box<dyn AudioSink>, Box<dyn AudioDevice>)>,
    time: Option<Arc<dyn TimeSource>>,
}

impl PlaybackBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn decoders(mut self, decoders: DecoderSet) -> Self {
        self.decoders = decoders;
        self
    }

    pub fn video_renderer(mut self, renderer: Box<dyn VideoRenderer>) -> Self {
        self.video_renderer = Some(renderer);
        self
    }

    pub fn subtitle_renderer(mut self, renderer: Box<dyn SubtitleRenderer>) -> Self {
        self.subtitle_renderer = Some(renderer);
        self
    }

    pub fn audio(mut self, sink: Box<dyn AudioSink>, device: Box<dyn AudioDevice>) -> Self {
        self.audio = Some((sink, device));
        self
    }

    /// 替换墙钟的时间源
    pub fn time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn start(self) -> Result<PlaybackManager> {
        PlaybackManager::launch(self)
    }
}

/// 播放管理器 - 整体控制播放流程
///
/// 一个解封装线程，每路定时流（视频、字幕）一个调度线程，
/// 音频由设备回调线程拉取。
pub struct PlaybackManager {
    media: MediaInfo,
    config: EngineConfig,
    controller: Arc<PlaybackController>,
    master: MasterClock,
    queues: StreamQueues,
    demux: Option<DemuxerThread>,
    timed: [Option<JoinHandle<StreamOutcome>>; StreamKind::COUNT],
    audio: Option<AudioPath>,
    report: Option<PlaybackReport>,
}

impl PlaybackManager {
    pub fn builder(source: Box<dyn DemuxerSource>) -> PlaybackBuilder {
        PlaybackBuilder {
            source,
            config: EngineConfig::default(),
            decoders: DecoderSet::new(),
            video_renderer: None,
            subtitle_renderer: None,
            audio: None,
            time: None,
        }
    }

    fn launch(mut builder: PlaybackBuilder) -> Result<Self> {
        builder.config.validate()?;
        let media = builder.source.media_info().clone();
        info!("{} 🎮 创建播放管理器: {}", log_ctx(), builder.source.description());

        // 决定实际播放哪些流：需要流本身、解码器和输出三者齐全
        let mut enabled = [false; StreamKind::COUNT];
        for kind in StreamKind::ALL {
            if !media.has(kind) {
                continue;
            }
            let has_output = match kind {
                StreamKind::Video => builder.video_renderer.is_some(),
                StreamKind::Audio => builder.audio.is_some(),
                StreamKind::Subtitle => builder.subtitle_renderer.is_some(),
            };
            if !has_output {
                info!("{} {} 流没有输出，跳过", log_ctx(), kind);
                continue;
            }
            if !builder.decoders.contains(kind) {
                warn!("{} ⚠ {}，跳过该流", log_ctx(), PlayerError::MissingDecoder(kind));
                continue;
            }
            enabled[kind.index()] = true;
        }
        if !enabled[StreamKind::Video.index()] && !enabled[StreamKind::Audio.index()] {
            return Err(PlayerError::NoPlayableStream);
        }

        let wall = match builder.time.take() {
            Some(time) => WallClock::with_source(time),
            None => WallClock::new(),
        };
        let initial = if builder.config.start_paused {
            PlaybackState::Paused
        } else {
            PlaybackState::Playing
        };
        let controller = Arc::new(PlaybackController::new(initial, wall.clone()));

        let mut queues = StreamQueues::new();
        let mut clocks: [Option<Arc<StreamClock>>; StreamKind::COUNT] = Default::default();
        for kind in StreamKind::ALL {
            if enabled[kind.index()] {
                queues.open(kind);
                clocks[kind.index()] = Some(Arc::new(StreamClock::new(kind)));
            }
        }

        let master = MasterClock::new(
            clocks[StreamKind::Audio.index()].clone(),
            clocks[StreamKind::Video.index()].clone(),
            wall,
        );

        let mut manager = Self {
            media: media.clone(),
            config: builder.config.clone(),
            controller,
            master,
            queues,
            demux: None,
            timed: Default::default(),
            audio: None,
            report: None,
        };

        if let Err(e) = manager.spawn_all(builder, &clocks) {
            error!("{} ❌ 启动播放失败: {}", log_ctx(), e);
            manager.stop();
            manager.collect_report();
            return Err(e);
        }

        info!("{} ✅ 播放已启动（{:?}）", log_ctx(), initial);
        Ok(manager)
    }

    fn spawn_all(
        &mut self,
        mut builder: PlaybackBuilder,
        clocks: &[Option<Arc<StreamClock>>; StreamKind::COUNT],
    ) -> Result<()> {
        for kind in StreamKind::ALL {
            let (Some(queue), Some(clock)) = (self.queues.get(kind), &clocks[kind.index()]) else {
                continue;
            };
            let decoder = builder
                .decoders
                .take(kind)
                .ok_or(PlayerError::MissingDecoder(kind))?;

            let parts = SchedulerParts {
                queue: queue.clone(),
                decoder,
                clock: clock.clone(),
                controller: self.controller.clone(),
                master: self.master.clone(),
                config: self.config.clone(),
                info: self.media.stream(kind).cloned(),
            };

            match kind {
                StreamKind::Audio => {
                    let (sink, device) = builder.audio.take().ok_or(PlayerError::NoPlayableStream)?;
                    self.start_audio(parts, sink, device)?;
                }
                StreamKind::Video => {
                    let renderer = builder
                        .video_renderer
                        .take()
                        .ok_or_else(|| PlayerError::RenderError("缺少视频渲染器".to_string()))?;
                    self.spawn_timed(TimedScheduler::video(parts, renderer))?;
                }
                StreamKind::Subtitle => {
                    let renderer = builder
                        .subtitle_renderer
                        .take()
                        .ok_or_else(|| PlayerError::RenderError("缺少字幕渲染器".to_string()))?;
                    self.spawn_timed(TimedScheduler::subtitle(parts, renderer))?;
                }
            }
        }

        self.demux = Some(DemuxerThread::start(builder.source, self.queues.clone())?);
        Ok(())
    }

    fn spawn_timed(&mut self, scheduler: TimedScheduler) -> Result<()> {
        let kind = scheduler.kind();
        let handle = thread::Builder::new()
            .name(format!("avpipe-{}", kind))
            .spawn(move || scheduler.run())?;
        self.timed[kind.index()] = Some(handle);
        Ok(())
    }

    fn start_audio(
        &mut self,
        parts: SchedulerParts,
        sink: Box<dyn AudioSink>,
        mut device: Box<dyn AudioDevice>,
    ) -> Result<()> {
        let info = parts
            .info
            .clone()
            .ok_or(PlayerError::MissingDecoder(StreamKind::Audio))?;
        let spec = AudioSpec {
            sample_rate: info.sample_rate,
            channels: info.channels,
            format: SampleFormat::I16,
            period: self.config.audio_period(),
        };

        let scheduler = Arc::new(Mutex::new(AudioScheduler::new(parts, sink)));
        let callback_scheduler = scheduler.clone();
        device.start(spec, Box::new(move |buf: &mut [u8]| callback_scheduler.lock().fill(buf)))?;
        info!("{} 🔊 音频设备已启动: {}", log_ctx(), device.description());

        self.audio = Some(AudioPath { scheduler, device });
        Ok(())
    }

    pub fn media_info(&self) -> &MediaInfo {
        &self.media
    }

    pub fn state(&self) -> PlaybackState {
        self.controller.state()
    }

    pub fn toggle_pause(&self) -> PlaybackState {
        self.controller.toggle_pause()
    }

    pub fn handle_event(&self, event: UserEvent) -> PlaybackState {
        match event {
            UserEvent::Quit => {
                self.stop();
                PlaybackState::Stopped
            }
            UserEvent::TogglePause => self.controller.handle(event),
        }
    }

    /// 当前主时钟位置（毫秒）
    pub fn position_ms(&self) -> Option<i64> {
        self.master.now_ms()
    }

    pub fn master_source(&self) -> Option<ClockSource> {
        self.master.now().map(|t| t.source)
    }

    /// 所有调度器都已结束
    pub fn is_finished(&self) -> bool {
        let timed_done = self
            .timed
            .iter()
            .flatten()
            .all(|handle| handle.is_finished());
        let audio_done = self
            .audio
            .as_ref()
            .map_or(true, |a| a.scheduler.lock().is_finished());
        timed_done && audio_done
    }

    /// 请求停止：状态置为 Stopped，停止解封装并关闭所有队列
    pub fn stop(&self) {
        info!("{} ⏹️  停止播放", log_ctx());
        self.controller.stop();
        match &self.demux {
            Some(demux) => demux.stop(),
            None => self.queues.close_all(),
        }
    }

    /// 等待播放自然结束（或被停止），返回汇总
    pub fn wait(mut self) -> PlaybackReport {
        // 音频没有自己的线程，只能轮询
        while let Some(audio) = &self.audio {
            if audio.scheduler.lock().is_finished() || self.controller.state() == PlaybackState::Stopped {
                break;
            }
            let seen = self.controller.generation();
            self.controller.sleep_since(seen, self.config.pause_poll());
        }
        self.collect_report()
    }

    /// 停止并返回汇总
    pub fn shutdown(self) -> PlaybackReport {
        self.stop();
        self.wait()
    }

    /// 关闭顺序：join 调度线程 -> 停止音频设备 -> join 解封装线程
    fn collect_report(&mut self) -> PlaybackReport {
        if let Some(report) = &self.report {
            return report.clone();
        }

        let mut streams = Vec::new();
        for kind in StreamKind::ALL {
            let Some(handle) = self.timed[kind.index()].take() else {
                continue;
            };
            match handle.join() {
                Ok(outcome) => {
                    info!("{} ✅ {} 调度线程已结束", log_ctx(), kind);
                    streams.push(outcome);
                }
                Err(_) => {
                    error!("{} ❌ {} 调度线程 panic", log_ctx(), kind);
                    streams.push(StreamOutcome {
                        kind,
                        presented: 0,
                        decode_errors: 0,
                        render_errors: 0,
                        dropped_units: 0,
                        max_drift_ms: None,
                        end: StreamEnd::Failed("scheduler thread panicked".to_string()),
                    });
                }
            }
        }

        if let Some(mut audio) = self.audio.take() {
            info!("{} 🔊 停止音频输出", log_ctx());
            audio.device.stop();
            let outcome = audio.scheduler.lock().finish(StreamEnd::Stopped);
            streams.push(outcome);
        }

        // 先记录位置（此时时钟已全部退出，主时钟回落到墙钟）
        let final_position_ms = self.master.now_ms();
        let master_source = self.master.now().map(|t| t.source);

        self.controller.stop();
        let (demux, demux_error) = match self.demux.take().and_then(|mut d| d.join()) {
            Some(exit) => (exit.summary, exit.result.err().map(|e| e.to_string())),
            None => (DemuxSummary::default(), None),
        };
        info!("{} ✅ 解封装线程已结束", log_ctx());

        let leftover: usize = self.queues.iter().map(|q| q.clear()).sum();
        if leftover > 0 {
            info!("{} 🗑️  清空包队列: {} 个包", log_ctx(), leftover);
        }

        let report = PlaybackReport {
            media: self.media.description.clone(),
            streams,
            demux,
            demux_error,
            final_state: self.controller.state(),
            final_position_ms,
            master_source,
        };
        info!("{} ✅ 停止播放完成，所有线程已清理", log_ctx());
        self.report = Some(report.clone());
        report
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        if self.report.is_none() {
            warn!("{} ⚠ PlaybackManager 被 drop 前未等待结束，正在停止", log_ctx());
            self.stop();
            self.collect_report();
        }
    }
}
