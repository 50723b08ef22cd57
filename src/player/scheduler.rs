use crate::core::{
    AudioFrame, DecodedUnit, EngineConfig, PlaybackState, PlayerError, Result, SchedulerState,
    StreamClock, StreamInfo, StreamKind, SubtitleFrame,
};
use crate::player::audio_output::AudioSink;
use crate::player::controller::PlaybackController;
use crate::player::decoder::Decoder;
use crate::player::frame_ring::FrameRing;
use crate::player::log_ctx;
use crate::player::master_clock::{ClockSource, MasterClock};
use crate::player::packet_queue::{Dequeue, StreamQueue};
use crate::renderer::{SubtitleRenderer, VideoRenderer};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// 计算下一次唤醒的延迟
///
/// `max(nominal + (stream - master), min)`；任一时钟未知时只用名义间隔。
pub fn pacing_delay(
    nominal_ms: i64,
    stream_ms: Option<i64>,
    master_ms: Option<i64>,
    min_ms: i64,
) -> Duration {
    let min_ms = min_ms.max(1);
    let delay = match (stream_ms, master_ms) {
        (Some(stream), Some(master)) => nominal_ms.saturating_add(stream.saturating_sub(master)),
        _ => nominal_ms,
    };
    Duration::from_millis(delay.max(min_ms) as u64)
}

/// 每种流的名义调度间隔（毫秒）
pub fn nominal_interval_ms(kind: StreamKind, info: Option<&StreamInfo>, config: &EngineConfig) -> i64 {
    match kind {
        StreamKind::Video => {
            let fps = info
                .and_then(|i| i.fps)
                .filter(|fps| fps.is_finite() && *fps > 0.0)
                .unwrap_or(config.default_fps);
            ((1000.0 / fps) as i64).max(1)
        }
        StreamKind::Subtitle => config.subtitle_poll_ms as i64,
        StreamKind::Audio => config.audio_period_ms as i64,
    }
}

/// 单路流结束原因
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEnd {
    /// 队列关闭且所有帧已呈现
    Completed,
    /// 收到停止请求
    Stopped,
    /// 致命错误（例如格式中途变化）
    Failed(String),
}

/// 单路流统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamOutcome {
    pub kind: StreamKind,
    pub presented: u64,
    pub decode_errors: u64,
    pub render_errors: u64,
    /// 停止时丢弃的解码单元
    pub dropped_units: u64,
    /// 视频相对音频主时钟的最大偏差（毫秒）
    pub max_drift_ms: Option<i64>,
    pub end: StreamEnd,
}

impl StreamOutcome {
    fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            presented: 0,
            decode_errors: 0,
            render_errors: 0,
            dropped_units: 0,
            max_drift_ms: None,
            end: StreamEnd::Completed,
        }
    }
}

/// step() 的返回值
#[derive(Debug, Clone, PartialEq)]
pub enum Wake {
    /// 在给定延迟后再次调用 step()
    After(Duration),
    /// 调度器已结束
    Done(StreamOutcome),
}

/// 构造一个调度器需要的全部上下文
pub struct SchedulerParts {
    pub queue: Arc<StreamQueue>,
    pub decoder: Box<dyn Decoder>,
    pub clock: Arc<StreamClock>,
    pub controller: Arc<PlaybackController>,
    pub master: MasterClock,
    pub config: EngineConfig,
    pub info: Option<StreamInfo>,
}

enum Fetch {
    /// 帧环里有待呈现的单元
    Ready,
    /// 等待超时，暂时没有数据
    Idle,
    /// 队列已关闭，解码器已刷新，帧环已空
    Drained,
}

/// 三种调度器共享的部分：取包、解码、格式检查、结束
struct SchedulerCore {
    kind: StreamKind,
    queue: Arc<StreamQueue>,
    decoder: Box<dyn Decoder>,
    clock: Arc<StreamClock>,
    controller: Arc<PlaybackController>,
    master: MasterClock,
    config: EngineConfig,
    ring: FrameRing<DecodedUnit>,
    /// 一次解码超出帧环容量的部分，帧环空出后依次补入
    overflow: VecDeque<DecodedUnit>,
    state: SchedulerState,
    format: Option<String>,
    flushed: bool,
    stats: StreamOutcome,
    finished: Option<StreamOutcome>,
}

impl SchedulerCore {
    fn new(parts: SchedulerParts) -> Self {
        let kind = parts.queue.kind();
        Self {
            kind,
            ring: FrameRing::new(parts.config.frame_ring_slots),
            overflow: VecDeque::new(),
            queue: parts.queue,
            decoder: parts.decoder,
            clock: parts.clock,
            controller: parts.controller,
            master: parts.master,
            config: parts.config,
            state: SchedulerState::Idle,
            format: None,
            flushed: false,
            stats: StreamOutcome::new(kind),
            finished: None,
        }
    }

    /// 保证帧环里至少有一个单元
    ///
    /// 帧环和溢出区都为空时才取包；坏包计数后继续尝试下一个包，
    /// 解码器暂时没有输出时也继续取下一个包。
    fn fetch(&mut self, wait: Duration) -> Fetch {
        loop {
            self.refill();
            if !self.ring.is_empty() {
                return Fetch::Ready;
            }
            if self.flushed {
                return Fetch::Drained;
            }

            match self.queue.get_timeout(wait) {
                Dequeue::Packet(packet) => {
                    self.state = SchedulerState::Decoding;
                    match self.decoder.decode(&packet) {
                        Ok(units) => {
                            if units.is_empty() {
                                debug!("{} {} 解码器暂无输出，继续取包", log_ctx(), self.kind);
                            }
                            self.stash(units);
                        }
                        Err(e) => {
                            self.stats.decode_errors += 1;
                            error!(
                                "{} ❌ {} 包解码失败（pts={:?}），丢弃: {}",
                                log_ctx(),
                                self.kind,
                                packet.pts,
                                e
                            );
                        }
                    }
                }
                Dequeue::Empty => return Fetch::Idle,
                Dequeue::Closed => {
                    self.state = SchedulerState::Draining;
                    self.flushed = true;
                    match self.decoder.flush() {
                        Ok(units) => {
                            if !units.is_empty() {
                                info!("{} 🔄 {} 解码器 flush: {} 个缓冲帧", log_ctx(), self.kind, units.len());
                            }
                            self.stash(units);
                        }
                        Err(e) => warn!("{} ⚠ {} 解码器 flush 失败: {}", log_ctx(), self.kind, e),
                    }
                }
            }
        }
    }

    fn stash(&mut self, units: Vec<DecodedUnit>) {
        self.overflow.extend(units);
        self.refill();
        if !self.overflow.is_empty() {
            debug!(
                "{} {} 帧环已满（{} 槽），{} 个解码单元等待入环",
                log_ctx(),
                self.kind,
                self.ring.capacity(),
                self.overflow.len()
            );
        }
    }

    fn refill(&mut self) {
        while let Some(unit) = self.overflow.pop_front() {
            if let Err(unit) = self.ring.push(unit) {
                self.overflow.push_front(unit);
                break;
            }
        }
    }

    /// 流格式在中途变化是致命的
    fn check_format(&mut self, unit: &DecodedUnit) -> Result<()> {
        let Some(found) = unit.format_signature() else {
            return Ok(());
        };
        match &self.format {
            None => {
                info!("{} 🎞 {} 流格式: {}", log_ctx(), self.kind, found);
                self.format = Some(found);
                Ok(())
            }
            Some(expected) if *expected == found => Ok(()),
            Some(expected) => Err(PlayerError::FormatChanged {
                kind: self.kind,
                expected: expected.clone(),
                found,
            }),
        }
    }

    fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Draining -> Stopped：丢弃待呈现单元，时钟退出仲裁（只执行一次）
    fn finish(&mut self, end: StreamEnd) -> StreamOutcome {
        if let Some(done) = &self.finished {
            return done.clone();
        }

        self.state = SchedulerState::Draining;
        let discarded = self.ring.clear() + self.overflow.len();
        self.overflow.clear();
        if discarded > 0 {
            self.stats.dropped_units += discarded as u64;
            info!("{} 🗑️  {} 丢弃 {} 个待呈现单元", log_ctx(), self.kind, discarded);
        }

        // 不再有消费者：先关闭再清空，解封装不会再往这路队列放包
        self.queue.close();
        let packets = self.queue.clear();
        if packets > 0 {
            info!("{} 🗑️  {} 丢弃 {} 个未解码的包", log_ctx(), self.kind, packets);
        }
        self.clock.retire();
        self.state = SchedulerState::Stopped;

        let mut outcome = self.stats.clone();
        outcome.end = end;
        info!(
            "{} 🛑 {} 调度器结束: {:?}（呈现 {}，解码错误 {}，丢弃 {}）",
            log_ctx(),
            self.kind,
            outcome.end,
            outcome.presented,
            outcome.decode_errors,
            outcome.dropped_units
        );
        self.finished = Some(outcome.clone());
        outcome
    }
}

/// 字幕分发：提前过多的事件先保留，显示窗口结束后撤销
struct SubtitleDispatch {
    renderer: Box<dyn SubtitleRenderer>,
    next_id: u64,
    showing: Vec<(u64, i64)>,
}

impl SubtitleDispatch {
    fn dispatch(&mut self, frame: SubtitleFrame) -> Result<()> {
        let id = self.next_id;
        self.next_id += 1;
        self.renderer.present_subtitle(id, &frame)?;
        if let Some((_, end)) = frame.display_window_ms() {
            self.showing.push((id, end));
        }
        Ok(())
    }

    fn hold(&self, unit: &DecodedUnit, master_ms: Option<i64>, poll_ms: i64) -> bool {
        let DecodedUnit::Subtitle(frame) = unit else {
            return false;
        };
        match (frame.display_window_ms(), master_ms) {
            (Some((start, _)), Some(master)) => start > master.saturating_add(poll_ms),
            _ => false,
        }
    }

    fn expire_until(&mut self, master_ms: i64) {
        let renderer = &mut self.renderer;
        self.showing.retain(|&(id, end)| {
            if end <= master_ms {
                debug!("{} 💬 字幕 #{} 到期", log_ctx(), id);
                renderer.expire_subtitle(id);
                false
            } else {
                true
            }
        });
    }

    fn expire_all(&mut self) {
        for (id, _) in self.showing.drain(..) {
            self.renderer.expire_subtitle(id);
        }
    }
}

enum Presenter {
    Video(Box<dyn VideoRenderer>),
    Subtitle(SubtitleDispatch),
}

impl Presenter {
    fn present(&mut self, unit: DecodedUnit) -> Result<()> {
        match (self, unit) {
            (Presenter::Video(renderer), DecodedUnit::Video(frame)) => renderer.present_video(&frame),
            (Presenter::Subtitle(dispatch), DecodedUnit::Subtitle(frame)) => dispatch.dispatch(frame),
            (_, other) => Err(PlayerError::RenderError(format!(
                "调度器收到不匹配的 {} 单元",
                other.kind()
            ))),
        }
    }
}

/// 定时调度器（视频、字幕）：在自己的线程上按计算出的延迟唤醒
pub struct TimedScheduler {
    core: SchedulerCore,
    presenter: Presenter,
    nominal_ms: i64,
}

impl TimedScheduler {
    pub fn video(parts: SchedulerParts, renderer: Box<dyn VideoRenderer>) -> Self {
        Self::build(parts, Presenter::Video(renderer))
    }

    pub fn subtitle(parts: SchedulerParts, renderer: Box<dyn SubtitleRenderer>) -> Self {
        Self::build(
            parts,
            Presenter::Subtitle(SubtitleDispatch {
                renderer,
                next_id: 0,
                showing: Vec::new(),
            }),
        )
    }

    fn build(parts: SchedulerParts, presenter: Presenter) -> Self {
        let nominal_ms = nominal_interval_ms(parts.queue.kind(), parts.info.as_ref(), &parts.config);
        Self {
            core: SchedulerCore::new(parts),
            presenter,
            nominal_ms,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.core.kind
    }

    pub fn state(&self) -> SchedulerState {
        self.core.state
    }

    pub fn nominal_ms(&self) -> i64 {
        self.nominal_ms
    }

    /// 执行一次唤醒，返回下一次唤醒时间
    pub fn step(&mut self) -> Wake {
        if let Some(done) = &self.core.finished {
            return Wake::Done(done.clone());
        }

        // Waiting 顶部读取全局状态
        self.core.state = SchedulerState::Waiting;
        match self.core.controller.state() {
            PlaybackState::Paused => return Wake::After(self.core.config.pause_poll()),
            PlaybackState::Stopped => return Wake::Done(self.finish(StreamEnd::Stopped)),
            PlaybackState::Playing => {}
        }

        if let (Presenter::Subtitle(dispatch), Some(master)) = (&mut self.presenter, self.core.master.now_ms()) {
            dispatch.expire_until(master);
        }

        let wait = Duration::from_millis(self.nominal_ms as u64);
        match self.core.fetch(wait) {
            Fetch::Ready => {}
            Fetch::Idle => {
                self.core.state = SchedulerState::Idle;
                return Wake::After(Duration::from_millis(self.core.config.min_delay_ms));
            }
            Fetch::Drained => return Wake::Done(self.finish(StreamEnd::Completed)),
        }

        if let Presenter::Subtitle(dispatch) = &self.presenter {
            if let Some(next) = self.core.ring.peek() {
                if dispatch.hold(next, self.core.master.now_ms(), self.nominal_ms) {
                    self.core.state = SchedulerState::Idle;
                    return Wake::After(wait);
                }
            }
        }

        let Some(unit) = self.core.ring.pop() else {
            return Wake::After(Duration::from_millis(self.core.config.min_delay_ms));
        };

        self.core.state = SchedulerState::Presenting;
        if let Err(e) = self.core.check_format(&unit) {
            error!("{} ❌ {}", log_ctx(), e);
            return Wake::Done(self.finish(StreamEnd::Failed(e.to_string())));
        }

        let stream_ms = unit.pts_ms().map(|ms| self.core.clock.update(ms));
        let master = self.core.master.now();
        if self.core.kind == StreamKind::Video {
            if let (Some(stream), Some(m)) = (stream_ms, master) {
                if m.source == ClockSource::Audio {
                    let drift = (stream - m.ms).abs();
                    let max = self.core.stats.max_drift_ms.get_or_insert(drift);
                    *max = (*max).max(drift);
                }
            }
        }

        match self.presenter.present(unit) {
            Ok(()) => {
                self.core.stats.presented += 1;
                debug!(
                    "{} 🖼 {} 呈现 #{}（stream={:?}ms master={:?}）",
                    log_ctx(),
                    self.core.kind,
                    self.core.stats.presented,
                    stream_ms,
                    master
                );
            }
            Err(e) => {
                self.core.stats.render_errors += 1;
                warn!("{} ⚠ {} 呈现失败: {}", log_ctx(), self.core.kind, e);
            }
        }

        let delay = pacing_delay(
            self.nominal_ms,
            stream_ms,
            master.map(|m| m.ms),
            self.core.config.min_delay_ms as i64,
        );
        self.core.state = SchedulerState::Idle;
        Wake::After(delay)
    }

    /// 线程主循环：按 step() 的结果休眠，状态变化时提前醒来
    pub fn run(mut self) -> StreamOutcome {
        info!("{} ▶ {} 调度线程启动（名义间隔 {}ms）", log_ctx(), self.core.kind, self.nominal_ms);
        loop {
            let seen = self.core.controller.generation();
            match self.step() {
                Wake::After(delay) => {
                    self.core.controller.sleep_since(seen, delay);
                }
                Wake::Done(outcome) => return outcome,
            }
        }
    }

    fn finish(&mut self, end: StreamEnd) -> StreamOutcome {
        if !self.core.is_finished() {
            if let Presenter::Subtitle(dispatch) = &mut self.presenter {
                dispatch.expire_all();
            }
        }
        self.core.finish(end)
    }
}

/// 音频调度器：由设备回调拉取驱动，不做延迟校正
///
/// 音频时钟 = 当前帧 pts + 已消耗字节对应的时长。
pub struct AudioScheduler {
    core: SchedulerCore,
    sink: Box<dyn AudioSink>,
    current: Option<AudioFrame>,
    current_ms: Option<i64>,
}

impl AudioScheduler {
    pub fn new(parts: SchedulerParts, sink: Box<dyn AudioSink>) -> Self {
        Self {
            core: SchedulerCore::new(parts),
            sink,
            current: None,
            current_ms: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.core.state
    }

    pub fn is_finished(&self) -> bool {
        self.core.is_finished()
    }

    pub fn outcome(&self) -> Option<StreamOutcome> {
        self.core.finished.clone()
    }

    /// 设备回调：填满 `out`，返回真实音频字节数，其余部分写入静音
    pub fn fill(&mut self, out: &mut [u8]) -> usize {
        let written = self.fill_inner(out);
        out[written..].fill(0);
        written
    }

    fn fill_inner(&mut self, out: &mut [u8]) -> usize {
        if self.core.is_finished() {
            return 0;
        }

        self.core.state = SchedulerState::Waiting;
        match self.core.controller.state() {
            PlaybackState::Paused => return 0,
            PlaybackState::Stopped => {
                self.finish(StreamEnd::Stopped);
                return 0;
            }
            PlaybackState::Playing => {}
        }

        let mut written = 0;
        while written < out.len() {
            if self.current.as_ref().map_or(true, |f| f.is_exhausted()) {
                self.current = None;
                if !self.next_frame() {
                    break;
                }
                continue;
            }
            let Some(frame) = self.current.as_mut() else {
                break;
            };

            self.core.state = SchedulerState::Presenting;
            let n = self.sink.mix(frame, &mut out[written..]).min(out.len() - written);
            if n == 0 {
                warn!("{} ⚠ 音频输出未消耗任何数据，丢弃当前帧", log_ctx());
                frame.consumed = frame.data.len();
                continue;
            }
            frame.consumed = (frame.consumed + n).min(frame.data.len());
            written += n;

            if let Some(base) = self.current_ms {
                self.core.clock.update(base + frame.consumed_ms());
            }
        }

        if written < out.len() && !self.core.is_finished() {
            debug!("{} 🔇 音频欠载，补静音 {} 字节", log_ctx(), out.len() - written);
        }
        written
    }

    /// 取下一帧作为当前帧；没有可用帧时返回 false
    fn next_frame(&mut self) -> bool {
        match self.core.fetch(self.core.config.audio_wait()) {
            Fetch::Idle => false,
            Fetch::Drained => {
                self.finish(StreamEnd::Completed);
                false
            }
            Fetch::Ready => {
                let Some(unit) = self.core.ring.pop() else {
                    return false;
                };
                if let Err(e) = self.core.check_format(&unit) {
                    error!("{} ❌ {}", log_ctx(), e);
                    self.finish(StreamEnd::Failed(e.to_string()));
                    return false;
                }

                let pts_ms = unit.pts_ms();
                match unit {
                    DecodedUnit::Audio(frame) => {
                        self.current_ms = pts_ms;
                        if let Some(ms) = pts_ms {
                            self.core.clock.update(ms + frame.consumed_ms());
                        }
                        self.core.stats.presented += 1;
                        self.current = Some(frame);
                    }
                    other => {
                        self.core.stats.dropped_units += 1;
                        warn!("{} ⚠ 音频调度器收到 {} 单元，丢弃", log_ctx(), other.kind());
                    }
                }
                true
            }
        }
    }

    /// 结束调度（幂等），返回最终统计
    pub fn finish(&mut self, end: StreamEnd) -> StreamOutcome {
        self.current = None;
        self.core.finish(end)
    }
}
