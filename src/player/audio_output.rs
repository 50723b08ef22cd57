use crate::core::{AudioFrame, PlayerError, Result, SampleFormat};
use crate::player::log_ctx;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// 把解码后的 PCM 写入设备缓冲区
pub trait AudioSink: Send {
    /// 从 `frame` 未消耗的部分写入 `out`，返回消耗的字节数
    fn mix(&mut self, frame: &AudioFrame, out: &mut [u8]) -> usize;
}

/// 直接拷贝 PCM，可选音量
pub struct PcmSink {
    volume: f32,
}

impl PcmSink {
    pub fn new() -> Self {
        Self { volume: 1.0 }
    }

    /// 设置音量 (0.0 - 1.0)
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.set_volume(volume);
        self
    }

    fn scale(&self, format: SampleFormat, out: &mut [u8]) {
        match format {
            SampleFormat::I16 => {
                for sample in out.chunks_exact_mut(2) {
                    let value = i16::from_le_bytes([sample[0], sample[1]]);
                    let scaled = (value as f32 * self.volume) as i16;
                    sample.copy_from_slice(&scaled.to_le_bytes());
                }
            }
            SampleFormat::F32 => {
                for sample in out.chunks_exact_mut(4) {
                    let value = f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]);
                    sample.copy_from_slice(&(value * self.volume).to_le_bytes());
                }
            }
            // U8 / I32 不做音量处理
            SampleFormat::U8 | SampleFormat::I32 => {}
        }
    }
}

impl Default for PcmSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for PcmSink {
    fn mix(&mut self, frame: &AudioFrame, out: &mut [u8]) -> usize {
        let src = frame.remaining();
        let frame_bytes = frame.format.bytes_per_sample() * frame.channels.max(1) as usize;

        // 尽量按整帧（所有声道的一个采样点）拷贝
        let mut n = src.len().min(out.len());
        if n >= frame_bytes {
            n -= n % frame_bytes;
        }

        out[..n].copy_from_slice(&src[..n]);
        if self.volume < 1.0 {
            self.scale(frame.format, &mut out[..n]);
        }
        n
    }
}

/// 设备参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub period: Duration,
}

impl AudioSpec {
    /// 每次回调请求的字节数（按整帧对齐，至少一帧）
    pub fn period_bytes(&self) -> usize {
        let frame_bytes = self.format.bytes_per_sample() * self.channels.max(1) as usize;
        let frames = (self.sample_rate as u128 * self.period.as_millis() / 1000) as usize;
        frames.max(1) * frame_bytes
    }
}

/// 设备拉取回调：填满缓冲区，返回真实音频字节数
pub type FillCallback = Box<dyn FnMut(&mut [u8]) -> usize + Send>;

/// 宿主音频设备
pub trait AudioDevice: Send {
    fn start(&mut self, spec: AudioSpec, callback: FillCallback) -> Result<()>;
    fn stop(&mut self);
    fn description(&self) -> String;
}

/// 设备统计
#[derive(Debug, Default)]
pub struct DeviceStats {
    pub callbacks: AtomicU64,
    pub audio_bytes: AtomicU64,
    pub silence_bytes: AtomicU64,
}

/// 模拟音频输出 - 独立线程按周期调用回调（相当于真实设备的“缓冲区空”事件）
pub struct AudioOutput {
    name: String,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    stats: Arc<DeviceStats>,
}

impl AudioOutput {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            stats: Arc::new(DeviceStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<DeviceStats> {
        self.stats.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn device_loop(
        spec: AudioSpec,
        mut callback: FillCallback,
        running: Arc<AtomicBool>,
        stats: Arc<DeviceStats>,
    ) {
        info!(
            "{} 🔊 音频设备线程启动: {} Hz, {} 声道, {:?}, 周期 {:?}",
            log_ctx(),
            spec.sample_rate,
            spec.channels,
            spec.format,
            spec.period
        );

        let mut buffer = vec![0u8; spec.period_bytes()];
        let mut next_tick = Instant::now();

        while running.load(Ordering::SeqCst) {
            let written = callback(&mut buffer).min(buffer.len());

            let n = stats.callbacks.fetch_add(1, Ordering::Relaxed) + 1;
            stats.audio_bytes.fetch_add(written as u64, Ordering::Relaxed);
            stats
                .silence_bytes
                .fetch_add((buffer.len() - written) as u64, Ordering::Relaxed);
            if n % 100 == 0 {
                debug!("{} 🔊 音频回调 #{}", log_ctx(), n);
            }

            next_tick += spec.period;
            let now = Instant::now();
            if next_tick > now {
                thread::sleep(next_tick - now);
            } else {
                // 回调太慢，重新对齐节拍
                next_tick = now;
            }
        }

        info!("{} 🔊 音频设备线程退出", log_ctx());
    }
}

impl AudioDevice for AudioOutput {
    fn start(&mut self, spec: AudioSpec, callback: FillCallback) -> Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        if spec.sample_rate == 0 || spec.channels == 0 || spec.period.is_zero() {
            return Err(PlayerError::AudioError(format!("无效的音频参数: {:?}", spec)));
        }

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let stats = self.stats.clone();

        let handle = thread::Builder::new()
            .name("avpipe-audio".to_string())
            .spawn(move || Self::device_loop(spec, callback, running, stats))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                PlayerError::AudioError(format!("启动音频设备线程失败: {}", e))
            })?;

        self.thread = Some(handle);
        info!("{} 音频输出已启动: {}", log_ctx(), self.name);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("{} ⚠ 音频设备线程 panic", log_ctx());
            }
            info!("{} 音频输出已停止", log_ctx());
        }
    }

    fn description(&self) -> String {
        format!("AudioOutput({})", self.name)
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
