use crate::core::error::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 引擎配置（可从 JSON 文件加载，缺省字段使用默认值）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 暂停时的重试间隔（毫秒）
    pub pause_poll_ms: u64,
    /// 字幕调度的名义间隔（毫秒）
    pub subtitle_poll_ms: u64,
    /// 流没有给出帧率时使用的帧率
    pub default_fps: f64,
    /// 调度延迟下限（毫秒），保证向前推进
    pub min_delay_ms: u64,
    /// 音频回调中等待新包的最长时间（毫秒）
    pub audio_wait_ms: u64,
    /// 每个调度器持有的解码帧环大小
    pub frame_ring_slots: usize,
    /// 启动后保持暂停
    pub start_paused: bool,
    /// 模拟音频设备的回调周期（毫秒）
    pub audio_period_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pause_poll_ms: 10,
            subtitle_poll_ms: 100,
            default_fps: 25.0,
            min_delay_ms: 1,
            audio_wait_ms: 5,
            frame_ring_slots: 8,
            start_paused: false,
            audio_period_ms: 20,
        }
    }
}

impl EngineConfig {
    /// 从 JSON 文件加载配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pause_poll_ms == 0 {
            return Err(PlayerError::ConfigError("pause_poll_ms 必须大于 0".to_string()));
        }
        if self.subtitle_poll_ms == 0 {
            return Err(PlayerError::ConfigError("subtitle_poll_ms 必须大于 0".to_string()));
        }
        if !(self.default_fps.is_finite() && self.default_fps > 0.0) {
            return Err(PlayerError::ConfigError(format!(
                "default_fps 无效: {}",
                self.default_fps
            )));
        }
        if self.min_delay_ms == 0 {
            return Err(PlayerError::ConfigError("min_delay_ms 至少为 1".to_string()));
        }
        if self.frame_ring_slots == 0 {
            return Err(PlayerError::ConfigError("frame_ring_slots 必须大于 0".to_string()));
        }
        if self.audio_period_ms == 0 {
            return Err(PlayerError::ConfigError("audio_period_ms 必须大于 0".to_string()));
        }
        Ok(())
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    pub fn audio_wait(&self) -> Duration {
        Duration::from_millis(self.audio_wait_ms)
    }

    pub fn audio_period(&self) -> Duration {
        Duration::from_millis(self.audio_period_ms)
    }
}
