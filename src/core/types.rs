use serde::{Deserialize, Serialize};
use std::fmt;

/// 基本流类型（在打开流时确定一次，随包和帧一起传递）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] = [StreamKind::Video, StreamKind::Audio, StreamKind::Subtitle];
    pub const COUNT: usize = 3;

    /// 按类型查表用的下标
    pub fn index(self) -> usize {
        match self {
            StreamKind::Video => 0,
            StreamKind::Audio => 1,
            StreamKind::Subtitle => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
            StreamKind::Subtitle => "subtitle",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 时间基（每个单位 num/den 秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// 把流原生时间戳换算为毫秒：round(ts * num * 1000 / den)
    ///
    /// 分母为 0 时视为“没有时间戳”。
    pub fn to_ms(&self, ts: i64) -> Option<i64> {
        if self.den == 0 {
            return None;
        }
        let mut n = ts as i128 * self.num as i128 * 1000;
        let mut d = self.den as i128;
        if d < 0 {
            n = -n;
            d = -d;
        }
        // 四舍五入（远离零）
        let ms = if n >= 0 {
            (2 * n + d) / (2 * d)
        } else {
            -((-2 * n + d) / (2 * d))
        };
        i64::try_from(ms).ok()
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// 解封装器吐出的原始包（尚未按流类型分类）
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub time_base: Rational,
    pub data: Vec<u8>,
}

/// 已分类的编码包
#[derive(Debug, Clone, PartialEq)]
pub struct CodedPacket {
    pub kind: StreamKind,
    pub stream_index: usize,
    pub pts: Option<i64>,       // 原生时间单位
    pub time_base: Rational,
    pub data: Vec<u8>,
}

impl CodedPacket {
    pub fn from_raw(kind: StreamKind, raw: RawPacket) -> Self {
        Self {
            kind,
            stream_index: raw.stream_index,
            pts: raw.pts,
            time_base: raw.time_base,
            data: raw.data,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
    YUV420P,
    NV12,
}

/// 音频采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    I16,
    I32,
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::I16 => 2,
            SampleFormat::I32 | SampleFormat::F32 => 4,
        }
    }
}

/// 视频帧数据
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub pts: Option<i64>,       // 原生时间单位
    pub time_base: Rational,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl VideoFrame {
    pub fn describe_format(&self) -> String {
        format!("{}x{} {:?}", self.width, self.height, self.format)
    }
}

/// 音频帧数据（交错 PCM）
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub pts: Option<i64>,       // 原生时间单位
    pub time_base: Rational,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub data: Vec<u8>,
    /// 已经被设备消耗的字节偏移（独立字段，不与 data 长度复用）
    pub consumed: usize,
}

impl AudioFrame {
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.consumed.min(self.data.len())..]
    }

    pub fn is_exhausted(&self) -> bool {
        self.consumed >= self.data.len()
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.channels as u64 * self.format.bytes_per_sample() as u64
    }

    /// 已消耗部分对应的时长（毫秒）
    pub fn consumed_ms(&self) -> i64 {
        let bps = self.bytes_per_second();
        if bps == 0 {
            return 0;
        }
        (self.consumed as u64 * 1000 / bps) as i64
    }

    pub fn describe_format(&self) -> String {
        format!("{}Hz {}ch {:?}", self.sample_rate, self.channels, self.format)
    }
}

/// 字幕区域（相对 pts 的显示起止偏移）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleRegion {
    pub start_display_ms: u32,
    pub end_display_ms: u32,
    pub text: String,
}

/// 字幕帧数据
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleFrame {
    pub pts: Option<i64>,       // 原生时间单位
    pub time_base: Rational,
    pub regions: Vec<SubtitleRegion>,
}

impl SubtitleFrame {
    /// 显示窗口（毫秒，绝对时间）；没有时间戳时返回 None
    pub fn display_window_ms(&self) -> Option<(i64, i64)> {
        let base = self.time_base.to_ms(self.pts?)?;
        let start = self
            .regions
            .iter()
            .map(|r| r.start_display_ms)
            .min()
            .unwrap_or(0);
        let end = self
            .regions
            .iter()
            .map(|r| r.end_display_ms)
            .max()
            .unwrap_or(0);
        Some((base + start as i64, base + end.max(start) as i64))
    }
}

/// 解码结果
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedUnit {
    Video(VideoFrame),
    Audio(AudioFrame),
    Subtitle(SubtitleFrame),
}

impl DecodedUnit {
    pub fn kind(&self) -> StreamKind {
        match self {
            DecodedUnit::Video(_) => StreamKind::Video,
            DecodedUnit::Audio(_) => StreamKind::Audio,
            DecodedUnit::Subtitle(_) => StreamKind::Subtitle,
        }
    }

    /// 换算到毫秒的显示时间戳；None 表示“未定时”
    pub fn pts_ms(&self) -> Option<i64> {
        let (pts, time_base) = match self {
            DecodedUnit::Video(f) => (f.pts, f.time_base),
            DecodedUnit::Audio(f) => (f.pts, f.time_base),
            DecodedUnit::Subtitle(f) => (f.pts, f.time_base),
        };
        time_base.to_ms(pts?)
    }

    /// 用于检测流格式中途变化的签名（字幕没有格式约束）
    pub fn format_signature(&self) -> Option<String> {
        match self {
            DecodedUnit::Video(f) => Some(f.describe_format()),
            DecodedUnit::Audio(f) => Some(f.describe_format()),
            DecodedUnit::Subtitle(_) => None,
        }
    }
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Stopped,
}

impl PlaybackState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            PlaybackState::Playing => 0,
            PlaybackState::Paused => 1,
            PlaybackState::Stopped => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => PlaybackState::Playing,
            1 => PlaybackState::Paused,
            _ => PlaybackState::Stopped,
        }
    }
}

/// 单路调度器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Waiting,
    Decoding,
    Presenting,
    Draining,
    Stopped,
}

/// 流信息（打开流时由解封装器给出）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
    pub time_base: Rational,
    pub fps: Option<f64>,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamInfo {
    pub fn video(index: usize, time_base: Rational, fps: f64, width: u32, height: u32) -> Self {
        Self {
            index,
            kind: StreamKind::Video,
            time_base,
            fps: Some(fps),
            width,
            height,
            sample_rate: 0,
            channels: 0,
        }
    }

    pub fn audio(index: usize, sample_rate: u32, channels: u16) -> Self {
        Self {
            index,
            kind: StreamKind::Audio,
            time_base: Rational::new(1, sample_rate as i32),
            fps: None,
            width: 0,
            height: 0,
            sample_rate,
            channels,
        }
    }

    pub fn subtitle(index: usize, time_base: Rational) -> Self {
        Self {
            index,
            kind: StreamKind::Subtitle,
            time_base,
            fps: None,
            width: 0,
            height: 0,
            sample_rate: 0,
            channels: 0,
        }
    }
}

/// 媒体信息
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    pub description: String,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    /// 每种类型取第一路流
    pub fn stream(&self, kind: StreamKind) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.kind == kind)
    }

    pub fn has(&self, kind: StreamKind) -> bool {
        self.stream(kind).is_some()
    }
}
