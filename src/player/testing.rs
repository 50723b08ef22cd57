// 单元测试共用的脚本化协作者

use crate::core::{
    AudioFrame, CodedPacket, DecodedUnit, MediaInfo, PixelFormat, PlayerError, RawPacket, Rational,
    Result, SampleFormat, StreamInfo, StreamKind, SubtitleFrame, SubtitleRegion, VideoFrame,
};
use crate::player::decoder::Decoder;
use crate::player::demuxer_source::DemuxerSource;
use crate::renderer::{SubtitleRenderer, VideoRenderer};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

const TEST_TIME_BASE: Rational = Rational::new(1, 1000);

/// 单字节负载的测试包，data[0] 为包编号
pub fn packet(kind: StreamKind, id: u8, pts: Option<i64>) -> CodedPacket {
    sized_packet(kind, id, pts, 1)
}

pub fn sized_packet(kind: StreamKind, id: u8, pts: Option<i64>, len: usize) -> CodedPacket {
    CodedPacket {
        kind,
        stream_index: kind.index(),
        pts,
        time_base: TEST_TIME_BASE,
        data: vec![id; len.max(1)],
    }
}

enum ScriptStep {
    Packet(RawPacket),
    Error(String),
}

/// 按脚本吐包的数据源
pub struct ScriptedSource {
    info: MediaInfo,
    steps: VecDeque<ScriptStep>,
    endless: Option<usize>,
    produced: u64,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            info: MediaInfo {
                description: "scripted".to_string(),
                streams: Vec::new(),
            },
            steps: VecDeque::new(),
            endless: None,
            produced: 0,
        }
    }

    pub fn with_video(mut self, index: usize) -> Self {
        self.info
            .streams
            .push(StreamInfo::video(index, TEST_TIME_BASE, 25.0, 64, 36));
        self
    }

    pub fn with_audio(mut self, index: usize) -> Self {
        self.info.streams.push(StreamInfo::audio(index, 1000, 1));
        self
    }

    pub fn with_subtitle(mut self, index: usize) -> Self {
        self.info
            .streams
            .push(StreamInfo::subtitle(index, TEST_TIME_BASE));
        self
    }

    /// 追加一个包，pts = id * 40ms
    pub fn packet(self, stream_index: usize, id: u8) -> Self {
        self.timed_packet(stream_index, id, Some(id as i64 * 40), 1)
    }

    pub fn timed_packet(mut self, stream_index: usize, id: u8, pts: Option<i64>, len: usize) -> Self {
        self.steps.push_back(ScriptStep::Packet(RawPacket {
            stream_index,
            pts,
            time_base: TEST_TIME_BASE,
            data: vec![id; len.max(1)],
        }));
        self
    }

    pub fn read_error(mut self, message: &str) -> Self {
        self.steps.push_back(ScriptStep::Error(message.to_string()));
        self
    }

    /// 脚本用完后在指定流上无限产包（每包约 1ms）
    pub fn endless(mut self, stream_index: usize) -> Self {
        self.endless = Some(stream_index);
        self
    }
}

impl DemuxerSource for ScriptedSource {
    fn read_packet(&mut self) -> Result<Option<RawPacket>> {
        match self.steps.pop_front() {
            Some(ScriptStep::Packet(packet)) => Ok(Some(packet)),
            Some(ScriptStep::Error(message)) => Err(PlayerError::DemuxError(message)),
            None => {
                let Some(stream_index) = self.endless else {
                    return Ok(None);
                };
                std::thread::sleep(Duration::from_millis(1));
                self.produced += 1;
                Ok(Some(RawPacket {
                    stream_index,
                    pts: Some(self.produced as i64 * 40),
                    time_base: TEST_TIME_BASE,
                    data: vec![(self.produced % 256) as u8],
                }))
            }
        }
    }

    fn media_info(&self) -> &MediaInfo {
        &self.info
    }

    fn description(&self) -> String {
        format!("ScriptedSource({} streams)", self.info.streams.len())
    }
}

enum Flavor {
    Video,
    Audio { sample_rate: u32, channels: u16 },
    Subtitle { duration_ms: u32 },
}

/// 按包编号（data[0]）决定输出的解码器
pub struct ScriptedDecoder {
    flavor: Flavor,
    fail: Vec<u8>,
    units: usize,
    resize: Option<(u8, u32, u32)>,
}

impl ScriptedDecoder {
    fn with_flavor(flavor: Flavor) -> Self {
        Self {
            flavor,
            fail: Vec::new(),
            units: 1,
            resize: None,
        }
    }

    /// 64x36 RGBA；多单元时 data = [id, k]，否则 data = [id]
    pub fn video() -> Self {
        Self::with_flavor(Flavor::Video)
    }

    /// I16 交错 PCM，data 原样取自包
    pub fn audio(sample_rate: u32, channels: u16) -> Self {
        Self::with_flavor(Flavor::Audio { sample_rate, channels })
    }

    /// 文本为 "sub {id}"，显示 `duration_ms`
    pub fn subtitle(duration_ms: u32) -> Self {
        Self::with_flavor(Flavor::Subtitle { duration_ms })
    }

    pub fn fail_on(mut self, id: u8) -> Self {
        self.fail.push(id);
        self
    }

    /// 每个包产生 n 个单元，pts 依次 +20ms
    pub fn units_per_packet(mut self, n: usize) -> Self {
        self.units = n;
        self
    }

    /// 从编号 id 起输出新的分辨率
    pub fn resize_on(mut self, id: u8, width: u32, height: u32) -> Self {
        self.resize = Some((id, width, height));
        self
    }

    fn unit(&self, packet: &CodedPacket, id: u8, k: usize) -> DecodedUnit {
        let pts = packet.pts.map(|p| p + k as i64 * 20);
        match self.flavor {
            Flavor::Video => {
                let (width, height) = match self.resize {
                    Some((from, w, h)) if id >= from => (w, h),
                    _ => (64, 36),
                };
                let data = if self.units > 1 { vec![id, k as u8] } else { vec![id] };
                DecodedUnit::Video(VideoFrame {
                    pts,
                    time_base: packet.time_base,
                    width,
                    height,
                    format: PixelFormat::RGBA,
                    data,
                })
            }
            Flavor::Audio { sample_rate, channels } => DecodedUnit::Audio(AudioFrame {
                pts,
                time_base: packet.time_base,
                sample_rate,
                channels,
                format: SampleFormat::I16,
                data: packet.data.clone(),
                consumed: 0,
            }),
            Flavor::Subtitle { duration_ms } => DecodedUnit::Subtitle(SubtitleFrame {
                pts,
                time_base: packet.time_base,
                regions: vec![SubtitleRegion {
                    start_display_ms: 0,
                    end_display_ms: duration_ms,
                    text: format!("sub {}", id),
                }],
            }),
        }
    }
}

impl Decoder for ScriptedDecoder {
    fn decode(&mut self, packet: &CodedPacket) -> Result<Vec<DecodedUnit>> {
        let id = packet.data.first().copied().unwrap_or(0);
        if self.fail.contains(&id) {
            return Err(PlayerError::DecodeError {
                kind: packet.kind,
                reason: format!("scripted failure on packet {}", id),
            });
        }
        Ok((0..self.units).map(|k| self.unit(packet, id, k)).collect())
    }

    fn info(&self) -> String {
        "ScriptedDecoder".to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shown {
    Video { data: Vec<u8>, pts: Option<i64> },
    Subtitle { id: u64, text: String },
    Expired(u64),
}

/// 记录所有呈现事件的渲染器（可克隆，共享同一份记录）
#[derive(Clone, Default)]
pub struct RecordingRenderer {
    shown: Arc<Mutex<Vec<Shown>>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<Shown> {
        self.shown.lock().clone()
    }

    pub fn video_data(&self) -> Vec<Vec<u8>> {
        self.shown
            .lock()
            .iter()
            .filter_map(|s| match s {
                Shown::Video { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }
}

impl VideoRenderer for RecordingRenderer {
    fn present_video(&mut self, frame: &VideoFrame) -> Result<()> {
        self.shown.lock().push(Shown::Video {
            data: frame.data.clone(),
            pts: frame.pts,
        });
        Ok(())
    }
}

impl SubtitleRenderer for RecordingRenderer {
    fn present_subtitle(&mut self, id: u64, frame: &SubtitleFrame) -> Result<()> {
        let text = frame
            .regions
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.shown.lock().push(Shown::Subtitle { id, text });
        Ok(())
    }

    fn expire_subtitle(&mut self, id: u64) {
        self.shown.lock().push(Shown::Expired(id));
    }
}
