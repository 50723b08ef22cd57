//! 合成测试源与直通解码器
//!
//! 没有真实的容器/编解码器时，用它们驱动整条管线：
//! 数据源按时间戳顺序交错吐出视频、音频、字幕包，解码器把包原样还原为帧。

use crate::core::{
    AudioFrame, CodedPacket, DecodedUnit, MediaInfo, PixelFormat, PlayerError, RawPacket, Rational,
    Result, SampleFormat, StreamInfo, StreamKind, SubtitleFrame, SubtitleRegion, VideoFrame,
};
use crate::player::decoder::{Decoder, DecoderSet};
use crate::player::demuxer_source::DemuxerSource;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const VIDEO_MAGIC: u8 = b'V';
const AUDIO_MAGIC: u8 = b'A';
const SUBTITLE_MAGIC: u8 = b'S';

const VIDEO_INDEX: usize = 0;
const AUDIO_INDEX: usize = 1;
const SUBTITLE_INDEX: usize = 2;

/// 实时模式下允许领先墙钟的读取量
const REALTIME_LEAD_MS: u64 = 200;

const VIDEO_TIME_BASE: Rational = Rational::new(1, 90000);
const SUBTITLE_TIME_BASE: Rational = Rational::new(1, 1000);

/// 合成源参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticOptions {
    pub duration_ms: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub audio: bool,
    pub sample_rate: u32,
    pub channels: u16,
    /// 每个音频包的时长
    pub audio_packet_ms: u64,
    pub subtitles: bool,
    pub subtitle_every_ms: u64,
    pub subtitle_duration_ms: u32,
    /// 按媒体时间节奏读取（否则尽快读完）
    pub realtime: bool,
    /// 每 N 个视频包损坏一个
    pub corrupt_every: Option<u64>,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            duration_ms: 5_000,
            fps: 25.0,
            width: 320,
            height: 180,
            audio: true,
            sample_rate: 48_000,
            channels: 2,
            audio_packet_ms: 20,
            subtitles: true,
            subtitle_every_ms: 1_000,
            subtitle_duration_ms: 800,
            realtime: true,
            corrupt_every: None,
        }
    }
}

/// 合成测试图案数据源
pub struct SyntheticSource {
    options: SyntheticOptions,
    info: MediaInfo,
    started: Instant,
    video_frames: u64,
    audio_packets: u64,
    subtitle_events: u64,
}

impl SyntheticSource {
    pub fn new(options: SyntheticOptions) -> Result<Self> {
        if !(options.fps.is_finite() && options.fps > 0.0) {
            return Err(PlayerError::ConfigError(format!("无效的帧率: {}", options.fps)));
        }
        if options.audio && (options.sample_rate == 0 || options.channels == 0 || options.audio_packet_ms == 0) {
            return Err(PlayerError::ConfigError("无效的音频参数".to_string()));
        }
        if options.subtitles && options.subtitle_every_ms == 0 {
            return Err(PlayerError::ConfigError("subtitle_every_ms 必须大于 0".to_string()));
        }

        let mut streams = vec![StreamInfo::video(
            VIDEO_INDEX,
            VIDEO_TIME_BASE,
            options.fps,
            options.width,
            options.height,
        )];
        if options.audio {
            streams.push(StreamInfo::audio(AUDIO_INDEX, options.sample_rate, options.channels));
        }
        if options.subtitles {
            streams.push(StreamInfo::subtitle(SUBTITLE_INDEX, SUBTITLE_TIME_BASE));
        }

        let info = MediaInfo {
            description: format!(
                "synthetic {}x{}@{}fps {}ms",
                options.width, options.height, options.fps, options.duration_ms
            ),
            streams,
        };

        Ok(Self {
            options,
            info,
            started: Instant::now(),
            video_frames: 0,
            audio_packets: 0,
            subtitle_events: 0,
        })
    }

    fn video_ms(&self, frame: u64) -> u64 {
        (frame as f64 * 1000.0 / self.options.fps) as u64
    }

    /// 下一个要吐出的包：按时间戳最小的流选择
    fn next_due(&self) -> Option<(StreamKind, u64)> {
        let mut candidates = vec![(StreamKind::Video, self.video_ms(self.video_frames))];
        if self.options.audio {
            candidates.push((StreamKind::Audio, self.audio_packets * self.options.audio_packet_ms));
        }
        if self.options.subtitles {
            candidates.push((StreamKind::Subtitle, self.subtitle_events * self.options.subtitle_every_ms));
        }

        candidates
            .into_iter()
            .filter(|(_, ms)| *ms < self.options.duration_ms)
            .min_by_key(|(_, ms)| *ms)
    }

    fn pace(&self, media_ms: u64) {
        if !self.options.realtime {
            return;
        }
        let elapsed = self.started.elapsed();
        let due = Duration::from_millis(media_ms.saturating_sub(REALTIME_LEAD_MS));
        if due > elapsed {
            std::thread::sleep(due - elapsed);
        }
    }

    fn video_packet(&mut self, ms: u64) -> RawPacket {
        let index = self.video_frames;
        self.video_frames += 1;

        let corrupt = self
            .options
            .corrupt_every
            .map(|n| n > 0 && (index + 1) % n == 0)
            .unwrap_or(false);

        let mut data = Vec::with_capacity(16);
        data.push(if corrupt { 0 } else { VIDEO_MAGIC });
        data.extend_from_slice(&(self.options.width as u16).to_le_bytes());
        data.extend_from_slice(&(self.options.height as u16).to_le_bytes());
        data.extend_from_slice(&(index as u32).to_le_bytes());
        // 一行测试图案（按帧号滚动的灰阶）
        data.extend((0..8u8).map(|x| x.wrapping_mul(32).wrapping_add(index as u8)));

        RawPacket {
            stream_index: VIDEO_INDEX,
            pts: Some(ms as i64 * 90),
            time_base: VIDEO_TIME_BASE,
            data,
        }
    }

    fn audio_packet(&mut self, ms: u64) -> RawPacket {
        self.audio_packets += 1;

        let rate = self.options.sample_rate as u64;
        let channels = self.options.channels as usize;
        let first = ms * rate / 1000;
        let count = self.options.audio_packet_ms * rate / 1000;

        let mut data = Vec::with_capacity(1 + count as usize * channels * 2);
        data.push(AUDIO_MAGIC);
        for n in first..first + count {
            // 440Hz 正弦
            let t = n as f64 / rate as f64;
            let sample = ((t * 440.0 * std::f64::consts::TAU).sin() * 8_000.0) as i16;
            for _ in 0..channels {
                data.extend_from_slice(&sample.to_le_bytes());
            }
        }

        RawPacket {
            stream_index: AUDIO_INDEX,
            pts: Some(first as i64),
            time_base: Rational::new(1, self.options.sample_rate as i32),
            data,
        }
    }

    fn subtitle_packet(&mut self, ms: u64) -> RawPacket {
        let n = self.subtitle_events;
        self.subtitle_events += 1;

        let mut data = vec![SUBTITLE_MAGIC];
        data.extend_from_slice(&self.options.subtitle_duration_ms.to_le_bytes());
        data.extend_from_slice(format!("字幕 #{} @ {}ms", n + 1, ms).as_bytes());

        RawPacket {
            stream_index: SUBTITLE_INDEX,
            pts: Some(ms as i64),
            time_base: SUBTITLE_TIME_BASE,
            data,
        }
    }
}

impl DemuxerSource for SyntheticSource {
    fn read_packet(&mut self) -> Result<Option<RawPacket>> {
        let Some((kind, ms)) = self.next_due() else {
            return Ok(None);
        };
        self.pace(ms);

        let packet = match kind {
            StreamKind::Video => self.video_packet(ms),
            StreamKind::Audio => self.audio_packet(ms),
            StreamKind::Subtitle => self.subtitle_packet(ms),
        };
        Ok(Some(packet))
    }

    fn media_info(&self) -> &MediaInfo {
        &self.info
    }

    fn description(&self) -> String {
        self.info.description.clone()
    }
}

fn bad_packet(packet: &CodedPacket, reason: &str) -> PlayerError {
    PlayerError::DecodeError {
        kind: packet.kind,
        reason: reason.to_string(),
    }
}

/// 直通视频解码器
pub struct SyntheticVideoDecoder;

impl Decoder for SyntheticVideoDecoder {
    fn decode(&mut self, packet: &CodedPacket) -> Result<Vec<DecodedUnit>> {
        let data = &packet.data;
        if data.len() < 9 || data[0] != VIDEO_MAGIC {
            return Err(bad_packet(packet, "视频包头损坏"));
        }
        let width = u16::from_le_bytes([data[1], data[2]]) as u32;
        let height = u16::from_le_bytes([data[3], data[4]]) as u32;

        Ok(vec![DecodedUnit::Video(VideoFrame {
            pts: packet.pts,
            time_base: packet.time_base,
            width,
            height,
            format: PixelFormat::RGBA,
            data: data[9..].to_vec(),
        })])
    }

    fn info(&self) -> String {
        "synthetic video".to_string()
    }
}

/// 直通音频解码器（I16 交错）
pub struct SyntheticAudioDecoder {
    sample_rate: u32,
    channels: u16,
}

impl SyntheticAudioDecoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self { sample_rate, channels }
    }
}

impl Decoder for SyntheticAudioDecoder {
    fn decode(&mut self, packet: &CodedPacket) -> Result<Vec<DecodedUnit>> {
        if packet.data.first() != Some(&AUDIO_MAGIC) {
            return Err(bad_packet(packet, "音频包头损坏"));
        }
        Ok(vec![DecodedUnit::Audio(AudioFrame {
            pts: packet.pts,
            time_base: packet.time_base,
            sample_rate: self.sample_rate,
            channels: self.channels,
            format: SampleFormat::I16,
            data: packet.data[1..].to_vec(),
            consumed: 0,
        })])
    }

    fn info(&self) -> String {
        format!("synthetic audio {}Hz {}ch", self.sample_rate, self.channels)
    }
}

/// 直通字幕解码器
pub struct SyntheticSubtitleDecoder;

impl Decoder for SyntheticSubtitleDecoder {
    fn decode(&mut self, packet: &CodedPacket) -> Result<Vec<DecodedUnit>> {
        let data = &packet.data;
        if data.len() < 5 || data[0] != SUBTITLE_MAGIC {
            return Err(bad_packet(packet, "字幕包头损坏"));
        }
        let duration = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
        let text = String::from_utf8_lossy(&data[5..]).into_owned();

        Ok(vec![DecodedUnit::Subtitle(SubtitleFrame {
            pts: packet.pts,
            time_base: packet.time_base,
            regions: vec![SubtitleRegion {
                start_display_ms: 0,
                end_display_ms: duration,
                text,
            }],
        })])
    }

    fn info(&self) -> String {
        "synthetic subtitle".to_string()
    }
}

/// 为媒体信息中的每种流创建直通解码器
pub fn synthetic_decoders(info: &MediaInfo) -> DecoderSet {
    let mut decoders = DecoderSet::new();
    for kind in StreamKind::ALL {
        let Some(stream) = info.stream(kind) else {
            continue;
        };
        let decoder: Box<dyn Decoder> = match kind {
            StreamKind::Video => Box::new(SyntheticVideoDecoder),
            StreamKind::Audio => Box::new(SyntheticAudioDecoder::new(stream.sample_rate, stream.channels)),
            StreamKind::Subtitle => Box::new(SyntheticSubtitleDecoder),
        };
        decoders.insert(kind, decoder);
    }
    decoders
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(options: SyntheticOptions) -> SyntheticSource {
        SyntheticSource::new(SyntheticOptions {
            realtime: false,
            ..options
        })
        .unwrap()
    }

    fn read_all(source: &mut SyntheticSource) -> Vec<RawPacket> {
        let mut packets = Vec::new();
        while let Some(packet) = source.read_packet().unwrap() {
            packets.push(packet);
        }
        packets
    }

    #[test]
    fn test_packets_are_interleaved_by_time() {
        let mut source = fast(SyntheticOptions {
            duration_ms: 1_000,
            ..Default::default()
        });
        let packets = read_all(&mut source);

        let video = packets.iter().filter(|p| p.stream_index == VIDEO_INDEX).count();
        let audio = packets.iter().filter(|p| p.stream_index == AUDIO_INDEX).count();
        let subtitles = packets.iter().filter(|p| p.stream_index == SUBTITLE_INDEX).count();
        assert_eq!(video, 25);
        assert_eq!(audio, 50);
        assert_eq!(subtitles, 1);

        let times: Vec<i64> = packets
            .iter()
            .map(|p| p.time_base.to_ms(p.pts.unwrap()).unwrap())
            .collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_decoders_round_trip_frames() {
        let mut source = fast(SyntheticOptions {
            duration_ms: 200,
            sample_rate: 1_000,
            channels: 1,
            ..Default::default()
        });
        let info = source.media_info().clone();
        let mut decoders = synthetic_decoders(&info);

        for raw in read_all(&mut source) {
            let kind = StreamKind::ALL[raw.stream_index];
            let mut decoder = decoders.take(kind).unwrap();
            let units = decoder.decode(&CodedPacket::from_raw(kind, raw)).unwrap();
            assert_eq!(units.len(), 1);
            match &units[0] {
                DecodedUnit::Video(frame) => assert_eq!((frame.width, frame.height), (320, 180)),
                // 20ms @ 1000Hz 单声道 = 20 个采样
                DecodedUnit::Audio(frame) => assert_eq!(frame.data.len(), 40),
                DecodedUnit::Subtitle(frame) => assert!(frame.regions[0].text.contains("字幕")),
            }
            decoders.insert(kind, decoder);
        }
    }

    #[test]
    fn test_corrupt_packets_fail_to_decode() {
        let mut source = fast(SyntheticOptions {
            duration_ms: 400,
            audio: false,
            subtitles: false,
            corrupt_every: Some(3),
            ..Default::default()
        });
        let mut decoder = SyntheticVideoDecoder;
        let failures = read_all(&mut source)
            .into_iter()
            .map(|raw| decoder.decode(&CodedPacket::from_raw(StreamKind::Video, raw)))
            .filter(|r| r.is_err())
            .count();
        assert_eq!(failures, 3);
    }

    #[test]
    fn test_rejects_invalid_fps() {
        let result = SyntheticSource::new(SyntheticOptions {
            fps: 0.0,
            ..Default::default()
        });
        assert!(matches!(result, Err(PlayerError::ConfigError(_))));
    }
}
