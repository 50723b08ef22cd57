use crate::core::{Result, StreamKind, SubtitleFrame, VideoFrame};
use crate::renderer::{SubtitleRenderer, VideoRenderer};
use crossbeam::queue::SegQueue;
use log::{debug, info};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// 一次呈现记录
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresentRecord {
    pub kind: StreamKind,
    /// 帧时间戳（毫秒）；未定时帧为 None
    pub pts_ms: Option<i64>,
    /// 呈现时刻（相对渲染器创建，毫秒）
    pub at_ms: i64,
}

/// 呈现记录汇总
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PresentStats {
    pub video_frames: u64,
    pub subtitles: u64,
    /// 相邻视频帧呈现间隔与时间戳间隔之差的最大值（毫秒）
    pub max_jitter_ms: Option<i64>,
}

/// 只打日志的渲染器
///
/// 每次呈现都推入无锁队列，播放结束后用于分析时间偏差。
#[derive(Clone)]
pub struct LogRenderer {
    origin: Instant,
    records: Arc<SegQueue<PresentRecord>>,
}

impl LogRenderer {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            records: Arc::new(SegQueue::new()),
        }
    }

    fn record(&self, kind: StreamKind, pts_ms: Option<i64>) {
        self.records.push(PresentRecord {
            kind,
            pts_ms,
            at_ms: self.origin.elapsed().as_millis() as i64,
        });
    }

    /// 取出所有记录（按呈现顺序）
    pub fn drain(&self) -> Vec<PresentRecord> {
        let mut records = Vec::with_capacity(self.records.len());
        while let Some(record) = self.records.pop() {
            records.push(record);
        }
        records
    }

    pub fn summarize(records: &[PresentRecord]) -> PresentStats {
        let mut stats = PresentStats::default();
        let mut previous: Option<(i64, i64)> = None;

        for record in records {
            match record.kind {
                StreamKind::Video => {
                    stats.video_frames += 1;
                    if let Some(pts) = record.pts_ms {
                        if let Some((last_pts, last_at)) = previous {
                            let jitter = ((record.at_ms - last_at) - (pts - last_pts)).abs();
                            let max = stats.max_jitter_ms.get_or_insert(jitter);
                            *max = (*max).max(jitter);
                        }
                        previous = Some((pts, record.at_ms));
                    }
                }
                StreamKind::Subtitle => stats.subtitles += 1,
                StreamKind::Audio => {}
            }
        }
        stats
    }
}

impl Default for LogRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoRenderer for LogRenderer {
    fn present_video(&mut self, frame: &VideoFrame) -> Result<()> {
        let pts_ms = frame.pts.and_then(|pts| frame.time_base.to_ms(pts));
        debug!("🖼 视频帧 pts={:?}ms {}", pts_ms, frame.describe_format());
        self.record(StreamKind::Video, pts_ms);
        Ok(())
    }
}

impl SubtitleRenderer for LogRenderer {
    fn present_subtitle(&mut self, id: u64, frame: &SubtitleFrame) -> Result<()> {
        let window = frame.display_window_ms();
        for region in &frame.regions {
            info!("💬 字幕 #{} {:?}: {}", id, window, region.text);
        }
        self.record(StreamKind::Subtitle, window.map(|(start, _)| start));
        Ok(())
    }

    fn expire_subtitle(&mut self, id: u64) {
        debug!("💬 字幕 #{} 结束显示", id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PixelFormat, Rational};

    fn record(pts_ms: i64, at_ms: i64) -> PresentRecord {
        PresentRecord {
            kind: StreamKind::Video,
            pts_ms: Some(pts_ms),
            at_ms,
        }
    }

    #[test]
    fn test_summarize_measures_jitter() {
        let records = vec![record(0, 100), record(40, 141), record(80, 175)];
        let stats = LogRenderer::summarize(&records);
        assert_eq!(stats.video_frames, 3);
        assert_eq!(stats.max_jitter_ms, Some(6));
    }

    #[test]
    fn test_records_in_presentation_order() {
        let mut renderer = LogRenderer::new();
        for pts in [0, 40, 80] {
            renderer
                .present_video(&VideoFrame {
                    pts: Some(pts),
                    time_base: Rational::new(1, 1000),
                    width: 2,
                    height: 2,
                    format: PixelFormat::RGBA,
                    data: Vec::new(),
                })
                .unwrap();
        }
        let pts: Vec<_> = renderer.drain().into_iter().map(|r| r.pts_ms).collect();
        assert_eq!(pts, vec![Some(0), Some(40), Some(80)]);
        assert!(renderer.drain().is_empty());
    }
}
