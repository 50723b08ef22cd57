use crate::core::{StreamClock, WallClock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 主时钟来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    Audio,
    Video,
    Wall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterTime {
    pub source: ClockSource,
    pub ms: i64,
}

/// 主时钟仲裁器
///
/// 不缓存任何时间戳，每次查询重新选择：
/// 音频（存在、仍在运行、已知）> 视频 > 墙钟（已开始播放）> 未知。
/// 音视频都退出后墙钟接管，接管时先对齐到最后一个已知的音视频时间。
#[derive(Clone)]
pub struct MasterClock {
    audio: Option<Arc<StreamClock>>,
    video: Option<Arc<StreamClock>>,
    wall: WallClock,
    handed_over: Arc<AtomicBool>,
}

impl MasterClock {
    pub fn new(
        audio: Option<Arc<StreamClock>>,
        video: Option<Arc<StreamClock>>,
        wall: WallClock,
    ) -> Self {
        Self {
            audio,
            video,
            wall,
            handed_over: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn now(&self) -> Option<MasterTime> {
        let mut last_retired: Option<i64> = None;
        for (source, clock) in [(ClockSource::Audio, &self.audio), (ClockSource::Video, &self.video)] {
            let Some(clock) = clock else {
                continue;
            };
            if !clock.is_active() {
                last_retired = last_retired.max(clock.get());
                continue;
            }
            if let Some(ms) = clock.get() {
                return Some(MasterTime { source, ms });
            }
        }

        if let Some(last) = last_retired {
            if self.wall.is_started() && !self.handed_over.swap(true, Ordering::AcqRel) {
                self.wall.align(last);
            }
        }

        self.wall.now().map(|ms| MasterTime {
            source: ClockSource::Wall,
            ms,
        })
    }

    pub fn now_ms(&self) -> Option<i64> {
        self.now().map(|t| t.ms)
    }

    pub fn wall(&self) -> &WallClock {
        &self.wall
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ManualTime, StreamKind};

    fn clocks() -> (Arc<StreamClock>, Arc<StreamClock>, WallClock, Arc<ManualTime>) {
        let time = Arc::new(ManualTime::new(0));
        (
            Arc::new(StreamClock::new(StreamKind::Audio)),
            Arc::new(StreamClock::new(StreamKind::Video)),
            WallClock::with_source(time.clone()),
            time,
        )
    }

    #[test]
    fn test_unknown_before_anything_plays() {
        let (audio, video, wall, _) = clocks();
        let master = MasterClock::new(Some(audio), Some(video), wall);
        assert_eq!(master.now(), None);
    }

    #[test]
    fn test_audio_preferred_over_video() {
        let (audio, video, wall, _) = clocks();
        let master = MasterClock::new(Some(audio.clone()), Some(video.clone()), wall);

        video.update(400);
        assert_eq!(
            master.now(),
            Some(MasterTime { source: ClockSource::Video, ms: 400 })
        );

        audio.update(380);
        assert_eq!(
            master.now(),
            Some(MasterTime { source: ClockSource::Audio, ms: 380 })
        );
    }

    #[test]
    fn test_retired_audio_falls_back_to_video() {
        let (audio, video, wall, _) = clocks();
        let master = MasterClock::new(Some(audio.clone()), Some(video.clone()), wall);
        audio.update(1_000);
        video.update(1_200);

        audio.retire();
        assert_eq!(master.now_ms(), Some(1_200));
    }

    #[test]
    fn test_wall_clock_takes_over_from_last_stream_time() {
        let (audio, video, wall, time) = clocks();
        let master = MasterClock::new(Some(audio.clone()), Some(video.clone()), wall.clone());
        wall.play();
        time.advance(5_000);

        audio.update(1_180);
        video.update(1_200);
        audio.retire();
        video.retire();

        assert_eq!(
            master.clone().now(),
            Some(MasterTime { source: ClockSource::Wall, ms: 1_200 })
        );
        time.advance(30);
        assert_eq!(master.now_ms(), Some(1_230));
    }

    #[test]
    fn test_wall_clock_when_no_stream_clock_is_known() {
        let (_, _, wall, time) = clocks();
        let master = MasterClock::new(None, None, wall.clone());
        assert_eq!(master.now(), None);

        wall.play();
        time.advance(75);
        assert_eq!(
            master.now(),
            Some(MasterTime { source: ClockSource::Wall, ms: 75 })
        );
    }
}
