use crate::core::types::StreamKind;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// “未知”哨兵值（绝不能当作 0 时刻）
const UNKNOWN_MS: i64 = i64::MIN;

/// 单路流时钟 - 最近一次成功解码单元的显示时间（毫秒）
///
/// 只由所属调度器写入，主时钟仲裁器无锁读取。
pub struct StreamClock {
    kind: StreamKind,
    pts_ms: AtomicI64,
    active: AtomicBool,
}

impl StreamClock {
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            pts_ms: AtomicI64::new(UNKNOWN_MS),
            active: AtomicBool::new(true),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// 推进时钟，返回更新后的值
    ///
    /// 正向播放时钟单调不减：比当前值小的时间戳被忽略。
    pub fn update(&self, pts_ms: i64) -> i64 {
        let previous = self.pts_ms.fetch_max(pts_ms, Ordering::AcqRel);
        previous.max(pts_ms)
    }

    /// 当前值；None 表示尚未产生任何时间戳
    pub fn get(&self) -> Option<i64> {
        match self.pts_ms.load(Ordering::Acquire) {
            UNKNOWN_MS => None,
            ms => Some(ms),
        }
    }

    /// 调度器停止后退出仲裁
    pub fn retire(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// 时间源 - 便于在测试中注入假时钟
pub trait TimeSource: Send + Sync {
    /// 单调递增的毫秒数
    fn now_ms(&self) -> i64;
}

/// 基于 Instant 的系统单调时钟
pub struct MonotonicTime {
    origin: Instant,
}

impl MonotonicTime {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTime {
    fn now_ms(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }
}

/// 手动推进的时间源（同步测试用）
#[derive(Default)]
pub struct ManualTime {
    now: AtomicI64,
}

impl ManualTime {
    pub fn new(start_ms: i64) -> Self {
        Self { now: AtomicI64::new(start_ms) }
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTime {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// 墙钟 - 没有音视频时间戳时的兜底主时钟
///
/// 第一次进入 Playing 时开始计时，暂停时冻结。
#[derive(Clone)]
pub struct WallClock {
    inner: Arc<Mutex<ClockInner>>,
    source: Arc<dyn TimeSource>,
}

struct ClockInner {
    started: bool,
    base_ms: i64,               // 基准播放时间（毫秒）
    base_at: i64,               // 基准时刻（时间源读数）
    paused: bool,
    paused_at: i64,             // 暂停时的位置
}

impl WallClock {
    pub fn new() -> Self {
        Self::with_source(Arc::new(MonotonicTime::new()))
    }

    pub fn with_source(source: Arc<dyn TimeSource>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                started: false,
                base_ms: 0,
                base_at: 0,
                paused: true,
                paused_at: 0,
            })),
            source,
        }
    }

    /// 获取当前播放时间（毫秒）；尚未开始播放时返回 None
    pub fn now(&self) -> Option<i64> {
        let inner = self.inner.lock();
        if !inner.started {
            return None;
        }
        Some(self.now_unlocked(&inner))
    }

    /// 开始 / 恢复计时
    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.base_ms = inner.paused_at;
            inner.base_at = self.source.now_ms();
            inner.paused = false;
            inner.started = true;
        }
    }

    /// 暂停计时
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.paused_at = self.now_unlocked(&inner);
            inner.paused = true;
        }
    }

    /// 把当前位置设为 `ms`，保持运行/暂停状态；尚未开始时不做任何事
    pub fn align(&self, ms: i64) {
        let mut inner = self.inner.lock();
        if !inner.started {
            return;
        }
        if inner.paused {
            inner.paused_at = ms;
        } else {
            inner.base_ms = ms;
            inner.base_at = self.source.now_ms();
        }
    }

    /// 是否暂停
    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().started
    }

    fn now_unlocked(&self, inner: &ClockInner) -> i64 {
        if inner.paused {
            inner.paused_at
        } else {
            inner.base_ms + (self.source.now_ms() - inner.base_at)
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_clock_starts_unknown() {
        let clock = StreamClock::new(StreamKind::Video);
        assert_eq!(clock.get(), None);
        clock.update(0);
        assert_eq!(clock.get(), Some(0));
    }

    #[test]
    fn test_stream_clock_is_monotonic() {
        let clock = StreamClock::new(StreamKind::Audio);
        let mut last = i64::MIN;
        for pts in [40, 80, 60, 120, 120, 100, 160] {
            clock.update(pts);
            let now = clock.get().unwrap();
            assert!(now >= last, "clock went backwards: {} < {}", now, last);
            last = now;
        }
        assert_eq!(clock.get(), Some(160));
    }

    #[test]
    fn test_stream_clock_retire() {
        let clock = StreamClock::new(StreamKind::Audio);
        assert!(clock.is_active());
        clock.retire();
        assert!(!clock.is_active());
    }

    #[test]
    fn test_wall_clock_not_started_until_play() {
        let time = Arc::new(ManualTime::new(500));
        let clock = WallClock::with_source(time.clone());
        assert_eq!(clock.now(), None);

        clock.play();
        time.advance(120);
        assert_eq!(clock.now(), Some(120));
    }

    #[test]
    fn test_wall_clock_freezes_while_paused() {
        let time = Arc::new(ManualTime::new(0));
        let clock = WallClock::with_source(time.clone());
        clock.play();
        time.advance(100);
        clock.pause();
        time.advance(1_000);
        assert_eq!(clock.now(), Some(100));

        clock.play();
        time.advance(50);
        assert_eq!(clock.now(), Some(150));
    }

    #[test]
    fn test_wall_clock_align_keeps_running() {
        let time = Arc::new(ManualTime::new(0));
        let clock = WallClock::with_source(time.clone());
        clock.align(900);
        assert_eq!(clock.now(), None);

        clock.play();
        time.advance(5_000);
        clock.align(1_200);
        assert_eq!(clock.now(), Some(1_200));
        time.advance(30);
        assert_eq!(clock.now(), Some(1_230));

        clock.pause();
        clock.align(2_000);
        time.advance(100);
        assert_eq!(clock.now(), Some(2_000));
    }
}
