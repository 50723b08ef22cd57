use crate::core::{PlaybackState, WallClock};
use crate::player::log_ctx;
use log::info;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// 用户输入事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserEvent {
    TogglePause,
    Quit,
}

/// 全局播放状态控制器
///
/// 状态只由这里写入；每次变化都会递增代数并唤醒正在休眠的调度器，
/// 调度器只在 Waiting 顶部读取状态，进行中的解码总会完成。
pub struct PlaybackController {
    state: AtomicU8,
    generation: Mutex<u64>,
    changed: Condvar,
    wall: WallClock,
}

impl PlaybackController {
    pub fn new(initial: PlaybackState, wall: WallClock) -> Self {
        if initial == PlaybackState::Playing {
            wall.play();
        }
        Self {
            state: AtomicU8::new(initial.to_u8()),
            generation: Mutex::new(0),
            changed: Condvar::new(),
            wall,
        }
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn play(&self) -> PlaybackState {
        self.transition(|s| match s {
            PlaybackState::Paused => Some(PlaybackState::Playing),
            _ => None,
        })
    }

    pub fn pause(&self) -> PlaybackState {
        self.transition(|s| match s {
            PlaybackState::Playing => Some(PlaybackState::Paused),
            _ => None,
        })
    }

    /// Playing <-> Paused；Stopped 之后不再变化
    pub fn toggle_pause(&self) -> PlaybackState {
        self.transition(|s| match s {
            PlaybackState::Playing => Some(PlaybackState::Paused),
            PlaybackState::Paused => Some(PlaybackState::Playing),
            PlaybackState::Stopped => None,
        })
    }

    pub fn stop(&self) -> PlaybackState {
        self.transition(|s| match s {
            PlaybackState::Stopped => None,
            _ => Some(PlaybackState::Stopped),
        })
    }

    pub fn handle(&self, event: UserEvent) -> PlaybackState {
        match event {
            UserEvent::TogglePause => self.toggle_pause(),
            UserEvent::Quit => self.stop(),
        }
    }

    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// 休眠至多 `timeout`；若期间状态发生变化（代数不同于 `seen`）则提前返回
    ///
    /// 返回 true 表示被状态变化唤醒。
    pub fn sleep_since(&self, seen: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut generation = self.generation.lock();
        while *generation == seen {
            if self.changed.wait_until(&mut generation, deadline).timed_out() {
                return *generation != seen;
            }
        }
        true
    }

    fn transition(&self, next: impl Fn(PlaybackState) -> Option<PlaybackState>) -> PlaybackState {
        // 在代数锁内完成读-改-写，保证状态与代数一致
        let mut generation = self.generation.lock();
        let current = self.state();
        let Some(target) = next(current) else {
            return current;
        };

        self.state.store(target.to_u8(), Ordering::Release);
        match target {
            PlaybackState::Playing => self.wall.play(),
            PlaybackState::Paused | PlaybackState::Stopped => self.wall.pause(),
        }
        *generation += 1;
        self.changed.notify_all();

        info!("{} 🎛 播放状态: {:?} -> {:?}", log_ctx(), current, target);
        target
    }
}
