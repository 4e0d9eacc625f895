use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::core::types::Timestamp;

/// 播放时钟 - 整条流水线的"当前时刻"唯一来源
///
/// 虚拟播放时间：运行时 `position = base_position + (now - base_wall) × speed`，
/// 暂停时冻结在最后的值。渲染工作者按它挑块，解码工作者按它维持窗口。
#[derive(Clone)]
pub struct RealTimeClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    base_wall: Instant,       // 基准时刻
    base_position: Timestamp, // 基准播放位置
    speed: f64,               // 播放速率（1.0 = 正常）
    running: bool,
}

impl ClockInner {
    fn position(&self) -> Timestamp {
        if self.running {
            let elapsed_ns = self.base_wall.elapsed().as_nanos() as i64;
            self.base_position + Timestamp((elapsed_ns as f64 * self.speed) as i64)
        } else {
            self.base_position
        }
    }
}

impl RealTimeClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base_wall: Instant::now(),
                base_position: Timestamp::ZERO,
                speed: 1.0,
                running: false,
            })),
        }
    }

    /// 当前播放位置
    pub fn position(&self) -> Timestamp {
        self.inner.lock().unwrap().position()
    }

    /// 开始推进
    pub fn play(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.running {
            inner.base_wall = Instant::now();
            inner.running = true;
        }
    }

    /// 暂停推进（位置冻结在当前值）
    pub fn pause(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.running {
            inner.base_position = inner.position();
            inner.running = false;
        }
    }

    /// 重置到 0 并暂停
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.base_position = Timestamp::ZERO;
        inner.base_wall = Instant::now();
        inner.running = false;
    }

    /// 直接设置播放位置（Seek / 解码兜底 / 播放结束时用）
    pub fn update(&self, position: Timestamp) {
        let mut inner = self.inner.lock().unwrap();
        inner.base_position = position;
        inner.base_wall = Instant::now();
    }

    /// 设置播放速率（必须 > 0）
    pub fn set_speed(&self, speed: f64) {
        if speed <= 0.0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.running {
            // 先结算旧速率下的位置，再切换
            inner.base_position = inner.position();
            inner.base_wall = Instant::now();
        }
        inner.speed = speed;
    }

    pub fn speed(&self) -> f64 {
        self.inner.lock().unwrap().speed
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().unwrap().running
    }
}

impl Default for RealTimeClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn starts_paused_at_zero() {
        let clock = RealTimeClock::new();
        assert!(!clock.is_running());
        assert_eq!(clock.position(), Timestamp::ZERO);
        thread::sleep(Duration::from_millis(20));
        // 暂停时位置不动
        assert_eq!(clock.position(), Timestamp::ZERO);
    }

    #[test]
    fn advances_when_playing() {
        let clock = RealTimeClock::new();
        clock.play();
        thread::sleep(Duration::from_millis(50));
        let p = clock.position();
        assert!(p.as_millis() >= 40, "position = {}", p);
    }

    #[test]
    fn pause_freezes_position() {
        let clock = RealTimeClock::new();
        clock.play();
        thread::sleep(Duration::from_millis(30));
        clock.pause();
        let frozen = clock.position();
        thread::sleep(Duration::from_millis(30));
        assert_eq!(clock.position(), frozen);
    }

    #[test]
    fn update_moves_base() {
        let clock = RealTimeClock::new();
        clock.update(Timestamp::from_millis(5000));
        assert_eq!(clock.position().as_millis(), 5000);
        clock.play();
        thread::sleep(Duration::from_millis(30));
        assert!(clock.position().as_millis() >= 5020);
    }

    #[test]
    fn speed_scales_elapsed_time() {
        let clock = RealTimeClock::new();
        clock.set_speed(2.0);
        clock.play();
        thread::sleep(Duration::from_millis(50));
        let p = clock.position().as_millis();
        assert!(p >= 80, "2x 速率下 50ms 应推进约 100ms，实际 {}", p);
    }

    #[test]
    fn rejects_non_positive_speed() {
        let clock = RealTimeClock::new();
        clock.set_speed(0.0);
        assert_eq!(clock.speed(), 1.0);
        clock.set_speed(-1.0);
        assert_eq!(clock.speed(), 1.0);
    }

    #[test]
    fn reset_returns_to_zero_paused() {
        let clock = RealTimeClock::new();
        clock.update(Timestamp::from_millis(1234));
        clock.play();
        clock.reset();
        assert!(!clock.is_running());
        assert_eq!(clock.position(), Timestamp::ZERO);
    }
}
