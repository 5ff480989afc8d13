use std::time::{Duration, Instant};

/// 自校正的固定周期节拍器
///
/// 用法：每次循环开始 `begin()`，处理完后 `remaining()` 得到还需睡眠的时间。
/// 睡眠时间 = 周期 - 处理耗时，处理超时则为零，不会累积漂移。
#[derive(Debug, Clone)]
pub struct Pacer {
    period: Duration,
    tick_start: Instant,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            tick_start: Instant::now(),
        }
    }

    /// 按频率 (Hz) 构造，非法频率退化为 1 Hz
    pub fn from_rate(hz: f64) -> Self {
        Self::new(Self::period_for(hz))
    }

    fn period_for(hz: f64) -> Duration {
        if hz.is_finite() && hz > 0.0 {
            Duration::from_secs_f64(1.0 / hz)
        } else {
            Duration::from_secs(1)
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// 帧率变化时调整周期 (下一个 tick 生效)
    pub fn set_rate(&mut self, hz: f64) {
        self.period = Self::period_for(hz);
    }

    /// 标记一个 tick 的开始
    pub fn begin(&mut self) {
        self.tick_start = Instant::now();
    }

    /// 本 tick 剩余的睡眠时间
    pub fn remaining(&self) -> Duration {
        self.remaining_after(self.tick_start.elapsed())
    }

    pub fn remaining_after(&self, elapsed: Duration) -> Duration {
        self.period.saturating_sub(elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_never_exceeds_period() {
        let pacer = Pacer::from_rate(50.0);
        assert_eq!(pacer.period(), Duration::from_millis(20));
        assert_eq!(pacer.remaining_after(Duration::ZERO), Duration::from_millis(20));
        assert_eq!(
            pacer.remaining_after(Duration::from_millis(5)),
            Duration::from_millis(15)
        );
        // 处理超时：不补偿，直接进入下一拍
        assert_eq!(pacer.remaining_after(Duration::from_millis(35)), Duration::ZERO);
        assert!(pacer.remaining() <= pacer.period());
    }

    #[test]
    fn invalid_rate_falls_back_to_one_hertz() {
        let mut pacer = Pacer::from_rate(0.0);
        assert_eq!(pacer.period(), Duration::from_secs(1));
        pacer.set_rate(f64::NAN);
        assert_eq!(pacer.period(), Duration::from_secs(1));
        pacer.set_rate(100.0);
        assert_eq!(pacer.period(), Duration::from_millis(10));
    }
}
