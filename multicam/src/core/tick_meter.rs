use std::time::{Duration, Instant};

/// 事件频率计 (类似 cv::TickMeter，但按滑动时间窗统计)
///
/// 每来一个事件调用一次 `tick()`，`rate()` 返回最近一个完整窗口内的频率。
#[derive(Debug, Clone)]
pub struct RateMeter {
    window: Duration,
    window_start: Option<Instant>, // 当前窗口的起点
    count: u64,                    // 当前窗口内的事件数
    total: u64,                    // 累计事件数
    rate: f64,                     // 上一个完整窗口的频率
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl RateMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            window_start: None,
            count: 0,
            total: 0,
            rate: 0.0,
        }
    }

    /// 记录一次事件
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        self.total += 1;
        let Some(start) = self.window_start else {
            self.window_start = Some(now);
            self.count = 1;
            return;
        };

        let elapsed = now.saturating_duration_since(start);
        if elapsed >= self.window {
            // 窗口结束：本次事件算作下一个窗口的第一个
            self.rate = self.count as f64 / elapsed.as_secs_f64();
            self.window_start = Some(now);
            self.count = 1;
        } else {
            self.count += 1;
        }
    }

    /// 每秒事件数
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_over_full_window() {
        let mut meter = RateMeter::new(Duration::from_secs(1));
        let t0 = Instant::now();
        for i in 0..10u64 {
            meter.tick_at(t0 + Duration::from_millis(i * 100));
        }
        assert_eq!(meter.rate(), 0.0);
        meter.tick_at(t0 + Duration::from_millis(1000));
        assert!((meter.rate() - 10.0).abs() < 1e-9);
        assert_eq!(meter.total(), 11);

        meter.reset();
        assert_eq!(meter.total(), 0);
    }
}
