use super::recorder::{CaptureState, Recorder};
use super::stop_requested;
use multicam_core::builder::CaptureConfig;
use multicam_core::time::Pacer;
use std::sync::Arc;
use tokio::sync::watch;

/// 编码节拍频率：目标帧率的两倍，保证队列排空速度不低于采集速度
pub fn encode_rate(target_frame_rate: f64) -> f64 {
    target_frame_rate * 2.0
}

/// 编码循环
///
/// 每拍最多写一帧。写盘在 blocking 线程池中进行，
/// 节拍器扣除处理耗时后只睡剩余时间。Idle 时只睡眠。
pub(crate) async fn run(
    identity: String,
    recorder: Arc<Recorder>,
    mut config_rx: watch::Receiver<CaptureConfig>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut pacer = Pacer::from_rate(encode_rate(config_rx.borrow_and_update().target_frame_rate));

    loop {
        if stop_requested(&stop_rx) {
            break;
        }

        if config_rx.has_changed().unwrap_or(false) {
            let fps = config_rx.borrow_and_update().target_frame_rate;
            pacer.set_rate(encode_rate(fps));
        }

        pacer.begin();
        if recorder.state() != CaptureState::Idle {
            let r = Arc::clone(&recorder);
            if let Err(err) = tokio::task::spawn_blocking(move || r.encode_tick()).await {
                tracing::error!("{}: encoding tick aborted: {}", identity, err);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(pacer.remaining()) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!("{}: encoding task stopped", identity);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_ticks_at_twice_the_frame_rate() {
        assert_eq!(encode_rate(25.0), 50.0);
        let pacer = Pacer::from_rate(encode_rate(25.0));
        assert_eq!(pacer.period(), std::time::Duration::from_millis(20));
    }
}
