//! 백프레셔 게이트
//!
//! 채널 송신 버퍼가 high watermark를 넘으면 다음 청크 전송 전에 대기.
//! 대기는 {수위 하락 알림, 폴링 틱, 타임아웃} 중 먼저 오는 쪽으로 풀림.
//! 타임아웃이면 수위와 무관하게 재개 (채널이 죽었다면 이후 송신 실패로 드러남)
//!
//! 게이트는 채널 단위로만 동작하므로 느린 피어가 다른 피어를 막지 않음

use std::future::pending;
use std::time::Duration;

use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::{DEFAULT_BACKPRESSURE_TIMEOUT_MS, DEFAULT_HIGH_WATERMARK, DEFAULT_POLL_INTERVAL_MS};

/// 게이트 파라미터
#[derive(Debug, Clone, Copy)]
pub struct BackpressureConfig {
    /// 이 값 이하일 때만 통과 (바이트)
    pub high_watermark: usize,

    /// 수위 폴링 간격
    pub poll_interval: Duration,

    /// 최대 대기 시간
    pub timeout: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            high_watermark: DEFAULT_HIGH_WATERMARK,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            timeout: Duration::from_millis(DEFAULT_BACKPRESSURE_TIMEOUT_MS),
        }
    }
}

/// 게이트 통과 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// 수위가 낮아 바로 통과
    Clear,

    /// 대기 후 수위가 내려가서 통과
    Drained(Duration),

    /// 타임아웃으로 강제 통과
    TimedOut(Duration),
}

impl GateOutcome {
    /// 대기했는지 여부
    pub fn waited(&self) -> bool {
        !matches!(self, GateOutcome::Clear)
    }
}

/// 채널 수위가 high watermark 이하가 될 때까지 대기
pub async fn gate<C>(channel: &C, config: &BackpressureConfig) -> GateOutcome
where
    C: Channel + ?Sized,
{
    let high = config.high_watermark;
    if channel.buffered_amount() <= high {
        return GateOutcome::Clear;
    }

    let started = Instant::now();
    debug!(
        peer = channel.peer_id(),
        buffered = channel.buffered_amount(),
        high_watermark = high,
        "백프레셔 대기 시작"
    );

    let deadline = sleep(config.timeout);
    tokio::pin!(deadline);

    let mut ticker = interval_at(started + config.poll_interval, config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                let waited = started.elapsed();
                warn!(
                    peer = channel.peer_id(),
                    buffered = channel.buffered_amount(),
                    "백프레셔 타임아웃 - 전송 재개"
                );
                return GateOutcome::TimedOut(waited);
            }
            _ = low_signal(channel) => {}
            _ = ticker.tick() => {}
        }

        if channel.buffered_amount() <= high {
            return GateOutcome::Drained(started.elapsed());
        }
    }
}

/// 수위 하락 알림 대기 (알림이 없는 채널은 영원히 대기)
async fn low_signal<C>(channel: &C)
where
    C: Channel + ?Sized,
{
    match channel.buffered_amount_low() {
        Some(notify) => notify.notified().await,
        None => pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::sync::Notify;

    use crate::channel::PeerId;
    use crate::message::Message;
    use crate::Result;

    /// 수위를 직접 조작하는 테스트용 채널
    struct ScriptedChannel {
        level: AtomicUsize,
        low: Option<Notify>,
    }

    impl ScriptedChannel {
        fn new(level: usize, with_notify: bool) -> Arc<Self> {
            Arc::new(Self {
                level: AtomicUsize::new(level),
                low: with_notify.then(Notify::new),
            })
        }

        fn set_level(&self, level: usize) {
            self.level.store(level, Ordering::SeqCst);
            if let Some(low) = &self.low {
                low.notify_waiters();
            }
        }
    }

    impl Channel for ScriptedChannel {
        fn peer_id(&self) -> PeerId {
            7
        }

        fn send(&self, _message: &Message) -> Result<()> {
            Ok(())
        }

        fn buffered_amount(&self) -> usize {
            self.level.load(Ordering::SeqCst)
        }

        fn buffered_amount_low(&self) -> Option<&Notify> {
            self.low.as_ref()
        }

        fn close(&self) {}
    }

    const MB: usize = 1024 * 1024;

    #[tokio::test(start_paused = true)]
    async fn test_clear_below_watermark() {
        let channel = ScriptedChannel::new(MB, true);
        let outcome = gate(channel.as_ref(), &BackpressureConfig::default()).await;
        assert_eq!(outcome, GateOutcome::Clear);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_until_drop_notification() {
        let channel = ScriptedChannel::new(2 * MB, true);

        let drainer = channel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(200)).await;
            drainer.set_level(0);
        });

        let start = Instant::now();
        let outcome = gate(channel.as_ref(), &BackpressureConfig::default()).await;
        let waited = start.elapsed();

        assert!(matches!(outcome, GateOutcome::Drained(_)));
        assert!(waited >= Duration::from_millis(200));
        assert!(waited < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_without_notification() {
        let channel = ScriptedChannel::new(2 * MB, false);

        let drainer = channel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(120)).await;
            drainer.level.store(0, Ordering::SeqCst);
        });

        let start = Instant::now();
        let outcome = gate(channel.as_ref(), &BackpressureConfig::default()).await;

        assert!(matches!(outcome, GateOutcome::Drained(_)));
        // 120ms 이후 첫 폴링 틱 (150ms)에서 통과
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(150));
        assert!(waited < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resumes_anyway() {
        let channel = ScriptedChannel::new(2 * MB, true);

        let start = Instant::now();
        let outcome = gate(channel.as_ref(), &BackpressureConfig::default()).await;

        assert!(matches!(outcome, GateOutcome::TimedOut(_)));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channels_are_gated_independently() {
        let slow = ScriptedChannel::new(4 * MB, true);
        let fast = ScriptedChannel::new(0, true);
        let config = BackpressureConfig::default();

        let slow_task = {
            let slow = slow.clone();
            tokio::spawn(async move { gate(slow.as_ref(), &config).await })
        };

        sleep(Duration::from_millis(100)).await;

        // 느린 채널이 대기 중이어도 빠른 채널은 즉시 통과
        let outcome = gate(fast.as_ref(), &config).await;
        assert_eq!(outcome, GateOutcome::Clear);
        assert!(!slow_task.is_finished());

        slow.set_level(0);
        let slow_outcome = slow_task.await.unwrap();
        assert!(slow_outcome.waited());
    }
}
