//! Tick sources for the drain loop.
//!
//! Any `Stream<Item = ()>` can drive a batcher. [`Ticker`] is the default:
//! a fixed-period pulse. Tests and custom schedulers can swap in their own
//! stream instead of depending on wall-clock delays.
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use futures::{FutureExt as _, Stream};
use futures_timer::Delay;

/// Stream that wakes the drain loop.
///
/// The loop pulls the next item only after the previous batch settled, so a
/// tick stream can never cause overlapping drains.
pub trait TickStream: Stream<Item = ()> + Send {}

impl<St> TickStream for St where St: Stream<Item = ()> + Send {}

/// Fixed-period stream.
///
/// The first delay is armed on the first poll, so a ticker built ahead of
/// time does not fire early. The delay is re-armed when it fires. A consumer
/// that stalls longer than one period gets the next tick immediately, never
/// a burst of them.
pub struct Ticker {
    delay: Option<Delay>,
    period: Duration,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        Self {
            delay: None,
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl std::fmt::Debug for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticker")
            .field("period", &self.period)
            .field("armed", &self.delay.is_some())
            .finish()
    }
}

impl Stream for Ticker {
    type Item = ();

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let period = this.period;
        let delay = this.delay.get_or_insert_with(|| Delay::new(period));
        ready!(delay.poll_unpin(cx));
        delay.reset(period);
        Poll::Ready(Some(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{FutureExt as _, StreamExt as _};
    use std::time::Instant;

    #[test]
    fn ticker_waits_at_least_one_period_between_ticks() {
        let period = Duration::from_millis(5);
        let started = Instant::now();
        let ticks = futures::executor::block_on(Ticker::new(period).take(3).count());

        assert_eq!(ticks, 3);
        assert!(started.elapsed() >= period * 3);
    }

    #[test]
    fn first_period_starts_on_first_poll() {
        let period = Duration::from_millis(20);
        let mut ticker = Ticker::new(period);
        std::thread::sleep(period * 2);

        assert!(ticker.next().now_or_never().is_none());
        let started = Instant::now();
        futures::executor::block_on(ticker.next());
        assert!(started.elapsed() >= period / 2);
    }
}
