//! Outbound send rate limiting.
//!
//! The messenger tolerates roughly 25 messages per second per process and
//! 1 per second per chat. Every outbound send acquires from a
//! [`SendLimiter`] first; acquisition waits rather than failing, so
//! callers just `await` it.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::ids::UserId;

/// Sliding-window request tracker.
#[derive(Debug)]
struct Window {
    stamps: Vec<Instant>,
    max: usize,
    span: Duration,
}

impl Window {
    fn new(max: usize, span: Duration) -> Self {
        Self {
            stamps: Vec::new(),
            max,
            span,
        }
    }

    /// Record a request if the window has room, else return how long to
    /// wait before the oldest entry expires.
    fn try_record(&mut self, now: Instant) -> Result<(), Duration> {
        let cutoff = now.checked_sub(self.span).unwrap_or(now);
        self.stamps.retain(|t| *t > cutoff);
        if self.stamps.len() >= self.max {
            let oldest = self.stamps.iter().min().copied().unwrap_or(now);
            let free_at = oldest.checked_add(self.span).unwrap_or(now);
            return Err(free_at.saturating_duration_since(now));
        }
        self.stamps.push(now);
        Ok(())
    }
}

#[derive(Debug)]
struct LimiterInner {
    global: Window,
    per_chat: HashMap<UserId, Window>,
    chat_max: usize,
    chat_span: Duration,
}

/// Process-wide limiter for outbound messenger traffic.
#[derive(Debug)]
pub struct SendLimiter {
    inner: Mutex<LimiterInner>,
}

impl SendLimiter {
    /// Limiter with the deployment defaults: 25/s globally, 1/s per chat.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(25, Duration::from_secs(1), 1, Duration::from_secs(1))
    }

    /// Limiter with explicit windows.
    #[must_use]
    pub fn new(global_max: usize, global_span: Duration, chat_max: usize, chat_span: Duration) -> Self {
        Self {
            inner: Mutex::new(LimiterInner {
                global: Window::new(global_max, global_span),
                per_chat: HashMap::new(),
                chat_max,
                chat_span,
            }),
        }
    }

    /// Wait until a send to `chat` is allowed, then record it.
    pub async fn acquire(&self, chat: UserId) {
        loop {
            let wait = {
                let mut inner = self.inner.lock().await;
                let now = Instant::now();
                let chat_max = inner.chat_max;
                let chat_span = inner.chat_span;
                let chat_window = inner
                    .per_chat
                    .entry(chat)
                    .or_insert_with(|| Window::new(chat_max, chat_span));
                match chat_window.try_record(now) {
                    Err(wait) => Some(wait),
                    Ok(()) => match inner.global.try_record(now) {
                        Ok(()) => None,
                        Err(wait) => {
                            // Give back the per-chat slot we just took so a
                            // global stall does not starve this chat later.
                            if let Some(w) = inner.per_chat.get_mut(&chat) {
                                w.stamps.pop();
                            }
                            Some(wait)
                        },
                    },
                }
            };
            match wait {
                None => return,
                Some(wait) => tokio::time::sleep(wait.max(Duration::from_millis(5))).await,
            }
        }
    }

    /// Non-blocking probe, used by tests.
    pub async fn try_acquire(&self, chat: UserId) -> bool {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let chat_max = inner.chat_max;
        let chat_span = inner.chat_span;
        let chat_window = inner
            .per_chat
            .entry(chat)
            .or_insert_with(|| Window::new(chat_max, chat_span));
        if chat_window.try_record(now).is_err() {
            return false;
        }
        if inner.global.try_record(now).is_err() {
            if let Some(w) = inner.per_chat.get_mut(&chat) {
                w.stamps.pop();
            }
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn per_chat_limit_enforced() {
        let limiter = SendLimiter::with_defaults();
        let chat = UserId(1);
        assert!(limiter.try_acquire(chat).await);
        assert!(!limiter.try_acquire(chat).await);

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(limiter.try_acquire(chat).await);
    }

    #[tokio::test(start_paused = true)]
    async fn chats_are_independent() {
        let limiter = SendLimiter::with_defaults();
        assert!(limiter.try_acquire(UserId(1)).await);
        assert!(limiter.try_acquire(UserId(2)).await);
        assert!(limiter.try_acquire(UserId(3)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn global_limit_enforced() {
        let limiter = SendLimiter::new(3, Duration::from_secs(1), 10, Duration::from_secs(1));
        assert!(limiter.try_acquire(UserId(1)).await);
        assert!(limiter.try_acquire(UserId(2)).await);
        assert!(limiter.try_acquire(UserId(3)).await);
        assert!(!limiter.try_acquire(UserId(4)).await);

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(limiter.try_acquire(UserId(4)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn global_rejection_returns_chat_slot() {
        let limiter = SendLimiter::new(1, Duration::from_secs(1), 1, Duration::from_secs(1));
        assert!(limiter.try_acquire(UserId(1)).await);
        // Global window is full; chat 2's slot must not be consumed.
        assert!(!limiter.try_acquire(UserId(2)).await);

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(limiter.try_acquire(UserId(2)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_waits_until_window_frees() {
        let limiter = SendLimiter::with_defaults();
        let chat = UserId(9);
        limiter.acquire(chat).await;

        let started = Instant::now();
        limiter.acquire(chat).await;
        assert!(started.elapsed() >= Duration::from_millis(900));
    }
}
