//! Debounced incremental rendering.

use std::time::Duration;

use tokio::time::Instant;

use crate::handle::GenerationToken;

/// Default minimum spacing between two render appends.
pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(50);

/// Buffers visible-text deltas and releases them as one append per interval.
#[derive(Debug)]
pub struct RenderScheduler {
    interval: Duration,
    buffer: String,
    token: Option<GenerationToken>,
    deadline: Option<Instant>,
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_RENDER_INTERVAL)
    }
}

impl RenderScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            buffer: String::new(),
            token: None,
            deadline: None,
        }
    }

    /// When the next flush is due, if anything is buffered.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Buffer a chunk. Chunks for any token other than `active` are dropped.
    pub fn enqueue(
        &mut self,
        chunk: &str,
        token: GenerationToken,
        active: GenerationToken,
        now: Instant,
    ) -> bool {
        if token != active {
            return false;
        }
        if self.token != Some(token) {
            self.buffer.clear();
            self.token = Some(token);
        }
        if chunk.is_empty() {
            return true;
        }
        self.buffer.push_str(chunk);
        if self.deadline.is_none() {
            self.deadline = Some(now + self.interval);
        }
        true
    }

    /// Scheduled flush. Returns the text to append, or `None` if nothing is
    /// due. Stale buffers are discarded; when the surface is not ready the
    /// buffer is kept and the flush rescheduled.
    pub fn flush(
        &mut self,
        active: GenerationToken,
        surface_ready: bool,
        now: Instant,
    ) -> Option<String> {
        if self.token != Some(active) {
            self.clear();
            return None;
        }
        if !surface_ready {
            if !self.buffer.is_empty() {
                self.deadline = Some(now + self.interval);
            }
            return None;
        }
        self.flush_now(active)
    }

    /// Flush immediately, regardless of the deadline.
    pub fn flush_now(&mut self, active: GenerationToken) -> Option<String> {
        self.deadline = None;
        if self.token != Some(active) {
            self.buffer.clear();
            return None;
        }
        let text = std::mem::take(&mut self.buffer);
        (!text.is_empty()).then_some(text)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.token = None;
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Generation;

    #[tokio::test(start_paused = true)]
    async fn test_coalesces_chunks_until_deadline() {
        let mut generation = Generation::default();
        let t = generation.advance();
        let mut r = RenderScheduler::new(Duration::from_millis(40));
        let start = Instant::now();
        assert!(r.enqueue("Hel", t, t, start));
        assert!(r.enqueue("lo", t, t, start + Duration::from_millis(10)));
        assert_eq!(r.deadline(), Some(start + Duration::from_millis(40)));

        tokio::time::advance(Duration::from_millis(40)).await;
        assert_eq!(r.flush(t, true, Instant::now()).as_deref(), Some("Hello"));
        assert_eq!(r.deadline(), None);
        assert_eq!(r.flush(t, true, Instant::now()), None);
    }

    #[test]
    fn test_stale_enqueue_discarded() {
        let mut generation = Generation::default();
        let old = generation.advance();
        let new = generation.advance();
        let mut r = RenderScheduler::default();
        assert!(!r.enqueue("x", old, new, Instant::now()));
        assert_eq!(r.pending(), "");
        assert_eq!(r.deadline(), None);
    }

    #[test]
    fn test_stale_flush_discards_buffer() {
        let mut generation = Generation::default();
        let old = generation.advance();
        let mut r = RenderScheduler::default();
        r.enqueue("x", old, old, Instant::now());
        let new = generation.advance();
        assert_eq!(r.flush(new, true, Instant::now()), None);
        assert_eq!(r.pending(), "");
        assert_eq!(r.deadline(), None);
    }

    #[test]
    fn test_carries_forward_when_surface_missing() {
        let mut generation = Generation::default();
        let t = generation.advance();
        let mut r = RenderScheduler::new(Duration::from_millis(30));
        let now = Instant::now();
        r.enqueue("a", t, t, now);
        let later = now + Duration::from_millis(30);
        assert_eq!(r.flush(t, false, later), None);
        assert_eq!(r.deadline(), Some(later + Duration::from_millis(30)));
        r.enqueue("b", t, t, later);
        assert_eq!(r.flush(t, true, later).as_deref(), Some("ab"));
    }

    #[test]
    fn test_new_token_starts_fresh_buffer() {
        let mut generation = Generation::default();
        let a = generation.advance();
        let b = generation.advance();
        let mut r = RenderScheduler::default();
        r.enqueue("old", a, a, Instant::now());
        r.enqueue("new", b, b, Instant::now());
        assert_eq!(r.flush_now(b).as_deref(), Some("new"));
    }
}
