//! Latest-frame exchange between independently clocked producers
//!
//! The camera pushes into a [`FrameBox`] at its own cadence; the screen
//! pipeline reads whatever is newest when it needs it. Writers overwrite,
//! readers never see a torn value, and nothing is queued.

use super::sample::VideoFrame;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// How old a camera frame may be before consumers stop using it
pub const DEFAULT_STALENESS_WINDOW: Duration = Duration::from_millis(150);

/// A frame plus the host time it was captured at
#[derive(Debug, Clone)]
pub struct TimedFrame {
    pub frame: Arc<VideoFrame>,
    pub captured_at: Duration,
}

impl TimedFrame {
    /// Age relative to `now`; frames stamped in the future count as fresh
    pub fn age(&self, now: Duration) -> Duration {
        now.saturating_sub(self.captured_at)
    }
}

/// Source of the most recent secondary frame
pub trait FrameSource: Send + Sync {
    fn snapshot(&self) -> Option<TimedFrame>;
}

/// Single-slot, most-recent-wins frame holder
#[derive(Debug, Default)]
pub struct FrameBox {
    slot: Mutex<Option<TimedFrame>>,
}

impl FrameBox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slot contents. O(1), holds the lock only for the swap.
    pub fn write(&self, frame: Arc<VideoFrame>, captured_at: Duration) {
        let next = TimedFrame { frame, captured_at };
        let previous = self.slot.lock().replace(next);
        // Drop the old frame outside the lock
        drop(previous);
    }

    /// Forget the current frame (producer stopped)
    pub fn clear(&self) {
        let previous = self.slot.lock().take();
        drop(previous);
    }

    pub fn snapshot(&self) -> Option<TimedFrame> {
        self.slot.lock().clone()
    }
}

impl FrameSource for FrameBox {
    fn snapshot(&self) -> Option<TimedFrame> {
        FrameBox::snapshot(self)
    }
}

/// Consumer-side staleness filter
///
/// Prefers the newest snapshot, falls back to the last good frame while it
/// is still inside the window, and otherwise reports no frame at all.
#[derive(Debug, Clone)]
pub struct FreshFrameSelector {
    window: Duration,
    last_good: Option<TimedFrame>,
}

impl FreshFrameSelector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_good: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn is_fresh(&self, frame: &TimedFrame, now: Duration) -> bool {
        frame.age(now) <= self.window
    }

    pub fn select(&mut self, snapshot: Option<TimedFrame>, now: Duration) -> Option<TimedFrame> {
        if let Some(frame) = snapshot {
            if self.is_fresh(&frame, now) {
                self.last_good = Some(frame.clone());
                return Some(frame);
            }
        }

        match self.last_good.take() {
            Some(frame) if self.is_fresh(&frame, now) => {
                self.last_good = Some(frame.clone());
                Some(frame)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(shade: u8) -> Arc<VideoFrame> {
        Arc::new(VideoFrame::solid(2, 2, [shade, shade, shade, 255]))
    }

    #[test]
    fn test_snapshot_returns_last_write() {
        let frame_box = FrameBox::new();
        assert!(frame_box.snapshot().is_none());

        let f = frame(10);
        frame_box.write(f.clone(), Duration::from_millis(5));
        let snap = frame_box.snapshot().unwrap();
        assert!(Arc::ptr_eq(&snap.frame, &f));
        assert_eq!(snap.captured_at, Duration::from_millis(5));
    }

    #[test]
    fn test_last_write_wins() {
        let frame_box = FrameBox::new();
        let f1 = frame(1);
        let f2 = frame(2);
        frame_box.write(f1.clone(), Duration::from_millis(1));
        frame_box.write(f2.clone(), Duration::from_millis(2));

        let snap = frame_box.snapshot().unwrap();
        assert!(Arc::ptr_eq(&snap.frame, &f2));
        assert!(!Arc::ptr_eq(&snap.frame, &f1));
        assert_eq!(snap.captured_at, Duration::from_millis(2));
    }

    #[test]
    fn test_clear() {
        let frame_box = FrameBox::new();
        frame_box.write(frame(1), Duration::ZERO);
        frame_box.clear();
        assert!(frame_box.snapshot().is_none());
    }

    #[test]
    fn test_staleness_is_a_hard_boundary() {
        let window = Duration::from_millis(150);
        let captured_at = Duration::from_secs(10);
        let snap = TimedFrame {
            frame: frame(1),
            captured_at,
        };

        let mut selector = FreshFrameSelector::new(window);
        let accepted = selector.select(
            Some(snap.clone()),
            captured_at + window - Duration::from_millis(1),
        );
        assert!(accepted.is_some());

        let mut selector = FreshFrameSelector::new(window);
        let rejected = selector.select(Some(snap), captured_at + window + Duration::from_millis(1));
        assert!(rejected.is_none());
    }

    #[test]
    fn test_falls_back_to_last_good_then_to_nothing() {
        let window = Duration::from_millis(150);
        let mut selector = FreshFrameSelector::new(window);
        let good = TimedFrame {
            frame: frame(1),
            captured_at: Duration::from_millis(1000),
        };
        assert!(selector
            .select(Some(good.clone()), Duration::from_millis(1010))
            .is_some());

        // Producer went away: reuse the last good frame while it is fresh
        let reused = selector.select(None, Duration::from_millis(1100)).unwrap();
        assert!(Arc::ptr_eq(&reused.frame, &good.frame));

        // Outage outlasts the window: no frame at all
        assert!(selector.select(None, Duration::from_millis(1200)).is_none());
        // and the old frame does not come back later
        assert!(selector.select(None, Duration::from_millis(1001)).is_none());
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let frame_box = Arc::new(FrameBox::new());
        let writer = {
            let frame_box = frame_box.clone();
            std::thread::spawn(move || {
                for i in 0..1000u64 {
                    frame_box.write(frame((i % 255) as u8), Duration::from_micros(i));
                }
            })
        };

        let mut last = Duration::ZERO;
        for _ in 0..1000 {
            if let Some(snap) = frame_box.snapshot() {
                // Timestamps only move forward for a single writer
                assert!(snap.captured_at >= last);
                last = snap.captured_at;
                assert_eq!(snap.frame.width(), 2);
            }
        }
        writer.join().unwrap();
        assert_eq!(
            frame_box.snapshot().unwrap().captured_at,
            Duration::from_micros(999)
        );
    }
}
