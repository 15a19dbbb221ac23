use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Paces the driver loop: `wait` returns when the next iteration may start.
pub trait Ticker {
    fn wait(&mut self);
}

/// Fixed-rate pacing, like a display refresh. Late iterations are not made
/// up for: after an overrun the next deadline is measured from now.
pub struct FrameTicker {
    period: Duration,
    next: Option<Instant>,
}

impl FrameTicker {
    pub fn new(fps: u32) -> Self {
        Self {
            period: Duration::from_secs(1) / fps.max(1),
            next: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Ticker for FrameTicker {
    fn wait(&mut self) {
        let now = Instant::now();
        if let Some(deadline) = self.next {
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }
        self.next = Some(Instant::now() + self.period);
    }
}

/// No pacing at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unpaced;

impl Ticker for Unpaced {
    fn wait(&mut self) {}
}

/// Cooperative stop request, checked by the driver before each iteration.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear a previous request so the driver can be started again.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
