//! Process-wide control flags and the read-only status snapshot handed to
//! plugins.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Global control flags shared by the control bot and every session.
///
/// `paused` is read without synchronization by every liveness handler and
/// written only by the pause/resume commands.
#[derive(Debug)]
pub struct RuntimeStatus {
    paused: AtomicBool,
    active_sessions: AtomicUsize,
    started_at: DateTime<Utc>,
    started: Instant,
}

/// Point-in-time view of [`RuntimeStatus`].
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub uptime: Duration,
    pub started_at: DateTime<Utc>,
    pub active_sessions: usize,
    pub paused: bool,
}

impl RuntimeStatus {
    pub fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            active_sessions: AtomicUsize::new(0),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Pause liveness replies. Returns the previous value.
    pub fn pause(&self) -> bool {
        self.paused.swap(true, Ordering::Relaxed)
    }

    /// Resume liveness replies. Returns the previous value.
    pub fn resume(&self) -> bool {
        self.paused.swap(false, Ordering::Relaxed)
    }

    pub fn session_activated(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_deactivated(&self) {
        // Saturate at zero
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            uptime: self.uptime(),
            started_at: self.started_at,
            active_sessions: self.active_sessions(),
            paused: self.is_paused(),
        }
    }
}

impl Default for RuntimeStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a duration as `1d 2h 3m 4s`, dropping the day part when zero.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    let (minutes, seconds) = (rem / 60, rem % 60);
    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else {
        format!("{}h {}m {}s", hours, minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_and_resume() {
        let status = RuntimeStatus::new();
        assert!(!status.is_paused());

        assert!(!status.pause());
        assert!(status.is_paused());
        assert!(status.pause());

        assert!(status.resume());
        assert!(!status.is_paused());
    }

    #[test]
    fn test_active_session_counter_saturates() {
        let status = RuntimeStatus::new();
        status.session_deactivated();
        assert_eq!(status.active_sessions(), 0);

        status.session_activated();
        status.session_activated();
        status.session_deactivated();
        assert_eq!(status.snapshot().active_sessions, 1);
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(59)), "0h 0m 59s");
        assert_eq!(format_uptime(Duration::from_secs(3_661)), "1h 1m 1s");
        assert_eq!(format_uptime(Duration::from_secs(90_061)), "1d 1h 1m 1s");
    }
}
