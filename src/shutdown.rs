// Structured shutdown for the worker threads.
//
// Every long-running thread sleeps by waiting on this token with a timeout instead of calling
// thread::sleep, so triggering shutdown wakes all of them at once and the clean-shutdown latency
// is bounded by thread work, not by the longest sleep cycle.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct ShutdownToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownToken {
    pub fn new() -> ShutdownToken {
        ShutdownToken {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn trigger(&self) {
        let (flag, cv) = &*self.inner;
        *flag.lock().expect("shutdown flag") = true;
        cv.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().expect("shutdown flag")
    }

    // Sleep for `dur` or until shutdown triggers, whichever comes first.  Returns true if the
    // full duration elapsed, false if shutdown was (or had already been) triggered.
    pub fn sleep(&self, dur: Duration) -> bool {
        let (flag, cv) = &*self.inner;
        let deadline = Instant::now() + dur;
        let mut triggered = flag.lock().expect("shutdown flag");
        while !*triggered {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let (guard, _) = cv
                .wait_timeout(triggered, deadline - now)
                .expect("shutdown flag");
            triggered = guard;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    pub fn test_sleep_runs_to_completion() {
        let token = ShutdownToken::new();
        let start = Instant::now();
        assert!(token.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(!token.is_triggered());
    }

    #[test]
    pub fn test_trigger_wakes_sleeper() {
        let token = ShutdownToken::new();
        let t2 = token.clone();
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            t2.trigger();
        });
        let start = Instant::now();
        // Nominally a 10 second sleep; the trigger cuts it short.
        assert!(!token.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(token.is_triggered());
        h.join().unwrap();
    }

    #[test]
    pub fn test_sleep_after_trigger_returns_immediately() {
        let token = ShutdownToken::new();
        token.trigger();
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
