//! Live SFTP session count, driving the daemon's exit.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

type IdleHook = Box<dyn Fn() + Send + Sync>;

/// Counts SFTP sessions being served.
///
/// Starts at zero and disarmed: `on_idle` only fires when the count returns
/// to zero after at least one `acquire`.
pub struct ConnectionCounter {
    count: AtomicU64,
    armed: AtomicBool,
    on_idle: IdleHook,
}

impl std::fmt::Debug for ConnectionCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCounter")
            .field("count", &self.current())
            .field("armed", &self.armed())
            .finish()
    }
}

impl ConnectionCounter {
    pub fn new(on_idle: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            count: AtomicU64::new(0),
            armed: AtomicBool::new(false),
            on_idle: Box::new(on_idle),
        }
    }

    pub fn acquire(&self) -> u64 {
        let now = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        self.armed.store(true, Ordering::SeqCst);
        now
    }

    /// Drop one session and run the idle hook if it was the last.
    pub fn release(&self) -> u64 {
        let decremented = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if decremented.is_err() {
            tracing::warn!("sftp session released with no session open");
            return 0;
        }

        let now = self.count.load(Ordering::SeqCst);
        if now == 0 && self.armed() {
            tracing::info!("last sftp client exited");
            (self.on_idle)();
        } else {
            tracing::debug!(sessions = now, "sftp client exited session");
        }
        now
    }

    pub fn current(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn counting() -> (ConnectionCounter, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let hook = fired.clone();
        let counter = ConnectionCounter::new(move || {
            hook.fetch_add(1, Ordering::SeqCst);
        });
        (counter, fired)
    }

    #[test]
    fn test_not_armed_at_start() {
        let (counter, fired) = counting();
        assert_eq!(counter.current(), 0);
        assert!(!counter.armed());
        assert_eq!(counter.release(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_single_client_trace() {
        let (counter, fired) = counting();
        let mut trace = vec![counter.current()];
        trace.push(counter.acquire());
        trace.push(counter.release());
        assert_eq!(trace, vec![0, 1, 0]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_idle_only_after_last_session() {
        let (counter, fired) = counting();
        counter.acquire();
        counter.acquire();
        assert_eq!(counter.release(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(counter.release(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_sessions() {
        let (counter, fired) = counting();
        let counter = Arc::new(counter);
        counter.acquire();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        counter.acquire();
                        counter.release();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        counter.release();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
