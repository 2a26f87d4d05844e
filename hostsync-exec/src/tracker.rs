//! Registry of live child process groups.
//!
//! Every spawned child leads its own process group, so signalling the group
//! reaches anything the command forked. Registration is RAII: dropping the
//! [`Registration`] of a child that never finished SIGKILLs its group.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::time::Instant;

const PROBE_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct ProcessTracker {
    live: Arc<Mutex<HashMap<u32, String>>>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pid: u32, command: &str) -> Registration {
        self.live.lock().insert(pid, command.to_owned());
        Registration {
            tracker: self.clone(),
            pid,
            finished: false,
        }
    }

    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }

    pub fn pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.live.lock().keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// SIGTERM every tracked group, wait up to `kill_after` for them to
    /// exit, SIGKILL the survivors. Returns how many groups were signalled.
    ///
    /// A no-op when nothing is tracked.
    pub async fn terminate_all(&self, kill_after: Duration) -> usize {
        let targets = self.pids();
        if targets.is_empty() {
            return 0;
        }
        for &pid in &targets {
            tracing::debug!(pid, command = ?self.live.lock().get(&pid), "SIGTERM process group");
            signal_group(pid, Signal::SIGTERM);
        }

        let deadline = Instant::now() + kill_after;
        loop {
            let alive: Vec<u32> = targets.iter().copied().filter(|&p| group_alive(p)).collect();
            if alive.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                for pid in alive {
                    tracing::warn!(pid, "process group ignored SIGTERM; sending SIGKILL");
                    signal_group(pid, Signal::SIGKILL);
                }
                break;
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }

        let mut live = self.live.lock();
        for pid in &targets {
            live.remove(pid);
        }
        targets.len()
    }
}

/// Tracking entry for one child. See the module docs for drop semantics.
#[derive(Debug)]
pub struct Registration {
    tracker: ProcessTracker,
    pid: u32,
    finished: bool,
}

impl Registration {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The child has been reaped; dropping no longer signals.
    pub fn finish(&mut self) {
        self.finished = true;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let was_tracked = self.tracker.live.lock().remove(&self.pid).is_some();
        if was_tracked && !self.finished {
            signal_group(self.pid, Signal::SIGKILL);
        }
    }
}

pub(crate) fn signal_group(pid: u32, signal: Signal) {
    if let Ok(raw) = i32::try_from(pid) {
        let _ = killpg(Pid::from_raw(raw), signal);
    }
}

fn group_alive(pid: u32) -> bool {
    match i32::try_from(pid) {
        Ok(raw) => killpg(Pid::from_raw(raw), None).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn terminate_all_on_empty_tracker_is_noop() {
        let tracker = ProcessTracker::new();
        assert_eq!(tracker.terminate_all(Duration::from_millis(10)).await, 0);
    }

    #[test]
    fn finished_registration_leaves_no_entry() {
        let tracker = ProcessTracker::new();
        // Pid far outside any real range so nothing is signalled.
        let mut reg = tracker.register(u32::MAX, "true");
        assert_eq!(tracker.len(), 1);
        reg.finish();
        drop(reg);
        assert!(tracker.is_empty());
    }
}
