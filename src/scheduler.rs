// The adaptive refresh scheduler: a single thread that re-samples tracked processes at a cadence
// determined by how busy they are.  Hot processes refresh every second, warm ones every 3, cold
// ones every 5.
//
// Classification uses the CPU% already stored in the table at the time of the check, i.e. the
// previous sample, so a process that crosses a boundary changes cadence one cycle late.  That
// hysteresis is intentional.
//
// Bookkeeping is keyed by pid, not by table index: removals compact the table by moving the tail
// record into the hole, so indices are not stable and a slot-keyed map would silently transfer
// one process's refresh history to another.  A pid first seen by the scheduler enters the map at
// the current time and is re-sampled once its cadence (LOW, until a sample says otherwise)
// elapses; pids that leave the table are pruned.

use crate::daemon::Daemon;
use crate::sampler;
use crate::sampler::SampleError;
use crate::systemapi::SystemAPI;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn for_cpu(cpu_percent: f64) -> Priority {
        if cpu_percent > 50.0 {
            Priority::High
        } else if cpu_percent > 10.0 {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    pub fn interval_secs(self) -> u64 {
        match self {
            Priority::High => 1,
            Priority::Medium => 3,
            Priority::Low => 5,
        }
    }
}

pub fn run(d: &Daemon) {
    let mut last_update = HashMap::<i32, u64>::new();

    d.logger.message("Scheduler started");

    while d.shutdown.sleep(Duration::from_secs(1)) {
        // Snapshot pid -> previous CPU% under the lock, then sample without holding it.
        let snapshot: Vec<(i32, f64)> = match d.table.lock() {
            Ok(guard) => guard
                .records()
                .iter()
                .filter(|r| r.pid != 0)
                .map(|r| (r.pid, r.cpu_percent))
                .collect(),
            Err(e) => {
                d.logger.message(&format!("Table lock failed: {e}"));
                continue;
            }
        };

        let live: HashSet<i32> = snapshot.iter().map(|&(pid, _)| pid).collect();
        last_update.retain(|pid, _| live.contains(pid));

        let now = d.system.get_now_in_secs_since_epoch();
        for (pid, cpu_percent) in snapshot {
            let due = match last_update.get(&pid) {
                Some(&t) => {
                    now.saturating_sub(t) >= Priority::for_cpu(cpu_percent).interval_secs()
                }
                None => {
                    last_update.insert(pid, now);
                    false
                }
            };
            if !due {
                continue;
            }

            match sampler::sample_process(&d.system, &d.fs, pid) {
                Ok(rec) => {
                    match d.table.lock() {
                        Ok(mut guard) => {
                            guard.upsert(&rec, rec.last_update);
                        }
                        Err(e) => {
                            d.logger.message(&format!("Table lock failed: {e}"));
                            continue;
                        }
                    }
                    d.logger.resource(&rec);
                    last_update.insert(pid, now);
                }
                Err(SampleError::NotFound) => {
                    // Gone; the supervisor or the next full pass will drop the record.
                    last_update.remove(&pid);
                }
                Err(SampleError::Format(msg)) => {
                    d.logger.message(&format!("Sample of pid {pid} failed: {msg}"));
                }
            }
        }
    }

    d.logger.message("Scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_priority_classes() {
        assert!(Priority::for_cpu(80.0) == Priority::High);
        assert!(Priority::for_cpu(50.1) == Priority::High);
        // Exactly 50 is Medium, exactly 10 is Low: the boundaries belong to the slower class
        assert!(Priority::for_cpu(50.0) == Priority::Medium);
        assert!(Priority::for_cpu(10.1) == Priority::Medium);
        assert!(Priority::for_cpu(10.0) == Priority::Low);
        assert!(Priority::for_cpu(0.0) == Priority::Low);
    }

    #[test]
    pub fn test_priority_intervals() {
        assert!(Priority::High.interval_secs() == 1);
        assert!(Priority::Medium.interval_secs() == 3);
        assert!(Priority::Low.interval_secs() == 5);
        // A never-sampled record reports 0% CPU and therefore starts on the slow cadence
        assert!(Priority::for_cpu(0.0).interval_secs() == 5);
    }
}
