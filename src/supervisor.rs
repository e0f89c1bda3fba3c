// The zombie supervisor: a single thread that finds defunct processes in the table and collects
// their exit status.
//
// Every 5 seconds it snapshots the tracked pids under the lock, then checks each pid's current
// kernel state and reaps without holding the lock; remove() re-acquires internally.  Reaping only
// succeeds for children of the daemon itself (waitpid on an unrelated process fails with ECHILD),
// which mirrors what the kernel permits; unrelated zombies stay visible in the table until their
// own parent collects them or a full rescan drops them.
//
// Independently, every wake-up drains any waitable child of the daemon with waitpid(-1, WNOHANG)
// until there is nothing left, collecting zombies from daemon-spawned helpers that never made it
// into the table.

use crate::daemon::Daemon;
use crate::sampler;
use crate::systemapi::SystemAPI;
use crate::types::ProcState;

use std::io;
use std::time::Duration;

const SCAN_INTERVAL_SECS: u64 = 5;

pub fn run(d: &Daemon) {
    let mut last_scan = 0u64;

    d.logger.message("Supervisor started");

    while d.shutdown.sleep(Duration::from_secs(1)) {
        let now = d.system.get_now_in_secs_since_epoch();
        if now.saturating_sub(last_scan) >= SCAN_INTERVAL_SECS {
            last_scan = now;
            scan_for_zombies(d);
        }
        drain_children();
    }

    d.logger.message("Supervisor stopped");
}

fn scan_for_zombies(d: &Daemon) {
    let pids: Vec<i32> = match d.table.lock() {
        Ok(guard) => guard
            .records()
            .iter()
            .filter(|r| r.pid != 0)
            .map(|r| r.pid)
            .collect(),
        Err(e) => {
            d.logger.message(&format!("Table lock failed: {e}"));
            return;
        }
    };

    for pid in pids {
        if is_zombie(d, pid) {
            d.logger.message(&format!("Found zombie process: PID {pid}"));
            reap_zombie(d, pid);
        }
    }
}

// The table's recorded state may be stale; what matters is the state the kernel reports right
// now.  A pid that no longer exists is trivially not a zombie.
fn is_zombie(d: &Daemon, pid: i32) -> bool {
    match sampler::read_stat(&d.fs, pid) {
        Ok(st) => st.state == ProcState::Zombie,
        Err(_) => false,
    }
}

fn reap_zombie(d: &Daemon, pid: i32) {
    let result = unsafe { libc::waitpid(pid, std::ptr::null_mut(), libc::WNOHANG) };
    if result > 0 {
        d.logger.operation("ZOMBIE_REAP", pid, "Success");
        d.logger.message(&format!("Reaped zombie process {pid}"));
        match d.table.lock() {
            Ok(mut guard) => {
                guard.remove(pid, d.system.get_now_in_secs_since_epoch() as i64);
            }
            Err(e) => {
                d.logger.message(&format!("Table lock failed: {e}"));
            }
        }
    } else if result < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ECHILD) {
            d.logger
                .message(&format!("Error reaping process {pid}: {err}"));
        }
    }
    // result == 0: still exists but not waitable yet; try again next scan.
}

fn drain_children() {
    unsafe {
        while libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) > 0 {
            // Reaped a zombie child
        }
    }
}
