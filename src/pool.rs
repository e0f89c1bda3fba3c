// The sampler pool: worker threads that keep the process table populated.
//
// One enumerator thread reads the numeric entries of /proc once per pass and fans the pids out to
// N workers over per-worker channels, sharded by pid so a given process is always sampled by the
// same worker.  Workers sample each pid they receive and upsert the record into the table, with a
// 1ms pause between pids to throttle /proc I/O; pids that vanish between enumeration and read are
// simply skipped.  After a full pass the enumerator idles for 2 seconds and starts over.
//
// Shutdown: the enumerator exits when the token triggers and drops its senders, so the workers
// drain whatever is queued and then see the disconnect; their receive timeout doubles as the
// shutdown poll.

use crate::daemon::Daemon;
use crate::procfsapi::ProcfsAPI;
use crate::sampler;
use crate::sampler::SampleError;
use crate::systemapi::SystemAPI;

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const DEFAULT_WORKERS: usize = 4;

const INTER_PID_PAUSE: Duration = Duration::from_millis(1);
const PASS_DELAY: Duration = Duration::from_secs(2);
const IDLE_POLL: Duration = Duration::from_millis(100);

pub fn start(daemon: &Arc<Daemon>, num_workers: usize) -> Vec<thread::JoinHandle<()>> {
    let num_workers = if num_workers > 0 {
        num_workers
    } else {
        DEFAULT_WORKERS
    };

    let mut handles = vec![];
    let mut senders = vec![];
    for i in 0..num_workers {
        let (tx, rx) = mpsc::channel::<i32>();
        senders.push(tx);
        let d = Arc::clone(daemon);
        handles.push(
            thread::Builder::new()
                .name(format!("sampler-{i}"))
                .spawn(move || worker_loop(&d, rx))
                .expect("spawn sampler worker"),
        );
    }

    let d = Arc::clone(daemon);
    handles.push(
        thread::Builder::new()
            .name("enumerator".to_string())
            .spawn(move || enumerator_loop(&d, senders))
            .expect("spawn enumerator"),
    );

    daemon
        .logger
        .message(&format!("Sampler pool started ({num_workers} workers)"));
    handles
}

fn enumerator_loop(d: &Daemon, senders: Vec<mpsc::Sender<i32>>) {
    let n = senders.len();
    loop {
        match d.fs.read_proc_pids() {
            Ok(pids) => {
                for pid in pids {
                    // A send can only fail if the worker died; there is no recovery for that
                    // beyond letting the remaining workers carry the load.
                    let _ = senders[pid as usize % n].send(pid);
                }
            }
            Err(e) => {
                d.logger.message(&format!("Enumeration failed: {e}"));
            }
        }
        if !d.shutdown.sleep(PASS_DELAY) {
            break;
        }
    }
    // Dropping the senders here disconnects the workers.
}

fn worker_loop(d: &Daemon, receiver: mpsc::Receiver<i32>) {
    loop {
        match receiver.recv_timeout(IDLE_POLL) {
            Ok(pid) => {
                if sample_into_table(d, pid) {
                    thread::sleep(INTER_PID_PAUSE);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if d.shutdown.is_triggered() {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                break;
            }
        }
    }
}

// Sample one pid and write it into the table.  Returns true if a record was written.
fn sample_into_table(d: &Daemon, pid: i32) -> bool {
    match sampler::sample_process(&d.system, &d.fs, pid) {
        Ok(rec) => {
            let now = rec.last_update;
            match d.table.lock() {
                Ok(mut guard) => {
                    guard.upsert(&rec, now);
                }
                Err(e) => {
                    d.logger.message(&format!("Table lock failed: {e}"));
                    return false;
                }
            }
            d.logger.historical(&rec);
            true
        }
        Err(SampleError::NotFound) => {
            // The process went away between enumeration and read; expected.
            false
        }
        Err(SampleError::Format(msg)) => {
            d.logger.message(&format!("Sample of pid {pid} failed: {msg}"));
            false
        }
    }
}

// Full rebuild: clear the table, then append one record per live process up to capacity.  This is
// what the Update command triggers and what the daemon runs once at startup.  The table is empty
// for the duration of the rebuild; consumers that attach mid-rebuild see a consistent (if small)
// table because every mutation happens under the lock.
pub fn collect_all_processes(d: &Daemon) -> Result<(), String> {
    let pids = d.fs.read_proc_pids()?;

    d.table
        .lock()?
        .clear(d.system.get_now_in_secs_since_epoch() as i64);

    for pid in pids {
        match sampler::sample_process(&d.system, &d.fs, pid) {
            Ok(rec) => {
                d.table.lock()?.upsert(&rec, rec.last_update);
                d.logger.historical(&rec);
            }
            Err(SampleError::NotFound) => {}
            Err(SampleError::Format(msg)) => {
                d.logger.message(&format!("Sample of pid {pid} failed: {msg}"));
            }
        }
    }

    d.table
        .lock()?
        .set_last_sync(d.system.get_now_in_secs_since_epoch() as i64);
    Ok(())
}
