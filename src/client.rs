// Client-side operations.  Each invocation is a short-lived process: attach to the kernel-global
// objects the daemon created, perform one operation, detach, exit.
//
// list/show/stats read the shared table directly under the lock; nothing is asked of the daemon.
// kill/suspend/resume/update go over the command bus: send the request with our pid as the reply
// type, then block until the daemon answers on that type.

use crate::msgbus::MessageBus;
use crate::realprocfs::RealProcFS;
use crate::sampler;
use crate::table::SharedTable;
use crate::time;
use crate::types::{CommandKind, ProcState, ProcessRecord};

use std::io;
use std::io::Write;

// One row of `list` output.  vsize arrives in bytes and rss in pages; both are shown in KB.
fn format_process_line(rec: &ProcessRecord, page_size_kib: u64) -> String {
    format!(
        "{:<8} {:<8} {:<20} {:<12} {:>9.2}% {:>9.2}% {:>12} {:>10}",
        rec.pid,
        rec.ppid,
        rec.name_str(),
        rec.state.name(),
        rec.cpu_percent,
        rec.mem_percent,
        rec.vsize / 1024,
        rec.rss.max(0) as u64 * page_size_kib
    )
}

pub fn list_processes(w: &mut dyn io::Write, show_all: bool) -> Result<(), String> {
    let table = SharedTable::attach()?;
    let page_size_kib = (page_size::get() / 1024) as u64;

    let guard = table.lock()?;
    let mut lines = vec![];
    for rec in guard.records() {
        if rec.pid == 0 {
            continue;
        }
        if !show_all && rec.state == ProcState::Zombie {
            continue;
        }
        lines.push(format_process_line(rec, page_size_kib));
    }
    let count = guard.count();
    drop(guard);

    let _ = writeln!(
        w,
        "\n{:<8} {:<8} {:<20} {:<12} {:>10} {:>10} {:>12} {:>10}",
        "PID", "PPID", "NAME", "STATE", "CPU%", "MEM%", "VSIZE(KB)", "RSS(KB)"
    );
    let _ = writeln!(w, "{}", "-".repeat(91));
    for line in lines {
        let _ = writeln!(w, "{line}");
    }
    let _ = writeln!(w, "\nTotal processes: {count}");
    Ok(())
}

pub fn show_process(w: &mut dyn io::Write, pid: i32) -> Result<(), String> {
    let table = SharedTable::attach()?;
    let rec = table.lock()?.get(pid);

    let rec = match rec {
        Some(rec) => rec,
        None => {
            let _ = writeln!(w, "Process {pid} not found");
            return Ok(());
        }
    };

    let page_size_kib = (page_size::get() / 1024) as u64;
    let _ = writeln!(w, "\nProcess Details:");
    let _ = writeln!(w, "  PID: {}", rec.pid);
    let _ = writeln!(w, "  PPID: {}", rec.ppid);
    let _ = writeln!(w, "  Name: {}", rec.name_str());
    let _ = writeln!(w, "  Command: {}", rec.cmdline_str());
    let _ = writeln!(w, "  State: {}", rec.state.name());
    let _ = writeln!(w, "  CPU Usage: {:.2}%", rec.cpu_percent);
    let _ = writeln!(w, "  Memory Usage: {:.2}%", rec.mem_percent);
    let _ = writeln!(w, "  Virtual Size: {} KB", rec.vsize / 1024);
    let _ = writeln!(
        w,
        "  Resident Set Size: {} KB",
        rec.rss.max(0) as u64 * page_size_kib
    );
    let _ = writeln!(w, "  User Time: {}", rec.utime);
    let _ = writeln!(w, "  System Time: {}", rec.stime);
    let _ = writeln!(w, "  Last Update: {}", time::format_timestamp(rec.last_update));
    Ok(())
}

pub fn show_stats(w: &mut dyn io::Write) -> Result<(), String> {
    let table = SharedTable::attach()?;
    let (count, last_sync) = {
        let guard = table.lock()?;
        (guard.count(), guard.last_sync())
    };

    let _ = writeln!(w, "\nSystem Statistics:");
    let _ = writeln!(w, "  Total Processes: {count}");
    let _ = writeln!(w, "  Last Sync: {}", time::format_timestamp(last_sync));

    // System-wide CPU busy share since boot, from the same counters the samplers use.
    let fs = RealProcFS::new();
    if let Ok((total, idle)) = sampler::read_system_cpu(&fs) {
        if total > 0 {
            let busy = (total - idle.min(total)) as f64 / total as f64 * 100.0;
            let _ = writeln!(w, "  CPU Busy (since boot): {busy:.2}%");
        }
    }
    Ok(())
}

// A bus round-trip.  The acknowledgment is printed as soon as the request is queued, the daemon's
// response line when it arrives.
pub fn send_command(
    w: &mut dyn io::Write,
    kind: CommandKind,
    target_pid: i32,
    signal: i32,
) -> Result<(), String> {
    let bus = MessageBus::open()?;
    let reply_to = std::process::id() as libc::c_long;

    bus.send_request(kind, target_pid, signal, reply_to)?;
    match kind {
        CommandKind::Kill => {
            let _ = writeln!(w, "Kill command sent to process {target_pid}");
        }
        CommandKind::Suspend => {
            let _ = writeln!(w, "Suspend command sent to process {target_pid}");
        }
        CommandKind::Resume => {
            let _ = writeln!(w, "Resume command sent to process {target_pid}");
        }
        CommandKind::Update => {
            let _ = writeln!(w, "Update command sent");
        }
        CommandKind::Shutdown => {
            let _ = writeln!(w, "Shutdown command sent");
        }
    }

    let response = bus.recv_response(reply_to)?;
    let _ = writeln!(w, "{response}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::put_str;

    #[test]
    pub fn test_format_process_line() {
        let mut rec = ProcessRecord::empty();
        rec.pid = 4018;
        rec.ppid = 2190;
        put_str(&mut rec.name, "firefox");
        rec.state = ProcState::Sleeping;
        rec.cpu_percent = 1.667;
        rec.mem_percent = 4.5;
        rec.vsize = 5144358912;
        rec.rss = 184775;

        let line = format_process_line(&rec, 4);
        assert!(line.starts_with("4018"));
        assert!(line.contains("firefox"));
        assert!(line.contains("Sleeping"));
        assert!(line.contains("1.67%"));
        assert!(line.contains("4.50%"));
        // 5144358912 / 1024 and 184775 pages * 4 KiB
        assert!(line.contains("5023788"));
        assert!(line.contains("739100"));
    }

    #[test]
    pub fn test_format_negative_rss() {
        // Zombies can report rss as -1; shown as 0 rather than wrapping
        let mut rec = ProcessRecord::empty();
        rec.pid = 1;
        rec.rss = -1;
        let line = format_process_line(&rec, 4);
        assert!(line.trim_end().ends_with('0'));
    }
}
