// Append-only log sinks: psx_log.txt for general and audit messages, psx_stats.log for sampled
// statistics.  Fire-and-forget: a sink that could not be opened, or a write that fails, must
// never take the daemon down, so failures degrade to no-ops after a single stderr notice at open
// time.
//
// Line formats are part of the observable surface:
//   general:    [yyyy-mm-dd hh:mm:ss] <text>
//   audit:      [yyyy-mm-dd hh:mm:ss] Operation: <OP>, PID: <pid>, Result: <text>
//   historical: [yyyy-mm-dd hh:mm:ss] PID=<pid>, NAME=<name>, CPU=<f>%, MEM=<f>%, STATE=<0..4>
//   resource:   PID: <pid>, CPU: <f>%, MEM: <f>%, VSIZE: <u>, RSS: <i>

use crate::time;
use crate::types::ProcessRecord;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

pub struct Logger {
    log: Option<Mutex<File>>,
    stats: Option<Mutex<File>>,
    // The daemon echoes general messages to stdout; clients do not.
    echo: bool,
}

fn open_append(path: &str) -> Option<Mutex<File>> {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(f) => Some(Mutex::new(f)),
        Err(e) => {
            eprintln!("Error: Failed to open {path}: {e}");
            None
        }
    }
}

fn append(sink: &Option<Mutex<File>>, line: &str) {
    if let Some(m) = sink {
        if let Ok(mut f) = m.lock() {
            let _ = f.write_all(line.as_bytes());
            let _ = f.flush();
        }
    }
}

impl Logger {
    pub fn open(log_path: &str, stats_path: &str, echo: bool) -> Logger {
        Logger {
            log: open_append(log_path),
            stats: open_append(stats_path),
            echo,
        }
    }

    pub fn message(&self, text: &str) {
        let line = format!("[{}] {}\n", time::now_string(), text);
        append(&self.log, &line);
        if self.echo {
            print!("{line}");
        }
    }

    // One audit entry per command outcome, ordered by the real time of the write.
    pub fn operation(&self, operation: &str, pid: i32, result: &str) {
        let line = format!(
            "[{}] Operation: {}, PID: {}, Result: {}\n",
            time::now_string(),
            operation,
            pid,
            result
        );
        append(&self.log, &line);
    }

    // Full-pass and pool samples append the timestamped historical format.
    pub fn historical(&self, rec: &ProcessRecord) {
        let line = format!(
            "[{}] PID={}, NAME={}, CPU={:.2}%, MEM={:.2}%, STATE={}\n",
            time::now_string(),
            rec.pid,
            rec.name_str(),
            rec.cpu_percent,
            rec.mem_percent,
            rec.state as i32
        );
        append(&self.stats, &line);
    }

    // Scheduler re-samples append the untimestamped resource format.
    pub fn resource(&self, rec: &ProcessRecord) {
        let line = format!(
            "PID: {}, CPU: {:.2}%, MEM: {:.2}%, VSIZE: {}, RSS: {}\n",
            rec.pid, rec.cpu_percent, rec.mem_percent, rec.vsize, rec.rss
        );
        append(&self.stats, &line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::put_str;

    use std::fs;

    fn sample_rec() -> ProcessRecord {
        let mut r = ProcessRecord::empty();
        r.pid = 1234;
        put_str(&mut r.name, "sleeper");
        r.state = crate::types::ProcState::Sleeping;
        r.cpu_percent = 12.5;
        r.mem_percent = 3.25;
        r.vsize = 1048576;
        r.rss = 256;
        r
    }

    #[test]
    pub fn test_log_formats() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log.txt");
        let stats_path = dir.path().join("stats.log");
        let logger = Logger::open(
            log_path.to_str().unwrap(),
            stats_path.to_str().unwrap(),
            false,
        );

        logger.message("PSX daemon started");
        logger.operation("KILL", 1234, "Success: Sent signal 15 to process 1234");
        logger.historical(&sample_rec());
        logger.resource(&sample_rec());

        let log = fs::read_to_string(&log_path).unwrap();
        let lines = log.lines().collect::<Vec<&str>>();
        assert!(lines.len() == 2);
        // "[yyyy-mm-dd hh:mm:ss]" is 21 characters
        assert!(lines[0].starts_with('['));
        assert!(&lines[0][21..] == " PSX daemon started");
        assert!(lines[1].ends_with(
            "Operation: KILL, PID: 1234, Result: Success: Sent signal 15 to process 1234"
        ));

        let stats = fs::read_to_string(&stats_path).unwrap();
        let lines = stats.lines().collect::<Vec<&str>>();
        assert!(lines.len() == 2);
        assert!(lines[0].ends_with("PID=1234, NAME=sleeper, CPU=12.50%, MEM=3.25%, STATE=1"));
        assert!(lines[1] == "PID: 1234, CPU: 12.50%, MEM: 3.25%, VSIZE: 1048576, RSS: 256");
    }

    #[test]
    pub fn test_unopenable_sink_is_silent() {
        let logger = Logger::open("/nonexistent-dir/x.txt", "/nonexistent-dir/y.log", false);
        // Must not panic, must not create anything
        logger.message("into the void");
        logger.resource(&sample_rec());
    }

    #[test]
    pub fn test_append_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log.txt");
        let p = log_path.to_str().unwrap();
        {
            let logger = Logger::open(p, p, false);
            logger.message("one");
        }
        {
            let logger = Logger::open(p, p, false);
            logger.message("two");
        }
        let log = fs::read_to_string(&log_path).unwrap();
        assert!(log.lines().count() == 2);
    }
}
