// Collect per-process information from files in /proc and derive CPU and memory utilization.
//
// Every per-process read can fail because the process vanished between the time its pid was
// enumerated and the time we got around to reading it.  That is expected and not an error; it is
// reported as SampleError::NotFound and callers skip the pid.  A file that is present but does
// not parse is a Format error and worth logging.

use crate::procfsapi::{parse_u64_field, ProcfsAPI};
use crate::systemapi::SystemAPI;
use crate::types::{put_str, ProcState, ProcessRecord};

#[derive(Debug, Clone, PartialEq)]
pub enum SampleError {
    NotFound,
    Format(String),
}

// The raw counters of one /proc/{pid}/stat read.  Times are in clock ticks, vsize in bytes, rss
// in pages, starttime in ticks since boot.
#[derive(Debug, PartialEq)]
pub struct StatSample {
    pub ppid: i32,
    pub state: ProcState,
    pub utime: u64,
    pub stime: u64,
    pub vsize: u64,
    pub rss: i64,
    pub starttime: u64,
}

pub fn read_stat(fs: &dyn ProcfsAPI, pid: i32) -> Result<StatSample, SampleError> {
    let line = fs
        .read_to_string(&format!("{pid}/stat"))
        .map_err(|_| SampleError::NotFound)?;

    // The comm field must be extracted first as the contents between the first '(' and the last
    // ')' in the line; it can contain both spaces and parentheses.  All field offsets below are
    // relative to the ')' and zero-based, so ppid is 1, not 4.
    let commend = match line.rfind(')') {
        Some(ix) => ix,
        None => {
            return Err(SampleError::Format(format!(
                "Could not parse /proc/{pid}/stat: {line}"
            )))
        }
    };
    let rest = line[commend + 1..].trim().to_string();
    let fields = rest.split_ascii_whitespace().collect::<Vec<&str>>();
    if fields.is_empty() {
        return Err(SampleError::Format(format!(
            "Line from /proc/{pid}/stat too short: {line}"
        )));
    }

    let state = ProcState::from_stat_char(fields[0].chars().next().unwrap_or('X'));

    let parse = |ix, name| parse_u64_field(&fields, ix, &line, "stat", pid, name);
    let ppid = parse(1, "ppid").map_err(SampleError::Format)? as i32;
    let utime = parse(11, "utime").map_err(SampleError::Format)?;
    let stime = parse(12, "stime").map_err(SampleError::Format)?;
    let starttime = parse(19, "starttime").map_err(SampleError::Format)?;
    let vsize = parse(20, "vsize").map_err(SampleError::Format)?;
    let rss = parse(21, "rss").map_err(SampleError::Format)? as i64;

    Ok(StatSample {
        ppid,
        state,
        utime,
        stime,
        vsize,
        rss,
        starttime,
    })
}

// The short image name from the Name: line of /proc/{pid}/status.  A status file without a Name
// line yields the empty string, it is not worth failing over.
pub fn read_name(fs: &dyn ProcfsAPI, pid: i32) -> Result<String, SampleError> {
    let status = fs
        .read_to_string(&format!("{pid}/status"))
        .map_err(|_| SampleError::NotFound)?;
    for l in status.split('\n') {
        if let Some(rest) = l.strip_prefix("Name:") {
            return Ok(rest.trim().to_string());
        }
    }
    Ok("".to_string())
}

// The full command line with the kernel's NUL delimiters replaced by spaces.  Kernel threads have
// an empty cmdline file; that is returned as the empty string.
pub fn read_cmdline(fs: &dyn ProcfsAPI, pid: i32) -> Result<String, SampleError> {
    let raw = fs
        .read_to_string(&format!("{pid}/cmdline"))
        .map_err(|_| SampleError::NotFound)?;
    Ok(raw.replace('\0', " ").trim_end().to_string())
}

// System-wide CPU counters from the first line of /proc/stat: the sum of the user, nice, system,
// idle, iowait, irq and softirq tick counts, and the idle ticks by themselves.
pub fn read_system_cpu(fs: &dyn ProcfsAPI) -> Result<(u64, u64), String> {
    let stat_s = fs.read_to_string("stat")?;
    for l in stat_s.split('\n') {
        if l.starts_with("cpu ") {
            let fields = l.split_ascii_whitespace().collect::<Vec<&str>>();
            let mut total = 0;
            for ix in 1..=7 {
                total += parse_u64_field(&fields, ix, l, "stat", 0, "cpu")?;
            }
            let idle = parse_u64_field(&fields, 4, l, "stat", 0, "idle")?;
            return Ok((total, idle));
        }
    }
    Err(format!("Could not find cpu line in /proc/stat: {stat_s}"))
}

pub fn read_uptime(fs: &dyn ProcfsAPI) -> Result<f64, String> {
    let s = fs.read_to_string("uptime")?;
    let fields = s.split_ascii_whitespace().collect::<Vec<&str>>();
    if fields.is_empty() {
        return Err(format!("Bad /proc/uptime: {s}"));
    }
    fields[0]
        .parse::<f64>()
        .map_err(|_| format!("Bad /proc/uptime: {s}"))
}

// The total RAM installed is in the MemTotal field of /proc/meminfo.
pub fn read_memtotal_kib(fs: &dyn ProcfsAPI) -> Result<u64, String> {
    let meminfo_s = fs.read_to_string("meminfo")?;
    for l in meminfo_s.split('\n') {
        if l.starts_with("MemTotal:") {
            // We expect "MemTotal:\s+(\d+)\s+kB", roughly
            let fields = l.split_ascii_whitespace().collect::<Vec<&str>>();
            if fields.len() != 3 || fields[2] != "kB" {
                return Err(format!("Unexpected MemTotal in /proc/meminfo: {l}"));
            }
            return parse_u64_field(&fields, 1, l, "meminfo", 0, "MemTotal");
        }
    }
    Err(format!(
        "Could not find MemTotal in /proc/meminfo: {meminfo_s}"
    ))
}

// CPU utilization averaged over the process lifetime: cumulative cpu seconds divided by elapsed
// wall-clock seconds since the process started.  The elapsed time is clamped to >= 1.0 so the
// division cannot produce NaN or Infinity for freshly started processes, and the result is
// clamped to 100 because starttime and uptime are sampled at slightly different times.
pub fn cpu_percent_for(
    system: &dyn SystemAPI,
    uptime: f64,
    utime: u64,
    stime: u64,
    starttime: u64,
) -> f64 {
    let clk = system.get_clock_ticks_per_sec();
    if clk == 0 {
        return 0.0;
    }
    let mut elapsed = uptime - starttime as f64 / clk as f64;
    if elapsed < 1.0 {
        elapsed = 1.0;
    }
    let pct = ((utime + stime) as f64 / clk as f64) / elapsed * 100.0;
    pct.clamp(0.0, 100.0)
}

// Resident set as a share of installed RAM.  Falls back to 0 when either quantity is unavailable.
pub fn mem_percent_for(system: &dyn SystemAPI, rss_pages: i64, memtotal_kib: u64) -> f64 {
    if rss_pages <= 0 || memtotal_kib == 0 {
        return 0.0;
    }
    let rss_bytes = rss_pages as f64 * system.get_page_size_in_bytes() as f64;
    let total_bytes = memtotal_kib as f64 * 1024.0;
    (rss_bytes / total_bytes * 100.0).clamp(0.0, 100.0)
}

// One full sample of one process: counters, names, and the derived percentages.  Only the stat
// read is load-bearing; a vanishing name or cmdline mid-sample degrades to the empty string, and
// derivation inputs that cannot be read degrade the percentage to 0.
pub fn sample_process(
    system: &dyn SystemAPI,
    fs: &dyn ProcfsAPI,
    pid: i32,
) -> Result<ProcessRecord, SampleError> {
    let st = read_stat(fs, pid)?;
    let name = read_name(fs, pid).unwrap_or_default();
    let cmdline = read_cmdline(fs, pid).unwrap_or_default();

    let cpu_percent = match read_uptime(fs) {
        Ok(up) => cpu_percent_for(system, up, st.utime, st.stime, st.starttime),
        Err(_) => 0.0,
    };
    let mem_percent = match read_memtotal_kib(fs) {
        Ok(kib) => mem_percent_for(system, st.rss, kib),
        Err(_) => 0.0,
    };

    let mut rec = ProcessRecord::empty();
    rec.pid = pid;
    rec.ppid = st.ppid;
    put_str(&mut rec.name, &name);
    put_str(&mut rec.cmdline, &cmdline);
    rec.state = st.state;
    rec.is_zombie = (st.state == ProcState::Zombie) as i32;
    rec.utime = st.utime;
    rec.stime = st.stime;
    rec.vsize = st.vsize;
    rec.rss = st.rss;
    rec.cpu_percent = cpu_percent;
    rec.mem_percent = mem_percent;
    rec.last_update = system.get_now_in_secs_since_epoch() as i64;
    Ok(rec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mockfs::MockFS;
    use crate::mocksystem::MockSystem;

    use std::collections::HashMap;

    // A plausible stat line: pid 4018, comm with a space, sleeping, ppid 2190, utime 5000,
    // stime 1000, starttime 360000 ticks (3600 s at 100 Hz), vsize 5144358912, rss 184775.
    const STAT_4018: &str = "4018 (Web Content) S 2190 2189 2189 0 -1 4194560 19293 3117 18 5 \
                             5000 1000 53 29 20 0 187 0 360000 5144358912 184775 \
                             18446744073709551615 0 0 0 0 0 0 0 4096 17663 0 0 0 17 4 0 0 0 0 0";

    fn fixture() -> MockFS {
        let mut files = HashMap::new();
        files.insert("4018/stat".to_string(), STAT_4018.to_string());
        files.insert(
            "4018/status".to_string(),
            "Name:\tfirefox\nUmask:\t0022\nState:\tS (sleeping)\n".to_string(),
        );
        files.insert(
            "4018/cmdline".to_string(),
            "/usr/lib/firefox\0-contentproc\0-childID\0".to_string(),
        );
        files.insert("uptime".to_string(), "7200.00 14000.00".to_string());
        files.insert(
            "meminfo".to_string(),
            "MemTotal:       16093776 kB\nMemFree:         1651708 kB\n".to_string(),
        );
        files.insert(
            "stat".to_string(),
            "cpu  400 20 300 5000 100 30 50 0 0 0\ncpu0 200 10 150 2500 50 15 25 0 0 0\nbtime 1698303295\n"
                .to_string(),
        );
        MockFS::new(files, vec![4018])
    }

    #[test]
    pub fn test_read_stat() {
        let fs = fixture();
        let st = read_stat(&fs, 4018).unwrap();
        assert!(st.ppid == 2190);
        assert!(st.state == ProcState::Sleeping);
        assert!(st.utime == 5000);
        assert!(st.stime == 1000);
        assert!(st.starttime == 360000);
        assert!(st.vsize == 5144358912);
        assert!(st.rss == 184775);
    }

    #[test]
    pub fn test_read_stat_gone() {
        let fs = fixture();
        assert!(read_stat(&fs, 9999) == Err(SampleError::NotFound));
    }

    #[test]
    pub fn test_read_stat_zombie() {
        // Zombies have empty-ish fields with -1 values here and there; the parser folds those to
        // zero rather than failing.
        let line = "77 (gone) Z 1 0 0 0 -1 4227276 0 0 0 0 0 0 0 0 20 0 1 0 123 0 -1 \
                    18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 1 0 0 0 0 0";
        let mut files = HashMap::new();
        files.insert("77/stat".to_string(), line.to_string());
        let fs = MockFS::new(files, vec![77]);
        let st = read_stat(&fs, 77).unwrap();
        assert!(st.state == ProcState::Zombie);
        assert!(st.rss == 0);
    }

    #[test]
    pub fn test_read_name_and_cmdline() {
        let fs = fixture();
        assert!(read_name(&fs, 4018).unwrap() == "firefox");
        // NUL delimiters become spaces, the trailing delimiter is dropped
        assert!(read_cmdline(&fs, 4018).unwrap() == "/usr/lib/firefox -contentproc -childID");
        assert!(read_name(&fs, 9999) == Err(SampleError::NotFound));
    }

    #[test]
    pub fn test_read_system_cpu() {
        let fs = fixture();
        let (total, idle) = read_system_cpu(&fs).unwrap();
        // user+nice+system+idle+iowait+irq+softirq of the cpu line
        assert!(total == 400 + 20 + 300 + 5000 + 100 + 30 + 50);
        assert!(idle == 5000);
    }

    #[test]
    pub fn test_read_memtotal() {
        let fs = fixture();
        assert!(read_memtotal_kib(&fs).unwrap() == 16093776);
    }

    #[test]
    pub fn test_cpu_percent() {
        let system = MockSystem::new(1000);
        // 6000 ticks = 60 cpu seconds over 7200 - 3600 = 3600 elapsed seconds
        let pct = cpu_percent_for(&system, 7200.0, 5000, 1000, 360000);
        assert!((pct - 60.0 / 3600.0 * 100.0).abs() < 1e-9);

        // Elapsed clamps to 1.0 when the process started "now" (or in the future, under clock
        // skew), and the result clamps to 100.
        let pct = cpu_percent_for(&system, 3600.0, 100000, 100000, 360000);
        assert!(pct == 100.0);

        // Zero CLK_TCK means no answer, not a crash
        let mut broken = MockSystem::new(1000);
        broken.ticks_per_sec = 0;
        assert!(cpu_percent_for(&broken, 7200.0, 5000, 1000, 0) == 0.0);
    }

    #[test]
    pub fn test_mem_percent() {
        let system = MockSystem::new(1000);
        // 1024 pages * 4096 B = 4 MiB of 16 GiB
        let pct = mem_percent_for(&system, 1024, 16 * 1024 * 1024);
        assert!((pct - 4.0 * 1024.0 * 100.0 / (16.0 * 1024.0 * 1024.0)).abs() < 1e-9);
        assert!(mem_percent_for(&system, 0, 16 * 1024 * 1024) == 0.0);
        assert!(mem_percent_for(&system, 1024, 0) == 0.0);
        // An rss larger than RAM (bogus but kernel-possible) clamps
        assert!(mem_percent_for(&system, i64::MAX / 4096, 1024) == 100.0);
    }

    #[test]
    pub fn test_sample_process() {
        let fs = fixture();
        let system = MockSystem::new(1700000000);
        let rec = sample_process(&system, &fs, 4018).unwrap();
        assert!(rec.pid == 4018);
        assert!(rec.ppid == 2190);
        assert!(rec.name_str() == "firefox");
        assert!(rec.cmdline_str() == "/usr/lib/firefox -contentproc -childID");
        assert!(rec.state == ProcState::Sleeping);
        assert!(rec.is_zombie == 0);
        assert!(rec.utime == 5000 && rec.stime == 1000);
        assert!(rec.cpu_percent > 0.0 && rec.cpu_percent <= 100.0);
        assert!(rec.mem_percent > 0.0 && rec.mem_percent <= 100.0);
        assert!(rec.last_update == 1700000000);
    }

    #[test]
    pub fn test_sample_determinism() {
        // Nothing executed between two reads of the same fixture, so the raw counters agree.
        let fs = fixture();
        let a = read_stat(&fs, 4018).unwrap();
        let b = read_stat(&fs, 4018).unwrap();
        assert!(a.utime == b.utime);
        assert!(a.stime == b.stime);
        assert!(a.vsize == b.vsize);
        assert!(a.starttime == b.starttime);
    }

    #[test]
    pub fn test_sample_degrades_without_uptime() {
        // Remove uptime and meminfo: the sample still succeeds with zero percentages.
        let mut files = HashMap::new();
        files.insert("4018/stat".to_string(), STAT_4018.to_string());
        let fs = MockFS::new(files, vec![4018]);
        let system = MockSystem::new(1700000000);
        let rec = sample_process(&system, &fs, 4018).unwrap();
        assert!(rec.cpu_percent == 0.0);
        assert!(rec.mem_percent == 0.0);
        assert!(rec.name_str() == "");
    }
}
