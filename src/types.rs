// Shared data model for the process table and the command bus.
//
// Everything that lives in the shared region or travels on the message queue is #[repr(C)] with a
// fixed layout, so that short-lived client invocations and the long-lived daemon agree on the
// bytes regardless of which binary attached first.  All of these types are valid when zeroed,
// which is what a freshly created shared segment contains; a record whose pid is 0 is a tombstone
// and is skipped by every consumer.

pub const MAX_PROCESSES: usize = 4096;
pub const MAX_NAME_LEN: usize = 64;
pub const MAX_CMD_LEN: usize = 256;
pub const MAX_RESPONSE_LEN: usize = 256;

// Kernel-global IPC objects are keyed by these values; they survive daemon restarts until a clean
// shutdown removes them.
pub const SHM_KEY: libc::key_t = 0x12345;
pub const SEM_KEY: libc::key_t = 0xABCDE;
pub const MSG_KEY: libc::key_t = 0x54321;

pub const LOG_FILE: &str = "psx_log.txt";
pub const STATS_FILE: &str = "psx_stats.log";

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(i32)]
pub enum ProcState {
    Running = 0,
    Sleeping = 1,
    Stopped = 2,
    Zombie = 3,
    Dead = 4,
}

impl ProcState {
    // Map the state character of /proc/{pid}/stat.  These characters are relevant for modern
    // kernels:
    //  R running
    //  S sleeping in interruptible wait
    //  D sleeping in uninterruptible disk wait
    //  T stopped on a signal
    //  t stopped for tracing
    //  Z zombie
    // Everything else (X dead, and any future additions) folds to Dead.
    pub fn from_stat_char(c: char) -> ProcState {
        match c {
            'R' => ProcState::Running,
            'S' | 'D' => ProcState::Sleeping,
            'T' | 't' => ProcState::Stopped,
            'Z' => ProcState::Zombie,
            _ => ProcState::Dead,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProcState::Running => "Running",
            ProcState::Sleeping => "Sleeping",
            ProcState::Stopped => "Stopped",
            ProcState::Zombie => "Zombie",
            ProcState::Dead => "Dead",
        }
    }
}

// One row of the process table.  Times are in clock ticks as read from the kernel, vsize is in
// bytes, rss is in pages; cpu_percent and mem_percent are derived at sample time and lie in
// [0.0, 100.0].
#[derive(Clone, Copy)]
#[repr(C)]
pub struct ProcessRecord {
    pub pid: i32,
    pub ppid: i32,
    pub name: [u8; MAX_NAME_LEN],
    pub cmdline: [u8; MAX_CMD_LEN],
    pub state: ProcState,
    pub utime: u64,
    pub stime: u64,
    pub vsize: u64,
    pub rss: i64,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub last_update: i64,
    pub is_zombie: i32,
}

impl ProcessRecord {
    pub fn empty() -> ProcessRecord {
        ProcessRecord {
            pid: 0,
            ppid: 0,
            name: [0; MAX_NAME_LEN],
            cmdline: [0; MAX_CMD_LEN],
            state: ProcState::Running,
            utime: 0,
            stime: 0,
            vsize: 0,
            rss: 0,
            cpu_percent: 0.0,
            mem_percent: 0.0,
            last_update: 0,
            is_zombie: 0,
        }
    }

    pub fn name_str(&self) -> String {
        buf_to_string(&self.name)
    }

    pub fn cmdline_str(&self) -> String {
        buf_to_string(&self.cmdline)
    }
}

// The daemon-side commands a client can request over the bus.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(i32)]
pub enum CommandKind {
    Kill = 0,
    Suspend = 1,
    Resume = 2,
    Update = 3,
    Shutdown = 4,
}

impl CommandKind {
    // Decode a wire value.  The bus is writable by anything with access to the queue, so an
    // unknown value is answered with an error, not trusted.
    pub fn from_i32(v: i32) -> Option<CommandKind> {
        match v {
            0 => Some(CommandKind::Kill),
            1 => Some(CommandKind::Suspend),
            2 => Some(CommandKind::Resume),
            3 => Some(CommandKind::Update),
            4 => Some(CommandKind::Shutdown),
            _ => None,
        }
    }
}

// Copy `s` into the fixed buffer `dst`, truncating to dst.len()-1 bytes and NUL-terminating.  The
// tail is cleared so that a shorter string overwriting a longer one leaves no stale bytes.
pub fn put_str(dst: &mut [u8], s: &str) {
    let bytes = s.as_bytes();
    let n = if bytes.len() < dst.len() {
        bytes.len()
    } else {
        dst.len() - 1
    };
    dst[..n].copy_from_slice(&bytes[..n]);
    for b in dst[n..].iter_mut() {
        *b = 0;
    }
}

// The inverse: everything up to the first NUL, lossily decoded.  A truncation by put_str can split
// a multibyte character; the lossy decode turns that into a replacement character rather than an
// error.
pub fn buf_to_string(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

#[test]
pub fn test_state_mapping() {
    assert!(ProcState::from_stat_char('R') == ProcState::Running);
    assert!(ProcState::from_stat_char('S') == ProcState::Sleeping);
    assert!(ProcState::from_stat_char('D') == ProcState::Sleeping);
    assert!(ProcState::from_stat_char('T') == ProcState::Stopped);
    assert!(ProcState::from_stat_char('t') == ProcState::Stopped);
    assert!(ProcState::from_stat_char('Z') == ProcState::Zombie);
    assert!(ProcState::from_stat_char('X') == ProcState::Dead);
    assert!(ProcState::from_stat_char('I') == ProcState::Dead);
    assert!(ProcState::Zombie as i32 == 3);
}

#[test]
pub fn test_fixed_strings() {
    let mut buf = [0u8; 8];
    put_str(&mut buf, "abc");
    assert!(&buf_to_string(&buf) == "abc");
    assert!(buf[3] == 0);

    // Truncation keeps room for the terminator
    put_str(&mut buf, "abcdefghij");
    assert!(&buf_to_string(&buf) == "abcdefg");
    assert!(buf[7] == 0);

    // A shorter overwrite clears the tail
    put_str(&mut buf, "x");
    assert!(&buf_to_string(&buf) == "x");
    assert!(buf[2] == 0);
}

#[test]
pub fn test_command_kind_decode() {
    assert!(CommandKind::from_i32(0) == Some(CommandKind::Kill));
    assert!(CommandKind::from_i32(4) == Some(CommandKind::Shutdown));
    assert!(CommandKind::from_i32(5).is_none());
    assert!(CommandKind::from_i32(-1).is_none());
}
