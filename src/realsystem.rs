extern crate page_size;

use crate::systemapi;
use crate::time;

// RealSystem is used to actually access system tables and the system clock.

pub struct RealSystem {}

impl RealSystem {
    pub fn new() -> RealSystem {
        RealSystem {}
    }
}

impl systemapi::SystemAPI for RealSystem {
    fn get_clock_ticks_per_sec(&self) -> u64 {
        // On x86 and x64 this is always 100 but in principle it might be something else, so read
        // the true value.
        unsafe { libc::sysconf(libc::_SC_CLK_TCK) as u64 }
    }

    fn get_page_size_in_bytes(&self) -> u64 {
        page_size::get() as u64
    }

    fn get_now_in_secs_since_epoch(&self) -> u64 {
        time::unix_now()
    }
}
