// MockSystem is used for testing, it is instantiated with the values we want it to return.

use crate::systemapi;

pub struct MockSystem {
    pub ticks_per_sec: u64,
    pub page_size: u64,
    pub now: u64,
}

impl MockSystem {
    pub fn new(now: u64) -> MockSystem {
        MockSystem {
            ticks_per_sec: 100,
            page_size: 4096,
            now,
        }
    }
}

impl systemapi::SystemAPI for MockSystem {
    fn get_clock_ticks_per_sec(&self) -> u64 {
        self.ticks_per_sec
    }

    fn get_page_size_in_bytes(&self) -> u64 {
        self.page_size
    }

    fn get_now_in_secs_since_epoch(&self) -> u64 {
        self.now
    }
}
