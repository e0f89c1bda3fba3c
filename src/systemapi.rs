// This creates an API by which the samplers can access the underlying computing system, allowing
// the system to be virtualized.  In turn, that allows sensible test cases to be written.
//
// The `get_` methods always return the same values for every call except for the clock, which
// moves on its own.

pub trait SystemAPI {
    // Return the value of CLK_TCK, or 0 on error.
    fn get_clock_ticks_per_sec(&self) -> u64;

    // Return the page size in bytes.
    fn get_page_size_in_bytes(&self) -> u64;

    // Return the current time in seconds since the Unix epoch.
    fn get_now_in_secs_since_epoch(&self) -> u64;
}
