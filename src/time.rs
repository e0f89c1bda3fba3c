use std::ffi::CStr;
use std::time::{SystemTime, UNIX_EPOCH};

// Time and date utilities that use libc to avoid pulling in all of Chrono.  These panic on
// errors, there should never be any.

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time precedes epoch")
        .as_secs()
}

// Format a unix time as the log timestamp: yyyy-mm-dd hh:mm:ss, local time.
//
//   localtime_r(&t, timebuf)
//   strftime(strbuf, strbufsize, "%F %T", timebuf)

pub fn format_timestamp(t: i64) -> String {
    let mut timebuf = libc::tm {
        tm_sec: 0,
        tm_min: 0,
        tm_hour: 0,
        tm_mday: 0,
        tm_mon: 0,
        tm_year: 0,
        tm_wday: 0,
        tm_yday: 0,
        tm_isdst: 0,
        tm_gmtoff: 0,
        tm_zone: std::ptr::null(),
    };
    const SIZE: usize = 32; // We need 20 unless something is greatly off
    let mut buffer = vec![0 as libc::c_char; SIZE];
    unsafe {
        let t = t as libc::time_t;

        if libc::localtime_r(&t, &mut timebuf).is_null() {
            panic!("localtime_r");
        }

        // strftime returns 0 if the buffer is too small for the result + NUL.
        if libc::strftime(
            buffer.as_mut_ptr(),
            SIZE,
            CStr::from_bytes_with_nul_unchecked(b"%F %T\0").as_ptr(),
            &timebuf,
        ) == 0
        {
            panic!("strftime");
        }

        CStr::from_ptr(buffer.as_ptr())
            .to_str()
            .expect("Will always be utf8")
            .to_string()
    }
}

pub fn now_string() -> String {
    format_timestamp(unix_now() as i64)
}

#[test]
pub fn test_timestamp_shape() {
    let t = now_string();
    let ts = t.as_str().chars().collect::<Vec<char>>();
    let expect = "dddd-dd-dd dd:dd:dd";
    let mut i = 0;
    for c in expect.chars() {
        match c {
            'd' => {
                assert!(ts[i] >= '0' && ts[i] <= '9');
            }
            _ => {
                assert!(ts[i] == c);
            }
        }
        i += 1;
    }
    assert!(i == ts.len());
}

#[test]
pub fn test_timestamp_monotone() {
    // Two formats of the same instant agree; a later instant compares lexically later (the format
    // is designed so that string order is time order).
    let t = unix_now() as i64;
    assert!(format_timestamp(t) == format_timestamp(t));
    assert!(format_timestamp(t) < format_timestamp(t + 3600));
}
