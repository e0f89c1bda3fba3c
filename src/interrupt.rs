use std::sync::atomic::{AtomicBool, Ordering};

// Signal handling logic.
//
// The interesting interrupt signals are SIGHUP, SIGTERM, and SIGINT.  SIGHUP and SIGTERM are sent
// by the OS or by job control (and will often be followed by SIGKILL if not honored within some
// reasonable time); INT is sent by a user in response to keyboard action and more typical during
// development.  All three mean the same thing to the daemon: finish the current poll, then shut
// down as if a Shutdown command had arrived.
//
// Call handle_interruptions() to establish handlers, then is_interrupted() to check whether
// signals have been received.  The flag is the one piece of process-global mutable state in the
// program; a signal handler cannot capture a context value.

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn psx_signal_handler(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::Relaxed);
}

pub fn handle_interruptions() {
    unsafe {
        let nomask: libc::sigset_t = std::mem::zeroed();
        let action = libc::sigaction {
            sa_sigaction: psx_signal_handler as usize,
            sa_mask: nomask,
            sa_flags: 0,
            sa_restorer: None,
        };
        libc::sigaction(libc::SIGTERM, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGHUP, &action, std::ptr::null_mut());
    }
}

pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}
