// The command bus: a typed request/response channel between client invocations and the daemon,
// carried on a System V message queue.
//
// Wire layout per message, fixed so any two builds of the binary agree:
//   mtype (long), kind (int), target_pid (int), signal (int), response (256 bytes).
//
// Requests travel with mtype 1; the daemon is the single receiver on that type and polls
// non-blockingly.  Responses travel with an mtype the client has chosen, distinct from 1, and the
// client blocks on exactly that type so concurrent clients cannot steal each other's replies.
// The client's choice (in practice its own pid) rides in the otherwise-unused response field of
// the request, as a decimal string.

use crate::types::{buf_to_string, put_str, CommandKind, MAX_RESPONSE_LEN, MSG_KEY};

use std::io;
use std::mem;

pub const REQUEST_MTYPE: libc::c_long = 1;

// Fallback reply type for requests that do not name one; never 1.
const DEFAULT_REPLY_MTYPE: libc::c_long = 2;

#[repr(C)]
struct WireMsg {
    mtype: libc::c_long,
    kind: i32,
    target_pid: i32,
    signal: i32,
    response: [u8; MAX_RESPONSE_LEN],
}

// msgsnd/msgrcv sizes exclude the mtype field.
const WIRE_BODY_LEN: usize = mem::size_of::<WireMsg>() - mem::size_of::<libc::c_long>();

impl WireMsg {
    fn zeroed() -> WireMsg {
        WireMsg {
            mtype: 0,
            kind: 0,
            target_pid: 0,
            signal: 0,
            response: [0; MAX_RESPONSE_LEN],
        }
    }
}

// A decoded request.  `kind` stays a raw i32 here because the queue is only as trustworthy as its
// permissions; the dispatcher validates it with CommandKind::from_i32 and answers garbage with an
// error response rather than dropping it on the floor.
pub struct CommandRequest {
    pub kind: i32,
    pub target_pid: i32,
    pub signal: i32,
    pub reply_to: libc::c_long,
}

pub struct MessageBus {
    msq_id: i32,
}

impl MessageBus {
    // Attach-or-create; like the table, the queue is a kernel-global object that outlives any
    // single invocation.
    pub fn open() -> Result<MessageBus, String> {
        let msq_id = unsafe { libc::msgget(MSG_KEY, libc::IPC_CREAT | 0o666) };
        if msq_id == -1 {
            return Err(format!("msgget: {}", io::Error::last_os_error()));
        }
        Ok(MessageBus { msq_id })
    }

    fn send(&self, msg: &WireMsg) -> Result<(), String> {
        loop {
            let rc = unsafe {
                libc::msgsnd(
                    self.msq_id,
                    msg as *const WireMsg as *const libc::c_void,
                    WIRE_BODY_LEN,
                    0,
                )
            };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(format!("msgsnd: {err}"));
        }
    }

    fn recv(&self, mtype: libc::c_long, flags: i32) -> Result<Option<WireMsg>, String> {
        let mut msg = WireMsg::zeroed();
        loop {
            let rc = unsafe {
                libc::msgrcv(
                    self.msq_id,
                    &mut msg as *mut WireMsg as *mut libc::c_void,
                    WIRE_BODY_LEN,
                    mtype,
                    flags,
                )
            };
            if rc >= 0 {
                return Ok(Some(msg));
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::ENOMSG) => return Ok(None),
                Some(libc::EINTR) => continue,
                _ => return Err(format!("msgrcv: {err}")),
            }
        }
    }

    // Client side: enqueue a command for the daemon.  `reply_to` is the mtype this client will
    // listen on for the response.
    pub fn send_request(
        &self,
        kind: CommandKind,
        target_pid: i32,
        signal: i32,
        reply_to: libc::c_long,
    ) -> Result<(), String> {
        let mut msg = WireMsg::zeroed();
        msg.mtype = REQUEST_MTYPE;
        msg.kind = kind as i32;
        msg.target_pid = target_pid;
        msg.signal = signal;
        put_str(&mut msg.response, &format!("{reply_to}"));
        self.send(&msg)
    }

    // Daemon side: non-blocking poll for the next request.  Ok(None) when the queue is empty.
    pub fn recv_request(&self) -> Result<Option<CommandRequest>, String> {
        match self.recv(REQUEST_MTYPE, libc::IPC_NOWAIT)? {
            Some(msg) => {
                let reply_to = match buf_to_string(&msg.response).parse::<libc::c_long>() {
                    Ok(t) if t > REQUEST_MTYPE => t,
                    _ => DEFAULT_REPLY_MTYPE,
                };
                Ok(Some(CommandRequest {
                    kind: msg.kind,
                    target_pid: msg.target_pid,
                    signal: msg.signal,
                    reply_to,
                }))
            }
            None => Ok(None),
        }
    }

    // Daemon side: answer a request on the client's chosen type.  The status text is truncated to
    // the wire field, prefix intact.
    pub fn send_response(&self, reply_to: libc::c_long, text: &str) -> Result<(), String> {
        let mut msg = WireMsg::zeroed();
        msg.mtype = reply_to;
        put_str(&mut msg.response, text);
        self.send(&msg)
    }

    // Client side: block until the daemon answers on our type.
    pub fn recv_response(&self, reply_to: libc::c_long) -> Result<String, String> {
        match self.recv(reply_to, 0)? {
            Some(msg) => Ok(buf_to_string(&msg.response)),
            // Cannot happen: a blocking msgrcv returns a message or an error
            None => Err("Empty response".to_string()),
        }
    }

    // Administrative teardown; pending messages are discarded.
    pub fn destroy(&self) {
        unsafe {
            libc::msgctl(self.msq_id, libc::IPC_RMID, std::ptr::null_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_wire_layout() {
        // The wire layout is a contract with other builds of this binary; the assertions pin the
        // offsets implied by #[repr(C)].
        assert!(mem::size_of::<WireMsg>() == mem::size_of::<libc::c_long>() + 12 + 4 + 256);
        assert!(WIRE_BODY_LEN == 12 + 4 + 256);

        let msg = WireMsg::zeroed();
        let base = &msg as *const WireMsg as usize;
        assert!(&msg.kind as *const i32 as usize - base == mem::size_of::<libc::c_long>());
        assert!(msg.response.as_ptr() as usize - base == mem::size_of::<libc::c_long>() + 12);
    }

    #[test]
    pub fn test_response_truncation() {
        let mut msg = WireMsg::zeroed();
        let long = "Success: ".to_string() + &"x".repeat(400);
        put_str(&mut msg.response, &long);
        let text = buf_to_string(&msg.response);
        assert!(text.len() == MAX_RESPONSE_LEN - 1);
        assert!(text.starts_with("Success: "));
    }
}
