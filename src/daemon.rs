// Daemon lifecycle and command dispatch.
//
// The Daemon value is the explicit context for everything the background threads need: the
// sampling backends, the shared table, the command bus, the log sinks, and the shutdown token.
// It is constructed once at startup and shared by Arc; there are no module-scope singletons.
//
// Startup order: logger, interrupt handlers, table lock + shared region, command bus, sampler
// pool, one full enumeration, scheduler, supervisor, then the command receiver loop on the main
// thread.  Shutdown (by command or by signal) reverses it: trigger the token, join every thread,
// then remove the bus, the region, and the lock from the kernel.

use crate::interrupt;
use crate::logger::Logger;
use crate::msgbus::{CommandRequest, MessageBus};
use crate::pool;
use crate::realprocfs::RealProcFS;
use crate::realsystem::RealSystem;
use crate::scheduler;
use crate::shutdown::ShutdownToken;
use crate::supervisor;
use crate::table::SharedTable;
use crate::types::{CommandKind, LOG_FILE, STATS_FILE};

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const POLL_DELAY: Duration = Duration::from_millis(100);

pub struct Daemon {
    pub system: RealSystem,
    pub fs: RealProcFS,
    pub table: SharedTable,
    pub bus: MessageBus,
    pub logger: Logger,
    pub shutdown: ShutdownToken,
}

// The daemon_mode() should return under these circumstances *only*:
//
// - it fails to attach or create one of the kernel-global objects at startup
// - a Shutdown command is received on the bus
// - SIGTERM, SIGINT or SIGHUP is received
//
// Worker-thread errors are logged and survived; fatal conditions are reported only from the main
// thread during startup.

pub fn daemon_mode(num_workers: usize) -> Result<(), String> {
    let logger = Logger::open(LOG_FILE, STATS_FILE, true);
    interrupt::handle_interruptions();

    let table = SharedTable::attach()?;
    let bus = MessageBus::open()?;

    let daemon = Arc::new(Daemon {
        system: RealSystem::new(),
        fs: RealProcFS::new(),
        table,
        bus,
        logger,
        shutdown: ShutdownToken::new(),
    });

    daemon.logger.message("PSX daemon started");

    let mut handles = pool::start(&daemon, num_workers);

    // Ground truth before anyone asks for it.
    if let Err(e) = pool::collect_all_processes(&daemon) {
        daemon.logger.message(&format!("Initial collection failed: {e}"));
    }

    {
        let d = Arc::clone(&daemon);
        handles.push(
            thread::Builder::new()
                .name("scheduler".to_string())
                .spawn(move || scheduler::run(&d))
                .expect("spawn scheduler"),
        );
    }
    {
        let d = Arc::clone(&daemon);
        handles.push(
            thread::Builder::new()
                .name("supervisor".to_string())
                .spawn(move || supervisor::run(&d))
                .expect("spawn supervisor"),
        );
    }

    command_loop(&daemon);

    daemon.shutdown.trigger();
    for h in handles {
        let _ = h.join();
    }

    daemon.bus.destroy();
    daemon.table.destroy();
    daemon.logger.message("PSX daemon stopped");
    Ok(())
}

// The command receiver: poll the bus, dispatch, reply, sleep 100ms, repeat.  Runs on the main
// thread until a Shutdown command or an interrupt arrives.
fn command_loop(d: &Daemon) {
    loop {
        if interrupt::is_interrupted() {
            d.logger.message("Interrupt received, shutting down");
            break;
        }
        match d.bus.recv_request() {
            Ok(Some(req)) => {
                let response = handle_command(d, &req);
                if let Err(e) = d.bus.send_response(req.reply_to, &response) {
                    d.logger.message(&format!("Response send failed: {e}"));
                }
                if d.shutdown.is_triggered() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                d.logger.message(&format!("Command receive failed: {e}"));
            }
        }
        if !d.shutdown.sleep(POLL_DELAY) {
            break;
        }
    }
}

// Dispatch one request and produce the response text.  Every outcome, success or error, is also
// recorded in the audit log.
fn handle_command(d: &Daemon, req: &CommandRequest) -> String {
    let kind = match CommandKind::from_i32(req.kind) {
        Some(kind) => kind,
        None => return "Error: Unknown command".to_string(),
    };

    match kind {
        CommandKind::Kill => {
            let signal = if req.signal > 0 {
                req.signal
            } else {
                libc::SIGTERM
            };
            let response = signal_target(d, req.target_pid, signal, |sig, pid| {
                format!("Success: Sent signal {sig} to process {pid}")
            });
            d.logger.operation("KILL", req.target_pid, &response);
            response
        }
        CommandKind::Suspend => {
            let response = signal_target(d, req.target_pid, libc::SIGSTOP, |_, _| {
                "Success: Process suspended".to_string()
            });
            d.logger.operation("SUSPEND", req.target_pid, &response);
            response
        }
        CommandKind::Resume => {
            let response = signal_target(d, req.target_pid, libc::SIGCONT, |_, _| {
                "Success: Process resumed".to_string()
            });
            d.logger.operation("RESUME", req.target_pid, &response);
            response
        }
        CommandKind::Update => {
            let response = match pool::collect_all_processes(d) {
                Ok(()) => "Success: Process table updated".to_string(),
                Err(e) => format!("Error: {e}"),
            };
            d.logger.operation("UPDATE", 0, &response);
            response
        }
        CommandKind::Shutdown => {
            d.shutdown.trigger();
            let response = "Success: Shutting down".to_string();
            d.logger.operation("SHUTDOWN", 0, &response);
            response
        }
    }
}

// Signal a pid that the table knows about.  A pid we are not tracking is reported as not found
// without touching it; a delivery failure surfaces the OS error text verbatim.
fn signal_target(
    d: &Daemon,
    pid: i32,
    signal: i32,
    success: impl Fn(i32, i32) -> String,
) -> String {
    let known = match d.table.lock() {
        Ok(guard) => guard.get(pid).is_some(),
        Err(e) => return format!("Error: {e}"),
    };
    if !known {
        return "Error: Process not found".to_string();
    }

    if unsafe { libc::kill(pid, signal) } == 0 {
        success(signal, pid)
    } else {
        format!("Error: {}", io::Error::last_os_error())
    }
}
