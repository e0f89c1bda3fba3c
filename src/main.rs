mod client;
mod daemon;
mod interrupt;
mod logger;
#[cfg(test)]
mod mockfs;
#[cfg(test)]
mod mocksystem;
mod msgbus;
mod pool;
mod procfsapi;
mod realprocfs;
mod realsystem;
mod sampler;
mod scheduler;
mod shutdown;
mod supervisor;
mod systemapi;
mod table;
mod time;
mod types;

use std::io;

const USAGE_ERROR: i32 = 1;

enum Commands {
    /// Run the daemon: host the process table and its maintenance threads
    Daemon {
        /// Number of sampler workers
        workers: usize,
    },
    /// Stream the process table to stdout; zombies hidden unless `all`
    List { all: bool },
    /// Print the details of one tracked process
    Show { pid: i32 },
    /// Signal a process; 0 means the daemon's default (SIGTERM)
    Kill { pid: i32, signal: i32 },
    /// SIGSTOP a process
    Suspend { pid: i32 },
    /// SIGCONT a process
    Resume { pid: i32 },
    /// Ask the daemon for a full table rebuild
    Update {},
    /// Print table statistics
    Stats {},
}

fn main() {
    let mut stdout = io::stdout();
    let writer: &mut dyn io::Write = &mut stdout;

    let result = match command_line() {
        Commands::Daemon { workers } => daemon::daemon_mode(workers),
        Commands::List { all } => client::list_processes(writer, all),
        Commands::Show { pid } => client::show_process(writer, pid),
        Commands::Kill { pid, signal } => {
            client::send_command(writer, types::CommandKind::Kill, pid, signal)
        }
        Commands::Suspend { pid } => {
            client::send_command(writer, types::CommandKind::Suspend, pid, 0)
        }
        Commands::Resume { pid } => {
            client::send_command(writer, types::CommandKind::Resume, pid, 0)
        }
        Commands::Update {} => client::send_command(writer, types::CommandKind::Update, 0, 0),
        Commands::Stats {} => client::show_stats(writer),
    };
    let _ = writer.flush();

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

// For the sake of simplicity:
//  - options may come in any order after the command
//  - all error reporting is via a generic "usage" message, without specificity as to what was
//    wrong

fn command_line() -> Commands {
    let args = std::env::args().collect::<Vec<String>>();
    let mut next = 1;
    if next >= args.len() {
        // No arguments at all: run as daemon.
        return Commands::Daemon {
            workers: pool::DEFAULT_WORKERS,
        };
    }
    let command = args[next].as_ref();
    next += 1;
    match command {
        "-d" => {
            let mut workers = pool::DEFAULT_WORKERS;
            while next < args.len() {
                let arg: &str = args[next].as_ref();
                next += 1;
                if let Some((new_next, value)) = numeric_arg::<usize>(arg, &args, next, "--workers")
                {
                    (next, workers) = (new_next, value);
                } else {
                    usage(true);
                }
            }
            if workers == 0 {
                eprintln!("--workers must be positive");
                std::process::exit(USAGE_ERROR);
            }
            Commands::Daemon { workers }
        }
        "list" => {
            let mut all = false;
            while next < args.len() {
                let arg: &str = args[next].as_ref();
                next += 1;
                if arg == "-a" {
                    all = true;
                } else {
                    usage(true);
                }
            }
            Commands::List { all }
        }
        "show" => Commands::Show {
            pid: pid_operand(&args, next),
        },
        "kill" => {
            let pid = pid_operand(&args, next);
            let signal = if next + 1 < args.len() {
                match args[next + 1].parse::<i32>() {
                    Ok(s) => s,
                    Err(_) => usage(true),
                }
            } else {
                0
            };
            Commands::Kill { pid, signal }
        }
        "suspend" => Commands::Suspend {
            pid: pid_operand(&args, next),
        },
        "resume" => Commands::Resume {
            pid: pid_operand(&args, next),
        },
        "update" => Commands::Update {},
        "stats" => Commands::Stats {},
        "-h" | "help" => {
            usage(false);
        }
        _ => {
            usage(true);
        }
    }
}

fn pid_operand(args: &[String], next: usize) -> i32 {
    if next >= args.len() {
        eprintln!("Error: PID required");
        std::process::exit(USAGE_ERROR);
    }
    match args[next].parse::<i32>() {
        Ok(pid) if pid > 0 => pid,
        _ => {
            eprintln!("Error: Bad PID {}", args[next]);
            std::process::exit(USAGE_ERROR);
        }
    }
}

fn numeric_arg<T: std::str::FromStr>(
    arg: &str,
    args: &[String],
    next: usize,
    opt_name: &str,
) -> Option<(usize, T)> {
    let strval = if arg == opt_name {
        if next < args.len() {
            Some((next + 1, args[next].to_string()))
        } else {
            None
        }
    } else if let Some((first, rest)) = arg.split_once('=') {
        if first == opt_name {
            Some((next, rest.to_string()))
        } else {
            None
        }
    } else {
        None
    };
    match strval {
        Some((next, strval)) => match strval.parse::<T>() {
            Ok(value) => Some((next, value)),
            _ => {
                usage(true);
            }
        },
        None => None,
    }
}

fn usage(is_error: bool) -> ! {
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    let out: &mut dyn std::io::Write = if is_error { &mut stderr } else { &mut stdout };

    let _ = out.write(b"psx version ");
    let _ = out.write(env!("CARGO_PKG_VERSION").as_bytes());
    let _ = out.write(
        b"

Usage: psx [OPTIONS] [COMMAND] [ARGS]

Options:
  -d                Run as daemon (also the default with no arguments)
  --workers n       Number of sampler workers in daemon mode [default: 4]
  -h                Show this help message

Commands:
  list              List all processes
  list -a           List all processes (including zombies)
  show <pid>        Show details of a specific process
  kill <pid>        Kill a process (SIGTERM)
  kill <pid> <sig>  Kill a process with a specific signal
  suspend <pid>     Suspend a process (SIGSTOP)
  resume <pid>      Resume a process (SIGCONT)
  update            Rebuild the process table
  stats             Show table statistics
",
    );
    let _ = out.flush();
    std::process::exit(if is_error { USAGE_ERROR } else { 0 });
}
