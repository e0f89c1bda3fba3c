use crate::procfsapi;

use std::fs;
use std::path;

// RealProcFS is used to actually access /proc.

pub struct RealProcFS {}

impl RealProcFS {
    pub fn new() -> RealProcFS {
        RealProcFS {}
    }
}

impl procfsapi::ProcfsAPI for RealProcFS {
    fn read_to_string(&self, path: &str) -> Result<String, String> {
        let filename = format!("/proc/{path}");
        match fs::read_to_string(path::Path::new(&filename)) {
            Ok(s) => Ok(s),
            Err(_) => Err(format!("Unable to read {filename}")),
        }
    }

    fn read_proc_pids(&self) -> Result<Vec<i32>, String> {
        // Just ignore dirents that cause trouble, there wouldn't normally be any in /proc, but if
        // there are we probably don't care.  Note that a pid may disappear between the time we see
        // it here and the time we get around to reading it, and new pids may appear meanwhile; the
        // callers deal with both.
        let mut pids = vec![];
        if let Ok(dir) = fs::read_dir("/proc") {
            for dirent in dir.flatten() {
                if let Some(name) = dirent.path().file_name() {
                    if let Ok(pid) = name.to_string_lossy().parse::<i32>() {
                        pids.push(pid);
                    }
                }
            }
        } else {
            return Err("Could not open /proc".to_string());
        };
        Ok(pids)
    }
}
