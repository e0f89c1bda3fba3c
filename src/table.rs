// The shared process table and its cross-process mutual-exclusion lock.
//
// The table is a fixed-capacity array of records living verbatim in a System V shared memory
// segment, so that the daemon and any number of short-lived client invocations can see the same
// data.  A System V semaphore with SEM_UNDO guards every access: if the holder dies, the kernel
// releases the lock.  There is exactly one holder at a time and no reader/writer distinction.
//
// The table operations themselves (find_index/upsert/remove/get) are plain methods on
// ProcessTable and know nothing about sharing; they are exercised directly by the tests on a
// heap-allocated table.  SharedTable layers attach-or-create semantics and the lock on top and
// hands out a scoped guard, so no path can acquire without releasing.

use crate::time;
use crate::types::{ProcessRecord, MAX_PROCESSES, SEM_KEY, SHM_KEY};

use std::io;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr;

#[repr(C)]
pub struct ProcessTable {
    count: i32,
    processes: [ProcessRecord; MAX_PROCESSES],
    last_sync: i64,
    active: i32,
}

impl ProcessTable {
    // A zeroed table on the heap, for tests that exercise the operations without a shared
    // segment.  Going through the allocator directly avoids materializing the ~1.5MB value on the
    // stack first.
    #[cfg(test)]
    pub fn new_boxed() -> Box<ProcessTable> {
        let layout = std::alloc::Layout::new::<ProcessTable>();
        unsafe {
            let p = std::alloc::alloc_zeroed(layout) as *mut ProcessTable;
            if p.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            Box::from_raw(p)
        }
    }

    pub fn is_active(&self) -> bool {
        self.active != 0
    }

    // First-attach initialization.  The kernel zeroes a fresh segment so this mostly just stamps
    // the metadata.
    pub fn init(&mut self, now: i64) {
        self.count = 0;
        self.last_sync = now;
        self.active = 1;
    }

    pub fn count(&self) -> usize {
        // The count is untrusted in the sense that a buggy or hostile writer with access to the
        // segment could have scribbled on it; clamp rather than index out of bounds.
        (self.count.clamp(0, MAX_PROCESSES as i32)) as usize
    }

    pub fn last_sync(&self) -> i64 {
        self.last_sync
    }

    pub fn set_last_sync(&mut self, now: i64) {
        self.last_sync = now;
    }

    // The valid rows, tombstones included; indices are not stable across remove().
    pub fn records(&self) -> &[ProcessRecord] {
        &self.processes[..self.count()]
    }

    pub fn find_index(&self, pid: i32) -> Option<usize> {
        if pid == 0 {
            return None;
        }
        self.processes[..self.count()].iter().position(|r| r.pid == pid)
    }

    // Overwrite the record with the same pid, or append if there is room.  An insert into a full
    // table is rejected silently; the next full rescan re-establishes ground truth.
    pub fn upsert(&mut self, rec: &ProcessRecord, now: i64) -> bool {
        if rec.pid == 0 {
            return false;
        }
        match self.find_index(rec.pid) {
            Some(ix) => {
                self.processes[ix] = *rec;
            }
            None => {
                let n = self.count();
                if n >= MAX_PROCESSES {
                    return false;
                }
                self.processes[n] = *rec;
                self.count = (n + 1) as i32;
            }
        }
        self.last_sync = now;
        true
    }

    // Removal moves the tail record into the freed slot; order and index stability are not
    // preserved.  No-op if the pid is absent.
    pub fn remove(&mut self, pid: i32, now: i64) -> bool {
        match self.find_index(pid) {
            Some(ix) => {
                let last = self.count() - 1;
                self.processes[ix] = self.processes[last];
                self.processes[last] = ProcessRecord::empty();
                self.count = last as i32;
                self.last_sync = now;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, pid: i32) -> Option<ProcessRecord> {
        self.find_index(pid).map(|ix| self.processes[ix])
    }

    pub fn clear(&mut self, now: i64) {
        self.count = 0;
        self.last_sync = now;
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//
// The cross-process lock.

pub struct TableLock {
    sem_id: i32,
}

impl TableLock {
    // Attach-or-create.  IPC_EXCL distinguishes the creator, which is the only party that sets
    // the initial value; unconditionally re-initializing on every attach would release a lock a
    // running daemon currently holds.
    pub fn create() -> Result<TableLock, String> {
        let sem_id =
            unsafe { libc::semget(SEM_KEY, 1, libc::IPC_CREAT | libc::IPC_EXCL | 0o666) };
        if sem_id != -1 {
            if unsafe { libc::semctl(sem_id, 0, libc::SETVAL, 1) } == -1 {
                return Err(format!("semctl SETVAL: {}", io::Error::last_os_error()));
            }
            return Ok(TableLock { sem_id });
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EEXIST) {
            return Err(format!("semget: {err}"));
        }
        let sem_id = unsafe { libc::semget(SEM_KEY, 1, 0o666) };
        if sem_id == -1 {
            return Err(format!("semget: {}", io::Error::last_os_error()));
        }
        Ok(TableLock { sem_id })
    }

    fn semop(&self, delta: i16) -> Result<(), String> {
        let mut op = libc::sembuf {
            sem_num: 0,
            sem_op: delta,
            sem_flg: libc::SEM_UNDO as i16,
        };
        loop {
            if unsafe { libc::semop(self.sem_id, &mut op, 1) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(format!("semop: {err}"));
        }
    }

    fn acquire(&self) -> Result<(), String> {
        self.semop(-1)
    }

    fn release(&self) {
        // Nothing useful can be done about a failed release; SEM_UNDO covers process death, and
        // EIDRM means an administrative teardown already removed the semaphore.
        if let Err(e) = self.semop(1) {
            eprintln!("Error: table unlock: {e}");
        }
    }

    pub fn destroy(&self) {
        unsafe {
            libc::semctl(self.sem_id, 0, libc::IPC_RMID);
        }
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//
// The shared region.

pub struct SharedTable {
    shm_id: i32,
    table: *mut ProcessTable,
    lock: TableLock,
}

// The raw pointer targets a shared mapping that is valid for the lifetime of the SharedTable, and
// every dereference happens under the semaphore.
unsafe impl Send for SharedTable {}
unsafe impl Sync for SharedTable {}

impl SharedTable {
    // Attach-or-create.  The segment persists across daemon restarts; `active` distinguishes the
    // very first attach, which zero-initializes the metadata under the lock.  Existing records
    // are deliberately preserved on re-attach.
    pub fn attach() -> Result<SharedTable, String> {
        let lock = TableLock::create()?;

        let shm_id = unsafe {
            libc::shmget(
                SHM_KEY,
                mem::size_of::<ProcessTable>(),
                libc::IPC_CREAT | 0o666,
            )
        };
        if shm_id == -1 {
            return Err(format!("shmget: {}", io::Error::last_os_error()));
        }

        let addr = unsafe { libc::shmat(shm_id, ptr::null(), 0) };
        if addr == -1isize as *mut libc::c_void {
            return Err(format!("shmat: {}", io::Error::last_os_error()));
        }

        let shared = SharedTable {
            shm_id,
            table: addr as *mut ProcessTable,
            lock,
        };

        {
            let mut guard = shared.lock()?;
            if !guard.is_active() {
                guard.init(time::unix_now() as i64);
            }
        }

        Ok(shared)
    }

    // Acquire the table lock and hand out mutable access scoped to the guard.  The guard's Drop
    // releases the lock, including on error paths in the caller.
    pub fn lock(&self) -> Result<TableGuard, String> {
        self.lock.acquire()?;
        Ok(TableGuard {
            lock: &self.lock,
            table: unsafe { &mut *self.table },
        })
    }

    // Administrative teardown: mark the segment and the semaphore for removal.  The segment goes
    // away once the last attached process detaches (our own detach happens in Drop).
    pub fn destroy(&self) {
        unsafe {
            libc::shmctl(self.shm_id, libc::IPC_RMID, ptr::null_mut());
        }
        self.lock.destroy();
    }
}

impl Drop for SharedTable {
    fn drop(&mut self) {
        unsafe {
            libc::shmdt(self.table as *const libc::c_void);
        }
    }
}

pub struct TableGuard<'a> {
    lock: &'a TableLock,
    table: &'a mut ProcessTable,
}

impl Deref for TableGuard<'_> {
    type Target = ProcessTable;

    fn deref(&self) -> &ProcessTable {
        self.table
    }
}

impl DerefMut for TableGuard<'_> {
    fn deref_mut(&mut self) -> &mut ProcessTable {
        self.table
    }
}

impl Drop for TableGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pid: i32) -> ProcessRecord {
        let mut r = ProcessRecord::empty();
        r.pid = pid;
        r.ppid = 1;
        crate::types::put_str(&mut r.name, &format!("proc{pid}"));
        r
    }

    #[test]
    pub fn test_insert_and_get() {
        let mut t = ProcessTable::new_boxed();
        assert!(t.count() == 0);
        assert!(!t.is_active());
        t.init(10);
        assert!(t.is_active());

        assert!(t.upsert(&rec(100), 11));
        assert!(t.upsert(&rec(200), 12));
        assert!(t.count() == 2);
        assert!(t.last_sync() == 12);
        let got = t.get(200).unwrap();
        assert!(got.pid == 200);
        assert!(got.name_str() == "proc200");
        assert!(t.get(300).is_none());
    }

    #[test]
    pub fn test_upsert_overwrites() {
        let mut t = ProcessTable::new_boxed();
        t.upsert(&rec(100), 1);
        t.upsert(&rec(200), 2);

        let mut renamed = rec(100);
        crate::types::put_str(&mut renamed.name, "renamed");
        assert!(t.upsert(&renamed, 3));

        // Idempotent with respect to count
        assert!(t.count() == 2);
        assert!(t.get(100).unwrap().name_str() == "renamed");
        assert!(t.find_index(100) == Some(0));
    }

    #[test]
    pub fn test_remove_swaps_tail() {
        let mut t = ProcessTable::new_boxed();
        t.upsert(&rec(100), 1);
        t.upsert(&rec(200), 2);

        assert!(t.remove(100, 3));
        assert!(t.count() == 1);
        assert!(t.find_index(100).is_none());
        // The surviving record moved into the freed slot
        assert!(t.records()[0].pid == 200);
        assert!(t.last_sync() == 3);

        // Absent pid is a no-op and does not touch last_sync
        assert!(!t.remove(100, 4));
        assert!(t.last_sync() == 3);
    }

    #[test]
    pub fn test_pid_zero_is_ignored() {
        let mut t = ProcessTable::new_boxed();
        assert!(!t.upsert(&ProcessRecord::empty(), 1));
        assert!(t.count() == 0);
        assert!(t.find_index(0).is_none());
        assert!(t.get(0).is_none());
    }

    #[test]
    pub fn test_full_table_rejects() {
        let mut t = ProcessTable::new_boxed();
        for pid in 1..=(MAX_PROCESSES as i32) {
            assert!(t.upsert(&rec(pid), 1));
        }
        assert!(t.count() == MAX_PROCESSES);

        // Past capacity: rejected, no change observed
        assert!(!t.upsert(&rec(1_000_000), 2));
        assert!(t.count() == MAX_PROCESSES);
        assert!(t.last_sync() == 1);

        // Overwrite of an existing pid still works at capacity
        assert!(t.upsert(&rec(17), 3));
        assert!(t.count() == MAX_PROCESSES);
    }

    #[test]
    pub fn test_pids_stay_unique() {
        let mut t = ProcessTable::new_boxed();
        for pid in [100, 200, 300, 200, 100, 400] {
            t.upsert(&rec(pid), 1);
        }
        t.remove(200, 2);
        let mut pids: Vec<i32> = t.records().iter().map(|r| r.pid).collect();
        pids.sort();
        assert!(pids == vec![100, 300, 400]);
    }

    #[test]
    pub fn test_clear_resets_count() {
        let mut t = ProcessTable::new_boxed();
        t.upsert(&rec(100), 5);
        t.clear(9);
        assert!(t.count() == 0);
        assert!(t.last_sync() == 9);
        assert!(t.get(100).is_none());
    }
}
