//! Per-thread state and the group state shared by the threads of a process.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

/// Thread (or process) identifier as found in records.
pub type Tid = i64;

/// Suffix the kernel appends to the path of an executable which was unlinked.
pub const DELETED_SUFFIX: &str = " (deleted)";

/// State shared by every thread of a process.
///
/// Members hold it through an `Arc`; there is no link back to them. The parent
/// link is weak so that a process never keeps its parent's group alive.
#[derive(Debug)]
pub struct ThreadGroupInfo {
    pid: Tid,
    live_threads: AtomicU64,
    live_children: AtomicU64,
    parent: Mutex<Weak<ThreadGroupInfo>>,
}

impl ThreadGroupInfo {
    /// New group with a single live thread.
    pub fn new(pid: Tid, parent: Weak<ThreadGroupInfo>) -> Self {
        Self {
            pid,
            live_threads: AtomicU64::new(1),
            live_children: AtomicU64::new(0),
            parent: Mutex::new(parent),
        }
    }

    pub fn pid(&self) -> Tid {
        self.pid
    }

    pub fn live_threads(&self) -> u64 {
        self.live_threads.load(Ordering::Relaxed)
    }

    /// Live direct child processes.
    pub fn live_children(&self) -> u64 {
        self.live_children.load(Ordering::Relaxed)
    }

    pub fn parent(&self) -> Option<Arc<ThreadGroupInfo>> {
        self.parent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    pub(crate) fn set_parent(&self, parent: Weak<ThreadGroupInfo>) {
        *self.parent.lock().unwrap_or_else(PoisonError::into_inner) = parent;
    }

    pub(crate) fn add_thread(&self) {
        self.live_threads.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the threads still alive.
    pub(crate) fn remove_thread(&self) -> u64 {
        saturating_decrement(&self.live_threads)
    }

    pub(crate) fn add_child(&self) {
        self.live_children.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn remove_child(&self) {
        saturating_decrement(&self.live_children);
    }
}

fn saturating_decrement(counter: &AtomicU64) -> u64 {
    match counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1)) {
        Ok(previous) => previous - 1,
        Err(_) => 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdInfo {
    pub name: String,
}

/// Open file descriptors of a thread, ordered by number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FdTable {
    fds: BTreeMap<i64, FdInfo>,
}

impl FdTable {
    pub fn get(&self, fd: i64) -> Option<&FdInfo> {
        self.fds.get(&fd)
    }

    pub fn insert(&mut self, fd: i64, name: impl Into<String>) {
        self.fds.insert(fd, FdInfo { name: name.into() });
    }

    pub fn remove(&mut self, fd: i64) -> Option<FdInfo> {
        self.fds.remove(&fd)
    }

    /// Make `newfd` point to what `oldfd` points to. Returns false if `oldfd` is not open.
    pub fn dup(&mut self, oldfd: i64, newfd: i64) -> bool {
        match self.fds.get(&oldfd).cloned() {
            Some(info) => {
                self.fds.insert(newfd, info);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &FdInfo)> {
        self.fds.iter().map(|(fd, info)| (*fd, info))
    }
}

#[derive(Debug)]
pub struct ThreadInfo {
    pub tid: Tid,
    pub pid: Tid,
    /// Parent thread id, `0` when unknown.
    pub ptid: Tid,
    pub pgid: Tid,
    pub sid: Tid,
    /// Command name, at most 16 bytes in the kernel.
    pub comm: String,
    /// Executable as passed to exec.
    pub exe: String,
    pub exepath: String,
    /// Executable path resolved by the kernel from the mapped file, empty when unknown.
    pub trusted_exepath: String,
    pub cwd: String,
    pub args: Vec<String>,
    pub euid: u32,
    pub fds: FdTable,
    pub clone_ts: u64,
    pub exit_ts: Option<u64>,
    pub(crate) tginfo: Option<Arc<ThreadGroupInfo>>,
}

impl ThreadInfo {
    /// A live thread without any attribute, alone in its own group.
    pub fn new(tid: Tid, pid: Tid, ptid: Tid) -> Self {
        Self {
            tid,
            pid,
            ptid,
            pgid: 0,
            sid: 0,
            comm: String::new(),
            exe: String::new(),
            exepath: String::new(),
            trusted_exepath: String::new(),
            cwd: String::new(),
            args: Vec::new(),
            euid: 0,
            fds: FdTable::default(),
            clone_ts: 0,
            exit_ts: None,
            tginfo: Some(Arc::new(ThreadGroupInfo::new(pid, Weak::new()))),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.exit_ts.is_none()
    }

    pub fn is_main_thread(&self) -> bool {
        self.tid == self.pid
    }

    pub fn group(&self) -> Option<&Arc<ThreadGroupInfo>> {
        self.tginfo.as_ref()
    }

    /// Whether both threads reference the same group.
    pub fn same_group(&self, other: &ThreadInfo) -> bool {
        match (&self.tginfo, &other.tginfo) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Live threads of the process, `0` once the group was released.
    pub fn nthreads(&self) -> u64 {
        self.tginfo.as_ref().map_or(0, |group| group.live_threads())
    }

    /// Live child processes of the process, `0` once the group was released.
    pub fn nchildprocs(&self) -> u64 {
        self.tginfo.as_ref().map_or(0, |group| group.live_children())
    }

    /// Executable path without the deletion marker.
    pub fn exepath(&self) -> &str {
        strip_deleted(&self.exepath)
    }

    pub fn cmdline(&self) -> String {
        let mut cmdline = self.comm.clone();
        for arg in &self.args {
            cmdline.push(' ');
            cmdline.push_str(arg);
        }
        cmdline
    }
}

pub fn strip_deleted(path: &str) -> &str {
    path.strip_suffix(DELETED_SUFFIX).unwrap_or(path)
}
