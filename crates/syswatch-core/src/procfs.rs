//! Seeding of the registry with the processes already running.

use std::{
    fs,
    io,
    path::Path,
    sync::Arc,
};

use glob::glob;
use lazy_static::lazy_static;
use nix::unistd::{Pid, getpgid, getsid};
use regex::Regex;
use thiserror::Error;

use crate::{
    registry::{ThreadRegistry, UpsertOutcome, inherit},
    thread::{ThreadInfo, Tid},
};

lazy_static! {
    static ref RE_PPID: Regex = Regex::new(r"(?m)^PPid:\s*(?P<ppid>\d+)").unwrap();
    /// Real, effective, saved and filesystem ids.
    static ref RE_UID: Regex = Regex::new(r"(?m)^Uid:\s*\d+\s+(?P<euid>\d+)").unwrap();
}

#[derive(Error, Debug)]
pub enum ProcfsError {
    #[error("reading {path} failed")]
    ReadFile {
        #[source]
        source: io::Error,
        path: String,
    },
    #[error("parent for process {0} not found")]
    ParentNotFound(Tid),
    #[error("user id for process {0} not found")]
    UserNotFound(Tid),
    #[error("globbing running processes")]
    GlobbingError(#[from] glob::PatternError),
    #[error("unreadable entry")]
    GlobError(#[from] glob::GlobError),
    #[error(transparent)]
    ParseIntError(#[from] std::num::ParseIntError),
}

/// A process as found in procfs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub pid: Tid,
    pub ppid: Tid,
    /// Every thread of the process, the leader included.
    pub tids: Vec<Tid>,
    pub comm: String,
    pub exe: String,
    pub args: Vec<String>,
    pub cwd: String,
    pub euid: u32,
    pub pgid: Tid,
    pub sid: Tid,
}

fn read_to_string(path: String) -> Result<String, ProcfsError> {
    fs::read_to_string(&path).map_err(|source| ProcfsError::ReadFile { source, path })
}

fn read_link(path: String) -> Result<String, ProcfsError> {
    fs::read_link(&path)
        .map(|target| target.to_string_lossy().into_owned())
        .map_err(|source| ProcfsError::ReadFile { source, path })
}

/// Numeric entries matching `pattern`, such as `/proc/[0-9]*`.
fn numeric_entries(pattern: &str) -> Result<Vec<Tid>, ProcfsError> {
    glob(pattern)?
        .map(|entry| {
            let entry = entry?;
            let name = entry
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(name.parse()?)
        })
        .collect()
}

pub fn get_running_processes() -> Result<Vec<Tid>, ProcfsError> {
    numeric_entries("/proc/[0-9]*")
}

pub fn get_process_threads(pid: Tid) -> Result<Vec<Tid>, ProcfsError> {
    numeric_entries(&format!("/proc/{pid}/task/[0-9]*"))
}

pub fn get_process_comm(pid: Tid) -> Result<String, ProcfsError> {
    Ok(read_to_string(format!("/proc/{pid}/comm"))?.trim().to_owned())
}

/// Command line without the executable.
pub fn get_process_args(pid: Tid) -> Result<Vec<String>, ProcfsError> {
    let data = read_to_string(format!("/proc/{pid}/cmdline"))?;
    Ok(data
        .split('\0')
        .skip(1)
        .filter(|arg| !arg.is_empty())
        .map(str::to_string)
        .collect())
}

/// Path of the executable image. Kernel threads have none.
pub fn get_process_image(pid: Tid) -> Result<String, ProcfsError> {
    read_link(format!("/proc/{pid}/exe"))
}

pub fn get_process_cwd(pid: Tid) -> Result<String, ProcfsError> {
    read_link(format!("/proc/{pid}/cwd"))
}

/// Parent pid and effective uid from the content of `/proc/<pid>/status`.
fn parse_status(pid: Tid, status: &str) -> Result<(Tid, u32), ProcfsError> {
    let ppid = RE_PPID
        .captures(status)
        .and_then(|caps| caps.name("ppid"))
        .ok_or(ProcfsError::ParentNotFound(pid))?
        .as_str()
        .parse()?;
    let euid = RE_UID
        .captures(status)
        .and_then(|caps| caps.name("euid"))
        .ok_or(ProcfsError::UserNotFound(pid))?
        .as_str()
        .parse()?;
    Ok((ppid, euid))
}

impl ProcessSnapshot {
    /// Read a process from procfs. Links the kernel refuses to resolve are left empty.
    pub fn read(pid: Tid) -> Result<Self, ProcfsError> {
        let (ppid, euid) = parse_status(pid, &read_to_string(format!("/proc/{pid}/status"))?)?;
        let mut tids = get_process_threads(pid)?;
        if tids.is_empty() {
            tids.push(pid);
        }
        let raw = Pid::from_raw(pid as i32);
        Ok(Self {
            pid,
            ppid,
            tids,
            comm: get_process_comm(pid)?,
            exe: get_process_image(pid).unwrap_or_default(),
            args: get_process_args(pid)?,
            cwd: get_process_cwd(pid).unwrap_or_default(),
            euid,
            pgid: getpgid(Some(raw)).map_or(0, |pgid| pgid.as_raw() as Tid),
            sid: getsid(Some(raw)).map_or(0, |sid| sid.as_raw() as Tid),
        })
    }

    /// Every process readable right now. Processes exiting while scanning are skipped.
    pub fn read_all() -> Result<Vec<Self>, ProcfsError> {
        Ok(get_running_processes()?
            .into_iter()
            .filter_map(|pid| match Self::read(pid) {
                Ok(snapshot) => Some(snapshot),
                Err(err) => {
                    log::debug!("skipping process {pid}: {err}");
                    None
                }
            })
            .collect())
    }
}

impl ThreadRegistry {
    /// Add the given processes and their threads. Returns the number of threads added.
    ///
    /// Processes are linked to their parent when it is part of the snapshot.
    pub fn seed(&mut self, snapshots: Vec<ProcessSnapshot>) -> usize {
        let mut added = 0;
        for snapshot in &snapshots {
            let mut leader = ThreadInfo::new(snapshot.pid, snapshot.pid, snapshot.ppid);
            leader.comm = snapshot.comm.clone();
            leader.exe = snapshot.exe.clone();
            leader.exepath = snapshot.exe.clone();
            leader.trusted_exepath = snapshot.exe.clone();
            leader.args = snapshot.args.clone();
            leader.cwd = snapshot.cwd.clone();
            leader.euid = snapshot.euid;
            leader.pgid = snapshot.pgid;
            leader.sid = snapshot.sid;
            match self.insert(leader) {
                Ok(UpsertOutcome::Duplicate) => {}
                Ok(_) => added += 1,
                Err(err) => {
                    log::warn!("seeding stopped: {err}");
                    return added;
                }
            }
        }

        for snapshot in &snapshots {
            let parent = self
                .threads
                .get(&snapshot.ppid)
                .and_then(|parent| parent.tginfo.clone());
            let group = self
                .threads
                .get(&snapshot.pid)
                .and_then(|leader| leader.tginfo.clone());
            if let (Some(parent), Some(group)) = (parent, group) {
                if group.parent().is_none() && !Arc::ptr_eq(&parent, &group) {
                    group.set_parent(Arc::downgrade(&parent));
                    parent.add_child();
                }
            }
        }

        for snapshot in &snapshots {
            for &tid in snapshot.tids.iter().filter(|tid| **tid != snapshot.pid) {
                let Some(leader) = self.threads.get(&snapshot.pid) else {
                    break;
                };
                let mut thread = ThreadInfo::new(tid, snapshot.pid, leader.ptid);
                inherit(&mut thread, leader);
                thread.tginfo = leader.tginfo.clone();
                match self.insert(thread) {
                    Ok(UpsertOutcome::Duplicate) => {}
                    Ok(_) => {
                        if let Some(group) = self.threads.get(&tid).and_then(|t| t.group()) {
                            group.add_thread();
                        }
                        added += 1;
                    }
                    Err(err) => {
                        log::warn!("seeding stopped: {err}");
                        return added;
                    }
                }
            }
        }
        added
    }

    /// Seed the registry from `/proc`.
    pub fn load_from_procfs(&mut self) -> Result<usize, ProcfsError> {
        let snapshots = ProcessSnapshot::read_all()?;
        let added = self.seed(snapshots);
        log::info!("loaded {added} threads from procfs");
        Ok(added)
    }
}

/// Whether procfs is mounted where it is expected.
pub fn procfs_available() -> bool {
    Path::new("/proc/self/status").exists()
}
