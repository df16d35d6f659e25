//! Live threads and thread groups, rebuilt from clone, exec and exit events.
//!
//! The registry owns every [`ThreadInfo`]. Group state is shared between the
//! threads of a process through an `Arc<ThreadGroupInfo>` carrying the live
//! counters, so no member list has to be kept in sync. Ancestors are never
//! stored: they are found by following parent thread ids, see [`Ancestors`].
//!
//! Exited threads stay in the table until [`ThreadRegistry::purge_dead`] drops
//! them, so that late events and ancestor walks still find them.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use thiserror::Error;

use crate::{
    config::{ConfigError, SectionConfig},
    thread::{ThreadGroupInfo, ThreadInfo, Tid},
};

pub const DEFAULT_MAX_THREADS: usize = 262_144;
pub const DEFAULT_PURGE_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Entries (alive or dead) the table may hold.
    pub max_threads: usize,
    /// How long an exited thread is kept.
    pub purge_after: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            purge_after: DEFAULT_PURGE_AFTER,
        }
    }
}

impl TryFrom<&SectionConfig> for RegistryConfig {
    type Error = ConfigError;

    fn try_from(config: &SectionConfig) -> Result<Self, Self::Error> {
        let max_threads = config.with_default("max_threads", DEFAULT_MAX_THREADS)?;
        if max_threads == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_threads".to_string(),
                value: "0".to_string(),
                err: "must be greater than 0".to_string(),
            });
        }
        let purge_after = config
            .optional("purge_after_ms")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PURGE_AFTER);
        Ok(Self {
            max_threads,
            purge_after,
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("thread table full ({max} entries), thread {tid} not tracked")]
    TableFull { tid: Tid, max: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// A dead entry with the same id was replaced.
    Replaced,
    /// An existing entry was updated in place.
    Updated,
    /// The thread was already alive, nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub inserted: u64,
    pub replaced: u64,
    pub duplicates: u64,
    /// Entries refused because the table was full.
    pub refused: u64,
    /// Threads created without a known parent.
    pub orphans: u64,
    pub unknown_exits: u64,
    pub purged: u64,
}

/// Attributes carried by a clone event. `None` means inherited from the parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloneFields {
    pub pid: Tid,
    pub comm: Option<String>,
    pub exe: Option<String>,
    pub args: Option<Vec<String>>,
    pub cwd: Option<String>,
    pub pgid: Option<Tid>,
    pub ts: u64,
}

/// Attributes carried by a successful exec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecFields {
    pub pid: Option<Tid>,
    pub ptid: Option<Tid>,
    pub comm: Option<String>,
    pub exe: Option<String>,
    pub args: Option<Vec<String>>,
    pub cwd: Option<String>,
    pub trusted_exepath: Option<String>,
    pub pgid: Option<Tid>,
    pub euid: Option<u32>,
    pub ts: u64,
}

#[derive(Debug, Default)]
pub struct ThreadRegistry {
    pub(crate) threads: HashMap<Tid, ThreadInfo>,
    config: RegistryConfig,
    stats: RegistryStats,
}

impl ThreadRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            threads: HashMap::new(),
            config,
            stats: RegistryStats::default(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats
    }

    /// Entries in the table, dead ones included.
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.threads.values().filter(|t| t.is_alive()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThreadInfo> {
        self.threads.values()
    }

    /// Look up a thread, dead or alive.
    pub fn get_thread(&self, tid: Tid) -> Option<&ThreadInfo> {
        self.threads.get(&tid)
    }

    fn check_capacity(&mut self, tid: Tid) -> Result<(), RegistryError> {
        if self.threads.len() < self.config.max_threads {
            return Ok(());
        }
        self.stats.refused += 1;
        log::debug!("thread table full, not tracking {tid}");
        Err(RegistryError::TableFull {
            tid,
            max: self.config.max_threads,
        })
    }

    /// Remove a dead entry about to be reused. Returns true if there was one.
    fn make_room(&mut self, tid: Tid) -> Result<bool, RegistryError> {
        if self.threads.remove(&tid).is_some() {
            return Ok(true);
        }
        self.check_capacity(tid)?;
        Ok(false)
    }

    fn count_insert(&mut self, replaced: bool) -> UpsertOutcome {
        if replaced {
            self.stats.replaced += 1;
            UpsertOutcome::Replaced
        } else {
            self.stats.inserted += 1;
            UpsertOutcome::Inserted
        }
    }

    /// Insert a thread in its own group, as found at startup.
    pub fn insert(&mut self, thread: ThreadInfo) -> Result<UpsertOutcome, RegistryError> {
        if self.threads.get(&thread.tid).is_some_and(ThreadInfo::is_alive) {
            self.stats.duplicates += 1;
            return Ok(UpsertOutcome::Duplicate);
        }
        let replaced = self.make_room(thread.tid)?;
        self.threads.insert(thread.tid, thread);
        Ok(self.count_insert(replaced))
    }

    /// Create the thread `new_tid` cloned by `parent_tid`.
    ///
    /// A thread with the same process id as its parent joins the parent's group,
    /// anything else starts a new group and counts as a child of the parent's.
    pub fn upsert_on_clone(
        &mut self,
        parent_tid: Tid,
        new_tid: Tid,
        fields: CloneFields,
    ) -> Result<UpsertOutcome, RegistryError> {
        if self.threads.get(&new_tid).is_some_and(ThreadInfo::is_alive) {
            // both the parent and the child report the clone
            self.stats.duplicates += 1;
            return Ok(UpsertOutcome::Duplicate);
        }
        let replaced = self.make_room(new_tid)?;

        let mut thread = ThreadInfo::new(new_tid, fields.pid, parent_tid);
        thread.clone_ts = fields.ts;
        match self.threads.get(&parent_tid) {
            Some(parent) => {
                inherit(&mut thread, parent);
                match parent.tginfo.as_ref() {
                    Some(group) if fields.pid == parent.pid => {
                        group.add_thread();
                        thread.tginfo = Some(group.clone());
                        thread.ptid = parent.ptid;
                    }
                    Some(group) => {
                        group.add_child();
                        thread.tginfo = Some(Arc::new(ThreadGroupInfo::new(
                            fields.pid,
                            Arc::downgrade(group),
                        )));
                    }
                    None => {}
                }
            }
            None => {
                self.stats.orphans += 1;
                log::debug!("parent {parent_tid} of {new_tid} not found");
            }
        }

        if let Some(comm) = fields.comm {
            thread.comm = comm;
        }
        if let Some(exe) = fields.exe {
            thread.exe = exe;
        }
        if let Some(args) = fields.args {
            thread.args = args;
        }
        if let Some(cwd) = fields.cwd {
            thread.cwd = cwd;
        }
        if let Some(pgid) = fields.pgid {
            thread.pgid = pgid;
        }

        log::trace!("clone {parent_tid} -> {new_tid} (pid {})", thread.pid);
        self.threads.insert(new_tid, thread);
        Ok(self.count_insert(replaced))
    }

    /// Update a thread after a successful exec. Identity and group are kept.
    ///
    /// An exec for a thread never seen before creates it.
    pub fn apply_exec(
        &mut self,
        tid: Tid,
        fields: ExecFields,
    ) -> Result<UpsertOutcome, RegistryError> {
        let outcome = if self.threads.get(&tid).is_some_and(ThreadInfo::is_alive) {
            UpsertOutcome::Updated
        } else {
            let replaced = self.make_room(tid)?;
            let pid = fields.pid.unwrap_or(tid);
            let ptid = fields.ptid.unwrap_or(0);
            let mut thread = ThreadInfo::new(tid, pid, ptid);
            thread.clone_ts = fields.ts;
            match self.threads.get(&ptid).and_then(|parent| parent.tginfo.as_ref()) {
                Some(group) => {
                    group.add_child();
                    if let Some(own) = &thread.tginfo {
                        own.set_parent(Arc::downgrade(group));
                    }
                }
                None => self.stats.orphans += 1,
            }
            self.threads.insert(tid, thread);
            self.count_insert(replaced)
        };

        // the entry was either alive or has just been inserted
        let Some(thread) = self.threads.get_mut(&tid) else {
            return Ok(outcome);
        };
        if let Some(comm) = fields.comm {
            thread.comm = comm;
        }
        if let Some(exe) = fields.exe {
            thread.exe = exe;
        }
        thread.trusted_exepath = fields.trusted_exepath.unwrap_or_default();
        thread.exepath = if thread.trusted_exepath.is_empty() {
            thread.exe.clone()
        } else {
            thread.trusted_exepath.clone()
        };
        thread.args = fields.args.unwrap_or_default();
        if let Some(cwd) = fields.cwd {
            thread.cwd = cwd;
        }
        if let Some(pgid) = fields.pgid {
            thread.pgid = pgid;
        }
        if let Some(euid) = fields.euid {
            thread.euid = euid;
        }
        log::trace!("exec {tid}: {}", thread.exepath);
        Ok(outcome)
    }

    /// Mark a thread dead.
    ///
    /// When the whole process is gone the parent loses a live child. Children of
    /// the exiting thread are handed to `reaper`, or to another live thread of the
    /// same process when there is no usable reaper.
    pub fn apply_exit(&mut self, tid: Tid, reaper: Option<Tid>, ts: u64) -> bool {
        let group = match self.threads.get_mut(&tid) {
            Some(thread) if thread.is_alive() => {
                thread.exit_ts = Some(ts);
                thread.tginfo.clone()
            }
            _ => {
                self.stats.unknown_exits += 1;
                log::debug!("exit of unknown thread {tid}");
                return false;
            }
        };
        if let Some(group) = &group {
            if group.remove_thread() == 0 {
                if let Some(parent) = group.parent() {
                    parent.remove_child();
                }
            }
        }
        self.reparent_children(tid, group.as_ref(), reaper);
        true
    }

    fn reparent_children(
        &mut self,
        tid: Tid,
        group: Option<&Arc<ThreadGroupInfo>>,
        reaper: Option<Tid>,
    ) {
        let children: Vec<Tid> = self
            .threads
            .values()
            .filter(|t| t.is_alive() && t.ptid == tid && t.tid != tid)
            .map(|t| t.tid)
            .collect();
        if children.is_empty() {
            return;
        }
        let Some(new_parent) = self.find_reaper(tid, group, reaper) else {
            log::debug!("no reaper for the {} children of {tid}", children.len());
            return;
        };
        for child in children {
            self.set_parent(child, new_parent);
        }
    }

    fn find_reaper(
        &self,
        tid: Tid,
        group: Option<&Arc<ThreadGroupInfo>>,
        reaper: Option<Tid>,
    ) -> Option<Tid> {
        if let Some(reaper) = reaper.filter(|reaper| *reaper > 0 && *reaper != tid) {
            if self.threads.get(&reaper).is_some_and(ThreadInfo::is_alive) {
                return Some(reaper);
            }
        }
        let group = group?;
        self.threads
            .values()
            .filter(|t| {
                t.is_alive() && t.tginfo.as_ref().is_some_and(|g| Arc::ptr_eq(g, group))
            })
            .map(|t| t.tid)
            .min()
    }

    /// Move a thread under a new parent thread.
    ///
    /// The group of the thread follows: its parent link moves to the new parent's
    /// group, and the live child counters move with it.
    pub fn set_parent(&mut self, tid: Tid, ptid: Tid) -> bool {
        let new_group = self
            .threads
            .get(&ptid)
            .and_then(|parent| parent.tginfo.clone());
        let Some(thread) = self.threads.get_mut(&tid) else {
            return false;
        };
        thread.ptid = ptid;
        let Some(group) = &thread.tginfo else {
            return true;
        };
        if new_group.as_ref().is_some_and(|new| Arc::ptr_eq(new, group)) {
            return true;
        }
        let old_group = group.parent();
        let unchanged = match (&old_group, &new_group) {
            (Some(old), Some(new)) => Arc::ptr_eq(old, new),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return true;
        }
        if group.live_threads() > 0 {
            if let Some(old) = &old_group {
                old.remove_child();
            }
            if let Some(new) = &new_group {
                new.add_child();
            }
        }
        group.set_parent(new_group.as_ref().map(Arc::downgrade).unwrap_or_default());
        true
    }

    /// Drop the group reference of a thread. Counters read through it become 0.
    pub fn release_group(&mut self, tid: Tid) -> bool {
        let Some(thread) = self.threads.get_mut(&tid) else {
            return false;
        };
        let Some(group) = thread.tginfo.take() else {
            return false;
        };
        if thread.is_alive() && group.remove_thread() == 0 {
            if let Some(parent) = group.parent() {
                parent.remove_child();
            }
        }
        true
    }

    /// Walk from a thread up to the root. The thread itself comes first.
    pub fn ancestors(&self, tid: Tid) -> Ancestors<'_> {
        Ancestors {
            threads: &self.threads,
            next: Some(tid),
            remaining: self.threads.len(),
        }
    }

    /// Ancestor at `depth`, `0` being the thread itself.
    pub fn ancestor_at(&self, tid: Tid, depth: usize) -> Option<&ThreadInfo> {
        self.ancestors(tid).nth(depth)
    }

    /// Thread standing for the process group of `tid`.
    ///
    /// That is the live thread whose id is the process group id, or else the
    /// nearest ancestor in the same process group.
    pub fn resolve_pgid(&self, tid: Tid) -> Option<&ThreadInfo> {
        let pgid = self.threads.get(&tid)?.pgid;
        if pgid <= 0 {
            return None;
        }
        if let Some(leader) = self.threads.get(&pgid).filter(|t| t.is_alive()) {
            return Some(leader);
        }
        self.ancestors(tid).skip(1).find(|ancestor| ancestor.pgid == pgid)
    }

    /// Live threads of the process of `thread`, its main thread excluded.
    pub fn live_non_leader_threads(&self, thread: &ThreadInfo) -> u64 {
        let nthreads = thread.nthreads();
        let leader_alive = self
            .threads
            .get(&thread.pid)
            .is_some_and(|leader| leader.is_alive() && leader.same_group(thread));
        if leader_alive {
            nthreads.saturating_sub(1)
        } else {
            nthreads
        }
    }

    fn for_each_process_thread<F: FnMut(&mut ThreadInfo)>(&mut self, tid: Tid, mut f: F) -> bool {
        let Some(pid) = self.threads.get(&tid).map(|t| t.pid) else {
            return false;
        };
        self.threads
            .values_mut()
            .filter(|t| t.pid == pid && t.is_alive())
            .for_each(&mut f);
        true
    }

    /// Move the process of `tid` into process group `pgid`.
    pub fn set_pgid(&mut self, tid: Tid, pgid: Tid) -> bool {
        self.for_each_process_thread(tid, |t| t.pgid = pgid)
    }

    /// Make the process of `tid` leader of a new session and process group.
    pub fn new_session(&mut self, tid: Tid) -> bool {
        self.for_each_process_thread(tid, |t| {
            t.sid = t.pid;
            t.pgid = t.pid;
        })
    }

    pub fn set_euid(&mut self, tid: Tid, euid: u32) -> bool {
        match self.threads.get_mut(&tid) {
            Some(thread) => {
                thread.euid = euid;
                true
            }
            None => false,
        }
    }

    pub fn add_fd(&mut self, tid: Tid, fd: i64, name: impl Into<String>) -> bool {
        match self.threads.get_mut(&tid) {
            Some(thread) => {
                thread.fds.insert(fd, name);
                true
            }
            None => false,
        }
    }

    pub fn close_fd(&mut self, tid: Tid, fd: i64) -> bool {
        self.threads
            .get_mut(&tid)
            .is_some_and(|thread| thread.fds.remove(fd).is_some())
    }

    pub fn dup_fd(&mut self, tid: Tid, oldfd: i64, newfd: i64) -> bool {
        self.threads
            .get_mut(&tid)
            .is_some_and(|thread| thread.fds.dup(oldfd, newfd))
    }

    /// Drop the threads which exited more than `purge_after` before `now`.
    pub fn purge_dead(&mut self, now: u64) -> usize {
        let purge_after = u64::try_from(self.config.purge_after.as_nanos()).unwrap_or(u64::MAX);
        let before = self.threads.len();
        self.threads.retain(|tid, thread| match thread.exit_ts {
            Some(exit_ts) if now.saturating_sub(exit_ts) >= purge_after => {
                log::trace!("purging thread {tid}");
                false
            }
            _ => true,
        });
        let purged = before - self.threads.len();
        self.stats.purged += purged as u64;
        purged
    }
}

/// Attributes a new thread gets from the thread which cloned it.
pub(crate) fn inherit(thread: &mut ThreadInfo, parent: &ThreadInfo) {
    thread.pgid = parent.pgid;
    thread.sid = parent.sid;
    thread.comm = parent.comm.clone();
    thread.exe = parent.exe.clone();
    thread.exepath = parent.exepath.clone();
    thread.trusted_exepath = parent.trusted_exepath.clone();
    thread.cwd = parent.cwd.clone();
    thread.args = parent.args.clone();
    thread.euid = parent.euid;
    thread.fds = parent.fds.clone();
}

/// Iterator over a thread and its ancestors, nearest first.
///
/// It stops at a thread without parent (parent id `<= 0` or itself), at a parent
/// missing from the table, and after as many steps as there are entries, which
/// cuts parent cycles.
#[derive(Clone)]
pub struct Ancestors<'a> {
    threads: &'a HashMap<Tid, ThreadInfo>,
    next: Option<Tid>,
    remaining: usize,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a ThreadInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let tid = self.next.take()?;
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let thread = self.threads.get(&tid)?;
        if thread.ptid > 0 && thread.ptid != thread.tid {
            self.next = Some(thread.ptid);
        }
        Some(thread)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::*;
    use crate::testing::{P1, P2, P2_T2, P2_T3, P3, P4, P5, P6, default_tree, exec_fields};

    #[test]
    fn config_from_section() {
        let config: SectionConfig = [("max_threads", "16"), ("purge_after_ms", "250")]
            .into_iter()
            .collect();
        assert_eq!(
            RegistryConfig::try_from(&config),
            Ok(RegistryConfig {
                max_threads: 16,
                purge_after: Duration::from_millis(250),
            })
        );
        assert_eq!(
            RegistryConfig::try_from(&SectionConfig::default()),
            Ok(RegistryConfig::default())
        );
        let config: SectionConfig = [("max_threads", "0")].into_iter().collect();
        assert!(RegistryConfig::try_from(&config).is_err());
    }

    #[test]
    fn thread_counts() {
        let mut registry = default_tree();
        let nthreads = |r: &ThreadRegistry, tid| r.get_thread(tid).unwrap().nthreads();
        let nchilds = |r: &ThreadRegistry, tid| {
            r.live_non_leader_threads(r.get_thread(tid).unwrap())
        };

        assert_eq!(nthreads(&registry, P2_T2), 3);
        assert_eq!(nchilds(&registry, P2_T2), 2);

        assert!(registry.apply_exit(P2, Some(P2_T2), 100));
        assert_eq!(nthreads(&registry, P2_T2), 2);
        assert_eq!(nchilds(&registry, P2_T2), 2);

        assert!(registry.apply_exit(P2_T3, None, 101));
        assert_eq!(nthreads(&registry, P2_T2), 1);
        assert_eq!(nchilds(&registry, P2_T2), 1);

        assert!(registry.release_group(P2_T2));
        assert_eq!(nthreads(&registry, P2_T2), 0);
        assert_eq!(nchilds(&registry, P2_T2), 0);
        assert!(!registry.release_group(P2_T2));
    }

    #[test]
    fn clone_joins_or_creates_groups() {
        let registry = default_tree();
        let p1 = registry.get_thread(P1).unwrap();
        let p1_thread = registry.get_thread(P1 + 1).unwrap();
        assert!(p1.same_group(p1_thread));
        assert_eq!(p1_thread.ptid, p1.ptid);
        assert_eq!(p1.nthreads(), 2);

        let init = registry.get_thread(1).unwrap();
        // p1 and p2
        assert_eq!(init.nchildprocs(), 2);
        let p4 = registry.get_thread(P4).unwrap();
        assert_eq!(p4.nchildprocs(), 1);
        let p6 = registry.get_thread(P6).unwrap();
        assert_eq!(p6.nchildprocs(), 0);
        assert_eq!(
            p6.group().and_then(|g| g.parent()).map(|g| g.pid()),
            Some(P5)
        );
    }

    #[test]
    fn duplicate_and_reused_tids() {
        let mut registry = default_tree();
        let len = registry.len();
        let fields = CloneFields {
            pid: P6,
            ..Default::default()
        };
        assert_eq!(
            registry.upsert_on_clone(P5, P6, fields.clone()),
            Ok(UpsertOutcome::Duplicate)
        );
        assert_eq!(registry.len(), len);

        assert!(registry.apply_exit(P6, None, 10));
        assert_eq!(registry.get_thread(P5).unwrap().nchildprocs(), 0);
        assert_eq!(
            registry.upsert_on_clone(P5, P6, fields),
            Ok(UpsertOutcome::Replaced)
        );
        let p6 = registry.get_thread(P6).unwrap();
        assert!(p6.is_alive());
        assert_eq!(p6.comm, "bash");
        assert_eq!(registry.get_thread(P5).unwrap().nchildprocs(), 1);
        assert_eq!(registry.stats().duplicates, 1);
        assert_eq!(registry.stats().replaced, 1);
    }

    #[test]
    fn clone_inherits_parent_attributes() {
        let mut registry = default_tree();
        registry.add_fd(P6, 3, "/etc/shadow");
        registry
            .upsert_on_clone(
                P6,
                200,
                CloneFields {
                    pid: 200,
                    comm: Some("child".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        let child = registry.get_thread(200).unwrap();
        let p6 = registry.get_thread(P6).unwrap();
        assert_eq!(child.comm, "child");
        assert_eq!(child.exe, p6.exe);
        assert_eq!(child.exepath, p6.exepath);
        assert_eq!(child.cwd, p6.cwd);
        assert_eq!(child.pgid, p6.pgid);
        assert_eq!(child.fds.get(3).map(|fd| fd.name.as_str()), Some("/etc/shadow"));
        assert_eq!(child.ptid, P6);
    }

    #[test]
    fn exec_updates_in_place() {
        let mut registry = default_tree();
        let before = registry.get_thread(P3).unwrap().group().cloned().unwrap();
        let outcome = registry
            .apply_exec(
                P3,
                ExecFields {
                    exe: Some("ls".to_string()),
                    args: Some(vec!["-l".to_string()]),
                    comm: Some("ls".to_string()),
                    euid: Some(1000),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
        let p3 = registry.get_thread(P3).unwrap();
        assert_eq!(p3.comm, "ls");
        // no trusted path: fall back to what was passed to exec
        assert_eq!(p3.exepath, "ls");
        assert_eq!(p3.args, vec!["-l".to_string()]);
        assert_eq!(p3.euid, 1000);
        assert_eq!(p3.ptid, P2);
        assert!(Arc::ptr_eq(p3.group().unwrap(), &before));
    }

    #[test]
    fn exec_of_unknown_thread() {
        let mut registry = default_tree();
        let outcome = registry
            .apply_exec(
                500,
                ExecFields {
                    pid: Some(500),
                    ptid: Some(P6),
                    ..exec_fields("top", "/usr/bin/top")
                },
            )
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert_eq!(registry.ancestor_at(500, 1).map(|t| t.tid), Some(P6));
        assert_eq!(registry.get_thread(P6).unwrap().nchildprocs(), 1);
    }

    #[test]
    fn ancestors_chain() {
        let registry = default_tree();
        let chain: Vec<_> = registry.ancestors(P6).map(|t| t.tid).collect();
        assert_eq!(chain, vec![P6, P5, P4, P3, P2, 1]);
        // restartable
        let walk = registry.ancestors(P6).skip(2);
        assert_eq!(walk.clone().count(), 4);
        assert_eq!(walk.map(|t| t.tid).next(), Some(P4));

        assert_eq!(registry.ancestor_at(P6, 0).map(|t| t.tid), Some(P6));
        assert_eq!(registry.ancestor_at(P6, 5).map(|t| t.tid), Some(1));
        assert!(registry.ancestor_at(P6, 6).is_none());
        assert!(registry.ancestor_at(12345, 0).is_none());
    }

    #[test]
    fn ancestor_cycle_terminates() {
        let mut registry = ThreadRegistry::default();
        registry.insert(ThreadInfo::new(10, 10, 11)).unwrap();
        registry.insert(ThreadInfo::new(11, 11, 10)).unwrap();
        assert_eq!(registry.ancestors(10).count(), 2);
    }

    #[test]
    fn pgid_resolution() {
        let mut registry = default_tree();

        // a live thread has the id of the group
        registry.set_pgid(P3, P1);
        let pgid = registry.resolve_pgid(P3).unwrap();
        assert_eq!(pgid.tid, P1);
        assert_eq!(pgid.comm, "p1");

        // leader of its own group
        registry.set_pgid(P4, P4);
        assert_eq!(registry.resolve_pgid(P4).map(|t| t.tid), Some(P4));
        assert_eq!(registry.get_thread(P4 + 3).unwrap().pgid, P4);

        // no such thread: nearest ancestor in the same group
        registry.set_pgid(P2, 100_000);
        registry.set_pgid(P6, 100_000);
        assert_eq!(registry.resolve_pgid(P6).map(|t| t.tid), Some(P2));

        registry.set_pgid(P6, 200_000);
        assert!(registry.resolve_pgid(P6).is_none());
    }

    #[test]
    fn sessions() {
        let mut registry = default_tree();
        assert!(registry.new_session(P4));
        for tid in [P4, P4 + 3] {
            let thread = registry.get_thread(tid).unwrap();
            assert_eq!((thread.sid, thread.pgid), (P4, P4));
        }
        assert_eq!(registry.get_thread(P5).unwrap().sid, 1);
        assert!(!registry.new_session(9999));
    }

    #[test]
    fn exit_reparents_children() {
        let mut registry = default_tree();
        assert!(registry.apply_exit(P5 + 2, None, 1));
        assert!(registry.apply_exit(P5, Some(1), 2));
        let p6 = registry.get_thread(P6).unwrap();
        assert_eq!(p6.ptid, 1);
        assert_eq!(registry.get_thread(P4).unwrap().nchildprocs(), 0);
        // p1, p2 and the adopted p6
        assert_eq!(registry.get_thread(1).unwrap().nchildprocs(), 3);
        assert_eq!(registry.ancestor_at(P6, 1).map(|t| t.tid), Some(1));
    }

    #[test]
    fn exit_of_leader_hands_children_to_thread() {
        let mut registry = default_tree();
        assert!(registry.apply_exit(P2, None, 1));
        let p3 = registry.get_thread(P3).unwrap();
        assert_eq!(p3.ptid, P2_T2.min(P2_T3));
        assert_eq!(registry.get_thread(P2_T2).unwrap().nchildprocs(), 1);
        assert!(!registry.apply_exit(P2, None, 2));
        assert_eq!(registry.stats().unknown_exits, 1);
    }

    #[test]
    fn fd_updates() {
        let mut registry = default_tree();
        assert!(registry.add_fd(P6, 5, "/tmp/out"));
        assert!(registry.dup_fd(P6, 5, 1));
        assert!(!registry.dup_fd(P6, 9, 2));
        assert!(registry.close_fd(P6, 5));
        assert!(!registry.close_fd(P6, 5));
        let fds = &registry.get_thread(P6).unwrap().fds;
        assert_eq!(fds.get(1).map(|fd| fd.name.as_str()), Some("/tmp/out"));
        assert!(!registry.add_fd(9999, 0, "x"));
    }

    #[test]
    fn purge() {
        let mut registry = ThreadRegistry::new(RegistryConfig {
            purge_after: Duration::from_nanos(100),
            ..Default::default()
        });
        registry.insert(ThreadInfo::new(1, 1, 0)).unwrap();
        registry.insert(ThreadInfo::new(2, 2, 1)).unwrap();
        registry.apply_exit(2, None, 1_000);
        assert_eq!(registry.purge_dead(1_050), 0);
        assert!(registry.get_thread(2).is_some());
        assert_eq!(registry.purge_dead(1_100), 1);
        assert!(registry.get_thread(2).is_none());
        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.stats().purged, 1);
    }

    #[test]
    fn table_full() {
        let mut registry = ThreadRegistry::new(RegistryConfig {
            max_threads: 2,
            ..Default::default()
        });
        registry.insert(ThreadInfo::new(1, 1, 0)).unwrap();
        let fields = |pid| CloneFields {
            pid,
            ..Default::default()
        };
        registry.upsert_on_clone(1, 2, fields(2)).unwrap();
        assert_eq!(
            registry.upsert_on_clone(1, 3, fields(3)),
            Err(RegistryError::TableFull { tid: 3, max: 2 })
        );
        assert_eq!(registry.stats().refused, 1);

        // a dead entry can be reused even when full
        registry.apply_exit(2, None, 5);
        assert_eq!(
            registry.upsert_on_clone(1, 2, fields(2)),
            Ok(UpsertOutcome::Replaced)
        );
    }

    fn check_invariants(registry: &ThreadRegistry) {
        let mut threads: HashMap<*const ThreadGroupInfo, u64> = HashMap::new();
        let mut children: HashMap<*const ThreadGroupInfo, u64> = HashMap::new();
        let mut groups = Vec::new();
        for thread in registry.iter() {
            let Some(group) = thread.group() else {
                continue;
            };
            let counted = threads.entry(Arc::as_ptr(group)).or_insert_with(|| {
                groups.push(group.clone());
                0
            });
            if thread.is_alive() {
                *counted += 1;
            }
        }
        for group in &groups {
            if threads[&Arc::as_ptr(group)] > 0 {
                if let Some(parent) = group.parent() {
                    *children.entry(Arc::as_ptr(&parent)).or_default() += 1;
                }
            }
        }
        for group in &groups {
            let live = threads[&Arc::as_ptr(group)];
            assert_eq!(group.live_threads(), live, "group {}", group.pid());
            if live > 0 {
                assert_eq!(
                    group.live_children(),
                    children.get(&Arc::as_ptr(group)).copied().unwrap_or(0),
                    "children of group {}",
                    group.pid()
                );
            }
        }
    }

    #[test]
    fn random_lifecycles_keep_counters_exact() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut registry = ThreadRegistry::default();
        registry.insert(ThreadInfo::new(1, 1, 0)).unwrap();
        let mut next_tid = 2;
        for step in 0..3000u64 {
            let mut alive: Vec<(Tid, Tid)> = registry
                .iter()
                .filter(|t| t.is_alive())
                .map(|t| (t.tid, t.pid))
                .collect();
            alive.sort_unstable();
            let (tid, pid) = alive[rng.gen_range(0..alive.len())];
            match rng.gen_range(0..5) {
                0 | 1 => {
                    let fields = CloneFields {
                        pid: next_tid,
                        ts: step,
                        ..Default::default()
                    };
                    registry.upsert_on_clone(tid, next_tid, fields).unwrap();
                    next_tid += 1;
                }
                2 => {
                    let fields = CloneFields {
                        pid,
                        ts: step,
                        ..Default::default()
                    };
                    registry.upsert_on_clone(tid, next_tid, fields).unwrap();
                    next_tid += 1;
                }
                _ if tid != 1 => {
                    let reaper = rng.gen_bool(0.5).then_some(1);
                    assert!(registry.apply_exit(tid, reaper, step));
                }
                _ => {}
            }
            if step % 50 == 0 {
                check_invariants(&registry);
            }
        }
        check_invariants(&registry);
    }
}
