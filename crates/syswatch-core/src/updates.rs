//! Registry changes implied by decoded events.

use event_wire::{EventType, RawEvent, clone_flags};

use crate::{
    registry::{CloneFields, ExecFields, RegistryError, ThreadRegistry, UpsertOutcome},
    thread::Tid,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryUpdate {
    Clone {
        parent_tid: Tid,
        new_tid: Tid,
        fields: CloneFields,
    },
    Exec {
        tid: Tid,
        fields: ExecFields,
    },
    Exit {
        tid: Tid,
        reaper: Option<Tid>,
    },
    OpenFd {
        tid: Tid,
        fd: i64,
        name: String,
    },
    CloseFd {
        tid: Tid,
        fd: i64,
    },
    DupFd {
        tid: Tid,
        oldfd: i64,
        newfd: i64,
    },
    SetPgid {
        tid: Tid,
        pgid: Tid,
    },
    NewSession {
        tid: Tid,
    },
    SetEuid {
        tid: Tid,
        euid: u32,
    },
}

fn int(event: &RawEvent, name: &str) -> Option<i64> {
    event
        .event_type
        .param_index(name)
        .and_then(|index| event.param_i64(index))
}

fn uid(event: &RawEvent, name: &str) -> Option<u32> {
    event
        .event_type
        .param_index(name)
        .and_then(|index| event.param_u64(index))
        .and_then(|uid| u32::try_from(uid).ok())
}

fn string(event: &RawEvent, name: &str) -> Option<String> {
    event
        .event_type
        .param_index(name)
        .and_then(|index| event.param_str(index))
        .filter(|value| !value.is_empty())
        .map(|value| value.into_owned())
}

fn strings(event: &RawEvent, name: &str) -> Option<Vec<String>> {
    event
        .event_type
        .param_index(name)
        .and_then(|index| event.param_str_array(index))
        .map(|values| values.into_iter().map(|value| value.into_owned()).collect())
}

impl RegistryUpdate {
    /// The change to apply for `event`, if any. Failed syscalls change nothing.
    pub fn from_event(event: &RawEvent) -> Option<Self> {
        let tid = event.tid();
        match event.event_type {
            EventType::CloneX => Self::from_clone(event),
            EventType::ExecveX if int(event, "res")? == 0 => Some(RegistryUpdate::Exec {
                tid: int(event, "tid").unwrap_or(tid),
                fields: ExecFields {
                    pid: int(event, "pid"),
                    ptid: int(event, "ptid"),
                    comm: string(event, "comm"),
                    exe: string(event, "exe"),
                    args: strings(event, "args"),
                    cwd: string(event, "cwd"),
                    trusted_exepath: string(event, "trusted_exepath"),
                    pgid: int(event, "pgid"),
                    euid: uid(event, "euid"),
                    ts: event.ts(),
                },
            }),
            EventType::ProcExitE => Some(RegistryUpdate::Exit {
                tid,
                reaper: int(event, "reaper_tid").filter(|reaper| *reaper > 0),
            }),
            EventType::OpenX => {
                let fd = int(event, "fd").filter(|fd| *fd >= 0)?;
                Some(RegistryUpdate::OpenFd {
                    tid,
                    fd,
                    name: string(event, "name").unwrap_or_default(),
                })
            }
            EventType::CloseX if int(event, "res")? == 0 => Some(RegistryUpdate::CloseFd {
                tid,
                fd: int(event, "fd")?,
            }),
            EventType::Dup2X => {
                let res = int(event, "res").filter(|res| *res >= 0)?;
                Some(RegistryUpdate::DupFd {
                    tid,
                    oldfd: int(event, "oldfd")?,
                    newfd: int(event, "newfd").unwrap_or(res),
                })
            }
            EventType::SetpgidX if int(event, "res")? == 0 => {
                let target = match int(event, "pid").unwrap_or(0) {
                    0 => tid,
                    pid => pid,
                };
                let pgid = match int(event, "pgid").unwrap_or(0) {
                    0 => target,
                    pgid => pgid,
                };
                Some(RegistryUpdate::SetPgid { tid: target, pgid })
            }
            EventType::SetsidX if int(event, "res")? >= 0 => {
                Some(RegistryUpdate::NewSession { tid })
            }
            EventType::SetresuidX if int(event, "res")? == 0 => {
                let euid = uid(event, "euid")?;
                // -1 leaves the effective uid unchanged
                (euid != u32::MAX).then_some(RegistryUpdate::SetEuid { tid, euid })
            }
            _ => None,
        }
    }

    fn from_clone(event: &RawEvent) -> Option<Self> {
        let res = int(event, "res")?;
        let flags = int(event, "flags").unwrap_or(0) as u32;
        let is_thread = flags & clone_flags::THREAD != 0;
        let caller_pid = int(event, "pid");
        let (parent_tid, new_tid, pid) = match res {
            // the child reports its own ids
            0 => {
                let new_tid = event.tid();
                let pid = caller_pid.unwrap_or(new_tid);
                let parent = if is_thread { pid } else { int(event, "ptid")? };
                (parent, new_tid, pid)
            }
            res if res > 0 => {
                let pid = if is_thread { caller_pid? } else { res };
                (event.tid(), res, pid)
            }
            _ => return None,
        };
        Some(RegistryUpdate::Clone {
            parent_tid,
            new_tid,
            fields: CloneFields {
                pid,
                comm: string(event, "comm"),
                exe: string(event, "exe"),
                args: strings(event, "args"),
                cwd: string(event, "cwd"),
                pgid: int(event, "pgid"),
                ts: event.ts(),
            },
        })
    }

    /// Apply the change. Returns whether the registry was modified.
    pub fn apply(self, registry: &mut ThreadRegistry, ts: u64) -> Result<bool, RegistryError> {
        let changed = match self {
            RegistryUpdate::Clone {
                parent_tid,
                new_tid,
                fields,
            } => registry.upsert_on_clone(parent_tid, new_tid, fields)? != UpsertOutcome::Duplicate,
            RegistryUpdate::Exec { tid, fields } => {
                registry.apply_exec(tid, fields)?;
                true
            }
            RegistryUpdate::Exit { tid, reaper } => registry.apply_exit(tid, reaper, ts),
            RegistryUpdate::OpenFd { tid, fd, name } => registry.add_fd(tid, fd, name),
            RegistryUpdate::CloseFd { tid, fd } => registry.close_fd(tid, fd),
            RegistryUpdate::DupFd { tid, oldfd, newfd } => registry.dup_fd(tid, oldfd, newfd),
            RegistryUpdate::SetPgid { tid, pgid } => registry.set_pgid(tid, pgid),
            RegistryUpdate::NewSession { tid } => registry.new_session(tid),
            RegistryUpdate::SetEuid { tid, euid } => registry.set_euid(tid, euid),
        };
        Ok(changed)
    }
}
