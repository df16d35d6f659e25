//! Fields of an event, resolved against the registry.
//!
//! [`FieldTable`] is the catalog used to compile filters: it maps each field name
//! to a [`FieldId`]. [`EventContext`] is the source used to evaluate them: it holds
//! one decoded event and the registry right after the event was applied, and
//! resolves field ids to values.

use std::{borrow::Cow, collections::HashMap};

use event_wire::{Direction, ParamType, ParamValue, RawEvent};
use filtercheck::{FieldCatalog, FieldId, FieldInfo, FieldSource, FieldType, FieldValue, IndexKind};

use crate::{
    registry::ThreadRegistry,
    thread::ThreadInfo,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    EvtNum,
    EvtTime,
    EvtType,
    EvtDir,
    EvtCpu,
    EvtRes,
    EvtFailed,
    EvtArg,
    ThreadTid,
    ThreadIsMain,
    ProcPid,
    ProcPpid,
    ProcName,
    ProcExe,
    ProcExepath,
    ProcCwd,
    ProcArgs,
    ProcCmdline,
    ProcPname,
    ProcPexepath,
    ProcAname,
    ProcApid,
    ProcAexepath,
    ProcNthreads,
    ProcNchilds,
    ProcNchildprocs,
    ProcSid,
    ProcIsSidLeader,
    ProcPgid,
    ProcPgidName,
    ProcPgidExe,
    ProcPgidExepath,
    ProcIsPgidLeader,
    ProcFdOpenCount,
    ProcStdinName,
    ProcStdoutName,
    ProcStderrName,
    FdNum,
    FdName,
    UserUid,
}

use FieldType::{Bool, Int, Str};
use IndexKind::{None as NoIndex, Optional, Required};

#[rustfmt::skip]
const FIELDS: &[(Field, FieldInfo)] = &[
    (Field::EvtNum, FieldInfo::new("evt.num", Int, NoIndex, "sequence number of the event")),
    (Field::EvtTime, FieldInfo::new("evt.time", Int, NoIndex, "timestamp in nanoseconds")),
    (Field::EvtType, FieldInfo::new("evt.type", Str, NoIndex, "syscall name, like open")),
    (Field::EvtDir, FieldInfo::new("evt.dir", Str, NoIndex, "> for enter events, < for exit events")),
    (Field::EvtCpu, FieldInfo::new("evt.cpu", Int, NoIndex, "cpu the event was generated on")),
    (Field::EvtRes, FieldInfo::new("evt.res", Int, NoIndex, "return value of an exit event")),
    (Field::EvtFailed, FieldInfo::new("evt.failed", Bool, NoIndex, "the syscall returned an error")),
    (Field::EvtArg, FieldInfo::new("evt.arg", Str, Required, "parameter N of the event, rendered")),
    (Field::ThreadTid, FieldInfo::new("thread.tid", Int, NoIndex, "thread id")),
    (Field::ThreadIsMain, FieldInfo::new("thread.ismain", Bool, NoIndex, "the thread is the main thread of its process")),
    (Field::ProcPid, FieldInfo::new("proc.pid", Int, NoIndex, "process id")),
    (Field::ProcPpid, FieldInfo::new("proc.ppid", Int, NoIndex, "process id of the parent")),
    (Field::ProcName, FieldInfo::new("proc.name", Str, NoIndex, "command name")),
    (Field::ProcExe, FieldInfo::new("proc.exe", Str, NoIndex, "executable as passed to exec")),
    (Field::ProcExepath, FieldInfo::new("proc.exepath", Str, NoIndex, "full path of the executable")),
    (Field::ProcCwd, FieldInfo::new("proc.cwd", Str, NoIndex, "working directory")),
    (Field::ProcArgs, FieldInfo::new("proc.args", Str, NoIndex, "arguments, space separated")),
    (Field::ProcCmdline, FieldInfo::new("proc.cmdline", Str, NoIndex, "command name and arguments")),
    (Field::ProcPname, FieldInfo::new("proc.pname", Str, NoIndex, "command name of the parent")),
    (Field::ProcPexepath, FieldInfo::new("proc.pexepath", Str, NoIndex, "executable path of the parent")),
    (Field::ProcAname, FieldInfo::new("proc.aname", Str, Optional, "command name of ancestor N, or of every ancestor")),
    (Field::ProcApid, FieldInfo::new("proc.apid", Int, Optional, "process id of ancestor N, or of every ancestor")),
    (Field::ProcAexepath, FieldInfo::new("proc.aexepath", Str, Optional, "executable path of ancestor N, or of every ancestor")),
    (Field::ProcNthreads, FieldInfo::new("proc.nthreads", Int, NoIndex, "live threads of the process")),
    (Field::ProcNchilds, FieldInfo::new("proc.nchilds", Int, NoIndex, "live threads of the process besides the main one")),
    (Field::ProcNchildprocs, FieldInfo::new("proc.nchildprocs", Int, NoIndex, "live child processes")),
    (Field::ProcSid, FieldInfo::new("proc.sid", Int, NoIndex, "session id")),
    (Field::ProcIsSidLeader, FieldInfo::new("proc.is_sid_leader", Bool, NoIndex, "the process leads its session")),
    (Field::ProcPgid, FieldInfo::new("proc.pgid", Int, NoIndex, "process group id")),
    (Field::ProcPgidName, FieldInfo::new("proc.pgid.name", Str, NoIndex, "command name of the process group leader")),
    (Field::ProcPgidExe, FieldInfo::new("proc.pgid.exe", Str, NoIndex, "executable of the process group leader")),
    (Field::ProcPgidExepath, FieldInfo::new("proc.pgid.exepath", Str, NoIndex, "executable path of the process group leader")),
    (Field::ProcIsPgidLeader, FieldInfo::new("proc.is_pgid_leader", Bool, NoIndex, "the thread leads its process group")),
    (Field::ProcFdOpenCount, FieldInfo::new("proc.fdopencount", Int, NoIndex, "open file descriptors")),
    (Field::ProcStdinName, FieldInfo::new("proc.stdin.name", Str, NoIndex, "name of file descriptor 0")),
    (Field::ProcStdoutName, FieldInfo::new("proc.stdout.name", Str, NoIndex, "name of file descriptor 1")),
    (Field::ProcStderrName, FieldInfo::new("proc.stderr.name", Str, NoIndex, "name of file descriptor 2")),
    (Field::FdNum, FieldInfo::new("fd.num", Int, NoIndex, "first file descriptor of the event")),
    (Field::FdName, FieldInfo::new("fd.name", Str, NoIndex, "name of that file descriptor")),
    (Field::UserUid, FieldInfo::new("user.uid", Int, NoIndex, "effective user id")),
];

/// Name to id table of every field.
#[derive(Debug, Clone)]
pub struct FieldTable {
    by_name: HashMap<&'static str, FieldId>,
}

impl FieldTable {
    pub fn new() -> Self {
        let by_name = FIELDS
            .iter()
            .enumerate()
            .map(|(id, (_, info))| (info.name, FieldId(id)))
            .collect();
        Self { by_name }
    }

    pub fn fields(&self) -> impl Iterator<Item = &'static FieldInfo> {
        FIELDS.iter().map(|(_, info)| info)
    }
}

impl Default for FieldTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldCatalog for FieldTable {
    fn lookup(&self, name: &str) -> Option<(FieldId, &FieldInfo)> {
        let id = *self.by_name.get(name)?;
        FIELDS.get(id.0).map(|(_, info)| (id, info))
    }
}

/// One event and the state of the registry once it has been applied.
pub struct EventContext<'a> {
    num: u64,
    event: &'a RawEvent,
    registry: &'a ThreadRegistry,
}

fn text(value: &str) -> Option<FieldValue<'_>> {
    (!value.is_empty()).then_some(FieldValue::Str(Cow::Borrowed(value)))
}

fn int(value: i64) -> Option<FieldValue<'static>> {
    Some(FieldValue::Int(value))
}

fn flag(value: bool) -> Option<FieldValue<'static>> {
    Some(FieldValue::Bool(value))
}

impl<'a> EventContext<'a> {
    pub fn new(num: u64, event: &'a RawEvent, registry: &'a ThreadRegistry) -> Self {
        Self {
            num,
            event,
            registry,
        }
    }

    pub fn num(&self) -> u64 {
        self.num
    }

    pub fn event(&self) -> &'a RawEvent {
        self.event
    }

    pub fn registry(&self) -> &'a ThreadRegistry {
        self.registry
    }

    /// Thread which generated the event.
    pub fn thread(&self) -> Option<&'a ThreadInfo> {
        self.registry.get_thread(self.event.tid())
    }

    /// Return value of an exit event.
    fn res(&self) -> Option<i64> {
        if self.event.event_type.direction() != Direction::Exit {
            return None;
        }
        self.event.param_i64(0)
    }

    /// First file descriptor parameter holding a valid descriptor.
    fn fd_num(&self) -> Option<i64> {
        (0..self.event.nparams())
            .filter(|index| {
                self.event
                    .param_info(*index)
                    .is_some_and(|info| info.ty == ParamType::Fd)
            })
            .filter_map(|index| self.event.param_i64(index))
            .find(|fd| *fd >= 0)
    }

    fn fd_name(&self) -> Option<FieldValue<'a>> {
        if let Some(index) = self.event.event_type.param_index("name") {
            if let Some(name) = self.event.param_str(index) {
                return (!name.is_empty()).then_some(FieldValue::Str(name));
            }
        }
        let fd = self.fd_num()?;
        text(&self.thread()?.fds.get(fd)?.name)
    }

    fn arg(&self, index: Option<u32>) -> Option<FieldValue<'a>> {
        match self.event.param(index? as usize) {
            ParamValue::Empty => None,
            ParamValue::Str(value) => Some(FieldValue::Str(value)),
            value => Some(FieldValue::Str(Cow::Owned(value.to_string()))),
        }
    }

    /// Value of every ancestor (the thread excluded), or of ancestor `index`.
    fn ancestors<F>(&self, thread: &ThreadInfo, index: Option<u32>, value: F) -> Option<FieldValue<'a>>
    where
        F: Fn(&'a ThreadInfo) -> Option<FieldValue<'a>>,
    {
        match index {
            Some(depth) => self
                .registry
                .ancestor_at(thread.tid, depth as usize)
                .and_then(value),
            None => {
                let values: Vec<_> = self
                    .registry
                    .ancestors(thread.tid)
                    .skip(1)
                    .filter_map(value)
                    .collect();
                (!values.is_empty()).then_some(FieldValue::List(values))
            }
        }
    }

    fn resolve_thread(&self, field: Field, index: Option<u32>) -> Option<FieldValue<'a>> {
        let thread = self.thread()?;
        let registry = self.registry;
        match field {
            Field::ThreadIsMain => flag(thread.is_main_thread()),
            Field::ProcPid => int(thread.pid),
            Field::ProcPpid => {
                let parent = registry.ancestor_at(thread.tid, 1)?;
                int(parent.pid)
            }
            Field::ProcName => text(&thread.comm),
            Field::ProcExe => text(&thread.exe),
            Field::ProcExepath => text(thread.exepath()),
            Field::ProcCwd => text(&thread.cwd),
            Field::ProcArgs => Some(FieldValue::Str(Cow::Owned(thread.args.join(" ")))),
            Field::ProcCmdline => Some(FieldValue::Str(Cow::Owned(thread.cmdline()))),
            Field::ProcPname => text(&registry.ancestor_at(thread.tid, 1)?.comm),
            Field::ProcPexepath => text(registry.ancestor_at(thread.tid, 1)?.exepath()),
            Field::ProcAname => self.ancestors(thread, index, |t| text(&t.comm)),
            Field::ProcApid => self.ancestors(thread, index, |t| int(t.pid)),
            Field::ProcAexepath => self.ancestors(thread, index, |t| text(t.exepath())),
            Field::ProcNthreads => int(thread.nthreads() as i64),
            Field::ProcNchilds => int(registry.live_non_leader_threads(thread) as i64),
            Field::ProcNchildprocs => int(thread.nchildprocs() as i64),
            Field::ProcSid => (thread.sid > 0).then_some(FieldValue::Int(thread.sid)),
            Field::ProcIsSidLeader => flag(thread.sid > 0 && thread.sid == thread.pid),
            Field::ProcPgid => (thread.pgid > 0).then_some(FieldValue::Int(thread.pgid)),
            Field::ProcPgidName => text(&registry.resolve_pgid(thread.tid)?.comm),
            Field::ProcPgidExe => text(&registry.resolve_pgid(thread.tid)?.exe),
            Field::ProcPgidExepath => text(registry.resolve_pgid(thread.tid)?.exepath()),
            Field::ProcIsPgidLeader => flag(thread.pgid > 0 && thread.tid == thread.pgid),
            Field::ProcFdOpenCount => int(thread.fds.len() as i64),
            Field::ProcStdinName => text(&thread.fds.get(0)?.name),
            Field::ProcStdoutName => text(&thread.fds.get(1)?.name),
            Field::ProcStderrName => text(&thread.fds.get(2)?.name),
            Field::UserUid => int(thread.euid as i64),
            _ => None,
        }
    }
}

impl FieldSource for EventContext<'_> {
    fn resolve(&self, id: FieldId, index: Option<u32>) -> Option<FieldValue<'_>> {
        let (field, _) = FIELDS.get(id.0)?;
        let event = self.event;
        match field {
            Field::EvtNum => int(self.num as i64),
            Field::EvtTime => int(event.ts() as i64),
            Field::EvtType => text(event.event_type.name()),
            Field::EvtDir => text(event.event_type.direction().as_str()),
            Field::EvtCpu => int(event.cpu() as i64),
            Field::EvtRes => int(self.res()?),
            Field::EvtFailed => flag(self.res()? < 0),
            Field::EvtArg => self.arg(index),
            Field::ThreadTid => int(event.tid()),
            Field::FdNum => int(self.fd_num()?),
            Field::FdName => self.fd_name(),
            field => self.resolve_thread(*field, index),
        }
    }
}
