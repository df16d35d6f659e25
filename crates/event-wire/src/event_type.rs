//! Table of the event types known to the engine, with the parameter schema of each.
//!
//! Syscalls produce a pair of records: an enter event (`_E`), carrying the arguments,
//! and an exit event (`_X`), carrying the return value and the state after the call.

use strum::{Display, EnumIter, FromRepr};

/// Kind of a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    U8,
    U16,
    U32,
    U64,
    I32,
    I64,
    /// Syscall return value, negative errno on failure
    Errno,
    Pid,
    Fd,
    Uid,
    Flags32,
    /// NUL-terminated string
    CharBuf,
    /// NUL-terminated filesystem path
    FsPath,
    /// Raw bytes
    ByteBuf,
    /// Concatenation of NUL-terminated strings
    CharBufArray,
}

impl ParamType {
    /// Width of fixed-size parameters, `None` for variable-length ones.
    pub fn width(self) -> Option<usize> {
        match self {
            ParamType::U8 => Some(1),
            ParamType::U16 => Some(2),
            ParamType::U32 | ParamType::I32 | ParamType::Uid | ParamType::Flags32 => Some(4),
            ParamType::U64 | ParamType::I64 | ParamType::Errno | ParamType::Pid | ParamType::Fd => {
                Some(8)
            }
            ParamType::CharBuf | ParamType::FsPath | ParamType::ByteBuf | ParamType::CharBufArray => {
                None
            }
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ParamType::I32 | ParamType::I64 | ParamType::Errno | ParamType::Pid | ParamType::Fd
        )
    }

    pub fn is_string(self) -> bool {
        matches!(self, ParamType::CharBuf | ParamType::FsPath)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamInfo {
    pub name: &'static str,
    pub ty: ParamType,
}

const fn p(name: &'static str, ty: ParamType) -> ParamInfo {
    ParamInfo { name, ty }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Enter,
    Exit,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Enter => ">",
            Direction::Exit => "<",
        }
    }
}

/// Flags carried by the clone exit event.
pub mod clone_flags {
    /// The new task shares the thread group of its creator.
    pub const THREAD: u32 = 0x0001_0000;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[strum(serialize_all = "snake_case")]
#[repr(u16)]
pub enum EventType {
    CloneE = 0,
    CloneX = 1,
    ExecveE = 2,
    ExecveX = 3,
    ProcExitE = 4,
    OpenE = 5,
    OpenX = 6,
    CloseE = 7,
    CloseX = 8,
    Dup2E = 9,
    Dup2X = 10,
    SetpgidE = 11,
    SetpgidX = 12,
    SetsidE = 13,
    SetsidX = 14,
    SetresuidE = 15,
    SetresuidX = 16,
    SpliceE = 17,
    SpliceX = 18,
}

use ParamType::*;

const NO_PARAMS: &[ParamInfo] = &[];

const CLONE_X: &[ParamInfo] = &[
    p("res", Pid),
    p("exe", CharBuf),
    p("args", CharBufArray),
    p("tid", Pid),
    p("pid", Pid),
    p("ptid", Pid),
    p("cwd", FsPath),
    p("comm", CharBuf),
    p("flags", Flags32),
    p("pgid", Pid),
];

const EXECVE_E: &[ParamInfo] = &[p("filename", FsPath)];

const EXECVE_X: &[ParamInfo] = &[
    p("res", Errno),
    p("exe", CharBuf),
    p("args", CharBufArray),
    p("tid", Pid),
    p("pid", Pid),
    p("ptid", Pid),
    p("cwd", FsPath),
    p("comm", CharBuf),
    p("env", CharBufArray),
    p("trusted_exepath", FsPath),
    p("pgid", Pid),
    p("euid", Uid),
];

const PROCEXIT_E: &[ParamInfo] = &[
    p("status", I64),
    p("ret", I64),
    p("sig", U8),
    p("core", U8),
    p("reaper_tid", Pid),
];

const OPEN_E: &[ParamInfo] = &[p("name", FsPath), p("flags", Flags32), p("mode", U32)];

const OPEN_X: &[ParamInfo] = &[
    p("fd", Fd),
    p("name", FsPath),
    p("flags", Flags32),
    p("mode", U32),
];

const CLOSE_E: &[ParamInfo] = &[p("fd", Fd)];
const CLOSE_X: &[ParamInfo] = &[p("res", Errno), p("fd", Fd)];

const DUP2_E: &[ParamInfo] = &[p("oldfd", Fd)];
const DUP2_X: &[ParamInfo] = &[p("res", Fd), p("oldfd", Fd), p("newfd", Fd)];

const SETPGID_E: &[ParamInfo] = &[p("pid", Pid), p("pgid", Pid)];
const SETPGID_X: &[ParamInfo] = &[p("res", Errno), p("pid", Pid), p("pgid", Pid)];

const SETSID_X: &[ParamInfo] = &[p("res", Pid)];

const SETRESUID_E: &[ParamInfo] = &[p("ruid", Uid), p("euid", Uid), p("suid", Uid)];
const SETRESUID_X: &[ParamInfo] = &[
    p("res", Errno),
    p("ruid", Uid),
    p("euid", Uid),
    p("suid", Uid),
];

const SPLICE_E: &[ParamInfo] = &[
    p("fd_in", Fd),
    p("fd_out", Fd),
    p("size", U64),
    p("flags", Flags32),
];
const SPLICE_X: &[ParamInfo] = &[
    p("res", Errno),
    p("fd_in", Fd),
    p("fd_out", Fd),
    p("size", U64),
    p("flags", Flags32),
];

impl EventType {
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Name of the syscall or tracepoint, shared by enter and exit events.
    pub fn name(self) -> &'static str {
        match self {
            EventType::CloneE | EventType::CloneX => "clone",
            EventType::ExecveE | EventType::ExecveX => "execve",
            EventType::ProcExitE => "procexit",
            EventType::OpenE | EventType::OpenX => "open",
            EventType::CloseE | EventType::CloseX => "close",
            EventType::Dup2E | EventType::Dup2X => "dup2",
            EventType::SetpgidE | EventType::SetpgidX => "setpgid",
            EventType::SetsidE | EventType::SetsidX => "setsid",
            EventType::SetresuidE | EventType::SetresuidX => "setresuid",
            EventType::SpliceE | EventType::SpliceX => "splice",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            EventType::CloneX
            | EventType::ExecveX
            | EventType::OpenX
            | EventType::CloseX
            | EventType::Dup2X
            | EventType::SetpgidX
            | EventType::SetsidX
            | EventType::SetresuidX
            | EventType::SpliceX => Direction::Exit,
            _ => Direction::Enter,
        }
    }

    pub fn params(self) -> &'static [ParamInfo] {
        match self {
            EventType::CloneE => NO_PARAMS,
            EventType::CloneX => CLONE_X,
            EventType::ExecveE => EXECVE_E,
            EventType::ExecveX => EXECVE_X,
            EventType::ProcExitE => PROCEXIT_E,
            EventType::OpenE => OPEN_E,
            EventType::OpenX => OPEN_X,
            EventType::CloseE => CLOSE_E,
            EventType::CloseX => CLOSE_X,
            EventType::Dup2E => DUP2_E,
            EventType::Dup2X => DUP2_X,
            EventType::SetpgidE => SETPGID_E,
            EventType::SetpgidX => SETPGID_X,
            EventType::SetsidE => NO_PARAMS,
            EventType::SetsidX => SETSID_X,
            EventType::SetresuidE => SETRESUID_E,
            EventType::SetresuidX => SETRESUID_X,
            EventType::SpliceE => SPLICE_E,
            EventType::SpliceX => SPLICE_X,
        }
    }

    /// Position of the named parameter in the schema.
    pub fn param_index(self, name: &str) -> Option<usize> {
        self.params().iter().position(|param| param.name == name)
    }
}
