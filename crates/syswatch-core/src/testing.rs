//! Process tree shared by the tests of this crate.
//!
//! ```text
//! init (1, /sbin/init)
//! ├── p1 (2, thread 3)
//! └── p2 bash (25, threads 23 24, exepath inherited from init)
//!     └── p3 (72, /usr/bin/p3)
//!         └── p4 (76, thread 79, /usr/bin/p4)
//!             └── p5 (82, thread 84, /usr/bin/p5)
//!                 └── p6 good-exe (87, /usr/bin/bad-exe (deleted))
//! ```

use crate::{
    registry::{CloneFields, ExecFields, ThreadRegistry},
    thread::{ThreadInfo, Tid},
};

pub(crate) const INIT: Tid = 1;
pub(crate) const P1: Tid = 2;
pub(crate) const P2: Tid = 25;
pub(crate) const P2_T2: Tid = 23;
pub(crate) const P2_T3: Tid = 24;
pub(crate) const P3: Tid = 72;
pub(crate) const P4: Tid = 76;
pub(crate) const P5: Tid = 82;
pub(crate) const P6: Tid = 87;

pub(crate) fn exec_fields(comm: &str, trusted_exepath: &str) -> ExecFields {
    ExecFields {
        comm: Some(comm.to_string()),
        exe: Some(comm.to_string()),
        trusted_exepath: Some(trusted_exepath.to_string()),
        ..Default::default()
    }
}

fn spawn(registry: &mut ThreadRegistry, parent: Tid, tid: Tid, pid: Tid, comm: Option<&str>) {
    let fields = CloneFields {
        pid,
        comm: comm.map(str::to_string),
        ..Default::default()
    };
    registry.upsert_on_clone(parent, tid, fields).unwrap();
}

pub(crate) fn default_tree() -> ThreadRegistry {
    let mut registry = ThreadRegistry::default();
    let mut init = ThreadInfo::new(INIT, INIT, 0);
    init.comm = "init".to_string();
    init.exe = "/sbin/init".to_string();
    init.exepath = "/sbin/init".to_string();
    init.trusted_exepath = "/sbin/init".to_string();
    init.cwd = "/".to_string();
    init.pgid = INIT;
    init.sid = INIT;
    registry.insert(init).unwrap();

    spawn(&mut registry, INIT, P1, P1, None);
    registry.apply_exec(P1, exec_fields("p1", "/usr/bin/p1")).unwrap();
    spawn(&mut registry, P1, P1 + 1, P1, None);

    spawn(&mut registry, INIT, P2, P2, Some("bash"));
    spawn(&mut registry, P2, P2_T2, P2, None);
    spawn(&mut registry, P2, P2_T3, P2, None);

    spawn(&mut registry, P2, P3, P3, None);
    registry.apply_exec(P3, exec_fields("bash", "/usr/bin/p3")).unwrap();

    spawn(&mut registry, P3, P4, P4, None);
    registry.apply_exec(P4, exec_fields("bash", "/usr/bin/p4")).unwrap();
    spawn(&mut registry, P4, P4 + 3, P4, None);

    spawn(&mut registry, P4, P5, P5, None);
    registry.apply_exec(P5, exec_fields("bash", "/usr/bin/p5")).unwrap();
    spawn(&mut registry, P5, P5 + 2, P5, None);

    spawn(&mut registry, P5, P6, P6, None);
    registry
        .apply_exec(P6, exec_fields("good-exe", "/usr/bin/bad-exe (deleted)"))
        .unwrap();

    registry
}
