// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Spawned executions for `THREAD` and `WAIT`.
//!
//! Every `THREAD` starts one OS thread running an independent
//! [`Execution`] against the shared heap. The execution's result travels
//! back over a one-shot channel owned by the thread's handle; `WAIT` takes
//! the receiving end and blocks on it.
//!
//! Threads are tagged with the group of the entry call that spawned them,
//! directly or through other threads, so each call joins only its own.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};
use dashmap::DashMap;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;
use tracing::{debug, warn};

use super::interpreter::{Execution, VmState};
use crate::compiler::bytecode::Template;
use crate::error::{RuntimeErrorKind, VmError};
use crate::runtime::value::Value;

/// The first thread id handed out.
pub const FIRST_TID: i64 = 2025;

type ThreadResult = Result<Value, VmError>;

struct ThreadHandle {
    function: String,
    group: u64,
    result: Mutex<Option<Receiver<ThreadResult>>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

/// Every thread spawned by one VM, retained for its lifetime.
pub(crate) struct ThreadTable {
    handles: DashMap<i64, Arc<ThreadHandle>, FxBuildHasher>,
    next_tid: AtomicI64,
    next_group: AtomicU64,
}

impl ThreadTable {
    pub(crate) fn new() -> Self {
        Self {
            handles: DashMap::with_hasher(FxBuildHasher),
            next_tid: AtomicI64::new(FIRST_TID),
            next_group: AtomicU64::new(0),
        }
    }

    /// Allocates a group id for one entry call.
    pub(crate) fn new_group(&self) -> u64 {
        self.next_group.fetch_add(1, Ordering::Relaxed)
    }

    /// Starts `template` on a new OS thread with `arg` on its operand stack.
    pub(crate) fn spawn(
        &self,
        state: &Arc<VmState>,
        template: Arc<Template>,
        arg: Value,
        group: u64,
    ) -> Result<i64, RuntimeErrorKind> {
        let tid = self.next_tid.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = channel::bounded(1);
        let handle = Arc::new(ThreadHandle {
            function: template.name().to_string(),
            group,
            result: Mutex::new(Some(receiver)),
            join: Mutex::new(None),
        });
        self.handles.insert(tid, Arc::clone(&handle));

        let mut builder =
            thread::Builder::new().name(format!("{}-{}", state.config.thread_name_prefix, tid));
        if let Some(size) = state.config.thread_stack_size {
            builder = builder.stack_size(size);
        }

        let child = Arc::clone(state);
        let spawned = builder.spawn(move || {
            let result = Execution::new(Arc::clone(&child), Some(tid), group).run(template, vec![arg]);
            if let Err(err) = &result {
                child.fail(err);
            }
            debug!("Thread {} finished", tid);
            // The receiver is gone only if the VM itself was dropped
            let _ = sender.send(result);
        });

        match spawned {
            Ok(join) => {
                *handle.join.lock() = Some(join);
                debug!("Spawned thread {} running '{}'", tid, handle.function);
                Ok(tid)
            }
            Err(err) => {
                self.handles.remove(&tid);
                Err(RuntimeErrorKind::ThreadSpawn(err.to_string()))
            }
        }
    }

    /// Blocks until thread `tid` produces its result.
    ///
    /// Each thread can be waited on once.
    pub(crate) fn join(&self, tid: i64) -> Result<Value, VmError> {
        // Clone the handle out so no map shard stays locked while blocking
        let handle = self
            .handles
            .get(&tid)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(RuntimeErrorKind::UnknownThread(tid))?;
        let receiver = handle
            .result
            .lock()
            .take()
            .ok_or(RuntimeErrorKind::AlreadyJoined(tid))?;

        debug!("Waiting on thread {} ('{}')", tid, handle.function);
        match receiver.recv() {
            Ok(result) => result,
            Err(_) => Err(RuntimeErrorKind::ThreadPanicked(tid).into()),
        }
    }

    /// Joins every OS thread of `group`, including threads spawned while
    /// joining. Returns the ids of threads that panicked.
    pub(crate) fn join_all(&self, group: u64) -> Vec<i64> {
        let mut panicked = Vec::new();
        loop {
            let pending: Vec<(i64, JoinHandle<()>)> = self
                .handles
                .iter()
                .filter(|entry| entry.value().group == group)
                .filter_map(|entry| entry.value().join.lock().take().map(|join| (*entry.key(), join)))
                .collect();
            if pending.is_empty() {
                break;
            }
            for (tid, join) in pending {
                if join.join().is_err() {
                    warn!("Thread {} panicked", tid);
                    panicked.push(tid);
                }
            }
        }
        panicked.sort_unstable();
        panicked
    }

    /// Registers an already running OS thread under `group`.
    #[cfg(test)]
    pub(crate) fn adopt(&self, group: u64, join: JoinHandle<()>) -> i64 {
        let tid = self.next_tid.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(
            tid,
            Arc::new(ThreadHandle {
                function: "adopted".to_string(),
                group,
                result: Mutex::new(None),
                join: Mutex::new(Some(join)),
            }),
        );
        tid
    }

    /// Number of threads spawned so far.
    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_join_all_reports_panicked_threads() {
        let table = ThreadTable::new();
        let group = table.new_group();
        let ok = table.adopt(group, thread::spawn(|| {}));
        let bad = table.adopt(group, thread::spawn(|| panic!("thread body failed")));
        assert_eq!(ok, FIRST_TID);
        assert_eq!(table.join_all(group), vec![bad]);
        // Already joined
        assert!(table.join_all(group).is_empty());
    }

    #[test]
    fn test_join_all_only_waits_on_its_group() {
        let table = ThreadTable::new();
        let slow = table.new_group();
        let fast = table.new_group();
        let (release, parked) = channel::bounded::<()>(1);
        let tid = table.adopt(
            slow,
            thread::spawn(move || {
                let _ = parked.recv_timeout(Duration::from_secs(10));
            }),
        );

        // Returns while the slow group's thread is still parked
        assert!(table.join_all(fast).is_empty());
        let pending = table
            .handles
            .get(&tid)
            .map(|entry| entry.value().join.lock().is_some());
        assert_eq!(pending, Some(true));

        release.send(()).unwrap();
        assert!(table.join_all(slow).is_empty());
    }

    #[test]
    fn test_join_unknown_thread() {
        let table = ThreadTable::new();
        assert_eq!(
            table.join(99).unwrap_err().kind,
            RuntimeErrorKind::UnknownThread(99)
        );
    }
}
