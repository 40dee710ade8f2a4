// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Virtual machine configuration.

use std::env;
use std::str::FromStr;

use tracing::warn;

/// Tunables for a [`Vm`](crate::Vm) instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Emit a `trace!` event for every executed instruction
    pub trace: bool,
    /// Initial capacity of each operand stack
    pub operand_stack_capacity: usize,
    /// Initial capacity of each call stack
    pub call_stack_capacity: usize,
    /// Deepest permitted call stack before execution aborts
    pub max_call_depth: usize,
    /// Highest permitted number of local slots per frame
    pub max_frame_slots: usize,
    /// Longest array `ALLOCA` may create
    pub max_array_len: usize,
    /// Name prefix for spawned OS threads
    pub thread_name_prefix: String,
    /// Stack size for spawned OS threads, platform default when unset
    pub thread_stack_size: Option<usize>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            trace: false,
            operand_stack_capacity: 256,
            call_stack_capacity: 64,
            max_call_depth: 10_000,
            max_frame_slots: 65_536,
            max_array_len: 1 << 24,
            thread_name_prefix: "corvid-thread".to_string(),
            thread_stack_size: None,
        }
    }
}

impl VmConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads overrides from `CORVID_VM_*` environment variables.
    ///
    /// Recognized variables:
    /// - `CORVID_VM_TRACE` (`1`/`true`/`yes`)
    /// - `CORVID_VM_MAX_CALL_DEPTH`
    /// - `CORVID_VM_MAX_FRAME_SLOTS`
    /// - `CORVID_VM_MAX_ARRAY_LEN`
    /// - `CORVID_VM_THREAD_STACK_SIZE` (bytes)
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = lookup("CORVID_VM_TRACE") {
            config.trace = matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(depth) = parse_var(&lookup, "CORVID_VM_MAX_CALL_DEPTH") {
            config.max_call_depth = depth;
        }
        if let Some(slots) = parse_var(&lookup, "CORVID_VM_MAX_FRAME_SLOTS") {
            config.max_frame_slots = slots;
        }
        if let Some(len) = parse_var(&lookup, "CORVID_VM_MAX_ARRAY_LEN") {
            config.max_array_len = len;
        }
        if let Some(size) = parse_var(&lookup, "CORVID_VM_THREAD_STACK_SIZE") {
            config.thread_stack_size = Some(size);
        }
        config
    }

    /// Enables per-instruction tracing.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Sets the call depth limit.
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Sets the per-frame slot limit.
    pub fn with_max_frame_slots(mut self, slots: usize) -> Self {
        self.max_frame_slots = slots;
        self
    }

    /// Sets the array length limit.
    pub fn with_max_array_len(mut self, len: usize) -> Self {
        self.max_array_len = len;
        self
    }

    /// Sets the stack size of spawned threads.
    pub fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Sets the name prefix of spawned threads.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

fn parse_var<T: FromStr>(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", name, raw);
            None
        }
    }
}
