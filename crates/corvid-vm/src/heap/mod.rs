// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The struct and array heaps.
//!
//! Both heaps draw ids from one counter, so an [`Oid`] names at most one
//! object. Objects are never freed.
//!
//! Entries are stored in sharded concurrent maps and may be read and
//! written from any thread. Individual entries are not locked across
//! instructions: two threads racing on the same field see whichever write
//! lands last.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use rustc_hash::{FxBuildHasher, FxHashMap};

use crate::config::VmConfig;
use crate::error::RuntimeErrorKind;
use crate::runtime::value::{Oid, Value};

/// The first id handed out by a fresh heap.
pub const FIRST_OID: u64 = 2025;

type StructEntry = FxHashMap<String, Value>;

/// Shared object storage for one VM instance.
#[derive(Debug)]
pub struct Heap {
    structs: DashMap<Oid, StructEntry, FxBuildHasher>,
    arrays: DashMap<Oid, Vec<Value>, FxBuildHasher>,
    next_oid: AtomicU64,
    max_array_len: usize,
}

impl Heap {
    /// Creates an empty heap with the default array length limit.
    pub fn new() -> Self {
        Self::with_max_array_len(VmConfig::default().max_array_len)
    }

    /// Creates an empty heap whose arrays hold at most `max_array_len`
    /// elements.
    pub fn with_max_array_len(max_array_len: usize) -> Self {
        Self {
            structs: DashMap::with_hasher(FxBuildHasher),
            arrays: DashMap::with_hasher(FxBuildHasher),
            next_oid: AtomicU64::new(FIRST_OID),
            max_array_len,
        }
    }

    fn next_oid(&self) -> Oid {
        Oid(self.next_oid.fetch_add(1, Ordering::Relaxed))
    }

    // ========================================================================
    // Structs
    // ========================================================================

    /// Allocates a struct with no fields set.
    pub fn alloc_struct(&self) -> Oid {
        let oid = self.next_oid();
        self.structs.insert(oid, StructEntry::default());
        oid
    }

    /// Sets a struct field.
    pub fn set_field(&self, oid: Oid, field: &str, value: Value) -> Result<(), RuntimeErrorKind> {
        let mut entry = self
            .structs
            .get_mut(&oid)
            .ok_or(RuntimeErrorKind::UnknownObject(oid.get()))?;
        if let Some(slot) = entry.get_mut(field) {
            *slot = value;
        } else {
            entry.insert(field.to_string(), value);
        }
        Ok(())
    }

    /// Reads a struct field. A field that was never set is an error.
    pub fn get_field(&self, oid: Oid, field: &str) -> Result<Value, RuntimeErrorKind> {
        let entry = self
            .structs
            .get(&oid)
            .ok_or(RuntimeErrorKind::UnknownObject(oid.get()))?;
        entry
            .get(field)
            .cloned()
            .ok_or_else(|| RuntimeErrorKind::UnsetField(field.to_string()))
    }

    // ========================================================================
    // Arrays
    // ========================================================================

    /// Allocates an array of `len` nulls.
    ///
    /// Lengths above the heap's limit, or that the allocator refuses, fail
    /// with `ArrayTooLarge` and consume no id.
    pub fn alloc_array(&self, len: i64) -> Result<Oid, RuntimeErrorKind> {
        let size = usize::try_from(len).map_err(|_| RuntimeErrorKind::NegativeLength(len))?;
        if size > self.max_array_len {
            return Err(RuntimeErrorKind::ArrayTooLarge(len));
        }
        let mut array = Vec::new();
        array
            .try_reserve_exact(size)
            .map_err(|_| RuntimeErrorKind::ArrayTooLarge(len))?;
        array.resize(size, Value::Null);

        let oid = self.next_oid();
        self.arrays.insert(oid, array);
        Ok(oid)
    }

    /// Length of an array.
    pub fn array_len(&self, oid: Oid) -> Result<usize, RuntimeErrorKind> {
        self.arrays
            .get(&oid)
            .map(|array| array.len())
            .ok_or(RuntimeErrorKind::UnknownObject(oid.get()))
    }

    /// Reads an array element.
    pub fn get_index(&self, oid: Oid, index: i64) -> Result<Value, RuntimeErrorKind> {
        let array = self
            .arrays
            .get(&oid)
            .ok_or(RuntimeErrorKind::UnknownObject(oid.get()))?;
        let i = checked_index(index, array.len())?;
        Ok(array[i].clone())
    }

    /// Writes an array element.
    pub fn set_index(&self, oid: Oid, index: i64, value: Value) -> Result<(), RuntimeErrorKind> {
        let mut array = self
            .arrays
            .get_mut(&oid)
            .ok_or(RuntimeErrorKind::UnknownObject(oid.get()))?;
        let i = checked_index(index, array.len())?;
        array[i] = value;
        Ok(())
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Number of structs allocated.
    pub fn struct_count(&self) -> usize {
        self.structs.len()
    }

    /// Number of arrays allocated.
    pub fn array_count(&self) -> usize {
        self.arrays.len()
    }

    /// Returns true if `oid` names a struct.
    pub fn is_struct(&self, oid: Oid) -> bool {
        self.structs.contains_key(&oid)
    }

    /// Returns true if `oid` names an array.
    pub fn is_array(&self, oid: Oid) -> bool {
        self.arrays.contains_key(&oid)
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

fn checked_index(index: i64, len: usize) -> Result<usize, RuntimeErrorKind> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < len)
        .ok_or(RuntimeErrorKind::IndexOutOfBounds { index, len })
}
