// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Slot allocation for local variables.

use crate::error::CodegenError;

/// A declared local.
#[derive(Debug, Clone)]
pub struct Local {
    /// The variable name
    pub name: String,
    /// The block depth where this was declared
    pub depth: usize,
    /// The frame slot assigned to it
    pub slot: usize,
}

/// Block-structured name table for one function.
///
/// Slots are handed out from a counter that only ever grows, so locals in
/// sibling blocks never share a slot.
#[derive(Debug, Default)]
pub struct VarTable {
    /// Visible locals, innermost last
    pub locals: Vec<Local>,
    /// Current block depth
    pub depth: usize,
    next_slot: usize,
}

impl VarTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a block.
    pub fn begin_scope(&mut self) {
        self.depth += 1;
    }

    /// Leave a block, hiding its locals. Returns how many were hidden.
    pub fn end_scope(&mut self) -> usize {
        let mut count = 0;
        while self.locals.last().is_some_and(|local| local.depth == self.depth) {
            self.locals.pop();
            count += 1;
        }
        self.depth = self.depth.saturating_sub(1);
        count
    }

    /// Declare a local in the current block and return its slot.
    pub fn declare(&mut self, name: &str) -> Result<usize, CodegenError> {
        // Check for duplicate in same block
        for local in self.locals.iter().rev() {
            if local.depth < self.depth {
                break;
            }
            if local.name == name {
                return Err(CodegenError::DuplicateVariable(name.to_string()));
            }
        }

        let slot = self.next_slot;
        self.next_slot += 1;
        self.locals.push(Local {
            name: name.to_string(),
            depth: self.depth,
            slot,
        });
        Ok(slot)
    }

    /// Resolve a name to the slot of its innermost declaration.
    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.locals
            .iter()
            .rev()
            .find(|local| local.name == name)
            .map(|local| local.slot)
    }

    /// Number of slots handed out so far.
    pub fn slot_count(&self) -> usize {
        self.next_slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_begin_end() {
        let mut table = VarTable::new();
        table.begin_scope();
        assert_eq!(table.depth, 1);
        table.end_scope();
        assert_eq!(table.depth, 0);
    }

    #[test]
    fn test_declare_and_resolve() {
        let mut table = VarTable::new();
        table.begin_scope();
        assert_eq!(table.declare("x").unwrap(), 0);
        assert_eq!(table.declare("y").unwrap(), 1);
        assert_eq!(table.resolve("x"), Some(0));
        assert_eq!(table.resolve("z"), None);
    }

    #[test]
    fn test_duplicate_in_same_scope() {
        let mut table = VarTable::new();
        table.begin_scope();
        table.declare("x").unwrap();
        assert_eq!(
            table.declare("x"),
            Err(CodegenError::DuplicateVariable("x".into()))
        );
    }

    #[test]
    fn test_shadowing_resolves_innermost() {
        let mut table = VarTable::new();
        table.begin_scope();
        table.declare("x").unwrap();
        table.begin_scope();
        let inner = table.declare("x").unwrap();
        assert_eq!(table.resolve("x"), Some(inner));
        assert_eq!(table.end_scope(), 1);
        assert_eq!(table.resolve("x"), Some(0));
    }

    #[test]
    fn test_sibling_scopes_do_not_reuse_slots() {
        let mut table = VarTable::new();
        table.begin_scope();
        table.begin_scope();
        let a = table.declare("a").unwrap();
        table.end_scope();
        table.begin_scope();
        let b = table.declare("b").unwrap();
        table.end_scope();
        assert_ne!(a, b);
        assert_eq!(table.slot_count(), 2);
        assert_eq!(table.resolve("a"), None);
    }
}
