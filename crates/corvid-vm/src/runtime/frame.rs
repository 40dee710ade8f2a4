// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Call frames.

use std::sync::Arc;

use crate::compiler::bytecode::Template;
use crate::error::RuntimeErrorKind;
use crate::runtime::value::Value;

/// A live invocation of a [`Template`].
#[derive(Debug, Clone)]
pub struct Frame {
    /// The unit being executed
    pub template: Arc<Template>,
    /// Local variable slots
    pub memory: Vec<Value>,
    /// Index of the next instruction
    pub pc: usize,
}

impl Frame {
    /// Creates a frame positioned at the first instruction.
    pub fn new(template: Arc<Template>) -> Self {
        Self {
            template,
            memory: Vec::new(),
            pc: 0,
        }
    }

    /// Reads a local slot.
    pub fn load(&self, slot: usize) -> Result<Value, RuntimeErrorKind> {
        self.memory
            .get(slot)
            .cloned()
            .ok_or(RuntimeErrorKind::UninitializedSlot(slot))
    }

    /// Writes a local slot, growing the slot list with nulls as needed.
    ///
    /// Slots at or above `limit` are rejected.
    pub fn store(&mut self, slot: usize, value: Value, limit: usize) -> Result<(), RuntimeErrorKind> {
        if slot >= limit {
            return Err(RuntimeErrorKind::InvalidStoreIndex(slot));
        }
        if slot >= self.memory.len() {
            self.memory.resize(slot + 1, Value::Null);
        }
        self.memory[slot] = value;
        Ok(())
    }

    /// Name of the unit being executed.
    pub fn function(&self) -> &str {
        self.template.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::bytecode::TemplateBuilder;

    fn empty_frame() -> Frame {
        let template = TemplateBuilder::new("f").finish().unwrap();
        Frame::new(Arc::new(template))
    }

    #[test]
    fn test_store_extends_with_null() {
        let mut frame = empty_frame();
        frame.store(3, Value::Int(7), 16).unwrap();
        assert_eq!(frame.memory.len(), 4);
        assert_eq!(frame.load(0).unwrap(), Value::Null);
        assert_eq!(frame.load(3).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_store_past_limit() {
        let mut frame = empty_frame();
        assert_eq!(
            frame.store(16, Value::Null, 16),
            Err(RuntimeErrorKind::InvalidStoreIndex(16))
        );
    }

    #[test]
    fn test_load_unwritten_slot() {
        let frame = empty_frame();
        assert_eq!(frame.load(0), Err(RuntimeErrorKind::UninitializedSlot(0)));
        assert_eq!(frame.function(), "f");
    }
}
