// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Bytecode definitions.
//!
//! A function compiles to a [`Template`]: a named, immutable instruction
//! list. Templates are assembled with a [`TemplateBuilder`], which supports
//! emitting jumps with placeholder targets and patching them once the
//! target is known.

use std::fmt;

use crate::error::CodegenError;
use crate::runtime::value::Value;

/// Operation codes for the VM.
///
/// Binary operators pop the right operand first, then the left, and push
/// the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // Literals and variables
    /// Push the operand literal
    Push,
    /// Pop and discard the top value
    Pop,
    /// Push the value in a local slot
    Load,
    /// Pop a value into a local slot
    Store,

    // Arithmetic, relational and logical
    /// Add numbers or concatenate strings
    Add,
    /// Subtract
    Sub,
    /// Multiply
    Mul,
    /// Divide (truncating for integers)
    Div,
    /// Less than
    CmpLt,
    /// Less than or equal
    CmpLe,
    /// Equal
    CmpEq,
    /// Not equal
    CmpNe,
    /// Logical and
    And,
    /// Logical or
    Or,
    /// Logical not
    Not,

    // Control transfer
    /// Jump to an absolute instruction index
    Jmp,
    /// Pop a boolean, jump if it is false
    JmpF,

    // Functions
    /// Push a frame for the named unit
    Call,
    /// Pop the current frame
    Ret,

    // Built-ins
    /// Pop a value and write it to output
    Write,
    /// Read a line of input
    Read,
    /// Length of a string or array
    Len,
    /// Character of a string at an index
    GetC,
    /// Convert to integer
    ToInt,
    /// Convert to double
    ToDbl,
    /// Convert to string
    ToStr,

    // Heap
    /// Allocate a struct
    AllocS,
    /// Set a struct field
    SetF,
    /// Get a struct field
    GetF,
    /// Allocate an array
    AllocA,
    /// Set an array element
    SetI,
    /// Get an array element
    GetI,

    // Threads
    /// Spawn a thread running the named unit
    Thread,
    /// Join a thread and push its result
    Wait,

    // Special
    /// Duplicate the top value
    Dup,
    /// Do nothing
    Nop,
}

impl OpCode {
    /// The mnemonic used in the textual form.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Push => "PUSH",
            OpCode::Pop => "POP",
            OpCode::Load => "LOAD",
            OpCode::Store => "STORE",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::CmpLt => "CMPLT",
            OpCode::CmpLe => "CMPLE",
            OpCode::CmpEq => "CMPEQ",
            OpCode::CmpNe => "CMPNE",
            OpCode::And => "AND",
            OpCode::Or => "OR",
            OpCode::Not => "NOT",
            OpCode::Jmp => "JMP",
            OpCode::JmpF => "JMPF",
            OpCode::Call => "CALL",
            OpCode::Ret => "RET",
            OpCode::Write => "WRITE",
            OpCode::Read => "READ",
            OpCode::Len => "LEN",
            OpCode::GetC => "GETC",
            OpCode::ToInt => "TOINT",
            OpCode::ToDbl => "TODBL",
            OpCode::ToStr => "TOSTR",
            OpCode::AllocS => "ALLOCS",
            OpCode::SetF => "SETF",
            OpCode::GetF => "GETF",
            OpCode::AllocA => "ALLOCA",
            OpCode::SetI => "SETI",
            OpCode::GetI => "GETI",
            OpCode::Thread => "THREAD",
            OpCode::Wait => "WAIT",
            OpCode::Dup => "DUP",
            OpCode::Nop => "NOP",
        }
    }

    /// Returns true for `JMP` and `JMPF`.
    pub fn is_jump(self) -> bool {
        matches!(self, OpCode::Jmp | OpCode::JmpF)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Instruction operands.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Literal pushed by `PUSH`
    Literal(Value),
    /// Local slot index for `LOAD`/`STORE`
    Slot(usize),
    /// Absolute jump target
    Target(usize),
    /// Jump target not yet patched
    Unpatched,
    /// Function or field name
    Name(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(Value::Str(s)) => write!(f, "{:?}", s),
            Operand::Literal(value) => write!(f, "{}", value),
            Operand::Slot(slot) => write!(f, "{}", slot),
            Operand::Target(target) => write!(f, "{}", target),
            Operand::Unpatched => write!(f, "-1"),
            Operand::Name(name) => write!(f, "{}", name),
        }
    }
}

/// A single bytecode instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The operation code
    pub opcode: OpCode,
    /// Optional operand
    pub operand: Option<Operand>,
    /// Optional debug comment
    pub comment: Option<String>,
}

impl Instruction {
    /// Creates a new instruction with no operand.
    pub fn simple(opcode: OpCode) -> Self {
        Self {
            opcode,
            operand: None,
            comment: None,
        }
    }

    /// Creates a new instruction with an operand.
    pub fn with_operand(opcode: OpCode, operand: Operand) -> Self {
        Self {
            opcode,
            operand: Some(operand),
            comment: None,
        }
    }

    /// `PUSH(value)`
    pub fn push(value: impl Into<Value>) -> Self {
        Self::with_operand(OpCode::Push, Operand::Literal(value.into()))
    }

    /// `PUSH(null)`
    pub fn push_null() -> Self {
        Self::with_operand(OpCode::Push, Operand::Literal(Value::Null))
    }

    /// `LOAD(slot)`
    pub fn load(slot: usize) -> Self {
        Self::with_operand(OpCode::Load, Operand::Slot(slot))
    }

    /// `STORE(slot)`
    pub fn store(slot: usize) -> Self {
        Self::with_operand(OpCode::Store, Operand::Slot(slot))
    }

    /// `JMP(target)`
    pub fn jmp(target: usize) -> Self {
        Self::with_operand(OpCode::Jmp, Operand::Target(target))
    }

    /// `CALL(name)`
    pub fn call(name: impl Into<String>) -> Self {
        Self::with_operand(OpCode::Call, Operand::Name(name.into()))
    }

    /// `SETF(field)`
    pub fn setf(field: impl Into<String>) -> Self {
        Self::with_operand(OpCode::SetF, Operand::Name(field.into()))
    }

    /// `GETF(field)`
    pub fn getf(field: impl Into<String>) -> Self {
        Self::with_operand(OpCode::GetF, Operand::Name(field.into()))
    }

    /// Attaches a debug comment.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Returns the jump target, if this is a patched jump.
    pub fn target(&self) -> Option<usize> {
        match self.operand {
            Some(Operand::Target(target)) if self.opcode.is_jump() => Some(target),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.opcode)?;
        if let Some(operand) = &self.operand {
            write!(f, "{}", operand)?;
        }
        write!(f, ")")?;
        if let Some(comment) = &self.comment {
            write!(f, "  // {}", comment)?;
        }
        Ok(())
    }
}

/// Index of a jump emitted with a placeholder target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "an unpatched jump fails template validation"]
pub struct PatchSite(usize);

/// An open unit under construction.
#[derive(Debug, Clone)]
pub struct TemplateBuilder {
    name: String,
    instructions: Vec<Instruction>,
}

impl TemplateBuilder {
    /// Starts a unit for the named function.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: Vec::new(),
        }
    }

    /// Appends an instruction and returns its index.
    pub fn emit(&mut self, instruction: Instruction) -> usize {
        let index = self.instructions.len();
        self.instructions.push(instruction);
        index
    }

    /// Appends a jump whose target is patched later.
    pub fn emit_jump(&mut self, opcode: OpCode) -> PatchSite {
        debug_assert!(opcode.is_jump());
        PatchSite(self.emit(Instruction::with_operand(opcode, Operand::Unpatched)))
    }

    /// Points a placeholder jump at `target`.
    pub fn patch(&mut self, site: PatchSite, target: usize) {
        if let Some(instruction) = self.instructions.get_mut(site.0) {
            instruction.operand = Some(Operand::Target(target));
        }
    }

    /// Points a placeholder jump at the next instruction to be emitted.
    pub fn patch_here(&mut self, site: PatchSite) {
        let target = self.next_index();
        self.patch(site, target);
    }

    /// Index the next emitted instruction will get.
    pub fn next_index(&self) -> usize {
        self.instructions.len()
    }

    /// Freezes the unit.
    ///
    /// Fails if a jump was left unpatched or targets an index outside the
    /// unit.
    pub fn finish(self) -> Result<Template, CodegenError> {
        let len = self.instructions.len();
        for (index, instruction) in self.instructions.iter().enumerate() {
            if !instruction.opcode.is_jump() {
                continue;
            }
            match instruction.operand {
                Some(Operand::Target(target)) if target < len => {}
                Some(Operand::Target(target)) => {
                    return Err(CodegenError::JumpOutOfRange {
                        function: self.name,
                        index,
                        target,
                    });
                }
                _ => {
                    return Err(CodegenError::UnpatchedJump {
                        function: self.name,
                        index,
                    });
                }
            }
        }
        Ok(Template {
            name: self.name,
            instructions: self.instructions,
        })
    }
}

/// A frozen unit: one function's instructions.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    name: String,
    instructions: Vec<Instruction>,
}

impl Template {
    /// Name of the function.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The instruction list.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Instruction at `pc`, if in range.
    #[inline]
    pub fn get(&self, pc: usize) -> Option<&Instruction> {
        self.instructions.get(pc)
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns true if the unit has no instructions.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Frame '{}'", self.name)?;
        for (index, instruction) in self.instructions.iter().enumerate() {
            writeln!(f, "  {}: {}", index, instruction)?;
        }
        Ok(())
    }
}
