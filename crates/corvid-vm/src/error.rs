// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for code generation and execution.

use std::fmt;

use thiserror::Error;

use crate::compiler::bytecode::OpCode;

/// Result type for corvid-vm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Lowering the syntax tree failed
    #[error(transparent)]
    Codegen(#[from] CodegenError),

    /// A fatal runtime error aborted execution
    #[error(transparent)]
    Runtime(#[from] VmError),

    /// A background task failed to complete
    #[error("Task failed: {0}")]
    Task(String),
}

/// Errors raised while lowering a program into bytecode.
///
/// The front end validates programs before they reach the generator, so
/// these indicate either a front-end defect or a hand-built tree.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodegenError {
    /// Variable used before declaration
    #[error("Variable '{0}' is not declared in this scope")]
    UnknownVariable(String),

    /// Variable declared twice in the same block
    #[error("Variable '{0}' already declared in this scope")]
    DuplicateVariable(String),

    /// Assignment with an empty target path
    #[error("Assignment target is empty")]
    EmptyPath,

    /// Struct construction names an undefined struct
    #[error("Struct '{0}' is not defined")]
    UnknownStruct(String),

    /// Struct construction with the wrong number of field initializers
    #[error("Struct '{name}' has {expected} fields, {found} initializers given")]
    StructArity {
        name: String,
        expected: usize,
        found: usize,
    },

    /// Literal lexeme does not parse as its declared kind
    #[error("Invalid {kind} literal '{lexeme}'")]
    InvalidLiteral { kind: &'static str, lexeme: String },

    /// A jump placeholder was never backpatched
    #[error("Unpatched jump in '{function}' at {index}")]
    UnpatchedJump { function: String, index: usize },

    /// A jump target lies outside its unit
    #[error("Jump in '{function}' at {index} targets {target}, past the end of the unit")]
    JumpOutOfRange {
        function: String,
        index: usize,
        target: usize,
    },
}

/// What went wrong during execution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeErrorKind {
    /// Arithmetic, comparison or builtin applied to NULL
    #[error("{0} called with null operand")]
    NullOperand(OpCode),

    /// Heap operation applied to a NULL object id
    #[error("{0} called with null reference")]
    NullDereference(OpCode),

    /// Integer or floating-point division by zero
    #[error("division by zero")]
    DivisionByZero,

    /// Array or string index outside `0..len`
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize },

    /// String or number conversion failed
    #[error("cannot convert '{input}' to {target}")]
    InvalidConversion { target: &'static str, input: String },

    /// Operand has the wrong dynamic type
    #[error("{op} called with {found} operand")]
    TypeMismatch { op: OpCode, found: &'static str },

    /// `CALL` or thread creation names no registered unit
    #[error("no function named '{0}'")]
    UnknownFunction(String),

    /// `STORE` to a slot beyond the frame limit
    #[error("invalid store index {0}")]
    InvalidStoreIndex(usize),

    /// `LOAD` of a slot that was never stored
    #[error("read of uninitialized slot {0}")]
    UninitializedSlot(usize),

    /// Logical operator or branch applied to a non-boolean
    #[error("{0} called on non-boolean operand")]
    NonBoolean(OpCode),

    /// Object id names no live heap entry of the expected kind
    #[error("no object with id {0}")]
    UnknownObject(u64),

    /// Struct field read before it was set
    #[error("field '{0}' is not set")]
    UnsetField(String),

    /// `ALLOCA` with a negative length
    #[error("negative array length {0}")]
    NegativeLength(i64),

    /// `ALLOCA` length above the configured bound or beyond available memory
    #[error("array length {0} is too large")]
    ArrayTooLarge(i64),

    /// `WAIT` on an id that was never spawned
    #[error("no thread with id {0}")]
    UnknownThread(i64),

    /// Second `WAIT` on the same thread
    #[error("thread {0} was already joined")]
    AlreadyJoined(i64),

    /// Spawned execution ended without producing a result
    #[error("thread {0} terminated without a result")]
    ThreadPanicked(i64),

    /// OS thread could not be started
    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(String),

    /// Pop from an empty operand stack
    #[error("operand stack underflow")]
    StackUnderflow,

    /// Instruction is missing its operand or carries the wrong kind
    #[error("malformed instruction")]
    MalformedInstruction,

    /// Call stack grew past the configured limit
    #[error("call depth exceeded {0}")]
    CallDepthExceeded(usize),

    /// Reading input or writing output failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Another execution failed first
    #[error("execution aborted")]
    Aborted,
}

/// Where a runtime error was raised.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorLocation {
    /// Name of the executing unit
    pub function: String,
    /// Index of the failing instruction
    pub index: usize,
    /// Textual form of the failing instruction
    pub instruction: String,
}

/// A fatal runtime error.
///
/// Displays as `VM_ERROR: <message> in <function> at <index>: <instruction>`.
#[derive(Debug, Clone, PartialEq)]
pub struct VmError {
    /// The failure
    pub kind: RuntimeErrorKind,
    /// Failing instruction, when raised inside the interpreter loop
    pub location: Option<ErrorLocation>,
    /// Thread id, when raised inside a spawned execution
    pub thread: Option<i64>,
}

impl VmError {
    /// Creates an error with no location.
    pub fn new(kind: RuntimeErrorKind) -> Self {
        Self {
            kind,
            location: None,
            thread: None,
        }
    }

    /// Attaches the failing instruction, keeping an existing location.
    pub fn at(mut self, location: ErrorLocation) -> Self {
        self.location.get_or_insert(location);
        self
    }

    /// Attaches the thread id, keeping an existing one.
    pub fn in_thread(mut self, tid: Option<i64>) -> Self {
        if self.thread.is_none() {
            self.thread = tid;
        }
        self
    }
}

impl From<RuntimeErrorKind> for VmError {
    fn from(kind: RuntimeErrorKind) -> Self {
        Self::new(kind)
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VM_ERROR: {}", self.kind)?;
        if let Some(loc) = &self.location {
            write!(f, " in {} at {}: {}", loc.function, loc.index, loc.instruction)?;
        }
        if let Some(tid) = self.thread {
            write!(f, " (thread {})", tid)?;
        }
        Ok(())
    }
}

impl std::error::Error for VmError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_error_display_with_location() {
        let err = VmError::new(RuntimeErrorKind::DivisionByZero).at(ErrorLocation {
            function: "main".into(),
            index: 4,
            instruction: "DIV()".into(),
        });
        assert_eq!(
            err.to_string(),
            "VM_ERROR: division by zero in main at 4: DIV()"
        );
    }

    #[test]
    fn test_vm_error_display_bare() {
        let err = VmError::new(RuntimeErrorKind::UnknownFunction("main".into()));
        assert_eq!(err.to_string(), "VM_ERROR: no function named 'main'");
    }

    #[test]
    fn test_vm_error_thread_suffix() {
        let err = VmError::new(RuntimeErrorKind::NullOperand(OpCode::Add)).in_thread(Some(2025));
        assert!(err.to_string().ends_with("(thread 2025)"));
        assert!(err.to_string().contains("ADD called with null operand"));
    }

    #[test]
    fn test_location_is_kept_once_set() {
        let first = ErrorLocation {
            function: "f".into(),
            index: 1,
            instruction: "RET()".into(),
        };
        let second = ErrorLocation {
            function: "main".into(),
            index: 9,
            instruction: "CALL(f)".into(),
        };
        let err = VmError::new(RuntimeErrorKind::StackUnderflow)
            .at(first.clone())
            .at(second);
        assert_eq!(err.location, Some(first));
    }

    #[test]
    fn test_error_from_codegen() {
        let err: Error = CodegenError::UnknownVariable("x".into()).into();
        assert!(matches!(err, Error::Codegen(_)));
        assert_eq!(err.to_string(), "Variable 'x' is not declared in this scope");
    }
}
