// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # corvid-vm
//!
//! Code generator and multithreaded stack virtual machine for the Corvid
//! language.
//!
//! ## Overview
//!
//! - An AST for checked Corvid programs
//! - A code generator lowering each function to a bytecode template
//! - A stack VM with call frames, a shared struct and array heap, and
//!   OS-thread backed `thread_create`/`thread_wait`
//! - Optional async wrappers over the blocking VM
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use corvid_vm::{Vm, ast::{DataType, Expr, FunDef, Program, Stmt}};
//!
//! let mut program = Program::default();
//! program.functions.push(FunDef::new(
//!     DataType::named("void"),
//!     "main",
//!     vec![],
//!     vec![Stmt::call("print", vec![Expr::int(5)])],
//! ));
//!
//! let vm = Vm::new();
//! vm.load(&program)?;
//! vm.run()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod ast;
pub mod compiler;
pub mod config;
pub mod error;
pub mod heap;
pub mod runtime;
pub mod vm;

/// Async wrappers over the blocking VM
#[cfg(feature = "async")]
pub mod async_engine;

// Re-exports for convenience
pub use compiler::{CodeGenerator, Instruction, OpCode, Operand, Template, TemplateBuilder};
pub use config::VmConfig;
pub use error::{CodegenError, Error, Result, RuntimeErrorKind, VmError};
pub use heap::Heap;
pub use runtime::value::{Oid, Value};
pub use vm::{SharedOutput, Vm};

#[cfg(feature = "async")]
pub use async_engine::AsyncVm;
