// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Bytecode compiler.
//!
//! Lowers a checked syntax tree into one [`Template`] per function.
//!
//! # Module Structure
//!
//! - `bytecode`: Instructions, templates and the jump-patching builder
//! - `codegen`: Code generation from AST
//!   - `codegen::scope`: Scope management for variable resolution

pub mod bytecode;
pub mod codegen;

pub use bytecode::{Instruction, OpCode, Operand, PatchSite, Template, TemplateBuilder};
pub use codegen::CodeGenerator;
