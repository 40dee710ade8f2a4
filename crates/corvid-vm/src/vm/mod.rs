// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The bytecode virtual machine.
//!
//! ## Structure
//!
//! - `interpreter` - The [`Vm`] and the per-thread execution loop
//! - `ops` - Arithmetic, comparison and conversion on values
//! - `io` - Line input and text output
//! - `threads` - Spawning and joining `THREAD` executions

mod interpreter;
mod io;
pub mod ops;
mod threads;

pub use interpreter::Vm;
pub use io::SharedOutput;
pub use threads::FIRST_TID;
