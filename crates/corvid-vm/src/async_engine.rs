// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Async wrappers over the blocking [`Vm`].
//!
//! Execution blocks on OS threads, so every call is moved onto tokio's
//! blocking pool.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use corvid_vm::{AsyncVm, Vm};
//!
//! #[tokio::main]
//! async fn main() {
//!     let vm = Vm::new();
//!     vm.load(&program).unwrap();
//!     let result = AsyncVm::new(Arc::new(vm)).run().await.unwrap();
//!     println!("{}", result);
//! }
//! ```

use std::sync::Arc;

use crate::Error;
use crate::runtime::value::Value;
use crate::vm::Vm;

/// A cloneable async handle to a shared [`Vm`].
#[derive(Clone)]
pub struct AsyncVm {
    vm: Arc<Vm>,
}

impl AsyncVm {
    /// Wraps a VM.
    pub fn new(vm: Arc<Vm>) -> Self {
        Self { vm }
    }

    /// The wrapped VM.
    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }

    /// Runs `main` without blocking the async runtime.
    pub async fn run(&self) -> Result<Value, Error> {
        self.call("main", Vec::new()).await
    }

    /// Calls `function` on the blocking pool.
    pub async fn call(&self, function: &str, args: Vec<Value>) -> Result<Value, Error> {
        let vm = Arc::clone(&self.vm);
        let function = function.to_string();
        tokio::task::spawn_blocking(move || vm.call(&function, args))
            .await
            .map_err(|e| Error::Task(e.to_string()))?
            .map_err(Error::from)
    }

    /// Runs several calls concurrently against the same VM and heap.
    ///
    /// Results are returned in the order of `calls`. Each call waits only on
    /// the threads it spawned, but a fatal error in one call aborts the rest.
    pub async fn call_many(&self, calls: Vec<(String, Vec<Value>)>) -> Vec<Result<Value, Error>> {
        let futures = calls
            .into_iter()
            .map(|(function, args)| async move { self.call(&function, args).await });
        futures::future::join_all(futures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::bytecode::{Instruction, OpCode, TemplateBuilder};
    use crate::config::VmConfig;
    use crate::error::RuntimeErrorKind;
    use crate::vm::SharedOutput;

    fn square_vm() -> Arc<Vm> {
        let vm = Vm::with_io(VmConfig::default(), std::io::empty(), SharedOutput::new());
        let mut square = TemplateBuilder::new("square");
        square.emit(Instruction::store(0));
        square.emit(Instruction::load(0));
        square.emit(Instruction::load(0));
        square.emit(Instruction::simple(OpCode::Mul));
        square.emit(Instruction::simple(OpCode::Ret));
        vm.add(square.finish().unwrap());

        let mut main = TemplateBuilder::new("main");
        main.emit(Instruction::push(7));
        main.emit(Instruction::call("square"));
        main.emit(Instruction::simple(OpCode::Ret));
        vm.add(main.finish().unwrap());
        Arc::new(vm)
    }

    #[tokio::test]
    async fn test_async_run() {
        let vm = AsyncVm::new(square_vm());
        assert_eq!(vm.run().await.unwrap(), Value::Int(49));
    }

    #[tokio::test]
    async fn test_async_call_many_in_order() {
        let vm = AsyncVm::new(square_vm());
        let results = vm
            .call_many(vec![
                ("square".to_string(), vec![Value::Int(2)]),
                ("square".to_string(), vec![Value::Int(3)]),
                ("square".to_string(), vec![Value::Int(4)]),
            ])
            .await;
        let values: Vec<Value> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![Value::Int(4), Value::Int(9), Value::Int(16)]);
    }

    #[tokio::test]
    async fn test_async_error_propagates() {
        let vm = AsyncVm::new(square_vm());
        match vm.call("missing", vec![]).await {
            Err(Error::Runtime(err)) => {
                assert_eq!(err.kind, RuntimeErrorKind::UnknownFunction("missing".into()))
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
    }
}
