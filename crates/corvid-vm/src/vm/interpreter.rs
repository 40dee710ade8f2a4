// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The bytecode interpreter.

use std::fmt;
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, error, info, trace, warn};

use super::io::Io;
use super::ops;
use super::threads::ThreadTable;
use crate::ast::Program;
use crate::compiler::bytecode::{Instruction, OpCode, Operand, Template};
use crate::compiler::codegen::CodeGenerator;
use crate::config::VmConfig;
use crate::error::{CodegenError, ErrorLocation, RuntimeErrorKind, VmError};
use crate::heap::Heap;
use crate::runtime::frame::Frame;
use crate::runtime::value::{Oid, Value};

/// State shared by the main execution and every spawned thread.
pub(crate) struct VmState {
    templates: RwLock<FxHashMap<String, Arc<Template>>>,
    pub(crate) heap: Heap,
    pub(crate) threads: ThreadTable,
    pub(crate) io: Io,
    pub(crate) config: VmConfig,
    halted: AtomicBool,
    failure: Mutex<Option<VmError>>,
}

impl VmState {
    fn template(&self, name: &str) -> Result<Arc<Template>, RuntimeErrorKind> {
        self.templates
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeErrorKind::UnknownFunction(name.to_string()))
    }

    /// Records a fatal error and halts every execution. The first error wins.
    pub(crate) fn fail(&self, err: &VmError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            error!("{}", err);
            *failure = Some(err.clone());
        }
        self.halted.store(true, Ordering::Release);
    }

    /// Joins the threads of one entry call, recording any that panicked.
    fn join_group(&self, group: u64) {
        for tid in self.threads.join_all(group) {
            self.fail(&VmError::new(RuntimeErrorKind::ThreadPanicked(tid)).in_thread(Some(tid)));
        }
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    fn take_failure(&self) -> Option<VmError> {
        let failure = self.failure.lock().take();
        self.halted.store(false, Ordering::Release);
        failure
    }
}

/// The virtual machine.
///
/// Owns the function table, the heap and the thread table. Units are
/// registered with [`add`](Vm::add) or [`load`](Vm::load) and run with
/// [`run`](Vm::run) or [`call`](Vm::call).
///
/// # Examples
///
/// ```rust,ignore
/// let vm = Vm::new();
/// vm.load(&program)?;
/// vm.run()?;
/// ```
pub struct Vm {
    state: Arc<VmState>,
}

impl Vm {
    /// Creates a VM reading stdin and writing stdout.
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    /// Creates a VM with the given configuration on stdin and stdout.
    pub fn with_config(config: VmConfig) -> Self {
        Self::from_parts(config, Io::stdio())
    }

    /// Creates a VM with custom input and output.
    pub fn with_io(
        config: VmConfig,
        input: impl BufRead + Send + 'static,
        output: impl Write + Send + 'static,
    ) -> Self {
        Self::from_parts(config, Io::new(input, output))
    }

    fn from_parts(config: VmConfig, io: Io) -> Self {
        Self {
            state: Arc::new(VmState {
                templates: RwLock::new(FxHashMap::default()),
                heap: Heap::with_max_array_len(config.max_array_len),
                threads: ThreadTable::new(),
                io,
                config,
                halted: AtomicBool::new(false),
                failure: Mutex::new(None),
            }),
        }
    }

    /// Registers a unit, replacing any unit of the same name.
    pub fn add(&self, template: Template) {
        debug!("Registered '{}' ({} instructions)", template.name(), template.len());
        self.state
            .templates
            .write()
            .insert(template.name().to_string(), Arc::new(template));
    }

    /// Generates and registers every function of a program.
    pub fn load(&self, program: &Program) -> Result<(), CodegenError> {
        for template in CodeGenerator::new().generate(program)? {
            self.add(template);
        }
        Ok(())
    }

    /// Looks up a registered unit.
    pub fn template(&self, name: &str) -> Option<Arc<Template>> {
        self.state.templates.read().get(name).cloned()
    }

    /// The shared heap.
    pub fn heap(&self) -> &Heap {
        &self.state.heap
    }

    /// The configuration this VM was built with.
    pub fn config(&self) -> &VmConfig {
        &self.state.config
    }

    /// Number of threads spawned so far.
    pub fn thread_count(&self) -> usize {
        self.state.threads.len()
    }

    /// Runs `main`.
    pub fn run(&self) -> Result<Value, VmError> {
        self.call("main", Vec::new())
    }

    /// Runs `function` with `args`, returning its result.
    ///
    /// Arguments are placed so the callee's parameter stores receive them
    /// in order. Returns once every thread spawned during this call has
    /// finished. The first error raised by any execution is returned.
    ///
    /// Concurrent calls share the heap and the halt flag: a fatal error in
    /// one call aborts the others.
    pub fn call(&self, function: &str, args: Vec<Value>) -> Result<Value, VmError> {
        info!("Running '{}'", function);
        let group = self.state.threads.new_group();
        let result = self
            .state
            .template(function)
            .map_err(VmError::from)
            .and_then(|template| {
                Execution::new(Arc::clone(&self.state), None, group).run(template, args)
            });
        if let Err(err) = &result {
            self.state.fail(err);
        }

        self.state.join_group(group);
        if let Err(kind) = self.state.io.flush() {
            self.state.fail(&kind.into());
        }

        match self.state.take_failure() {
            Some(err) => Err(err),
            None => {
                info!("Finished '{}'", function);
                result
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Vm {
    /// Prints every unit, sorted by name.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let templates = self.state.templates.read();
        let mut names: Vec<&String> = templates.keys().collect();
        names.sort();
        for name in names {
            writeln!(f)?;
            write!(f, "{}", templates[name])?;
        }
        Ok(())
    }
}

/// One thread of execution: a private operand stack and call stack.
pub(crate) struct Execution {
    state: Arc<VmState>,
    thread: Option<i64>,
    group: u64,
    operands: Vec<Value>,
    frames: Vec<Frame>,
}

impl Execution {
    pub(crate) fn new(state: Arc<VmState>, thread: Option<i64>, group: u64) -> Self {
        let operands = Vec::with_capacity(state.config.operand_stack_capacity);
        let frames = Vec::with_capacity(state.config.call_stack_capacity);
        Self {
            state,
            thread,
            group,
            operands,
            frames,
        }
    }

    /// Runs `template` to completion with `args` seeded on the operand
    /// stack, first argument on top.
    pub(crate) fn run(mut self, template: Arc<Template>, args: Vec<Value>) -> Result<Value, VmError> {
        self.operands.extend(args.into_iter().rev());
        self.frames.push(Frame::new(template));
        self.run_loop().map_err(|err| err.in_thread(self.thread))
    }

    fn run_loop(&mut self) -> Result<Value, VmError> {
        while let Some(frame) = self.frames.last_mut() {
            let template = Arc::clone(&frame.template);
            let pc = frame.pc;
            let Some(instruction) = template.get(pc) else {
                // Falling off the end of any frame ends the execution
                if self.frames.len() > 1 {
                    warn!("'{}' ran past its last instruction", template.name());
                }
                break;
            };
            frame.pc += 1;

            let located = |err: VmError| {
                err.at(ErrorLocation {
                    function: template.name().to_string(),
                    index: pc,
                    instruction: instruction.to_string(),
                })
            };

            if self.state.is_halted() {
                return Err(located(RuntimeErrorKind::Aborted.into()));
            }
            if self.state.config.trace {
                trace!(
                    "{} {}: {} [top: {:?}]",
                    template.name(),
                    pc,
                    instruction,
                    self.operands.last()
                );
            }

            self.execute(instruction).map_err(located)?;
        }

        Ok(self.operands.pop().unwrap_or_default())
    }

    fn execute(&mut self, instruction: &Instruction) -> Result<(), VmError> {
        let opcode = instruction.opcode;
        match opcode {
            // ----------------------------------------------------------------
            // Literals and variables
            // ----------------------------------------------------------------
            OpCode::Push => match &instruction.operand {
                Some(Operand::Literal(value)) => self.push(value.clone()),
                _ => return Err(RuntimeErrorKind::MalformedInstruction.into()),
            },
            OpCode::Pop => {
                self.pop()?;
            }
            OpCode::Load => {
                let slot = slot(instruction)?;
                let value = self.frame()?.load(slot)?;
                self.push(value);
            }
            OpCode::Store => {
                let slot = slot(instruction)?;
                let value = self.pop()?;
                let limit = self.state.config.max_frame_slots;
                self.frame_mut()?.store(slot, value, limit)?;
            }

            // ----------------------------------------------------------------
            // Arithmetic, relational and logical
            // ----------------------------------------------------------------
            OpCode::Add => self.binary(ops::add)?,
            OpCode::Sub => self.binary(ops::sub)?,
            OpCode::Mul => self.binary(ops::mul)?,
            OpCode::Div => self.binary(ops::div)?,
            OpCode::CmpLt => self.binary(|lhs, rhs| ops::less(&lhs, &rhs).map(Value::Bool))?,
            OpCode::CmpLe => self.binary(|lhs, rhs| ops::less_eq(&lhs, &rhs).map(Value::Bool))?,
            OpCode::CmpEq => self.binary(|lhs, rhs| Ok(Value::Bool(lhs == rhs)))?,
            OpCode::CmpNe => self.binary(|lhs, rhs| Ok(Value::Bool(lhs != rhs)))?,
            OpCode::And | OpCode::Or => {
                self.binary(|lhs, rhs| ops::logical(opcode, &lhs, &rhs).map(Value::Bool))?
            }
            OpCode::Not => {
                let value = self.pop()?;
                let b = value.as_bool().ok_or(RuntimeErrorKind::NonBoolean(opcode))?;
                self.push(Value::Bool(!b));
            }

            // ----------------------------------------------------------------
            // Jumps
            // ----------------------------------------------------------------
            OpCode::Jmp => {
                let target = target(instruction)?;
                self.frame_mut()?.pc = target;
            }
            OpCode::JmpF => {
                let target = target(instruction)?;
                let condition = self.pop()?;
                match condition.as_bool() {
                    Some(true) => {}
                    Some(false) => self.frame_mut()?.pc = target,
                    None => return Err(RuntimeErrorKind::NonBoolean(opcode).into()),
                }
            }

            // ----------------------------------------------------------------
            // Functions
            // ----------------------------------------------------------------
            OpCode::Call => {
                let template = self.state.template(name(instruction)?)?;
                let limit = self.state.config.max_call_depth;
                if self.frames.len() >= limit {
                    return Err(RuntimeErrorKind::CallDepthExceeded(limit).into());
                }
                self.frames.push(Frame::new(template));
            }
            OpCode::Ret => {
                self.frames.pop();
            }

            // ----------------------------------------------------------------
            // Built-ins
            // ----------------------------------------------------------------
            OpCode::Write => {
                let value = self.pop()?;
                self.state.io.write(&value)?;
            }
            OpCode::Read => {
                let line = self.state.io.read_line()?;
                self.push(line.map_or(Value::Null, Value::Str));
            }
            OpCode::Len => {
                let len = match self.pop()? {
                    Value::Null => return Err(RuntimeErrorKind::NullOperand(opcode).into()),
                    Value::Str(s) => s.chars().count(),
                    Value::Ref(oid) => self.state.heap.array_len(oid)?,
                    other => {
                        return Err(RuntimeErrorKind::TypeMismatch {
                            op: opcode,
                            found: other.type_name(),
                        }
                        .into());
                    }
                };
                self.push(Value::Int(len as i64));
            }
            OpCode::GetC => self.binary(|s, index| ops::char_at(&s, &index))?,
            OpCode::ToInt => self.unary(ops::to_int)?,
            OpCode::ToDbl => self.unary(ops::to_dbl)?,
            OpCode::ToStr => self.unary(ops::to_str)?,

            // ----------------------------------------------------------------
            // Heap
            // ----------------------------------------------------------------
            OpCode::AllocS => {
                let oid = self.state.heap.alloc_struct();
                self.push(Value::Ref(oid));
            }
            OpCode::SetF => {
                let value = self.pop()?;
                let oid = reference(self.pop()?, opcode)?;
                self.state.heap.set_field(oid, name(instruction)?, value)?;
            }
            OpCode::GetF => {
                let oid = reference(self.pop()?, opcode)?;
                let value = self.state.heap.get_field(oid, name(instruction)?)?;
                self.push(value);
            }
            OpCode::AllocA => {
                let len = match self.pop()? {
                    Value::Null => return Err(RuntimeErrorKind::NullOperand(opcode).into()),
                    Value::Int(len) => len,
                    other => {
                        return Err(RuntimeErrorKind::TypeMismatch {
                            op: opcode,
                            found: other.type_name(),
                        }
                        .into());
                    }
                };
                let oid = self.state.heap.alloc_array(len)?;
                self.push(Value::Ref(oid));
            }
            OpCode::SetI => {
                let value = self.pop()?;
                let index = self.pop()?;
                let oid = reference(self.pop()?, opcode)?;
                self.state.heap.set_index(oid, int(index, opcode)?, value)?;
            }
            OpCode::GetI => {
                let index = self.pop()?;
                let oid = reference(self.pop()?, opcode)?;
                let value = self.state.heap.get_index(oid, int(index, opcode)?)?;
                self.push(value);
            }

            // ----------------------------------------------------------------
            // Threads
            // ----------------------------------------------------------------
            OpCode::Thread => {
                let function = match self.pop()? {
                    Value::Str(function) => function,
                    Value::Null => return Err(RuntimeErrorKind::NullOperand(opcode).into()),
                    other => {
                        return Err(RuntimeErrorKind::TypeMismatch {
                            op: opcode,
                            found: other.type_name(),
                        }
                        .into());
                    }
                };
                let arg = self.pop()?;
                let template = self.state.template(&function)?;
                let tid = self.state.threads.spawn(&self.state, template, arg, self.group)?;
                self.push(Value::Int(tid));
            }
            OpCode::Wait => {
                let tid = match self.pop()? {
                    Value::Int(tid) => tid,
                    Value::Null => return Err(RuntimeErrorKind::NullOperand(opcode).into()),
                    other => {
                        return Err(RuntimeErrorKind::TypeMismatch {
                            op: opcode,
                            found: other.type_name(),
                        }
                        .into());
                    }
                };
                let value = self.state.threads.join(tid)?;
                self.push(value);
            }

            // ----------------------------------------------------------------
            // Special
            // ----------------------------------------------------------------
            OpCode::Dup => {
                let value = self
                    .operands
                    .last()
                    .cloned()
                    .ok_or(RuntimeErrorKind::StackUnderflow)?;
                self.push(value);
            }
            OpCode::Nop => {}
        }
        Ok(())
    }

    #[inline]
    fn push(&mut self, value: Value) {
        self.operands.push(value);
    }

    #[inline]
    fn pop(&mut self) -> Result<Value, RuntimeErrorKind> {
        self.operands.pop().ok_or(RuntimeErrorKind::StackUnderflow)
    }

    /// Pops `rhs` then `lhs` and pushes `op(lhs, rhs)`.
    fn binary(
        &mut self,
        op: impl FnOnce(Value, Value) -> Result<Value, RuntimeErrorKind>,
    ) -> Result<(), RuntimeErrorKind> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = op(lhs, rhs)?;
        self.push(result);
        Ok(())
    }

    fn unary(
        &mut self,
        op: impl FnOnce(Value) -> Result<Value, RuntimeErrorKind>,
    ) -> Result<(), RuntimeErrorKind> {
        let value = self.pop()?;
        let result = op(value)?;
        self.push(result);
        Ok(())
    }

    fn frame(&self) -> Result<&Frame, RuntimeErrorKind> {
        self.frames.last().ok_or(RuntimeErrorKind::StackUnderflow)
    }

    fn frame_mut(&mut self) -> Result<&mut Frame, RuntimeErrorKind> {
        self.frames.last_mut().ok_or(RuntimeErrorKind::StackUnderflow)
    }
}

fn slot(instruction: &Instruction) -> Result<usize, RuntimeErrorKind> {
    match instruction.operand {
        Some(Operand::Slot(slot)) => Ok(slot),
        _ => Err(RuntimeErrorKind::MalformedInstruction),
    }
}

fn target(instruction: &Instruction) -> Result<usize, RuntimeErrorKind> {
    match instruction.operand {
        Some(Operand::Target(target)) => Ok(target),
        _ => Err(RuntimeErrorKind::MalformedInstruction),
    }
}

fn name(instruction: &Instruction) -> Result<&str, RuntimeErrorKind> {
    match &instruction.operand {
        Some(Operand::Name(name)) => Ok(name),
        _ => Err(RuntimeErrorKind::MalformedInstruction),
    }
}

/// Unwraps an object reference operand of a heap instruction.
fn reference(value: Value, op: OpCode) -> Result<Oid, RuntimeErrorKind> {
    match value {
        Value::Ref(oid) => Ok(oid),
        Value::Null => Err(RuntimeErrorKind::NullDereference(op)),
        other => Err(RuntimeErrorKind::TypeMismatch {
            op,
            found: other.type_name(),
        }),
    }
}

/// Unwraps an array index operand.
fn int(value: Value, op: OpCode) -> Result<i64, RuntimeErrorKind> {
    match value {
        Value::Int(n) => Ok(n),
        Value::Null => Err(RuntimeErrorKind::NullDereference(op)),
        other => Err(RuntimeErrorKind::TypeMismatch {
            op,
            found: other.type_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::bytecode::TemplateBuilder;
    use crate::vm::io::SharedOutput;

    fn vm_with_output() -> (Vm, SharedOutput) {
        let out = SharedOutput::new();
        let vm = Vm::with_io(VmConfig::default(), std::io::empty(), out.clone());
        (vm, out)
    }

    fn unit(name: &str, instructions: Vec<Instruction>) -> Template {
        let mut builder = TemplateBuilder::new(name);
        for instruction in instructions {
            builder.emit(instruction);
        }
        builder.finish().unwrap()
    }

    fn run_main(instructions: Vec<Instruction>) -> (Result<Value, VmError>, String) {
        let (vm, out) = vm_with_output();
        vm.add(unit("main", instructions));
        let result = vm.run();
        (result, out.contents())
    }

    fn simple(opcode: OpCode) -> Instruction {
        Instruction::simple(opcode)
    }

    #[test]
    fn test_push_write() {
        let (result, out) = run_main(vec![
            Instruction::push(5),
            simple(OpCode::Write),
            Instruction::push_null(),
            simple(OpCode::Ret),
        ]);
        assert_eq!(result, Ok(Value::Null));
        assert_eq!(out, "5");
    }

    #[test]
    fn test_arithmetic_operand_order() {
        let (result, _) = run_main(vec![
            Instruction::push(10),
            Instruction::push(4),
            simple(OpCode::Sub),
            Instruction::push(2),
            simple(OpCode::Div),
            simple(OpCode::Ret),
        ]);
        assert_eq!(result, Ok(Value::Int(3)));
    }

    #[test]
    fn test_store_load_round_trip() {
        let (result, _) = run_main(vec![
            Instruction::push("x"),
            Instruction::store(2),
            Instruction::load(2),
            simple(OpCode::Ret),
        ]);
        assert_eq!(result, Ok(Value::from("x")));
    }

    #[test]
    fn test_load_unstored_slot_fails() {
        let (result, _) = run_main(vec![Instruction::load(0), simple(OpCode::Ret)]);
        let err = result.unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::UninitializedSlot(0));
        assert_eq!(err.to_string(), "VM_ERROR: read of uninitialized slot 0 in main at 0: LOAD(0)");
    }

    #[test]
    fn test_store_past_frame_limit_fails() {
        let out = SharedOutput::new();
        let vm = Vm::with_io(
            VmConfig::default().with_max_frame_slots(4),
            std::io::empty(),
            out,
        );
        vm.add(unit("main", vec![Instruction::push(1), Instruction::store(4)]));
        assert_eq!(vm.run().unwrap_err().kind, RuntimeErrorKind::InvalidStoreIndex(4));
    }

    #[test]
    fn test_division_by_zero_located() {
        let (result, _) = run_main(vec![
            Instruction::push(1),
            Instruction::push(0),
            simple(OpCode::Div),
            simple(OpCode::Ret),
        ]);
        let err = result.unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::DivisionByZero);
        let location = err.location.unwrap();
        assert_eq!(location.function, "main");
        assert_eq!(location.index, 2);
        assert_eq!(location.instruction, "DIV()");
    }

    #[test]
    fn test_jmpf_requires_boolean() {
        let (result, _) = run_main(vec![
            Instruction::push(1),
            Instruction::with_operand(OpCode::JmpF, Operand::Target(0)),
        ]);
        assert_eq!(
            result.unwrap_err().kind,
            RuntimeErrorKind::NonBoolean(OpCode::JmpF)
        );
    }

    #[test]
    fn test_equality_and_null() {
        let (result, _) = run_main(vec![
            Instruction::push_null(),
            Instruction::push_null(),
            simple(OpCode::CmpEq),
            Instruction::push(1),
            Instruction::push_null(),
            simple(OpCode::CmpNe),
            simple(OpCode::And),
            simple(OpCode::Ret),
        ]);
        assert_eq!(result, Ok(Value::Bool(true)));
    }

    #[test]
    fn test_call_and_return() {
        let (vm, out) = vm_with_output();
        // int sub(int a, int b) { return a - b }
        vm.add(unit(
            "sub",
            vec![
                Instruction::store(0),
                Instruction::store(1),
                Instruction::load(0),
                Instruction::load(1),
                simple(OpCode::Sub),
                simple(OpCode::Ret),
            ],
        ));
        vm.add(unit(
            "main",
            vec![
                Instruction::push(3),
                Instruction::push(10),
                Instruction::call("sub"),
                simple(OpCode::Write),
                Instruction::push_null(),
                simple(OpCode::Ret),
            ],
        ));
        vm.run().unwrap();
        assert_eq!(out.contents(), "7");
        assert_eq!(vm.call("sub", vec![Value::Int(9), Value::Int(4)]), Ok(Value::Int(5)));
    }

    #[test]
    fn test_unknown_function() {
        let (result, _) = run_main(vec![Instruction::call("nope"), simple(OpCode::Ret)]);
        assert_eq!(
            result.unwrap_err().kind,
            RuntimeErrorKind::UnknownFunction("nope".into())
        );

        let (vm, _) = vm_with_output();
        assert_eq!(
            vm.run().unwrap_err().to_string(),
            "VM_ERROR: no function named 'main'"
        );
    }

    #[test]
    fn test_call_depth_limit() {
        let vm = Vm::with_io(
            VmConfig::default().with_max_call_depth(16),
            std::io::empty(),
            SharedOutput::new(),
        );
        vm.add(unit("main", vec![Instruction::call("main"), simple(OpCode::Ret)]));
        assert_eq!(
            vm.run().unwrap_err().kind,
            RuntimeErrorKind::CallDepthExceeded(16)
        );
    }

    #[test]
    fn test_heap_instructions() {
        let (result, _) = run_main(vec![
            simple(OpCode::AllocS),
            Instruction::store(0),
            Instruction::load(0),
            Instruction::push(4),
            Instruction::setf("x"),
            Instruction::push(2),
            simple(OpCode::AllocA),
            Instruction::store(1),
            Instruction::load(1),
            Instruction::push(1),
            Instruction::load(0),
            Instruction::getf("x"),
            simple(OpCode::SetI),
            Instruction::load(1),
            Instruction::push(1),
            simple(OpCode::GetI),
            simple(OpCode::Ret),
        ]);
        assert_eq!(result, Ok(Value::Int(4)));
    }

    #[test]
    fn test_getf_null_reference() {
        let (result, _) = run_main(vec![Instruction::push_null(), Instruction::getf("x")]);
        assert_eq!(
            result.unwrap_err().kind,
            RuntimeErrorKind::NullDereference(OpCode::GetF)
        );
    }

    #[test]
    fn test_alloca_negative_length() {
        let (result, _) = run_main(vec![Instruction::push(-1), simple(OpCode::AllocA)]);
        assert_eq!(result.unwrap_err().kind, RuntimeErrorKind::NegativeLength(-1));
    }

    #[test]
    fn test_len_string_and_array() {
        let (result, _) = run_main(vec![
            Instruction::push("hello"),
            simple(OpCode::Len),
            Instruction::push(3),
            simple(OpCode::AllocA),
            simple(OpCode::Len),
            simple(OpCode::Add),
            simple(OpCode::Ret),
        ]);
        assert_eq!(result, Ok(Value::Int(8)));
    }

    #[test]
    fn test_read_input() {
        let out = SharedOutput::new();
        let vm = Vm::with_io(VmConfig::default(), std::io::Cursor::new("41\n"), out);
        vm.add(unit(
            "main",
            vec![
                simple(OpCode::Read),
                simple(OpCode::ToInt),
                Instruction::push(1),
                simple(OpCode::Add),
                simple(OpCode::Read),
                simple(OpCode::Pop),
                simple(OpCode::Ret),
            ],
        ));
        assert_eq!(vm.run(), Ok(Value::Int(42)));
    }

    #[test]
    fn test_dup_and_nop() {
        let (result, _) = run_main(vec![
            Instruction::push(6),
            simple(OpCode::Nop),
            simple(OpCode::Dup),
            simple(OpCode::Mul),
            simple(OpCode::Ret),
        ]);
        assert_eq!(result, Ok(Value::Int(36)));
    }

    #[test]
    fn test_pop_empty_stack() {
        let (result, _) = run_main(vec![simple(OpCode::Pop)]);
        assert_eq!(result.unwrap_err().kind, RuntimeErrorKind::StackUnderflow);
    }

    #[test]
    fn test_running_off_the_end_returns_top() {
        let (result, _) = run_main(vec![Instruction::push(8)]);
        assert_eq!(result, Ok(Value::Int(8)));
    }

    #[test]
    fn test_nested_frame_off_the_end_stops_execution() {
        let (vm, out) = vm_with_output();
        vm.add(unit("five", vec![Instruction::push(5)]));
        vm.add(unit(
            "main",
            vec![
                Instruction::call("five"),
                Instruction::push("after"),
                simple(OpCode::Write),
                Instruction::push_null(),
                simple(OpCode::Ret),
            ],
        ));
        assert_eq!(vm.run(), Ok(Value::Int(5)));
        assert_eq!(out.contents(), "");
    }

    #[test]
    fn test_huge_array_is_a_located_error() {
        let (result, _) = run_main(vec![
            Instruction::push(i64::MAX),
            simple(OpCode::AllocA),
            simple(OpCode::Ret),
        ]);
        let err = result.unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::ArrayTooLarge(i64::MAX));
        assert_eq!(err.location.map(|l| l.index), Some(1));
    }

    #[test]
    fn test_array_limit_follows_config() {
        let vm = Vm::with_io(
            VmConfig::default().with_max_array_len(10),
            std::io::empty(),
            SharedOutput::new(),
        );
        vm.add(unit(
            "main",
            vec![Instruction::push(11), simple(OpCode::AllocA), simple(OpCode::Ret)],
        ));
        assert_eq!(vm.run().unwrap_err().kind, RuntimeErrorKind::ArrayTooLarge(11));
        assert_eq!(vm.heap().array_count(), 0);
    }

    #[test]
    fn test_panicked_thread_is_recorded_as_failure() {
        let (vm, _) = vm_with_output();
        let group = vm.state.threads.new_group();
        let tid = vm
            .state
            .threads
            .adopt(group, std::thread::spawn(|| panic!("thread body failed")));
        vm.state.join_group(group);

        let err = vm.state.take_failure().unwrap();
        assert_eq!(err.kind, RuntimeErrorKind::ThreadPanicked(tid));
        assert_eq!(err.thread, Some(tid));
    }

    #[test]
    fn test_thread_and_wait() {
        let (vm, _) = vm_with_output();
        vm.add(unit(
            "double",
            vec![
                Instruction::store(0),
                Instruction::load(0),
                Instruction::load(0),
                simple(OpCode::Add),
                simple(OpCode::Ret),
            ],
        ));
        vm.add(unit(
            "main",
            vec![
                Instruction::push(21),
                Instruction::push("double"),
                simple(OpCode::Thread),
                simple(OpCode::Wait),
                simple(OpCode::Ret),
            ],
        ));
        assert_eq!(vm.run(), Ok(Value::Int(42)));
        assert_eq!(vm.thread_count(), 1);
    }

    #[test]
    fn test_wait_twice_fails() {
        let (vm, _) = vm_with_output();
        vm.add(unit("noop", vec![simple(OpCode::Ret)]));
        vm.add(unit(
            "main",
            vec![
                Instruction::push_null(),
                Instruction::push("noop"),
                simple(OpCode::Thread),
                simple(OpCode::Dup),
                simple(OpCode::Wait),
                simple(OpCode::Pop),
                simple(OpCode::Wait),
                simple(OpCode::Ret),
            ],
        ));
        let err = vm.run().unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::AlreadyJoined(2025));
    }

    #[test]
    fn test_wait_unknown_thread() {
        let (result, _) = run_main(vec![Instruction::push(7), simple(OpCode::Wait)]);
        assert_eq!(result.unwrap_err().kind, RuntimeErrorKind::UnknownThread(7));
    }

    #[test]
    fn test_thread_error_is_fatal() {
        let (vm, _) = vm_with_output();
        vm.add(unit(
            "boom",
            vec![
                simple(OpCode::Pop),
                Instruction::push(1),
                Instruction::push(0),
                simple(OpCode::Div),
                simple(OpCode::Ret),
            ],
        ));
        vm.add(unit(
            "main",
            vec![
                Instruction::push_null(),
                Instruction::push("boom"),
                simple(OpCode::Thread),
                simple(OpCode::Pop),
                Instruction::push_null(),
                simple(OpCode::Ret),
            ],
        ));
        let err = vm.run().unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::DivisionByZero);
        assert_eq!(err.thread, Some(2025));
        assert!(err.to_string().starts_with("VM_ERROR: division by zero in boom at 3"));

        // The failure is consumed; the VM can run again
        vm.add(unit("main", vec![Instruction::push(1), simple(OpCode::Ret)]));
        assert_eq!(vm.run(), Ok(Value::Int(1)));
    }

    #[test]
    fn test_display_sorted_by_name() {
        let (vm, _) = vm_with_output();
        vm.add(unit("main", vec![Instruction::push_null(), simple(OpCode::Ret)]));
        vm.add(unit("a", vec![simple(OpCode::Ret)]));
        assert_eq!(
            vm.to_string(),
            "\nFrame 'a'\n  0: RET()\n\nFrame 'main'\n  0: PUSH(null)\n  1: RET()\n"
        );
    }
}
