// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Code generation from AST to bytecode.
//!
//! Each function becomes one [`Template`]. Struct definitions produce no
//! code; their field order drives struct construction.
//!
//! ## Lowering Overview
//!
//! | Construct | Instructions |
//! |-----------|--------------|
//! | literal | `PUSH(v)` |
//! | `a.b[i]` | `LOAD`, `GETF`, `GETI` left to right |
//! | `x > y` | `y`, `x`, `CMPLT` |
//! | `x >= y` | `y`, `x`, `CMPLE` |
//! | `new S(a, b)` | `ALLOCS`, then `DUP`, arg, `SETF(field)` per field |
//! | `new T[n]` | `n`, `ALLOCA` |
//! | call statement | call, `POP` |
//! | `while` | cond, `JMPF(end)`, body, `JMP(cond)` |
//! | `for` | init, cond `CMPLE`, `JMPF(end)`, body, increment, `JMP(cond)` |
//! | `if` | cond, `JMPF(next)`, body, `JMP(end)`, next arm |
//!
//! Call arguments are pushed last to first, so the first argument is on
//! top when the callee starts. Callees `STORE` their parameters in
//! declaration order.

mod scope;


pub use scope::{Local, VarTable};

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::ast::*;
use crate::compiler::bytecode::{Instruction, OpCode, Template, TemplateBuilder};
use crate::error::CodegenError;
use crate::runtime::value::Value;

/// Lowers a program into one template per function.
#[derive(Debug, Default)]
pub struct CodeGenerator {
    /// Field names of each struct, in declaration order
    structs: FxHashMap<String, Vec<String>>,
}

impl CodeGenerator {
    /// Creates a new code generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a template for every function, in declaration order.
    pub fn generate(&mut self, program: &Program) -> Result<Vec<Template>, CodegenError> {
        self.register_structs(&program.structs);
        program
            .functions
            .iter()
            .map(|fun| self.generate_function(fun))
            .collect()
    }

    /// Like [`generate`](Self::generate), lowering functions on the rayon pool.
    #[cfg(feature = "parallel")]
    pub fn generate_parallel(&mut self, program: &Program) -> Result<Vec<Template>, CodegenError> {
        use rayon::prelude::*;

        self.register_structs(&program.structs);
        let this = &*self;
        program
            .functions
            .par_iter()
            .map(|fun| this.generate_function(fun))
            .collect()
    }

    /// Generates the template for a single function.
    ///
    /// Structs it constructs must already be registered.
    pub fn generate_function(&self, fun: &FunDef) -> Result<Template, CodegenError> {
        let mut generator = FunctionGenerator {
            structs: &self.structs,
            builder: TemplateBuilder::new(fun.name.as_str()),
            vars: VarTable::new(),
        };
        generator.function(fun)?;
        let template = generator.builder.finish()?;
        debug!(
            "Generated '{}': {} instructions, {} slots",
            template.name(),
            template.len(),
            generator.vars.slot_count()
        );
        Ok(template)
    }

    /// Records struct field orders.
    pub fn register_structs(&mut self, structs: &[StructDef]) {
        for def in structs {
            let fields = def.fields.iter().map(|field| field.name.clone()).collect();
            self.structs.insert(def.name.clone(), fields);
        }
    }
}

/// Per-function lowering state.
struct FunctionGenerator<'a> {
    structs: &'a FxHashMap<String, Vec<String>>,
    builder: TemplateBuilder,
    vars: VarTable,
}

impl FunctionGenerator<'_> {
    fn function(&mut self, fun: &FunDef) -> Result<(), CodegenError> {
        self.vars.begin_scope();

        for param in &fun.params {
            let slot = self.vars.declare(&param.name)?;
            self.emit(Instruction::store(slot));
        }

        self.body(&fun.stmts)?;

        if !matches!(fun.stmts.last(), Some(Stmt::Return(_))) {
            self.emit(Instruction::push_null().with_comment("implicit return"));
            self.emit(Instruction::simple(OpCode::Ret));
        }

        self.vars.end_scope();
        Ok(())
    }

    fn body(&mut self, stmts: &[Stmt]) -> Result<(), CodegenError> {
        for stmt in stmts {
            self.statement(stmt)?;
        }
        Ok(())
    }

    fn block(&mut self, stmts: &[Stmt]) -> Result<(), CodegenError> {
        self.vars.begin_scope();
        let result = self.body(stmts);
        self.vars.end_scope();
        result
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn statement(&mut self, stmt: &Stmt) -> Result<(), CodegenError> {
        match stmt {
            Stmt::Return(expr) => {
                self.expression(expr)?;
                self.emit(Instruction::simple(OpCode::Ret));
            }
            Stmt::Var { name, expr, .. } => {
                match expr {
                    Some(expr) => self.expression(expr)?,
                    None => {
                        self.emit(Instruction::push_null());
                    }
                }
                let slot = self.vars.declare(name)?;
                self.emit(Instruction::store(slot));
            }
            Stmt::Assign { lvalue, expr } => self.assignment(lvalue, expr)?,
            Stmt::While { condition, stmts } => self.while_loop(condition, stmts)?,
            Stmt::For {
                var,
                from,
                to,
                stmts,
            } => self.for_loop(var, from, to, stmts)?,
            Stmt::If(if_stmt) => self.if_chain(if_stmt)?,
            Stmt::Call(call) => {
                self.call(call)?;
                self.emit(Instruction::simple(OpCode::Pop).with_comment("discard call result"));
            }
        }
        Ok(())
    }

    fn assignment(&mut self, lvalue: &[VarRef], value: &Expr) -> Result<(), CodegenError> {
        let (first, rest) = lvalue.split_first().ok_or(CodegenError::EmptyPath)?;
        let slot = self.resolve(&first.name)?;

        let Some((last, middle)) = rest.split_last() else {
            match &first.index {
                Some(index) => {
                    self.emit(Instruction::load(slot));
                    self.expression(index)?;
                    self.expression(value)?;
                    self.emit(Instruction::simple(OpCode::SetI));
                }
                None => {
                    self.expression(value)?;
                    self.emit(Instruction::store(slot));
                }
            }
            return Ok(());
        };

        self.emit(Instruction::load(slot));
        self.index(first)?;
        for step in middle {
            self.emit(Instruction::getf(step.name.as_str()));
            self.index(step)?;
        }

        match &last.index {
            Some(index) => {
                self.emit(Instruction::getf(last.name.as_str()));
                self.expression(index)?;
                self.expression(value)?;
                self.emit(Instruction::simple(OpCode::SetI));
            }
            None => {
                self.expression(value)?;
                self.emit(Instruction::setf(last.name.as_str()));
            }
        }
        Ok(())
    }

    fn while_loop(&mut self, condition: &Expr, stmts: &[Stmt]) -> Result<(), CodegenError> {
        let loop_start = self.builder.next_index();
        self.expression(condition)?;
        let exit = self.builder.emit_jump(OpCode::JmpF);

        self.block(stmts)?;

        self.emit(Instruction::jmp(loop_start));
        self.builder.patch_here(exit);
        Ok(())
    }

    fn for_loop(
        &mut self,
        var: &str,
        from: &Expr,
        to: &Expr,
        stmts: &[Stmt],
    ) -> Result<(), CodegenError> {
        // The loop variable lives in its own block around the body
        self.vars.begin_scope();
        self.expression(from)?;
        let slot = self.vars.declare(var)?;
        self.emit(Instruction::store(slot));

        let loop_start = self.builder.next_index();
        self.emit(Instruction::load(slot));
        self.expression(to)?;
        self.emit(Instruction::simple(OpCode::CmpLe));
        let exit = self.builder.emit_jump(OpCode::JmpF);

        self.block(stmts)?;

        self.emit(Instruction::load(slot));
        self.emit(Instruction::push(1));
        self.emit(Instruction::simple(OpCode::Add));
        self.emit(Instruction::store(slot).with_comment(format!("{} += 1", var)));
        self.vars.end_scope();

        self.emit(Instruction::jmp(loop_start));
        self.builder.patch_here(exit);
        Ok(())
    }

    fn if_chain(&mut self, stmt: &IfStmt) -> Result<(), CodegenError> {
        self.expression(&stmt.condition)?;
        let next_arm = self.builder.emit_jump(OpCode::JmpF);

        self.block(&stmt.stmts)?;

        let end = self.builder.emit_jump(OpCode::Jmp);
        self.builder.patch_here(next_arm);

        if let Some(else_if) = &stmt.else_if {
            self.if_chain(else_if)?;
        }
        if let Some(else_stmts) = &stmt.else_stmts {
            self.block(else_stmts)?;
        }

        self.builder.patch_here(end);
        Ok(())
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn expression(&mut self, expr: &Expr) -> Result<(), CodegenError> {
        match expr {
            Expr::Basic(rvalue) => self.rvalue(rvalue),
            Expr::Unary {
                op: UnaryOp::Not,
                expr,
            } => {
                self.expression(expr)?;
                self.emit(Instruction::simple(OpCode::Not));
                Ok(())
            }
            Expr::Binary { lhs, op, rhs } => self.binary(lhs, *op, rhs),
        }
    }

    fn binary(&mut self, lhs: &Expr, op: BinaryOp, rhs: &Expr) -> Result<(), CodegenError> {
        // `>` and `>=` swap their operands and reuse CMPLT/CMPLE
        if matches!(op, BinaryOp::Greater | BinaryOp::GreaterEq) {
            self.expression(rhs)?;
            self.expression(lhs)?;
        } else {
            self.expression(lhs)?;
            self.expression(rhs)?;
        }

        let opcode = match op {
            BinaryOp::Add => OpCode::Add,
            BinaryOp::Sub => OpCode::Sub,
            BinaryOp::Mul => OpCode::Mul,
            BinaryOp::Div => OpCode::Div,
            BinaryOp::Eq => OpCode::CmpEq,
            BinaryOp::NotEq => OpCode::CmpNe,
            BinaryOp::Less | BinaryOp::Greater => OpCode::CmpLt,
            BinaryOp::LessEq | BinaryOp::GreaterEq => OpCode::CmpLe,
            BinaryOp::And => OpCode::And,
            BinaryOp::Or => OpCode::Or,
        };
        self.emit(Instruction::simple(opcode));
        Ok(())
    }

    fn rvalue(&mut self, rvalue: &RValue) -> Result<(), CodegenError> {
        match rvalue {
            RValue::Simple(token) => {
                let value = literal(token)?;
                self.emit(Instruction::push(value));
            }
            RValue::Call(call) => self.call(call)?,
            RValue::NewStruct { name, args } => self.new_struct(name, args)?,
            RValue::NewArray { len, .. } => {
                self.expression(len)?;
                self.emit(Instruction::simple(OpCode::AllocA));
            }
            RValue::Var(path) => self.var_path(path)?,
        }
        Ok(())
    }

    fn call(&mut self, call: &CallExpr) -> Result<(), CodegenError> {
        for arg in call.args.iter().rev() {
            self.expression(arg)?;
        }

        match call.name.as_str() {
            "print" => {
                self.emit(Instruction::simple(OpCode::Write));
                self.emit(Instruction::push_null());
            }
            "println" => {
                self.emit(Instruction::simple(OpCode::Write));
                self.emit(Instruction::push("\n"));
                self.emit(Instruction::simple(OpCode::Write));
                self.emit(Instruction::push_null());
            }
            "readln" => {
                self.emit(Instruction::simple(OpCode::Read));
            }
            "size" => {
                self.emit(Instruction::simple(OpCode::Len));
            }
            "get" => {
                self.emit(Instruction::simple(OpCode::GetC));
            }
            "int_val" => {
                self.emit(Instruction::simple(OpCode::ToInt));
            }
            "dbl_val" => {
                self.emit(Instruction::simple(OpCode::ToDbl));
            }
            "str_val" => {
                self.emit(Instruction::simple(OpCode::ToStr));
            }
            "thread_create" => {
                self.emit(Instruction::simple(OpCode::Thread));
            }
            "thread_wait" => {
                self.emit(Instruction::simple(OpCode::Wait));
            }
            name => {
                self.emit(Instruction::call(name));
            }
        }
        Ok(())
    }

    fn new_struct(&mut self, name: &str, args: &[Expr]) -> Result<(), CodegenError> {
        let fields = self
            .structs
            .get(name)
            .ok_or_else(|| CodegenError::UnknownStruct(name.to_string()))?;
        if fields.len() != args.len() {
            return Err(CodegenError::StructArity {
                name: name.to_string(),
                expected: fields.len(),
                found: args.len(),
            });
        }

        self.emit(Instruction::simple(OpCode::AllocS));
        for (field, arg) in fields.iter().zip(args) {
            self.emit(Instruction::simple(OpCode::Dup));
            self.expression(arg)?;
            self.emit(Instruction::setf(field.as_str()));
        }
        Ok(())
    }

    fn var_path(&mut self, path: &[VarRef]) -> Result<(), CodegenError> {
        let (first, rest) = path.split_first().ok_or(CodegenError::EmptyPath)?;
        let slot = self.resolve(&first.name)?;
        self.emit(Instruction::load(slot));
        self.index(first)?;

        for step in rest {
            self.emit(Instruction::getf(step.name.as_str()));
            self.index(step)?;
        }
        Ok(())
    }

    /// Emits `expr, GETI` when the step is indexed.
    fn index(&mut self, step: &VarRef) -> Result<(), CodegenError> {
        if let Some(index) = &step.index {
            self.expression(index)?;
            self.emit(Instruction::simple(OpCode::GetI));
        }
        Ok(())
    }

    fn resolve(&self, name: &str) -> Result<usize, CodegenError> {
        self.vars
            .resolve(name)
            .ok_or_else(|| CodegenError::UnknownVariable(name.to_string()))
    }

    fn emit(&mut self, instruction: Instruction) -> usize {
        self.builder.emit(instruction)
    }
}

fn literal(token: &Token) -> Result<Value, CodegenError> {
    let invalid = |kind| CodegenError::InvalidLiteral {
        kind,
        lexeme: token.lexeme.clone(),
    };
    match token.kind {
        LiteralKind::Int => token.lexeme.parse().map(Value::Int).map_err(|_| invalid("int")),
        LiteralKind::Double => token
            .lexeme
            .parse()
            .map(Value::Double)
            .map_err(|_| invalid("double")),
        LiteralKind::Str => Ok(Value::Str(token.lexeme.clone())),
        LiteralKind::Bool => match token.lexeme.as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(invalid("bool")),
        },
        LiteralKind::Null => Ok(Value::Null),
    }
}
