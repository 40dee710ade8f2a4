// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Abstract Syntax Tree (AST) definitions.
//!
//! The tree arrives from the front end already type checked: every name is
//! declared, every call matches its callee's arity, and there is exactly
//! one `main` taking no parameters. The code generator only reads it.

/// A complete program.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    /// Struct definitions in declaration order
    pub structs: Vec<StructDef>,
    /// Function definitions in declaration order
    pub functions: Vec<FunDef>,
}

/// A struct definition.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    /// The struct name
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<VarDef>,
}

/// A function definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FunDef {
    /// Declared return type
    pub return_type: DataType,
    /// The function name
    pub name: String,
    /// Parameters in declaration order
    pub params: Vec<VarDef>,
    /// The body
    pub stmts: Vec<Stmt>,
}

/// A typed name: a parameter or struct field.
#[derive(Debug, Clone, PartialEq)]
pub struct VarDef {
    /// The name
    pub name: String,
    /// The declared type
    pub data_type: DataType,
}

/// A declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataType {
    /// Whether this is an array of `type_name`
    pub is_array: bool,
    /// Base type: `int`, `double`, `string`, `bool`, `void` or a struct name
    pub type_name: String,
}

/// Literal token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    /// Integer literal
    Int,
    /// Double literal
    Double,
    /// String literal
    Str,
    /// `true` or `false`
    Bool,
    /// `null`
    Null,
}

/// A literal token: its kind and source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The literal kind
    pub kind: LiteralKind,
    /// The text as written, without quotes for strings
    pub lexeme: String,
}

/// A statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `return expr`
    Return(Expr),
    /// `var name: type = expr`
    Var {
        /// The declared name
        name: String,
        /// The declared type, if written
        data_type: Option<DataType>,
        /// The initializer, if written
        expr: Option<Expr>,
    },
    /// `a.b[i].c = expr`
    Assign {
        /// The target path, never empty
        lvalue: Vec<VarRef>,
        /// The assigned value
        expr: Expr,
    },
    /// `while cond { ... }`
    While {
        /// Loop condition
        condition: Expr,
        /// Loop body
        stmts: Vec<Stmt>,
    },
    /// `for var from a to b { ... }`, inclusive of `b`
    For {
        /// Loop variable
        var: String,
        /// Initial value
        from: Expr,
        /// Last value
        to: Expr,
        /// Loop body
        stmts: Vec<Stmt>,
    },
    /// `if`/`elseif`/`else` chain
    If(IfStmt),
    /// A call whose value is discarded
    Call(CallExpr),
}

/// An `if` statement and its `elseif`/`else` arms.
#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    /// The condition
    pub condition: Expr,
    /// Statements run when the condition holds
    pub stmts: Vec<Stmt>,
    /// Next arm of the chain
    pub else_if: Option<Box<IfStmt>>,
    /// Final `else` arm
    pub else_stmts: Option<Vec<Stmt>>,
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A single r-value
    Basic(RValue),
    /// Unary operator application
    Unary {
        /// The operator
        op: UnaryOp,
        /// The operand
        expr: Box<Expr>,
    },
    /// Binary operator application
    Binary {
        /// Left operand
        lhs: Box<Expr>,
        /// The operator
        op: BinaryOp,
        /// Right operand
        rhs: Box<Expr>,
    },
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `not`
    Not,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Less,
    /// `<=`
    LessEq,
    /// `>`
    Greater,
    /// `>=`
    GreaterEq,
    /// `and`
    And,
    /// `or`
    Or,
}

/// An r-value.
#[derive(Debug, Clone, PartialEq)]
pub enum RValue {
    /// A literal
    Simple(Token),
    /// A function or builtin call
    Call(CallExpr),
    /// `new Name(args...)`
    NewStruct {
        /// The struct name
        name: String,
        /// One initializer per field, in field order
        args: Vec<Expr>,
    },
    /// `new type[len]`
    NewArray {
        /// Element type
        type_name: String,
        /// Array length
        len: Box<Expr>,
    },
    /// A variable path such as `a.b[i].c`
    Var(Vec<VarRef>),
}

/// A call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    /// The callee name
    pub name: String,
    /// Arguments in source order
    pub args: Vec<Expr>,
}

/// One step of a variable path: a name, optionally indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    /// Variable or field name
    pub name: String,
    /// Array index applied after the name
    pub index: Option<Box<Expr>>,
}

// ----------------------------------------------------------------------------
// Construction helpers
// ----------------------------------------------------------------------------

impl DataType {
    /// A scalar or struct type.
    pub fn named(type_name: impl Into<String>) -> Self {
        Self {
            is_array: false,
            type_name: type_name.into(),
        }
    }

    /// An array type.
    pub fn array_of(type_name: impl Into<String>) -> Self {
        Self {
            is_array: true,
            type_name: type_name.into(),
        }
    }
}

impl VarDef {
    /// A typed name.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

impl VarRef {
    /// A plain name.
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index: None,
        }
    }

    /// An indexed name, `name[index]`.
    pub fn indexed(name: impl Into<String>, index: Expr) -> Self {
        Self {
            name: name.into(),
            index: Some(Box::new(index)),
        }
    }
}

impl Expr {
    fn literal(kind: LiteralKind, lexeme: impl Into<String>) -> Self {
        Expr::Basic(RValue::Simple(Token {
            kind,
            lexeme: lexeme.into(),
        }))
    }

    /// An integer literal.
    pub fn int(n: i64) -> Self {
        Self::literal(LiteralKind::Int, n.to_string())
    }

    /// A double literal from its source text.
    pub fn double(lexeme: impl Into<String>) -> Self {
        Self::literal(LiteralKind::Double, lexeme)
    }

    /// A string literal.
    pub fn string(s: impl Into<String>) -> Self {
        Self::literal(LiteralKind::Str, s)
    }

    /// A boolean literal.
    pub fn bool(b: bool) -> Self {
        Self::literal(LiteralKind::Bool, b.to_string())
    }

    /// The `null` literal.
    pub fn null() -> Self {
        Self::literal(LiteralKind::Null, "null")
    }

    /// A single variable.
    pub fn var(name: impl Into<String>) -> Self {
        Expr::Basic(RValue::Var(vec![VarRef::name(name)]))
    }

    /// A variable path.
    pub fn path(path: Vec<VarRef>) -> Self {
        Expr::Basic(RValue::Var(path))
    }

    /// A call.
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Basic(RValue::Call(CallExpr::new(name, args)))
    }

    /// `new Name(args...)`.
    pub fn new_struct(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Basic(RValue::NewStruct {
            name: name.into(),
            args,
        })
    }

    /// `new type[len]`.
    pub fn new_array(type_name: impl Into<String>, len: Expr) -> Self {
        Expr::Basic(RValue::NewArray {
            type_name: type_name.into(),
            len: Box::new(len),
        })
    }

    /// `lhs op rhs`.
    pub fn binary(lhs: Expr, op: BinaryOp, rhs: Expr) -> Self {
        Expr::Binary {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
        }
    }

    /// `not expr`.
    pub fn not(expr: Expr) -> Self {
        Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(expr),
        }
    }
}

impl CallExpr {
    /// A call.
    pub fn new(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

impl Stmt {
    /// `var name = expr` with an inferred type.
    pub fn var(name: impl Into<String>, expr: Expr) -> Self {
        Stmt::Var {
            name: name.into(),
            data_type: None,
            expr: Some(expr),
        }
    }

    /// `var name: type` with no initializer.
    pub fn declare(name: impl Into<String>, data_type: DataType) -> Self {
        Stmt::Var {
            name: name.into(),
            data_type: Some(data_type),
            expr: None,
        }
    }

    /// `name = expr`.
    pub fn assign(name: impl Into<String>, expr: Expr) -> Self {
        Stmt::Assign {
            lvalue: vec![VarRef::name(name)],
            expr,
        }
    }

    /// `path = expr`.
    pub fn assign_path(lvalue: Vec<VarRef>, expr: Expr) -> Self {
        Stmt::Assign { lvalue, expr }
    }

    /// A call statement.
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Stmt::Call(CallExpr::new(name, args))
    }

    /// `while condition { stmts }`.
    pub fn while_loop(condition: Expr, stmts: Vec<Stmt>) -> Self {
        Stmt::While { condition, stmts }
    }

    /// `for var from from to to { stmts }`.
    pub fn for_loop(var: impl Into<String>, from: Expr, to: Expr, stmts: Vec<Stmt>) -> Self {
        Stmt::For {
            var: var.into(),
            from,
            to,
            stmts,
        }
    }
}

impl IfStmt {
    /// An `if` with no further arms.
    pub fn new(condition: Expr, stmts: Vec<Stmt>) -> Self {
        Self {
            condition,
            stmts,
            else_if: None,
            else_stmts: None,
        }
    }

    /// Adds an `elseif` arm at the end of the chain.
    pub fn else_if(mut self, arm: IfStmt) -> Self {
        self.else_if = Some(Box::new(match self.else_if.take() {
            Some(next) => next.else_if(arm),
            None => arm,
        }));
        self
    }

    /// Sets the final `else` arm on the last `if` of the chain.
    pub fn otherwise(mut self, stmts: Vec<Stmt>) -> Self {
        match self.else_if.take() {
            Some(next) => self.else_if = Some(Box::new(next.otherwise(stmts))),
            None => self.else_stmts = Some(stmts),
        }
        self
    }
}

impl From<IfStmt> for Stmt {
    fn from(stmt: IfStmt) -> Self {
        Stmt::If(stmt)
    }
}

impl FunDef {
    /// A function definition.
    pub fn new(
        return_type: DataType,
        name: impl Into<String>,
        params: Vec<VarDef>,
        stmts: Vec<Stmt>,
    ) -> Self {
        Self {
            return_type,
            name: name.into(),
            params,
            stmts,
        }
    }
}

impl StructDef {
    /// A struct definition.
    pub fn new(name: impl Into<String>, fields: Vec<VarDef>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }
}
