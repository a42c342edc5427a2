//! Concrete syntax tree produced by the parser (spec §4.2, §6.1).

use crate::expr::Expr;
use std::time::Duration;

/// `create`/`delete` conflict policy (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatePolicy {
    Strict,
    OrReplace,
    IfNotExists,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Command(Command),
    Pipeline(Pipeline),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateStream {
        name: String,
        policy: CreatePolicy,
    },
    CreateFlow {
        name: String,
        policy: CreatePolicy,
        ttl: Option<Duration>,
        pipeline: Pipeline,
    },
    DeleteStream {
        name: String,
    },
    DeleteFlow {
        name: String,
    },
    Insert {
        stream: String,
        value: Expr,
    },
    Flush {
        stream: String,
    },
    ListStreams,
    ListFlows,
    Info {
        name: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub source: String,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Where(Expr),
    /// `select`/`project` share one CST node; the parser records which
    /// keyword was written only for error messages, lowering treats them
    /// identically (spec §4.3).
    Select(Vec<crate::expr::ObjectProp>),
    Scan(Vec<ScanStep>),
    Summarize {
        aggregates: Vec<crate::expr::ObjectProp>,
        by: Option<Vec<Expr>>,
        window: Option<WindowCall>,
        emit: Option<EmitClause>,
    },
    InsertInto(String),
    Collect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanStep {
    pub name: String,
    pub condition: Expr,
    pub body: Vec<ScanStmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanStmt {
    Assign { lvalue: LValue, value: Expr },
    Emit(Expr),
}

/// The left side of a scan-step assignment: `state.stepName.var = expr` or
/// a row-local `var = expr` (spec §4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum LValue {
    StateField { step: String, var: String },
    Local(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowCall {
    pub var_name: String,
    pub function: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmitClause {
    Every { amount: Expr, using: Option<Expr> },
    When(Expr),
    OnChange(Expr),
    OnGroupChange,
    OnUpdate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
}
