// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed AST produced by the parser.
//!
//! Spans stay inline here (the AST is internal to compilation); the IR
//! carries positions in a side table instead.

use crate::token::Location;

/// Source span of a construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: Location,
    pub end: Location,
}

impl Span {
    pub fn new(start: Location, end: Location) -> Self {
        Self { start, end }
    }

    pub fn at(start: Location) -> Self {
        Self { start, end: start }
    }
}

/// A parsed spell file.
#[derive(Debug, Clone, PartialEq)]
pub struct Spell {
    pub name: String,
    pub sections: Vec<Section>,
    pub triggers: Vec<TriggerDecl>,
    pub imports: Vec<ImportDecl>,
    pub blocks: Vec<BlockDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub path: String,
    pub alias: Option<String>,
    pub span: Span,
}

/// A parameterised, inlineable statement template.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Version,
    Description,
    Assets,
    Params,
    Limits,
    Venues,
    State,
    Skills,
    Advisors,
    Guards,
}

impl SectionKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            SectionKind::Version => "version",
            SectionKind::Description => "description",
            SectionKind::Assets => "assets",
            SectionKind::Params => "params",
            SectionKind::Limits => "limits",
            SectionKind::Venues => "venues",
            SectionKind::State => "state",
            SectionKind::Skills => "skills",
            SectionKind::Advisors => "advisors",
            SectionKind::Guards => "guards",
        }
    }
}

/// A top-level declaration section. Entries are interpreted per-kind by the
/// transformer; the parser only enforces shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub kind: SectionKind,
    pub entries: Vec<SectionEntry>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionEntry {
    pub key: String,
    pub value: SectionValue,
    pub span: Span,
}

/// A section entry value: an expression, an advisory check with optional
/// `via <advisor>`, or a nested map of entries.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionValue {
    Expr(Expr),
    AdvisoryCheck { prompt: String, advisor: Option<String> },
    Map(Vec<SectionEntry>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerKind {
    Manual,
    Hourly,
    Daily,
    Cron(String),
    Condition { expr: Expr, poll: Option<f64> },
    Event { name: String, filter: Option<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerDecl {
    pub kind: TriggerKind,
    pub body: Vec<Stmt>,
    pub span: Span,
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicMode {
    Skip,
    Halt,
    Revert,
}

/// Action directive inside a `catch` clause.
#[derive(Debug, Clone, PartialEq)]
pub enum CatchBody {
    Skip,
    Halt,
    Revert,
    Retry {
        attempts: Option<u32>,
        backoff: Option<String>,
        base: Option<f64>,
        max: Option<f64>,
    },
    Steps(Vec<Stmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    /// Error kind to match; `"*"` when omitted.
    pub error_type: String,
    pub body: CatchBody,
}

/// One pipeline stage: `| op[arg]: body`.
#[derive(Debug, Clone, PartialEq)]
pub struct StageDecl {
    pub op: String,
    /// `reduce` initial value or `take`/`skip` count.
    pub arg: Option<Expr>,
    /// `sort by <expr>`.
    pub by: Option<Expr>,
    /// `sort ... order asc|desc`.
    pub order: Option<String>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// Parameters of an `advise` expression's required block.
#[derive(Debug, Clone, PartialEq)]
pub struct AdviseSpec {
    pub advisor: String,
    pub prompt: String,
    pub output: Expr,
    pub timeout: f64,
    pub fallback: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Assign {
        target: String,
        value: Expr,
    },
    Advise {
        binding: Option<String>,
        spec: AdviseSpec,
    },
    MethodCall {
        object: Expr,
        method: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
        using: Option<String>,
        constraints: Vec<(String, Expr)>,
        output_binding: Option<String>,
    },
    If {
        condition: Expr,
        then_body: Vec<Stmt>,
        elifs: Vec<(Expr, Vec<Stmt>)>,
        else_body: Vec<Stmt>,
    },
    For {
        variable: String,
        source: Expr,
        body: Vec<Stmt>,
    },
    Repeat {
        count: Expr,
        body: Vec<Stmt>,
    },
    Until {
        condition: Expr,
        max: Option<u32>,
        body: Vec<Stmt>,
    },
    Try {
        body: Vec<Stmt>,
        catches: Vec<CatchClause>,
        finally_body: Option<Vec<Stmt>>,
    },
    Parallel {
        branches: Vec<(String, Vec<Stmt>)>,
        join: Option<String>,
        count: Option<u32>,
        metric: Option<Expr>,
        order: Option<String>,
        on_fail: Option<String>,
    },
    Pipeline {
        source: Expr,
        stages: Vec<StageDecl>,
        output_binding: Option<String>,
    },
    Do {
        name: String,
        args: Vec<Expr>,
    },
    Atomic {
        mode: AtomicMode,
        body: Vec<Stmt>,
    },
    Emit {
        event: String,
        data: Vec<(String, Expr)>,
    },
    Halt {
        reason: Option<Expr>,
    },
    Wait {
        duration: Expr,
    },
    Pass,
    /// A bare `**prompt**` statement.
    Advisory {
        prompt: String,
    },
    /// A bare expression line. Only meaningful as a pipeline stage body;
    /// the transformer rejects it anywhere else.
    ExprStmt(Expr),
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f64),
    Str(String),
    Bool(bool),
    Address(String),
    Identifier(String),
    VenueRef(String),
    Advisory(String),
    /// Already divided by 100.
    Percentage(f64),
    /// `1.5 USDC` — resolved to base units by the transformer.
    UnitLiteral {
        value: f64,
        unit: String,
    },
    Binary {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: String,
        operand: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    PropertyAccess {
        object: Box<Expr>,
        property: String,
    },
    ArrayAccess {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    ArrayLiteral(Vec<Expr>),
    ObjectLiteral(Vec<(String, Expr)>),
    Ternary {
        condition: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
}
