// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recursive-descent parser for the spell language.
//!
//! One-token lookahead everywhere except the `identifier = ...` and
//! `key=value` keyword-argument disambiguations, which peek one further.
//! The parser reports the first mismatch and aborts; there is no recovery.

use crate::ast::*;
use crate::token::{Location, Token, TokenKind, KEYWORDS_AS_IDENTIFIERS};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("parse error at {location}: expected {expected}, found {found}")]
pub struct ParseError {
    pub expected: String,
    pub found: String,
    pub location: Location,
}

/// Parse a token stream (as produced by the tokenizer) into a `Spell`.
pub fn parse_spell(tokens: Vec<Token>) -> Result<Spell, ParseError> {
    Parser::new(tokens).parse_spell()
}

/// Parse a token stream holding a single expression (used by the
/// expression re-parser).
pub fn parse_expression_tokens(tokens: Vec<Token>) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_expression()?;
    parser.skip_newlines();
    if !matches!(parser.peek().kind, TokenKind::Eof) {
        return Err(parser.error("end of expression"));
    }
    Ok(expr)
}

const SECTION_KINDS: &[(&str, SectionKind)] = &[
    ("version", SectionKind::Version),
    ("description", SectionKind::Description),
    ("assets", SectionKind::Assets),
    ("params", SectionKind::Params),
    ("limits", SectionKind::Limits),
    ("venues", SectionKind::Venues),
    ("state", SectionKind::State),
    ("skills", SectionKind::Skills),
    ("advisors", SectionKind::Advisors),
    ("guards", SectionKind::Guards),
];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    // -- cursor --

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .unwrap_or_else(|| &self.tokens[self.tokens.len() - 1])
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.pos + ahead)
    }

    fn location(&self) -> Location {
        self.peek().location
    }

    fn prev_location(&self) -> Location {
        if self.pos == 0 {
            self.location()
        } else {
            self.tokens[self.pos - 1].location
        }
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, expected: impl Into<String>) -> ParseError {
        let token = self.peek();
        ParseError {
            expected: expected.into(),
            found: token.kind.describe(),
            location: token.location,
        }
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Keyword(k) if k == word)
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.at_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<(), ParseError> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(self.error(format!("keyword '{word}'")))
        }
    }

    fn at_identifier(&self, name: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Identifier(n) if n == name)
    }

    fn eat_identifier(&mut self, name: &str) -> bool {
        if self.at_identifier(name) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("identifier")),
        }
    }

    /// Identifier, or any keyword usable as a name (section keys, property
    /// names).
    fn expect_name(&mut self) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::Identifier(name) | TokenKind::Keyword(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("name")),
        }
    }

    fn expect_string(&mut self) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            _ => Err(self.error("string")),
        }
    }

    fn expect_number(&mut self) -> Result<f64, ParseError> {
        match &self.peek().kind {
            TokenKind::Number(n) => {
                let n = *n;
                self.advance();
                Ok(n)
            }
            _ => Err(self.error("number")),
        }
    }

    fn expect_colon(&mut self) -> Result<(), ParseError> {
        match self.peek().kind {
            TokenKind::Colon => {
                self.advance();
                Ok(())
            }
            _ => Err(self.error("':'")),
        }
    }

    fn expect_newline(&mut self) -> Result<(), ParseError> {
        match self.peek().kind {
            TokenKind::Newline => {
                self.advance();
                Ok(())
            }
            _ => Err(self.error("end of line")),
        }
    }

    fn expect_indent(&mut self) -> Result<(), ParseError> {
        match self.peek().kind {
            TokenKind::Indent => {
                self.advance();
                Ok(())
            }
            _ => Err(self.error("an indented block")),
        }
    }

    fn expect_dedent(&mut self) -> Result<(), ParseError> {
        match self.peek().kind {
            TokenKind::Dedent => {
                self.advance();
                Ok(())
            }
            _ => Err(self.error("end of block")),
        }
    }

    fn at_dedent_or_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Dedent | TokenKind::Eof)
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek().kind, TokenKind::Newline) {
            self.advance();
        }
    }

    // -- top level --

    fn parse_spell(&mut self) -> Result<Spell, ParseError> {
        let start = self.location();
        self.expect_keyword("spell")?;
        let name = self.expect_identifier()?;
        self.expect_newline()?;
        self.expect_indent()?;

        let mut sections = Vec::new();
        let mut triggers = Vec::new();
        let mut imports = Vec::new();
        let mut blocks = Vec::new();

        while !self.at_dedent_or_eof() {
            if self.at_keyword("import") {
                imports.push(self.parse_import()?);
            } else if self.at_keyword("block") {
                blocks.push(self.parse_block_decl()?);
            } else if self.at_keyword("on") {
                triggers.push(self.parse_trigger()?);
            } else if self.section_kind().is_some() {
                sections.push(self.parse_section()?);
            } else {
                return Err(self.error("a section, trigger, import, or block"));
            }
        }
        if matches!(self.peek().kind, TokenKind::Dedent) {
            self.advance();
        }

        Ok(Spell {
            name,
            sections,
            triggers,
            imports,
            blocks,
            span: Span::new(start, self.prev_location()),
        })
    }

    fn parse_import(&mut self) -> Result<ImportDecl, ParseError> {
        let start = self.location();
        self.expect_keyword("import")?;
        let path = self.expect_string()?;
        let alias = if self.eat_keyword("as") {
            Some(self.expect_identifier()?)
        } else {
            None
        };
        self.expect_newline()?;
        Ok(ImportDecl {
            path,
            alias,
            span: Span::new(start, self.prev_location()),
        })
    }

    fn parse_block_decl(&mut self) -> Result<BlockDecl, ParseError> {
        let start = self.location();
        self.expect_keyword("block")?;
        let name = self.expect_identifier()?;
        let mut params = Vec::new();
        if matches!(self.peek().kind, TokenKind::LParen) {
            self.advance();
            while !matches!(self.peek().kind, TokenKind::RParen) {
                params.push(self.expect_identifier()?);
                if matches!(self.peek().kind, TokenKind::Comma) {
                    self.advance();
                }
            }
            self.advance(); // )
        }
        let body = self.parse_stmt_block()?;
        Ok(BlockDecl {
            name,
            params,
            body,
            span: Span::new(start, self.prev_location()),
        })
    }

    fn section_kind(&self) -> Option<SectionKind> {
        if let TokenKind::Keyword(word) = &self.peek().kind {
            SECTION_KINDS
                .iter()
                .find(|(name, _)| name == word)
                .map(|(_, kind)| *kind)
        } else {
            None
        }
    }

    fn parse_section(&mut self) -> Result<Section, ParseError> {
        let start = self.location();
        let kind = self
            .section_kind()
            .ok_or_else(|| self.error("a section keyword"))?;
        self.advance();
        self.expect_colon()?;

        let entries = match kind {
            // Scalar sections carry one value on the same line.
            SectionKind::Version | SectionKind::Description => {
                let span = Span::at(self.location());
                let value = self.parse_expression()?;
                self.expect_newline()?;
                vec![SectionEntry {
                    key: kind.keyword().to_string(),
                    value: SectionValue::Expr(value),
                    span,
                }]
            }
            _ => {
                self.expect_newline()?;
                self.parse_entry_block()?
            }
        };

        Ok(Section {
            kind,
            entries,
            span: Span::new(start, self.prev_location()),
        })
    }

    fn parse_entry_block(&mut self) -> Result<Vec<SectionEntry>, ParseError> {
        self.expect_indent()?;
        let mut entries = Vec::new();
        while !self.at_dedent_or_eof() {
            entries.push(self.parse_entry()?);
        }
        self.expect_dedent()?;
        Ok(entries)
    }

    fn parse_entry(&mut self) -> Result<SectionEntry, ParseError> {
        let start = self.location();
        let key = match &self.peek().kind {
            TokenKind::Identifier(name) | TokenKind::Keyword(name) => {
                let name = name.clone();
                self.advance();
                name
            }
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance();
                s
            }
            _ => return Err(self.error("an entry key")),
        };
        self.expect_colon()?;

        let value = if matches!(self.peek().kind, TokenKind::Newline) {
            self.advance();
            SectionValue::Map(self.parse_entry_block()?)
        } else {
            let expr = self.parse_expression()?;
            let value = match &expr.kind {
                ExprKind::Advisory(prompt) if self.at_keyword("via") => {
                    self.advance();
                    let advisor = self.expect_identifier()?;
                    SectionValue::AdvisoryCheck {
                        prompt: prompt.clone(),
                        advisor: Some(advisor),
                    }
                }
                _ => SectionValue::Expr(expr),
            };
            self.expect_newline()?;
            value
        };

        Ok(SectionEntry {
            key,
            value,
            span: Span::new(start, self.prev_location()),
        })
    }

    // -- triggers --

    fn parse_trigger(&mut self) -> Result<TriggerDecl, ParseError> {
        let start = self.location();
        self.expect_keyword("on")?;
        let head = self.peek().kind.clone();
        let kind = match head {
            TokenKind::Keyword(word) if word == "manual" => {
                self.advance();
                TriggerKind::Manual
            }
            TokenKind::Keyword(word) if word == "hourly" => {
                self.advance();
                TriggerKind::Hourly
            }
            TokenKind::Keyword(word) if word == "daily" => {
                self.advance();
                TriggerKind::Daily
            }
            TokenKind::Keyword(word) if word == "condition" => {
                self.advance();
                let expr = self.parse_expression()?;
                let poll = if self.eat_identifier("every") {
                    Some(self.expect_number()?)
                } else {
                    None
                };
                TriggerKind::Condition { expr, poll }
            }
            TokenKind::Keyword(word) if word == "event" => {
                self.advance();
                let name = self.expect_identifier()?;
                let filter = if self.eat_keyword("where") {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                TriggerKind::Event { name, filter }
            }
            TokenKind::Str(cron) => {
                self.advance();
                TriggerKind::Cron(cron)
            }
            _ => {
                return Err(self.error(
                    "a trigger (manual, hourly, daily, condition, event, or a cron string)",
                ))
            }
        };
        let body = self.parse_stmt_block()?;
        Ok(TriggerDecl {
            kind,
            body,
            span: Span::new(start, self.prev_location()),
        })
    }

    // -- statements --

    /// `: NEWLINE INDENT stmt+ DEDENT`
    fn parse_stmt_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect_colon()?;
        self.expect_newline()?;
        self.parse_indented_stmts()
    }

    fn parse_indented_stmts(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect_indent()?;
        let mut stmts = Vec::new();
        while !self.at_dedent_or_eof() {
            stmts.push(self.parse_statement()?);
        }
        self.expect_dedent()?;
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Stmt, ParseError> {
        let start = self.location();
        let head = self.peek().kind.clone();
        let kind = match head {
            TokenKind::Keyword(word) => match word.as_str() {
                "if" => self.parse_if()?,
                "for" => self.parse_for()?,
                "repeat" => self.parse_repeat()?,
                "until" => self.parse_until()?,
                "try" => self.parse_try()?,
                "parallel" => self.parse_parallel()?,
                "atomic" => self.parse_atomic()?,
                "do" => self.parse_do()?,
                "emit" => self.parse_emit()?,
                "halt" => self.parse_halt()?,
                "wait" => self.parse_wait()?,
                "advise" => {
                    let spec = self.parse_advise_spec()?;
                    StmtKind::Advise {
                        binding: None,
                        spec,
                    }
                }
                "pass" => {
                    self.advance();
                    self.expect_newline()?;
                    StmtKind::Pass
                }
                _ => self.parse_expr_statement()?,
            },
            TokenKind::Advisory(prompt) => {
                self.advance();
                self.expect_newline()?;
                StmtKind::Advisory { prompt }
            }
            TokenKind::Identifier(_)
                if matches!(
                    self.peek_at(1).map(|t| &t.kind),
                    Some(TokenKind::Assign)
                ) =>
            {
                self.parse_assignment()?
            }
            _ => self.parse_expr_statement()?,
        };
        Ok(Stmt {
            kind,
            span: Span::new(start, self.prev_location()),
        })
    }

    fn parse_assignment(&mut self) -> Result<StmtKind, ParseError> {
        let target = self.expect_identifier()?;
        self.advance(); // =

        if self.at_keyword("advise") {
            let spec = self.parse_advise_spec()?;
            return Ok(StmtKind::Advise {
                binding: Some(target),
                spec,
            });
        }

        let value = self.parse_expression()?;

        if self.at_pipe() {
            let (stages, block_bodied) = self.parse_pipeline_stages()?;
            if !block_bodied {
                self.expect_newline()?;
            }
            return Ok(StmtKind::Pipeline {
                source: value,
                stages,
                output_binding: Some(target),
            });
        }

        // A method-call RHS is preserved as a method_call statement with the
        // assignment target as its output binding.
        if let ExprKind::Call { callee, .. } = &value.kind {
            if matches!(callee.kind, ExprKind::PropertyAccess { .. }) {
                return self.finish_method_call(value, Some(target));
            }
        }

        self.expect_newline()?;
        Ok(StmtKind::Assign { target, value })
    }

    fn parse_expr_statement(&mut self) -> Result<StmtKind, ParseError> {
        let expr = self.parse_expression()?;

        if self.at_pipe() {
            let (stages, block_bodied) = self.parse_pipeline_stages()?;
            if !block_bodied {
                self.expect_newline()?;
            }
            return Ok(StmtKind::Pipeline {
                source: expr,
                stages,
                output_binding: None,
            });
        }

        if let ExprKind::Call { callee, .. } = &expr.kind {
            if matches!(callee.kind, ExprKind::PropertyAccess { .. }) {
                return self.finish_method_call(expr, None);
            }
        }

        self.expect_newline()?;
        Ok(StmtKind::ExprStmt(expr))
    }

    /// Unpack a parsed `obj.method(args)` call expression into a
    /// method-call statement, consuming `using` / `with` trailers.
    fn finish_method_call(
        &mut self,
        call: Expr,
        output_binding: Option<String>,
    ) -> Result<StmtKind, ParseError> {
        let (callee, args, kwargs) = match call.kind {
            ExprKind::Call {
                callee,
                args,
                kwargs,
            } => (callee, args, kwargs),
            _ => return Err(self.error("a method call")),
        };
        let (object, method) = match callee.kind {
            ExprKind::PropertyAccess { object, property } => (*object, property),
            _ => return Err(self.error("a method call")),
        };

        let using = if self.eat_keyword("using") {
            Some(self.expect_identifier()?)
        } else {
            None
        };

        let mut constraints = Vec::new();
        if self.eat_keyword("with") {
            loop {
                let key = self.expect_name()?;
                if !matches!(self.peek().kind, TokenKind::Assign) {
                    return Err(self.error("'=' in constraint"));
                }
                self.advance();
                let value = self.parse_expression()?;
                constraints.push((key, value));
                if matches!(self.peek().kind, TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect_newline()?;

        Ok(StmtKind::MethodCall {
            object,
            method,
            args,
            kwargs,
            using,
            constraints,
            output_binding,
        })
    }

    fn parse_if(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("if")?;
        let condition = self.parse_expression()?;
        let then_body = self.parse_stmt_block()?;

        let mut elifs = Vec::new();
        while self.at_keyword("elif") {
            self.advance();
            let cond = self.parse_expression()?;
            let body = self.parse_stmt_block()?;
            elifs.push((cond, body));
        }

        let else_body = if self.at_keyword("else") {
            self.advance();
            self.parse_stmt_block()?
        } else {
            Vec::new()
        };

        Ok(StmtKind::If {
            condition,
            then_body,
            elifs,
            else_body,
        })
    }

    fn parse_for(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("for")?;
        let variable = self.expect_identifier()?;
        self.expect_keyword("in")?;
        let source = self.parse_expression()?;
        let body = self.parse_stmt_block()?;
        Ok(StmtKind::For {
            variable,
            source,
            body,
        })
    }

    fn parse_repeat(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("repeat")?;
        let count = self.parse_expression()?;
        let body = self.parse_stmt_block()?;
        Ok(StmtKind::Repeat { count, body })
    }

    fn parse_until(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("until")?;
        let condition = self.parse_expression()?;
        let max = if self.eat_keyword("max") {
            Some(self.expect_number()? as u32)
        } else {
            None
        };
        let body = self.parse_stmt_block()?;
        Ok(StmtKind::Until {
            condition,
            max,
            body,
        })
    }

    fn parse_try(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("try")?;
        let body = self.parse_stmt_block()?;

        let mut catches = Vec::new();
        while self.at_keyword("catch") {
            self.advance();
            let error_type = match &self.peek().kind {
                TokenKind::Operator(op) if op == "*" => {
                    self.advance();
                    "*".to_string()
                }
                TokenKind::Identifier(name) => {
                    let name = name.clone();
                    self.advance();
                    name
                }
                TokenKind::Colon => "*".to_string(),
                _ => return Err(self.error("an error type, '*', or ':'")),
            };
            self.expect_colon()?;
            self.expect_newline()?;
            let body = self.parse_catch_body()?;
            catches.push(CatchClause { error_type, body });
        }
        if catches.is_empty() {
            return Err(self.error("at least one 'catch' clause"));
        }

        let finally_body = if self.at_keyword("finally") {
            self.advance();
            Some(self.parse_stmt_block()?)
        } else {
            None
        };

        Ok(StmtKind::Try {
            body,
            catches,
            finally_body,
        })
    }

    /// A catch body is either a single action directive line (`skip`,
    /// `halt`, `revert`, `retry ...`) or ordinary statements.
    fn parse_catch_body(&mut self) -> Result<CatchBody, ParseError> {
        self.expect_indent()?;

        let directive = match &self.peek().kind {
            TokenKind::Keyword(word) if word == "skip" => Some(CatchBody::Skip),
            TokenKind::Keyword(word)
                if word == "halt"
                    && matches!(
                        self.peek_at(1).map(|t| &t.kind),
                        Some(TokenKind::Newline)
                    ) =>
            {
                Some(CatchBody::Halt)
            }
            TokenKind::Identifier(name) if name == "revert" || name == "rollback" => {
                Some(CatchBody::Revert)
            }
            _ => None,
        };
        if let Some(directive) = directive {
            self.advance();
            self.expect_newline()?;
            self.expect_dedent()?;
            return Ok(directive);
        }

        if self.at_keyword("retry") {
            self.advance();
            let attempts = match self.peek().kind {
                TokenKind::Number(n) => {
                    self.advance();
                    Some(n as u32)
                }
                _ => None,
            };
            let mut backoff = None;
            let mut base = None;
            let mut max = None;
            loop {
                if self.eat_identifier("backoff") {
                    backoff = Some(self.expect_identifier()?);
                } else if self.eat_identifier("base") {
                    base = Some(self.expect_number()?);
                } else if self.eat_keyword("max") {
                    max = Some(self.expect_number()?);
                } else {
                    break;
                }
            }
            self.expect_newline()?;
            self.expect_dedent()?;
            return Ok(CatchBody::Retry {
                attempts,
                backoff,
                base,
                max,
            });
        }

        let mut stmts = Vec::new();
        while !self.at_dedent_or_eof() {
            stmts.push(self.parse_statement()?);
        }
        self.expect_dedent()?;
        Ok(CatchBody::Steps(stmts))
    }

    fn parse_parallel(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("parallel")?;

        let mut join = None;
        let mut count = None;
        let mut metric = None;
        let mut order = None;
        let mut on_fail = None;
        while !matches!(self.peek().kind, TokenKind::Colon) {
            let key = self.expect_name()?;
            if !matches!(self.peek().kind, TokenKind::Assign) {
                return Err(self.error("'=' in parallel option"));
            }
            self.advance();
            match key.as_str() {
                "join" => join = Some(self.expect_name()?),
                "count" => count = Some(self.expect_number()? as u32),
                "metric" => metric = Some(self.parse_expression()?),
                "order" => order = Some(self.expect_name()?),
                "on_fail" => on_fail = Some(self.expect_name()?),
                other => {
                    return Err(ParseError {
                        expected: "one of join, count, metric, order, on_fail".into(),
                        found: format!("'{other}'"),
                        location: self.prev_location(),
                    })
                }
            }
            if matches!(self.peek().kind, TokenKind::Comma) {
                self.advance();
            }
        }

        self.expect_colon()?;
        self.expect_newline()?;
        self.expect_indent()?;
        let mut branches = Vec::new();
        while !self.at_dedent_or_eof() {
            let name = self.expect_name()?;
            let body = self.parse_stmt_block()?;
            branches.push((name, body));
        }
        self.expect_dedent()?;

        Ok(StmtKind::Parallel {
            branches,
            join,
            count,
            metric,
            order,
            on_fail,
        })
    }

    fn parse_atomic(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("atomic")?;
        let mode = match &self.peek().kind {
            TokenKind::Keyword(word) if word == "skip" => {
                self.advance();
                AtomicMode::Skip
            }
            TokenKind::Keyword(word) if word == "halt" => {
                self.advance();
                AtomicMode::Halt
            }
            TokenKind::Identifier(name) if name == "revert" => {
                self.advance();
                AtomicMode::Revert
            }
            _ => AtomicMode::Revert,
        };
        let body = self.parse_stmt_block()?;
        Ok(StmtKind::Atomic { mode, body })
    }

    fn parse_do(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("do")?;
        let mut name = self.expect_identifier()?;
        while matches!(self.peek().kind, TokenKind::Dot) {
            self.advance();
            name.push('.');
            name.push_str(&self.expect_identifier()?);
        }
        let mut args = Vec::new();
        if matches!(self.peek().kind, TokenKind::LParen) {
            self.advance();
            while !matches!(self.peek().kind, TokenKind::RParen) {
                args.push(self.parse_expression()?);
                if matches!(self.peek().kind, TokenKind::Comma) {
                    self.advance();
                }
            }
            self.advance(); // )
        }
        self.expect_newline()?;
        Ok(StmtKind::Do { name, args })
    }

    fn parse_emit(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("emit")?;
        let event = self.expect_identifier()?;
        let mut data = Vec::new();
        if matches!(self.peek().kind, TokenKind::LParen) {
            self.advance();
            while !matches!(self.peek().kind, TokenKind::RParen) {
                let key = self.expect_name()?;
                if !matches!(self.peek().kind, TokenKind::Assign) {
                    return Err(self.error("'=' in emit data"));
                }
                self.advance();
                let value = self.parse_expression()?;
                data.push((key, value));
                if matches!(self.peek().kind, TokenKind::Comma) {
                    self.advance();
                }
            }
            self.advance(); // )
        }
        self.expect_newline()?;
        Ok(StmtKind::Emit { event, data })
    }

    fn parse_halt(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("halt")?;
        let reason = if matches!(self.peek().kind, TokenKind::Newline) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect_newline()?;
        Ok(StmtKind::Halt { reason })
    }

    fn parse_wait(&mut self) -> Result<StmtKind, ParseError> {
        self.expect_keyword("wait")?;
        let duration = self.parse_expression()?;
        self.expect_newline()?;
        Ok(StmtKind::Wait { duration })
    }

    /// `advise <advisor>: "prompt"` followed by a block with the required
    /// `output`, `timeout`, and `fallback` keys.
    fn parse_advise_spec(&mut self) -> Result<AdviseSpec, ParseError> {
        self.expect_keyword("advise")?;
        let advisor = self.expect_identifier()?;
        self.expect_colon()?;
        let prompt = self.expect_string()?;
        self.expect_newline()?;
        self.expect_indent()?;

        let mut output = None;
        let mut timeout = None;
        let mut fallback = None;
        while !self.at_dedent_or_eof() {
            let key = self.expect_name()?;
            self.expect_colon()?;
            match key.as_str() {
                "output" => output = Some(self.parse_expression()?),
                "timeout" => timeout = Some(self.expect_number()?),
                "fallback" => fallback = Some(self.parse_expression()?),
                // Unknown keys are parsed and discarded for forward compat.
                _ => {
                    self.parse_expression()?;
                }
            }
            self.expect_newline()?;
        }
        self.expect_dedent()?;

        let output = output.ok_or_else(|| self.error("'output' in advise block"))?;
        let timeout = timeout.ok_or_else(|| self.error("'timeout' in advise block"))?;
        let fallback = fallback.ok_or_else(|| self.error("'fallback' in advise block"))?;
        Ok(AdviseSpec {
            advisor,
            prompt,
            output,
            timeout,
            fallback,
        })
    }

    // -- pipelines --

    fn at_pipe(&self) -> bool {
        matches!(&self.peek().kind, TokenKind::Operator(op) if op == "|")
    }

    /// Returns the stages and whether the last stage's body was an indented
    /// block (which consumes the line ending itself).
    fn parse_pipeline_stages(&mut self) -> Result<(Vec<StageDecl>, bool), ParseError> {
        let mut stages = Vec::new();
        let mut block_bodied = false;
        while self.at_pipe() {
            self.advance();
            let (stage, block) = self.parse_stage()?;
            stages.push(stage);
            block_bodied = block;
        }
        Ok((stages, block_bodied))
    }

    fn parse_stage(&mut self) -> Result<(StageDecl, bool), ParseError> {
        let start = self.location();
        let op = match &self.peek().kind {
            TokenKind::Keyword(word)
                if matches!(
                    word.as_str(),
                    "map" | "pmap" | "filter" | "where" | "reduce" | "take" | "skip" | "sort"
                ) =>
            {
                let word = word.clone();
                self.advance();
                word
            }
            _ => return Err(self.error("a pipeline stage op")),
        };

        match op.as_str() {
            "take" | "skip" => {
                let count = self.parse_expression()?;
                Ok((
                    StageDecl {
                        op,
                        arg: Some(count),
                        by: None,
                        order: None,
                        body: Vec::new(),
                        span: Span::new(start, self.prev_location()),
                    },
                    false,
                ))
            }
            "sort" => {
                let by = if self.eat_keyword("by") {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                let order = if self.eat_keyword("order") {
                    Some(self.expect_name()?)
                } else {
                    None
                };
                Ok((
                    StageDecl {
                        op,
                        arg: None,
                        by,
                        order,
                        body: Vec::new(),
                        span: Span::new(start, self.prev_location()),
                    },
                    false,
                ))
            }
            _ => {
                // map | pmap | filter | where | reduce — body required.
                let arg = if matches!(self.peek().kind, TokenKind::LParen) {
                    self.advance();
                    let initial = self.parse_expression()?;
                    if !matches!(self.peek().kind, TokenKind::RParen) {
                        return Err(self.error("')'"));
                    }
                    self.advance();
                    Some(initial)
                } else {
                    None
                };
                self.expect_colon()?;
                let mut block_bodied = false;
                let body = if matches!(self.peek().kind, TokenKind::Newline) {
                    self.advance();
                    block_bodied = true;
                    self.parse_indented_stmts()?
                } else {
                    let span = Span::at(self.location());
                    let expr = self.parse_expression()?;
                    vec![Stmt {
                        kind: StmtKind::ExprStmt(expr),
                        span,
                    }]
                };
                if body.is_empty() {
                    return Err(self.error(format!("a non-empty body for '{op}'")));
                }
                Ok((
                    StageDecl {
                        op,
                        arg,
                        by: None,
                        order: None,
                        body,
                        span: Span::new(start, self.prev_location()),
                    },
                    block_bodied,
                ))
            }
        }
    }

    // -- expressions --

    pub(crate) fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let start = self.location();
        let condition = self.parse_or()?;
        if matches!(self.peek().kind, TokenKind::Question) {
            self.advance();
            let then_expr = self.parse_expression()?;
            self.expect_colon()?;
            let else_expr = self.parse_expression()?;
            return Ok(Expr::new(
                ExprKind::Ternary {
                    condition: Box::new(condition),
                    then_expr: Box::new(then_expr),
                    else_expr: Box::new(else_expr),
                },
                Span::new(start, self.prev_location()),
            ));
        }
        Ok(condition)
    }

    fn at_logical_op(&self, lower: &str, upper: &str) -> bool {
        match &self.peek().kind {
            TokenKind::Keyword(word) => word == lower,
            // Stringified expressions spell these AND / OR.
            TokenKind::Identifier(name) => name == upper,
            _ => false,
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let start = self.location();
        let mut left = self.parse_and()?;
        while self.at_logical_op("or", "OR") {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::new(
                ExprKind::Binary {
                    op: "or".into(),
                    left: Box::new(left),
                    right: Box::new(right),
                },
                Span::new(start, self.prev_location()),
            );
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let start = self.location();
        let mut left = self.parse_equality()?;
        while self.at_logical_op("and", "AND") {
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::new(
                ExprKind::Binary {
                    op: "and".into(),
                    left: Box::new(left),
                    right: Box::new(right),
                },
                Span::new(start, self.prev_location()),
            );
        }
        Ok(left)
    }

    fn parse_binary_level(
        &mut self,
        ops: &[&str],
        next: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let start = self.location();
        let mut left = next(self)?;
        loop {
            let op = match &self.peek().kind {
                TokenKind::Operator(op) if ops.contains(&op.as_str()) => op.clone(),
                _ => break,
            };
            self.advance();
            let right = next(self)?;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                Span::new(start, self.prev_location()),
            );
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(&["==", "!="], Self::parse_comparison)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(&["<", ">", "<=", ">="], Self::parse_additive)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(&["+", "-"], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary_level(&["*", "/", "%"], Self::parse_unary)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let start = self.location();
        if self.at_keyword("not") {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: "not".into(),
                    operand: Box::new(operand),
                },
                Span::new(start, self.prev_location()),
            ));
        }
        if matches!(&self.peek().kind, TokenKind::Operator(op) if op == "-") {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: "-".into(),
                    operand: Box::new(operand),
                },
                Span::new(start, self.prev_location()),
            ));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let start = self.location();
        let mut expr = self.parse_primary()?;
        loop {
            match &self.peek().kind {
                TokenKind::Dot => {
                    self.advance();
                    let property = self.expect_name()?;
                    expr = Expr::new(
                        ExprKind::PropertyAccess {
                            object: Box::new(expr),
                            property,
                        },
                        Span::new(start, self.prev_location()),
                    );
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    if !matches!(self.peek().kind, TokenKind::RBracket) {
                        return Err(self.error("']'"));
                    }
                    self.advance();
                    expr = Expr::new(
                        ExprKind::ArrayAccess {
                            array: Box::new(expr),
                            index: Box::new(index),
                        },
                        Span::new(start, self.prev_location()),
                    );
                }
                TokenKind::LParen => {
                    self.advance();
                    let (args, kwargs) = self.parse_call_args()?;
                    expr = Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                            kwargs,
                        },
                        Span::new(start, self.prev_location()),
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    #[allow(clippy::type_complexity)]
    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ParseError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !matches!(self.peek().kind, TokenKind::RParen) {
            // `key=value` where key is an identifier and the next token is
            // `=` is a keyword argument.
            let is_kwarg = matches!(self.peek().kind, TokenKind::Identifier(_))
                && matches!(self.peek_at(1).map(|t| &t.kind), Some(TokenKind::Assign));
            if is_kwarg {
                let key = self.expect_identifier()?;
                self.advance(); // =
                let value = self.parse_expression()?;
                kwargs.push((key, value));
            } else {
                args.push(self.parse_expression()?);
            }
            if matches!(self.peek().kind, TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        if !matches!(self.peek().kind, TokenKind::RParen) {
            return Err(self.error("')'"));
        }
        self.advance();
        Ok((args, kwargs))
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let start = self.location();
        let token = self.peek().clone();
        let kind = match token.kind {
            TokenKind::Number(value) => {
                self.advance();
                // `<number> <identifier>` is a unit literal. `every` is
                // excluded so `on condition x every 300` parses.
                if let TokenKind::Identifier(unit) = &self.peek().kind {
                    if unit != "every" {
                        let unit = unit.clone();
                        self.advance();
                        return Ok(Expr::new(
                            ExprKind::UnitLiteral { value, unit },
                            Span::new(start, self.prev_location()),
                        ));
                    }
                }
                ExprKind::Number(value)
            }
            TokenKind::Str(s) => {
                self.advance();
                ExprKind::Str(s)
            }
            TokenKind::Bool(b) => {
                self.advance();
                ExprKind::Bool(b)
            }
            TokenKind::Address(addr) => {
                self.advance();
                ExprKind::Address(addr)
            }
            TokenKind::Percentage(p) => {
                self.advance();
                ExprKind::Percentage(p)
            }
            TokenKind::Identifier(name) => {
                self.advance();
                ExprKind::Identifier(name)
            }
            TokenKind::Keyword(word) if KEYWORDS_AS_IDENTIFIERS.contains(&word.as_str()) => {
                self.advance();
                ExprKind::Identifier(word)
            }
            TokenKind::VenueRef(name) => {
                self.advance();
                ExprKind::VenueRef(name)
            }
            TokenKind::Advisory(prompt) => {
                self.advance();
                ExprKind::Advisory(prompt)
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                if !matches!(self.peek().kind, TokenKind::RParen) {
                    return Err(self.error("')'"));
                }
                self.advance();
                return Ok(inner);
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !matches!(self.peek().kind, TokenKind::RBracket) {
                    items.push(self.parse_expression()?);
                    if matches!(self.peek().kind, TokenKind::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                if !matches!(self.peek().kind, TokenKind::RBracket) {
                    return Err(self.error("']'"));
                }
                self.advance();
                ExprKind::ArrayLiteral(items)
            }
            TokenKind::LBrace => {
                self.advance();
                let mut fields = Vec::new();
                while !matches!(self.peek().kind, TokenKind::RBrace) {
                    let key = match &self.peek().kind {
                        TokenKind::Identifier(name) | TokenKind::Keyword(name) => {
                            let name = name.clone();
                            self.advance();
                            name
                        }
                        TokenKind::Str(s) => {
                            let s = s.clone();
                            self.advance();
                            s
                        }
                        _ => return Err(self.error("an object key")),
                    };
                    self.expect_colon()?;
                    let value = self.parse_expression()?;
                    fields.push((key, value));
                    if matches!(self.peek().kind, TokenKind::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                if !matches!(self.peek().kind, TokenKind::RBrace) {
                    return Err(self.error("'}'"));
                }
                self.advance();
                ExprKind::ObjectLiteral(fields)
            }
            _ => return Err(self.error("an expression")),
        };
        Ok(Expr::new(kind, Span::new(start, self.prev_location())))
    }
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
