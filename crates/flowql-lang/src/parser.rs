//! Recursive-descent parser with explicit precedence levels (spec §4.2).
//!
//! Precedence, low to high: ternary > logical-or > logical-and >
//! comparison > additive > multiplicative > unary (+/-) > member access
//! (`.`/`[]`) > primary.

use flowql_core::error::{EngineError, Position};
use std::time::Duration;

use crate::cst::{
    Command, CreatePolicy, EmitClause, LValue, Operation, Pipeline, Program, ScanStep, ScanStmt,
    Statement, WindowCall,
};
use crate::expr::{BinaryOp, Expr, ObjectProp, PathSegment, UnaryOp};
use crate::lexer::Lexer;
use crate::token::{Keyword, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<EngineError>,
}

/// Parses a full program, returning the aggregated CST or every error
/// encountered (spec §4.2: "Multiple errors may be reported per parse").
pub fn parse_program(src: &str) -> Result<Program, Vec<EngineError>> {
    let tokens = Lexer::new(src).tokenize().map_err(|e| vec![e])?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        errors: Vec::new(),
    };
    let program = parser.program();
    if parser.errors.is_empty() {
        Ok(program)
    } else {
        Err(parser.errors)
    }
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn position(&self) -> Position {
        self.peek().position
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn check_keyword(&self, kw: Keyword) -> bool {
        matches!(self.peek_kind(), TokenKind::Keyword(k) if *k == kw)
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if self.check_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, EngineError> {
        if self.peek_kind() == &kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_keyword(&mut self, kw: Keyword) -> Result<(), EngineError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.unexpected(kw.text()))
        }
    }

    fn unexpected(&self, expected: &str) -> EngineError {
        EngineError::Parse {
            position: self.position(),
            expected: expected.to_string(),
            got: describe(self.peek_kind()),
        }
    }

    /// Accepts an identifier in a position where any keyword is also a
    /// valid identifier ("context-sensitive reserved words", spec §4.1).
    fn ident_like(&mut self) -> Result<String, EngineError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(s) => {
                self.advance();
                Ok(s)
            }
            TokenKind::Keyword(k) => {
                self.advance();
                Ok(k.text().to_string())
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// An object/select property key: identifier, string literal, or any
    /// keyword demoted to identifier (spec §4.2 property form 1).
    fn property_key(&mut self) -> Result<String, EngineError> {
        if let TokenKind::String(s) = self.peek_kind().clone() {
            self.advance();
            return Ok(s);
        }
        self.ident_like()
    }

    fn record_error_and_resync(&mut self, err: EngineError, resync: &[TokenKind]) {
        self.errors.push(err);
        while !self.at_eof() && !resync.iter().any(|k| self.peek_kind() == k) {
            self.advance();
        }
    }

    // ---- program / statement ------------------------------------------------

    fn program(&mut self) -> Program {
        let mut statements = Vec::new();
        while !self.at_eof() {
            match self.statement() {
                Ok(stmt) => statements.push(stmt),
                Err(e) => {
                    self.record_error_and_resync(e, &[TokenKind::Semicolon]);
                }
            }
            if self.check(&TokenKind::Semicolon) {
                self.advance();
            } else if !self.at_eof() {
                let err = self.unexpected(";");
                self.record_error_and_resync(err, &[TokenKind::Semicolon]);
                if self.check(&TokenKind::Semicolon) {
                    self.advance();
                }
            }
        }
        Program { statements }
    }

    fn statement(&mut self) -> Result<Statement, EngineError> {
        if let Some(cmd) = self.try_command()? {
            return Ok(Statement::Command(cmd));
        }
        Ok(Statement::Pipeline(self.pipeline()?))
    }

    fn try_command(&mut self) -> Result<Option<Command>, EngineError> {
        if self.check_keyword(Keyword::Create) {
            return self.create_stmt().map(Some);
        }
        if self.check_keyword(Keyword::Delete) {
            return self.delete_stmt().map(Some);
        }
        if self.check_keyword(Keyword::Insert) {
            return self.insert_stmt().map(Some);
        }
        if self.check_keyword(Keyword::Flush) {
            self.advance();
            let stream = self.ident_like()?;
            return Ok(Some(Command::Flush { stream }));
        }
        if self.check_keyword(Keyword::List) {
            self.advance();
            if self.eat_keyword(Keyword::Streams) {
                return Ok(Some(Command::ListStreams));
            }
            if self.eat_keyword(Keyword::Flows) {
                return Ok(Some(Command::ListFlows));
            }
            return Err(self.unexpected("'streams' or 'flows'"));
        }
        if self.check_keyword(Keyword::Info) {
            self.advance();
            let name = match self.peek_kind().clone() {
                TokenKind::Ident(s) => {
                    self.advance();
                    Some(s)
                }
                TokenKind::Keyword(k) => {
                    self.advance();
                    Some(k.text().to_string())
                }
                _ => None,
            };
            return Ok(Some(Command::Info { name }));
        }
        Ok(None)
    }

    fn create_policy(&mut self) -> Result<CreatePolicy, EngineError> {
        if self.eat_keyword(Keyword::Or) {
            self.expect_keyword(Keyword::Replace)?;
            return Ok(CreatePolicy::OrReplace);
        }
        if self.eat_keyword(Keyword::If) {
            self.expect_keyword(Keyword::Not)?;
            self.expect_keyword(Keyword::Exists)?;
            return Ok(CreatePolicy::IfNotExists);
        }
        Ok(CreatePolicy::Strict)
    }

    fn create_stmt(&mut self) -> Result<Command, EngineError> {
        self.expect_keyword(Keyword::Create)?;
        let policy = self.create_policy()?;
        if self.eat_keyword(Keyword::Stream) {
            let name = self.ident_like()?;
            return Ok(Command::CreateStream { name, policy });
        }
        self.expect_keyword(Keyword::Flow)?;
        let name = self.ident_like()?;
        let ttl = if self.eat_keyword(Keyword::Ttl) {
            self.expect(TokenKind::LParen, "(")?;
            let d = self.duration_literal()?;
            self.expect(TokenKind::RParen, ")")?;
            Some(d)
        } else {
            None
        };
        self.expect_keyword(Keyword::As)?;
        let pipeline = self.pipeline()?;
        Ok(Command::CreateFlow {
            name,
            policy,
            ttl,
            pipeline,
        })
    }

    fn duration_literal(&mut self) -> Result<Duration, EngineError> {
        match self.peek_kind().clone() {
            TokenKind::Duration(amount, unit) => {
                self.advance();
                flowql_core::duration::from_amount_and_unit(amount, &unit).ok_or_else(|| EngineError::Parse {
                    position: self.position(),
                    expected: "duration".into(),
                    got: format!("{amount}{unit}"),
                })
            }
            _ => Err(self.unexpected("duration literal")),
        }
    }

    fn delete_stmt(&mut self) -> Result<Command, EngineError> {
        self.expect_keyword(Keyword::Delete)?;
        if self.eat_keyword(Keyword::Stream) {
            let name = self.ident_like()?;
            return Ok(Command::DeleteStream { name });
        }
        self.expect_keyword(Keyword::Flow)?;
        let name = self.ident_like()?;
        Ok(Command::DeleteFlow { name })
    }

    fn insert_stmt(&mut self) -> Result<Command, EngineError> {
        self.expect_keyword(Keyword::Insert)?;
        self.expect_keyword(Keyword::Into)?;
        let stream = self.ident_like()?;
        let value = self.primary()?;
        Ok(Command::Insert { stream, value })
    }

    // ---- pipeline --------------------------------------------------------

    fn pipeline(&mut self) -> Result<Pipeline, EngineError> {
        let source = self.ident_like()?;
        let mut operations = Vec::new();
        while self.check(&TokenKind::Pipe) {
            self.advance();
            operations.push(self.operation()?);
        }
        Ok(Pipeline { source, operations })
    }

    fn operation(&mut self) -> Result<Operation, EngineError> {
        if self.eat_keyword(Keyword::Where) {
            return Ok(Operation::Where(self.ternary()?));
        }
        if self.eat_keyword(Keyword::Select) || self.eat_keyword(Keyword::Project) {
            let props = self.object_literal()?;
            return Ok(Operation::Select(props));
        }
        if self.eat_keyword(Keyword::Scan) {
            self.expect(TokenKind::LParen, "(")?;
            let mut steps = Vec::new();
            loop {
                steps.push(self.scan_step()?);
                if self.check(&TokenKind::Semicolon) {
                    self.advance();
                    if self.check(&TokenKind::RParen) {
                        break;
                    }
                } else {
                    break;
                }
            }
            self.expect(TokenKind::RParen, ")")?;
            return Ok(Operation::Scan(steps));
        }
        if self.eat_keyword(Keyword::Summarize) {
            let aggregates = self.object_literal()?;
            let by = if self.eat_keyword(Keyword::By) {
                Some(self.expr_list()?)
            } else {
                None
            };
            let mut window = None;
            let mut emit = None;
            if self.eat_keyword(Keyword::Over) {
                let var_name = self.ident_like()?;
                self.expect(TokenKind::Eq, "=")?;
                window = Some(self.window_call(var_name)?);
            } else if self.check_keyword(Keyword::Emit) {
                emit = Some(self.emit_clause()?);
            }
            return Ok(Operation::Summarize {
                aggregates,
                by,
                window,
                emit,
            });
        }
        if self.eat_keyword(Keyword::InsertInto) {
            self.expect(TokenKind::LParen, "(")?;
            let name = self.ident_like()?;
            self.expect(TokenKind::RParen, ")")?;
            return Ok(Operation::InsertInto(name));
        }
        if self.eat_keyword(Keyword::Collect) {
            self.expect(TokenKind::LParen, "(")?;
            self.expect(TokenKind::RParen, ")")?;
            return Ok(Operation::Collect);
        }
        Err(self.unexpected("pipeline operation"))
    }

    fn window_call(&mut self, var_name: String) -> Result<WindowCall, EngineError> {
        let function = self.ident_like()?;
        self.expect(TokenKind::LParen, "(")?;
        let args = if self.check(&TokenKind::RParen) {
            Vec::new()
        } else {
            self.expr_list()?
        };
        self.expect(TokenKind::RParen, ")")?;
        Ok(WindowCall {
            var_name,
            function,
            args,
        })
    }

    fn emit_clause(&mut self) -> Result<EmitClause, EngineError> {
        self.expect_keyword(Keyword::Emit)?;
        if self.eat_keyword(Keyword::Every) {
            let amount = self.ternary()?;
            let using = if self.eat_keyword(Keyword::Using) {
                Some(self.ternary()?)
            } else {
                None
            };
            return Ok(EmitClause::Every { amount, using });
        }
        if self.eat_keyword(Keyword::When) {
            return Ok(EmitClause::When(self.ternary()?));
        }
        if self.eat_keyword(Keyword::On) {
            if self.eat_keyword(Keyword::Change) {
                self.expect(TokenKind::LParen, "(")?;
                let e = self.ternary()?;
                self.expect(TokenKind::RParen, ")")?;
                return Ok(EmitClause::OnChange(e));
            }
            if self.eat_keyword(Keyword::Group) {
                self.expect_keyword(Keyword::Change)?;
                return Ok(EmitClause::OnGroupChange);
            }
            if self.eat_keyword(Keyword::Update) {
                return Ok(EmitClause::OnUpdate);
            }
            return Err(self.unexpected("'change', 'group change', or 'update'"));
        }
        Err(self.unexpected("'every', 'when', or 'on'"))
    }

    fn scan_step(&mut self) -> Result<ScanStep, EngineError> {
        self.expect_keyword(Keyword::Step)?;
        let name = self.ident_like()?;
        self.expect(TokenKind::Colon, ":")?;
        let condition = self.ternary()?;
        self.expect(TokenKind::FatArrow, "=>")?;
        let mut body = vec![self.scan_stmt(&name)?];
        while self.check(&TokenKind::Comma) {
            self.advance();
            body.push(self.scan_stmt(&name)?);
        }
        Ok(ScanStep { name, condition, body })
    }

    fn scan_stmt(&mut self, step_name: &str) -> Result<ScanStmt, EngineError> {
        if self.eat_keyword(Keyword::Emit) {
            self.expect(TokenKind::LParen, "(")?;
            let e = self.ternary()?;
            self.expect(TokenKind::RParen, ")")?;
            return Ok(ScanStmt::Emit(e));
        }
        let lvalue = self.lvalue(step_name)?;
        self.expect(TokenKind::Eq, "=")?;
        let value = self.ternary()?;
        Ok(ScanStmt::Assign { lvalue, value })
    }

    fn lvalue(&mut self, step_name: &str) -> Result<LValue, EngineError> {
        let first = self.ident_like()?;
        if first == "state" && self.check(&TokenKind::Dot) {
            self.advance();
            let step = self.ident_like()?;
            self.expect(TokenKind::Dot, ".")?;
            let var = self.ident_like()?;
            return Ok(LValue::StateField { step, var });
        }
        // sugar form referenced in spec §4.3 example: `cumSum.cumulative_x`
        // where `cumSum` is the step name itself, without a leading `state.`.
        if first == step_name && self.check(&TokenKind::Dot) {
            self.advance();
            let var = self.ident_like()?;
            return Ok(LValue::StateField {
                step: step_name.to_string(),
                var,
            });
        }
        Ok(LValue::Local(first))
    }

    // ---- expressions -------------------------------------------------------

    fn expr_list(&mut self) -> Result<Vec<Expr>, EngineError> {
        let mut items = vec![self.ternary()?];
        while self.check(&TokenKind::Comma) {
            self.advance();
            items.push(self.ternary()?);
        }
        Ok(items)
    }

    fn ternary(&mut self) -> Result<Expr, EngineError> {
        let cond = self.logical_or()?;
        if self.check(&TokenKind::Question) {
            self.advance();
            let a = self.ternary()?;
            self.expect(TokenKind::Colon, ":")?;
            let b = self.ternary()?;
            return Ok(Expr::Ternary(Box::new(cond), Box::new(a), Box::new(b)));
        }
        Ok(cond)
    }

    fn logical_or(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.logical_and()?;
        while self.check(&TokenKind::OrOr) {
            self.advance();
            let rhs = self.logical_and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn logical_and(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.comparison()?;
        while self.check(&TokenKind::AndAnd) {
            self.advance();
            let rhs = self.comparison()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::LtEq => BinaryOp::LtEq,
                TokenKind::GtEq => BinaryOp::GtEq,
                _ => break,
            };
            self.advance();
            let rhs = self.additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, EngineError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EngineError> {
        match self.peek_kind() {
            TokenKind::Minus => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            TokenKind::Plus => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Plus, Box::new(self.unary()?)))
            }
            _ => self.member_access(),
        }
    }

    fn member_access(&mut self) -> Result<Expr, EngineError> {
        let base = self.primary()?;
        let mut segs = Vec::new();
        loop {
            if self.check(&TokenKind::Dot) {
                self.advance();
                let key = self.ident_like()?;
                segs.push(PathSegment::Key(key));
            } else if self.check(&TokenKind::LBracket) {
                self.advance();
                let idx = self.ternary()?;
                self.expect(TokenKind::RBracket, "]")?;
                segs.push(PathSegment::Index(Box::new(idx)));
            } else {
                break;
            }
        }
        if segs.is_empty() {
            Ok(base)
        } else {
            Ok(Expr::Member(Box::new(base), segs))
        }
    }

    fn primary(&mut self) -> Result<Expr, EngineError> {
        match self.peek_kind().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Expr::String(s))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(Expr::Null)
            }
            TokenKind::Keyword(Keyword::Iff) => {
                self.advance();
                self.expect(TokenKind::LParen, "(")?;
                let args = self.expr_list()?;
                self.expect(TokenKind::RParen, ")")?;
                if args.len() != 3 {
                    return Err(EngineError::Parse {
                        position: self.position(),
                        expected: "iff(cond, a, b)".into(),
                        got: format!("{} argument(s)", args.len()),
                    });
                }
                let mut it = args.into_iter();
                let c = it.next().unwrap();
                let a = it.next().unwrap();
                let b = it.next().unwrap();
                Ok(Expr::Ternary(Box::new(c), Box::new(a), Box::new(b)))
            }
            TokenKind::Keyword(Keyword::Emit) => {
                self.advance();
                self.expect(TokenKind::LParen, "(")?;
                let e = self.ternary()?;
                self.expect(TokenKind::RParen, ")")?;
                Ok(Expr::Emit(Box::new(e)))
            }
            TokenKind::LParen => {
                self.advance();
                let e = self.ternary()?;
                self.expect(TokenKind::RParen, ")")?;
                Ok(e)
            }
            TokenKind::LBrace => Ok(Expr::Object(self.object_literal()?)),
            TokenKind::LBracket => {
                self.advance();
                let items = if self.check(&TokenKind::RBracket) {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                self.expect(TokenKind::RBracket, "]")?;
                Ok(Expr::Array(items))
            }
            TokenKind::Ident(_) | TokenKind::Keyword(_) => {
                let name = self.ident_like()?;
                if self.check(&TokenKind::LParen) {
                    self.advance();
                    let args = if self.check(&TokenKind::RParen) {
                        Vec::new()
                    } else {
                        self.expr_list()?
                    };
                    self.expect(TokenKind::RParen, ")")?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Identifier(name))
                }
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    /// Object/select-object constructor (spec §4.2): key-value, shorthand,
    /// spread-all, spread-expr, exclusion, in any order.
    fn object_literal(&mut self) -> Result<Vec<ObjectProp>, EngineError> {
        self.expect(TokenKind::LBrace, "{")?;
        let mut props = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            props.push(self.object_prop()?);
            if self.check(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(TokenKind::RBrace, "}")?;
        Ok(props)
    }

    fn object_prop(&mut self) -> Result<ObjectProp, EngineError> {
        if self.check(&TokenKind::DotDotDot) {
            self.advance();
            if self.check(&TokenKind::Star) {
                self.advance();
                return Ok(ObjectProp::SpreadAll);
            }
            let e = self.ternary()?;
            return Ok(ObjectProp::SpreadExpr(e));
        }
        if self.check(&TokenKind::Minus) {
            self.advance();
            let name = self.property_key()?;
            return Ok(ObjectProp::Exclude(name));
        }
        let key = self.property_key()?;
        if self.check(&TokenKind::Colon) {
            self.advance();
            let value = self.ternary()?;
            return Ok(ObjectProp::KeyValue(key, value));
        }
        // shorthand: `name` -> `name: safe_lookup(item, "name")`
        Ok(ObjectProp::KeyValue(key.clone(), Expr::Identifier(key)))
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Eof => "end of input".to_string(),
        TokenKind::Ident(s) => format!("identifier '{s}'"),
        TokenKind::Keyword(k) => format!("keyword '{}'", k.text()),
        TokenKind::String(s) => format!("string {s:?}"),
        TokenKind::Number(n) => format!("number {n}"),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_filter_pipeline() {
        let prog = parse_program("input | where age > 18 | insert_into(output)").unwrap();
        assert_eq!(prog.statements.len(), 1);
        match &prog.statements[0] {
            Statement::Pipeline(p) => {
                assert_eq!(p.source, "input");
                assert_eq!(p.operations.len(), 2);
            }
            _ => panic!("expected pipeline"),
        }
    }

    #[test]
    fn parses_create_flow_with_ttl() {
        let prog = parse_program("create flow g ttl(1s) as input | insert_into(output)").unwrap();
        match &prog.statements[0] {
            Statement::Command(Command::CreateFlow { name, ttl, .. }) => {
                assert_eq!(name, "g");
                assert_eq!(*ttl, Some(Duration::from_secs(1)));
            }
            _ => panic!("expected create flow"),
        }
    }

    #[test]
    fn parses_create_or_replace_and_if_not_exists() {
        let prog = parse_program("create or replace stream s; create stream if not exists t").unwrap();
        assert_eq!(prog.statements.len(), 2);
        matches!(
            &prog.statements[0],
            Statement::Command(Command::CreateStream { policy: CreatePolicy::OrReplace, .. })
        );
        matches!(
            &prog.statements[1],
            Statement::Command(Command::CreateStream { policy: CreatePolicy::IfNotExists, .. })
        );
    }

    #[test]
    fn parses_select_with_spread_and_exclude() {
        let prog = parse_program(r#"input | select { ...*, full_name: name + " " + surname, -password }"#).unwrap();
        match &prog.statements[0] {
            Statement::Pipeline(p) => match &p.operations[0] {
                Operation::Select(props) => assert_eq!(props.len(), 3),
                _ => panic!("expected select"),
            },
            _ => panic!("expected pipeline"),
        }
    }

    #[test]
    fn parses_scan_with_cumulative_sum() {
        let src = "input | scan( step cumSum: true => cumSum.cumulative_x = iff(cumSum.cumulative_x, cumSum.cumulative_x + x, x), emit({input: x, cumulative: cumSum.cumulative_x}); )";
        let prog = parse_program(src).unwrap();
        match &prog.statements[0] {
            Statement::Pipeline(p) => match &p.operations[0] {
                Operation::Scan(steps) => {
                    assert_eq!(steps.len(), 1);
                    assert_eq!(steps[0].body.len(), 2);
                }
                _ => panic!("expected scan"),
            },
            _ => panic!("expected pipeline"),
        }
    }

    #[test]
    fn parses_summarize_with_window() {
        let src = "input | summarize { total: sum(amount), count: count() } by product over w = tumbling_window(2)";
        let prog = parse_program(src).unwrap();
        match &prog.statements[0] {
            Statement::Pipeline(p) => match &p.operations[0] {
                Operation::Summarize { window, by, .. } => {
                    assert!(window.is_some());
                    assert!(by.is_some());
                }
                _ => panic!("expected summarize"),
            },
            _ => panic!("expected pipeline"),
        }
    }

    #[test]
    fn keyword_demoted_to_identifier_in_member_position() {
        // `from` and `by` are keywords, but must work as property keys.
        let prog = parse_program("input | select { from: 1, by: 2 }").unwrap();
        match &prog.statements[0] {
            Statement::Pipeline(p) => match &p.operations[0] {
                Operation::Select(props) => assert_eq!(props.len(), 2),
                _ => panic!("expected select"),
            },
            _ => panic!("expected pipeline"),
        }
    }

    #[test]
    fn multiple_parse_errors_are_aggregated() {
        let err = parse_program("create stream ; create flow").unwrap_err();
        assert!(err.len() >= 1);
    }
}
