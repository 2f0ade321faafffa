use std::sync::Arc;

use crate::ast::{
    AssignTarget, BinaryOp, DictKey, Expr, ExprKind, FunctionDef, LogicalOp, ModuleHeader,
    PathSegment, Program, Stmt, StmtKind, UnaryOp,
};
use crate::error::ParseError;
use crate::lexer::{Lexer, Token, TokenKind};
use crate::pos::Pos;
use crate::stack::ensure_sufficient_stack;
use crate::value::format_number;

/// Deepest nesting of expressions and blocks a source may use.
const MAX_NESTING: usize = 256;

/// Parses a whole script or module body starting at `start`.
pub fn parse_program(source: &str, start: &Pos) -> Result<Program, ParseError> {
    let mut parser = Parser::new(source, start)?;
    parser.parse_program()
}

/// Parses a single expression, as used by inline template substitutions.
pub fn parse_expression(source: &str, start: &Pos) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(source, start)?;
    parser.skip_terminators();
    let expr = parser.parse_expr()?;
    parser.skip_terminators();
    if !parser.check(&TokenKind::Eof) {
        return Err(parser.unexpected("end of expression"));
    }
    Ok(expr)
}

pub(crate) struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    block_depth: usize,
    loop_depth: usize,
    nesting: usize,
}

impl Parser {
    pub(crate) fn new(source: &str, start: &Pos) -> Result<Self, ParseError> {
        let tokens = Lexer::new(source, start).tokenize()?;
        Ok(Self {
            tokens,
            pos: 0,
            block_depth: 0,
            loop_depth: 0,
            nesting: 0,
        })
    }

    pub(crate) fn parse_program(&mut self) -> Result<Program, ParseError> {
        self.skip_terminators();
        let module = if self.check(&TokenKind::Module) {
            Some(self.parse_module_header()?)
        } else {
            None
        };

        let mut stmts = Vec::new();
        loop {
            self.skip_terminators();
            if self.check(&TokenKind::Eof) {
                break;
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(Program { module, stmts })
    }

    fn parse_module_header(&mut self) -> Result<ModuleHeader, ParseError> {
        let pos = self.advance().pos;
        let name = self.expect_ident("expected module name after 'module'")?;
        self.expect_terminator()?;
        Ok(ModuleHeader { name, pos })
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.peek().pos.clone();
        let kind = self.peek().kind.clone();
        match kind {
            TokenKind::Module => Err(ParseError::new(
                pos,
                "module declaration must be the first statement",
            )),
            TokenKind::Export => {
                if self.block_depth > 0 {
                    return Err(ParseError::new(pos, "export is only allowed at top level"));
                }
                self.advance();
                match self.peek().kind {
                    TokenKind::Let | TokenKind::Const => self.parse_let(pos, true),
                    TokenKind::Fn => self.parse_fn_decl(pos, true),
                    _ => Err(self.unexpected("'let', 'const' or 'fn' after 'export'")),
                }
            }
            TokenKind::Let | TokenKind::Const => self.parse_let(pos, false),
            TokenKind::Fn if matches!(self.peek_next_kind(), Some(TokenKind::Ident(_))) => {
                self.parse_fn_decl(pos, false)
            }
            TokenKind::Return => {
                self.advance();
                let value = if self.at_terminator() {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect_terminator()?;
                Ok(Stmt {
                    kind: StmtKind::Return(value),
                    pos,
                })
            }
            TokenKind::If => self.parse_if(),
            TokenKind::For => self.parse_for(),
            TokenKind::Break | TokenKind::Continue => {
                let is_break = self.check(&TokenKind::Break);
                if self.loop_depth == 0 {
                    let keyword = if is_break { "break" } else { "continue" };
                    return Err(ParseError::new(pos, format!("{keyword} outside loop")));
                }
                self.advance();
                self.expect_terminator()?;
                let kind = if is_break {
                    StmtKind::Break
                } else {
                    StmtKind::Continue
                };
                Ok(Stmt { kind, pos })
            }
            TokenKind::LBrace => {
                let body = self.parse_block()?;
                Ok(Stmt {
                    kind: StmtKind::Block(body),
                    pos,
                })
            }
            _ => self.parse_expr_or_assign(pos),
        }
    }

    fn parse_let(&mut self, pos: Pos, exported: bool) -> Result<Stmt, ParseError> {
        let constant = self.advance().kind == TokenKind::Const;
        let name = self.expect_ident("expected variable name")?;
        self.expect(&TokenKind::Equal, "expected '=' after variable name")?;
        let value = self.parse_expr()?;
        self.expect_terminator()?;
        Ok(Stmt {
            kind: StmtKind::Let {
                name,
                value,
                constant,
                exported,
            },
            pos,
        })
    }

    fn parse_fn_decl(&mut self, pos: Pos, exported: bool) -> Result<Stmt, ParseError> {
        let fn_pos = self.advance().pos;
        let name = self.expect_ident("expected function name")?;
        let def = self.parse_function_rest(Some(name), fn_pos)?;
        Ok(Stmt {
            kind: StmtKind::Fn {
                def: Arc::new(def),
                exported,
            },
            pos,
        })
    }

    fn parse_function_rest(
        &mut self,
        name: Option<String>,
        pos: Pos,
    ) -> Result<FunctionDef, ParseError> {
        self.expect(&TokenKind::LParen, "expected '(' to start parameter list")?;
        let mut params: Vec<String> = Vec::new();
        loop {
            self.skip_implicit();
            if self.check(&TokenKind::RParen) {
                break;
            }
            let param_pos = self.peek().pos.clone();
            let param = self.expect_ident("expected parameter name")?;
            if params.contains(&param) {
                return Err(ParseError::new(
                    param_pos,
                    format!("duplicate parameter '{param}'"),
                ));
            }
            params.push(param);
            self.skip_implicit();
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.skip_implicit();
        self.expect(&TokenKind::RParen, "expected ')' after parameters")?;

        let saved_loop_depth = std::mem::take(&mut self.loop_depth);
        let body = self.parse_block();
        self.loop_depth = saved_loop_depth;

        Ok(FunctionDef {
            name,
            params,
            body: body?,
            pos,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.advance().pos;
        let condition = self.parse_expr()?;
        let then_branch = self.parse_block()?;

        // `}` followed by a line break and `else` still continues the chain
        if self.check(&TokenKind::Semicolon { implicit: true })
            && self.peek_next_kind() == Some(&TokenKind::Else)
        {
            self.advance();
        }

        let else_branch = if self.match_kind(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                Some(vec![self.nested(Self::parse_if)?])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };

        Ok(Stmt {
            kind: StmtKind::If {
                condition,
                then_branch,
                else_branch,
            },
            pos,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let pos = self.advance().pos;
        let first = self.expect_ident("expected loop variable after 'for'")?;
        let second = if self.match_kind(&TokenKind::Comma) {
            Some(self.expect_ident("expected second loop variable")?)
        } else {
            None
        };
        self.expect(&TokenKind::In, "expected 'in' after loop variables")?;
        let iterable = self.parse_expr()?;

        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;

        Ok(Stmt {
            kind: StmtKind::For {
                first,
                second,
                iterable,
                body: body?,
            },
            pos,
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.nested(Self::parse_block_body)
    }

    fn parse_block_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(&TokenKind::LBrace, "expected '{' to start block")?;
        self.block_depth += 1;
        let mut stmts = Vec::new();
        let result = loop {
            self.skip_terminators();
            if self.check(&TokenKind::RBrace) {
                break Ok(());
            }
            if self.check(&TokenKind::Eof) {
                break Err(self.unexpected("'}' to close block"));
            }
            match self.parse_stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(err) => break Err(err),
            }
        };
        self.block_depth -= 1;
        result?;
        self.advance();
        Ok(stmts)
    }

    fn parse_expr_or_assign(&mut self, pos: Pos) -> Result<Stmt, ParseError> {
        let expr = self.parse_expr()?;
        if self.match_kind(&TokenKind::Equal) {
            let target = assign_target(expr)?;
            let value = self.parse_expr()?;
            self.expect_terminator()?;
            return Ok(Stmt {
                kind: StmtKind::Assign { target, value },
                pos,
            });
        }
        self.expect_terminator()?;
        Ok(Stmt {
            kind: StmtKind::Expr(expr),
            pos,
        })
    }

    pub(crate) fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::parse_ternary)
    }

    /// Runs `parse` one nesting level deeper.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        self.link()?;
        let result = ensure_sufficient_stack(|| parse(self));
        self.nesting -= 1;
        result
    }

    /// Counts one more level. Left-nested chains such as `a + b + c` or
    /// `a.b.c` are built in loops, which call this once per link and give
    /// the levels back when the chain ends.
    fn link(&mut self) -> Result<(), ParseError> {
        if self.nesting >= MAX_NESTING {
            return Err(ParseError::new(
                self.peek().pos.clone(),
                "expression nested too deeply",
            ));
        }
        self.nesting += 1;
        Ok(())
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let condition = self.parse_coalesce()?;
        if !self.check(&TokenKind::Question) {
            return Ok(condition);
        }
        let pos = self.advance().pos;
        let then_expr = self.parse_expr()?;
        self.expect(&TokenKind::Colon, "expected ':' in conditional expression")?;
        let else_expr = self.nested(Self::parse_ternary)?;
        Ok(Expr {
            kind: ExprKind::Ternary {
                condition: Box::new(condition),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            pos,
        })
    }

    fn parse_coalesce(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_or()?;
        let mut links = 0;
        while self.check(&TokenKind::QuestionQuestion) {
            self.link()?;
            links += 1;
            let pos = self.advance().pos;
            let rhs = self.parse_or()?;
            expr = logical(LogicalOp::Coalesce, expr, rhs, pos);
        }
        self.nesting -= links;
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_and()?;
        let mut links = 0;
        while self.check(&TokenKind::PipePipe) {
            self.link()?;
            links += 1;
            let pos = self.advance().pos;
            let rhs = self.parse_and()?;
            expr = logical(LogicalOp::Or, expr, rhs, pos);
        }
        self.nesting -= links;
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_equality()?;
        let mut links = 0;
        while self.check(&TokenKind::AmpersandAmpersand) {
            self.link()?;
            links += 1;
            let pos = self.advance().pos;
            let rhs = self.parse_equality()?;
            expr = logical(LogicalOp::And, expr, rhs, pos);
        }
        self.nesting -= links;
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_comparison()?;
        let mut links = 0;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqualEqual => BinaryOp::Eq,
                TokenKind::BangEqual => BinaryOp::NotEq,
                _ => break,
            };
            self.link()?;
            links += 1;
            let pos = self.advance().pos;
            let rhs = self.parse_comparison()?;
            expr = binary(op, expr, rhs, pos);
        }
        self.nesting -= links;
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_term()?;
        let mut links = 0;
        loop {
            let op = match self.peek().kind {
                TokenKind::Less => BinaryOp::Lt,
                TokenKind::LessEqual => BinaryOp::LtEq,
                TokenKind::Greater => BinaryOp::Gt,
                TokenKind::GreaterEqual => BinaryOp::GtEq,
                _ => break,
            };
            self.link()?;
            links += 1;
            let pos = self.advance().pos;
            let rhs = self.parse_term()?;
            expr = binary(op, expr, rhs, pos);
        }
        self.nesting -= links;
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_factor()?;
        let mut links = 0;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.link()?;
            links += 1;
            let pos = self.advance().pos;
            let rhs = self.parse_factor()?;
            expr = binary(op, expr, rhs, pos);
        }
        self.nesting -= links;
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_unary()?;
        let mut links = 0;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.link()?;
            links += 1;
            let pos = self.advance().pos;
            let rhs = self.parse_unary()?;
            expr = binary(op, expr, rhs, pos);
        }
        self.nesting -= links;
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        let pos = self.advance().pos;
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            pos,
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        let mut links = 0;
        loop {
            if matches!(
                self.peek().kind,
                TokenKind::Dot | TokenKind::LBracket | TokenKind::LParen
            ) {
                self.link()?;
                links += 1;
            }
            if self.check(&TokenKind::Dot) {
                let pos = self.advance().pos;
                let name = self.expect_member_name()?;
                expr = Expr {
                    kind: ExprKind::Member {
                        object: Box::new(expr),
                        name,
                    },
                    pos,
                };
            } else if self.check(&TokenKind::LBracket) {
                let pos = self.advance().pos;
                self.skip_implicit();
                let index = self.parse_expr()?;
                self.skip_implicit();
                self.expect(&TokenKind::RBracket, "expected ']' after index")?;
                expr = Expr {
                    kind: ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    pos,
                };
            } else if self.check(&TokenKind::LParen) {
                let pos = self.advance().pos;
                let args = self.parse_call_args()?;
                expr = Expr {
                    kind: ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    pos,
                };
            } else {
                self.nesting -= links;
                return Ok(expr);
            }
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        loop {
            self.skip_implicit();
            if self.check(&TokenKind::RParen) {
                break;
            }
            args.push(self.parse_expr()?);
            self.skip_implicit();
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.skip_implicit();
        self.expect(&TokenKind::RParen, "expected ')' after arguments")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        let pos = token.pos.clone();
        let kind = match token.kind {
            TokenKind::Number(value) => {
                self.advance();
                ExprKind::Number(value)
            }
            TokenKind::String(text) => {
                self.advance();
                ExprKind::String(text)
            }
            TokenKind::True => {
                self.advance();
                ExprKind::Bool(true)
            }
            TokenKind::False => {
                self.advance();
                ExprKind::Bool(false)
            }
            TokenKind::Null => {
                self.advance();
                ExprKind::Null
            }
            TokenKind::Ident(name) => {
                self.advance();
                ExprKind::Ident(name)
            }
            TokenKind::LParen => {
                self.advance();
                self.skip_implicit();
                let inner = self.parse_expr()?;
                self.skip_implicit();
                self.expect(&TokenKind::RParen, "expected ')'")?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                self.advance();
                ExprKind::List(self.parse_list_items()?)
            }
            TokenKind::LBrace => {
                self.advance();
                ExprKind::Dict(self.parse_dict_entries()?)
            }
            TokenKind::Fn => {
                self.advance();
                let def = self.parse_function_rest(None, pos.clone())?;
                ExprKind::Function(Arc::new(def))
            }
            TokenKind::Illegal(ch) => {
                return Err(ParseError::new(pos, format!("illegal token '{ch}'")));
            }
            _ => return Err(self.unexpected("expression")),
        };
        Ok(Expr { kind, pos })
    }

    fn parse_list_items(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        loop {
            self.skip_implicit();
            if self.check(&TokenKind::RBracket) {
                break;
            }
            items.push(self.parse_expr()?);
            self.skip_implicit();
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.skip_implicit();
        self.expect(&TokenKind::RBracket, "expected ']' to close list")?;
        Ok(items)
    }

    fn parse_dict_entries(&mut self) -> Result<Vec<(DictKey, Expr)>, ParseError> {
        let mut entries = Vec::new();
        loop {
            self.skip_implicit();
            if self.check(&TokenKind::RBrace) {
                break;
            }
            let key = self.parse_dict_key()?;
            self.skip_implicit();
            self.expect(&TokenKind::Colon, "expected ':' after dict key")?;
            self.skip_implicit();
            let value = self.parse_expr()?;
            entries.push((key, value));
            self.skip_implicit();
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.skip_implicit();
        self.expect(&TokenKind::RBrace, "expected '}' to close dict")?;
        Ok(entries)
    }

    fn parse_dict_key(&mut self) -> Result<DictKey, ParseError> {
        let token = self.peek().clone();
        let key = match &token.kind {
            TokenKind::Ident(name) => DictKey::Static(name.clone()),
            TokenKind::String(text) => DictKey::Static(text.clone()),
            TokenKind::Number(value) => DictKey::Static(format_number(*value)),
            TokenKind::LBracket => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::RBracket, "expected ']' after computed key")?;
                return Ok(DictKey::Computed(expr));
            }
            other => match other.keyword_text() {
                Some(keyword) => DictKey::Static(keyword.to_string()),
                None => return Err(self.unexpected("dict key")),
            },
        };
        self.advance();
        Ok(key)
    }

    fn expect_member_name(&mut self) -> Result<String, ParseError> {
        let token = self.peek().clone();
        let name = match &token.kind {
            TokenKind::Ident(name) => name.clone(),
            other => match other.keyword_text() {
                Some(keyword) => keyword.to_string(),
                None => return Err(self.unexpected("member name after '.'")),
            },
        };
        self.advance();
        Ok(name)
    }

    fn expect_ident(&mut self, message: &str) -> Result<String, ParseError> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            TokenKind::Illegal(ch) => Err(ParseError::new(
                self.peek().pos.clone(),
                format!("illegal token '{ch}'"),
            )),
            other => Err(ParseError::new(
                self.peek().pos.clone(),
                format!("{message}, found {}", other.describe()),
            )),
        }
    }

    fn expect(&mut self, kind: &TokenKind, message: &str) -> Result<(), ParseError> {
        if self.match_kind(kind) {
            return Ok(());
        }
        let token = self.peek();
        if let TokenKind::Illegal(ch) = token.kind {
            return Err(ParseError::new(
                token.pos.clone(),
                format!("illegal token '{ch}'"),
            ));
        }
        Err(ParseError::new(
            token.pos.clone(),
            format!("{message}, found {}", token.kind.describe()),
        ))
    }

    fn at_terminator(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Semicolon { .. } | TokenKind::RBrace | TokenKind::Eof
        )
    }

    fn expect_terminator(&mut self) -> Result<(), ParseError> {
        if matches!(self.peek().kind, TokenKind::Semicolon { .. }) {
            self.advance();
            return Ok(());
        }
        if self.at_terminator() {
            return Ok(());
        }
        Err(self.unexpected("end of statement"))
    }

    fn skip_terminators(&mut self) {
        while matches!(self.peek().kind, TokenKind::Semicolon { .. }) {
            self.advance();
        }
    }

    fn skip_implicit(&mut self) {
        while self.check(&TokenKind::Semicolon { implicit: true }) {
            self.advance();
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let token = self.peek();
        match token.kind {
            TokenKind::Illegal(ch) => {
                ParseError::new(token.pos.clone(), format!("illegal token '{ch}'"))
            }
            _ => ParseError::new(
                token.pos.clone(),
                format!(
                    "unexpected {}, expected {expected}",
                    token.kind.describe()
                ),
            ),
        }
    }

    fn match_kind(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek_next_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos + 1).map(|token| &token.kind)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }
}

fn assign_target(expr: Expr) -> Result<AssignTarget, ParseError> {
    let pos = expr.pos.clone();
    match expr.kind {
        ExprKind::Ident(root) => Ok(AssignTarget {
            root,
            path: Vec::new(),
        }),
        ExprKind::Member { object, name } => {
            let mut target = assign_target(*object)?;
            target.path.push(PathSegment::Field(name));
            Ok(target)
        }
        ExprKind::Index { object, index } => {
            let mut target = assign_target(*object)?;
            target.path.push(PathSegment::Index(*index));
            Ok(target)
        }
        _ => Err(ParseError::new(pos, "invalid assignment target")),
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr, pos: Pos) -> Expr {
    Expr {
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        pos,
    }
}

fn logical(op: LogicalOp, lhs: Expr, rhs: Expr, pos: Pos) -> Expr {
    Expr {
        kind: ExprKind::Logical {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        pos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Program {
        parse_program(source, &Pos::inline()).expect("source should parse")
    }

    fn parse_err(source: &str) -> ParseError {
        parse_program(source, &Pos::inline()).expect_err("source should not parse")
    }

    #[test]
    fn statements_terminate_at_line_breaks() {
        let program = parse("let a = 1\nlet b = a + 2\nb");
        assert_eq!(program.stmts.len(), 3);
        assert!(matches!(program.stmts[2].kind, StmtKind::Expr(_)));
    }

    #[test]
    fn two_statements_on_one_line_need_a_semicolon() {
        let err = parse_err("let a = 1 let b = 2");
        assert!(err.message.contains("expected end of statement"));
        assert_eq!(err.pos.col, 11);
    }

    #[test]
    fn multi_line_literals_and_calls_parse() {
        let program = parse("let h = {\n  a: 1,\n  \"b-c\": [\n    1,\n    2\n  ]\n}\nf(\n  h,\n  2\n)");
        assert_eq!(program.stmts.len(), 2);
    }

    #[test]
    fn module_header_is_recorded() {
        let program = parse("module auth\nexport fn token() { return 1 }");
        let header = program.module.expect("module header");
        assert_eq!(header.name, "auth");
        assert_eq!(program.stmts[0].kind.exported_name(), Some("token"));
    }

    #[test]
    fn module_header_after_statements_is_rejected() {
        let err = parse_err("let a = 1\nmodule late");
        assert!(err.message.contains("first statement"));
        assert_eq!(err.pos.line, 2);
    }

    #[test]
    fn export_inside_block_is_rejected() {
        let err = parse_err("if true {\n export let a = 1\n}");
        assert!(err.message.contains("top level"));
    }

    #[test]
    fn illegal_token_reports_exact_position() {
        let err = parse_err("let a = 1\nlet b = a @ 2");
        assert_eq!(err.message, "illegal token '@'");
        assert_eq!((err.pos.line, err.pos.col), (2, 11));
    }

    #[test]
    fn else_may_follow_closing_brace_on_next_line() {
        let program = parse("if a {\n 1\n}\nelse {\n 2\n}");
        let StmtKind::If { else_branch, .. } = &program.stmts[0].kind else {
            panic!("expected if statement");
        };
        assert!(else_branch.is_some());
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let err = parse_err("break");
        assert!(err.message.contains("outside loop"));
    }

    #[test]
    fn break_inside_function_inside_loop_is_rejected() {
        let err = parse_err("for x in [1] {\n let f = fn() { break }\n}");
        assert!(err.message.contains("outside loop"));
    }

    #[test]
    fn assignment_targets_support_paths() {
        let program = parse("a.b[0] = 1");
        let StmtKind::Assign { target, .. } = &program.stmts[0].kind else {
            panic!("expected assignment");
        };
        assert_eq!(target.root, "a");
        assert_eq!(target.path.len(), 2);
    }

    #[test]
    fn call_results_are_not_assignable() {
        let err = parse_err("f() = 1");
        assert_eq!(err.message, "invalid assignment target");
    }

    #[test]
    fn precedence_binds_multiplication_tighter_than_addition() {
        let program = parse("1 + 2 * 3");
        let StmtKind::Expr(expr) = &program.stmts[0].kind else {
            panic!("expected expression");
        };
        let ExprKind::Binary { op, rhs, .. } = &expr.kind else {
            panic!("expected binary expression");
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn deeply_nested_sources_are_rejected() {
        let parens = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
        let err = parse_err(&parens);
        assert_eq!(err.message, "expression nested too deeply");

        let err = parse_err(&"[".repeat(20000));
        assert_eq!(err.message, "expression nested too deeply");

        let negations = format!("{}true", "!".repeat(5000));
        assert_eq!(parse_err(&negations).message, "expression nested too deeply");

        let blocks = format!("{}1{}", "if true {".repeat(500), "}".repeat(500));
        assert_eq!(parse_err(&blocks).message, "expression nested too deeply");
    }

    #[test]
    fn long_operator_chains_are_bounded() {
        let sum = vec!["1"; 5000].join(" + ");
        assert_eq!(parse_err(&sum).message, "expression nested too deeply");

        let members = format!("a{}", ".b".repeat(5000));
        assert_eq!(parse_err(&members).message, "expression nested too deeply");
    }

    #[test]
    fn moderate_nesting_still_parses() {
        parse(&format!("{}1{}", "(".repeat(100), ")".repeat(100)));
        parse(&format!("{}{}", "[".repeat(100), "]".repeat(100)));
        parse(&vec!["1"; 200].join(" + "));
        let mut source = "let x = 0\n".to_string();
        for _ in 0..50 {
            source.push_str("x = x + 1\n");
        }
        assert_eq!(parse(&source).stmts.len(), 51);
    }

    #[test]
    fn unterminated_block_is_reported() {
        let err = parse_err("if true {\n 1");
        assert!(err.message.contains("'}' to close block"));
    }
}
