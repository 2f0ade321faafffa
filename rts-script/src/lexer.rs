use std::sync::Arc;

use crate::error::ParseError;
use crate::pos::Pos;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Ident(String),
    Number(f64),
    String(String),
    Let,
    Const,
    Fn,
    Return,
    If,
    Else,
    For,
    In,
    Break,
    Continue,
    True,
    False,
    Null,
    Module,
    Export,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semicolon { implicit: bool },
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    AmpersandAmpersand,
    PipePipe,
    Question,
    QuestionQuestion,
    Illegal(char),
    Eof,
}

impl TokenKind {
    /// Tokens after which a line break terminates the statement.
    fn ends_statement(&self) -> bool {
        matches!(
            self,
            TokenKind::Ident(_)
                | TokenKind::Number(_)
                | TokenKind::String(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Null
                | TokenKind::Return
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::RBrace
        )
    }

    /// Keywords spelled as identifiers, so they can still be used as dict
    /// keys and member names.
    pub(crate) fn keyword_text(&self) -> Option<&'static str> {
        Some(match self {
            TokenKind::Let => "let",
            TokenKind::Const => "const",
            TokenKind::Fn => "fn",
            TokenKind::Return => "return",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::For => "for",
            TokenKind::In => "in",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Null => "null",
            TokenKind::Module => "module",
            TokenKind::Export => "export",
            _ => return None,
        })
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier '{name}'"),
            TokenKind::Number(value) => format!("number {value}"),
            TokenKind::String(_) => "string".to_string(),
            TokenKind::Semicolon { implicit: true } => "end of line".to_string(),
            TokenKind::Semicolon { implicit: false } => "';'".to_string(),
            TokenKind::Illegal(ch) => format!("illegal token '{ch}'"),
            TokenKind::Eof => "end of input".to_string(),
            other => match other.keyword_text() {
                Some(keyword) => format!("'{keyword}'"),
                None => format!("'{}'", punct_text(other)),
            },
        }
    }
}

fn punct_text(kind: &TokenKind) -> &'static str {
    match kind {
        TokenKind::LParen => "(",
        TokenKind::RParen => ")",
        TokenKind::LBracket => "[",
        TokenKind::RBracket => "]",
        TokenKind::LBrace => "{",
        TokenKind::RBrace => "}",
        TokenKind::Comma => ",",
        TokenKind::Colon => ":",
        TokenKind::Dot => ".",
        TokenKind::Plus => "+",
        TokenKind::Minus => "-",
        TokenKind::Star => "*",
        TokenKind::Slash => "/",
        TokenKind::Percent => "%",
        TokenKind::Bang => "!",
        TokenKind::BangEqual => "!=",
        TokenKind::Equal => "=",
        TokenKind::EqualEqual => "==",
        TokenKind::Less => "<",
        TokenKind::LessEqual => "<=",
        TokenKind::Greater => ">",
        TokenKind::GreaterEqual => ">=",
        TokenKind::AmpersandAmpersand => "&&",
        TokenKind::PipePipe => "||",
        TokenKind::Question => "?",
        TokenKind::QuestionQuestion => "??",
        _ => "?",
    }
}

fn keyword(text: &str) -> Option<TokenKind> {
    Some(match text {
        "let" => TokenKind::Let,
        "const" => TokenKind::Const,
        "fn" => TokenKind::Fn,
        "return" => TokenKind::Return,
        "if" => TokenKind::If,
        "else" => TokenKind::Else,
        "for" => TokenKind::For,
        "in" => TokenKind::In,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        "module" => TokenKind::Module,
        "export" => TokenKind::Export,
        _ => return None,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) pos: Pos,
}

pub(crate) struct Lexer<'a> {
    chars: std::str::Chars<'a>,
    current: Option<char>,
    path: Arc<str>,
    line: u32,
    col: u32,
    pending_terminator: bool,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(source: &'a str, start: &Pos) -> Self {
        let mut chars = source.chars();
        let current = chars.next();
        Self {
            chars,
            current,
            path: start.path.clone(),
            line: start.line,
            col: start.col,
            pending_terminator: false,
        }
    }

    pub(crate) fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                return Ok(tokens);
            }
        }
    }

    pub(crate) fn next_token(&mut self) -> Result<Token, ParseError> {
        if let Some(terminator) = self.skip_trivia()? {
            return Ok(terminator);
        }

        let pos = self.pos();
        let Some(ch) = self.current else {
            if self.pending_terminator {
                self.pending_terminator = false;
                return Ok(self.implicit_semicolon(pos));
            }
            return Ok(Token {
                kind: TokenKind::Eof,
                pos,
            });
        };

        let kind = match ch {
            '0'..='9' => self.consume_number(&pos)?,
            '"' | '\'' => TokenKind::String(self.consume_string(ch, &pos)?),
            c if is_ident_start(c) => {
                let text = self.consume_ident();
                keyword(&text).unwrap_or(TokenKind::Ident(text))
            }
            _ => {
                self.advance();
                match ch {
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    '{' => TokenKind::LBrace,
                    '}' => TokenKind::RBrace,
                    ',' => TokenKind::Comma,
                    ':' => TokenKind::Colon,
                    ';' => TokenKind::Semicolon { implicit: false },
                    '.' => TokenKind::Dot,
                    '+' => TokenKind::Plus,
                    '-' => TokenKind::Minus,
                    '*' => TokenKind::Star,
                    '/' => TokenKind::Slash,
                    '%' => TokenKind::Percent,
                    '!' => self.select('=', TokenKind::BangEqual, TokenKind::Bang),
                    '=' => self.select('=', TokenKind::EqualEqual, TokenKind::Equal),
                    '<' => self.select('=', TokenKind::LessEqual, TokenKind::Less),
                    '>' => self.select('=', TokenKind::GreaterEqual, TokenKind::Greater),
                    '?' => self.select('?', TokenKind::QuestionQuestion, TokenKind::Question),
                    '&' if self.current == Some('&') => {
                        self.advance();
                        TokenKind::AmpersandAmpersand
                    }
                    '|' if self.current == Some('|') => {
                        self.advance();
                        TokenKind::PipePipe
                    }
                    other => TokenKind::Illegal(other),
                }
            }
        };

        self.pending_terminator = kind.ends_statement();
        Ok(Token { kind, pos })
    }

    fn select(&mut self, next: char, matched: TokenKind, otherwise: TokenKind) -> TokenKind {
        if self.current == Some(next) {
            self.advance();
            matched
        } else {
            otherwise
        }
    }

    /// Skips whitespace and comments. Returns an implicit terminator when a
    /// line break follows a token that can end a statement.
    fn skip_trivia(&mut self) -> Result<Option<Token>, ParseError> {
        loop {
            match self.current {
                Some('\n') => {
                    let pos = self.pos();
                    self.advance();
                    if self.pending_terminator {
                        self.pending_terminator = false;
                        return Ok(Some(self.implicit_semicolon(pos)));
                    }
                }
                Some(ch) if ch.is_whitespace() => self.advance(),
                Some('#') => self.skip_line_comment(),
                Some('/') if self.peek() == Some('/') => self.skip_line_comment(),
                Some('/') if self.peek() == Some('*') => {
                    let pos = self.pos();
                    let crossed_line = self.skip_block_comment(&pos)?;
                    if crossed_line && self.pending_terminator {
                        self.pending_terminator = false;
                        return Ok(Some(self.implicit_semicolon(pos)));
                    }
                }
                _ => return Ok(None),
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.current {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn skip_block_comment(&mut self, start: &Pos) -> Result<bool, ParseError> {
        self.advance();
        self.advance();
        let mut crossed_line = false;
        loop {
            match self.current {
                None => {
                    return Err(ParseError::new(
                        start.clone(),
                        "unterminated block comment",
                    ));
                }
                Some('*') if self.peek() == Some('/') => {
                    self.advance();
                    self.advance();
                    return Ok(crossed_line);
                }
                Some(ch) => {
                    crossed_line |= ch == '\n';
                    self.advance();
                }
            }
        }
    }

    fn consume_number(&mut self, pos: &Pos) -> Result<TokenKind, ParseError> {
        let mut text = String::new();
        if self.current == Some('0') && matches!(self.peek(), Some('x' | 'X')) {
            self.advance();
            self.advance();
            while let Some(ch) = self.current {
                if ch.is_ascii_hexdigit() || ch == '_' {
                    if ch != '_' {
                        text.push(ch);
                    }
                    self.advance();
                } else {
                    break;
                }
            }
            return u64::from_str_radix(&text, 16)
                .map(|value| TokenKind::Number(value as f64))
                .map_err(|_| ParseError::new(pos.clone(), format!("invalid number '0x{text}'")));
        }

        self.consume_digits(&mut text);
        if self.current == Some('.') && self.peek().is_some_and(|ch| ch.is_ascii_digit()) {
            text.push('.');
            self.advance();
            self.consume_digits(&mut text);
        }
        if matches!(self.current, Some('e' | 'E')) {
            text.push('e');
            self.advance();
            if let Some(sign @ ('+' | '-')) = self.current {
                text.push(sign);
                self.advance();
            }
            self.consume_digits(&mut text);
        }
        if self.current.is_some_and(is_ident_start) {
            return Err(ParseError::new(
                pos.clone(),
                format!("invalid number '{text}{}'", self.current.unwrap_or_default()),
            ));
        }
        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| ParseError::new(pos.clone(), format!("invalid number '{text}'")))
    }

    fn consume_digits(&mut self, out: &mut String) {
        while let Some(ch) = self.current {
            if ch.is_ascii_digit() {
                out.push(ch);
                self.advance();
            } else if ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn consume_string(&mut self, quote: char, pos: &Pos) -> Result<String, ParseError> {
        self.advance();
        let mut out = String::new();
        loop {
            let Some(ch) = self.current else {
                return Err(ParseError::new(pos.clone(), "unterminated string literal"));
            };
            self.advance();
            if ch == quote {
                return Ok(out);
            }
            if ch != '\\' {
                out.push(ch);
                continue;
            }
            let escape_pos = self.pos();
            let Some(escaped) = self.current else {
                return Err(ParseError::new(pos.clone(), "unterminated string literal"));
            };
            self.advance();
            let mapped = match escaped {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                '0' => '\0',
                '\\' => '\\',
                '"' => '"',
                '\'' => '\'',
                'u' => self.consume_unicode_escape(&escape_pos)?,
                other => {
                    return Err(ParseError::new(
                        escape_pos,
                        format!("invalid escape '\\{other}'"),
                    ));
                }
            };
            out.push(mapped);
        }
    }

    fn consume_unicode_escape(&mut self, pos: &Pos) -> Result<char, ParseError> {
        let invalid = || ParseError::new(pos.clone(), "invalid unicode escape");
        if self.current != Some('{') {
            return Err(invalid());
        }
        self.advance();
        let mut digits = String::new();
        while let Some(ch) = self.current {
            self.advance();
            if ch == '}' {
                let code = u32::from_str_radix(&digits, 16).map_err(|_| invalid())?;
                return char::from_u32(code).ok_or_else(invalid);
            }
            if !ch.is_ascii_hexdigit() || digits.len() >= 6 {
                return Err(invalid());
            }
            digits.push(ch);
        }
        Err(invalid())
    }

    fn consume_ident(&mut self) -> String {
        let mut text = String::new();
        while let Some(ch) = self.current {
            if is_ident_continue(ch) {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        text
    }

    fn implicit_semicolon(&self, pos: Pos) -> Token {
        Token {
            kind: TokenKind::Semicolon { implicit: true },
            pos,
        }
    }

    fn advance(&mut self) {
        if self.current == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else if self.current.is_some() {
            self.col += 1;
        }
        self.current = self.chars.next();
    }

    fn peek(&self) -> Option<char> {
        self.chars.clone().next()
    }

    fn pos(&self) -> Pos {
        Pos {
            path: self.path.clone(),
            line: self.line,
            col: self.col,
        }
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Lexes just far enough to find a leading `module <name>` declaration.
/// Stops at the first token that is not part of the header, so the rest of
/// the file is never looked at.
pub fn scan_module_header(source: &str, start: &Pos) -> Result<Option<(String, Pos)>, ParseError> {
    let mut lexer = Lexer::new(source, start);
    let token = lexer.next_token()?;
    if token.kind != TokenKind::Module {
        return Ok(None);
    }
    let name = lexer.next_token()?;
    match name.kind {
        TokenKind::Ident(text) => Ok(Some((text, token.pos))),
        other => Err(ParseError::new(
            name.pos,
            format!("expected module name, found {}", other.describe()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source, &Pos::inline())
            .tokenize()
            .expect("source should lex")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn newline_after_value_inserts_terminator() {
        assert_eq!(
            kinds("let a = 1\nlet b = 2"),
            vec![
                TokenKind::Let,
                TokenKind::Ident("a".to_string()),
                TokenKind::Equal,
                TokenKind::Number(1.0),
                TokenKind::Semicolon { implicit: true },
                TokenKind::Let,
                TokenKind::Ident("b".to_string()),
                TokenKind::Equal,
                TokenKind::Number(2.0),
                TokenKind::Semicolon { implicit: true },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn newline_after_operator_continues_statement() {
        assert_eq!(
            kinds("1 +\n2"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Plus,
                TokenKind::Number(2.0),
                TokenKind::Semicolon { implicit: true },
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn positions_track_lines_and_columns_from_start() {
        let start = Pos::new("req.http", 12, 5);
        let tokens = Lexer::new("a\n  bb", &start)
            .tokenize()
            .expect("source should lex");
        assert_eq!(tokens[0].pos, Pos::new("req.http", 12, 5));
        assert_eq!(tokens[2].pos, Pos::new("req.http", 13, 3));
    }

    #[test]
    fn unknown_characters_become_illegal_tokens() {
        assert_eq!(kinds("@")[0], TokenKind::Illegal('@'));
        assert_eq!(kinds("a & b")[1], TokenKind::Illegal('&'));
    }

    #[test]
    fn strings_support_escapes_and_both_quotes() {
        assert_eq!(
            kinds(r#""a\n\u{41}" 'it\'s'"#)[..2],
            [
                TokenKind::String("a\nA".to_string()),
                TokenKind::String("it's".to_string())
            ]
        );
    }

    #[test]
    fn unterminated_string_reports_start_position() {
        let err = Lexer::new("x = \"abc", &Pos::inline())
            .tokenize()
            .expect_err("unterminated string should fail");
        assert_eq!(err.pos.col, 5);
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn header_scan_finds_module_name_after_comments() {
        let source = "// shared helpers\n\nmodule http_utils\nexport fn a() { @@@ }";
        let header = scan_module_header(source, &Pos::new("m.rts", 1, 1))
            .expect("header scan should succeed");
        let (name, pos) = header.expect("module name should be declared");
        assert_eq!(name, "http_utils");
        assert_eq!(pos.line, 3);
    }

    #[test]
    fn header_scan_returns_none_without_declaration() {
        let header = scan_module_header("export let a = 1", &Pos::inline())
            .expect("header scan should succeed");
        assert!(header.is_none());
    }
}
