//! Hand-written lexer producing typed tokens with file/line positions.
//!
//! The lexer works over raw bytes, tracks the current line, skips `//` and
//! `/* */` comments, and supports one token of push-back for the parser's
//! look-ahead. String literals keep their decoded bytes (`\0` is legal), so
//! tokens carry `Vec<u8>` rather than `String` for string data.

use std::fmt;
use std::sync::Arc;

use crate::exception::SyntaxError;

/// Whether `.` is part of identifiers rather than a symbol token.
///
/// Build-time choice; the symbol interpretation is the default so member
/// access (`obj.name`) lexes as three tokens.
const DOT_IN_IDENT: bool = false;

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Int(i64),
    Real(f64),
    Str(Vec<u8>),

    // Keywords
    If,
    Else,
    While,
    Do,
    For,
    Switch,
    Case,
    Default,
    Return,
    Break,
    Continue,
    Delete,
    New,
    Class,
    True,
    False,
    Null,

    // Punctuation
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Colon,
    Question,
    Dot,
    At,

    // Operators
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    ShlAssign,
    ShrAssign,
    Eq,
    Ne,
    RefEq,
    RefNe,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    XorXor,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
    Rol,
    Not,
    Tilde,
    Inc,
    Dec,

    Eof,
}

impl fmt::Display for Token {
    /// Canonical source spelling; lexing the printed form yields the token
    /// back (round-trip property used by the lexer tests).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => f.write_str(name),
            Self::Int(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v:?}"),
            Self::Str(bytes) => {
                f.write_str("\"")?;
                for &b in bytes.iter() {
                    match b {
                        b'\n' => f.write_str("\\n")?,
                        b'\r' => f.write_str("\\r")?,
                        b'\t' => f.write_str("\\t")?,
                        b'\\' => f.write_str("\\\\")?,
                        b'"' => f.write_str("\\\"")?,
                        0 => f.write_str("\\0")?,
                        b => write!(f, "{}", b as char)?,
                    }
                }
                f.write_str("\"")
            }
            Self::If => f.write_str("if"),
            Self::Else => f.write_str("else"),
            Self::While => f.write_str("while"),
            Self::Do => f.write_str("do"),
            Self::For => f.write_str("for"),
            Self::Switch => f.write_str("switch"),
            Self::Case => f.write_str("case"),
            Self::Default => f.write_str("default"),
            Self::Return => f.write_str("return"),
            Self::Break => f.write_str("break"),
            Self::Continue => f.write_str("continue"),
            Self::Delete => f.write_str("delete"),
            Self::New => f.write_str("new"),
            Self::Class => f.write_str("class"),
            Self::True => f.write_str("true"),
            Self::False => f.write_str("false"),
            Self::Null => f.write_str("null"),
            Self::LBrace => f.write_str("{"),
            Self::RBrace => f.write_str("}"),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
            Self::LBracket => f.write_str("["),
            Self::RBracket => f.write_str("]"),
            Self::Semicolon => f.write_str(";"),
            Self::Comma => f.write_str(","),
            Self::Colon => f.write_str(":"),
            Self::Question => f.write_str("?"),
            Self::Dot => f.write_str("."),
            Self::At => f.write_str("@"),
            Self::Assign => f.write_str("="),
            Self::Plus => f.write_str("+"),
            Self::Minus => f.write_str("-"),
            Self::Star => f.write_str("*"),
            Self::Slash => f.write_str("/"),
            Self::Percent => f.write_str("%"),
            Self::PlusAssign => f.write_str("+="),
            Self::MinusAssign => f.write_str("-="),
            Self::StarAssign => f.write_str("*="),
            Self::SlashAssign => f.write_str("/="),
            Self::PercentAssign => f.write_str("%="),
            Self::AmpAssign => f.write_str("&="),
            Self::PipeAssign => f.write_str("|="),
            Self::CaretAssign => f.write_str("^="),
            Self::ShlAssign => f.write_str("<<="),
            Self::ShrAssign => f.write_str(">>="),
            Self::Eq => f.write_str("=="),
            Self::Ne => f.write_str("!="),
            Self::RefEq => f.write_str("==="),
            Self::RefNe => f.write_str("!=="),
            Self::Lt => f.write_str("<"),
            Self::Le => f.write_str("<="),
            Self::Gt => f.write_str(">"),
            Self::Ge => f.write_str(">="),
            Self::AndAnd => f.write_str("&&"),
            Self::OrOr => f.write_str("||"),
            Self::XorXor => f.write_str("^^"),
            Self::Amp => f.write_str("&"),
            Self::Pipe => f.write_str("|"),
            Self::Caret => f.write_str("^"),
            Self::Shl => f.write_str("<<"),
            Self::Shr => f.write_str(">>"),
            Self::Rol => f.write_str("<<<"),
            Self::Not => f.write_str("!"),
            Self::Tilde => f.write_str("~"),
            Self::Inc => f.write_str("++"),
            Self::Dec => f.write_str("--"),
            Self::Eof => f.write_str("<eof>"),
        }
    }
}

/// Streaming tokenizer with a single push-back slot.
#[derive(Debug)]
pub struct Lexer {
    src: Box<[u8]>,
    file: Arc<str>,
    pos: usize,
    line: u32,
    /// Line the most recently returned token started on.
    token_line: u32,
    pushback: Option<(Token, u32)>,
}

impl Lexer {
    pub fn new(source: &str, file: impl Into<Arc<str>>) -> Self {
        Self {
            src: source.as_bytes().to_vec().into_boxed_slice(),
            file: file.into(),
            pos: 0,
            line: 1,
            token_line: 1,
            pushback: None,
        }
    }

    #[inline]
    pub fn file(&self) -> &Arc<str> {
        &self.file
    }

    /// Line of the most recently returned token.
    #[inline]
    pub fn token_line(&self) -> u32 {
        self.token_line
    }

    /// Returns the pushed-back token to the stream; at most one may be held.
    pub fn push_back(&mut self, token: Token) {
        debug_assert!(self.pushback.is_none(), "push-back slot already occupied");
        self.pushback = Some((token, self.token_line));
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.file.as_ref(), self.line, message)
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    #[inline]
    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    #[inline]
    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    /// Skips whitespace and comments; errors on an unterminated `/*`.
    fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.bump();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some(b'*') if self.peek() == Some(b'/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => return Err(self.error("unterminated block comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Reads the next token, honouring the push-back slot.
    pub fn next_token(&mut self) -> Result<Token, SyntaxError> {
        if let Some((token, line)) = self.pushback.take() {
            self.token_line = line;
            return Ok(token);
        }
        self.skip_trivia()?;
        self.token_line = self.line;
        let Some(b) = self.peek() else {
            return Ok(Token::Eof);
        };
        match b {
            b'0'..=b'9' => self.lex_number(),
            b'"' => self.lex_string(),
            b'_' | b'a'..=b'z' | b'A'..=b'Z' => Ok(self.lex_ident()),
            _ => self.lex_symbol(),
        }
    }

    fn lex_ident(&mut self) -> Token {
        let start = self.pos;
        while let Some(b) = self.peek() {
            let ident_char =
                b.is_ascii_alphanumeric() || b == b'_' || (DOT_IN_IDENT && b == b'.');
            if !ident_char {
                break;
            }
            self.bump();
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .expect("identifier bytes are ASCII")
            .to_owned();
        match text.as_str() {
            "if" => Token::If,
            "else" => Token::Else,
            "while" => Token::While,
            "do" => Token::Do,
            "for" => Token::For,
            "switch" => Token::Switch,
            "case" => Token::Case,
            "default" => Token::Default,
            "return" => Token::Return,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "delete" => Token::Delete,
            "new" => Token::New,
            "class" => Token::Class,
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            _ => Token::Ident(text),
        }
    }

    fn lex_number(&mut self) -> Result<Token, SyntaxError> {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.bump();
            self.bump();
            let digits_start = self.pos;
            while matches!(self.peek(), Some(b) if b.is_ascii_hexdigit()) {
                self.bump();
            }
            if self.pos == digits_start {
                return Err(self.error("expected hex digits after 0x"));
            }
            let text = std::str::from_utf8(&self.src[digits_start..self.pos]).expect("hex digits");
            // Wrap to i64 via u64 so 0xFFFFFFFFFFFFFFFF is representable.
            let value = u64::from_str_radix(text, 16)
                .map_err(|_| self.error("hex literal out of range"))?;
            return Ok(Token::Int(value as i64));
        }

        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.bump();
        }
        let mut is_real = false;
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(b) if b.is_ascii_digit()) {
            is_real = true;
            self.bump();
            while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let mut lookahead = 1;
            if matches!(self.peek_at(1), Some(b'+' | b'-')) {
                lookahead = 2;
            }
            if matches!(self.peek_at(lookahead), Some(b) if b.is_ascii_digit()) {
                is_real = true;
                for _ in 0..=lookahead {
                    self.bump();
                }
                while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).expect("number digits");
        if is_real {
            let value: f64 = text.parse().map_err(|_| self.error("malformed real literal"))?;
            Ok(Token::Real(value))
        } else {
            let value: i64 = text.parse().map_err(|_| self.error("integer literal out of range"))?;
            Ok(Token::Int(value))
        }
    }

    fn lex_string(&mut self) -> Result<Token, SyntaxError> {
        self.bump(); // opening quote
        let mut bytes = Vec::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string literal")),
                Some(b'"') => return Ok(Token::Str(bytes)),
                Some(b'\\') => match self.bump() {
                    Some(b'n') => bytes.push(b'\n'),
                    Some(b'r') => bytes.push(b'\r'),
                    Some(b't') => bytes.push(b'\t'),
                    Some(b'\\') => bytes.push(b'\\'),
                    Some(b'"') => bytes.push(b'"'),
                    Some(b'0') => bytes.push(0),
                    Some(other) => {
                        return Err(self.error(format!(
                            "unknown escape sequence '\\{}'",
                            other as char
                        )))
                    }
                    None => return Err(self.error("unterminated string literal")),
                },
                Some(b) => bytes.push(b),
            }
        }
    }

    /// Consumes the first matching follow byte, yielding its token, or the
    /// fallback when none match.
    fn pick(&mut self, options: &[(u8, Token)], fallback: Token) -> Token {
        for (follow, token) in options {
            if self.peek() == Some(*follow) {
                self.bump();
                return token.clone();
            }
        }
        fallback
    }

    fn lex_symbol(&mut self) -> Result<Token, SyntaxError> {
        let b = self.bump().expect("caller checked peek");
        let token = match b {
            b'{' => Token::LBrace,
            b'}' => Token::RBrace,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b';' => Token::Semicolon,
            b',' => Token::Comma,
            b'?' => Token::Question,
            b':' => Token::Colon,
            b'@' => Token::At,
            b'.' => Token::Dot,
            b'~' => Token::Tilde,
            b'+' => self.pick(&[(b'+', Token::Inc), (b'=', Token::PlusAssign)], Token::Plus),
            b'-' => self.pick(&[(b'-', Token::Dec), (b'=', Token::MinusAssign)], Token::Minus),
            b'*' => self.pick(&[(b'=', Token::StarAssign)], Token::Star),
            b'/' => self.pick(&[(b'=', Token::SlashAssign)], Token::Slash),
            b'%' => self.pick(&[(b'=', Token::PercentAssign)], Token::Percent),
            b'&' => self.pick(&[(b'&', Token::AndAnd), (b'=', Token::AmpAssign)], Token::Amp),
            b'|' => self.pick(&[(b'|', Token::OrOr), (b'=', Token::PipeAssign)], Token::Pipe),
            b'^' => self.pick(&[(b'^', Token::XorXor), (b'=', Token::CaretAssign)], Token::Caret),
            // Up-to-three-character operators need a second byte of lookahead.
            b'=' => match (self.peek(), self.peek_at(1)) {
                (Some(b'='), Some(b'=')) => self.bump2(Token::RefEq),
                (Some(b'='), _) => self.pick(&[(b'=', Token::Eq)], Token::Assign),
                _ => Token::Assign,
            },
            b'!' => match (self.peek(), self.peek_at(1)) {
                (Some(b'='), Some(b'=')) => self.bump2(Token::RefNe),
                (Some(b'='), _) => self.pick(&[(b'=', Token::Ne)], Token::Not),
                _ => Token::Not,
            },
            b'<' => match (self.peek(), self.peek_at(1)) {
                (Some(b'<'), Some(b'<')) => self.bump2(Token::Rol),
                (Some(b'<'), Some(b'=')) => self.bump2(Token::ShlAssign),
                (Some(b'<'), _) => self.pick(&[(b'<', Token::Shl)], Token::Lt),
                (Some(b'='), _) => self.pick(&[(b'=', Token::Le)], Token::Lt),
                _ => Token::Lt,
            },
            b'>' => match (self.peek(), self.peek_at(1)) {
                (Some(b'>'), Some(b'=')) => self.bump2(Token::ShrAssign),
                (Some(b'>'), _) => self.pick(&[(b'>', Token::Shr)], Token::Gt),
                (Some(b'='), _) => self.pick(&[(b'=', Token::Ge)], Token::Gt),
                _ => Token::Gt,
            },
            other => {
                return Err(self.error(format!("unexpected character '{}'", other as char)));
            }
        };
        Ok(token)
    }

    /// Consumes two already-peeked bytes.
    fn bump2(&mut self, token: Token) -> Token {
        self.bump();
        self.bump();
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lex_all(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source, "test.ss");
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token().unwrap();
            if token == Token::Eof {
                return tokens;
            }
            tokens.push(token);
        }
    }

    #[test]
    fn basic_tokens() {
        assert_eq!(
            lex_all("Integer f() { return 1 + 2; }"),
            vec![
                Token::Ident("Integer".into()),
                Token::Ident("f".into()),
                Token::LParen,
                Token::RParen,
                Token::LBrace,
                Token::Return,
                Token::Int(1),
                Token::Plus,
                Token::Int(2),
                Token::Semicolon,
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn numeric_literals() {
        assert_eq!(
            lex_all("0x10 42 1.5 2e3 1.5e-2"),
            vec![
                Token::Int(16),
                Token::Int(42),
                Token::Real(1.5),
                Token::Real(2e3),
                Token::Real(1.5e-2),
            ]
        );
    }

    #[test]
    fn member_access_on_int_literal() {
        // "1.x" must not lex the dot into the number
        assert_eq!(
            lex_all("a.b 1.x"),
            vec![
                Token::Ident("a".into()),
                Token::Dot,
                Token::Ident("b".into()),
                Token::Int(1),
                Token::Dot,
                Token::Ident("x".into()),
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            lex_all(r#""a\n\t\"\\\0b""#),
            vec![Token::Str(vec![b'a', b'\n', b'\t', b'"', b'\\', 0, b'b'])]
        );
    }

    #[test]
    fn multi_char_operators() {
        assert_eq!(
            lex_all("=== !== == != <= >= <<< << <<= >> >>= && || ^^ ++ --"),
            vec![
                Token::RefEq,
                Token::RefNe,
                Token::Eq,
                Token::Ne,
                Token::Le,
                Token::Ge,
                Token::Rol,
                Token::Shl,
                Token::ShlAssign,
                Token::Shr,
                Token::ShrAssign,
                Token::AndAnd,
                Token::OrOr,
                Token::XorXor,
                Token::Inc,
                Token::Dec,
            ]
        );
    }

    #[test]
    fn comments_and_lines() {
        let mut lexer = Lexer::new("a // line comment\n/* block\ncomment */ b", "test.ss");
        assert_eq!(lexer.next_token().unwrap(), Token::Ident("a".into()));
        assert_eq!(lexer.token_line(), 1);
        assert_eq!(lexer.next_token().unwrap(), Token::Ident("b".into()));
        assert_eq!(lexer.token_line(), 3);
    }

    #[test]
    fn push_back_restores_token() {
        let mut lexer = Lexer::new("a b", "test.ss");
        let a = lexer.next_token().unwrap();
        lexer.push_back(a.clone());
        assert_eq!(lexer.next_token().unwrap(), a);
        assert_eq!(lexer.next_token().unwrap(), Token::Ident("b".into()));
    }

    #[test]
    fn unterminated_string_reports_position() {
        let mut lexer = Lexer::new("\n\"abc", "test.ss");
        let err = lexer.next_token().unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn unterminated_block_comment_errors() {
        let mut lexer = Lexer::new("/* never closed", "test.ss");
        assert!(lexer.next_token().is_err());
    }

    /// Round trip: lexing the printed form of a token stream yields the same
    /// stream.
    #[test]
    fn print_lex_round_trip() {
        let sources = [
            "Integer f(Integer n) { Integer s = 0; for (Integer i = 1; i <= n; i++) s += i; return s; }",
            "String g() { return \"a\" + \"b\\n\"; }",
            "class C { Integer x; } Real r = 1.5e3;",
            "x <<<= 1; y === null; z = a ?: b;",
        ];
        for source in sources {
            let tokens = lex_all(source);
            let printed = tokens
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            assert_eq!(lex_all(&printed), tokens, "source: {source}");
        }
    }
}
