//! Recursive-descent parser over the token stream.
//!
//! Top-level productions declare functions, classes and globals, each
//! optionally prefixed by a namespace path (`ns@ns@name`). Expressions are
//! parsed by precedence climbing following the operator ladder. `@include`
//! pushes a new lexer frame (max depth 5) resolved through a pluggable
//! [`IncludeLoader`], keeping file I/O outside the language core.
//!
//! Errors are recovered at the top-level item boundary: the failing item is
//! dropped and parsing continues with the next one.

use std::collections::VecDeque;

use crate::ast::{
    AstClass, AstFunction, AstGlobal, AttrDef, BinOp, CodeLoc, Expr, ExprLoc, ParsedScript, Stmt,
    SwitchCase, UniOp,
};
use crate::exception::SyntaxError;
use crate::lexer::{Lexer, Token};
use crate::types::{TypeDef, TypeRef, TypeTable};

/// Method name that marks a class constructor.
pub const CONSTRUCTOR_NAME: &str = "__constructor";

/// Maximum `@include` nesting depth.
pub const MAX_INCLUDE_DEPTH: usize = 5;

/// Resolves `@include` paths to source text.
///
/// The core never touches the filesystem; hosts supply a loader (tests use a
/// map). `NoIncludes` rejects every path.
pub trait IncludeLoader {
    fn load(&self, path: &str) -> Option<String>;
}

/// Loader that rejects every include.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIncludes;

impl IncludeLoader for NoIncludes {
    fn load(&self, _path: &str) -> Option<String> {
        None
    }
}

impl IncludeLoader for ahash::AHashMap<String, String> {
    fn load(&self, path: &str) -> Option<String> {
        self.get(path).cloned()
    }
}

/// Parses a source buffer into declarations, registering script classes into
/// the type table as their headers are seen.
///
/// Returns the surviving declarations plus every error encountered; a failing
/// top-level item contributes an error and is dropped.
pub fn parse_source(
    source: &str,
    file: &str,
    types: &mut TypeTable,
    loader: &dyn IncludeLoader,
) -> (ParsedScript, Vec<SyntaxError>) {
    let mut parser = Parser::new(source, file, types, loader);
    let script = parser.parse_script();
    (script, parser.errors)
}

struct Frame {
    lexer: Lexer,
    /// Tokens peeked from this frame's stream before an include interrupted
    /// it; replayed when the frame becomes the top again.
    saved: VecDeque<(Token, CodeLoc)>,
}

struct Parser<'a> {
    frames: Vec<Frame>,
    types: &'a mut TypeTable,
    loader: &'a dyn IncludeLoader,
    peeked: VecDeque<(Token, CodeLoc)>,
    errors: Vec<SyntaxError>,
    script: ParsedScript,
}

impl<'a> Parser<'a> {
    fn new(source: &str, file: &str, types: &'a mut TypeTable, loader: &'a dyn IncludeLoader) -> Self {
        Self {
            frames: vec![Frame {
                lexer: Lexer::new(source, file),
                saved: VecDeque::new(),
            }],
            types,
            loader,
            peeked: VecDeque::new(),
            errors: Vec::new(),
            script: ParsedScript::default(),
        }
    }

    // ------------------------------------------------------------------
    // Token stream plumbing
    // ------------------------------------------------------------------

    /// Reads the next token from the frame stack, popping finished includes.
    fn pull(&mut self) -> Result<(Token, CodeLoc), SyntaxError> {
        loop {
            let frame = self.frames.last_mut().expect("at least one lexer frame");
            if let Some(entry) = frame.saved.pop_front() {
                return Ok(entry);
            }
            let token = frame.lexer.next_token()?;
            let loc = CodeLoc::new(frame.lexer.file().clone(), frame.lexer.token_line());
            if token == Token::Eof && self.frames.len() > 1 {
                self.frames.pop();
                continue;
            }
            return Ok((token, loc));
        }
    }

    fn fill(&mut self, n: usize) -> Result<(), SyntaxError> {
        while self.peeked.len() < n {
            let entry = self.pull()?;
            self.peeked.push_back(entry);
        }
        Ok(())
    }

    fn next(&mut self) -> Result<(Token, CodeLoc), SyntaxError> {
        if let Some(entry) = self.peeked.pop_front() {
            return Ok(entry);
        }
        self.pull()
    }

    fn peek_at(&mut self, index: usize) -> Result<&Token, SyntaxError> {
        self.fill(index + 1)?;
        Ok(&self.peeked[index].0)
    }

    fn peek(&mut self) -> Result<&Token, SyntaxError> {
        self.peek_at(0)
    }

    fn loc(&mut self) -> CodeLoc {
        if self.fill(1).is_ok() {
            self.peeked[0].1.clone()
        } else {
            let frame = self.frames.last().expect("at least one lexer frame");
            CodeLoc::new(frame.lexer.file().clone(), frame.lexer.token_line())
        }
    }

    fn unexpected(&self, found: &Token, loc: &CodeLoc, expected: &str) -> SyntaxError {
        SyntaxError::new(
            loc.file.as_ref(),
            loc.line,
            format!("expected {expected}, found '{found}'"),
        )
    }

    /// Consumes one token, requiring it to equal `want`.
    fn expect(&mut self, want: &Token, describe: &str) -> Result<CodeLoc, SyntaxError> {
        let (token, loc) = self.next()?;
        if &token == want {
            Ok(loc)
        } else {
            Err(self.unexpected(&token, &loc, describe))
        }
    }

    fn expect_ident(&mut self, describe: &str) -> Result<(String, CodeLoc), SyntaxError> {
        let (token, loc) = self.next()?;
        match token {
            Token::Ident(name) => Ok((name, loc)),
            other => Err(self.unexpected(&other, &loc, describe)),
        }
    }

    /// Consumes the token if it matches, returning whether it did.
    fn eat(&mut self, want: &Token) -> Result<bool, SyntaxError> {
        if self.peek()? == want {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // ------------------------------------------------------------------
    // Lookahead helpers
    // ------------------------------------------------------------------

    /// Token length of the `Ident (@ Ident)*` chain at the front of the
    /// stream, or 0 if the stream does not start with an identifier.
    fn qualified_chain_len(&mut self) -> Result<usize, SyntaxError> {
        if !matches!(self.peek_at(0)?, Token::Ident(_)) {
            return Ok(0);
        }
        let mut len = 1;
        while matches!(self.peek_at(len)?, Token::At) && matches!(self.peek_at(len + 1)?, Token::Ident(_)) {
            len += 2;
        }
        Ok(len)
    }

    /// Whether the peeked qualified chain of `len` tokens names a type.
    fn chain_is_type(&mut self, len: usize) -> Result<bool, SyntaxError> {
        self.fill(len)?;
        let mut parts = Vec::new();
        for i in (0..len).step_by(2) {
            match &self.peeked[i].0 {
                Token::Ident(name) => parts.push(name.clone()),
                _ => return Ok(false),
            }
        }
        let name = parts.pop().expect("chain has at least one identifier");
        Ok(self.types.resolve(&parts, &name).is_some())
    }

    /// Number of tokens taken by `[]` pairs starting at `index`.
    fn array_suffix_len(&mut self, index: usize) -> Result<usize, SyntaxError> {
        let mut len = 0;
        while matches!(self.peek_at(index + len)?, Token::LBracket)
            && matches!(self.peek_at(index + len + 1)?, Token::RBracket)
        {
            len += 2;
        }
        Ok(len)
    }

    // ------------------------------------------------------------------
    // Types and names
    // ------------------------------------------------------------------

    /// Parses `ns@..@Name ([])*` into a resolved type reference.
    fn parse_type(&mut self) -> Result<(TypeRef, CodeLoc), SyntaxError> {
        let (first, loc) = self.expect_ident("a type name")?;
        let mut parts = vec![first];
        while matches!(self.peek()?, Token::At) {
            self.next()?;
            let (part, _) = self.expect_ident("a name after '@'")?;
            parts.push(part);
        }
        let name = parts.pop().expect("at least one name part");
        let Some(def) = self.types.resolve(&parts, &name) else {
            let display = if parts.is_empty() {
                name
            } else {
                format!("{}@{name}", parts.join("@"))
            };
            return Err(SyntaxError::new(
                loc.file.as_ref(),
                loc.line,
                format!("unknown type '{display}'"),
            ));
        };
        let mut depth = 0u8;
        while matches!(self.peek()?, Token::LBracket) && matches!(self.peek_at(1)?, Token::RBracket) {
            self.next()?;
            self.next()?;
            depth += 1;
        }
        Ok((TypeRef { def, depth }, loc))
    }

    /// Parses `Ident (@ Ident)*`, returning the parts.
    fn parse_qualified_name(&mut self) -> Result<(Vec<String>, CodeLoc), SyntaxError> {
        let (first, loc) = self.expect_ident("a name")?;
        let mut parts = vec![first];
        while matches!(self.peek()?, Token::At) && matches!(self.peek_at(1)?, Token::Ident(_)) {
            self.next()?;
            let (part, _) = self.expect_ident("a name after '@'")?;
            parts.push(part);
        }
        Ok((parts, loc))
    }

    // ------------------------------------------------------------------
    // Top level
    // ------------------------------------------------------------------

    fn parse_script(&mut self) -> ParsedScript {
        loop {
            let at_eof = matches!(self.peek(), Ok(Token::Eof));
            if at_eof {
                break;
            }
            if let Err(error) = self.parse_item() {
                self.errors.push(error);
                self.synchronize();
            }
        }
        std::mem::take(&mut self.script)
    }

    fn parse_item(&mut self) -> Result<(), SyntaxError> {
        match self.peek()? {
            Token::At => self.parse_include(),
            Token::Class => self.parse_class(),
            _ => self.parse_function_or_global(),
        }
    }

    /// Skips tokens to the next likely item boundary: a top-level `;`, the
    /// `}` closing the failing item, or end of input.
    fn synchronize(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.next() {
                Ok((Token::Eof, _)) => return,
                Ok((Token::LBrace, _)) => depth += 1,
                Ok((Token::RBrace, _)) => {
                    if depth <= 1 {
                        return;
                    }
                    depth -= 1;
                }
                Ok((Token::Semicolon, _)) if depth == 0 => return,
                Ok(_) => {}
                Err(_) => return,
            }
        }
    }

    fn parse_include(&mut self) -> Result<(), SyntaxError> {
        self.expect(&Token::At, "'@'")?;
        let (word, loc) = self.expect_ident("'include'")?;
        if word != "include" {
            return Err(SyntaxError::new(
                loc.file.as_ref(),
                loc.line,
                format!("unknown directive '@{word}'"),
            ));
        }
        let (token, path_loc) = self.next()?;
        let Token::Str(path_bytes) = token else {
            return Err(self.unexpected(&token, &path_loc, "an include path string"));
        };
        let path = String::from_utf8_lossy(&path_bytes).into_owned();
        if self.frames.len() > MAX_INCLUDE_DEPTH {
            return Err(SyntaxError::new(
                path_loc.file.as_ref(),
                path_loc.line,
                format!("include depth exceeds {MAX_INCLUDE_DEPTH} at '{path}'"),
            ));
        }
        let Some(source) = self.loader.load(&path) else {
            return Err(SyntaxError::new(
                path_loc.file.as_ref(),
                path_loc.line,
                format!("cannot open include '{path}'"),
            ));
        };
        // Tokens already peeked from the including file resume after the
        // included content.
        let pending = std::mem::take(&mut self.peeked);
        let top = self.frames.last_mut().expect("at least one lexer frame");
        for entry in pending.into_iter().rev() {
            top.saved.push_front(entry);
        }
        self.frames.push(Frame {
            lexer: Lexer::new(&source, path),
            saved: VecDeque::new(),
        });
        Ok(())
    }

    fn parse_class(&mut self) -> Result<(), SyntaxError> {
        let pos = self.expect(&Token::Class, "'class'")?;
        let (name_parts, name_loc) = self.parse_qualified_name()?;
        let name = name_parts.join("@");
        let class_index = self.script.classes.len();
        let type_id = match self.types.register_class(&name, TypeDef::Script(class_index)) {
            Ok(id) => id,
            Err(_) => {
                return Err(SyntaxError::new(
                    name_loc.file.as_ref(),
                    name_loc.line,
                    format!("type '{name}' is already defined"),
                ));
            }
        };
        // Reserve the slot so methods of this class can reference it while
        // the body parses; a body error leaves an empty class behind.
        self.script.classes.push(AstClass {
            pos: pos.clone(),
            name: name.clone(),
            type_id,
            attributes: Vec::new(),
            methods: Vec::new(),
        });

        self.expect(&Token::LBrace, "'{' to open the class body")?;
        let mut attributes = Vec::new();
        let mut methods = Vec::new();
        loop {
            if self.eat(&Token::RBrace)? {
                break;
            }
            let (ty, member_pos) = self.parse_type()?;
            let (member_name, _) = self.expect_ident("an attribute or method name")?;
            if matches!(self.peek()?, Token::LParen) {
                let function = self.parse_function_rest(member_pos, member_name, ty)?;
                methods.push(function);
            } else {
                self.expect(&Token::Semicolon, "';' after the attribute")?;
                attributes.push(AttrDef {
                    name: member_name,
                    ty,
                    read_only: false,
                });
            }
        }
        let class = &mut self.script.classes[class_index];
        class.attributes = attributes;
        class.methods = methods;
        Ok(())
    }

    fn parse_function_or_global(&mut self) -> Result<(), SyntaxError> {
        let (ty, pos) = self.parse_type()?;
        let (name_parts, _) = self.parse_qualified_name()?;
        let name = name_parts.join("@");
        if matches!(self.peek()?, Token::LParen) {
            let function = self.parse_function_rest(pos, name, ty)?;
            self.script.functions.push(function);
        } else {
            let init = if self.eat(&Token::Assign)? {
                Some(self.parse_expr()?)
            } else {
                None
            };
            self.expect(&Token::Semicolon, "';' after the global definition")?;
            self.script.globals.push(AstGlobal { pos, name, ty, init });
        }
        Ok(())
    }

    /// Parses `(args) { body }` after the name of a function or method.
    fn parse_function_rest(
        &mut self,
        pos: CodeLoc,
        name: String,
        ret: TypeRef,
    ) -> Result<AstFunction, SyntaxError> {
        self.expect(&Token::LParen, "'('")?;
        let mut args = Vec::new();
        if !self.eat(&Token::RParen)? {
            loop {
                let (arg_ty, _) = self.parse_type()?;
                let (arg_name, _) = self.expect_ident("an argument name")?;
                args.push((arg_ty, arg_name));
                if self.eat(&Token::Comma)? {
                    continue;
                }
                self.expect(&Token::RParen, "')' after the arguments")?;
                break;
            }
        }
        let body = self.parse_block()?;
        Ok(AstFunction {
            pos,
            name,
            ret,
            args,
            body,
        })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_block(&mut self) -> Result<Stmt, SyntaxError> {
        self.expect(&Token::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.eat(&Token::RBrace)? {
            if matches!(self.peek()?, Token::Eof) {
                let loc = self.loc();
                return Err(SyntaxError::new(
                    loc.file.as_ref(),
                    loc.line,
                    "unterminated block",
                ));
            }
            stmts.push(self.parse_stmt()?);
        }
        Ok(Stmt::Block(stmts))
    }

    fn parse_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let loc = self.loc();
        match self.peek()? {
            Token::LBrace => self.parse_block(),
            Token::Semicolon => {
                self.next()?;
                Ok(Stmt::Nop)
            }
            Token::If => self.parse_if(),
            Token::While => self.parse_while(None),
            Token::Do => self.parse_do(None),
            Token::For => self.parse_for(None),
            Token::Switch => self.parse_switch(),
            Token::Return => {
                self.next()?;
                let value = if matches!(self.peek()?, Token::Semicolon) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(&Token::Semicolon, "';' after return")?;
                Ok(Stmt::Return { pos: loc, value })
            }
            Token::Break => {
                self.next()?;
                let tag = self.parse_optional_tag()?;
                self.expect(&Token::Semicolon, "';' after break")?;
                Ok(Stmt::Break { pos: loc, tag })
            }
            Token::Continue => {
                self.next()?;
                let tag = self.parse_optional_tag()?;
                self.expect(&Token::Semicolon, "';' after continue")?;
                Ok(Stmt::Continue { pos: loc, tag })
            }
            Token::Delete => {
                self.next()?;
                let target = self.parse_expr()?;
                self.expect(&Token::Semicolon, "';' after delete")?;
                Ok(Stmt::Delete { pos: loc, target })
            }
            Token::Ident(_) => {
                // Labeled loop: `tag: for (...)`.
                if matches!(self.peek_at(1)?, Token::Colon)
                    && matches!(self.peek_at(2)?, Token::For | Token::While | Token::Do)
                {
                    let (tag, _) = self.expect_ident("a loop tag")?;
                    self.expect(&Token::Colon, "':'")?;
                    return match self.peek()? {
                        Token::For => self.parse_for(Some(tag)),
                        Token::While => self.parse_while(Some(tag)),
                        _ => self.parse_do(Some(tag)),
                    };
                }
                // Declaration: a type chain (plus `[]` pairs) followed by a
                // name; anything else is an expression statement.
                let chain = self.qualified_chain_len()?;
                let after = chain + self.array_suffix_len(chain)?;
                if matches!(self.peek_at(after)?, Token::Ident(_)) {
                    self.parse_var_def()
                } else {
                    self.parse_expr_stmt()
                }
            }
            _ => self.parse_expr_stmt(),
        }
    }

    fn parse_optional_tag(&mut self) -> Result<Option<String>, SyntaxError> {
        if matches!(self.peek()?, Token::Ident(_)) {
            let (tag, _) = self.expect_ident("a loop tag")?;
            Ok(Some(tag))
        } else {
            Ok(None)
        }
    }

    fn parse_expr_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let expr = self.parse_expr()?;
        self.expect(&Token::Semicolon, "';' after the expression")?;
        Ok(Stmt::Expr(expr))
    }

    fn parse_var_def(&mut self) -> Result<Stmt, SyntaxError> {
        let (ty, pos) = self.parse_type()?;
        let (name, _) = self.expect_ident("a variable name")?;
        let init = if self.eat(&Token::Assign)? {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(&Token::Semicolon, "';' after the definition")?;
        Ok(Stmt::VarDef { pos, ty, name, init })
    }

    fn parse_if(&mut self) -> Result<Stmt, SyntaxError> {
        self.expect(&Token::If, "'if'")?;
        self.expect(&Token::LParen, "'(' after if")?;
        let cond = self.parse_expr()?;
        self.expect(&Token::RParen, "')' after the condition")?;
        let then_body = Box::new(self.parse_stmt()?);
        let else_body = if self.eat(&Token::Else)? {
            Some(Box::new(self.parse_stmt()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
        })
    }

    fn parse_while(&mut self, tag: Option<String>) -> Result<Stmt, SyntaxError> {
        let pos = self.expect(&Token::While, "'while'")?;
        self.expect(&Token::LParen, "'(' after while")?;
        let cond = self.parse_expr()?;
        self.expect(&Token::RParen, "')' after the condition")?;
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::Loop { pos, tag, init: None, post_check: false, cond: Some(cond), increment: None, body })
    }

    fn parse_do(&mut self, tag: Option<String>) -> Result<Stmt, SyntaxError> {
        let pos = self.expect(&Token::Do, "'do'")?;
        let body = Box::new(self.parse_stmt()?);
        self.expect(&Token::While, "'while' after the do body")?;
        self.expect(&Token::LParen, "'(' after while")?;
        let cond = self.parse_expr()?;
        self.expect(&Token::RParen, "')' after the condition")?;
        self.expect(&Token::Semicolon, "';' after do..while")?;
        Ok(Stmt::Loop { pos, tag, init: None, post_check: true, cond: Some(cond), increment: None, body })
    }

    fn parse_for(&mut self, tag: Option<String>) -> Result<Stmt, SyntaxError> {
        let pos = self.expect(&Token::For, "'for'")?;
        self.expect(&Token::LParen, "'(' after for")?;

        let init = if self.eat(&Token::Semicolon)? {
            None
        } else {
            let chain = self.qualified_chain_len()?;
            let after = chain + self.array_suffix_len(chain)?;
            let stmt = if chain > 0 && matches!(self.peek_at(after)?, Token::Ident(_)) {
                self.parse_var_def()?
            } else {
                self.parse_expr_stmt()?
            };
            Some(Box::new(stmt))
        };

        let cond = if matches!(self.peek()?, Token::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&Token::Semicolon, "';' after the loop condition")?;

        let increment = if matches!(self.peek()?, Token::RParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(&Token::RParen, "')' after the loop header")?;

        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::Loop { pos, tag, init, post_check: false, cond, increment, body })
    }

    fn parse_switch(&mut self) -> Result<Stmt, SyntaxError> {
        let pos = self.expect(&Token::Switch, "'switch'")?;
        self.expect(&Token::LParen, "'(' after switch")?;
        let value = self.parse_expr()?;
        self.expect(&Token::RParen, "')' after the switch value")?;
        self.expect(&Token::LBrace, "'{' to open the switch body")?;
        let mut cases = Vec::new();
        loop {
            if self.eat(&Token::RBrace)? {
                break;
            }
            let case_value = match self.peek()? {
                Token::Case => {
                    self.next()?;
                    let value = self.parse_expr()?;
                    Some(value)
                }
                Token::Default => {
                    self.next()?;
                    None
                }
                other => {
                    let other = other.clone();
                    let loc = self.loc();
                    return Err(self.unexpected(&other, &loc, "'case', 'default' or '}'"));
                }
            };
            self.expect(&Token::Colon, "':' after the case label")?;
            let mut body = Vec::new();
            while !matches!(self.peek()?, Token::Case | Token::Default | Token::RBrace) {
                body.push(self.parse_stmt()?);
            }
            cases.push(SwitchCase {
                value: case_value,
                body,
            });
        }
        Ok(Stmt::Switch { pos, value, cases })
    }

    // ------------------------------------------------------------------
    // Expressions, lowest to highest precedence
    // ------------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<ExprLoc, SyntaxError> {
        self.parse_assign()
    }

    /// Assignment is right-associative and the lowest level of the ladder.
    fn parse_assign(&mut self) -> Result<ExprLoc, SyntaxError> {
        let target = self.parse_ternary()?;
        let op = match self.peek()? {
            Token::Assign => None,
            Token::PlusAssign => Some(BinOp::Add),
            Token::MinusAssign => Some(BinOp::Sub),
            Token::StarAssign => Some(BinOp::Mul),
            Token::SlashAssign => Some(BinOp::Div),
            Token::PercentAssign => Some(BinOp::Mod),
            Token::AmpAssign => Some(BinOp::BitAnd),
            Token::PipeAssign => Some(BinOp::BitOr),
            Token::CaretAssign => Some(BinOp::BitXor),
            Token::ShlAssign => Some(BinOp::Shl),
            Token::ShrAssign => Some(BinOp::Shr),
            _ => return Ok(target),
        };
        self.next()?;
        let value = self.parse_assign()?;
        let pos = target.pos.clone();
        Ok(ExprLoc::new(
            pos,
            Expr::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
        ))
    }

    fn parse_ternary(&mut self) -> Result<ExprLoc, SyntaxError> {
        let cond = self.parse_binary(0)?;
        if !self.eat(&Token::Question)? {
            return Ok(cond);
        }
        let when_true = if self.eat(&Token::Colon)? {
            None
        } else {
            let value = self.parse_assign()?;
            self.expect(&Token::Colon, "':' in the ternary expression")?;
            Some(Box::new(value))
        };
        let when_false = Box::new(self.parse_assign()?);
        let pos = cond.pos.clone();
        Ok(ExprLoc::new(
            pos,
            Expr::Ternary {
                cond: Box::new(cond),
                when_true,
                when_false,
            },
        ))
    }

    /// One rung of the binary-operator ladder; `level` indexes
    /// [`binary_op`]'s precedence table, lowest binding first.
    fn parse_binary(&mut self, level: usize) -> Result<ExprLoc, SyntaxError> {
        if level == BINARY_LEVELS {
            return self.parse_unary();
        }
        let mut left = self.parse_binary(level + 1)?;
        while let Some(op) = binary_op(level, self.peek()?) {
            self.next()?;
            let right = self.parse_binary(level + 1)?;
            let pos = left.pos.clone();
            left = ExprLoc::new(pos, Expr::BinOp { op, left: Box::new(left), right: Box::new(right) });
        }
        Ok(left)
    }


    fn parse_unary(&mut self) -> Result<ExprLoc, SyntaxError> {
        let loc = self.loc();
        let op = match self.peek()? {
            Token::Minus => Some(UniOp::Neg),
            Token::Not => Some(UniOp::Not),
            Token::Tilde => Some(UniOp::BitNot),
            Token::Inc | Token::Dec => {
                // Pre-increment is sugar for `x += 1`.
                let op = if matches!(self.peek()?, Token::Inc) { BinOp::Add } else { BinOp::Sub };
                self.next()?;
                let target = self.parse_unary()?;
                let one = ExprLoc::new(loc.clone(), Expr::Int(1));
                let assign = Expr::Assign { op: Some(op), target: Box::new(target), value: Box::new(one) };
                return Ok(ExprLoc::new(loc, assign));
            }
            Token::New => return self.parse_new(),
            _ => None,
        };
        if let Some(op) = op {
            self.next()?;
            let value = self.parse_unary()?;
            return Ok(ExprLoc::new(loc, Expr::UniOp { op, value: Box::new(value) }));
        }
        self.parse_postfix()
    }

    fn parse_new(&mut self) -> Result<ExprLoc, SyntaxError> {
        let loc = self.expect(&Token::New, "'new'")?;
        let (parts, name_loc) = self.parse_qualified_name()?;
        let mut parts = parts;
        let name = parts.pop().expect("at least one name part");
        let Some(def) = self.types.resolve(&parts, &name) else {
            return Err(SyntaxError::new(
                name_loc.file.as_ref(),
                name_loc.line,
                format!("unknown type '{name}'"),
            ));
        };
        // Trailing `[]` pairs raise the element type's depth; a final
        // `[expr]` makes this an array creation.
        let mut depth = 0u8;
        while matches!(self.peek()?, Token::LBracket) && matches!(self.peek_at(1)?, Token::RBracket) {
            self.next()?;
            self.next()?;
            depth += 1;
        }
        if matches!(self.peek()?, Token::LBracket) {
            self.next()?;
            let len = self.parse_expr()?;
            self.expect(&Token::RBracket, "']' after the array length")?;
            return Ok(ExprLoc::new(loc, Expr::CreateArray { elem: TypeRef { def, depth }, len: Box::new(len) }));
        }
        if depth > 0 {
            return Err(SyntaxError::new(
                name_loc.file.as_ref(),
                name_loc.line,
                "array creation requires a length ('new T[len]')",
            ));
        }
        self.expect(&Token::LParen, "'(' after the class name")?;
        let args = self.parse_call_args()?;
        Ok(ExprLoc::new(loc, Expr::CreateObject { class: def, args }))
    }

    /// Parses the argument list after an already-consumed `(`.
    fn parse_call_args(&mut self) -> Result<Vec<ExprLoc>, SyntaxError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen)? {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.eat(&Token::Comma)? {
                continue;
            }
            self.expect(&Token::RParen, "')' after the arguments")?;
            return Ok(args);
        }
    }

    fn parse_postfix(&mut self) -> Result<ExprLoc, SyntaxError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek()? {
                Token::Dot => {
                    self.next()?;
                    let (name, _) = self.expect_ident("an attribute name after '.'")?;
                    let pos = expr.pos.clone();
                    expr = ExprLoc::new(pos, Expr::Element { obj: Box::new(expr), name });
                }
                Token::LBracket => {
                    self.next()?;
                    let index = self.parse_expr()?;
                    self.expect(&Token::RBracket, "']' after the index")?;
                    let pos = expr.pos.clone();
                    expr = ExprLoc::new(pos, Expr::Index { arr: Box::new(expr), index: Box::new(index) });
                }
                Token::LParen => {
                    self.next()?;
                    let args = self.parse_call_args()?;
                    let pos = expr.pos.clone();
                    expr = match expr.expr {
                        Expr::Variable(qualified) => {
                            let mut parts: Vec<String> = qualified.split('@').map(str::to_owned).collect();
                            let name = parts.pop().expect("name has at least one part");
                            ExprLoc::new(pos, Expr::Call { path: parts, name, args })
                        }
                        Expr::Element { obj, name } => ExprLoc::new(pos, Expr::MethodCall { obj, name, args }),
                        _ => {
                            return Err(SyntaxError::new(
                                pos.file.as_ref(),
                                pos.line,
                                "only named functions and methods can be called",
                            ));
                        }
                    };
                }
                Token::Inc => {
                    self.next()?;
                    let pos = expr.pos.clone();
                    expr = ExprLoc::new(pos, Expr::PostInc(Box::new(expr)));
                }
                Token::Dec => {
                    self.next()?;
                    let pos = expr.pos.clone();
                    expr = ExprLoc::new(pos, Expr::PostDec(Box::new(expr)));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<ExprLoc, SyntaxError> {
        let loc = self.loc();
        match self.peek()? {
            Token::Int(_) => {
                let (token, _) = self.next()?;
                let Token::Int(value) = token else { unreachable!() };
                Ok(ExprLoc::new(loc, Expr::Int(value)))
            }
            Token::Real(_) => {
                let (token, _) = self.next()?;
                let Token::Real(value) = token else { unreachable!() };
                Ok(ExprLoc::new(loc, Expr::Real(value)))
            }
            Token::Str(_) => {
                let (token, _) = self.next()?;
                let Token::Str(bytes) = token else { unreachable!() };
                Ok(ExprLoc::new(loc, Expr::Str(bytes)))
            }
            Token::True | Token::False => {
                let (token, _) = self.next()?;
                Ok(ExprLoc::new(loc, Expr::Bool(token == Token::True)))
            }
            Token::Null => {
                self.next()?;
                Ok(ExprLoc::new(loc, Expr::Null))
            }
            Token::LParen => {
                self.next()?;
                // `(Type)expr` is a cast when the parenthesized tokens name a
                // type; otherwise this is a parenthesized expression.
                let chain = self.qualified_chain_len()?;
                if chain > 0 {
                    let after = chain + self.array_suffix_len(chain)?;
                    if matches!(self.peek_at(after)?, Token::RParen) && self.chain_is_type(chain)? {
                        let (ty, _) = self.parse_type()?;
                        self.expect(&Token::RParen, "')' after the cast type")?;
                        let value = self.parse_unary()?;
                        return Ok(ExprLoc::new(loc, Expr::Cast { ty, value: Box::new(value) }));
                    }
                }
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen, "')' to close the expression")?;
                Ok(expr)
            }
            Token::LBracket => {
                self.next()?;
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket)? {
                    loop {
                        items.push(self.parse_expr()?);
                        if self.eat(&Token::Comma)? {
                            continue;
                        }
                        self.expect(&Token::RBracket, "']' after the array literal")?;
                        break;
                    }
                }
                Ok(ExprLoc::new(loc, Expr::ArrayLiteral(items)))
            }
            Token::Ident(_) => {
                let (parts, _) = self.parse_qualified_name()?;
                Ok(ExprLoc::new(loc, Expr::Variable(parts.join("@"))))
            }
            other => {
                let other = other.clone();
                Err(self.unexpected(&other, &loc, "an expression"))
            }
        }
    }
}

/// Number of binary precedence levels in [`binary_op`].
const BINARY_LEVELS: usize = 11;

/// The binary-operator ladder, lowest to highest: logical or/and/xor,
/// bitwise or/xor/and, equality, relational, shift, additive,
/// multiplicative.
fn binary_op(level: usize, token: &Token) -> Option<BinOp> {
    Some(match (level, token) {
        (0, Token::OrOr) => BinOp::Or,
        (1, Token::AndAnd) => BinOp::And,
        (2, Token::XorXor) => BinOp::Xor,
        (3, Token::Pipe) => BinOp::BitOr,
        (4, Token::Caret) => BinOp::BitXor,
        (5, Token::Amp) => BinOp::BitAnd,
        (6, Token::Eq) => BinOp::Eq,
        (6, Token::Ne) => BinOp::Ne,
        (6, Token::RefEq) => BinOp::RefEq,
        (6, Token::RefNe) => BinOp::RefNe,
        (7, Token::Lt) => BinOp::Lt,
        (7, Token::Le) => BinOp::Le,
        (7, Token::Gt) => BinOp::Gt,
        (7, Token::Ge) => BinOp::Ge,
        (8, Token::Shl) => BinOp::Shl,
        (8, Token::Shr) => BinOp::Shr,
        (8, Token::Rol) => BinOp::Rol,
        (9, Token::Plus) => BinOp::Add,
        (9, Token::Minus) => BinOp::Sub,
        (10, Token::Star) => BinOp::Mul,
        (10, Token::Slash) => BinOp::Div,
        (10, Token::Percent) => BinOp::Mod,
        _ => return None,
    })
}
