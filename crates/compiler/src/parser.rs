//! Recursive-descent parser for Cool
//!
//! One parse per source file, all files accumulating into a shared
//! [`Program`] so the prelude classes and user classes end up in a single
//! class list. Parsing stops at the first syntax error in a file; the
//! driver still parses the remaining files so every file gets reported.
//!
//! Operator precedence, loosest first: assignment, `match` (postfix),
//! comparisons (`==` `<=` `<`), additive, multiplicative, unary `!`/`-`,
//! dispatch `.m(...)`, primary. `==` is sugar for a dynamic `equals` call.

use crate::ast::{
    Attribute, BinaryOp, Case, Class, Expr, Extends, Feature, Formal, Ident, Method, Program,
};
use crate::diag::Diagnostic;
use crate::lexer::{Lexer, Token, TokenKind};
use std::path::{Path, PathBuf};

/// Parse one source file into the program.
pub fn parse_file(
    source: &str,
    file: &Path,
    is_prelude: bool,
    program: &mut Program,
) -> Result<(), Diagnostic> {
    let tokens = Lexer::new(source, file).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        file: file.to_path_buf(),
        is_prelude,
        program,
    };
    parser.parse()
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    file: PathBuf,
    is_prelude: bool,
    program: &'a mut Program,
}

impl Parser<'_> {
    fn parse(&mut self) -> Result<(), Diagnostic> {
        while !self.check(&TokenKind::Eof) {
            let class = self.parse_class()?;
            self.program.declare_class(class);
        }
        Ok(())
    }

    // ----- token plumbing -------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_kind_at(&self, ahead: usize) -> &TokenKind {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + ahead).min(last)].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(&self.file, self.peek().span, message)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, Diagnostic> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.error(format!(
                "expected {}, found {}",
                kind.describe(),
                self.peek_kind().describe()
            )))
        }
    }

    fn expect_type_id(&mut self) -> Result<Ident, Diagnostic> {
        match self.peek_kind().clone() {
            TokenKind::TypeId(name) => {
                let span = self.advance().span;
                Ok(Ident::new(name, span))
            }
            other => Err(self.error(format!("expected a type name, found {}", other.describe()))),
        }
    }

    fn expect_object_id(&mut self) -> Result<Ident, Diagnostic> {
        match self.peek_kind().clone() {
            TokenKind::ObjectId(name) => {
                let span = self.advance().span;
                Ok(Ident::new(name, span))
            }
            other => Err(self.error(format!("expected an identifier, found {}", other.describe()))),
        }
    }

    // ----- declarations ---------------------------------------------------

    fn parse_class(&mut self) -> Result<Class, Diagnostic> {
        self.expect(TokenKind::Class)?;
        let name = self.expect_type_id()?;
        self.expect(TokenKind::LParen)?;
        let formals = self.parse_varformals()?;
        self.expect(TokenKind::RParen)?;

        let extends = if self.eat(&TokenKind::Extends) {
            if self.check(&TokenKind::Native) {
                let span = self.advance().span;
                Extends {
                    ty: Ident::new("native", span),
                    args: Vec::new(),
                }
            } else {
                let ty = self.expect_type_id()?;
                self.expect(TokenKind::LParen)?;
                let args = self.parse_actuals()?;
                self.expect(TokenKind::RParen)?;
                Extends { ty, args }
            }
        } else {
            Extends {
                ty: Ident::new("Any", name.span),
                args: Vec::new(),
            }
        };

        self.expect(TokenKind::LBrace)?;
        let mut features = Vec::new();
        while !self.eat(&TokenKind::RBrace) {
            features.push(self.parse_feature()?);
            self.expect(TokenKind::Semi)?;
        }

        Ok(Class {
            file: self.file.clone(),
            is_prelude: self.is_prelude,
            name,
            formals,
            extends,
            features,
            ..Class::default()
        })
    }

    fn parse_varformals(&mut self) -> Result<Vec<Formal>, Diagnostic> {
        let mut formals = Vec::new();
        if self.check(&TokenKind::RParen) {
            return Ok(formals);
        }
        loop {
            self.expect(TokenKind::Var)?;
            formals.push(self.parse_formal()?);
            if !self.eat(&TokenKind::Comma) {
                return Ok(formals);
            }
        }
    }

    fn parse_formals(&mut self) -> Result<Vec<Formal>, Diagnostic> {
        let mut formals = Vec::new();
        if self.check(&TokenKind::RParen) {
            return Ok(formals);
        }
        loop {
            formals.push(self.parse_formal()?);
            if !self.eat(&TokenKind::Comma) {
                return Ok(formals);
            }
        }
    }

    fn parse_formal(&mut self) -> Result<Formal, Diagnostic> {
        let name = self.expect_object_id()?;
        self.expect(TokenKind::Colon)?;
        let ty = self.expect_type_id()?;
        Ok(Formal { name, ty })
    }

    fn parse_feature(&mut self) -> Result<Feature, Diagnostic> {
        if self.check(&TokenKind::LBrace) {
            self.advance();
            let block = self.parse_block()?;
            return Ok(Feature::Init(block));
        }
        if self.check(&TokenKind::Var) {
            self.advance();
            return self.parse_attribute();
        }
        if self.eat(&TokenKind::Override) {
            let mut method = self.parse_method()?;
            method.override_ = true;
            return Ok(Feature::Method(method));
        }
        if self.check(&TokenKind::Def) {
            let method = self.parse_method()?;
            return Ok(Feature::Method(method));
        }
        Err(self.error(format!(
            "expected a feature, found {}",
            self.peek_kind().describe()
        )))
    }

    fn parse_attribute(&mut self) -> Result<Feature, Diagnostic> {
        let name = self.expect_object_id()?;
        if self.eat(&TokenKind::Assign) {
            // `var x = native` is runtime-backed storage with no declared
            // type.
            let native = self.expect(TokenKind::Native)?;
            return Ok(Feature::Attribute(Attribute {
                name,
                ty: Ident::new("native", native.span),
                init: None,
                native: true,
            }));
        }
        self.expect(TokenKind::Colon)?;
        let ty = self.expect_type_id()?;
        self.expect(TokenKind::Assign)?;
        let init = self.parse_expr()?;
        Ok(Feature::Attribute(Attribute {
            name,
            ty,
            init: Some(init),
            native: false,
        }))
    }

    fn parse_method(&mut self) -> Result<Method, Diagnostic> {
        self.expect(TokenKind::Def)?;
        let name = self.expect_object_id()?;
        self.expect(TokenKind::LParen)?;
        let args = self.parse_formals()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Colon)?;
        let return_ty = self.expect_type_id()?;
        self.expect(TokenKind::Assign)?;
        let body = if self.check(&TokenKind::Native) {
            let pos = self.advance().span;
            Expr::Native { pos }
        } else {
            self.parse_expr()?
        };
        Ok(Method {
            override_: false,
            name,
            args,
            return_ty,
            body,
            slot: None,
        })
    }

    // ----- expressions ----------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, Diagnostic> {
        // Assignment: an identifier followed by a plain `=`.
        if matches!(self.peek_kind(), TokenKind::ObjectId(_))
            && *self.peek_kind_at(1) == TokenKind::Assign
        {
            let name = self.expect_object_id()?;
            self.advance();
            let expr = self.parse_expr()?;
            return Ok(Expr::Assign {
                name,
                expr: Box::new(expr),
            });
        }
        self.parse_match_level()
    }

    fn parse_match_level(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_comparison()?;
        loop {
            if self.check(&TokenKind::Match) {
                let pos = self.advance().span;
                self.expect(TokenKind::LBrace)?;
                let cases = self.parse_cases()?;
                self.expect(TokenKind::RBrace)?;
                expr = Expr::Match {
                    pos,
                    scrutinee: Box::new(expr),
                    cases,
                    binding: self.program.fresh_binding(),
                };
            } else if self.check(&TokenKind::Dot) {
                // Dispatch on a match result: `x match { ... }.m(...)`.
                expr = self.parse_dispatch(expr)?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::LessEq => Some(BinaryOp::LessEq),
                TokenKind::Less => Some(BinaryOp::Less),
                TokenKind::EqEq => None,
                _ => return Ok(left),
            };
            let pos = self.advance().span;
            let right = self.parse_additive()?;
            left = match op {
                Some(op) => Expr::Binary {
                    op,
                    pos,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                // `a == b` is sugar for `a.equals(b)`.
                None => Expr::DynamicCall {
                    recv: Box::new(left),
                    name: Ident::new("equals", pos),
                    args: vec![right],
                    has_override: false,
                },
            };
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            let pos = self.advance().span;
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                pos,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, Diagnostic> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => return Ok(left),
            };
            let pos = self.advance().span;
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                pos,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        if self.check(&TokenKind::Bang) {
            let pos = self.advance().span;
            let expr = self.parse_unary()?;
            return Ok(Expr::Not {
                pos,
                expr: Box::new(expr),
            });
        }
        if self.check(&TokenKind::Minus) {
            let pos = self.advance().span;
            let expr = self.parse_unary()?;
            return Ok(Expr::Negative {
                pos,
                expr: Box::new(expr),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.parse_primary()?;
        while self.check(&TokenKind::Dot) {
            expr = self.parse_dispatch(expr)?;
        }
        Ok(expr)
    }

    /// `.name(args)` on an already-parsed receiver.
    fn parse_dispatch(&mut self, recv: Expr) -> Result<Expr, Diagnostic> {
        self.expect(TokenKind::Dot)?;
        let name = self.expect_object_id()?;
        self.expect(TokenKind::LParen)?;
        let args = self.parse_actuals()?;
        self.expect(TokenKind::RParen)?;
        Ok(Expr::DynamicCall {
            recv: Box::new(recv),
            name,
            args,
            has_override: false,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, Diagnostic> {
        let span = self.peek().span;
        match self.peek_kind().clone() {
            TokenKind::If => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                let then_arm = self.parse_expr()?;
                self.expect(TokenKind::Else)?;
                let else_arm = self.parse_expr()?;
                Ok(Expr::If {
                    pos: span,
                    cond: Box::new(cond),
                    then_arm: Box::new(then_arm),
                    else_arm: Box::new(else_arm),
                })
            }
            TokenKind::While => {
                self.advance();
                self.expect(TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                let body = self.parse_expr()?;
                Ok(Expr::While {
                    pos: span,
                    cond: Box::new(cond),
                    body: Box::new(body),
                })
            }
            TokenKind::Super => {
                self.advance();
                self.expect(TokenKind::Dot)?;
                let name = self.expect_object_id()?;
                self.expect(TokenKind::LParen)?;
                let args = self.parse_actuals()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::SuperCall {
                    pos: span,
                    name,
                    args,
                    parent: None,
                })
            }
            TokenKind::New => {
                self.advance();
                let ty = self.expect_type_id()?;
                self.expect(TokenKind::LParen)?;
                let args = self.parse_actuals()?;
                self.expect(TokenKind::RParen)?;
                // `new X(...)` allocates and then calls the constructor,
                // which is a method named after the class.
                let name = Ident::new(ty.name.clone(), ty.span);
                Ok(Expr::StaticCall {
                    recv: Box::new(Expr::Alloc { ty }),
                    name,
                    args,
                })
            }
            TokenKind::LParen => {
                self.advance();
                if self.eat(&TokenKind::RParen) {
                    return Ok(Expr::Unit { pos: span });
                }
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBrace => {
                self.advance();
                self.parse_block()
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Null { pos: span })
            }
            TokenKind::This => {
                self.advance();
                Ok(Expr::This {
                    pos: span,
                    class: None,
                })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool {
                    pos: span,
                    value: true,
                })
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool {
                    pos: span,
                    value: false,
                })
            }
            TokenKind::Integer(value) => {
                self.advance();
                Ok(Expr::Int { pos: span, value })
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expr::Str { pos: span, value })
            }
            TokenKind::ObjectId(_) => {
                let name = self.expect_object_id()?;
                if self.check(&TokenKind::LParen) {
                    // `m(...)` dispatches on an implicit `this`.
                    self.advance();
                    let args = self.parse_actuals()?;
                    self.expect(TokenKind::RParen)?;
                    return Ok(Expr::DynamicCall {
                        recv: Box::new(Expr::This {
                            pos: name.span,
                            class: None,
                        }),
                        name,
                        args,
                        has_override: false,
                    });
                }
                Ok(Expr::NameRef { name })
            }
            other => Err(self.error(format!(
                "expected an expression, found {}",
                other.describe()
            ))),
        }
    }

    /// The inside of `{ ... }`, consuming the closing brace. Statements
    /// chain with `;`; `var` declarations scope over the rest of the block;
    /// the empty block is `()`.
    fn parse_block(&mut self) -> Result<Expr, Diagnostic> {
        let span = self.peek().span;
        if self.eat(&TokenKind::RBrace) {
            return Ok(Expr::Unit { pos: span });
        }
        if self.check(&TokenKind::Var) {
            self.advance();
            let name = self.expect_object_id()?;
            self.expect(TokenKind::Colon)?;
            let ty = self.expect_type_id()?;
            self.expect(TokenKind::Assign)?;
            let init = self.parse_expr()?;
            self.expect(TokenKind::Semi)?;
            let body = self.parse_block()?;
            return Ok(Expr::Var {
                name,
                ty,
                init: Box::new(init),
                body: Box::new(body),
                binding: self.program.fresh_binding(),
            });
        }
        let expr = self.parse_expr()?;
        if self.eat(&TokenKind::Semi) {
            let rest = self.parse_block()?;
            return Ok(Expr::Chain {
                pre: Box::new(expr),
                post: Box::new(rest),
            });
        }
        self.expect(TokenKind::RBrace)?;
        Ok(expr)
    }

    fn parse_cases(&mut self) -> Result<Vec<Case>, Diagnostic> {
        let mut cases = Vec::new();
        loop {
            self.expect(TokenKind::Case)?;
            if self.check(&TokenKind::Null) {
                let span = self.advance().span;
                self.expect(TokenKind::Arrow)?;
                let body = self.parse_expr()?;
                cases.push(Case {
                    name: Ident::new("null", span),
                    ty: Ident::new("Null", span),
                    body,
                });
            } else {
                let name = self.expect_object_id()?;
                self.expect(TokenKind::Colon)?;
                let ty = self.expect_type_id()?;
                self.expect(TokenKind::Arrow)?;
                let body = self.parse_expr()?;
                cases.push(Case { name, ty, body });
            }
            if !self.check(&TokenKind::Case) {
                return Ok(cases);
            }
        }
    }

    fn parse_actuals(&mut self) -> Result<Vec<Expr>, Diagnostic> {
        let mut args = Vec::new();
        if self.check(&TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if !self.eat(&TokenKind::Comma) {
                return Ok(args);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Program {
        let mut program = Program::new();
        parse_file(source, Path::new("test.cool"), false, &mut program)
            .unwrap_or_else(|e| panic!("parse error: {}", e));
        program
    }

    fn main_body(program: &Program) -> &Expr {
        let class = program.class(program.declared[0]);
        for feature in &class.features {
            if let Feature::Method(m) = feature {
                return &m.body;
            }
        }
        panic!("no method in first class");
    }

    #[test]
    fn test_class_header() {
        let program = parse("class A(var x : Int) extends B(1) { }");
        let class = program.class(program.declared[0]);
        assert_eq!(class.name.name, "A");
        assert_eq!(class.formals.len(), 1);
        assert_eq!(class.extends.ty.name, "B");
        assert_eq!(class.extends.args.len(), 1);
    }

    #[test]
    fn test_implicit_extends_any() {
        let program = parse("class A() { }");
        assert_eq!(program.class(program.declared[0]).extends.ty.name, "Any");
    }

    #[test]
    fn test_precedence_mul_binds_tighter() {
        let program = parse("class A() { def f() : Int = 1 + 2 * 3; }");
        match main_body(&program) {
            Expr::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => {
                assert!(matches!(
                    right.as_ref(),
                    Expr::Binary {
                        op: BinaryOp::Mul,
                        ..
                    }
                ));
            }
            other => panic!("expected addition at the top, got {:?}", other),
        }
    }

    #[test]
    fn test_parenthesized_grouping() {
        let program = parse("class A() { def f() : Int = (1 + 2) * 3; }");
        assert!(matches!(
            main_body(&program),
            Expr::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_equality_desugars_to_equals() {
        let program = parse("class A() { def f() : Boolean = 1 == 2; }");
        match main_body(&program) {
            Expr::DynamicCall { name, args, .. } => {
                assert_eq!(name.name, "equals");
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected equals call, got {:?}", other),
        }
    }

    #[test]
    fn test_implicit_this_call() {
        let program = parse("class A() { def f() : Unit = g(1); }");
        match main_body(&program) {
            Expr::DynamicCall { recv, name, .. } => {
                assert!(matches!(recv.as_ref(), Expr::This { .. }));
                assert_eq!(name.name, "g");
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_block_chains_and_var_scopes() {
        let program = parse("class A() { def f() : Int = { g(); var x : Int = 1; x }; }");
        match main_body(&program) {
            Expr::Chain { post, .. } => match post.as_ref() {
                Expr::Var { name, body, .. } => {
                    assert_eq!(name.name, "x");
                    assert!(matches!(body.as_ref(), Expr::NameRef { .. }));
                }
                other => panic!("expected var after chain, got {:?}", other),
            },
            other => panic!("expected chain, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_block_is_unit() {
        let program = parse("class A() { def f() : Unit = { }; }");
        assert!(matches!(main_body(&program), Expr::Unit { .. }));
    }

    #[test]
    fn test_match_with_null_case() {
        let program = parse(
            "class A() { def f(x : Any) : Boolean = x match { case null => true case y:Any => false }; }",
        );
        match main_body(&program) {
            Expr::Match { cases, .. } => {
                assert_eq!(cases.len(), 2);
                assert!(cases[0].is_null());
                assert_eq!(cases[1].ty.name, "Any");
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn test_match_applies_to_whole_operator_expression() {
        let program =
            parse("class A() { def f(x : Int) : Int = x + 1 match { case y:Int => y }; }");
        match main_body(&program) {
            Expr::Match { scrutinee, .. } => {
                assert!(matches!(
                    scrutinee.as_ref(),
                    Expr::Binary {
                        op: BinaryOp::Add,
                        ..
                    }
                ));
            }
            other => panic!("expected match, got {:?}", other),
        }
    }

    #[test]
    fn test_new_becomes_static_constructor_call() {
        let program = parse("class A() { def f() : A = new A(); }");
        match main_body(&program) {
            Expr::StaticCall { recv, name, .. } => {
                assert!(matches!(recv.as_ref(), Expr::Alloc { .. }));
                assert_eq!(name.name, "A");
            }
            other => panic!("expected static call, got {:?}", other),
        }
    }

    #[test]
    fn test_native_method_body() {
        let program = parse("class A() { def f() : Unit = native; }");
        assert!(matches!(main_body(&program), Expr::Native { .. }));
    }

    #[test]
    fn test_native_attribute() {
        let program = parse("class A() { var value = native; }");
        let class = program.class(program.declared[0]);
        match &class.features[0] {
            Feature::Attribute(a) => {
                assert!(a.native);
                assert!(a.init.is_none());
            }
            other => panic!("expected attribute, got {:?}", other),
        }
    }

    #[test]
    fn test_assignment_is_not_equality() {
        let program = parse("class A() { def f(x : Int) : Unit = x = 3; }");
        assert!(matches!(main_body(&program), Expr::Assign { .. }));
    }

    #[test]
    fn test_syntax_error_has_position() {
        let mut program = Program::new();
        let err = parse_file(
            "class A() {\n  def f( : Int = 1;\n}",
            Path::new("bad.cool"),
            false,
            &mut program,
        )
        .unwrap_err();
        assert!(err.message.contains("expected"));
        assert_eq!(err.span.unwrap().line, 1);
    }
}
