//! Abstract syntax tree and recursive-descent parser for the sandbox
//! language.
//!
//! The grammar is a small expression language: newline-separated statements,
//! brace-delimited blocks, `and`/`or`/`not` (or `&&`/`||`/`!`) boolean
//! operators, list/map literals, indexing, attribute access for builtin
//! modules, and calls with positional or keyword arguments.

use super::lexer::{tokenize, Token};
use super::InterpreterError;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `and`
    And,
    /// `or`
    Or,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `not`
    Not,
}

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `null`
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal.
    Str(String),
    /// List literal.
    List(Vec<Expr>),
    /// Map literal with string keys.
    Map(Vec<(Expr, Expr)>),
    /// Variable reference.
    Name(String),
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Binary operation (including short-circuit `and`/`or`).
    Binary {
        /// Operator.
        op: BinOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Attribute access (`math.pi`).
    Attribute {
        /// Object expression.
        value: Box<Expr>,
        /// Attribute name.
        attr: String,
    },
    /// Indexing (`xs[0]`, `m["key"]`).
    Index {
        /// Container expression.
        value: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
    },
    /// A call with positional and keyword arguments.
    Call {
        /// Callee expression (name or module attribute).
        func: Box<Expr>,
        /// Positional arguments.
        args: Vec<Expr>,
        /// Keyword arguments.
        kwargs: Vec<(String, Expr)>,
    },
}

/// An assignment target.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    /// A plain variable.
    Name(String),
    /// An indexed slot (`xs[0] = v`, `m["k"] = v`).
    Index {
        /// Container expression.
        value: Expr,
        /// Index expression.
        index: Expr,
    },
}

/// A statement node.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// An expression statement; its value is the statement's value.
    Expr(Expr),
    /// An assignment.
    Assign {
        /// Target of the assignment.
        target: AssignTarget,
        /// Value expression.
        value: Expr,
    },
    /// Conditional with optional else branch.
    If {
        /// Condition.
        cond: Expr,
        /// Then-block.
        then_body: Vec<Stmt>,
        /// Else-block (possibly another `if` for `else if` chains).
        else_body: Vec<Stmt>,
    },
    /// `for <var> in <iter> { ... }`
    For {
        /// Loop variable.
        var: String,
        /// Iterable expression.
        iter: Expr,
        /// Loop body.
        body: Vec<Stmt>,
    },
    /// `while <cond> { ... }`
    While {
        /// Condition.
        cond: Expr,
        /// Loop body.
        body: Vec<Stmt>,
    },
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `import <module>`
    Import {
        /// Module name.
        module: String,
    },
}

/// Parse a source snippet into a statement list.
///
/// # Errors
///
/// [`InterpreterError::Syntax`] describing the first offending token.
pub fn parse(source: &str) -> Result<Vec<Stmt>, InterpreterError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), InterpreterError> {
        let token = self.advance();
        if &token == expected {
            Ok(())
        } else {
            Err(InterpreterError::syntax(format!(
                "expected '{expected}', found '{token}'"
            )))
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Token::Newline) {
            self.advance();
        }
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>, InterpreterError> {
        let mut statements = Vec::new();
        self.skip_separators();
        while !matches!(self.peek(), Token::Eof) {
            statements.push(self.parse_statement()?);
            match self.peek() {
                Token::Newline | Token::Eof => {}
                other => {
                    return Err(InterpreterError::syntax(format!(
                        "expected end of statement, found '{other}'"
                    )));
                }
            }
            self.skip_separators();
        }
        Ok(statements)
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, InterpreterError> {
        self.skip_separators();
        self.expect(&Token::LBrace)?;
        let mut statements = Vec::new();
        loop {
            self.skip_separators();
            if matches!(self.peek(), Token::RBrace) {
                self.advance();
                break;
            }
            if matches!(self.peek(), Token::Eof) {
                return Err(InterpreterError::syntax("unterminated block, expected '}'"));
            }
            statements.push(self.parse_statement()?);
            match self.peek() {
                Token::Newline | Token::RBrace | Token::Eof => {}
                other => {
                    return Err(InterpreterError::syntax(format!(
                        "expected end of statement, found '{other}'"
                    )));
                }
            }
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Stmt, InterpreterError> {
        let keyword = match self.peek() {
            Token::Ident(name) => Some(name.clone()),
            _ => None,
        };
        match keyword.as_deref() {
            Some("if") => return self.parse_if(),
            Some("for") => return self.parse_for(),
            Some("while") => return self.parse_while(),
            Some("break") => {
                self.advance();
                return Ok(Stmt::Break);
            }
            Some("continue") => {
                self.advance();
                return Ok(Stmt::Continue);
            }
            Some("import") => {
                self.advance();
                let Token::Ident(module) = self.advance() else {
                    return Err(InterpreterError::syntax("expected module name after 'import'"));
                };
                return Ok(Stmt::Import { module });
            }
            _ => {}
        }

        let expr = self.parse_expression()?;
        if matches!(self.peek(), Token::Assign) {
            self.advance();
            let value = self.parse_expression()?;
            let target = match expr {
                Expr::Name(name) => AssignTarget::Name(name),
                Expr::Index { value: v, index } => AssignTarget::Index {
                    value: *v,
                    index: *index,
                },
                other => {
                    return Err(InterpreterError::syntax(format!(
                        "cannot assign to this expression: {other:?}"
                    )));
                }
            };
            return Ok(Stmt::Assign { target, value });
        }
        Ok(Stmt::Expr(expr))
    }

    fn parse_if(&mut self) -> Result<Stmt, InterpreterError> {
        self.advance(); // 'if'
        let cond = self.parse_expression()?;
        let then_body = self.parse_block()?;

        let mut else_body = Vec::new();
        let checkpoint = self.pos;
        self.skip_separators();
        if matches!(self.peek(), Token::Ident(k) if k == "else") {
            self.advance();
            self.skip_separators();
            if matches!(self.peek(), Token::Ident(k) if k == "if") {
                else_body.push(self.parse_if()?);
            } else {
                else_body = self.parse_block()?;
            }
        } else {
            self.pos = checkpoint;
        }

        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, InterpreterError> {
        self.advance(); // 'for'
        let Token::Ident(var) = self.advance() else {
            return Err(InterpreterError::syntax("expected loop variable after 'for'"));
        };
        match self.advance() {
            Token::Ident(kw) if kw == "in" => {}
            other => {
                return Err(InterpreterError::syntax(format!(
                    "expected 'in' after loop variable, found '{other}'"
                )));
            }
        }
        let iter = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt::For { var, iter, body })
    }

    fn parse_while(&mut self) -> Result<Stmt, InterpreterError> {
        self.advance(); // 'while'
        let cond = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Stmt::While { cond, body })
    }

    fn parse_expression(&mut self) -> Result<Expr, InterpreterError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, InterpreterError> {
        let mut left = self.parse_and()?;
        loop {
            let is_or = matches!(self.peek(), Token::OrOr)
                || matches!(self.peek(), Token::Ident(k) if k == "or");
            if !is_or {
                break;
            }
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, InterpreterError> {
        let mut left = self.parse_not()?;
        loop {
            let is_and = matches!(self.peek(), Token::AndAnd)
                || matches!(self.peek(), Token::Ident(k) if k == "and");
            if !is_and {
                break;
            }
            self.advance();
            let right = self.parse_not()?;
            left = Expr::Binary {
                op: BinOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, InterpreterError> {
        let is_not = matches!(self.peek(), Token::Bang)
            || matches!(self.peek(), Token::Ident(k) if k == "not");
        if is_not {
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, InterpreterError> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Token::Eq => BinOp::Eq,
            Token::NotEq => BinOp::NotEq,
            Token::Lt => BinOp::Lt,
            Token::LtEq => BinOp::LtEq,
            Token::Gt => BinOp::Gt,
            Token::GtEq => BinOp::GtEq,
            Token::Ident(k) if k == "in" => {
                self.advance();
                let right = self.parse_additive()?;
                // `a in b` desugars to membership via the `contains` builtin.
                return Ok(Expr::Call {
                    func: Box::new(Expr::Name("contains".to_owned())),
                    args: vec![right, left],
                    kwargs: Vec::new(),
                });
            }
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_additive()?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, InterpreterError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, InterpreterError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, InterpreterError> {
        if matches!(self.peek(), Token::Minus) {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, InterpreterError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::LParen => {
                    self.advance();
                    let (args, kwargs) = self.parse_call_arguments()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        kwargs,
                    };
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(&Token::RBracket)?;
                    expr = Expr::Index {
                        value: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                Token::Dot => {
                    self.advance();
                    let Token::Ident(attr) = self.advance() else {
                        return Err(InterpreterError::syntax("expected attribute name after '.'"));
                    };
                    expr = Expr::Attribute {
                        value: Box::new(expr),
                        attr,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_arguments(
        &mut self,
    ) -> Result<(Vec<Expr>, Vec<(String, Expr)>), InterpreterError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();

        if matches!(self.peek(), Token::RParen) {
            self.advance();
            return Ok((args, kwargs));
        }

        loop {
            // `name = expr` is a keyword argument when name isn't followed
            // by a comparison.
            if let Token::Ident(name) = self.peek().clone() {
                if self.tokens.get(self.pos + 1) == Some(&Token::Assign) {
                    self.advance();
                    self.advance();
                    let value = self.parse_expression()?;
                    kwargs.push((name, value));
                } else {
                    args.push(self.parse_expression()?);
                }
            } else {
                args.push(self.parse_expression()?);
            }

            match self.advance() {
                Token::Comma => continue,
                Token::RParen => break,
                other => {
                    return Err(InterpreterError::syntax(format!(
                        "expected ',' or ')' in call arguments, found '{other}'"
                    )));
                }
            }
        }
        Ok((args, kwargs))
    }

    fn parse_primary(&mut self) -> Result<Expr, InterpreterError> {
        match self.advance() {
            Token::Int(value) => Ok(Expr::Int(value)),
            Token::Float(value) => Ok(Expr::Float(value)),
            Token::Str(value) => Ok(Expr::Str(value)),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "not" => {
                    let operand = self.parse_not()?;
                    Ok(Expr::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    })
                }
                _ => Ok(Expr::Name(name)),
            },
            Token::LParen => {
                let expr = self.parse_expression()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if matches!(self.peek(), Token::RBracket) {
                    self.advance();
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.parse_expression()?);
                    match self.advance() {
                        Token::Comma => {
                            if matches!(self.peek(), Token::RBracket) {
                                self.advance();
                                break;
                            }
                        }
                        Token::RBracket => break,
                        other => {
                            return Err(InterpreterError::syntax(format!(
                                "expected ',' or ']' in list literal, found '{other}'"
                            )));
                        }
                    }
                }
                Ok(Expr::List(items))
            }
            Token::LBrace => {
                let mut entries = Vec::new();
                self.skip_separators();
                if matches!(self.peek(), Token::RBrace) {
                    self.advance();
                    return Ok(Expr::Map(entries));
                }
                loop {
                    self.skip_separators();
                    let key = self.parse_expression()?;
                    self.expect(&Token::Colon)?;
                    let value = self.parse_expression()?;
                    entries.push((key, value));
                    self.skip_separators();
                    match self.advance() {
                        Token::Comma => {
                            self.skip_separators();
                            if matches!(self.peek(), Token::RBrace) {
                                self.advance();
                                break;
                            }
                        }
                        Token::RBrace => break,
                        other => {
                            return Err(InterpreterError::syntax(format!(
                                "expected ',' or '}}' in map literal, found '{other}'"
                            )));
                        }
                    }
                }
                Ok(Expr::Map(entries))
            }
            other => Err(InterpreterError::syntax(format!(
                "unexpected token '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_final_answer_call() {
        let program = parse("final_answer(2+2)").unwrap();
        assert_eq!(program.len(), 1);
        match &program[0] {
            Stmt::Expr(Expr::Call { func, args, kwargs }) => {
                assert_eq!(**func, Expr::Name("final_answer".to_owned()));
                assert_eq!(args.len(), 1);
                assert!(kwargs.is_empty());
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn test_parse_assignment_and_kwargs() {
        let program = parse("result = add(a = 1, b = 2)").unwrap();
        match &program[0] {
            Stmt::Assign {
                target: AssignTarget::Name(name),
                value: Expr::Call { kwargs, .. },
            } => {
                assert_eq!(name, "result");
                assert_eq!(kwargs.len(), 2);
                assert_eq!(kwargs[0].0, "a");
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn test_parse_if_else_chain() {
        let program = parse("if x > 1 { y = 1 } else if x > 0 { y = 2 } else { y = 3 }").unwrap();
        match &program[0] {
            Stmt::If { else_body, .. } => {
                assert!(matches!(else_body[0], Stmt::If { .. }));
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn test_parse_for_loop() {
        let program = parse("total = 0\nfor x in range(5) {\n  total = total + x\n}").unwrap();
        assert_eq!(program.len(), 2);
        assert!(matches!(program[1], Stmt::For { .. }));
    }

    #[test]
    fn test_parse_precedence() {
        let program = parse("1 + 2 * 3").unwrap();
        match &program[0] {
            Stmt::Expr(Expr::Binary {
                op: BinOp::Add,
                right,
                ..
            }) => {
                assert!(matches!(**right, Expr::Binary { op: BinOp::Mul, .. }));
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn test_parse_in_desugars_to_contains() {
        let program = parse("\"a\" in xs").unwrap();
        match &program[0] {
            Stmt::Expr(Expr::Call { func, args, .. }) => {
                assert_eq!(**func, Expr::Name("contains".to_owned()));
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn test_parse_multiline_map_literal() {
        let program = parse("m = {\n  \"a\": 1,\n  \"b\": 2\n}").unwrap();
        match &program[0] {
            Stmt::Assign {
                value: Expr::Map(entries),
                ..
            } => assert_eq!(entries.len(), 2),
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn test_parse_import() {
        let program = parse("import math\nmath.sqrt(4)").unwrap();
        assert!(matches!(&program[0], Stmt::Import { module } if module == "math"));
    }

    #[test]
    fn test_prose_is_a_syntax_error() {
        assert!(parse("I will now think about the problem?").is_err());
    }

    #[test]
    fn test_parse_index_assignment() {
        let program = parse("m[\"k\"] = 5").unwrap();
        assert!(matches!(
            &program[0],
            Stmt::Assign {
                target: AssignTarget::Index { .. },
                ..
            }
        ));
    }
}
