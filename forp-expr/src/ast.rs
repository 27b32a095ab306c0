// This file is part of forp, a preprocessor for Fortran-style sources.
// Copyright (C) 2025 The forp Authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Expression syntax tree and parser
//!
//! A recursive descent parser producing a tree that the evaluator walks.
//! Parsing and evaluation are separate because lambda bodies and macro
//! parameter defaults are evaluated later, possibly many times, in
//! environments that do not exist yet at parse time.

use crate::token::{Error as TokenizeError, Keyword, Operator, PeekableTokens, Token, TokenValue};
use forp_syntax::syntax::ParamSpec;
use std::ops::Range;
use std::rc::Rc;
use thiserror::Error;

/// Constant in an expression
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
}

/// Unary operator
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnaryOp {
    Plus,
    Minus,
}

/// Arithmetic binary operator
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Comparison operator
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

/// Short-circuiting boolean operator
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BoolOp {
    And,
    Or,
}

/// Expression tree node
#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Ident(String),
    Tuple(Vec<Expr>),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Bool(BoolOp, Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Attr {
        base: Box<Expr>,
        name: String,
    },
    Lambda {
        params: Rc<ParamSpec<Rc<Expr>>>,
        body: Rc<Expr>,
    },
}

/// Expression with the source range it was parsed from
#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub location: Range<usize>,
}

/// Cause of an expression parse error
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum SyntaxError {
    /// A token appears where it cannot start or continue an expression.
    #[error("unexpected token")]
    UnexpectedToken,

    /// The expression ends where more input is required.
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    /// A specific token was required.
    #[error("expected '{0}'")]
    Expected(&'static str),

    /// A lambda parameter list is malformed.
    #[error("invalid parameter list")]
    InvalidParams,

    /// A positional argument follows a keyword argument.
    #[error("positional argument follows keyword argument")]
    PositionalAfterKeyword,

    /// A name after `.` is missing or not an identifier.
    #[error("expected attribute name after '.'")]
    ExpectedAttribute,
}

/// Parse failure with its position in the expression string
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseError {
    pub cause: ParseErrorCause,
    pub location: Range<usize>,
}

/// Either a tokenization or a grammar error
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseErrorCause {
    Token(crate::token::TokenError),
    Syntax(SyntaxError),
}

impl From<TokenizeError> for ParseError {
    fn from(e: TokenizeError) -> Self {
        ParseError {
            cause: ParseErrorCause::Token(e.cause),
            location: e.location,
        }
    }
}

/// Parses a complete expression string.
///
/// A top-level comma produces a tuple, so `1, 2` and `(1, 2)` are the same
/// value.
pub fn parse(source: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser {
        tokens: PeekableTokens::from(source),
    };
    let expr = parser.tuple_or_expr()?;
    let next = parser.tokens.next()?;
    if next.value == TokenValue::EndOfInput {
        Ok(expr)
    } else {
        Err(syntax(SyntaxError::UnexpectedToken, next.location))
    }
}

fn syntax(cause: SyntaxError, location: Range<usize>) -> ParseError {
    ParseError {
        cause: ParseErrorCause::Syntax(cause),
        location,
    }
}

struct Parser<'a> {
    tokens: PeekableTokens<'a>,
}

impl Parser<'_> {
    fn peek(&mut self) -> Result<&Token, ParseError> {
        match self.tokens.peek() {
            Ok(token) => Ok(token),
            Err(e) => Err(e.clone().into()),
        }
    }

    fn next(&mut self) -> Result<Token, ParseError> {
        Ok(self.tokens.next()?)
    }

    fn eat_operator(&mut self, op: Operator) -> Result<bool, ParseError> {
        if self.peek()?.value == TokenValue::Operator(op) {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect_operator(&mut self, op: Operator, name: &'static str) -> Result<(), ParseError> {
        let token = self.next()?;
        if token.value == TokenValue::Operator(op) {
            Ok(())
        } else {
            Err(syntax(SyntaxError::Expected(name), token.location))
        }
    }

    /// Entry point: an expression, or a comma-separated tuple of them.
    fn tuple_or_expr(&mut self) -> Result<Expr, ParseError> {
        let first = self.expression()?;
        if self.peek()?.value != TokenValue::Operator(Operator::Comma) {
            return Ok(first);
        }
        let start = first.location.start;
        let mut items = vec![first];
        while self.eat_operator(Operator::Comma)? {
            if !self.starts_expression()? {
                break;
            }
            items.push(self.expression()?);
        }
        let end = items.last().map_or(start, |e| e.location.end);
        Ok(Expr {
            kind: ExprKind::Tuple(items),
            location: start..end,
        })
    }

    /// Whether the next token can start an expression.
    fn starts_expression(&mut self) -> Result<bool, ParseError> {
        Ok(match &self.peek()?.value {
            TokenValue::Int(_) | TokenValue::Str(_) | TokenValue::Ident(_) => true,
            TokenValue::Keyword(k) => matches!(
                k,
                Keyword::Not | Keyword::Lambda | Keyword::True | Keyword::False | Keyword::None
            ),
            TokenValue::Operator(op) => matches!(
                op,
                Operator::Plus
                    | Operator::Minus
                    | Operator::OpenParen
                    | Operator::OpenBracket
                    | Operator::OpenBrace
            ),
            TokenValue::EndOfInput => false,
        })
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        if self.peek()?.value == TokenValue::Keyword(Keyword::Lambda) {
            return self.lambda();
        }
        self.or_expr()
    }

    fn lambda(&mut self) -> Result<Expr, ParseError> {
        let start = self.next()?.location.start; // the `lambda` keyword
        let params = self.lambda_params()?;
        let body = self.expression()?;
        let location = start..body.location.end;
        Ok(Expr {
            kind: ExprKind::Lambda {
                params: Rc::new(params),
                body: Rc::new(body),
            },
            location,
        })
    }

    /// Parses lambda parameters up to and including the `:`.
    fn lambda_params(&mut self) -> Result<ParamSpec<Rc<Expr>>, ParseError> {
        let mut params = ParamSpec::empty();
        loop {
            let token = self.next()?;
            match token.value {
                TokenValue::Operator(Operator::Colon) => return Ok(params),
                TokenValue::Operator(Operator::Asterisk) => {
                    let token = self.next()?;
                    match token.value {
                        TokenValue::Operator(Operator::Asterisk) => {
                            let name = self.param_name()?;
                            if params.var_keyword.is_some() {
                                return Err(syntax(SyntaxError::InvalidParams, token.location));
                            }
                            params.var_keyword = Some(name);
                        }
                        TokenValue::Ident(name) => {
                            if params.var_positional.is_some() || params.var_keyword.is_some() {
                                return Err(syntax(SyntaxError::InvalidParams, token.location));
                            }
                            params.var_positional = Some(name);
                        }
                        _ => return Err(syntax(SyntaxError::InvalidParams, token.location)),
                    }
                }
                TokenValue::Ident(name) => {
                    if self.eat_operator(Operator::Equal)? {
                        let default = self.expression()?;
                        params.optional.push((name, Rc::new(default)));
                    } else if params.optional.is_empty()
                        && params.var_positional.is_none()
                        && params.var_keyword.is_none()
                    {
                        params.required.push(name);
                    } else {
                        return Err(syntax(SyntaxError::InvalidParams, token.location));
                    }
                }
                _ => return Err(syntax(SyntaxError::InvalidParams, token.location)),
            }
            let token = self.next()?;
            match token.value {
                TokenValue::Operator(Operator::Comma) => {}
                TokenValue::Operator(Operator::Colon) => return Ok(params),
                _ => return Err(syntax(SyntaxError::InvalidParams, token.location)),
            }
        }
    }

    fn param_name(&mut self) -> Result<String, ParseError> {
        let token = self.next()?;
        match token.value {
            TokenValue::Ident(name) => Ok(name),
            _ => Err(syntax(SyntaxError::InvalidParams, token.location)),
        }
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.and_expr()?;
        while self.peek()?.value == TokenValue::Keyword(Keyword::Or) {
            self.next()?;
            let rhs = self.and_expr()?;
            let location = lhs.location.start..rhs.location.end;
            lhs = Expr {
                kind: ExprKind::Bool(BoolOp::Or, Box::new(lhs), Box::new(rhs)),
                location,
            };
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.not_expr()?;
        while self.peek()?.value == TokenValue::Keyword(Keyword::And) {
            self.next()?;
            let rhs = self.not_expr()?;
            let location = lhs.location.start..rhs.location.end;
            lhs = Expr {
                kind: ExprKind::Bool(BoolOp::And, Box::new(lhs), Box::new(rhs)),
                location,
            };
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.peek()?.value == TokenValue::Keyword(Keyword::Not) {
            let start = self.next()?.location.start;
            let operand = self.not_expr()?;
            let location = start..operand.location.end;
            return Ok(Expr {
                kind: ExprKind::Not(Box::new(operand)),
                location,
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.additive()?;
        let op = match &self.peek()?.value {
            TokenValue::Operator(Operator::EqualEqual) => CompareOp::Eq,
            TokenValue::Operator(Operator::BangEqual) => CompareOp::Ne,
            TokenValue::Operator(Operator::Less) => CompareOp::Lt,
            TokenValue::Operator(Operator::LessEqual) => CompareOp::Le,
            TokenValue::Operator(Operator::Greater) => CompareOp::Gt,
            TokenValue::Operator(Operator::GreaterEqual) => CompareOp::Ge,
            TokenValue::Keyword(Keyword::In) => CompareOp::In,
            TokenValue::Keyword(Keyword::Not) => {
                let not = self.next()?;
                let token = self.next()?;
                if token.value != TokenValue::Keyword(Keyword::In) {
                    return Err(syntax(SyntaxError::Expected("in"), not.location));
                }
                let rhs = self.additive()?;
                let location = lhs.location.start..rhs.location.end;
                return Ok(Expr {
                    kind: ExprKind::Compare(CompareOp::NotIn, Box::new(lhs), Box::new(rhs)),
                    location,
                });
            }
            _ => return Ok(lhs),
        };
        self.next()?;
        let rhs = self.additive()?;
        let location = lhs.location.start..rhs.location.end;
        Ok(Expr {
            kind: ExprKind::Compare(op, Box::new(lhs), Box::new(rhs)),
            location,
        })
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match &self.peek()?.value {
                TokenValue::Operator(Operator::Plus) => BinaryOp::Add,
                TokenValue::Operator(Operator::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.next()?;
            let rhs = self.multiplicative()?;
            let location = lhs.location.start..rhs.location.end;
            lhs = Expr {
                kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                location,
            };
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match &self.peek()?.value {
                TokenValue::Operator(Operator::Asterisk) => BinaryOp::Mul,
                TokenValue::Operator(Operator::Slash) => BinaryOp::Div,
                TokenValue::Operator(Operator::Percent) => BinaryOp::Mod,
                _ => return Ok(lhs),
            };
            self.next()?;
            let rhs = self.unary()?;
            let location = lhs.location.start..rhs.location.end;
            lhs = Expr {
                kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                location,
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = match &self.peek()?.value {
            TokenValue::Operator(Operator::Plus) => UnaryOp::Plus,
            TokenValue::Operator(Operator::Minus) => UnaryOp::Minus,
            _ => return self.postfix(),
        };
        let start = self.next()?.location.start;
        let operand = self.unary()?;
        let location = start..operand.location.end;
        Ok(Expr {
            kind: ExprKind::Unary(op, Box::new(operand)),
            location,
        })
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        loop {
            match &self.peek()?.value {
                TokenValue::Operator(Operator::OpenParen) => {
                    self.next()?;
                    let (args, kwargs) = self.call_arguments()?;
                    let close = self.next()?;
                    if close.value != TokenValue::Operator(Operator::CloseParen) {
                        return Err(syntax(SyntaxError::Expected(")"), close.location));
                    }
                    let location = expr.location.start..close.location.end;
                    expr = Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                            kwargs,
                        },
                        location,
                    };
                }
                TokenValue::Operator(Operator::OpenBracket) => {
                    self.next()?;
                    let index = self.tuple_or_expr()?;
                    let close = self.next()?;
                    if close.value != TokenValue::Operator(Operator::CloseBracket) {
                        return Err(syntax(SyntaxError::Expected("]"), close.location));
                    }
                    let location = expr.location.start..close.location.end;
                    expr = Expr {
                        kind: ExprKind::Index {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                        location,
                    };
                }
                TokenValue::Operator(Operator::Dot) => {
                    self.next()?;
                    let token = self.next()?;
                    let TokenValue::Ident(name) = token.value else {
                        return Err(syntax(SyntaxError::ExpectedAttribute, token.location));
                    };
                    let location = expr.location.start..token.location.end;
                    expr = Expr {
                        kind: ExprKind::Attr {
                            base: Box::new(expr),
                            name,
                        },
                        location,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Parses call arguments up to (not including) the closing parenthesis.
    fn call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ParseError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        if self.peek()?.value == TokenValue::Operator(Operator::CloseParen) {
            return Ok((args, kwargs));
        }
        loop {
            let arg = self.expression()?;
            if self.eat_operator(Operator::Equal)? {
                let ExprKind::Ident(name) = arg.kind else {
                    return Err(syntax(SyntaxError::UnexpectedToken, arg.location));
                };
                let value = self.expression()?;
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    return Err(syntax(SyntaxError::PositionalAfterKeyword, arg.location));
                }
                args.push(arg);
            }
            if !self.eat_operator(Operator::Comma)? {
                return Ok((args, kwargs));
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.next()?;
        let location = token.location.clone();
        match token.value {
            TokenValue::Int(i) => Ok(Expr {
                kind: ExprKind::Literal(Literal::Int(i)),
                location,
            }),
            TokenValue::Str(s) => Ok(Expr {
                kind: ExprKind::Literal(Literal::Str(s)),
                location,
            }),
            TokenValue::Ident(name) => Ok(Expr {
                kind: ExprKind::Ident(name),
                location,
            }),
            TokenValue::Keyword(Keyword::True) => Ok(Expr {
                kind: ExprKind::Literal(Literal::Bool(true)),
                location,
            }),
            TokenValue::Keyword(Keyword::False) => Ok(Expr {
                kind: ExprKind::Literal(Literal::Bool(false)),
                location,
            }),
            TokenValue::Keyword(Keyword::None) => Ok(Expr {
                kind: ExprKind::Literal(Literal::None),
                location,
            }),
            TokenValue::Operator(Operator::OpenParen) => self.paren(location),
            TokenValue::Operator(Operator::OpenBracket) => self.list(location),
            TokenValue::Operator(Operator::OpenBrace) => self.dict(location),
            TokenValue::EndOfInput => Err(syntax(SyntaxError::UnexpectedEnd, location)),
            _ => Err(syntax(SyntaxError::UnexpectedToken, location)),
        }
    }

    /// Parses a parenthesized expression or tuple after `(`.
    fn paren(&mut self, open: Range<usize>) -> Result<Expr, ParseError> {
        if self.peek()?.value == TokenValue::Operator(Operator::CloseParen) {
            let close = self.next()?;
            return Ok(Expr {
                kind: ExprKind::Tuple(Vec::new()),
                location: open.start..close.location.end,
            });
        }
        let first = self.expression()?;
        let mut tuple = false;
        let mut items = vec![first];
        while self.eat_operator(Operator::Comma)? {
            tuple = true;
            if self.peek()?.value == TokenValue::Operator(Operator::CloseParen) {
                break;
            }
            items.push(self.expression()?);
        }
        let close = self.next()?;
        if close.value != TokenValue::Operator(Operator::CloseParen) {
            return Err(syntax(SyntaxError::Expected(")"), close.location));
        }
        let location = open.start..close.location.end;
        if tuple {
            Ok(Expr {
                kind: ExprKind::Tuple(items),
                location,
            })
        } else {
            let mut inner = items.pop().unwrap();
            inner.location = location;
            Ok(inner)
        }
    }

    fn list(&mut self, open: Range<usize>) -> Result<Expr, ParseError> {
        let mut items = Vec::new();
        if self.peek()?.value != TokenValue::Operator(Operator::CloseBracket) {
            loop {
                items.push(self.expression()?);
                if !self.eat_operator(Operator::Comma)? {
                    break;
                }
                if self.peek()?.value == TokenValue::Operator(Operator::CloseBracket) {
                    break;
                }
            }
        }
        let close = self.next()?;
        if close.value != TokenValue::Operator(Operator::CloseBracket) {
            return Err(syntax(SyntaxError::Expected("]"), close.location));
        }
        Ok(Expr {
            kind: ExprKind::List(items),
            location: open.start..close.location.end,
        })
    }

    fn dict(&mut self, open: Range<usize>) -> Result<Expr, ParseError> {
        let mut pairs = Vec::new();
        if self.peek()?.value != TokenValue::Operator(Operator::CloseBrace) {
            loop {
                let key = self.expression()?;
                self.expect_operator(Operator::Colon, ":")?;
                let value = self.expression()?;
                pairs.push((key, value));
                if !self.eat_operator(Operator::Comma)? {
                    break;
                }
                if self.peek()?.value == TokenValue::Operator(Operator::CloseBrace) {
                    break;
                }
            }
        }
        let close = self.next()?;
        if close.value != TokenValue::Operator(Operator::CloseBrace) {
            return Err(syntax(SyntaxError::Expected("}"), close.location));
        }
        Ok(Expr {
            kind: ExprKind::Dict(pairs),
            location: open.start..close.location.end,
        })
    }
}
