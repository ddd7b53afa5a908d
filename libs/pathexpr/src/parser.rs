//! Parser - converts expression source to AST
//!
//! Recursive descent parser. Precedence (lowest to highest):
//! 1. implies
//! 2. or/xor
//! 3. and
//! 4. membership (in, contains)
//! 5. equality (=, !=)
//! 6. inequality (<=, <, >, >=)
//! 7. union (|)
//! 8. additive (+, -, &)
//! 9. multiplicative (*, /)
//! 10. polarity (-)
//! 11. indexer / invocation (postfix)
//! 12. term

use crate::ast::{AstNode, BinaryOperator, Literal};
use crate::error::{Error, Result};
use crate::lexer::Lexer;
use crate::token::{Token, TokenType};
use rust_decimal::Decimal;
use std::str::FromStr;

const MAX_RECURSION_DEPTH: usize = 100;

pub struct Parser {
    lexer: Lexer,
    current: Token,
    recursion_depth: usize,
}

impl Parser {
    pub fn new(input: &str) -> Self {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token();
        Self {
            lexer,
            current,
            recursion_depth: 0,
        }
    }

    fn advance(&mut self) -> Result<Token> {
        let next = self.lexer.next_token();
        let previous = std::mem::replace(&mut self.current, next);
        if previous.token_type == TokenType::Error {
            return Err(self.error_at(&previous, &previous.value));
        }
        Ok(previous)
    }

    fn check(&self, token_type: TokenType) -> Result<bool> {
        if self.current.token_type == TokenType::Error {
            return Err(self.error_at(&self.current, &self.current.value));
        }
        Ok(self.current.token_type == token_type)
    }

    fn expect(&mut self, token_type: TokenType) -> Result<Token> {
        if self.check(token_type)? {
            return self.advance();
        }
        Err(self.error_at(
            &self.current,
            &format!("Expected {:?}, got {:?}", token_type, self.current.token_type),
        ))
    }

    fn error_at(&self, token: &Token, message: &str) -> Error {
        Error::ParseError(format!("{} at position {}", message, token.position))
    }

    /// Parse the whole input as one expression.
    pub fn parse(&mut self) -> Result<AstNode> {
        if self.check(TokenType::Eof)? {
            return Err(Error::ParseError("Empty expression".into()));
        }
        let expr = self.parse_expression()?;
        if !self.check(TokenType::Eof)? {
            return Err(self.error_at(
                &self.current,
                &format!("Unexpected token '{}'", self.current.value),
            ));
        }
        Ok(expr)
    }

    fn parse_expression(&mut self) -> Result<AstNode> {
        self.recursion_depth += 1;
        if self.recursion_depth > MAX_RECURSION_DEPTH {
            return Err(Error::ParseError(format!(
                "Expression too deeply nested (max depth: {})",
                MAX_RECURSION_DEPTH
            )));
        }
        let expr = self.parse_implies();
        self.recursion_depth -= 1;
        expr
    }

    fn binary(left: AstNode, operator: BinaryOperator, right: AstNode) -> AstNode {
        AstNode::Binary {
            left: Box::new(left),
            operator,
            right: Box::new(right),
        }
    }

    /// Parse one left-associative precedence level.
    fn parse_level(
        &mut self,
        operators: &[(TokenType, BinaryOperator)],
        next: fn(&mut Self) -> Result<AstNode>,
    ) -> Result<AstNode> {
        let mut left = next(self)?;
        'outer: loop {
            for (token_type, operator) in operators {
                if self.check(*token_type)? {
                    self.advance()?;
                    let right = next(self)?;
                    left = Self::binary(left, *operator, right);
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn parse_implies(&mut self) -> Result<AstNode> {
        self.parse_level(&[(TokenType::Implies, BinaryOperator::Implies)], Self::parse_or)
    }

    fn parse_or(&mut self) -> Result<AstNode> {
        self.parse_level(
            &[
                (TokenType::Or, BinaryOperator::Or),
                (TokenType::Xor, BinaryOperator::Xor),
            ],
            Self::parse_and,
        )
    }

    fn parse_and(&mut self) -> Result<AstNode> {
        self.parse_level(&[(TokenType::And, BinaryOperator::And)], Self::parse_membership)
    }

    fn parse_membership(&mut self) -> Result<AstNode> {
        self.parse_level(
            &[
                (TokenType::In, BinaryOperator::In),
                (TokenType::Contains, BinaryOperator::Contains),
            ],
            Self::parse_equality,
        )
    }

    fn parse_equality(&mut self) -> Result<AstNode> {
        self.parse_level(
            &[
                (TokenType::Equal, BinaryOperator::Equal),
                (TokenType::NotEqual, BinaryOperator::NotEqual),
            ],
            Self::parse_inequality,
        )
    }

    fn parse_inequality(&mut self) -> Result<AstNode> {
        self.parse_level(
            &[
                (TokenType::LessThanOrEqual, BinaryOperator::LessThanOrEqual),
                (TokenType::LessThan, BinaryOperator::LessThan),
                (TokenType::GreaterThanOrEqual, BinaryOperator::GreaterThanOrEqual),
                (TokenType::GreaterThan, BinaryOperator::GreaterThan),
            ],
            Self::parse_union,
        )
    }

    fn parse_union(&mut self) -> Result<AstNode> {
        self.parse_level(&[(TokenType::Pipe, BinaryOperator::Union)], Self::parse_additive)
    }

    fn parse_additive(&mut self) -> Result<AstNode> {
        self.parse_level(
            &[
                (TokenType::Plus, BinaryOperator::Add),
                (TokenType::Minus, BinaryOperator::Subtract),
                (TokenType::Ampersand, BinaryOperator::Concatenate),
            ],
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> Result<AstNode> {
        self.parse_level(
            &[
                (TokenType::Multiply, BinaryOperator::Multiply),
                (TokenType::Divide, BinaryOperator::Divide),
            ],
            Self::parse_polarity,
        )
    }

    fn parse_polarity(&mut self) -> Result<AstNode> {
        if self.check(TokenType::Minus)? {
            self.advance()?;
            let expression = self.parse_polarity()?;
            return Ok(AstNode::Negate {
                expression: Box::new(expression),
            });
        }
        if self.check(TokenType::Plus)? {
            self.advance()?;
            return self.parse_polarity();
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<AstNode> {
        let mut expr = self.parse_term()?;
        loop {
            if self.check(TokenType::Dot)? {
                self.advance()?;
                let invocation = self.parse_invocation()?;
                expr = AstNode::Invocation {
                    expression: Box::new(expr),
                    invocation: Box::new(invocation),
                };
            } else if self.check(TokenType::OpenBracket)? {
                self.advance()?;
                let index = self.parse_expression()?;
                self.expect(TokenType::CloseBracket)?;
                expr = AstNode::Indexer {
                    collection: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Member or function name following a `.`; keywords are allowed here.
    fn parse_invocation(&mut self) -> Result<AstNode> {
        let token_type = self.current.token_type;
        let is_name = matches!(
            token_type,
            TokenType::Identifier | TokenType::DelimitedIdentifier
        ) || token_type.is_keyword();
        if !is_name {
            self.check(TokenType::Identifier)?;
            return Err(self.error_at(
                &self.current,
                &format!("Expected identifier after '.', got '{}'", self.current.value),
            ));
        }
        let token = self.advance()?;
        self.parse_member_or_function(token)
    }

    fn parse_member_or_function(&mut self, name: Token) -> Result<AstNode> {
        if name.token_type != TokenType::DelimitedIdentifier && self.check(TokenType::OpenParen)? {
            self.advance()?;
            let mut arguments = Vec::new();
            if !self.check(TokenType::CloseParen)? {
                arguments.push(self.parse_expression()?);
                while self.check(TokenType::Comma)? {
                    self.advance()?;
                    arguments.push(self.parse_expression()?);
                }
            }
            self.expect(TokenType::CloseParen)?;
            return Ok(AstNode::Function {
                name: name.value,
                arguments,
            });
        }
        Ok(AstNode::Member { name: name.value })
    }

    fn parse_term(&mut self) -> Result<AstNode> {
        let token = self.advance()?;
        match token.token_type {
            TokenType::StringLiteral => Ok(AstNode::Literal(Literal::String(token.value))),
            TokenType::BooleanLiteral => Ok(AstNode::Literal(Literal::Boolean(token.value == "true"))),
            TokenType::NumberLiteral => Decimal::from_str(&token.value)
                .map(|n| AstNode::Literal(Literal::Number(n)))
                .map_err(|e| self.error_at(&token, &format!("Invalid number '{}': {}", token.value, e))),
            TokenType::This => Ok(AstNode::This),
            TokenType::ExternalConstant => Ok(AstNode::ExternalConstant { name: token.value }),
            TokenType::OpenBrace => {
                self.expect(TokenType::CloseBrace)?;
                Ok(AstNode::EmptyCollection)
            }
            TokenType::OpenParen => {
                let inner = self.parse_expression()?;
                self.expect(TokenType::CloseParen)?;
                Ok(inner)
            }
            TokenType::Identifier | TokenType::DelimitedIdentifier => {
                self.parse_member_or_function(token)
            }
            TokenType::Eof => Err(Error::ParseError(
                "Unexpected end of expression".into(),
            )),
            _ => Err(self.error_at(&token, &format!("Unexpected token '{}'", token.value))),
        }
    }
}

/// Parse expression source into an AST.
pub fn parse(input: &str) -> Result<AstNode> {
    Parser::new(input).parse()
}
