//! Token types for the path-expression lexer

/// Token types for the path-expression lexer
#[derive(Debug, PartialEq, Clone, Copy, Eq)]
pub enum TokenType {
    // Literals
    StringLiteral,
    NumberLiteral,
    BooleanLiteral,

    // Identifiers
    Identifier,
    DelimitedIdentifier,

    // Keywords
    In,
    Contains,
    And,
    Or,
    Xor,
    Implies,
    This, // $this

    // External constant
    ExternalConstant, // %identifier

    // Operators
    Dot,                // .
    OpenBracket,        // [
    CloseBracket,       // ]
    Plus,               // +
    Minus,              // -
    Multiply,           // *
    Divide,             // /
    Ampersand,          // &
    Pipe,               // |
    LessThanOrEqual,    // <=
    LessThan,           // <
    GreaterThanOrEqual, // >=
    GreaterThan,        // >
    Equal,              // =
    NotEqual,           // !=

    // Delimiters
    OpenParen,  // (
    CloseParen, // )
    OpenBrace,  // {
    CloseBrace, // }
    Comma,      // ,

    Eof,
    Error,
}

impl TokenType {
    /// Keyword tokens that may still name a member or function after a `.`
    /// (e.g. `name.contains('x')`).
    pub fn is_keyword(self) -> bool {
        matches!(
            self,
            TokenType::In
                | TokenType::Contains
                | TokenType::And
                | TokenType::Or
                | TokenType::Xor
                | TokenType::Implies
        )
    }
}

/// A token in the expression source
#[derive(Debug, Clone)]
pub struct Token {
    pub token_type: TokenType,
    pub value: String,
    pub position: usize,
}

impl Token {
    pub fn new(token_type: TokenType, value: impl Into<String>, position: usize) -> Self {
        Self {
            token_type,
            value: value.into(),
            position,
        }
    }

    pub fn eof(position: usize) -> Self {
        Self::new(TokenType::Eof, String::new(), position)
    }

    pub fn error(message: String, position: usize) -> Self {
        Self::new(TokenType::Error, message, position)
    }
}
