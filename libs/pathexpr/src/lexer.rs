//! Lexer - tokenizes path-expression source
//!
//! Produces one token at a time; errors are returned as `TokenType::Error`
//! tokens carrying the message so the parser can report them with a position.

use crate::error::{Error, Result};
use crate::token::{Token, TokenType};

pub struct Lexer {
    chars: Vec<char>,
    position: usize,
    current_char: Option<char>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let current_char = chars.first().copied();
        Self {
            chars,
            position: 0,
            current_char,
        }
    }

    fn advance(&mut self) {
        self.position += 1;
        self.current_char = self.chars.get(self.position).copied();
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position + 1).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.current_char, Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    fn read_identifier(&mut self) -> String {
        let start = self.position;
        while matches!(self.current_char, Some(c) if c.is_alphanumeric() || c == '_') {
            self.advance();
        }
        self.chars[start..self.position].iter().collect()
    }

    /// Read a quoted run (`'...'` or `` `...` ``) with backslash escapes.
    fn read_quoted(&mut self, quote: char) -> Result<String> {
        self.advance(); // opening quote
        let mut value = String::new();

        while let Some(c) = self.current_char {
            if c == quote {
                self.advance();
                return Ok(value);
            }
            if c == '\\' {
                self.advance();
                let Some(escaped) = self.current_char else {
                    return Err(Error::ParseError("Incomplete escape sequence".into()));
                };
                match escaped {
                    'n' => value.push('\n'),
                    'r' => value.push('\r'),
                    't' => value.push('\t'),
                    'f' => value.push('\x0C'),
                    'u' => {
                        self.advance();
                        let mut hex = String::new();
                        for _ in 0..4 {
                            match self.current_char {
                                Some(h) if h.is_ascii_hexdigit() => {
                                    hex.push(h);
                                    self.advance();
                                }
                                _ => {
                                    return Err(Error::ParseError(
                                        "Invalid unicode escape sequence".into(),
                                    ))
                                }
                            }
                        }
                        let code = u32::from_str_radix(&hex, 16)
                            .map_err(|_| Error::ParseError("Invalid unicode code point".into()))?;
                        value.push(char::from_u32(code).ok_or_else(|| {
                            Error::ParseError("Invalid unicode character".into())
                        })?);
                        continue;
                    }
                    other => value.push(other),
                }
                self.advance();
            } else {
                value.push(c);
                self.advance();
            }
        }

        Err(Error::ParseError(if quote == '\'' {
            "Unterminated string literal".into()
        } else {
            "Unterminated delimited identifier".into()
        }))
    }

    fn read_number(&mut self) -> String {
        let start = self.position;
        while matches!(self.current_char, Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        // Only consume the dot when digits follow, otherwise it is navigation.
        if self.current_char == Some('.') && matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
            while matches!(self.current_char, Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        self.chars[start..self.position].iter().collect()
    }

    fn single(&mut self, token_type: TokenType, text: &str, position: usize) -> Token {
        self.advance();
        Token::new(token_type, text, position)
    }

    /// Get the next token from the input
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();
        let position = self.position;

        let Some(c) = self.current_char else {
            return Token::eof(position);
        };

        match c {
            '.' => self.single(TokenType::Dot, ".", position),
            '[' => self.single(TokenType::OpenBracket, "[", position),
            ']' => self.single(TokenType::CloseBracket, "]", position),
            '(' => self.single(TokenType::OpenParen, "(", position),
            ')' => self.single(TokenType::CloseParen, ")", position),
            '{' => self.single(TokenType::OpenBrace, "{", position),
            '}' => self.single(TokenType::CloseBrace, "}", position),
            ',' => self.single(TokenType::Comma, ",", position),
            '+' => self.single(TokenType::Plus, "+", position),
            '-' => self.single(TokenType::Minus, "-", position),
            '*' => self.single(TokenType::Multiply, "*", position),
            '/' => self.single(TokenType::Divide, "/", position),
            '&' => self.single(TokenType::Ampersand, "&", position),
            '|' => self.single(TokenType::Pipe, "|", position),
            '=' => self.single(TokenType::Equal, "=", position),
            '<' => {
                self.advance();
                if self.current_char == Some('=') {
                    self.single(TokenType::LessThanOrEqual, "<=", position)
                } else {
                    Token::new(TokenType::LessThan, "<", position)
                }
            }
            '>' => {
                self.advance();
                if self.current_char == Some('=') {
                    self.single(TokenType::GreaterThanOrEqual, ">=", position)
                } else {
                    Token::new(TokenType::GreaterThan, ">", position)
                }
            }
            '!' => {
                self.advance();
                if self.current_char == Some('=') {
                    self.single(TokenType::NotEqual, "!=", position)
                } else {
                    Token::error("Unexpected '!' character".into(), position)
                }
            }
            '%' => {
                self.advance();
                let name = match self.current_char {
                    Some('`') => self.read_quoted('`'),
                    Some('\'') => self.read_quoted('\''),
                    _ => Ok(self.read_identifier()),
                };
                match name {
                    Ok(name) if !name.is_empty() => {
                        Token::new(TokenType::ExternalConstant, name, position)
                    }
                    Ok(_) => Token::error("Expected constant name after '%'".into(), position),
                    Err(e) => Token::error(e.to_string(), position),
                }
            }
            '$' => {
                self.advance();
                let ident = self.read_identifier();
                if ident == "this" {
                    Token::new(TokenType::This, "$this", position)
                } else {
                    Token::error(format!("Unknown variable: ${}", ident), position)
                }
            }
            '\'' => match self.read_quoted('\'') {
                Ok(value) => Token::new(TokenType::StringLiteral, value, position),
                Err(e) => Token::error(e.to_string(), position),
            },
            '`' => match self.read_quoted('`') {
                Ok(value) => Token::new(TokenType::DelimitedIdentifier, value, position),
                Err(e) => Token::error(e.to_string(), position),
            },
            c if c.is_ascii_digit() => {
                let value = self.read_number();
                Token::new(TokenType::NumberLiteral, value, position)
            }
            c if c.is_alphabetic() || c == '_' => {
                let ident = self.read_identifier();
                let token_type = match ident.as_str() {
                    "true" | "false" => TokenType::BooleanLiteral,
                    "in" => TokenType::In,
                    "contains" => TokenType::Contains,
                    "and" => TokenType::And,
                    "or" => TokenType::Or,
                    "xor" => TokenType::Xor,
                    "implies" => TokenType::Implies,
                    _ => TokenType::Identifier,
                };
                Token::new(token_type, ident, position)
            }
            other => Token::error(format!("Unexpected character: {}", other), position),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(input: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(input);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token();
            let done = matches!(token.token_type, TokenType::Eof | TokenType::Error);
            tokens.push(token);
            if done {
                break;
            }
        }
        tokens
    }

    #[test]
    fn test_path_navigation() {
        let tokens = tokenize("name.given");
        assert_eq!(tokens[0].token_type, TokenType::Identifier);
        assert_eq!(tokens[1].token_type, TokenType::Dot);
        assert_eq!(tokens[2].token_type, TokenType::Identifier);
        assert_eq!(tokens[2].value, "given");
    }

    #[test]
    fn test_string_escape() {
        let tokens = tokenize("'it\\'s'");
        assert_eq!(tokens[0].token_type, TokenType::StringLiteral);
        assert_eq!(tokens[0].value, "it's");
    }

    #[test]
    fn test_numbers_do_not_swallow_navigation() {
        let tokens = tokenize("1.5 2.count()");
        assert_eq!(tokens[0].value, "1.5");
        assert_eq!(tokens[1].value, "2");
        assert_eq!(tokens[2].token_type, TokenType::Dot);
    }

    #[test]
    fn test_keywords_and_operators() {
        let tokens = tokenize("a != b and c <= d implies e in f");
        let types: Vec<_> = tokens.iter().map(|t| t.token_type).collect();
        assert_eq!(
            types,
            vec![
                TokenType::Identifier,
                TokenType::NotEqual,
                TokenType::Identifier,
                TokenType::And,
                TokenType::Identifier,
                TokenType::LessThanOrEqual,
                TokenType::Identifier,
                TokenType::Implies,
                TokenType::Identifier,
                TokenType::In,
                TokenType::Identifier,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_external_constant_and_this() {
        let tokens = tokenize("%resource $this");
        assert_eq!(tokens[0].token_type, TokenType::ExternalConstant);
        assert_eq!(tokens[0].value, "resource");
        assert_eq!(tokens[1].token_type, TokenType::This);
    }

    #[test]
    fn test_unterminated_string_is_error_token() {
        let tokens = tokenize("'open");
        assert_eq!(tokens[0].token_type, TokenType::Error);
        assert!(tokens[0].value.contains("Unterminated"));
    }
}
