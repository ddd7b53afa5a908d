//! Abstract syntax tree for path expressions
//!
//! The tree mirrors the precedence levels of the parser:
//!
//! ```text
//! implies < or/xor < and < in/contains < = != < < <= > >= < | < + - & < * / < unary - < [ ] . < term
//! ```

use rust_decimal::Decimal;

/// AST node representing a path expression
#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    /// Literal value: `'text'`, `42`, `true`
    Literal(Literal),

    /// Empty collection literal: `{}`
    EmptyCollection,

    /// Member access on the current focus: `name`
    Member { name: String },

    /// Function call on the current focus: `exists()`
    Function {
        name: String,
        arguments: Vec<AstNode>,
    },

    /// `$this`
    This,

    /// `%resource`, `%context`, ...
    ExternalConstant { name: String },

    /// expression '.' invocation, where invocation is `Member` or `Function`
    Invocation {
        expression: Box<AstNode>,
        invocation: Box<AstNode>,
    },

    /// expression '[' expression ']'
    Indexer {
        collection: Box<AstNode>,
        index: Box<AstNode>,
    },

    /// '-' expression
    Negate { expression: Box<AstNode> },

    /// Any binary operator
    Binary {
        left: Box<AstNode>,
        operator: BinaryOperator,
        right: Box<AstNode>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Boolean(bool),
    String(String),
    Number(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Multiply,
    Divide,
    Add,
    Subtract,
    Concatenate,
    Union,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Equal,
    NotEqual,
    In,
    Contains,
    And,
    Or,
    Xor,
    Implies,
}

impl AstNode {
    /// Visit every function invocation in the tree, depth-first.
    pub fn for_each_function<'s>(&'s self, visit: &mut dyn FnMut(&'s str, &'s [AstNode])) {
        match self {
            AstNode::Function { name, arguments } => {
                visit(name, arguments);
                for argument in arguments {
                    argument.for_each_function(visit);
                }
            }
            AstNode::Invocation {
                expression,
                invocation,
            } => {
                expression.for_each_function(visit);
                invocation.for_each_function(visit);
            }
            AstNode::Indexer { collection, index } => {
                collection.for_each_function(visit);
                index.for_each_function(visit);
            }
            AstNode::Negate { expression } => expression.for_each_function(visit),
            AstNode::Binary { left, right, .. } => {
                left.for_each_function(visit);
                right.for_each_function(visit);
            }
            AstNode::Literal(_)
            | AstNode::EmptyCollection
            | AstNode::Member { .. }
            | AstNode::This
            | AstNode::ExternalConstant { .. } => {}
        }
    }

    /// Names of all functions invoked anywhere in the tree.
    pub fn function_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.for_each_function(&mut |name, _| names.push(name));
        names
    }
}
