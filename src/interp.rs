//! Grammar interpreter.
//!
//! A recursive-descent parser over the flat token stream that builds an AST in a
//! [`bumpalo::Bump`] arena. Each precedence level is one method returning
//! `Option<&Node>`; a level that cannot match restores the cursor so the caller may try
//! another production. Hard failures (a dangling operator, a missing `)` or `:`) are
//! recorded in a sticky [`ErrorState`] and abort the parse.
//!
//! Levels that match without their own operator return the child unchanged, so a bare
//! literal parses to a single leaf rather than a chain of single-child nodes.
//!
//! Node shapes, by rule:
//!
//! | Rule                       | Children                                   |
//! |----------------------------|--------------------------------------------|
//! | `Expression`               | `lhs , rhs`                                |
//! | `AssignmentExpression`     | `target op value`                          |
//! | `ConditionalExpression`    | `cond ? then : else`                       |
//! | binary levels, `Power`     | `lhs op rhs`                               |
//! | `UnaryExpression`          | `op operand`                               |
//! | `PostfixExpression`        | `operand op` or `name ( args? )`           |
//! | `PrimaryExpression`        | `( expression )`                           |
//! | `ArgumentExpressionList`   | one child per argument                     |

extern crate alloc;

use crate::error::{ErrorState, ExprError, Result};
use crate::lexer::{Token, TokenKind};
use crate::types::{OpType, Rule};
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use bumpalo::Bump;
use core::fmt;

/// An AST node.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Leaf(&'a Token),
    Rule {
        rule: Rule,
        children: &'a [&'a Node<'a>],
    },
}

impl<'a> Node<'a> {
    pub fn rule(&self) -> Option<Rule> {
        match self {
            Node::Rule { rule, .. } => Some(*rule),
            Node::Leaf(_) => None,
        }
    }

    pub fn children(&self) -> &'a [&'a Node<'a>] {
        match self {
            Node::Rule { children, .. } => *children,
            Node::Leaf(_) => &[],
        }
    }

    pub fn token(&self) -> Option<&'a Token> {
        match self {
            Node::Leaf(token) => Some(*token),
            Node::Rule { .. } => None,
        }
    }

    /// Operator held by a leaf.
    pub fn operator(&self) -> Option<OpType> {
        self.token().and_then(Token::operator)
    }

    /// Name held by an identifier leaf.
    pub fn identifier(&self) -> Option<&'a str> {
        self.token().and_then(Token::identifier)
    }

    /// True for nodes that may stand on the left of an assignment: leaves and the
    /// unary, postfix and primary productions.
    pub fn is_unary_level(&self) -> bool {
        matches!(
            self.rule(),
            None | Some(Rule::UnaryExpression | Rule::PostfixExpression | Rule::PrimaryExpression)
        )
    }

    /// Indented dump of the tree, one node per line, for debug tracing.
    pub fn tree_string(&self) -> String {
        let mut out = String::new();
        self.write_tree(&mut out, 0);
        out
    }

    fn write_tree(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        match self {
            Node::Leaf(token) => {
                out.push_str(&token.to_string());
                out.push('\n');
            }
            Node::Rule { rule, children } => {
                out.push_str(rule.name());
                out.push('\n');
                for child in children.iter() {
                    child.write_tree(out, depth + 1);
                }
            }
        }
    }
}

impl fmt::Display for Node<'_> {
    /// Source-like rendering with tokens separated by spaces.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Leaf(token) => write!(f, "{}", token),
            Node::Rule { rule, children } => {
                let sep = if *rule == Rule::ArgumentExpressionList {
                    ", "
                } else {
                    " "
                };
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(sep)?;
                    }
                    write!(f, "{}", child)?;
                }
                Ok(())
            }
        }
    }
}

/// Parse `tokens` into an AST allocated in `arena`.
///
/// Fails with [`ExprError::Syntax`] when no production matches, when a production is
/// left incomplete, or when tokens remain after a complete expression. In the last
/// case the message shows the parsed part between `>>` and `<<` followed by the
/// leftover tokens.
pub fn interpret<'a>(arena: &'a Bump, tokens: &'a [Token]) -> Result<&'a Node<'a>> {
    if tokens.is_empty() {
        return Err(ExprError::Syntax("Empty expression".to_string()));
    }

    let mut interp = Interpreter::new(arena, tokens);
    let root = interp.expression();

    if let Some(err) = interp.error.take() {
        return Err(err);
    }

    match root {
        Some(node) if interp.at_end() => Ok(node),
        Some(node) => Err(ExprError::Syntax(format!(
            "Syntax Error >>{}<< {}",
            node,
            interp.remaining()
        ))),
        None => Err(ExprError::Syntax(format!(
            "Syntax Error >><< {}",
            interp.remaining()
        ))),
    }
}

pub struct Interpreter<'a> {
    arena: &'a Bump,
    tokens: &'a [Token],
    pos: usize,
    error: ErrorState,
}

impl<'a> Interpreter<'a> {
    pub fn new(arena: &'a Bump, tokens: &'a [Token]) -> Self {
        Self {
            arena,
            tokens,
            pos: 0,
            error: ErrorState::new(),
        }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Unconsumed tokens, space separated.
    pub fn remaining(&self) -> String {
        let parts: Vec<String> = self.tokens[self.pos.min(self.tokens.len())..]
            .iter()
            .map(|t| t.to_string())
            .collect();
        parts.join(" ")
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_op(&self) -> Option<OpType> {
        self.peek().and_then(Token::operator)
    }

    fn peek_op_at(&self, offset: usize) -> Option<OpType> {
        self.tokens.get(self.pos + offset).and_then(Token::operator)
    }

    /// Consume the current token as a leaf.
    fn bump(&mut self) -> Option<&'a Node<'a>> {
        let token = self.peek()?;
        self.pos += 1;
        let leaf: &'a Node<'a> = self.arena.alloc(Node::Leaf(token));
        Some(leaf)
    }

    fn node(&self, rule: Rule, children: &[&'a Node<'a>]) -> &'a Node<'a> {
        let children = self.arena.alloc_slice_copy(children);
        self.arena.alloc(Node::Rule { rule, children })
    }

    fn fail(&mut self, message: &str) -> Option<&'a Node<'a>> {
        self.error.set(ExprError::Syntax(message.to_string()));
        None
    }

    fn missing_operand(&mut self, op: OpType) -> Option<&'a Node<'a>> {
        self.error
            .set(ExprError::Syntax(format!("Missing operand after '{}'", op)));
        None
    }

    /// expression := assignment (',' assignment)*
    pub fn expression(&mut self) -> Option<&'a Node<'a>> {
        let mut lhs = self.assignment()?;

        while self.peek_op() == Some(OpType::Comma) {
            let comma = self.bump()?;
            let Some(rhs) = self.assignment() else {
                return self.fail("Missing assignment expression after comma");
            };
            lhs = self.node(Rule::Expression, &[lhs, comma, rhs]);
        }

        Some(lhs)
    }

    /// assignment := conditional (assign-op assignment)?
    ///
    /// The assignment form is only taken when the left side is a unary-level node.
    fn assignment(&mut self) -> Option<&'a Node<'a>> {
        let lhs = self.conditional()?;

        match self.peek_op() {
            Some(op) if op.is_assignment() && lhs.is_unary_level() => {
                let op_node = self.bump()?;
                let Some(rhs) = self.assignment() else {
                    return self.missing_operand(op);
                };
                Some(self.node(Rule::AssignmentExpression, &[lhs, op_node, rhs]))
            }
            _ => Some(lhs),
        }
    }

    /// conditional := logical_or ('?' expression ':' conditional)?
    fn conditional(&mut self) -> Option<&'a Node<'a>> {
        let cond = self.binary_level(0)?;

        if self.peek_op() != Some(OpType::Question) {
            return Some(cond);
        }

        let question = self.bump()?;
        let Some(then) = self.expression() else {
            return self.missing_operand(OpType::Question);
        };

        if self.peek_op() != Some(OpType::Colon) {
            return self.fail("Missing colon for '?:'");
        }
        let colon = self.bump()?;

        let Some(otherwise) = self.conditional() else {
            return self.missing_operand(OpType::Colon);
        };

        Some(self.node(
            Rule::ConditionalExpression,
            &[cond, question, then, colon, otherwise],
        ))
    }

    /// Left-associative binary levels, loosest first.
    fn binary_level(&mut self, level: usize) -> Option<&'a Node<'a>> {
        let Some((rule, ops)) = BINARY_LEVELS.get(level) else {
            return self.unary();
        };

        let mut lhs = self.binary_level(level + 1)?;

        while let Some(op) = self.peek_op().filter(|op| ops.contains(op)) {
            let op_node = self.bump()?;
            let Some(rhs) = self.binary_level(level + 1) else {
                return self.missing_operand(op);
            };
            lhs = self.node(*rule, &[lhs, op_node, rhs]);
        }

        Some(lhs)
    }

    /// unary := ('++' | '--' | '+' | '-' | '~' | '!') unary | power
    ///
    /// Prefix operators bind looser than `**`, so `-x ** 2` is `-(x ** 2)`.
    fn unary(&mut self) -> Option<&'a Node<'a>> {
        match self.peek_op() {
            Some(
                op @ (OpType::Increment
                | OpType::Decrement
                | OpType::Plus
                | OpType::Minus
                | OpType::BitNot
                | OpType::LogicalNot),
            ) => {
                let op_node = self.bump()?;
                let Some(operand) = self.unary() else {
                    return self.missing_operand(op);
                };
                Some(self.node(Rule::UnaryExpression, &[op_node, operand]))
            }
            _ => self.power(),
        }
    }

    /// power := postfix ('**' unary)?
    ///
    /// Right associative. The exponent may carry its own prefix operator: `2 ** -x`.
    fn power(&mut self) -> Option<&'a Node<'a>> {
        let lhs = self.postfix()?;

        if self.peek_op() != Some(OpType::Power) {
            return Some(lhs);
        }

        let op_node = self.bump()?;
        let Some(rhs) = self.unary() else {
            return self.missing_operand(OpType::Power);
        };
        Some(self.node(Rule::PowerExpression, &[lhs, op_node, rhs]))
    }

    /// postfix := (identifier '(' arguments? ')' | primary) ('++' | '--')*
    fn postfix(&mut self) -> Option<&'a Node<'a>> {
        let is_call = self.peek().and_then(Token::identifier).is_some()
            && self.peek_op_at(1) == Some(OpType::OpenRBracket);

        let mut node = if is_call { self.call()? } else { self.primary()? };

        while matches!(
            self.peek_op(),
            Some(OpType::Increment | OpType::Decrement)
        ) {
            let op_node = self.bump()?;
            node = self.node(Rule::PostfixExpression, &[node, op_node]);
        }

        Some(node)
    }

    fn call(&mut self) -> Option<&'a Node<'a>> {
        let name = self.bump()?;
        let open = self.bump()?;

        if self.peek_op() == Some(OpType::CloseRBracket) {
            let close = self.bump()?;
            return Some(self.node(Rule::PostfixExpression, &[name, open, close]));
        }

        let Some(args) = self.arguments() else {
            if self.error.is_set() {
                return None;
            }
            return self.fail("Missing close round bracket");
        };

        if self.peek_op() != Some(OpType::CloseRBracket) {
            return self.fail("Missing close round bracket");
        }
        let close = self.bump()?;

        Some(self.node(Rule::PostfixExpression, &[name, open, args, close]))
    }

    /// arguments := assignment (',' assignment)*
    fn arguments(&mut self) -> Option<&'a Node<'a>> {
        let mut args = bumpalo::collections::Vec::new_in(self.arena);
        args.push(self.assignment()?);

        while self.peek_op() == Some(OpType::Comma) {
            self.pos += 1;
            let Some(arg) = self.assignment() else {
                return self.fail("Missing assignment expression after comma");
            };
            args.push(arg);
        }

        let children: &'a [&'a Node<'a>] = args.into_bump_slice();
        let list: &'a Node<'a> = self.arena.alloc(Node::Rule {
            rule: Rule::ArgumentExpressionList,
            children,
        });
        Some(list)
    }

    /// primary := literal | identifier | '(' expression ')'
    fn primary(&mut self) -> Option<&'a Node<'a>> {
        let token = self.peek()?;

        match &token.kind {
            TokenKind::Integer(_)
            | TokenKind::Real(_)
            | TokenKind::Str(_)
            | TokenKind::Identifier(_) => self.bump(),
            TokenKind::Operator(OpType::OpenRBracket) => {
                let start = self.pos;
                let open = self.bump()?;

                if self.at_end() || self.peek_op() == Some(OpType::CloseRBracket) {
                    return self.fail("Missing expression after open round bracket");
                }

                let Some(inner) = self.expression() else {
                    if !self.error.is_set() {
                        self.pos = start;
                        return self.fail("Missing expression after open round bracket");
                    }
                    return None;
                };

                if self.peek_op() != Some(OpType::CloseRBracket) {
                    return self.fail("Missing close round bracket");
                }
                let close = self.bump()?;

                Some(self.node(Rule::PrimaryExpression, &[open, inner, close]))
            }
            TokenKind::Operator(_) => None,
        }
    }
}

const BINARY_LEVELS: &[(Rule, &[OpType])] = &[
    (Rule::LogicalOrExpression, &[OpType::LogicalOr]),
    (Rule::LogicalAndExpression, &[OpType::LogicalAnd]),
    (Rule::InclusiveOrExpression, &[OpType::BitOr]),
    (Rule::ExclusiveOrExpression, &[OpType::BitXor]),
    (Rule::AndExpression, &[OpType::BitAnd]),
    (
        Rule::EqualityExpression,
        &[OpType::Equal, OpType::NotEqual, OpType::ApproxEqual],
    ),
    (
        Rule::RelationalExpression,
        &[
            OpType::Less,
            OpType::LessEqual,
            OpType::Greater,
            OpType::GreaterEqual,
        ],
    ),
    (Rule::ShiftExpression, &[OpType::BitLShift, OpType::BitRShift]),
    (Rule::AdditiveExpression, &[OpType::Plus, OpType::Minus]),
    (
        Rule::MultiplicativeExpression,
        &[OpType::Times, OpType::Divide, OpType::Modulus],
    ),
];
