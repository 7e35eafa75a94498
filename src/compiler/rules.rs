use super::Compiler;
use crate::scanner::TokenKind;

/// Precedence ladder, low to high, exactly as named in spec.md §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    Assignment,
    Ternary,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    pub fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Ternary,
            Precedence::Ternary => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

/// Each token maps to at most one prefix and one infix handler plus a
/// precedence, matching the table structure in the original C compiler --
/// expressed here as two match-based dispatch functions rather than a
/// literal array of function pointers, since a homogeneous array of method
/// references isn't expressible without boxing every closure.
pub fn prefix<'src, 'h>(c: &mut Compiler<'src, 'h>, kind: TokenKind, can_assign: bool) -> bool {
    match kind {
        TokenKind::LeftParen => c.grouping(),
        TokenKind::Minus | TokenKind::Bang => c.unary(kind),
        TokenKind::Number => c.number(),
        TokenKind::String => c.string(),
        TokenKind::True | TokenKind::False | TokenKind::Nil => c.literal(kind),
        TokenKind::Identifier => c.variable(can_assign),
        TokenKind::SelfKw => c.self_expr(),
        TokenKind::Super => c.super_expr(),
        _ => return false,
    }
    true
}

pub fn infix<'src, 'h>(c: &mut Compiler<'src, 'h>, kind: TokenKind, can_assign: bool) {
    match kind {
        TokenKind::Minus
        | TokenKind::Plus
        | TokenKind::Slash
        | TokenKind::Star
        | TokenKind::Percent
        | TokenKind::Caret
        | TokenKind::BangEqual
        | TokenKind::EqualEqual
        | TokenKind::Greater
        | TokenKind::GreaterEqual
        | TokenKind::Less
        | TokenKind::LessEqual => c.binary(kind),
        TokenKind::Question => c.ternary(),
        TokenKind::And => c.and(),
        TokenKind::Or => c.or(),
        TokenKind::LeftParen => c.call(),
        TokenKind::LeftBracket => c.index(can_assign),
        TokenKind::Dot => c.dot(can_assign),
        _ => unreachable!("infix() called for a token with no infix rule"),
    }
}

pub fn infix_precedence(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Minus | TokenKind::Plus => Precedence::Term,
        TokenKind::Slash | TokenKind::Star | TokenKind::Percent => Precedence::Factor,
        TokenKind::Caret => Precedence::Factor,
        TokenKind::BangEqual | TokenKind::EqualEqual => Precedence::Equality,
        TokenKind::Greater | TokenKind::GreaterEqual | TokenKind::Less | TokenKind::LessEqual => {
            Precedence::Comparison
        }
        TokenKind::Question => Precedence::Ternary,
        TokenKind::And => Precedence::And,
        TokenKind::Or => Precedence::Or,
        TokenKind::LeftParen | TokenKind::LeftBracket | TokenKind::Dot => Precedence::Call,
        _ => Precedence::None,
    }
}
