//! Black-box lexer coverage, complementing `scanner.rs`'s own inline
//! `#[cfg(test)]` block with checks against the public `Scanner` API as an
//! external caller would use it.

use skooma::scanner::{Scanner, TokenKind};

fn kinds(src: &str) -> Vec<TokenKind> {
    let mut scanner = Scanner::new(src);
    let mut out = Vec::new();
    loop {
        let tok = scanner.next_token();
        let done = tok.kind == TokenKind::Eof;
        out.push(tok.kind);
        if done {
            break;
        }
    }
    out
}

#[test]
fn scans_a_class_with_inheritance_and_self() {
    let got = kinds("class B : A { get() { return self.x; } }");
    assert_eq!(
        got,
        vec![
            TokenKind::Class,
            TokenKind::Identifier,
            TokenKind::Colon,
            TokenKind::Identifier,
            TokenKind::LeftBrace,
            TokenKind::Identifier,
            TokenKind::LeftParen,
            TokenKind::RightParen,
            TokenKind::LeftBrace,
            TokenKind::Return,
            TokenKind::SelfKw,
            TokenKind::Dot,
            TokenKind::Identifier,
            TokenKind::Semicolon,
            TokenKind::RightBrace,
            TokenKind::RightBrace,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn scans_numbers_with_a_fractional_part() {
    let got = kinds("3.14 2 .5");
    // A bare `.5` has no leading digit, so `.` and `5` scan as separate
    // tokens -- only digit-led numbers consume a fractional part.
    assert_eq!(got[0], TokenKind::Number);
    assert_eq!(got[1], TokenKind::Number);
    assert_eq!(got[2], TokenKind::Dot);
    assert_eq!(got[3], TokenKind::Number);
}

#[test]
fn distinguishes_single_and_double_char_operators() {
    assert_eq!(kinds("= == ! != < <= > >="), vec![
        TokenKind::Equal,
        TokenKind::EqualEqual,
        TokenKind::Bang,
        TokenKind::BangEqual,
        TokenKind::Less,
        TokenKind::LessEqual,
        TokenKind::Greater,
        TokenKind::GreaterEqual,
        TokenKind::Eof,
    ]);
}

#[test]
fn every_reserved_word_scans_as_its_keyword_not_an_identifier() {
    let src = "and class else false for fn if impl nil or print return super self true var while";
    let got = kinds(src);
    assert_eq!(
        got,
        vec![
            TokenKind::And,
            TokenKind::Class,
            TokenKind::Else,
            TokenKind::False,
            TokenKind::For,
            TokenKind::Fn,
            TokenKind::If,
            TokenKind::Impl,
            TokenKind::Nil,
            TokenKind::Or,
            TokenKind::Print,
            TokenKind::Return,
            TokenKind::Super,
            TokenKind::SelfKw,
            TokenKind::True,
            TokenKind::Var,
            TokenKind::While,
            TokenKind::Eof,
        ]
    );
}
