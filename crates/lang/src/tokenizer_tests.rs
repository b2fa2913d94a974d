// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::token::TokenKind;
use yare::parameterized;

fn kinds(source: &str) -> Vec<TokenKind> {
    tokenize(source)
        .unwrap()
        .into_iter()
        .map(|t| t.kind)
        .collect()
}

#[test]
fn simple_line() {
    let kinds = kinds("x = 42\n");
    assert_eq!(
        kinds,
        vec![
            TokenKind::Identifier("x".into()),
            TokenKind::Assign,
            TokenKind::Number(42.0),
            TokenKind::Newline,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn indent_dedent_pairing() {
    let kinds = kinds("spell t\n  version: \"1\"\n  on manual:\n    pass\n");
    let indents = kinds
        .iter()
        .filter(|k| matches!(k, TokenKind::Indent))
        .count();
    let dedents = kinds
        .iter()
        .filter(|k| matches!(k, TokenKind::Dedent))
        .count();
    assert_eq!(indents, 2);
    assert_eq!(dedents, 2);
    assert_eq!(kinds.last(), Some(&TokenKind::Eof));
}

#[test]
fn blank_and_comment_lines_emit_no_layout() {
    let plain = kinds("a = 1\n  b = 2\n");
    let noisy = kinds("a = 1\n\n# comment\n   # indented comment\n\n  b = 2\n");
    assert_eq!(plain, noisy);
}

#[test]
fn tabs_count_as_two_spaces() {
    let spaces = kinds("a:\n  pass\n");
    let tabs = kinds("a:\n\tpass\n");
    assert_eq!(spaces, tabs);
}

#[test]
fn layout_suppressed_inside_brackets() {
    let toks = kinds("x = [1,\n     2,\n     3]\n");
    assert!(!toks.iter().any(|k| matches!(k, TokenKind::Indent)));
    // Exactly one newline: the one ending the logical line.
    let newlines = toks
        .iter()
        .filter(|k| matches!(k, TokenKind::Newline))
        .count();
    assert_eq!(newlines, 1);
}

#[test]
fn bad_dedent_is_an_indentation_error() {
    let err = tokenize("a:\n    b = 1\n  c = 2\n").unwrap_err();
    match err {
        LexError::Indentation {
            found, expected, ..
        } => {
            assert_eq!(found, 2);
            assert_eq!(expected, 0);
        }
        other => panic!("expected indentation error, got {other:?}"),
    }
}

#[parameterized(
    seconds = { "30s", 30.0 },
    minutes = { "5m", 300.0 },
    hours = { "2h", 7200.0 },
    days = { "1d", 86400.0 },
    fractional = { "1.5m", 90.0 },
)]
fn duration_suffixes_scale_to_seconds(source: &str, expected: f64) {
    assert_eq!(kinds(source)[0], TokenKind::Number(expected));
}

#[test]
fn duration_suffix_requires_word_boundary() {
    // `3sum` is not a duration: the suffix runs into identifier chars.
    let toks = kinds("3sum");
    assert_eq!(toks[0], TokenKind::Number(3.0));
    assert_eq!(toks[1], TokenKind::Identifier("sum".into()));
}

#[test]
fn percentage_divides_by_100() {
    assert_eq!(kinds("50%")[0], TokenKind::Percentage(0.5));
    assert_eq!(kinds("2.5%")[0], TokenKind::Percentage(0.025));
}

#[test]
fn address_literal() {
    let toks = kinds("0xDeadBeef00");
    assert_eq!(toks[0], TokenKind::Address("0xDeadBeef00".into()));
}

#[test]
fn venue_ref_and_advisory() {
    let toks = kinds("@aave ** is it safe **");
    assert_eq!(toks[0], TokenKind::VenueRef("aave".into()));
    assert_eq!(toks[1], TokenKind::Advisory("is it safe".into()));
}

#[test]
fn string_escapes() {
    let toks = kinds(r#""a\nb\t\\\"q\'" 'single'"#);
    assert_eq!(toks[0], TokenKind::Str("a\nb\t\\\"q'".into()));
    assert_eq!(toks[1], TokenKind::Str("single".into()));
}

#[test]
fn unknown_escape_is_literal() {
    assert_eq!(kinds(r#""a\zb""#)[0], TokenKind::Str("azb".into()));
}

#[test]
fn newline_in_string_is_an_error() {
    assert!(matches!(
        tokenize("\"abc\ndef\"").unwrap_err(),
        LexError::Tokenize { .. }
    ));
}

#[test]
fn multi_char_operators() {
    let toks = kinds("a == b != c <= d >= e");
    let ops: Vec<String> = toks
        .iter()
        .filter_map(|k| match k {
            TokenKind::Operator(op) => Some(op.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(ops, vec!["==", "!=", "<=", ">="]);
}

#[test]
fn keywords_and_identifiers() {
    let toks = kinds("if balance and halt_now");
    assert_eq!(toks[0], TokenKind::Keyword("if".into()));
    assert_eq!(toks[1], TokenKind::Identifier("balance".into()));
    assert_eq!(toks[2], TokenKind::Keyword("and".into()));
    assert_eq!(toks[3], TokenKind::Identifier("halt_now".into()));
}

#[test]
fn booleans_are_not_keywords() {
    let toks = kinds("true false");
    assert_eq!(toks[0], TokenKind::Bool(true));
    assert_eq!(toks[1], TokenKind::Bool(false));
}

#[test]
fn missing_final_newline_still_closes_line() {
    let toks = kinds("x = 1");
    assert_eq!(toks[toks.len() - 2], TokenKind::Newline);
    assert_eq!(toks[toks.len() - 1], TokenKind::Eof);
}

#[test]
fn eof_unwinds_all_indent_levels() {
    let toks = kinds("a:\n  b:\n    c = 1");
    let dedents = toks
        .iter()
        .filter(|k| matches!(k, TokenKind::Dedent))
        .count();
    assert_eq!(dedents, 2);
}

#[test]
fn locations_are_one_based() {
    let tokens = tokenize("x = 1\ny = 2\n").unwrap();
    assert_eq!(tokens[0].location.line, 1);
    assert_eq!(tokens[0].location.column, 1);
    let y = tokens
        .iter()
        .find(|t| t.kind == TokenKind::Identifier("y".into()))
        .unwrap();
    assert_eq!(y.location.line, 2);
    assert_eq!(y.location.column, 1);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Re-tokenizing after stripping trailing whitespace yields the same
        // stream modulo locations.
        #[test]
        fn trailing_whitespace_is_insignificant(
            lines in proptest::collection::vec("[a-z]{1,5} = [0-9]{1,3}", 1..6),
            indent in 0usize..2,
        ) {
            let pad = " ".repeat(indent * 2);
            let mut source = String::from("spell t\n");
            for line in &lines {
                source.push_str("  ");
                source.push_str(&pad);
                source.push_str(line);
                source.push('\n');
            }
            let with_trailing: String = source
                .lines()
                .map(|l| format!("{l}   \n"))
                .collect();
            // Trailing spaces on content lines do not change the stream.
            let a = tokenize(&source).unwrap().into_iter().map(|t| t.kind).collect::<Vec<_>>();
            let b = tokenize(&with_trailing).unwrap().into_iter().map(|t| t.kind).collect::<Vec<_>>();
            prop_assert_eq!(a, b);
        }
    }
}
