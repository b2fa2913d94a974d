// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::tokenizer::tokenize;

fn parse(source: &str) -> Spell {
    parse_spell(tokenize(source).unwrap()).unwrap()
}

fn parse_err(source: &str) -> ParseError {
    parse_spell(tokenize(source).unwrap()).unwrap_err()
}

fn first_stmt(source: &str) -> Stmt {
    let spell = parse(source);
    spell.triggers[0].body[0].clone()
}

#[test]
fn minimal_spell() {
    let spell = parse("spell t\n  version: \"1.0.0\"\n  on manual:\n    x = 42\n");
    assert_eq!(spell.name, "t");
    assert_eq!(spell.sections.len(), 1);
    assert_eq!(spell.sections[0].kind, SectionKind::Version);
    assert_eq!(spell.triggers.len(), 1);
    assert_eq!(spell.triggers[0].kind, TriggerKind::Manual);
    match &spell.triggers[0].body[0].kind {
        StmtKind::Assign { target, value } => {
            assert_eq!(target, "x");
            assert_eq!(value.kind, ExprKind::Number(42.0));
        }
        other => panic!("expected assignment, got {other:?}"),
    }
}

#[test]
fn sections_nest() {
    let spell = parse(
        "spell t\n\
         \x20 assets:\n\
         \x20   USDC:\n\
         \x20     chain: \"base\"\n\
         \x20     address: 0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913\n\
         \x20     decimals: 6\n\
         \x20 on manual:\n\
         \x20   pass\n",
    );
    let assets = &spell.sections[0];
    assert_eq!(assets.kind, SectionKind::Assets);
    assert_eq!(assets.entries[0].key, "USDC");
    match &assets.entries[0].value {
        SectionValue::Map(fields) => {
            assert_eq!(fields.len(), 3);
            assert_eq!(fields[2].key, "decimals");
        }
        other => panic!("expected map, got {other:?}"),
    }
}

#[test]
fn trigger_kinds() {
    let spell = parse(
        "spell t\n\
         \x20 on hourly:\n\
         \x20   pass\n\
         \x20 on condition price > 100 every 300:\n\
         \x20   pass\n\
         \x20 on event Deposit where amount > 0:\n\
         \x20   pass\n\
         \x20 on \"0 */4 * * *\":\n\
         \x20   pass\n",
    );
    assert_eq!(spell.triggers.len(), 4);
    assert_eq!(spell.triggers[0].kind, TriggerKind::Hourly);
    match &spell.triggers[1].kind {
        TriggerKind::Condition { poll, .. } => assert_eq!(*poll, Some(300.0)),
        other => panic!("expected condition, got {other:?}"),
    }
    match &spell.triggers[2].kind {
        TriggerKind::Event { name, filter } => {
            assert_eq!(name, "Deposit");
            assert!(filter.is_some());
        }
        other => panic!("expected event, got {other:?}"),
    }
    assert_eq!(
        spell.triggers[3].kind,
        TriggerKind::Cron("0 */4 * * *".into())
    );
}

#[test]
fn if_elif_else() {
    let stmt = first_stmt(
        "spell t\n\
         \x20 on manual:\n\
         \x20   if x > 1:\n\
         \x20     a = 1\n\
         \x20   elif x > 0:\n\
         \x20     b = 2\n\
         \x20   else:\n\
         \x20     c = 3\n",
    );
    match stmt.kind {
        StmtKind::If {
            then_body,
            elifs,
            else_body,
            ..
        } => {
            assert_eq!(then_body.len(), 1);
            assert_eq!(elifs.len(), 1);
            assert_eq!(else_body.len(), 1);
        }
        other => panic!("expected if, got {other:?}"),
    }
}

#[test]
fn method_call_with_trailers() {
    let stmt = first_stmt(
        "spell t\n\
         \x20 on manual:\n\
         \x20   result = venue.swap(USDC, ETH, 1000) using swapper with slippage=50, min_out=990\n",
    );
    match stmt.kind {
        StmtKind::MethodCall {
            object,
            method,
            args,
            using,
            constraints,
            output_binding,
            ..
        } => {
            assert_eq!(object.kind, ExprKind::Identifier("venue".into()));
            assert_eq!(method, "swap");
            assert_eq!(args.len(), 3);
            assert_eq!(using.as_deref(), Some("swapper"));
            assert_eq!(constraints.len(), 2);
            assert_eq!(constraints[0].0, "slippage");
            assert_eq!(output_binding.as_deref(), Some("result"));
        }
        other => panic!("expected method call, got {other:?}"),
    }
}

#[test]
fn venue_ref_method_call() {
    let stmt = first_stmt("spell t\n  on manual:\n    @aave.deposit(USDC, 100)\n");
    match stmt.kind {
        StmtKind::MethodCall { object, method, .. } => {
            assert_eq!(object.kind, ExprKind::VenueRef("aave".into()));
            assert_eq!(method, "deposit");
        }
        other => panic!("expected method call, got {other:?}"),
    }
}

#[test]
fn plain_assignment_of_property_stays_assignment() {
    let stmt = first_stmt("spell t\n  on manual:\n    x = obj.field\n");
    assert!(matches!(stmt.kind, StmtKind::Assign { .. }));
}

#[test]
fn try_catch_finally() {
    let stmt = first_stmt(
        "spell t\n\
         \x20 on manual:\n\
         \x20   try:\n\
         \x20     x = 1\n\
         \x20   catch deadline_exceeded:\n\
         \x20     retry 3 backoff exponential base 2 max 30\n\
         \x20   catch *:\n\
         \x20     skip\n\
         \x20   finally:\n\
         \x20     y = 2\n",
    );
    match stmt.kind {
        StmtKind::Try {
            body,
            catches,
            finally_body,
        } => {
            assert_eq!(body.len(), 1);
            assert_eq!(catches.len(), 2);
            assert_eq!(catches[0].error_type, "deadline_exceeded");
            match &catches[0].body {
                CatchBody::Retry {
                    attempts,
                    backoff,
                    base,
                    max,
                } => {
                    assert_eq!(*attempts, Some(3));
                    assert_eq!(backoff.as_deref(), Some("exponential"));
                    assert_eq!(*base, Some(2.0));
                    assert_eq!(*max, Some(30.0));
                }
                other => panic!("expected retry, got {other:?}"),
            }
            assert_eq!(catches[1].error_type, "*");
            assert_eq!(catches[1].body, CatchBody::Skip);
            assert_eq!(finally_body.map(|b| b.len()), Some(1));
        }
        other => panic!("expected try, got {other:?}"),
    }
}

#[test]
fn try_requires_a_catch() {
    let err = parse_err(
        "spell t\n\
         \x20 on manual:\n\
         \x20   try:\n\
         \x20     x = 1\n\
         \x20   y = 2\n",
    );
    assert!(err.expected.contains("catch"));
}

#[test]
fn atomic_modes() {
    let stmt = first_stmt("spell t\n  on manual:\n    atomic skip:\n      x = 1\n");
    match stmt.kind {
        StmtKind::Atomic { mode, body } => {
            assert_eq!(mode, AtomicMode::Skip);
            assert_eq!(body.len(), 1);
        }
        other => panic!("expected atomic, got {other:?}"),
    }

    let stmt = first_stmt("spell t\n  on manual:\n    atomic:\n      x = 1\n");
    assert!(matches!(
        stmt.kind,
        StmtKind::Atomic {
            mode: AtomicMode::Revert,
            ..
        }
    ));
}

#[test]
fn parallel_with_header_options() {
    let stmt = first_stmt(
        "spell t\n\
         \x20 on manual:\n\
         \x20   parallel join=best metric=result.apy order=desc on_fail=continue:\n\
         \x20     aave:\n\
         \x20       x = 1\n\
         \x20     moonwell:\n\
         \x20       y = 2\n",
    );
    match stmt.kind {
        StmtKind::Parallel {
            branches,
            join,
            metric,
            order,
            on_fail,
            ..
        } => {
            assert_eq!(branches.len(), 2);
            assert_eq!(branches[0].0, "aave");
            assert_eq!(join.as_deref(), Some("best"));
            assert!(metric.is_some());
            assert_eq!(order.as_deref(), Some("desc"));
            assert_eq!(on_fail.as_deref(), Some("continue"));
        }
        other => panic!("expected parallel, got {other:?}"),
    }
}

#[test]
fn pipeline_stages() {
    let stmt = first_stmt(
        "spell t\n\
         \x20 on manual:\n\
         \x20   best = positions | where: item.apy > 0 | sort by item.apy order desc | take 3\n",
    );
    match stmt.kind {
        StmtKind::Pipeline {
            stages,
            output_binding,
            ..
        } => {
            assert_eq!(output_binding.as_deref(), Some("best"));
            assert_eq!(stages.len(), 3);
            assert_eq!(stages[0].op, "where");
            assert_eq!(stages[0].body.len(), 1);
            assert_eq!(stages[1].op, "sort");
            assert!(stages[1].by.is_some());
            assert_eq!(stages[1].order.as_deref(), Some("desc"));
            assert_eq!(stages[2].op, "take");
        }
        other => panic!("expected pipeline, got {other:?}"),
    }
}

#[test]
fn pipeline_reduce_with_initial() {
    let stmt = first_stmt("spell t\n  on manual:\n    total = xs | reduce(0): acc + item\n");
    match stmt.kind {
        StmtKind::Pipeline { stages, .. } => {
            assert_eq!(stages[0].op, "reduce");
            assert!(stages[0].arg.is_some());
        }
        other => panic!("expected pipeline, got {other:?}"),
    }
}

#[test]
fn advise_assignment_requires_all_keys() {
    let spell_text = "spell t\n\
        \x20 on manual:\n\
        \x20   decision = advise risk: \"rotate?\"\n\
        \x20     output: {action: \"string\"}\n\
        \x20     timeout: 30s\n\
        \x20     fallback: {action: \"hold\"}\n";
    let stmt = first_stmt(spell_text);
    match stmt.kind {
        StmtKind::Advise { binding, spec } => {
            assert_eq!(binding.as_deref(), Some("decision"));
            assert_eq!(spec.advisor, "risk");
            assert_eq!(spec.prompt, "rotate?");
            assert_eq!(spec.timeout, 30.0);
        }
        other => panic!("expected advise, got {other:?}"),
    }

    let missing = "spell t\n\
        \x20 on manual:\n\
        \x20   decision = advise risk: \"rotate?\"\n\
        \x20     output: {action: \"string\"}\n\
        \x20     timeout: 30s\n";
    let err = parse_spell(tokenize(missing).unwrap()).unwrap_err();
    assert!(err.expected.contains("fallback"));
}

#[test]
fn do_emit_halt_wait() {
    let spell = parse(
        "spell t\n\
         \x20 block greet(name):\n\
         \x20   x = name\n\
         \x20 on manual:\n\
         \x20   do greet(1)\n\
         \x20   emit rotated(total=x, venue=\"aave\")\n\
         \x20   wait 5m\n\
         \x20   halt \"done\"\n",
    );
    assert_eq!(spell.blocks.len(), 1);
    assert_eq!(spell.blocks[0].params, vec!["name"]);
    let body = &spell.triggers[0].body;
    assert!(matches!(&body[0].kind, StmtKind::Do { name, args } if name == "greet" && args.len() == 1));
    match &body[1].kind {
        StmtKind::Emit { event, data } => {
            assert_eq!(event, "rotated");
            assert_eq!(data.len(), 2);
        }
        other => panic!("expected emit, got {other:?}"),
    }
    assert!(
        matches!(&body[2].kind, StmtKind::Wait { duration } if duration.kind == ExprKind::Number(300.0))
    );
    assert!(matches!(&body[3].kind, StmtKind::Halt { reason: Some(_) }));
}

#[test]
fn until_with_max() {
    let stmt = first_stmt("spell t\n  on manual:\n    until done max 5:\n      x = 1\n");
    match stmt.kind {
        StmtKind::Until { max, body, .. } => {
            assert_eq!(max, Some(5));
            assert_eq!(body.len(), 1);
        }
        other => panic!("expected until, got {other:?}"),
    }
}

#[test]
fn repeat_and_for() {
    let spell = parse(
        "spell t\n\
         \x20 on manual:\n\
         \x20   repeat 3:\n\
         \x20     x = 1\n\
         \x20   for pos in positions:\n\
         \x20     y = pos\n",
    );
    let body = &spell.triggers[0].body;
    assert!(matches!(&body[0].kind, StmtKind::Repeat { .. }));
    match &body[1].kind {
        StmtKind::For { variable, .. } => assert_eq!(variable, "pos"),
        other => panic!("expected for, got {other:?}"),
    }
}

#[test]
fn imports() {
    let spell = parse(
        "spell t\n\
         \x20 import \"lib/util.spell\" as util\n\
         \x20 import \"lib/other.spell\"\n\
         \x20 on manual:\n\
         \x20   pass\n",
    );
    assert_eq!(spell.imports.len(), 2);
    assert_eq!(spell.imports[0].alias.as_deref(), Some("util"));
    assert_eq!(spell.imports[1].alias, None);
}

#[test]
fn keywords_usable_in_expression_position() {
    let stmt = first_stmt("spell t\n  on manual:\n    x = max(params.amount, limits.cap)\n");
    match stmt.kind {
        StmtKind::Assign { value, .. } => match value.kind {
            ExprKind::Call { callee, args, .. } => {
                assert_eq!(callee.kind, ExprKind::Identifier("max".into()));
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected call, got {other:?}"),
        },
        other => panic!("expected assignment, got {other:?}"),
    }
}

#[test]
fn operator_precedence() {
    let stmt = first_stmt("spell t\n  on manual:\n    x = 1 + 2 * 3 > 4 and not y\n");
    // Parsed as: ((1 + (2 * 3)) > 4) and (not y)
    match stmt.kind {
        StmtKind::Assign { value, .. } => match value.kind {
            ExprKind::Binary { op, left, right } => {
                assert_eq!(op, "and");
                assert!(matches!(left.kind, ExprKind::Binary { ref op, .. } if op == ">"));
                assert!(matches!(right.kind, ExprKind::Unary { ref op, .. } if op == "not"));
            }
            other => panic!("expected binary, got {other:?}"),
        },
        other => panic!("expected assignment, got {other:?}"),
    }
}

#[test]
fn block_refused_without_indent() {
    let err = parse_err("spell t\n  on manual:\n    if x > 1:\n    y = 2\n");
    assert!(err.expected.contains("indented block"));
}

#[test]
fn error_carries_location_and_found() {
    let err = parse_err("spell t\n  on manual:\n    x = + 2\n");
    assert_eq!(err.location.line, 3);
    assert!(err.found.contains('+'));
}

#[test]
fn spans_cover_statements() {
    let spell = parse("spell t\n  on manual:\n    x = 42\n");
    let stmt = &spell.triggers[0].body[0];
    assert_eq!(stmt.span.start.line, 3);
    assert_eq!(stmt.span.start.column, 5);
}

#[test]
fn guard_section_with_via() {
    let spell = parse(
        "spell t\n\
         \x20 guards:\n\
         \x20   sane: **is the market stable** via risk\n\
         \x20   positive: params.amount > 0\n\
         \x20 on manual:\n\
         \x20   pass\n",
    );
    let guards = &spell.sections[0];
    match &guards.entries[0].value {
        SectionValue::AdvisoryCheck { prompt, advisor } => {
            assert_eq!(prompt, "is the market stable");
            assert_eq!(advisor.as_deref(), Some("risk"));
        }
        other => panic!("expected advisory check, got {other:?}"),
    }
    assert!(matches!(&guards.entries[1].value, SectionValue::Expr(_)));
}
