// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::context::ExecutionContext;
use grim_adapters::{FakeAdvisor, FakeVenueReader, NullVenueReader};
use grim_core::{
    Clock, ExecutionMode, FakeClock, Ledger, RunId, SpellId, SpellIR, SpellMeta, StateSchema,
    Value,
};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;

fn empty_spell() -> SpellIR {
    SpellIR {
        id: SpellId::new("s"),
        version: "1.0.0".into(),
        meta: SpellMeta {
            name: "s".into(),
            description: None,
            created: "2026-01-01T00:00:00Z".into(),
            hash: "00000000".into(),
        },
        aliases: vec![],
        assets: vec![],
        skills: vec![],
        advisors: vec![],
        params: vec![],
        state: StateSchema::default(),
        steps: vec![],
        guards: vec![],
        triggers: vec![],
        source_map: Default::default(),
    }
}

fn test_ctx(params: &[(&str, Value)]) -> ExecutionContext {
    let clock: Arc<dyn Clock> = Arc::new(FakeClock::at(1_700_000_000_000));
    let spell = empty_spell();
    let params: IndexMap<String, Value> = params
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    ExecutionContext::new(
        RunId::new("run-1"),
        0,
        ExecutionMode::Simulate,
        &spell,
        params,
        IndexMap::new(),
        Ledger::new(SpellId::new("s"), RunId::new("run-1"), clock),
        None,
    )
}

async fn eval_str(text: &str, ctx: &ExecutionContext) -> Result<Value, ExpressionError> {
    let expr = grim_lang::parse_expression(text).unwrap();
    let venues = HashSet::new();
    let clock = FakeClock::at(1_700_000_000_000);
    let env = EvalEnv {
        ctx,
        venues: &venues,
        reader: &NullVenueReader,
        advisor: None,
        default_advisor: "default",
        clock: &clock,
    };
    eval(&expr, &env).await
}

#[tokio::test]
async fn arithmetic_and_precedence() {
    let ctx = test_ctx(&[]);
    assert_eq!(
        eval_str("1 + 2 * 3", &ctx).await.unwrap(),
        Value::Number(7.0)
    );
    assert_eq!(
        eval_str("(10 - 4) / 3", &ctx).await.unwrap(),
        Value::Number(2.0)
    );
    assert_eq!(
        eval_str("7 % 4", &ctx).await.unwrap(),
        Value::Number(3.0)
    );
}

#[tokio::test]
async fn division_by_zero_is_an_error() {
    let ctx = test_ctx(&[]);
    assert!(eval_str("1 / 0", &ctx).await.is_err());
}

#[tokio::test]
async fn boolean_short_circuit() {
    let ctx = test_ctx(&[]);
    // RHS would error if evaluated.
    assert_eq!(
        eval_str("false and missing_var", &ctx).await.unwrap(),
        Value::Bool(false)
    );
    assert_eq!(
        eval_str("true or missing_var", &ctx).await.unwrap(),
        Value::Bool(true)
    );
}

#[tokio::test]
async fn equality_is_deep() {
    let ctx = test_ctx(&[]);
    assert_eq!(
        eval_str("[1, 2] == [1, 2]", &ctx).await.unwrap(),
        Value::Bool(true)
    );
    assert_eq!(
        eval_str("{a: 1} == {a: 2}", &ctx).await.unwrap(),
        Value::Bool(false)
    );
}

#[tokio::test]
async fn params_and_state_objects_resolve() {
    let ctx = test_ctx(&[("amount", Value::Number(100.0))]);
    assert_eq!(
        eval_str("params.amount", &ctx).await.unwrap(),
        Value::Number(100.0)
    );
    // Bare identifiers fall back to params too.
    assert_eq!(
        eval_str("amount", &ctx).await.unwrap(),
        Value::Number(100.0)
    );
    assert!(eval_str("missing", &ctx).await.is_err());
}

#[tokio::test]
async fn variables_shadow_params() {
    let ctx = test_ctx(&[("amount", Value::Number(1.0))]);
    ctx.bind_variable("amount", Value::Number(2.0));
    assert_eq!(
        eval_str("amount", &ctx).await.unwrap(),
        Value::Number(2.0)
    );
}

#[tokio::test]
async fn builtins() {
    let ctx = test_ctx(&[]);
    assert_eq!(
        eval_str("min(3, 1, 2)", &ctx).await.unwrap(),
        Value::Number(1.0)
    );
    assert_eq!(
        eval_str("max([3, 1, 2])", &ctx).await.unwrap(),
        Value::Number(3.0)
    );
    assert_eq!(
        eval_str("abs(-4)", &ctx).await.unwrap(),
        Value::Number(4.0)
    );
    assert_eq!(
        eval_str("sum([1, 2, 3])", &ctx).await.unwrap(),
        Value::Number(6.0)
    );
    assert_eq!(
        eval_str("len(\"abc\")", &ctx).await.unwrap(),
        Value::Number(3.0)
    );
    assert_eq!(
        eval_str("any([false, true])", &ctx).await.unwrap(),
        Value::Bool(true)
    );
    assert_eq!(
        eval_str("all([true, false])", &ctx).await.unwrap(),
        Value::Bool(false)
    );
    assert_eq!(
        eval_str("pow(2, 10)", &ctx).await.unwrap(),
        Value::Number(1024.0)
    );
    assert_eq!(
        eval_str("floor(1.9) + ceil(0.1) + round(0.6)", &ctx).await.unwrap(),
        Value::Number(3.0)
    );
    assert_eq!(
        eval_str("now()", &ctx).await.unwrap(),
        Value::Number(1_700_000_000.0)
    );
}

#[tokio::test]
async fn ternary_and_unary() {
    let ctx = test_ctx(&[]);
    assert_eq!(
        eval_str("(1 > 2 ? 10 : 20)", &ctx).await.unwrap(),
        Value::Number(20.0)
    );
    assert_eq!(
        eval_str("not false", &ctx).await.unwrap(),
        Value::Bool(true)
    );
    assert_eq!(eval_str("-(3)", &ctx).await.unwrap(), Value::Number(-3.0));
}

#[tokio::test]
async fn array_and_property_access() {
    let ctx = test_ctx(&[]);
    ctx.bind_variable(
        "position",
        Value::Object(
            [("balance".to_string(), Value::Number(42.0))]
                .into_iter()
                .collect(),
        ),
    );
    ctx.bind_variable(
        "xs",
        Value::Array(vec![Value::Number(7.0), Value::Number(8.0)]),
    );
    assert_eq!(
        eval_str("position.balance", &ctx).await.unwrap(),
        Value::Number(42.0)
    );
    assert_eq!(eval_str("xs[1]", &ctx).await.unwrap(), Value::Number(8.0));
    assert!(eval_str("xs[9]", &ctx).await.is_err());
}

#[tokio::test]
async fn known_properties_on_structured_outputs() {
    let ctx = test_ctx(&[]);
    ctx.bind_variable("result", Value::Number(5.0));
    assert_eq!(
        eval_str("result.success", &ctx).await.unwrap(),
        Value::Bool(true)
    );
    assert_eq!(eval_str("result.error", &ctx).await.unwrap(), Value::Null);
    assert_eq!(
        eval_str("result.value", &ctx).await.unwrap(),
        Value::Number(5.0)
    );
    assert!(eval_str("result.nope", &ctx).await.is_err());
}

#[tokio::test]
async fn string_concat() {
    let ctx = test_ctx(&[]);
    assert_eq!(
        eval_str("\"a\" + \"b\"", &ctx).await.unwrap(),
        Value::String("ab".into())
    );
    assert!(eval_str("\"a\" - 1", &ctx).await.is_err());
}

#[tokio::test]
async fn venue_queries_dispatch_through_the_reader() {
    let ctx = test_ctx(&[]);
    let reader = FakeVenueReader::new();
    reader.answer(
        "aave",
        "get_rates",
        Value::Object(
            [("supply".to_string(), Value::Number(3.2))]
                .into_iter()
                .collect(),
        ),
    );
    let venues: HashSet<String> = ["aave".to_string()].into_iter().collect();
    let clock = FakeClock::new();
    let env = EvalEnv {
        ctx: &ctx,
        venues: &venues,
        reader: &reader,
        advisor: None,
        default_advisor: "default",
        clock: &clock,
    };
    let expr = grim_lang::parse_expression("aave.get_rates(\"USDC\").supply").unwrap();
    assert_eq!(eval(&expr, &env).await.unwrap(), Value::Number(3.2));
    assert_eq!(reader.calls().len(), 1);

    // Unknown venue is an expression error.
    let expr = grim_lang::parse_expression("ghost.get_rates(1)").unwrap();
    assert!(eval(&expr, &env).await.is_err());
}

#[tokio::test]
async fn advisory_expressions_consult_the_advisor() {
    let ctx = test_ctx(&[]);
    let advisor = FakeAdvisor::new();
    advisor.answer("risk", Value::Bool(true));
    let venues = HashSet::new();
    let clock = FakeClock::new();
    let env = EvalEnv {
        ctx: &ctx,
        venues: &venues,
        reader: &NullVenueReader,
        advisor: Some(&advisor),
        default_advisor: "risk",
        clock: &clock,
    };
    let expr = grim_lang::parse_expression("**is it safe**").unwrap();
    assert_eq!(eval(&expr, &env).await.unwrap(), Value::Bool(true));
    assert_eq!(advisor.prompts(), vec![("risk".to_string(), "is it safe".to_string())]);
    assert_eq!(ctx.metrics().advisory_calls, 1);

    // Without a handler the expression errors.
    let env = EvalEnv { advisor: None, ..env };
    assert!(eval(&expr, &env).await.is_err());
}
