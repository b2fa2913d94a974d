// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::expr::BinaryOp;

#[test]
fn step_serde_tags_by_kind() {
    let step = Step::Compute {
        id: "compute_1".into(),
        assignments: vec![Assignment {
            variable: "x".into(),
            expression: Expression::literal(42.0),
        }],
        depends_on: vec![],
    };
    let json = serde_json::to_value(&step).unwrap();
    assert_eq!(json["kind"], "compute");
    assert_eq!(json["id"], "compute_1");
    assert_eq!(json["assignments"][0]["variable"], "x");

    let back: Step = serde_json::from_value(json).unwrap();
    assert_eq!(back, step);
}

#[test]
fn amount_max_sentinel_round_trips() {
    let action = ActionKind::Withdraw {
        venue: "aave".into(),
        asset: "USDC".into(),
        amount: Amount::Max,
    };
    let json = serde_json::to_value(&action).unwrap();
    assert_eq!(json["amount"], "max");
    let back: ActionKind = serde_json::from_value(json).unwrap();
    assert_eq!(back, action);
}

#[test]
fn amount_expression_round_trips() {
    let amount = Amount::Expr(Expression::Binary {
        op: BinaryOp::Mul,
        left: Box::new(Expression::identifier("balance")),
        right: Box::new(Expression::literal(0.5)),
    });
    let json = serde_json::to_value(&amount).unwrap();
    assert_eq!(json["kind"], "binary");
    let back: Amount = serde_json::from_value(json).unwrap();
    assert_eq!(back, amount);
}

#[test]
fn child_step_ids_enumerates_all_containers() {
    let step = Step::Try {
        id: "try_1".into(),
        try_steps: vec!["a".into(), "b".into()],
        catch_blocks: vec![CatchBlock {
            error_type: "*".into(),
            action: Some(CatchAction::Skip),
            steps: Some(vec!["c".into()]),
            retry: None,
        }],
        finally_steps: Some(vec!["d".into()]),
        depends_on: vec![],
    };
    assert_eq!(step.child_step_ids(), vec!["a", "b", "c", "d"]);

    let parallel = Step::Parallel {
        id: "parallel_1".into(),
        branches: vec![
            Branch {
                name: "left".into(),
                steps: vec!["x".into()],
            },
            Branch {
                name: "right".into(),
                steps: vec!["y".into(), "z".into()],
            },
        ],
        join: JoinPolicy::All,
        on_fail: ParallelFailMode::Abort,
        depends_on: vec![],
    };
    assert_eq!(parallel.child_step_ids(), vec!["x", "y", "z"]);

    let pipeline = Step::Pipeline {
        id: "pipeline_1".into(),
        source: Expression::identifier("items"),
        stages: vec![
            PipelineStage::Map { step: "m".into() },
            PipelineStage::Take { count: 3 },
            PipelineStage::Filter { step: "f".into() },
        ],
        output_binding: None,
        depends_on: vec![],
    };
    assert_eq!(pipeline.child_step_ids(), vec!["m", "f"]);
}

#[test]
fn retry_spec_defaults() {
    let spec: RetrySpec = serde_json::from_str("{}").unwrap();
    assert_eq!(spec.max_attempts, 3);
    assert_eq!(spec.backoff, BackoffKind::None);
    assert_eq!(spec.backoff_base, 1.0);
    assert_eq!(spec.max_backoff, 60.0);
}

#[test]
fn failure_policy_defaults_to_revert() {
    assert_eq!(FailurePolicy::default(), FailurePolicy::Revert);
}

#[test]
fn source_map_omitted_when_empty() {
    let ir = SpellIR {
        id: SpellId::new("s1"),
        version: "1.0.0".into(),
        meta: SpellMeta {
            name: "t".into(),
            description: None,
            created: "2026-01-01T00:00:00Z".into(),
            hash: "deadbeef".into(),
        },
        aliases: vec![],
        assets: vec![],
        skills: vec![],
        advisors: vec![],
        params: vec![],
        state: StateSchema::default(),
        steps: vec![],
        guards: vec![],
        triggers: vec![Trigger::Manual],
        source_map: BTreeMap::new(),
    };
    let json = serde_json::to_value(&ir).unwrap();
    assert!(json.get("source_map").is_none());
    assert_eq!(json["triggers"][0]["type"], "manual");
}

#[test]
fn trigger_describe() {
    assert_eq!(Trigger::Manual.describe(), "manual");
    assert_eq!(
        Trigger::Schedule {
            cron: HOURLY_CRON.into()
        }
        .describe(),
        "schedule(0 * * * *)"
    );
    assert_eq!(
        Trigger::Event {
            event: "Deposit".into(),
            filter: None
        }
        .describe(),
        "event(Deposit)"
    );
}
