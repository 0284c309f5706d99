//! Unit tests for execution-plan parsing and validation.
//!
//! Covers:
//! - a well-formed plan parses with defaults applied
//! - the branch-name fallback convention
//! - empty plans, duplicate ids, forward/dangling dependencies, and
//!   self-dependencies are rejected

use agent_conductor::models::plan::ExecutionPlan;

/// A two-phase plan with one parallel group.
const VALID_PLAN: &str = r#"{
    "phases": [
        {
            "name": "foundation",
            "items": [
                {"id": "feat-1", "title": "Schema", "prompt": "Design the schema"}
            ]
        },
        {
            "name": "features",
            "parallel": true,
            "items": [
                {
                    "id": "feat-2",
                    "title": "API",
                    "branch": "api/endpoints",
                    "dependsOn": ["feat-1"],
                    "prompt": "Build the API"
                },
                {
                    "id": "feat-3",
                    "title": "UI",
                    "dependsOn": ["feat-1"],
                    "prompt": "Build the UI"
                }
            ]
        }
    ]
}"#;

/// A well-formed plan parses, counts its items, and applies defaults.
#[test]
fn valid_plan_parses_with_defaults() {
    let plan = ExecutionPlan::from_json_str(VALID_PLAN).expect("valid plan must parse");

    assert_eq!(plan.phases.len(), 2);
    assert_eq!(plan.total_items(), 3);
    assert!(!plan.phases[0].parallel, "parallel must default to false");
    assert!(plan.phases[1].parallel);

    let first = &plan.phases[0].items[0];
    assert!(first.depends_on.is_empty(), "dependsOn must default to empty");
}

/// An explicit branch is used as-is; without one, `feature/<id>` applies.
#[test]
fn branch_name_falls_back_to_the_id_convention() {
    let plan = ExecutionPlan::from_json_str(VALID_PLAN).expect("valid plan must parse");
    let items: Vec<_> = plan.items().collect();

    assert_eq!(items[0].branch_name(), "feature/feat-1");
    assert_eq!(items[1].branch_name(), "api/endpoints");
    assert_eq!(items[2].branch_name(), "feature/feat-3");
}

/// A plan with no items at all is rejected.
#[test]
fn empty_plan_is_rejected() {
    let err = ExecutionPlan::from_json_str(r#"{"phases": []}"#)
        .expect_err("empty plan must be rejected");
    assert_eq!(err.code(), "CONFIG_INVALID");
    assert!(err.to_string().contains("no work items"));
}

/// Duplicate item ids across phases are rejected.
#[test]
fn duplicate_item_ids_are_rejected() {
    let raw = r#"{
        "phases": [
            {"name": "a", "items": [{"id": "feat-1", "title": "A", "prompt": "a"}]},
            {"name": "b", "items": [{"id": "feat-1", "title": "B", "prompt": "b"}]}
        ]
    }"#;

    let err = ExecutionPlan::from_json_str(raw).expect_err("duplicate ids must be rejected");
    assert!(err.to_string().contains("duplicate work item id `feat-1`"));
}

/// A dependency that only appears later in the plan is unsatisfiable.
#[test]
fn forward_dependencies_are_rejected() {
    let raw = r#"{
        "phases": [
            {"name": "a", "items": [
                {"id": "feat-1", "title": "A", "dependsOn": ["feat-2"], "prompt": "a"},
                {"id": "feat-2", "title": "B", "prompt": "b"}
            ]}
        ]
    }"#;

    let err = ExecutionPlan::from_json_str(raw).expect_err("forward deps must be rejected");
    assert!(
        err.to_string().contains("does not appear earlier"),
        "unexpected message: {err}"
    );
}

/// A dependency naming no item anywhere in the plan is rejected.
#[test]
fn dangling_dependencies_are_rejected() {
    let raw = r#"{
        "phases": [
            {"name": "a", "items": [
                {"id": "feat-1", "title": "A", "dependsOn": ["ghost"], "prompt": "a"}
            ]}
        ]
    }"#;

    let err = ExecutionPlan::from_json_str(raw).expect_err("dangling deps must be rejected");
    assert!(err.to_string().contains("`ghost`"));
}

/// An item depending on itself is rejected.
#[test]
fn self_dependencies_are_rejected() {
    let raw = r#"{
        "phases": [
            {"name": "a", "items": [
                {"id": "feat-1", "title": "A", "dependsOn": ["feat-1"], "prompt": "a"}
            ]}
        ]
    }"#;

    let err = ExecutionPlan::from_json_str(raw).expect_err("self-deps must be rejected");
    assert!(err.to_string().contains("depends on itself"));
}

/// JSON that does not match the plan schema is a config error naming the
/// plan key.
#[test]
fn schema_mismatch_is_a_config_error() {
    let err =
        ExecutionPlan::from_json_str(r#"{"phases": "nope"}"#).expect_err("bad schema must fail");
    assert_eq!(err.code(), "CONFIG_INVALID");
    assert!(err.to_string().contains("invalid execution plan"));
}
