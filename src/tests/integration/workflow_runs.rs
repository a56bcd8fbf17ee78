// End-to-end runs: builder graph -> compiled workflow -> engine

use serde_json::json;

use crate::tests::fixtures::TestContext;
use crate::workflows::store::WorkflowStore;
use crate::workflows::{
    compile, DomainEvent, EventSource, ExecutionStatus, GraphInput, WorkflowDefinition,
};

fn graph(value: serde_json::Value) -> GraphInput {
    serde_json::from_value(value).unwrap()
}

fn lead_scoring_graph() -> GraphInput {
    graph(json!({
        "nodes": {
            "1": {
                "name": "trigger",
                "data": {
                    "event": "lead.created",
                    "conditions": [
                        { "field": "lead.source", "operator": "eq", "value": "web" }
                    ]
                },
                "outputs": { "output_1": { "connections": [{ "node": "2" }] } }
            },
            "2": {
                "name": "condition",
                "data": { "field": "lead.score", "operator": "gt", "value": 80 },
                "outputs": {
                    "output_1": { "connections": [{ "node": "3" }] },
                    "output_2": { "connections": [{ "node": "4" }] }
                }
            },
            "3": {
                "name": "create_task",
                "data": { "name": "hot lead follow-up", "title": "Call {{lead.name}} today" },
                "outputs": {}
            },
            "4": {
                "name": "create_task",
                "data": { "name": "nurture", "title": "Nurture {{lead.name}}" },
                "outputs": {}
            }
        }
    }))
}

async fn save_compiled(ctx: &TestContext, graph: &GraphInput) -> WorkflowDefinition {
    let compiled = compile(graph).unwrap();
    let mut workflow = WorkflowDefinition::new("acme", "lead scoring");
    compiled.apply_to(&mut workflow);
    ctx.store.save_workflow(workflow.clone()).await.unwrap();
    workflow
}

fn lead_event(source: &str, score: i64, name: &str) -> DomainEvent {
    DomainEvent::new(
        "lead.created",
        json!({ "lead": { "source": source, "score": score, "name": name } }),
        "acme",
        EventSource::Api,
    )
}

#[tokio::test]
async fn test_graph_run_takes_yes_branch_and_resolves_templates() {
    let ctx = TestContext::new();
    save_compiled(&ctx, &lead_scoring_graph()).await;

    let executions = ctx
        .engine
        .process_event(&lead_event("web", 95, "Ada"))
        .await
        .unwrap();

    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Completed);

    let tasks = ctx.records.tasks.lock().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Call Ada today");
}

#[tokio::test]
async fn test_graph_run_takes_no_branch() {
    let ctx = TestContext::new();
    save_compiled(&ctx, &lead_scoring_graph()).await;

    let executions = ctx
        .engine
        .process_event(&lead_event("web", 40, "Grace"))
        .await
        .unwrap();

    assert_eq!(executions[0].status, ExecutionStatus::Completed);
    let tasks = ctx.records.tasks.lock().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Nurture Grace");
}

#[tokio::test]
async fn test_trigger_conditions_gate_the_whole_run() {
    let ctx = TestContext::new();
    save_compiled(&ctx, &lead_scoring_graph()).await;

    let executions = ctx
        .engine
        .process_event(&lead_event("referral", 95, "Ada"))
        .await
        .unwrap();

    assert_eq!(executions[0].status, ExecutionStatus::Skipped);
    assert!(ctx.records.tasks.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_approval_pipeline_through_compiled_graph() {
    let ctx = TestContext::new();
    let graph = graph(json!({
        "nodes": {
            "1": {
                "name": "trigger",
                "data": { "event": "deal.stage_changed" },
                "outputs": { "output_1": { "connections": [{ "node": "2" }] } }
            },
            "2": {
                "name": "approval",
                "data": { "name": "discount sign-off", "approvers": ["vp@acme.test"] },
                "outputs": { "output_1": { "connections": [{ "node": "3" }] } }
            },
            "3": {
                "name": "send_email",
                "data": {
                    "name": "notify rep",
                    "to": ["rep@acme.test"],
                    "subject": "Discount approved",
                    "body": "Deal {{deal.name}} can proceed"
                },
                "outputs": {}
            }
        }
    }));
    save_compiled(&ctx, &graph).await;

    let event = DomainEvent::new(
        "deal.stage_changed",
        json!({ "deal": { "name": "Acme renewal" } }),
        "acme",
        EventSource::Api,
    );
    let executions = ctx.engine.process_event(&event).await.unwrap();
    let execution = &executions[0];
    assert_eq!(execution.status, ExecutionStatus::WaitingForApproval);
    assert!(ctx.mailer.sent.lock().unwrap().is_empty());

    let approval = ctx
        .store
        .pending_approval(execution.id, execution.current_step.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(approval.approvers, vec!["vp@acme.test".to_string()]);

    let resumed = ctx
        .engine
        .handle_approval_decision(approval.id, true, "vp@acme.test")
        .await
        .unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);

    let sent = ctx.mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].2, "Deal Acme renewal can proceed");
}

#[tokio::test]
async fn test_diamond_graph_runs_shared_action_once() {
    let ctx = TestContext::new();
    let graph = graph(json!({
        "nodes": {
            "1": {
                "name": "trigger",
                "data": { "event": "case.created" },
                "outputs": {
                    "output_1": { "connections": [{ "node": "2" }, { "node": "3" }] }
                }
            },
            "2": {
                "name": "create_task",
                "data": { "name": "left", "title": "left" },
                "outputs": { "output_1": { "connections": [{ "node": "4" }] } }
            },
            "3": {
                "name": "create_task",
                "data": { "name": "right", "title": "right" },
                "outputs": { "output_1": { "connections": [{ "node": "4" }] } }
            },
            "4": {
                "name": "create_task",
                "data": { "name": "merge", "title": "merge" },
                "outputs": {}
            }
        }
    }));
    save_compiled(&ctx, &graph).await;

    let event = DomainEvent::new("case.created", json!({}), "acme", EventSource::Api);
    let executions = ctx.engine.process_event(&event).await.unwrap();
    assert_eq!(executions[0].status, ExecutionStatus::Completed);

    let tasks = ctx.records.tasks.lock().unwrap();
    let merges = tasks.iter().filter(|t| t.title == "merge").count();
    assert_eq!(merges, 1);
    assert_eq!(tasks.len(), 3);
}
