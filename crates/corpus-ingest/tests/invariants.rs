//! Property tests over stage ordering, rollback and failure policy

mod common;

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use tokio::runtime::Runtime;
use uuid::Uuid;

use common::{context, Faults, Harness};
use corpus_ingest::pipeline::{FailurePolicy, STAGE_ORDER};
use corpus_ingest::types::{Caller, Scope};
use corpus_ingest::{Error, IngestOrchestrator, PipelineContext, Result, Stage, StageResult};

/// How a scripted stage behaves
#[derive(Debug, Clone, Copy)]
enum Outcome {
    Succeed,
    ReturnFailure,
    ReturnErr,
    Panic,
}

fn outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        6 => Just(Outcome::Succeed),
        1 => Just(Outcome::ReturnFailure),
        1 => Just(Outcome::ReturnErr),
        1 => Just(Outcome::Panic),
    ]
}

struct Scripted {
    name: &'static str,
    policy: FailurePolicy,
    outcome: Outcome,
    rollback_fails: bool,
    rollbacks: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Stage for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    fn policy(&self) -> FailurePolicy {
        self.policy
    }

    async fn execute(&self, _ctx: &mut PipelineContext) -> Result<StageResult> {
        match self.outcome {
            Outcome::Succeed => Ok(StageResult::success(self.name, "ok")),
            Outcome::ReturnFailure => Ok(StageResult::failure(self.name, "scripted failure")),
            Outcome::ReturnErr => Err(Error::internal("scripted error")),
            Outcome::Panic => panic!("scripted panic"),
        }
    }

    async fn rollback(&self, _ctx: &PipelineContext) -> Result<()> {
        self.rollbacks.lock().push(self.name.to_string());
        if self.rollback_fails {
            return Err(Error::internal("scripted rollback failure"));
        }
        Ok(())
    }
}

fn non_blocking(name: &str) -> bool {
    name == "storage" || name == "consume"
}

fn scripted_pipeline(
    outcomes: &[Outcome],
    rollback_fails: &[bool],
) -> (IngestOrchestrator, Arc<Mutex<Vec<String>>>) {
    let rollbacks = Arc::new(Mutex::new(Vec::new()));
    let mut builder = IngestOrchestrator::builder("scripted");
    for (i, &name) in STAGE_ORDER.iter().enumerate() {
        builder = builder.add_stage(Scripted {
            name,
            policy: if non_blocking(name) {
                FailurePolicy::NonBlocking
            } else {
                FailurePolicy::Critical
            },
            outcome: outcomes[i],
            rollback_fails: rollback_fails[i],
            rollbacks: rollbacks.clone(),
        });
    }
    (builder.build(), rollbacks)
}

fn fresh_context() -> PipelineContext {
    PipelineContext::new(
        b"bytes".to_vec(),
        "doc.txt",
        Uuid::new_v4(),
        Scope::organization("org-A"),
        Caller::new("user-1", None),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_completed_stages_form_a_prefix_and_roll_back_in_reverse(
        outcomes in proptest::collection::vec(outcome(), 7),
        rollback_fails in proptest::collection::vec(any::<bool>(), 7),
    ) {
        let rt = Runtime::new().unwrap();
        let (orchestrator, rollbacks) = scripted_pipeline(&outcomes, &rollback_fails);
        let mut ctx = fresh_context();

        let result = rt.block_on(orchestrator.process(&mut ctx));

        let completed = ctx.completed_stages().to_vec();
        prop_assert!(completed.len() <= STAGE_ORDER.len());
        for (done, expected) in completed.iter().zip(STAGE_ORDER.iter()) {
            prop_assert_eq!(done.as_str(), *expected);
        }

        let first_critical_failure = STAGE_ORDER
            .iter()
            .zip(outcomes.iter())
            .position(|(name, o)| !non_blocking(name) && !matches!(o, Outcome::Succeed));

        match first_critical_failure {
            Some(k) => {
                prop_assert!(!result.success);
                prop_assert_eq!(result.failed_stage.as_deref(), Some(STAGE_ORDER[k]));
                prop_assert_eq!(completed.len(), k);

                // Every completed stage rolled back once, newest first,
                // even when earlier rollbacks failed
                let expected: Vec<String> =
                    STAGE_ORDER[..k].iter().rev().map(|s| s.to_string()).collect();
                prop_assert_eq!(rollbacks.lock().clone(), expected.clone());
                prop_assert_eq!(ctx.rolled_back_stages().to_vec(), expected);
                let failed_rollbacks = rollback_fails[..k].iter().filter(|f| **f).count();
                prop_assert_eq!(ctx.rollback_failures().len(), failed_rollbacks);
            }
            None => {
                prop_assert!(result.success);
                prop_assert_eq!(completed.len(), STAGE_ORDER.len());
                prop_assert!(rollbacks.lock().is_empty());
            }
        }

        if let Some(stage) = &result.failed_stage {
            prop_assert!(!non_blocking(stage));
        }
    }

    #[test]
    fn prop_successful_runs_embed_every_chunk(
        sentences in proptest::collection::vec("[A-Z][a-z]{3,12}( [a-z]{2,10}){2,12}\\.", 1..20),
    ) {
        let rt = Runtime::new().unwrap();
        let harness = Harness::new(Faults::default());
        let text = sentences.join(" ");
        let mut ctx = context(text.into_bytes(), "generated.txt");

        let result = rt.block_on(harness.orchestrator.process(&mut ctx));

        if result.success {
            let chunks = ctx.chunks().map_or(0, |c| c.len());
            prop_assert!(chunks > 0);
            prop_assert_eq!(result.chunks_created, chunks);
            prop_assert_eq!(ctx.embeddings().map_or(0, |e| e.len()), chunks);
            prop_assert_eq!(harness.indexed(&ctx), chunks);
        } else {
            // Generated text only fails when it is too short to chunk
            prop_assert_eq!(result.failed_stage.as_deref(), Some("chunking"));
        }
    }

    #[test]
    fn prop_embedding_failures_never_touch_the_index(
        message in prop_oneof![
            Just("HTTP 401 Unauthorized"),
            Just("HTTP 429 Too Many Requests"),
            Just("request timed out"),
            Just("connection refused"),
        ],
    ) {
        let rt = Runtime::new().unwrap();
        let harness = Harness::new(Faults {
            embed_error: Some(message.to_string()),
            ..Faults::default()
        });
        let mut ctx = context(common::three_page_pdf(), "report.pdf");

        let result = rt.block_on(harness.orchestrator.process(&mut ctx));

        prop_assert!(!result.success);
        prop_assert_eq!(result.failed_stage.as_deref(), Some("embedding"));
        prop_assert_eq!(harness.journal.count("index.insert"), 0);
        prop_assert_eq!(harness.journal.count("store.put_document"), 0);
        prop_assert_eq!(harness.journal.count("meter.consume"), 0);
    }
}
