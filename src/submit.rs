use crate::drafts::{DraftStore, DraftStoreKey};
use crate::model::{DraftEntries, DraftKey, Evaluatee, IdRef, Question, SubmittedResponse};
use crate::validate::{validate, ScoreRules, Violation};
use anyhow::Context;
use rusqlite::Connection;
use uuid::Uuid;

/// Flattens a draft into wire records: one per evaluatee and INPUT question,
/// then one per TEXT question attributed to the evaluator.
///
/// Meant to run on a draft that already passed [`validate`]; unreadable
/// numbers become `0`.
pub fn build(
    questions: &[Question],
    evaluatees: &[Evaluatee],
    drafts: &DraftEntries,
    evaluator_id: i64,
    evaluation_id: i64,
) -> Vec<SubmittedResponse> {
    let evaluator = IdRef { id: evaluator_id };
    let evaluation = IdRef { id: evaluation_id };
    let mut out = Vec::new();

    for e in evaluatees {
        for q in questions.iter().filter(|q| q.is_input()) {
            let score = drafts
                .get(&DraftKey::score(e.id, q.id))
                .and_then(|v| v.as_number())
                .unwrap_or(0.0);
            out.push(SubmittedResponse {
                evaluator,
                evaluatee: IdRef { id: e.id },
                question: IdRef { id: q.id },
                evaluation,
                score,
                text_response: None,
            });
        }
    }

    for q in questions.iter().filter(|q| q.is_text()) {
        let text = drafts
            .get(&DraftKey::text(q.id))
            .map(|v| v.as_text().trim().to_string())
            .unwrap_or_default();
        out.push(SubmittedResponse {
            evaluator,
            evaluatee: evaluator,
            question: IdRef { id: q.id },
            evaluation,
            score: 0.0,
            text_response: Some(text),
        });
    }

    out
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("{} answer(s) need attention", .0.len())]
    Invalid(Vec<Violation>),
    #[error("evaluator {evaluator_id} already submitted evaluation {evaluation_id}")]
    AlreadySubmitted { evaluator_id: i64, evaluation_id: i64 },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Destination of a finished form. Receives every record of one form in a
/// single call and either keeps all of them or none.
pub trait ResponseSink {
    fn accept(&mut self, records: &[SubmittedResponse]) -> Result<(), SubmitError>;
}

/// Local ledger of accepted submissions, also the export input.
pub struct SqliteResponseSink<'a> {
    conn: &'a Connection,
    class_id: i64,
    evaluator_name: Option<&'a str>,
}

impl<'a> SqliteResponseSink<'a> {
    pub fn new(conn: &'a Connection, class_id: i64) -> Self {
        Self {
            conn,
            class_id,
            evaluator_name: None,
        }
    }

    /// Recorded in `people` together with the responses, never on its own.
    pub fn with_evaluator_name(mut self, name: Option<&'a str>) -> Self {
        self.evaluator_name = name;
        self
    }
}

impl ResponseSink for SqliteResponseSink<'_> {
    fn accept(&mut self, records: &[SubmittedResponse]) -> Result<(), SubmitError> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        let existing: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM responses WHERE evaluation_id = ? AND evaluator_id = ?",
                (first.evaluation.id, first.evaluator.id),
                |r| r.get(0),
            )
            .context("failed to check earlier submissions")?;
        if existing > 0 {
            return Err(SubmitError::AlreadySubmitted {
                evaluator_id: first.evaluator.id,
                evaluation_id: first.evaluation.id,
            });
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("failed to start transaction")?;
        let submitted_at = chrono::Utc::now().to_rfc3339();
        for r in records {
            tx.execute(
                "INSERT INTO responses(
                    id, evaluation_id, class_id, evaluator_id, evaluatee_id,
                    question_id, score, text_response, submitted_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    r.evaluation.id,
                    self.class_id,
                    r.evaluator.id,
                    r.evaluatee.id,
                    r.question.id,
                    r.score,
                    r.text_response.as_deref(),
                    &submitted_at,
                ),
            )
            .context("failed to insert response")?;
        }
        if let Some(name) = self.evaluator_name {
            crate::db::person_upsert(&tx, first.evaluator.id, name)
                .context("failed to record evaluator name")?;
        }
        tx.commit().context("failed to commit responses")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub records: Vec<SubmittedResponse>,
    pub draft_cleared: bool,
}

pub struct Submitter<'r> {
    pub questions: &'r [Question],
    pub evaluatees: &'r [Evaluatee],
    pub rules: &'r ScoreRules,
}

impl Submitter<'_> {
    /// validate -> build -> sink -> clear draft. The draft is cleared only
    /// after the sink accepted the records.
    pub fn submit(
        &self,
        store: &mut dyn DraftStore,
        sink: &mut dyn ResponseSink,
        key: DraftStoreKey,
        evaluator_id: i64,
    ) -> Result<SubmitOutcome, SubmitError> {
        let entries = store
            .load(key)?
            .map(|d| d.entries)
            .unwrap_or_default();

        let violations = validate(self.questions, self.evaluatees, &entries, self.rules);
        if !violations.is_empty() {
            return Err(SubmitError::Invalid(violations));
        }

        let records = build(
            self.questions,
            self.evaluatees,
            &entries,
            evaluator_id,
            key.evaluation_id,
        );
        sink.accept(&records)?;

        // Records are committed at this point.
        let draft_cleared = match store.clear(key) {
            Ok(cleared) => cleared,
            Err(e) => {
                log::warn!("submitted {} but could not clear its draft: {:#}", key, e);
                false
            }
        };
        Ok(SubmitOutcome {
            records,
            draft_cleared,
        })
    }
}
