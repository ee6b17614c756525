use crate::db::{self, EvaluationRow};
use crate::model::{Question, QuestionType};
use crate::workbook::{self, Cell, Workbook};
use anyhow::anyhow;
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// One ledger response with the names the sheets need.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRow {
    pub evaluator_id: i64,
    pub evaluator_name: String,
    pub evaluatee_id: i64,
    pub evaluatee_name: String,
    pub question_id: i64,
    pub question_type: QuestionType,
    pub score: f64,
    pub text_response: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExportMeta {
    pub evaluation_id: i64,
    pub title: String,
    pub kind: String,
    pub exported_at: String,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub sheet_count: usize,
    pub response_count: usize,
    pub format: String,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(round2(values.iter().sum::<f64>() / values.len() as f64))
}

fn number_or_empty(v: Option<f64>) -> Cell {
    v.map(Cell::Number).unwrap_or(Cell::Empty)
}

fn fallback_name(name: &str, id: i64) -> String {
    if name.trim().is_empty() {
        format!("#{}", id)
    } else {
        name.to_string()
    }
}

/// Sort key that keeps people with equal names apart.
fn person_key(name: &str, id: i64) -> (String, i64) {
    (name.to_lowercase(), id)
}

/// Reshapes a flat response list into a workbook: a metadata sheet, then one
/// sheet per evaluated person with questions as rows and evaluators as
/// columns.
pub fn pivot(meta: &ExportMeta, questions: &[Question], rows: &[LedgerRow]) -> Workbook {
    let numeric: Vec<&LedgerRow> = rows
        .iter()
        .filter(|r| r.question_type == QuestionType::Input)
        .collect();

    // evaluatee -> (name, evaluator -> name)
    let mut groups: BTreeMap<(String, i64), (String, BTreeMap<(String, i64), String>)> =
        BTreeMap::new();
    let mut scores: HashMap<(i64, i64, i64), f64> = HashMap::new();
    for r in &numeric {
        let evaluatee_name = fallback_name(&r.evaluatee_name, r.evaluatee_id);
        let evaluator_name = fallback_name(&r.evaluator_name, r.evaluator_id);
        groups
            .entry(person_key(&evaluatee_name, r.evaluatee_id))
            .or_insert_with(|| (evaluatee_name.clone(), BTreeMap::new()))
            .1
            .insert(person_key(&evaluator_name, r.evaluator_id), evaluator_name);
        scores.insert((r.evaluatee_id, r.question_id, r.evaluator_id), r.score);
    }

    let mut texts: HashMap<(i64, i64), String> = HashMap::new();
    for r in rows.iter().filter(|r| r.question_type == QuestionType::Text) {
        if let Some(t) = &r.text_response {
            texts.insert((r.evaluator_id, r.question_id), t.clone());
        }
    }

    let mut wb = Workbook::default();
    wb.push_sheet(
        "Metadata",
        vec![
            vec![Cell::text("Evaluation ID"), Cell::Number(meta.evaluation_id as f64)],
            vec![Cell::text("Title"), Cell::text(meta.title.clone())],
            vec![Cell::text("Kind"), Cell::text(meta.kind.clone())],
            vec![Cell::text("Exported At"), Cell::text(meta.exported_at.clone())],
            vec![Cell::text("Responses"), Cell::Number(rows.len() as f64)],
            vec![Cell::text("Person Sheets"), Cell::Number(groups.len() as f64)],
        ],
    );

    let input_questions: Vec<&Question> = questions.iter().filter(|q| q.is_input()).collect();
    let text_questions: Vec<&Question> = questions.iter().filter(|q| q.is_text()).collect();

    for ((_, evaluatee_id), (evaluatee_name, evaluators)) in &groups {
        let evaluator_ids: Vec<i64> = evaluators.keys().map(|(_, id)| *id).collect();

        let mut header = vec![Cell::text("Question")];
        header.extend(evaluators.values().map(|n| Cell::text(n.clone())));
        header.push(Cell::text("Average"));
        let mut sheet_rows = vec![header];

        let mut by_column: Vec<Vec<f64>> = vec![Vec::new(); evaluator_ids.len()];
        let mut all_scores: Vec<f64> = Vec::new();
        for q in &input_questions {
            let mut row = vec![Cell::text(q.title.clone())];
            let mut present = Vec::new();
            for (col, evaluator_id) in evaluator_ids.iter().enumerate() {
                let s = scores.get(&(*evaluatee_id, q.id, *evaluator_id)).copied();
                if let Some(v) = s {
                    present.push(v);
                    by_column[col].push(v);
                }
                row.push(number_or_empty(s));
            }
            all_scores.extend(present.iter().copied());
            row.push(number_or_empty(mean(&present)));
            sheet_rows.push(row);
        }

        let mut avg_row = vec![Cell::text("Average")];
        avg_row.extend(by_column.iter().map(|c| number_or_empty(mean(c))));
        avg_row.push(number_or_empty(mean(&all_scores)));
        sheet_rows.push(avg_row);

        if !text_questions.is_empty() {
            sheet_rows.push(Vec::new());
            for q in &text_questions {
                let mut row = vec![Cell::text(q.title.clone())];
                for evaluator_id in &evaluator_ids {
                    row.push(
                        texts
                            .get(&(*evaluator_id, q.id))
                            .map(|t| Cell::text(t.clone()))
                            .unwrap_or(Cell::Empty),
                    );
                }
                sheet_rows.push(row);
            }
        }

        wb.push_sheet(evaluatee_name, sheet_rows);
    }

    wb
}

pub fn load_ledger(conn: &Connection, evaluation_id: i64) -> anyhow::Result<Vec<LedgerRow>> {
    let mut stmt = conn.prepare(
        "SELECT r.evaluator_id, COALESCE(pr.display_name, ''),
                r.evaluatee_id, COALESCE(pe.display_name, ''),
                r.question_id, q.question_type, r.score, r.text_response
         FROM responses r
         JOIN questions q ON q.evaluation_id = r.evaluation_id AND q.question_id = r.question_id
         LEFT JOIN people pr ON pr.id = r.evaluator_id
         LEFT JOIN people pe ON pe.id = r.evaluatee_id
         WHERE r.evaluation_id = ?
         ORDER BY r.submitted_at, r.rowid",
    )?;
    let raw = stmt
        .query_map([evaluation_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, f64>(6)?,
                r.get::<_, Option<String>>(7)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(
            |(evaluator_id, evaluator_name, evaluatee_id, evaluatee_name, question_id, t, score, text_response)| {
                let question_type = QuestionType::parse(&t)
                    .ok_or_else(|| anyhow!("question {} has unknown type {}", question_id, t))?;
                Ok(LedgerRow {
                    evaluator_id,
                    evaluator_name,
                    evaluatee_id,
                    evaluatee_name,
                    question_id,
                    question_type,
                    score,
                    text_response,
                })
            },
        )
        .collect()
}

/// Loads, pivots and writes in one go; any failure aborts the whole export.
pub fn export_evaluation_workbook(
    conn: &Connection,
    evaluation: &EvaluationRow,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let questions = db::questions_list(conn, evaluation.id)?;
    let rows = load_ledger(conn, evaluation.id)?;
    let meta = ExportMeta {
        evaluation_id: evaluation.id,
        title: evaluation.title.clone(),
        kind: evaluation.kind.as_str().to_string(),
        exported_at: chrono::Utc::now().to_rfc3339(),
    };
    let wb = pivot(&meta, &questions, &rows);
    let written = workbook::write_workbook(&wb, out_path)?;
    Ok(ExportSummary {
        sheet_count: written.sheet_count,
        response_count: rows.len(),
        format: written.format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(id: i64, title: &str, t: QuestionType) -> Question {
        Question {
            id,
            title: title.into(),
            details: String::new(),
            question_type: t,
        }
    }

    fn score(evaluator: (i64, &str), evaluatee: (i64, &str), question_id: i64, v: f64) -> LedgerRow {
        LedgerRow {
            evaluator_id: evaluator.0,
            evaluator_name: evaluator.1.into(),
            evaluatee_id: evaluatee.0,
            evaluatee_name: evaluatee.1.into(),
            question_id,
            question_type: QuestionType::Input,
            score: v,
            text_response: None,
        }
    }

    fn meta() -> ExportMeta {
        ExportMeta {
            evaluation_id: 3,
            title: "Midterm".into(),
            kind: "STUDENT_TO_ADVISER".into(),
            exported_at: "2026-01-01T00:00:00+00:00".into(),
        }
    }

    #[test]
    fn one_sheet_per_adviser_with_averages() {
        let questions = vec![
            q(1, "Clarity", QuestionType::Input),
            q(2, "Availability", QuestionType::Input),
            q(3, "Comments", QuestionType::Text),
        ];
        let ana = (10, "Ana");
        let ben = (11, "Ben");
        let adv = (100, "Dr. Cruz");
        let mut rows = vec![
            score(ana, adv, 1, 8.0),
            score(ana, adv, 2, 6.0),
            score(ben, adv, 1, 9.0),
            score(ben, adv, 2, 7.0),
            score(ana, (200, "Dr. Diaz"), 1, 5.0),
        ];
        rows.push(LedgerRow {
            evaluator_id: 10,
            evaluator_name: "Ana".into(),
            evaluatee_id: 10,
            evaluatee_name: "Ana".into(),
            question_id: 3,
            question_type: QuestionType::Text,
            score: 0.0,
            text_response: Some("helpful".into()),
        });

        let wb = pivot(&meta(), &questions, &rows);
        let names: Vec<&str> = wb.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Metadata", "Dr. Cruz", "Dr. Diaz"]);

        let cruz = &wb.sheets[1];
        assert_eq!(
            cruz.rows[0],
            vec![
                Cell::text("Question"),
                Cell::text("Ana"),
                Cell::text("Ben"),
                Cell::text("Average")
            ]
        );
        assert_eq!(
            cruz.rows[1],
            vec![
                Cell::text("Clarity"),
                Cell::Number(8.0),
                Cell::Number(9.0),
                Cell::Number(8.5)
            ]
        );
        assert_eq!(
            cruz.rows[3],
            vec![
                Cell::text("Average"),
                Cell::Number(7.0),
                Cell::Number(8.0),
                Cell::Number(7.5)
            ]
        );
        assert_eq!(
            cruz.rows[5],
            vec![Cell::text("Comments"), Cell::text("helpful"), Cell::Empty]
        );

        let diaz = &wb.sheets[2];
        assert_eq!(
            diaz.rows[2],
            vec![Cell::text("Availability"), Cell::Empty, Cell::Empty]
        );
    }

    #[test]
    fn averages_round_to_two_decimals() {
        let questions = vec![q(1, "Clarity", QuestionType::Input)];
        let adv = (100, "Adviser");
        let rows = vec![
            score((1, "A"), adv, 1, 7.0),
            score((2, "B"), adv, 1, 8.0),
            score((3, "C"), adv, 1, 8.0),
        ];
        let wb = pivot(&meta(), &questions, &rows);
        assert_eq!(wb.sheets[1].rows[1][4], Cell::Number(7.67));
    }

    #[test]
    fn empty_ledger_yields_metadata_only() {
        let wb = pivot(&meta(), &[], &[]);
        assert_eq!(wb.sheets.len(), 1);
        assert_eq!(wb.sheets[0].rows[4], vec![Cell::text("Responses"), Cell::Number(0.0)]);
    }
}
