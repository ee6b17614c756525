use crate::model::{EvaluationKind, Evaluatee, Question, QuestionType};
use anyhow::{anyhow, Context};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "peereval.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    ensure_schema(&conn)?;
    Ok(conn)
}

pub fn ensure_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluations(
            id INTEGER PRIMARY KEY,
            kind TEXT NOT NULL,
            title TEXT NOT NULL,
            opened_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS questions(
            evaluation_id INTEGER NOT NULL,
            question_id INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            title TEXT NOT NULL,
            details TEXT NOT NULL,
            question_type TEXT NOT NULL,
            PRIMARY KEY(evaluation_id, question_id),
            FOREIGN KEY(evaluation_id) REFERENCES evaluations(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_questions_evaluation_sort ON questions(evaluation_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS people(
            id INTEGER PRIMARY KEY,
            display_name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluatees(
            evaluation_id INTEGER NOT NULL,
            class_id INTEGER NOT NULL,
            person_id INTEGER NOT NULL,
            sort_order INTEGER NOT NULL,
            team_id INTEGER,
            team_name TEXT,
            PRIMARY KEY(evaluation_id, class_id, person_id),
            FOREIGN KEY(evaluation_id) REFERENCES evaluations(id),
            FOREIGN KEY(person_id) REFERENCES people(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluatees_slot ON evaluatees(evaluation_id, class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS drafts(
            store_key TEXT PRIMARY KEY,
            evaluation_id INTEGER NOT NULL,
            class_id INTEGER NOT NULL,
            payload TEXT NOT NULL,
            revision INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS responses(
            id TEXT PRIMARY KEY,
            evaluation_id INTEGER NOT NULL,
            class_id INTEGER NOT NULL,
            evaluator_id INTEGER NOT NULL,
            evaluatee_id INTEGER NOT NULL,
            question_id INTEGER NOT NULL,
            score REAL NOT NULL,
            text_response TEXT,
            submitted_at TEXT NOT NULL,
            FOREIGN KEY(evaluation_id) REFERENCES evaluations(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_responses_evaluation ON responses(evaluation_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_responses_evaluator ON responses(evaluation_id, evaluator_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS wizard_state(
            wizard TEXT PRIMARY KEY,
            step TEXT NOT NULL,
            email_digest TEXT,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

#[derive(Debug, Clone)]
pub struct EvaluationRow {
    pub id: i64,
    pub kind: EvaluationKind,
    pub title: String,
    pub opened_at: String,
}

pub fn evaluation_get(conn: &Connection, evaluation_id: i64) -> anyhow::Result<Option<EvaluationRow>> {
    let row: Option<(i64, String, String, String)> = conn
        .query_row(
            "SELECT id, kind, title, opened_at FROM evaluations WHERE id = ?",
            [evaluation_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((id, kind, title, opened_at)) = row else {
        return Ok(None);
    };
    let kind = EvaluationKind::parse(&kind)
        .ok_or_else(|| anyhow!("evaluation {} has unknown kind {}", id, kind))?;
    Ok(Some(EvaluationRow {
        id,
        kind,
        title,
        opened_at,
    }))
}

pub fn evaluation_insert(
    conn: &Connection,
    evaluation_id: i64,
    kind: EvaluationKind,
    title: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO evaluations(id, kind, title, opened_at) VALUES(?, ?, ?, ?)",
        (
            evaluation_id,
            kind.as_str(),
            title,
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(())
}

pub fn questions_list(conn: &Connection, evaluation_id: i64) -> anyhow::Result<Vec<Question>> {
    let mut stmt = conn.prepare(
        "SELECT question_id, title, details, question_type
         FROM questions
         WHERE evaluation_id = ?
         ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([evaluation_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, title, details, t)| {
            let question_type = QuestionType::parse(&t)
                .ok_or_else(|| anyhow!("question {} has unknown type {}", id, t))?;
            Ok(Question {
                id,
                title,
                details,
                question_type,
            })
        })
        .collect()
}

pub fn questions_insert(
    conn: &Connection,
    evaluation_id: i64,
    questions: &[Question],
) -> anyhow::Result<()> {
    for (i, q) in questions.iter().enumerate() {
        conn.execute(
            "INSERT INTO questions(evaluation_id, question_id, sort_order, title, details, question_type)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                evaluation_id,
                q.id,
                i as i64,
                &q.title,
                &q.details,
                q.question_type.as_str(),
            ),
        )
        .with_context(|| format!("failed to store question {}", q.id))?;
    }
    Ok(())
}

pub fn person_upsert(conn: &Connection, id: i64, display_name: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO people(id, display_name) VALUES(?, ?)
         ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name",
        (id, display_name),
    )?;
    Ok(())
}

pub fn evaluatees_list(
    conn: &Connection,
    evaluation_id: i64,
    class_id: i64,
) -> anyhow::Result<Vec<Evaluatee>> {
    let mut stmt = conn.prepare(
        "SELECT e.person_id, p.display_name, e.team_id, e.team_name
         FROM evaluatees e
         JOIN people p ON p.id = e.person_id
         WHERE e.evaluation_id = ? AND e.class_id = ?
         ORDER BY e.sort_order",
    )?;
    let rows = stmt
        .query_map((evaluation_id, class_id), |r| {
            Ok(Evaluatee {
                id: r.get(0)?,
                display_name: r.get(1)?,
                team_id: r.get(2)?,
                team_name: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Replaces the evaluatee set of one slot. Team rosters change between
/// sessions, unlike question sets.
pub fn evaluatees_replace(
    conn: &Connection,
    evaluation_id: i64,
    class_id: i64,
    evaluatees: &[Evaluatee],
) -> anyhow::Result<()> {
    conn.execute(
        "DELETE FROM evaluatees WHERE evaluation_id = ? AND class_id = ?",
        (evaluation_id, class_id),
    )?;
    for (i, e) in evaluatees.iter().enumerate() {
        person_upsert(conn, e.id, &e.display_name)?;
        conn.execute(
            "INSERT INTO evaluatees(evaluation_id, class_id, person_id, sort_order, team_id, team_name)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                evaluation_id,
                class_id,
                e.id,
                i as i64,
                e.team_id,
                e.team_name.as_deref(),
            ),
        )
        .with_context(|| format!("failed to store evaluatee {}", e.id))?;
    }
    Ok(())
}
