use crate::config::EngineConfig;
use crate::model::{DraftEntries, DraftKey, Evaluatee, Question};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    MissingScore,
    NotANumber,
    OutOfRange,
    BlankText,
    DuplicateScore,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub code: ViolationCode,
    pub question_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluatee_id: Option<i64>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRules {
    pub max: f64,
    pub exempt_title: String,
}

impl Default for ScoreRules {
    fn default() -> Self {
        ScoreRules::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for ScoreRules {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            max: cfg.score_max,
            exempt_title: cfg.exempt_title.clone(),
        }
    }
}

impl ScoreRules {
    fn is_exempt(&self, q: &Question) -> bool {
        q.title.eq_ignore_ascii_case(&self.exempt_title)
    }
}

/// Returns every problem with the draft at once, in question order.
/// An empty list means the draft may be submitted.
pub fn validate(
    questions: &[Question],
    evaluatees: &[Evaluatee],
    drafts: &DraftEntries,
    rules: &ScoreRules,
) -> Vec<Violation> {
    let mut out = Vec::new();

    for q in questions {
        if q.is_text() {
            let blank = drafts
                .get(&DraftKey::text(q.id))
                .map(|v| v.is_blank())
                .unwrap_or(true);
            if blank {
                out.push(Violation {
                    code: ViolationCode::BlankText,
                    question_id: q.id,
                    evaluatee_id: None,
                    message: format!("Please answer \"{}\".", q.title),
                });
            }
            continue;
        }

        let mut supplied: Vec<f64> = Vec::new();
        for e in evaluatees {
            let value = drafts.get(&DraftKey::score(e.id, q.id));
            let violation = match value {
                None => Some((ViolationCode::MissingScore, "is missing")),
                Some(v) if v.is_blank() => Some((ViolationCode::MissingScore, "is missing")),
                Some(v) => match v.as_number() {
                    None => Some((ViolationCode::NotANumber, "is not a number")),
                    Some(n) if n <= 0.0 || n > rules.max => {
                        Some((ViolationCode::OutOfRange, "is out of range"))
                    }
                    Some(n) => {
                        supplied.push(n);
                        None
                    }
                },
            };
            if let Some((code, what)) = violation {
                out.push(Violation {
                    code,
                    question_id: q.id,
                    evaluatee_id: Some(e.id),
                    message: format!(
                        "Score for {} on \"{}\" {} (must be greater than 0 and at most {}).",
                        e.display_name, q.title, what, rules.max
                    ),
                });
            }
        }

        if !rules.is_exempt(q) && has_duplicates(&supplied) {
            out.push(Violation {
                code: ViolationCode::DuplicateScore,
                question_id: q.id,
                evaluatee_id: None,
                message: format!("Each person must get a different score on \"{}\".", q.title),
            });
        }
    }

    out
}

fn has_duplicates(scores: &[f64]) -> bool {
    let mut sorted = scores.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.windows(2).any(|w| w[0] == w[1])
}
