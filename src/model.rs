use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    Input,
    Text,
}

impl QuestionType {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::Input => "INPUT",
            QuestionType::Text => "TEXT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INPUT" => Some(QuestionType::Input),
            "TEXT" => Some(QuestionType::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub details: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
}

impl Question {
    pub fn is_input(&self) -> bool {
        self.question_type == QuestionType::Input
    }

    pub fn is_text(&self) -> bool {
        self.question_type == QuestionType::Text
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluatee {
    pub id: i64,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_name: Option<String>,
}

/// Who evaluates whom. Each variant used to be its own screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationKind {
    StudentToStudent,
    StudentToAdviser,
    AdviserToStudent,
}

impl EvaluationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluationKind::StudentToStudent => "STUDENT_TO_STUDENT",
            EvaluationKind::StudentToAdviser => "STUDENT_TO_ADVISER",
            EvaluationKind::AdviserToStudent => "ADVISER_TO_STUDENT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STUDENT_TO_STUDENT" => Some(EvaluationKind::StudentToStudent),
            "STUDENT_TO_ADVISER" => Some(EvaluationKind::StudentToAdviser),
            "ADVISER_TO_STUDENT" => Some(EvaluationKind::AdviserToStudent),
            _ => None,
        }
    }

    /// Checks the evaluatee set shape this kind expects.
    pub fn check_evaluatees(self, evaluatees: &[Evaluatee]) -> Result<(), String> {
        if evaluatees.is_empty() {
            return Err("evaluatee set is empty".to_string());
        }
        if self == EvaluationKind::StudentToAdviser && evaluatees.len() != 1 {
            return Err(format!(
                "adviser evaluation expects exactly one evaluatee, got {}",
                evaluatees.len()
            ));
        }
        let mut seen = HashSet::new();
        for e in evaluatees {
            if !seen.insert(e.id) {
                return Err(format!("duplicate evaluatee id {}", e.id));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DraftKey {
    Score { evaluatee_id: i64, question_id: i64 },
    Text { question_id: i64 },
}

impl DraftKey {
    pub fn score(evaluatee_id: i64, question_id: i64) -> Self {
        DraftKey::Score {
            evaluatee_id,
            question_id,
        }
    }

    pub fn text(question_id: i64) -> Self {
        DraftKey::Text { question_id }
    }
}

impl fmt::Display for DraftKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DraftKey::Score {
                evaluatee_id,
                question_id,
            } => write!(f, "{}-{}", evaluatee_id, question_id),
            DraftKey::Text { question_id } => write!(f, "text-{}", question_id),
        }
    }
}

impl FromStr for DraftKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("text-") {
            let question_id = rest
                .parse::<i64>()
                .map_err(|_| format!("bad draft key: {}", s))?;
            return Ok(DraftKey::text(question_id));
        }
        // Ids are non-negative, so the first '-' separates the two halves.
        let (left, right) = s
            .split_once('-')
            .ok_or_else(|| format!("bad draft key: {}", s))?;
        let evaluatee_id = left
            .parse::<i64>()
            .map_err(|_| format!("bad draft key: {}", s))?;
        let question_id = right
            .parse::<i64>()
            .map_err(|_| format!("bad draft key: {}", s))?;
        Ok(DraftKey::score(evaluatee_id, question_id))
    }
}

impl Serialize for DraftKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DraftKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Raw form field content. Strings stay as typed; the validator decides
/// whether they are numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DraftValue {
    Number(f64),
    Text(String),
    Empty,
}

impl DraftValue {
    pub fn is_blank(&self) -> bool {
        match self {
            DraftValue::Empty => true,
            DraftValue::Text(s) => s.trim().is_empty(),
            DraftValue::Number(_) => false,
        }
    }

    /// Numeric reading of the field, `None` when it holds no finite number.
    pub fn as_number(&self) -> Option<f64> {
        let v = match self {
            DraftValue::Number(v) => *v,
            DraftValue::Text(s) => s.trim().parse::<f64>().ok()?,
            DraftValue::Empty => return None,
        };
        v.is_finite().then_some(v)
    }

    pub fn as_text(&self) -> String {
        match self {
            DraftValue::Number(v) => v.to_string(),
            DraftValue::Text(s) => s.clone(),
            DraftValue::Empty => String::new(),
        }
    }
}

pub type DraftEntries = BTreeMap<DraftKey, DraftValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRef {
    pub id: i64,
}

/// Wire shape the backend accepts for one answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedResponse {
    pub evaluator: IdRef,
    pub evaluatee: IdRef,
    pub question: IdRef,
    pub evaluation: IdRef,
    pub score: f64,
    pub text_response: Option<String>,
}
