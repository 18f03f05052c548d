//! Request bodies, validated on ingress.
//!
//! The sync body arrives as loosely typed JSON. [Snapshot::from_json] maps it straight onto a
//! strict tree where each question carries a [QuestionBody] variant chosen by its `type` field,
//! so nothing downstream of this module ever sees an unknown question type, an option list on a
//! free-text question, or a duplicated id under one parent. Every rejection is a
//! [SyncError::Validation] naming the offending JSON path.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;

use crate::{
    error::SyncError,
    nodekey::NodeKey,
    properties::{NodeId, QuestionKind, TestStatus, TestTree},
};

pub const DEFAULT_POSITIVE_MARKS: f64 = 1.0;
pub const DEFAULT_NEGATIVE_MARKS: f64 = 0.0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSyncBody {
    sections: Vec<WireSection>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSection {
    #[serde(default)]
    id: NodeKey,
    title: String,
    #[serde(default)]
    duration: Option<i64>,
    #[serde(default)]
    default_positive_marks: Option<f64>,
    #[serde(default)]
    default_negative_marks: Option<f64>,
    #[serde(default)]
    questions: Option<Vec<WireQuestion>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireQuestion {
    #[serde(default)]
    id: NodeKey,
    #[serde(rename = "type")]
    kind: String,
    text: String,
    #[serde(default)]
    correct_answer: Option<String>,
    #[serde(default)]
    positive_marks: Option<f64>,
    #[serde(default)]
    negative_marks: Option<f64>,
    #[serde(default)]
    options: Option<Vec<WireOption>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOption {
    #[serde(default)]
    id: NodeKey,
    text: String,
    #[serde(default)]
    is_correct: bool,
}

/// A complete client-side picture of a Test's sections. Whatever it leaves out gets deleted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub sections: Vec<SectionDraft>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionDraft {
    pub key: NodeKey,
    pub title: String,
    pub duration: Option<i64>,
    pub default_positive_marks: f64,
    pub default_negative_marks: f64,
    pub questions: Vec<QuestionDraft>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuestionDraft {
    pub key: NodeKey,
    pub text: String,
    pub positive_marks: Option<f64>,
    pub negative_marks: Option<f64>,
    pub body: QuestionBody,
}

/// The type-dependent half of a question.
#[derive(Debug, Clone, PartialEq)]
pub enum QuestionBody {
    SingleChoice(Vec<OptionDraft>),
    MultiChoice(Vec<OptionDraft>),
    FreeText { correct_answer: Option<String> },
}

impl QuestionBody {
    pub fn kind(&self) -> QuestionKind {
        match self {
            QuestionBody::SingleChoice(_) => QuestionKind::Mcq,
            QuestionBody::MultiChoice(_) => QuestionKind::MultiSelect,
            QuestionBody::FreeText { .. } => QuestionKind::Text,
        }
    }

    pub fn options(&self) -> &[OptionDraft] {
        match self {
            QuestionBody::SingleChoice(options) | QuestionBody::MultiChoice(options) => options,
            QuestionBody::FreeText { .. } => &[],
        }
    }

    pub fn correct_answer(&self) -> Option<&str> {
        match self {
            QuestionBody::FreeText { correct_answer } => correct_answer.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionDraft {
    pub key: NodeKey,
    pub text: String,
    pub is_correct: bool,
}

impl Snapshot {
    pub fn from_json(bytes: &[u8]) -> Result<Snapshot, SyncError> {
        let wire: WireSyncBody = serde_json::from_slice(bytes)
            .map_err(|e| SyncError::validation(format!("malformed sync payload: {e}")))?;
        Snapshot::try_from(wire)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Snapshot, SyncError> {
        let wire: WireSyncBody = serde_json::from_value(value)
            .map_err(|e| SyncError::validation(format!("malformed sync payload: {e}")))?;
        Snapshot::try_from(wire)
    }

    /// Rebuild the snapshot a client holding `tree` would send back unchanged.
    pub fn from_tree(tree: &TestTree) -> Snapshot {
        let sections = tree
            .sections
            .iter()
            .map(|section| SectionDraft {
                key: section.id.into(),
                title: section.title.clone(),
                duration: section.duration,
                default_positive_marks: section.default_positive_marks,
                default_negative_marks: section.default_negative_marks,
                questions: section
                    .questions
                    .iter()
                    .map(|question| {
                        let options = question
                            .options
                            .iter()
                            .map(|option| OptionDraft {
                                key: option.id.into(),
                                text: option.text.clone(),
                                is_correct: option.is_correct,
                            })
                            .collect();
                        QuestionDraft {
                            key: question.id.into(),
                            text: question.text.clone(),
                            positive_marks: question.positive_marks,
                            negative_marks: question.negative_marks,
                            body: match question.kind {
                                QuestionKind::Mcq => QuestionBody::SingleChoice(options),
                                QuestionKind::MultiSelect => QuestionBody::MultiChoice(options),
                                QuestionKind::Text => QuestionBody::FreeText {
                                    correct_answer: question.correct_answer.clone(),
                                },
                            },
                        }
                    })
                    .collect(),
            })
            .collect();
        Snapshot { sections }
    }
}

/// Tracks persisted ids seen under one parent.
fn check_unique(
    seen: &mut BTreeSet<NodeId>,
    key: &NodeKey,
    path: &str,
) -> Result<(), SyncError> {
    if let Some(id) = key.persisted() {
        if !seen.insert(id) {
            return Err(SyncError::validation(format!(
                "{path}.id: duplicate id {id}"
            )));
        }
    }
    Ok(())
}

fn check_marks(value: Option<f64>, path: &str) -> Result<(), SyncError> {
    match value {
        Some(v) if !v.is_finite() => Err(SyncError::validation(format!(
            "{path}: marks must be a finite number"
        ))),
        _ => Ok(()),
    }
}

impl TryFrom<WireSyncBody> for Snapshot {
    type Error = SyncError;

    fn try_from(wire: WireSyncBody) -> Result<Self, Self::Error> {
        let mut section_ids = BTreeSet::new();
        let mut sections = Vec::with_capacity(wire.sections.len());
        for (s_idx, section) in wire.sections.into_iter().enumerate() {
            let s_path = format!("sections[{s_idx}]");
            check_unique(&mut section_ids, &section.id, &s_path)?;
            if matches!(section.duration, Some(d) if d < 0) {
                return Err(SyncError::validation(format!(
                    "{s_path}.duration: must not be negative"
                )));
            }
            check_marks(
                section.default_positive_marks,
                &format!("{s_path}.defaultPositiveMarks"),
            )?;
            check_marks(
                section.default_negative_marks,
                &format!("{s_path}.defaultNegativeMarks"),
            )?;

            let mut question_ids = BTreeSet::new();
            let mut questions = Vec::new();
            for (q_idx, question) in section
                .questions
                .unwrap_or_default()
                .into_iter()
                .enumerate()
            {
                let q_path = format!("{s_path}.questions[{q_idx}]");
                check_unique(&mut question_ids, &question.id, &q_path)?;
                questions.push(question_draft(question, &q_path)?);
            }

            sections.push(SectionDraft {
                key: section.id,
                title: section.title,
                duration: section.duration,
                default_positive_marks: section
                    .default_positive_marks
                    .unwrap_or(DEFAULT_POSITIVE_MARKS),
                default_negative_marks: section
                    .default_negative_marks
                    .unwrap_or(DEFAULT_NEGATIVE_MARKS),
                questions,
            });
        }
        Ok(Snapshot { sections })
    }
}

fn question_draft(question: WireQuestion, q_path: &str) -> Result<QuestionDraft, SyncError> {
    let kind: QuestionKind = question
        .kind
        .parse()
        .map_err(|e: SyncError| match e {
            SyncError::Validation(msg) => SyncError::validation(format!("{q_path}.type: {msg}")),
            other => other,
        })?;
    check_marks(question.positive_marks, &format!("{q_path}.positiveMarks"))?;
    check_marks(question.negative_marks, &format!("{q_path}.negativeMarks"))?;

    let body = if kind.is_choice() {
        let mut option_ids = BTreeSet::new();
        let mut options = Vec::new();
        for (o_idx, option) in question
            .options
            .unwrap_or_default()
            .into_iter()
            .enumerate()
        {
            check_unique(
                &mut option_ids,
                &option.id,
                &format!("{q_path}.options[{o_idx}]"),
            )?;
            options.push(OptionDraft {
                key: option.id,
                text: option.text,
                is_correct: option.is_correct,
            });
        }
        match kind {
            QuestionKind::MultiSelect => QuestionBody::MultiChoice(options),
            _ => QuestionBody::SingleChoice(options),
        }
    } else {
        if question.options.as_ref().is_some_and(|o| !o.is_empty()) {
            tracing::debug!("[Snapshot] {q_path}: ignoring options sent for a text question");
        }
        QuestionBody::FreeText {
            correct_answer: question.correct_answer,
        }
    };

    Ok(QuestionDraft {
        key: question.id,
        text: question.text,
        positive_marks: question.positive_marks,
        negative_marks: question.negative_marks,
        body,
    })
}

/// Body of `POST /api/test`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub availability_start: Option<String>,
    #[serde(default)]
    pub availability_end: Option<String>,
    #[serde(default)]
    pub total_duration: Option<i64>,
    #[serde(default)]
    pub shuffle_questions: bool,
    #[serde(default = "default_allow_section_nav")]
    pub allow_section_nav: bool,
    #[serde(default)]
    pub negative_marking: bool,
    #[serde(default)]
    pub show_results_instant: bool,
}

fn default_allow_section_nav() -> bool {
    true
}

impl NewTest {
    pub fn titled<S: Into<String>>(title: S) -> Self {
        NewTest {
            title: title.into(),
            description: None,
            availability_start: None,
            availability_end: None,
            total_duration: None,
            shuffle_questions: false,
            allow_section_nav: true,
            negative_marking: false,
            show_results_instant: false,
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<NewTest, SyncError> {
        let new_test: NewTest = serde_json::from_slice(bytes)
            .map_err(|e| SyncError::validation(format!("malformed test payload: {e}")))?;
        new_test.validate()?;
        Ok(new_test)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.title.trim().is_empty() {
            return Err(SyncError::validation("title: must not be empty"));
        }
        if matches!(self.total_duration, Some(d) if d < 0) {
            return Err(SyncError::validation("totalDuration: must not be negative"));
        }
        Ok(())
    }
}

/// Absent stays `None`, an explicit `null` becomes `Some(None)`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Body of `PUT /api/test/{id}`. Absent fields keep their stored value; `null` clears the
/// nullable ones.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDetailsUpdate {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub availability_start: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub availability_end: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub total_duration: Option<Option<i64>>,
    pub shuffle_questions: Option<bool>,
    pub allow_section_nav: Option<bool>,
    pub negative_marking: Option<bool>,
    pub show_results_instant: Option<bool>,
    pub status: Option<TestStatus>,
}

impl TestDetailsUpdate {
    pub fn from_json(bytes: &[u8]) -> Result<TestDetailsUpdate, SyncError> {
        let update: TestDetailsUpdate = serde_json::from_slice(bytes)
            .map_err(|e| SyncError::validation(format!("malformed test payload: {e}")))?;
        if update.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(SyncError::validation("title: must not be empty"));
        }
        if matches!(update.total_duration, Some(Some(d)) if d < 0) {
            return Err(SyncError::validation("totalDuration: must not be negative"));
        }
        Ok(update)
    }
}
