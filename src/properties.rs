use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
    str::FromStr,
};
use uuid::Uuid;

#[cfg(feature = "service")]
use sqlx::{sqlite::SqliteRow, FromRow, Row};

use crate::error::SyncError;

/// Node ID
///
/// A UUID (v7) assigned to a Test, Section, Question or Option when it is first persisted. The
/// hyphenated form is what gets stored and what clients see. Because v7 Uuids lead with a
/// millisecond timestamp, NodeIds are Ord roughly by creation time.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        NodeId(Uuid::now_v7())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId::new()
    }
}

impl AsRef<Uuid> for NodeId {
    fn as_ref(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for NodeId {
    fn from(id: Uuid) -> Self {
        NodeId(id)
    }
}

impl TryFrom<&str> for NodeId {
    type Error = SyncError;

    fn try_from(string: &str) -> Result<Self, Self::Error> {
        Ok(NodeId(Uuid::parse_str(string)?))
    }
}

impl FromStr for NodeId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeId::try_from(s)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            self.0.hyphenated().encode_lower(&mut Uuid::encode_buffer())
        )
    }
}

impl From<&NodeId> for String {
    fn from(val: &NodeId) -> Self {
        format!("{val}")
    }
}

impl From<NodeId> for String {
    fn from(val: NodeId) -> Self {
        format!("{val}")
    }
}

/// Caller identity handed to us by whatever authenticated the request. Opaque; only compared
/// against a Test's creator.
#[derive(Clone, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new<S: AsRef<str>>(raw: S) -> Result<Self, SyncError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(SyncError::Authentication);
        }
        Ok(UserId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionKind {
    /// Single correct option
    #[serde(rename = "mcq")]
    Mcq,
    /// Any number of correct options
    #[serde(rename = "multi-select")]
    MultiSelect,
    /// Free-text answer, never has options
    #[serde(rename = "text")]
    Text,
}

impl QuestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::Mcq => "mcq",
            QuestionKind::MultiSelect => "multi-select",
            QuestionKind::Text => "text",
        }
    }

    pub fn is_choice(&self) -> bool {
        !matches!(self, QuestionKind::Text)
    }
}

impl FromStr for QuestionKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mcq" => Ok(QuestionKind::Mcq),
            "multi-select" => Ok(QuestionKind::MultiSelect),
            "text" => Ok(QuestionKind::Text),
            other => Err(SyncError::validation(format!(
                "unknown question type '{other}'"
            ))),
        }
    }
}

impl Display for QuestionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    #[default]
    Draft,
    Published,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Draft => "draft",
            TestStatus::Published => "published",
        }
    }
}

impl FromStr for TestStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(TestStatus::Draft),
            "published" => Ok(TestStatus::Published),
            other => Err(SyncError::validation(format!("unknown test status '{other}'"))),
        }
    }
}

/// The root document's own attributes. Opaque to reconciliation apart from `id`, `created_by`
/// and `revision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRecord {
    pub id: NodeId,
    pub title: String,
    pub description: Option<String>,
    pub created_by: UserId,
    pub availability_start: Option<String>,
    pub availability_end: Option<String>,
    pub total_duration: Option<i64>,
    pub shuffle_questions: bool,
    pub allow_section_nav: bool,
    pub negative_marking: bool,
    pub show_results_instant: bool,
    pub status: TestStatus,
    /// Bumped once per committed reconciliation or detail update.
    pub revision: i64,
    /// Unix epoch milliseconds
    pub created_at: i64,
    /// Unix epoch milliseconds
    pub updated_at: i64,
}

/// Flat persisted shape of a section; what the executor writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRow {
    pub id: NodeId,
    pub test_id: NodeId,
    pub title: String,
    pub duration: Option<i64>,
    pub default_positive_marks: f64,
    pub default_negative_marks: f64,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRow {
    pub id: NodeId,
    pub section_id: NodeId,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub text: String,
    pub correct_answer: Option<String>,
    pub positive_marks: Option<f64>,
    pub negative_marks: Option<f64>,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionRow {
    pub id: NodeId,
    pub question_id: NodeId,
    pub text: String,
    pub is_correct: bool,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionNode {
    pub id: NodeId,
    pub test_id: NodeId,
    pub title: String,
    pub duration: Option<i64>,
    pub default_positive_marks: f64,
    pub default_negative_marks: f64,
    pub position: i64,
    pub questions: Vec<QuestionNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionNode {
    pub id: NodeId,
    pub section_id: NodeId,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub text: String,
    pub correct_answer: Option<String>,
    pub positive_marks: Option<f64>,
    pub negative_marks: Option<f64>,
    pub position: i64,
    pub options: Vec<OptionNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionNode {
    pub id: NodeId,
    pub question_id: NodeId,
    pub text: String,
    pub is_correct: bool,
    pub position: i64,
}

impl From<SectionRow> for SectionNode {
    fn from(row: SectionRow) -> Self {
        SectionNode {
            id: row.id,
            test_id: row.test_id,
            title: row.title,
            duration: row.duration,
            default_positive_marks: row.default_positive_marks,
            default_negative_marks: row.default_negative_marks,
            position: row.position,
            questions: Vec::new(),
        }
    }
}

impl From<QuestionRow> for QuestionNode {
    fn from(row: QuestionRow) -> Self {
        QuestionNode {
            id: row.id,
            section_id: row.section_id,
            kind: row.kind,
            text: row.text,
            correct_answer: row.correct_answer,
            positive_marks: row.positive_marks,
            negative_marks: row.negative_marks,
            position: row.position,
            options: Vec::new(),
        }
    }
}

impl From<OptionRow> for OptionNode {
    fn from(row: OptionRow) -> Self {
        OptionNode {
            id: row.id,
            question_id: row.question_id,
            text: row.text,
            is_correct: row.is_correct,
            position: row.position,
        }
    }
}

impl From<&SectionNode> for SectionRow {
    fn from(node: &SectionNode) -> Self {
        SectionRow {
            id: node.id,
            test_id: node.test_id,
            title: node.title.clone(),
            duration: node.duration,
            default_positive_marks: node.default_positive_marks,
            default_negative_marks: node.default_negative_marks,
            position: node.position,
        }
    }
}

impl From<&QuestionNode> for QuestionRow {
    fn from(node: &QuestionNode) -> Self {
        QuestionRow {
            id: node.id,
            section_id: node.section_id,
            kind: node.kind,
            text: node.text.clone(),
            correct_answer: node.correct_answer.clone(),
            positive_marks: node.positive_marks,
            negative_marks: node.negative_marks,
            position: node.position,
        }
    }
}

impl From<&OptionNode> for OptionRow {
    fn from(node: &OptionNode) -> Self {
        OptionRow {
            id: node.id,
            question_id: node.question_id,
            text: node.text.clone(),
            is_correct: node.is_correct,
            position: node.position,
        }
    }
}

/// Nest flat rows into the section -> question -> option hierarchy. Rows must arrive in the
/// order they should appear among their siblings; rows whose parent is missing are dropped.
pub fn assemble_sections(
    sections: Vec<SectionRow>,
    questions: Vec<QuestionRow>,
    options: Vec<OptionRow>,
) -> Vec<SectionNode> {
    let mut options_by_question = BTreeMap::<NodeId, Vec<OptionNode>>::new();
    for option in options {
        options_by_question
            .entry(option.question_id)
            .or_default()
            .push(option.into());
    }

    let mut questions_by_section = BTreeMap::<NodeId, Vec<QuestionNode>>::new();
    for question in questions {
        let mut node = QuestionNode::from(question);
        node.options = options_by_question.remove(&node.id).unwrap_or_default();
        questions_by_section
            .entry(node.section_id)
            .or_default()
            .push(node);
    }

    let orphans = options_by_question.values().map(Vec::len).sum::<usize>();
    if orphans > 0 {
        tracing::warn!("[assemble_sections] dropping {orphans} options with no loaded question");
    }

    sections
        .into_iter()
        .map(|row| {
            let mut node = SectionNode::from(row);
            node.questions = questions_by_section.remove(&node.id).unwrap_or_default();
            node
        })
        .collect()
}

/// The canonical tree: a Test and its fully expanded hierarchy as read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestTree {
    #[serde(flatten)]
    pub test: TestRecord,
    pub sections: Vec<SectionNode>,
}

impl TestTree {
    pub fn question_count(&self) -> usize {
        self.sections.iter().map(|s| s.questions.len()).sum()
    }

    pub fn option_count(&self) -> usize {
        self.sections
            .iter()
            .flat_map(|s| s.questions.iter())
            .map(|q| q.options.len())
            .sum()
    }
}

#[cfg(feature = "service")]
fn decode_id(row: &SqliteRow, column: &str) -> sqlx::Result<NodeId> {
    let id_str: &str = row.try_get(column)?;
    Ok(NodeId::try_from(id_str)?)
}

#[cfg(feature = "service")]
impl FromRow<'_, SqliteRow> for TestRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let created_by: String = row.try_get("created_by")?;
        let status_str: &str = row.try_get("status")?;
        Ok(TestRecord {
            id: decode_id(row, "id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            created_by: UserId(created_by),
            availability_start: row.try_get("availability_start")?,
            availability_end: row.try_get("availability_end")?,
            total_duration: row.try_get("total_duration")?,
            shuffle_questions: row.try_get("shuffle_questions")?,
            allow_section_nav: row.try_get("allow_section_nav")?,
            negative_marking: row.try_get("negative_marking")?,
            show_results_instant: row.try_get("show_results_instant")?,
            status: TestStatus::from_str(status_str)?,
            revision: row.try_get("revision")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[cfg(feature = "service")]
impl FromRow<'_, SqliteRow> for SectionRow {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(SectionRow {
            id: decode_id(row, "id")?,
            test_id: decode_id(row, "test_id")?,
            title: row.try_get("title")?,
            duration: row.try_get("duration")?,
            default_positive_marks: row.try_get("default_positive_marks")?,
            default_negative_marks: row.try_get("default_negative_marks")?,
            position: row.try_get("position")?,
        })
    }
}

#[cfg(feature = "service")]
impl FromRow<'_, SqliteRow> for QuestionRow {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let kind_str: &str = row.try_get("kind")?;
        Ok(QuestionRow {
            id: decode_id(row, "id")?,
            section_id: decode_id(row, "section_id")?,
            kind: QuestionKind::from_str(kind_str)?,
            text: row.try_get("text")?,
            correct_answer: row.try_get("correct_answer")?,
            positive_marks: row.try_get("positive_marks")?,
            negative_marks: row.try_get("negative_marks")?,
            position: row.try_get("position")?,
        })
    }
}

#[cfg(feature = "service")]
impl FromRow<'_, SqliteRow> for OptionRow {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(OptionRow {
            id: decode_id(row, "id")?,
            question_id: decode_id(row, "question_id")?,
            text: row.try_get("text")?,
            is_correct: row.try_get("is_correct")?,
            position: row.try_get("position")?,
        })
    }
}
