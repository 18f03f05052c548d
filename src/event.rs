use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::properties::{NodeId, OptionRow, QuestionRow, SectionRow};

/// Whether an upsert inserts a fresh row or rewrites an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Upsert {
    Create,
    Update,
}

/// One storage mutation produced by [crate::plan::SyncPlan]. Ids in upserts are always real:
/// creates carry the id minted for them at plan time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeEvent {
    OptionsRemoved(Vec<NodeId>),
    QuestionsRemoved(Vec<NodeId>),
    SectionsRemoved(Vec<NodeId>),
    SectionUpsert(Upsert, SectionRow),
    QuestionUpsert(Upsert, QuestionRow),
    OptionUpsert(Upsert, OptionRow),
}

impl TreeEvent {
    /// Id of the row being written, for upserts.
    pub fn upsert_id(&self) -> Option<NodeId> {
        match self {
            TreeEvent::SectionUpsert(_, row) => Some(row.id),
            TreeEvent::QuestionUpsert(_, row) => Some(row.id),
            TreeEvent::OptionUpsert(_, row) => Some(row.id),
            _ => None,
        }
    }
}

impl Display for TreeEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            TreeEvent::OptionsRemoved(ids) => write!(f, "OptionsRemoved({})", ids.len()),
            TreeEvent::QuestionsRemoved(ids) => write!(f, "QuestionsRemoved({})", ids.len()),
            TreeEvent::SectionsRemoved(ids) => write!(f, "SectionsRemoved({})", ids.len()),
            TreeEvent::SectionUpsert(op, row) => write!(f, "SectionUpsert({op:?}, {})", row.id),
            TreeEvent::QuestionUpsert(op, row) => write!(
                f,
                "QuestionUpsert({op:?}, {} [{}] in {})",
                row.id, row.kind, row.section_id
            ),
            TreeEvent::OptionUpsert(op, row) => {
                write!(f, "OptionUpsert({op:?}, {} in {})", row.id, row.question_id)
            }
        }
    }
}
