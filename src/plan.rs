//! # Diff planner
//!
//! [SyncPlan::new] compares the hierarchy currently stored for a Test with an incoming
//! [Snapshot] and produces the ordered list of [TreeEvent]s that makes storage match the
//! snapshot. It does no I/O; [crate::db::SyncTransaction] applies the result.
//!
//! ## Rules
//!
//! - Each level is diffed per parent. A child is an update only if its id is a stored id *of
//!   that parent* (see [crate::nodekey::classify]); anything else is a create and gets a fresh
//!   [NodeId] here, so children of created parents can reference it.
//! - Deletion is absence-driven: a stored child missing from its parent's list in the snapshot
//!   is deleted together with its descendants.
//! - A question whose incoming type is free-text loses every stored option, whatever the payload
//!   said about options.
//! - Array position becomes the persisted `position` of each node.
//! - Updates whose row would be written back unchanged are dropped from the plan, so resending
//!   a snapshot produces no writes below the root.
//!
//! ## Event order
//!
//! Deletes run children-first:
//!
//! 1. options, then questions, of removed sections; then the sections
//! 2. options of removed questions in surviving sections; then those questions
//! 3. removed options of surviving questions
//!
//! Upserts run parents-first: every section, then every question, then every option.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    event::{TreeEvent, Upsert},
    nodekey::{classify, Disposition, NodeKey},
    payload::{OptionDraft, QuestionBody, QuestionDraft, SectionDraft, Snapshot},
    properties::{NodeId, OptionNode, OptionRow, QuestionNode, QuestionRow, SectionNode, SectionRow},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

impl LevelCounts {
    fn record(&mut self, op: Option<Upsert>) {
        match op {
            Some(Upsert::Create) => self.created += 1,
            Some(Upsert::Update) => self.updated += 1,
            None => self.unchanged += 1,
        }
    }

    pub fn changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Per-level tally of what a plan does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub sections: LevelCounts,
    pub questions: LevelCounts,
    pub options: LevelCounts,
}

impl SyncSummary {
    pub fn changes(&self) -> usize {
        self.sections.changes() + self.questions.changes() + self.options.changes()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncPlan {
    pub test_id: NodeId,
    pub deletes: Vec<TreeEvent>,
    pub upserts: Vec<TreeEvent>,
    pub summary: SyncSummary,
}

impl SyncPlan {
    pub fn new(test_id: NodeId, existing: &[SectionNode], incoming: &Snapshot) -> SyncPlan {
        let mut builder = PlanBuilder::default();
        builder.plan_sections(test_id, existing, &incoming.sections);
        builder.finish(test_id)
    }

    /// Deletes first, then upserts, in execution order.
    pub fn events(&self) -> impl Iterator<Item = &TreeEvent> {
        self.deletes.iter().chain(self.upserts.iter())
    }

    pub fn len(&self) -> usize {
        self.deletes.len() + self.upserts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct DeleteBuckets {
    section_options: Vec<NodeId>,
    section_questions: Vec<NodeId>,
    sections: Vec<NodeId>,
    question_options: Vec<NodeId>,
    questions: Vec<NodeId>,
    options: Vec<NodeId>,
}

impl DeleteBuckets {
    fn cascade_section(&mut self, section: &SectionNode) {
        for question in &section.questions {
            self.section_options
                .extend(question.options.iter().map(|o| o.id));
            self.section_questions.push(question.id);
        }
        self.sections.push(section.id);
    }

    fn cascade_question(&mut self, question: &QuestionNode) {
        self.question_options
            .extend(question.options.iter().map(|o| o.id));
        self.questions.push(question.id);
    }

    fn into_events(self) -> Vec<TreeEvent> {
        [
            TreeEvent::OptionsRemoved(self.section_options),
            TreeEvent::QuestionsRemoved(self.section_questions),
            TreeEvent::SectionsRemoved(self.sections),
            TreeEvent::OptionsRemoved(self.question_options),
            TreeEvent::QuestionsRemoved(self.questions),
            TreeEvent::OptionsRemoved(self.options),
        ]
        .into_iter()
        .filter(|event| match event {
            TreeEvent::OptionsRemoved(ids)
            | TreeEvent::QuestionsRemoved(ids)
            | TreeEvent::SectionsRemoved(ids) => !ids.is_empty(),
            _ => true,
        })
        .collect()
    }
}

#[derive(Default)]
struct PlanBuilder {
    deletes: DeleteBuckets,
    sections: Vec<TreeEvent>,
    questions: Vec<TreeEvent>,
    options: Vec<TreeEvent>,
    summary: SyncSummary,
}

/// Classify every draft against the ids stored under one parent. Returns the dispositions in
/// draft order and the set of stored ids that survive.
fn classify_level(
    keys: impl Iterator<Item = NodeKey>,
    known: &BTreeSet<NodeId>,
) -> (Vec<Disposition>, BTreeSet<NodeId>) {
    let dispositions: Vec<Disposition> = keys.map(|key| classify(&key, known)).collect();
    let kept = dispositions
        .iter()
        .filter_map(|d| match d {
            Disposition::Update(id) => Some(*id),
            Disposition::Create => None,
        })
        .collect();
    (dispositions, kept)
}

/// `Some(op)` when the row needs writing, `None` when an update would change nothing.
fn upsert_op<R: PartialEq>(disposition: Disposition, row: &R, stored: Option<R>) -> Option<Upsert> {
    match disposition {
        Disposition::Create => Some(Upsert::Create),
        Disposition::Update(_) if stored.as_ref() == Some(row) => None,
        Disposition::Update(_) => Some(Upsert::Update),
    }
}

fn resolve_id(disposition: Disposition) -> NodeId {
    match disposition {
        Disposition::Update(id) => id,
        Disposition::Create => NodeId::new(),
    }
}

impl PlanBuilder {
    fn plan_sections(&mut self, test_id: NodeId, existing: &[SectionNode], drafts: &[SectionDraft]) {
        let stored: BTreeMap<NodeId, &SectionNode> = existing.iter().map(|s| (s.id, s)).collect();
        let known = stored.keys().copied().collect();
        let (dispositions, kept) = classify_level(drafts.iter().map(|d| d.key.clone()), &known);

        for section in existing.iter().filter(|s| !kept.contains(&s.id)) {
            self.deletes.cascade_section(section);
        }

        for (position, (draft, disposition)) in drafts.iter().zip(dispositions).enumerate() {
            let current = match disposition {
                Disposition::Update(id) => stored.get(&id).copied(),
                Disposition::Create => None,
            };
            let row = SectionRow {
                id: resolve_id(disposition),
                test_id,
                title: draft.title.clone(),
                duration: draft.duration,
                default_positive_marks: draft.default_positive_marks,
                default_negative_marks: draft.default_negative_marks,
                position: position as i64,
            };
            let op = upsert_op(disposition, &row, current.map(SectionRow::from));
            self.summary.sections.record(op);
            let section_id = row.id;
            if let Some(op) = op {
                self.sections.push(TreeEvent::SectionUpsert(op, row));
            }
            self.plan_questions(section_id, current, &draft.questions);
        }
    }

    fn plan_questions(
        &mut self,
        section_id: NodeId,
        current: Option<&SectionNode>,
        drafts: &[QuestionDraft],
    ) {
        let existing: &[QuestionNode] = current.map(|s| s.questions.as_slice()).unwrap_or(&[]);
        let stored: BTreeMap<NodeId, &QuestionNode> = existing.iter().map(|q| (q.id, q)).collect();
        let known = stored.keys().copied().collect();
        let (dispositions, kept) = classify_level(drafts.iter().map(|d| d.key.clone()), &known);

        for question in existing.iter().filter(|q| !kept.contains(&q.id)) {
            self.deletes.cascade_question(question);
        }

        for (position, (draft, disposition)) in drafts.iter().zip(dispositions).enumerate() {
            let current = match disposition {
                Disposition::Update(id) => stored.get(&id).copied(),
                Disposition::Create => None,
            };
            let row = QuestionRow {
                id: resolve_id(disposition),
                section_id,
                kind: draft.body.kind(),
                text: draft.text.clone(),
                correct_answer: draft.body.correct_answer().map(str::to_string),
                positive_marks: draft.positive_marks,
                negative_marks: draft.negative_marks,
                position: position as i64,
            };
            let op = upsert_op(disposition, &row, current.map(QuestionRow::from));
            self.summary.questions.record(op);
            let question_id = row.id;
            if let Some(op) = op {
                self.questions.push(TreeEvent::QuestionUpsert(op, row));
            }
            self.plan_options(question_id, current, &draft.body);
        }
    }

    fn plan_options(
        &mut self,
        question_id: NodeId,
        current: Option<&QuestionNode>,
        body: &QuestionBody,
    ) {
        let existing: &[OptionNode] = current.map(|q| q.options.as_slice()).unwrap_or(&[]);

        if let QuestionBody::FreeText { .. } = body {
            if !existing.is_empty() {
                tracing::debug!(
                    "[SyncPlan] question {question_id} is free-text, clearing {} options",
                    existing.len()
                );
            }
            self.deletes.options.extend(existing.iter().map(|o| o.id));
            return;
        }

        let drafts: &[OptionDraft] = body.options();
        let stored: BTreeMap<NodeId, &OptionNode> = existing.iter().map(|o| (o.id, o)).collect();
        let known = stored.keys().copied().collect();
        let (dispositions, kept) = classify_level(drafts.iter().map(|d| d.key.clone()), &known);

        self.deletes.options.extend(
            existing
                .iter()
                .filter(|o| !kept.contains(&o.id))
                .map(|o| o.id),
        );

        for (position, (draft, disposition)) in drafts.iter().zip(dispositions).enumerate() {
            let current = match disposition {
                Disposition::Update(id) => stored.get(&id).copied(),
                Disposition::Create => None,
            };
            let row = OptionRow {
                id: resolve_id(disposition),
                question_id,
                text: draft.text.clone(),
                is_correct: draft.is_correct,
                position: position as i64,
            };
            let op = upsert_op(disposition, &row, current.map(OptionRow::from));
            self.summary.options.record(op);
            if let Some(op) = op {
                self.options.push(TreeEvent::OptionUpsert(op, row));
            }
        }
    }

    fn finish(mut self, test_id: NodeId) -> SyncPlan {
        self.summary.sections.deleted = self.deletes.sections.len();
        self.summary.questions.deleted =
            self.deletes.section_questions.len() + self.deletes.questions.len();
        self.summary.options.deleted = self.deletes.section_options.len()
            + self.deletes.question_options.len()
            + self.deletes.options.len();

        let mut upserts = self.sections;
        upserts.extend(self.questions);
        upserts.extend(self.options);

        SyncPlan {
            test_id,
            deletes: self.deletes.into_events(),
            upserts,
            summary: self.summary,
        }
    }
}
