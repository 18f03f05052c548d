//! Tests for SyncPlan construction against in-memory trees

use super::helpers::*;
use crate::{
    event::{TreeEvent, Upsert},
    nodekey::NodeKey,
    payload::{QuestionBody, Snapshot},
    plan::{LevelCounts, SyncPlan},
    properties::{NodeId, QuestionKind},
};
use serde_json::json;
use std::collections::BTreeSet;
use test_log::test;

fn removed_ids(event: &TreeEvent) -> &[NodeId] {
    match event {
        TreeEvent::OptionsRemoved(ids)
        | TreeEvent::QuestionsRemoved(ids)
        | TreeEvent::SectionsRemoved(ids) => ids,
        other => panic!("expected a delete event, got {other}"),
    }
}

#[test]
fn test_resending_canonical_tree_plans_nothing() {
    let tree = three_section_tree();
    let snapshot = Snapshot::from_tree(&tree);
    let plan = SyncPlan::new(tree.test.id, &tree.sections, &snapshot);

    assert!(plan.is_empty(), "unexpected events: {:?}", plan.events().collect::<Vec<_>>());
    assert_eq!(plan.summary.changes(), 0);
    assert_eq!(plan.summary.sections.unchanged, 3);
    assert_eq!(plan.summary.questions.unchanged, 6);
    assert_eq!(plan.summary.options.unchanged, 6);
}

#[test]
fn test_all_ephemeral_snapshot_creates_linked_tree() {
    let test_id = NodeId::new();
    let snapshot = Snapshot::from_value(json!({
        "sections": [
            { "id": "temp-1", "title": "Part A", "questions": [
                { "id": "temp-q-1", "type": "mcq", "text": "2+2?", "options": [
                    { "id": "temp-opt-1-0", "text": "4", "isCorrect": true },
                    { "id": "temp-opt-1-1", "text": "5", "isCorrect": false }
                ]}
            ]},
            { "id": "temp-1", "title": "Part B", "questions": [] }
        ]
    }))
    .unwrap();

    let plan = SyncPlan::new(test_id, &[], &snapshot);
    assert!(plan.deletes.is_empty());
    assert_eq!(plan.upserts.len(), 5);
    assert_eq!(
        plan.summary.sections,
        LevelCounts { created: 2, ..Default::default() }
    );

    let TreeEvent::SectionUpsert(Upsert::Create, part_a) = &plan.upserts[0] else {
        panic!("sections are upserted first");
    };
    let TreeEvent::SectionUpsert(Upsert::Create, part_b) = &plan.upserts[1] else {
        panic!("sections are upserted first");
    };
    assert_eq!(part_a.test_id, test_id);
    assert_eq!(part_a.position, 0);
    assert_eq!(part_b.position, 1);
    // A repeated placeholder is still two nodes.
    assert_ne!(part_a.id, part_b.id);

    let TreeEvent::QuestionUpsert(Upsert::Create, question) = &plan.upserts[2] else {
        panic!("questions follow sections");
    };
    assert_eq!(question.section_id, part_a.id);
    assert_eq!(question.kind, QuestionKind::Mcq);

    for event in &plan.upserts[3..] {
        let TreeEvent::OptionUpsert(Upsert::Create, option) = event else {
            panic!("options come last");
        };
        assert_eq!(option.question_id, question.id);
    }

    let ids: BTreeSet<NodeId> = plan.events().filter_map(TreeEvent::upsert_id).collect();
    assert_eq!(ids.len(), 5);
}

#[test]
fn test_absent_section_is_deleted_with_subtree_children_first() {
    let tree = three_section_tree();
    let section_b = &tree.sections[1];
    let mut snapshot = Snapshot::from_tree(&tree);
    snapshot.sections.remove(1);

    let plan = SyncPlan::new(tree.test.id, &tree.sections, &snapshot);

    assert_eq!(plan.deletes.len(), 3);
    assert!(matches!(plan.deletes[0], TreeEvent::OptionsRemoved(_)));
    assert!(matches!(plan.deletes[1], TreeEvent::QuestionsRemoved(_)));
    assert!(matches!(plan.deletes[2], TreeEvent::SectionsRemoved(_)));
    assert_eq!(removed_ids(&plan.deletes[2]), &[section_b.id]);
    let removed_questions: BTreeSet<NodeId> =
        removed_ids(&plan.deletes[1]).iter().copied().collect();
    let b_questions: BTreeSet<NodeId> = section_b.questions.iter().map(|q| q.id).collect();
    assert_eq!(removed_questions, b_questions);
    assert_eq!(removed_ids(&plan.deletes[0]).len(), 2);

    // C moved from position 2 to 1; A is untouched.
    assert_eq!(plan.upserts.len(), 1);
    let TreeEvent::SectionUpsert(Upsert::Update, row) = &plan.upserts[0] else {
        panic!("expected C to be repositioned");
    };
    assert_eq!(row.id, tree.sections[2].id);
    assert_eq!(row.position, 1);

    assert_eq!(plan.summary.sections.deleted, 1);
    assert_eq!(plan.summary.sections.updated, 1);
    assert_eq!(plan.summary.questions.deleted, 2);
    assert_eq!(plan.summary.options.deleted, 2);
}

#[test]
fn test_unknown_persisted_id_is_created_not_adopted() {
    let tree = three_section_tree();
    let foreign = NodeId::new();
    let snapshot = Snapshot::from_value(json!({
        "sections": [{ "id": foreign.to_string(), "title": "Imported" }]
    }))
    .unwrap();
    assert_eq!(snapshot.sections[0].key, NodeKey::Persisted(foreign));

    let plan = SyncPlan::new(tree.test.id, &tree.sections, &snapshot);
    let created: Vec<_> = plan
        .upserts
        .iter()
        .filter_map(|event| match event {
            TreeEvent::SectionUpsert(Upsert::Create, row) => Some(row),
            _ => None,
        })
        .collect();
    assert_eq!(created.len(), 1);
    assert_ne!(created[0].id, foreign);
    assert_eq!(plan.summary.sections.deleted, 3);
}

#[test]
fn test_text_type_clears_stored_options() {
    let tree = three_section_tree();
    let mcq = &tree.sections[0].questions[0];
    let mut snapshot = Snapshot::from_tree(&tree);
    snapshot.sections[0].questions[0].body = QuestionBody::FreeText {
        correct_answer: None,
    };

    let plan = SyncPlan::new(tree.test.id, &tree.sections, &snapshot);

    assert_eq!(plan.deletes.len(), 1);
    let removed: BTreeSet<NodeId> = removed_ids(&plan.deletes[0]).iter().copied().collect();
    let expected: BTreeSet<NodeId> = mcq.options.iter().map(|o| o.id).collect();
    assert_eq!(removed, expected);

    assert_eq!(plan.upserts.len(), 1);
    let TreeEvent::QuestionUpsert(Upsert::Update, row) = &plan.upserts[0] else {
        panic!("expected the question itself to be rewritten");
    };
    assert_eq!(row.id, mcq.id);
    assert_eq!(row.kind, QuestionKind::Text);
    assert_eq!(row.correct_answer, None);
}

#[test]
fn test_question_moved_between_sections_is_recreated() {
    let tree = three_section_tree();
    let moved = tree.sections[0].questions[0].clone();
    let mut snapshot = Snapshot::from_tree(&tree);
    let draft = snapshot.sections[0].questions.remove(0);
    snapshot.sections[1].questions.push(draft);

    let plan = SyncPlan::new(tree.test.id, &tree.sections, &snapshot);

    let deleted_questions: Vec<NodeId> = plan
        .deletes
        .iter()
        .filter(|e| matches!(e, TreeEvent::QuestionsRemoved(_)))
        .flat_map(|e| removed_ids(e).to_vec())
        .collect();
    assert_eq!(deleted_questions, vec![moved.id]);

    let created = plan
        .upserts
        .iter()
        .find_map(|event| match event {
            TreeEvent::QuestionUpsert(Upsert::Create, row) => Some(row),
            _ => None,
        })
        .expect("moved question is created under its new section");
    assert_ne!(created.id, moved.id);
    assert_eq!(created.section_id, tree.sections[1].id);
    assert_eq!(created.position, 2);

    // Its options were never stored under the new question, so they are created too.
    assert_eq!(plan.summary.options.created, 2);
    assert_eq!(plan.summary.options.deleted, 2);
}

#[test]
fn test_reordering_updates_positions_only() {
    let tree = three_section_tree();
    let mut snapshot = Snapshot::from_tree(&tree);
    snapshot.sections.swap(0, 1);

    let plan = SyncPlan::new(tree.test.id, &tree.sections, &snapshot);

    assert!(plan.deletes.is_empty());
    assert_eq!(plan.summary.sections.updated, 2);
    assert_eq!(plan.summary.sections.unchanged, 1);
    assert_eq!(plan.summary.questions.changes(), 0);
    for event in &plan.upserts {
        let TreeEvent::SectionUpsert(Upsert::Update, row) = event else {
            panic!("only sections should change, got {event}");
        };
        let expected = if row.id == tree.sections[0].id { 1 } else { 0 };
        assert_eq!(row.position, expected);
    }
}

#[test]
fn test_missing_section_marks_fall_back_to_defaults_on_update() {
    let test_id = NodeId::new();
    let mut section = stored_section(test_id, "Weighted", 0, |_| Vec::new());
    section.default_positive_marks = 4.0;
    section.default_negative_marks = 1.0;
    let tree = stored_tree(test_id, vec![section.clone()]);

    let snapshot = Snapshot::from_value(json!({
        "sections": [{ "id": section.id.to_string(), "title": "Weighted" }]
    }))
    .unwrap();
    let plan = SyncPlan::new(test_id, &tree.sections, &snapshot);

    let TreeEvent::SectionUpsert(Upsert::Update, row) = &plan.upserts[0] else {
        panic!("expected an update");
    };
    assert_eq!(row.default_positive_marks, 1.0);
    assert_eq!(row.default_negative_marks, 0.0);
}

#[test]
fn test_absent_option_of_kept_question_is_removed_last() {
    let tree = three_section_tree();
    let mcq = &tree.sections[2].questions[0];
    let dropped = mcq.options[1].id;
    let mut snapshot = Snapshot::from_tree(&tree);
    match &mut snapshot.sections[2].questions[0].body {
        QuestionBody::SingleChoice(options) => {
            options.remove(1);
            options[0].text = "rewritten".to_string();
        }
        other => panic!("fixture question should be mcq, got {other:?}"),
    }
    // A whole section goes too, so the option bucket has to come after the cascade.
    snapshot.sections.remove(0);

    let plan = SyncPlan::new(tree.test.id, &tree.sections, &snapshot);

    let last = plan.deletes.last().expect("deletes planned");
    assert!(matches!(last, TreeEvent::OptionsRemoved(_)));
    assert_eq!(removed_ids(last), &[dropped]);
    assert!(matches!(plan.deletes[2], TreeEvent::SectionsRemoved(_)));

    let TreeEvent::OptionUpsert(Upsert::Update, row) = plan.upserts.last().unwrap() else {
        panic!("the kept option is rewritten after every section and question");
    };
    assert_eq!(row.id, mcq.options[0].id);
    assert_eq!(row.question_id, mcq.id);
    assert_eq!(row.text, "rewritten");
    assert_eq!(plan.summary.options.updated, 1);
    // Two from the removed section, one from the kept question.
    assert_eq!(plan.summary.options.deleted, 3);
}
