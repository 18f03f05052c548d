//! Shared fixtures for planner tests

use crate::{
    properties::{
        NodeId, OptionNode, QuestionKind, QuestionNode, SectionNode, TestRecord, TestStatus,
        TestTree, UserId,
    },
};

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn stored_option(question_id: NodeId, text: &str, is_correct: bool, position: i64) -> OptionNode {
    OptionNode {
        id: NodeId::new(),
        question_id,
        text: text.to_string(),
        is_correct,
        position,
    }
}

/// A stored `mcq` question with options `a`, `b`, ... where the first is correct.
pub fn stored_mcq(section_id: NodeId, text: &str, option_count: usize, position: i64) -> QuestionNode {
    let id = NodeId::new();
    let options = (0..option_count)
        .map(|i| {
            let label = ((b'a' + i as u8) as char).to_string();
            stored_option(id, &label, i == 0, i as i64)
        })
        .collect();
    QuestionNode {
        id,
        section_id,
        kind: QuestionKind::Mcq,
        text: text.to_string(),
        correct_answer: None,
        positive_marks: None,
        negative_marks: None,
        position,
        options,
    }
}

pub fn stored_text_question(section_id: NodeId, text: &str, position: i64) -> QuestionNode {
    QuestionNode {
        id: NodeId::new(),
        section_id,
        kind: QuestionKind::Text,
        text: text.to_string(),
        correct_answer: Some("answer".to_string()),
        positive_marks: Some(2.0),
        negative_marks: None,
        position,
        options: Vec::new(),
    }
}

/// A stored section whose questions are built by `questions` from the new section's id.
pub fn stored_section(
    test_id: NodeId,
    title: &str,
    position: i64,
    questions: impl FnOnce(NodeId) -> Vec<QuestionNode>,
) -> SectionNode {
    let id = NodeId::new();
    SectionNode {
        id,
        test_id,
        title: title.to_string(),
        duration: None,
        default_positive_marks: 1.0,
        default_negative_marks: 0.0,
        position,
        questions: questions(id),
    }
}

pub fn stored_tree(test_id: NodeId, sections: Vec<SectionNode>) -> TestTree {
    init_logging();
    TestTree {
        test: TestRecord {
            id: test_id,
            title: "Fixture".to_string(),
            description: None,
            created_by: UserId::new("fixture-author").unwrap(),
            availability_start: None,
            availability_end: None,
            total_duration: None,
            shuffle_questions: false,
            allow_section_nav: true,
            negative_marking: false,
            show_results_instant: false,
            status: TestStatus::Draft,
            revision: 1,
            created_at: 0,
            updated_at: 0,
        },
        sections,
    }
}

/// Three sections `A`, `B`, `C`; each holds one mcq with two options and one text question.
pub fn three_section_tree() -> TestTree {
    let test_id = NodeId::new();
    let sections = ["A", "B", "C"]
        .iter()
        .enumerate()
        .map(|(i, title)| {
            stored_section(test_id, title, i as i64, |section_id| {
                vec![
                    stored_mcq(section_id, &format!("{title} choice"), 2, 0),
                    stored_text_question(section_id, &format!("{title} essay"), 1),
                ]
            })
        })
        .collect();
    stored_tree(test_id, sections)
}
