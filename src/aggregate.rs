//! Per-subtopic error/omission index.
//!
//! Counts are always rebuilt from the student's full result history and then
//! swapped in; the index is never incremented in place, so manual edits or
//! deletions of annotation entries cannot make it drift.

use crate::config::AggregationMode;
use crate::db;
use crate::model::{ExamResult, QuestionRef, Subject, SyllabusSubject};
use crate::store::{self, TopicKey};
use crate::syllabus;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

/// (subject, subtopic as written in annotations) -> (topic, subtopic).
pub type SubtopicIndex = HashMap<(Subject, String), (String, String)>;

pub fn build_subtopic_index(tree: &[SyllabusSubject]) -> SubtopicIndex {
    let mut index = SubtopicIndex::new();
    for s in tree {
        for topic in &s.topics {
            for sub in &topic.subtopics {
                let key = (s.subject, sub.trim().to_string());
                // Same subtopic name under two topics: the first one listed wins.
                index
                    .entry(key)
                    .or_insert_with(|| (topic.name.clone(), sub.trim().to_string()));
            }
        }
    }
    index
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    negative: i64,
    unattempted: i64,
}

fn tally_entries<'a>(
    index: &SubtopicIndex,
    subject: Subject,
    entries: impl Iterator<Item = &'a QuestionRef>,
    tallies: &mut HashMap<TopicKey, Tally>,
    bump: fn(&mut Tally),
) -> usize {
    let mut unmatched = 0;
    for q in entries {
        match index.get(&(subject, q.subtopic.trim().to_string())) {
            Some((topic, sub)) => {
                bump(tallies.entry((subject, topic.clone(), sub.clone())).or_default());
            }
            None => unmatched += 1,
        }
    }
    unmatched
}

/// Pure tally over a set of results; entries whose subtopic is not in the
/// index are ignored.
pub fn tally_results(index: &SubtopicIndex, results: &[ExamResult]) -> HashMap<TopicKey, (i64, i64)> {
    let mut tallies: HashMap<TopicKey, Tally> = HashMap::new();
    let mut unmatched = 0;
    for res in results {
        for subject in Subject::ALL {
            let s = res.per_subject.get(subject);
            unmatched += tally_entries(
                index,
                subject,
                s.negative_questions.iter(),
                &mut tallies,
                |t| t.negative += 1,
            );
            unmatched += tally_entries(
                index,
                subject,
                s.unattempted_questions.iter(),
                &mut tallies,
                |t| t.unattempted += 1,
            );
        }
    }
    if unmatched > 0 {
        tracing::debug!(unmatched, "annotation entries with unknown subtopics ignored");
    }
    tallies
        .into_iter()
        .map(|(k, t)| (k, (t.negative, t.unattempted)))
        .collect()
}

/// Full recompute-and-replace of one student's topic counts.
pub fn recompute_topic_status(conn: &Connection, student_id: &str) -> anyhow::Result<usize> {
    let tree = syllabus::load_syllabus(conn)?;
    let index = build_subtopic_index(&tree);
    recompute_with_index(conn, &index, student_id)
}

fn recompute_with_index(conn: &Connection, index: &SubtopicIndex, student_id: &str) -> anyhow::Result<usize> {
    let results = store::list_results_for_student(conn, student_id)?;
    let tallies = tally_results(index, &results);
    store::replace_topic_counts(conn, student_id, &tallies)?;
    tracing::debug!(
        student_id,
        results = results.len(),
        keys = tallies.len(),
        "topic status recomputed"
    );
    Ok(tallies.len())
}

/// Recomputes every student; returns how many were processed. A failure for
/// one student is logged and does not stop the rest.
pub fn recompute_all(conn: &Connection) -> anyhow::Result<usize> {
    let tree = syllabus::load_syllabus(conn)?;
    let index = build_subtopic_index(&tree);
    let ids = store::list_student_ids(conn)?;
    let mut done = 0;
    for id in &ids {
        match recompute_with_index(conn, &index, id) {
            Ok(_) => done += 1,
            Err(e) => tracing::warn!(student_id = %id, error = %format!("{:#}", e), "topic status recompute failed"),
        }
    }
    Ok(done)
}

fn recompute_logged(conn: &Connection, student_ids: &[String]) {
    let index = match syllabus::load_syllabus(conn) {
        Ok(tree) => build_subtopic_index(&tree),
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "could not load syllabus for aggregation");
            return;
        }
    };
    for id in student_ids {
        if let Err(e) = recompute_with_index(conn, &index, id) {
            tracing::warn!(student_id = %id, error = %format!("{:#}", e), "topic status recompute failed");
        }
    }
}

/// Runs aggregation for the given students after a result mutation. Failures
/// are only logged; the triggering write has already succeeded.
///
/// In detached mode the work runs on its own thread and connection and the
/// handle is returned so tests can join it. Detached mode needs a database
/// file; for in-memory stores it falls back to inline.
pub fn schedule_recompute(
    conn: &Connection,
    db_path: Option<&Path>,
    mode: AggregationMode,
    student_ids: Vec<String>,
) -> Option<JoinHandle<()>> {
    if student_ids.is_empty() {
        return None;
    }
    match (mode, db_path) {
        (AggregationMode::Detached, Some(path)) => {
            let path: PathBuf = path.to_path_buf();
            let spawned = std::thread::Builder::new()
                .name("topic-aggregation".into())
                .spawn(move || match db::connect(&path) {
                    Ok(bg) => recompute_logged(&bg, &student_ids),
                    Err(e) => tracing::warn!(error = %format!("{:#}", e), "aggregation connection failed"),
                });
            match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(error = %e, "could not spawn aggregation thread");
                    None
                }
            }
        }
        (AggregationMode::Detached, None) => {
            tracing::debug!("no database file for detached aggregation; running inline");
            recompute_logged(conn, &student_ids);
            None
        }
        (AggregationMode::Inline, _) => {
            recompute_logged(conn, &student_ids);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResultScores, SourceType, StudentInput, SyllabusTopic};

    fn q(n: i64, sub: &str) -> QuestionRef {
        QuestionRef {
            question_number: n,
            subtopic: sub.to_string(),
        }
    }

    fn seed(conn: &Connection) {
        syllabus::seed_syllabus(
            conn,
            &[SyllabusSubject {
                subject: Subject::Chemistry,
                topics: vec![SyllabusTopic {
                    name: "Hydrocarbons".into(),
                    subtopics: vec!["Alkanes".into(), "Alkenes".into()],
                }],
            }],
            false,
        )
        .unwrap();
    }

    fn student_with_result(conn: &Connection) -> (String, String) {
        let s = store::insert_student(
            conn,
            &StudentInput {
                roll_number: "R1".into(),
                name: "A".into(),
                ..StudentInput::default()
            },
            SourceType::Import,
        )
        .unwrap();
        let t = store::find_or_create_test(conn, "T", "2024-01-01", 300)
            .unwrap()
            .into_inner();
        let r = store::insert_result(conn, &s.id, &t.id, &ResultScores::default()).unwrap();
        (s.id, r.id)
    }

    fn counts(conn: &Connection, student_id: &str) -> HashMap<String, (i64, i64)> {
        store::list_topic_status(conn, student_id)
            .unwrap()
            .into_iter()
            .map(|t| (t.subtopic_name, (t.negative_count, t.unattempted_count)))
            .collect()
    }

    #[test]
    fn first_topic_wins_for_duplicate_subtopic_names() {
        let tree = vec![SyllabusSubject {
            subject: Subject::Physics,
            topics: vec![
                SyllabusTopic {
                    name: "Mechanics".into(),
                    subtopics: vec!["Graphs".into()],
                },
                SyllabusTopic {
                    name: "Optics".into(),
                    subtopics: vec!["Graphs".into()],
                },
            ],
        }];
        let index = build_subtopic_index(&tree);
        assert_eq!(
            index.get(&(Subject::Physics, "Graphs".to_string())).unwrap().0,
            "Mechanics"
        );
    }

    #[test]
    fn deleting_an_entry_decrements_only_that_subtopic() {
        let conn = db::open_in_memory().unwrap();
        seed(&conn);
        let (sid, rid) = student_with_result(&conn);
        let negatives = vec![q(3, "Alkenes"), q(9, " Alkenes "), q(11, "Alkanes"), q(14, "Unknown")];
        store::update_result_annotations(&conn, &rid, Subject::Chemistry, Some(&negatives[..]), None, None)
            .unwrap();
        recompute_topic_status(&conn, &sid).unwrap();
        let before = counts(&conn, &sid);
        assert_eq!(before["Alkenes"], (2, 0));
        assert_eq!(before["Alkanes"], (1, 0));
        assert_eq!(before.len(), 2);

        store::update_result_annotations(&conn, &rid, Subject::Chemistry, Some(&negatives[1..]), None, None)
            .unwrap();
        recompute_topic_status(&conn, &sid).unwrap();
        let after = counts(&conn, &sid);
        assert_eq!(after["Alkenes"], (1, 0));
        assert_eq!(after["Alkanes"], before["Alkanes"]);
    }

    #[test]
    fn repeated_recompute_is_stable_and_keeps_completion() {
        let conn = db::open_in_memory().unwrap();
        seed(&conn);
        let (sid, rid) = student_with_result(&conn);
        let unattempted = vec![q(5, "Alkanes")];
        store::update_result_annotations(&conn, &rid, Subject::Chemistry, None, Some(&unattempted[..]), None)
            .unwrap();
        store::set_topic_completed(
            &conn,
            &sid,
            &(Subject::Chemistry, "Hydrocarbons".into(), "Alkanes".into()),
            true,
        )
        .unwrap();

        recompute_topic_status(&conn, &sid).unwrap();
        let first = store::list_topic_status(&conn, &sid).unwrap();
        recompute_topic_status(&conn, &sid).unwrap();
        let second = store::list_topic_status(&conn, &sid).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].unattempted_count, second[0].unattempted_count);
        assert!(second[0].is_completed);
    }

    #[test]
    fn cleared_annotations_reset_counts_to_zero() {
        let conn = db::open_in_memory().unwrap();
        seed(&conn);
        let (sid, rid) = student_with_result(&conn);
        let negatives = vec![q(1, "Alkenes")];
        store::update_result_annotations(&conn, &rid, Subject::Chemistry, Some(&negatives[..]), None, None)
            .unwrap();
        schedule_recompute(&conn, None, AggregationMode::Inline, vec![sid.clone()]);
        store::update_result_annotations(&conn, &rid, Subject::Chemistry, Some(&[][..]), None, None).unwrap();
        schedule_recompute(&conn, None, AggregationMode::Detached, vec![sid.clone()]);
        assert_eq!(counts(&conn, &sid)["Alkenes"], (0, 0));
    }
}
