use crate::db;
use crate::model::{Subject, SyllabusSubject, SyllabusTopic};
use crate::store::now_string;
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;

/// Settings key holding the persisted "syllabus has been seeded" marker.
pub const SEEDED_MARKER_KEY: &str = "syllabus.seeded";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// True when the tree was written by this call.
    pub seeded: bool,
    pub subject_count: usize,
    pub topic_count: usize,
    pub subtopic_count: usize,
}

pub fn is_seeded(conn: &Connection) -> anyhow::Result<bool> {
    Ok(db::settings_get_json(conn, SEEDED_MARKER_KEY)?.is_some())
}

/// Full subject -> topic -> subtopic tree in display order.
pub fn load_syllabus(conn: &Connection) -> anyhow::Result<Vec<SyllabusSubject>> {
    let mut by_subject: BTreeMap<Subject, Vec<SyllabusTopic>> = BTreeMap::new();

    let mut stmt = conn.prepare(
        "SELECT subject, topic_name FROM syllabus_topics ORDER BY subject, sort_order, topic_name",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(r) = rows.next()? {
        let subject_raw: String = r.get(0)?;
        let Some(subject) = Subject::parse(&subject_raw) else {
            continue;
        };
        by_subject.entry(subject).or_default().push(SyllabusTopic {
            name: r.get(1)?,
            subtopics: Vec::new(),
        });
    }

    let mut stmt = conn.prepare(
        "SELECT subject, topic_name, subtopic_name FROM syllabus_subtopics
         ORDER BY subject, topic_name, sort_order, subtopic_name",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(r) = rows.next()? {
        let subject_raw: String = r.get(0)?;
        let Some(subject) = Subject::parse(&subject_raw) else {
            continue;
        };
        let topic_name: String = r.get(1)?;
        let subtopic: String = r.get(2)?;
        if let Some(topic) = by_subject
            .get_mut(&subject)
            .and_then(|topics| topics.iter_mut().find(|t| t.name == topic_name))
        {
            topic.subtopics.push(subtopic);
        }
    }

    Ok(by_subject
        .into_iter()
        .map(|(subject, topics)| SyllabusSubject { subject, topics })
        .collect())
}

/// Writes the syllabus tree. Once seeded, later calls are no-ops unless
/// `replace` is set, in which case the stored tree is swapped wholesale.
pub fn seed_syllabus(
    conn: &Connection,
    subjects: &[SyllabusSubject],
    replace: bool,
) -> anyhow::Result<SeedReport> {
    if !replace && is_seeded(conn)? {
        tracing::info!("syllabus already seeded; skipping");
        return Ok(SeedReport::default());
    }

    let mut report = SeedReport {
        seeded: true,
        ..SeedReport::default()
    };
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM syllabus_subtopics", [])?;
    tx.execute("DELETE FROM syllabus_topics", [])?;
    for s in subjects {
        report.subject_count += 1;
        for (ti, topic) in s.topics.iter().enumerate() {
            let topic_name = topic.name.trim();
            if topic_name.is_empty() {
                continue;
            }
            let inserted = tx.execute(
                "INSERT INTO syllabus_topics(subject, topic_name, sort_order) VALUES(?, ?, ?)
                 ON CONFLICT(subject, topic_name) DO NOTHING",
                (s.subject.as_str(), topic_name, ti as i64),
            )?;
            report.topic_count += inserted;
            for (si, sub) in topic.subtopics.iter().enumerate() {
                let sub = sub.trim();
                if sub.is_empty() {
                    continue;
                }
                report.subtopic_count += tx.execute(
                    "INSERT INTO syllabus_subtopics(subject, topic_name, subtopic_name, sort_order)
                     VALUES(?, ?, ?, ?)
                     ON CONFLICT(subject, topic_name, subtopic_name) DO NOTHING",
                    (s.subject.as_str(), topic_name, sub, si as i64),
                )?;
            }
        }
    }
    db::settings_set_json(
        &tx,
        SEEDED_MARKER_KEY,
        &json!({
            "seededAt": now_string(),
            "subjects": report.subject_count,
            "topics": report.topic_count,
            "subtopics": report.subtopic_count,
        }),
    )?;
    tx.commit()?;
    tracing::info!(
        subjects = report.subject_count,
        topics = report.topic_count,
        subtopics = report.subtopic_count,
        "syllabus seeded"
    );
    Ok(report)
}
