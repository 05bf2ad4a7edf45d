use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subject {
    Physics,
    Chemistry,
    Maths,
}

impl Subject {
    pub const ALL: [Subject; 3] = [Subject::Physics, Subject::Chemistry, Subject::Maths];

    pub fn as_str(self) -> &'static str {
        match self {
            Subject::Physics => "physics",
            Subject::Chemistry => "chemistry",
            Subject::Maths => "maths",
        }
    }

    /// Accepts the stored key plus the usual short forms found in syllabus
    /// sheets and column prefixes.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "physics" | "phy" => Some(Subject::Physics),
            "chemistry" | "chem" => Some(Subject::Chemistry),
            "maths" | "math" | "mathematics" => Some(Subject::Maths),
            _ => None,
        }
    }

    /// Prefix of this subject's canonical spreadsheet columns (`Phy-R` etc).
    pub fn column_prefix(self) -> &'static str {
        match self {
            Subject::Physics => "Phy",
            Subject::Chemistry => "Chem",
            Subject::Maths => "Math",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    pub id: String,
    pub name: String,
    pub date: String,
    pub max_marks: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Import,
    Manual,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Import => "import",
            SourceType::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("manual") {
            SourceType::Manual
        } else {
            SourceType::Import
        }
    }
}

/// Optional free-text columns that may accompany a result row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    #[serde(default)]
    pub parent_name: Option<String>,
    #[serde(default)]
    pub parent_occupation: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub contact_number: Option<String>,
    #[serde(default)]
    pub general_remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub roll_number: String,
    pub name: String,
    pub batch: String,
    #[serde(flatten)]
    pub profile: StudentProfile,
    pub source_type: SourceType,
}

/// Student fields read from one spreadsheet row (or a manual create request).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentInput {
    pub roll_number: String,
    pub name: String,
    pub batch: String,
    pub profile: StudentProfile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRef {
    pub question_number: i64,
    pub subtopic: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectScores {
    pub right: i64,
    pub wrong: i64,
    pub unattempted: i64,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectResult {
    #[serde(flatten)]
    pub scores: SubjectScores,
    #[serde(default)]
    pub unattempted_questions: Vec<QuestionRef>,
    #[serde(default)]
    pub negative_questions: Vec<QuestionRef>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub correct: i64,
    pub wrong: i64,
    pub unattempted: i64,
    pub score: f64,
    pub percentage: f64,
    pub rank: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerSubject {
    pub physics: SubjectResult,
    pub chemistry: SubjectResult,
    pub maths: SubjectResult,
}

impl PerSubject {
    pub fn get(&self, subject: Subject) -> &SubjectResult {
        match subject {
            Subject::Physics => &self.physics,
            Subject::Chemistry => &self.chemistry,
            Subject::Maths => &self.maths,
        }
    }

    pub fn get_mut(&mut self, subject: Subject) -> &mut SubjectResult {
        match subject {
            Subject::Physics => &mut self.physics,
            Subject::Chemistry => &mut self.chemistry,
            Subject::Maths => &mut self.maths,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
    pub id: String,
    pub student_id: String,
    pub test_id: String,
    pub totals: Totals,
    pub per_subject: PerSubject,
    pub remarks: String,
}

/// Numeric part of a result row as parsed from the spreadsheet.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResultScores {
    pub totals: Totals,
    pub physics: SubjectScores,
    pub chemistry: SubjectScores,
    pub maths: SubjectScores,
}

impl ResultScores {
    pub fn subject(&self, subject: Subject) -> &SubjectScores {
        match subject {
            Subject::Physics => &self.physics,
            Subject::Chemistry => &self.chemistry,
            Subject::Maths => &self.maths,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyllabusTopic {
    pub name: String,
    #[serde(default)]
    pub subtopics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyllabusSubject {
    pub subject: Subject,
    #[serde(default)]
    pub topics: Vec<SyllabusTopic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicStatus {
    pub student_id: String,
    pub subject: Subject,
    pub topic_name: String,
    pub subtopic_name: String,
    pub negative_count: i64,
    pub unattempted_count: i64,
    pub is_completed: bool,
    pub updated_at: Option<String>,
}
