pub mod core;
pub mod exams;
pub mod results;
pub mod setup;
pub mod students;
pub mod syllabus;
pub mod topics;
