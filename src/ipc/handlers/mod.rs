pub mod assignments;
pub mod backup;
pub mod catalog;
pub mod core;
pub mod gradebook;
pub mod session;
pub mod students;
pub mod teachers;
pub mod years;
