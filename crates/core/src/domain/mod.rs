pub mod applicant;
pub mod party;
pub mod report;
pub mod tracking;
