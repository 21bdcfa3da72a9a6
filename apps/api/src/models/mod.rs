pub mod layout;
pub mod report;
