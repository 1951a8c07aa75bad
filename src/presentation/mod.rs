// Presentation layer - Command line and reports
pub mod cli;
pub mod report;
