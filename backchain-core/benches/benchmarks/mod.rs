pub mod queries;
pub mod runner;
