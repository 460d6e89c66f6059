pub mod runner;
pub mod show;
