pub mod backup_exchange;
pub mod core;
pub mod results;
pub mod setup;
pub mod students;
