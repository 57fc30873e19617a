//! Repository implementations for SQLite storage

pub mod login_attempt;

pub use login_attempt::SqliteLoginAttemptRepository;
