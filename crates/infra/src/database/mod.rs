//! SQLite relational store

pub mod code_repository;
pub mod manager;

pub use code_repository::SqliteCodeRepository;
pub use manager::DbManager;
