// src/lib.rs
pub mod config;
pub mod error;
pub mod database;
pub mod collaborators;
pub mod lookup;
pub mod summary;
pub mod pipeline;
