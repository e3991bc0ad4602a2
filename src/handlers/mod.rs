// src/handlers/mod.rs

pub mod admin;
pub mod auth;
pub mod courses;
pub mod examiners;
pub mod exams;
pub mod marking;
pub mod paths;
pub mod reports;
pub mod scores;
pub mod sessions;
pub mod stations;
pub mod students;
pub mod sync;
