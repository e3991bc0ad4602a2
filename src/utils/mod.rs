// src/utils/mod.rs

pub mod audit;
pub mod client;
pub mod export;
pub mod hash;
pub mod html;
pub mod jwt;
