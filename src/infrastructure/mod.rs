//! Infrastructure adapters and services

pub mod embedding;
pub mod kv;
pub mod observability;
pub mod services;
pub mod vector;
