//! Quaderno: a small multi-author blog with groups, comments, and a
//! time-boxed cache over the global feed.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
