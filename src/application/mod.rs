//! Application services layer.

pub mod error;
pub mod feed;
pub mod pagination;
pub mod posts;
pub mod repos;
pub mod sessions;
