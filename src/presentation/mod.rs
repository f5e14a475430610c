//! Askama view models and render helpers.

pub mod views;
