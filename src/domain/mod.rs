//! Domain layer: persistent entities and the rules that hold for them
//! regardless of transport or storage.

pub mod entities;
pub mod error;
pub mod posts;
pub mod slug;
