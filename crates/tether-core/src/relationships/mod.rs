//! # Relationship State Machine
//!
//! Per-relationship state tracking membership, dirtiness and load status,
//! plus the graph that keeps both sides of every declared inverse in sync.
//!
//! ## States
//!
//! ```text
//! NotLoaded ──fetch──> Loading ──ok──> Loaded
//!     │                   └──err──> (prior state)
//!     └──push null / empty list──> Empty
//! ```
//!
//! Dirtiness is orthogonal: a relationship is dirty whenever its current
//! value diverges from its canonical value.

mod graph;
mod state;

pub use graph::{GraphContext, RelationshipGraph};
pub use state::{BelongsToState, HasManyState, RelationshipState};
