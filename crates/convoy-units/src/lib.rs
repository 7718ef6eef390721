//! Convoy unit graph builder.
//!
//! Compiles a task group into ordered [`UnitChain`]s for one scaling group:
//! proxy and volume sidekicks, the main container unit, and an optional
//! timer, with ordering, restart coupling, and co-location applied across
//! the group. A [`Renderer`] turns units into content addressed
//! [`UnitData`] for a scheduler backend.
//!
//! # Components
//!
//! - **`builder`**: per task and per group unit construction
//! - **`placement`**: machine metadata, conflicts, machine pins
//! - **`registry`**: front-end and metrics registration commands
//! - **`render`**: systemd rendering and content hashing
//! - **`generator`**: job level generation over selected groups

pub mod builder;
pub mod context;
pub mod error;
pub mod generator;
pub mod placement;
pub mod registry;
pub mod render;
pub mod unit;

pub use builder::build_group;
pub use context::GeneratorContext;
pub use error::{BuildError, BuildResult};
pub use generator::{GroupSelection, generate, generate_units};
pub use render::{Renderer, SystemdRenderer, UnitData};
pub use unit::{Unit, UnitChain, UnitKind, UnitNaming, UnitRole, in_scaling_group};
