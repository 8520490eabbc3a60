//! Quake 3 BSP (v46) walker: map decoder, swept-volume tracer, and CPM movement controller.
//!
//! `common` holds the decoded map and the small shared helpers (plane math, angle math, entity
//! lump parsing); `world` holds everything that operates on a loaded map (the player, the swept
//! tracer, and one tick of movement); `cli` is the host shell that ties the two together behind
//! the `Renderer`/`HostInput` seams so a real windowing backend can be swapped in without either
//! touching the core.

pub mod cli;
pub mod common;
pub mod world;
