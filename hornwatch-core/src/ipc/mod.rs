//! Types serialised over the command surface.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so the HTTP
//! host can return them as JSON unchanged.

pub mod events;
