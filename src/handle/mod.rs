//! Host-side handles to native worlds and bodies
//!
//! A [`WorldHandle`] is the only owner of a native world. [`BodyHandle`]s
//! borrow its liveness through shared state and revalidate on every access.

mod body;
mod world;

pub use body::BodyHandle;
pub use world::WorldHandle;
