//! Context assembly for one model call: build, then reconcile citations.

pub mod builder;
pub mod reconcile;

pub use builder::{BuiltContext, ContextBuilder};
pub use reconcile::{Reconciled, reconcile};
