//! Shared named state and the wait/signal registry behind it.

pub mod scope;
pub mod store;

pub use scope::{keys, NamedState, Scope};
pub use store::StateStore;
