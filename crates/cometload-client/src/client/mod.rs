// Per-identity client state and the registry that owns it.
pub mod registry;
pub mod state;
