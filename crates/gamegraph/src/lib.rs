//! Umbrella crate for gamegraph.
//!
//! Re-exports the store engine, the shared wire types and the client state slice so
//! downstream code can depend on a single crate name (`gamegraph`).

pub use gamegraph_client as client;
pub use gamegraph_engine as engine;
pub use gamegraph_protocol as protocol;
