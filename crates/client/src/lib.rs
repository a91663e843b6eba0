//! Client-side game state for gamegraph: a store with a pure reducer, selectors over it,
//! REST action creators, and a canvas layout manager that lives beside the store.

pub mod actions;
pub mod layout;
pub mod selectors;
pub mod store;
pub mod transport;

pub use actions::GameClient;
pub use layout::{NodeLayout, Position, Viewport};
pub use store::{reduce, Action, DialogStatus, GameDialog, GameState, LoadingStatus, Store};
pub use transport::{ApiResponse, ClientConfig, RouterTransport, Transport};

pub use gamegraph_protocol as protocol;
