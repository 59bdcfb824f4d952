//! batchgrid-state: durable target state and the message protocol that mutates it.
//!
//! # Architecture
//!
//! ```text
//! workers / scheduler ──► PortWriter ──► PortReader ──► StateUpdater
//!                          (encoded Message strings)      ├── Reducer (message + state → state)
//!                                                         └── TargetStateStore (JSON file)
//! ```
//!
//! The store is only ever mutated by the single `StateUpdater`, one message
//! at a time in arrival order. Every other reader loads the latest durable
//! snapshot, which may be one cycle stale.

pub mod error;
pub mod message;
pub mod port;
pub mod reducer;
pub mod store;
pub mod updater;

pub use error::{ChannelError, MessageError, StateError, StateResult};
pub use message::{Message, StageReport};
pub use port::{PortReader, PortWriter, port};
pub use reducer::{Applied, Reducer};
pub use store::TargetStateStore;
pub use updater::StateUpdater;
