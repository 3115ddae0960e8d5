//! Network Layer
//!
//! Relay transport between game instances and the session runtime that
//! drives the simulation. This layer is **non-deterministic** - all game
//! logic runs through `game/`.

pub mod protocol;
pub mod server;
pub mod client;
pub mod session;

pub use protocol::{RelayEvent, WireParticipant, ProtocolError};
pub use server::{RelayServer, RelayConfig, RelayError};
pub use client::{RelayLink, RelayClientConfig, LinkEvent};
pub use session::{GameSession, SessionHandle, SessionConfig, SessionError, SessionReport};
