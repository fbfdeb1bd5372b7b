//! Parley wire protocol.
//!
//! Clients and server exchange JSON text frames over a duplex channel. Inbound
//! frames are [`Envelope`]s carrying one [`Action`]; the server answers each
//! envelope with a [`Response`] and relays message envelopes verbatim to
//! their recipients.
//!
//! # Addressing
//!
//! Destinations are either a bare identity id (32 hex digits) for one-to-one
//! delivery, or a [`RoomPath`] of the form `#group/#room`. Every group and
//! room title carries the [`ROOM_SIGIL`] prefix.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod errors;
pub mod response;
pub mod room_path;

pub use envelope::{Action, AuthToken, Envelope};
pub use errors::{ProtocolError, Result};
pub use response::{Response, ResponseCode};
pub use room_path::{DEFAULT_GROUP, DEFAULT_ROOM, ROOM_SIGIL, RoomPath, is_room_name};
