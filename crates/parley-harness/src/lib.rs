//! Deterministic simulation harness for Parley.
//!
//! Runs the real [`ProtocolEngine`](parley_server::ProtocolEngine) and
//! [`Router`](parley_server::Router) in-process with a seeded
//! [`SimEnv`], so identity allocation, timestamps and every delivered frame
//! are reproducible from a seed.
//!
//! # Components
//!
//! - [`SimEnv`]: seeded ChaCha RNG and a virtual clock
//! - [`SimServer`]: engine, router and registry over any store
//! - [`SimClient`]: one connection plus its outbound queue

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod sim_env;
mod sim_server;

pub use sim_env::{SIM_EPOCH_SECS, SimEnv};
pub use sim_server::{Received, SIM_OUTBOUND_BUFFER, SimClient, SimServer};
