//! osconfig-agent: effective configuration for the OS Config host agent.
//!
//! This library resolves the agent runtime configuration from
//! process flags and cloud metadata, and keeps it available to every
//! other agent subsystem as a consistent snapshot.
//!
//! It is made of a few layers:
//!  * `metadata` - metadata server client, the only I/O boundary.
//!  * `config` - metadata document, precedence rules and the `ConfigStore`.
//!  * `refresh` - bounded-retry refresh cycles and the periodic `ConfigAgent`.
//!  * `identity` - lazily refreshed instance identity token.

#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod config;
pub mod identity;
pub mod metadata;
pub mod refresh;
