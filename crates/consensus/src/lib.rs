//! Byzantine generals agreement with signed messages
//!
//! Architecture:
//! - One commander signs a binary order and broadcasts it in round 1
//! - Lieutenants verify the signature chain, countersign and relay for
//!   f+1 rounds, collecting every distinct order they see
//! - Each lieutenant decides the single collected order, or retreat when
//!   it collected none or more than one
//! - Transport is UDP datagrams with per-round acknowledgements and retry

pub mod commander;
pub mod config;
pub mod crypto;
pub mod error;
pub mod lieutenant;
mod node;
pub mod role;
pub mod tracker;
pub mod transport;
pub mod types;

pub use commander::Commander;
pub use config::Config;
pub use crypto::{KeyStore, Signer};
pub use error::{Error, Result};
pub use lieutenant::Lieutenant;
pub use role::General;
pub use types::{Ack, GeneralId, Order, SignatureRecord, SignedMessage};

use std::time::Duration;

/// Bound on a single acknowledgement-collection pass.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(200);

/// Bound on one full round of protocol activity.
pub const ROUND_TIMEOUT: Duration = Duration::from_millis(500);
