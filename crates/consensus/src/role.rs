//! Role dispatch
//!
//! A general with an order to give is the commander; everyone else is a
//! lieutenant. The role is fixed once at construction; there is no
//! per-message dispatch.

use crate::commander::Commander;
use crate::config::Config;
use crate::crypto::{KeyStore, Signer};
use crate::error::Result;
use crate::lieutenant::Lieutenant;
use crate::transport::Transport;
use crate::types::Order;

pub enum General {
    Commander(Commander),
    Lieutenant(Lieutenant),
}

impl General {
    /// Validate the configuration, bind the socket, load key material and
    /// construct the role. Must be called from within a tokio runtime.
    pub fn new(config: Config, order: Option<Order>) -> Result<Self> {
        config.validate()?;
        let transport = Transport::bind(&config)?;
        let signer = Signer::load(&config.keys_dir, config.my_id, config.crypto_off)?;
        match order {
            Some(order) => Ok(General::Commander(Commander::new(
                config, transport, signer, order,
            ))),
            None => {
                let keys = KeyStore::load(
                    &config.keys_dir,
                    config.my_id,
                    config.num_generals,
                    config.crypto_off,
                )?;
                Ok(General::Lieutenant(Lieutenant::new(
                    config, transport, signer, keys,
                )))
            }
        }
    }

    /// Run the protocol to completion and return the decided order.
    pub async fn run(self) -> Result<Order> {
        match self {
            General::Commander(commander) => commander.run().await,
            General::Lieutenant(lieutenant) => lieutenant.run().await,
        }
    }
}
