//! Shared engine core for both roles
//!
//! Owns the pieces the commander and the lieutenants use identically:
//! configuration, the bound socket, the signing key, the per-round send
//! tracker and the round counter. Roles wrap this core and add their own
//! control flow.

use std::net::SocketAddr;

use tokio::time::Instant;

use crate::config::Config;
use crate::crypto::Signer;
use crate::tracker::{SendPass, SendTracker};
use crate::transport::Transport;
use crate::types::Ack;

pub(crate) struct NodeCore {
    pub(crate) config: Config,
    pub(crate) transport: Transport,
    pub(crate) signer: Signer,
    pub(crate) tracker: SendTracker,
    pub(crate) round: u32,
}

impl NodeCore {
    pub(crate) fn new(config: Config, transport: Transport, signer: Signer) -> Self {
        let tracker = SendTracker::new(config.num_generals);
        Self {
            config,
            transport,
            signer,
            tracker,
            round: 1,
        }
    }

    /// One transmission sweep over every peer the pass selects.
    ///
    /// Send failures are recorded in the tracker and absorbed.
    pub(crate) async fn send_pass(&mut self, pass: SendPass, payload: &[u8]) {
        for id in 1..=self.config.num_generals {
            if id == self.config.my_id || !self.tracker.wants_send(pass, id) {
                continue;
            }
            match self.transport.send_to(id, payload).await {
                Ok(()) => self.tracker.mark_sent(id),
                Err(e) => {
                    tracing::warn!("could not send to {}: {}", self.config.host(id), e);
                    self.tracker.mark_not_sent(id);
                }
            }
        }
    }

    /// Sweep every eligible peer, retrying failed sends until `deadline`.
    pub(crate) async fn send_with_retry(&mut self, payload: &[u8], deadline: Instant) {
        self.send_pass(SendPass::Initial, payload).await;
        while !self.tracker.all_sent() && Instant::now() < deadline {
            self.send_pass(SendPass::RetryUnsent, payload).await;
        }
    }

    /// Settle an acknowledgement against the current round.
    pub(crate) fn handle_ack(&mut self, ack: Ack, from: SocketAddr) {
        if ack.round != self.round {
            tracing::trace!("ignoring ack for round {} in round {}", ack.round, self.round);
            return;
        }
        let Some(peer) = self.transport.peer_id(from) else {
            tracing::debug!("dropping ack from unknown source {}", from);
            return;
        };
        if self.tracker.mark_acked(peer) {
            tracing::debug!("general {} acknowledged round {}", peer, self.round);
        }
    }
}
