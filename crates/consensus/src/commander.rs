//! Commander role: originate the signed order
//!
//! The commander runs exactly one round. It signs its order, pushes the
//! message to every lieutenant with retry, then spends whatever is left
//! of the round collecting acknowledgements and re-sending to whoever has
//! not confirmed. Missing acknowledgements never change its output; the
//! commander's decision is always its own order.

use tokio::time::Instant;

use crate::config::Config;
use crate::crypto::Signer;
use crate::error::Result;
use crate::node::NodeCore;
use crate::tracker::SendPass;
use crate::transport::Transport;
use crate::types::{recv_buffer_len, Ack, Order, SignedMessage, ACK_LEN};
use crate::{ACK_TIMEOUT, ROUND_TIMEOUT};

pub struct Commander {
    core: NodeCore,
    order: Order,
}

impl Commander {
    pub fn new(config: Config, transport: Transport, signer: Signer, order: Order) -> Self {
        Self {
            core: NodeCore::new(config, transport, signer),
            order,
        }
    }

    /// Broadcast the order and wait out the round; returns the order.
    pub async fn run(mut self) -> Result<Order> {
        tracing::info!(
            "commander {} issuing {}",
            self.core.config.my_id,
            self.order
        );

        let sig = self.core.signer.sign(&self.order.wire_bytes())?;
        let message = SignedMessage {
            order: self.order,
            sigs: vec![sig],
        };
        let payload = message.to_bytes();

        let deadline = Instant::now() + ROUND_TIMEOUT;
        self.core.send_with_retry(&payload, deadline).await;

        let mut buf = vec![0u8; recv_buffer_len(self.core.config.num_generals)];
        while !self.core.tracker.all_acked() && Instant::now() < deadline {
            let window = deadline.min(Instant::now() + ACK_TIMEOUT);
            self.wait_for_acks(window, &mut buf).await;
            if self.core.tracker.all_acked() {
                break;
            }
            self.core.send_pass(SendPass::RetryUnacked, &payload).await;
        }

        let pending = self.core.tracker.outstanding();
        if pending == 0 {
            tracing::info!("every lieutenant acknowledged the order");
        } else {
            tracing::warn!("round expired with {} acknowledgement(s) missing", pending);
        }
        Ok(self.order)
    }

    /// Drain acknowledgements until all are in or the window closes.
    ///
    /// Anything that is not exactly an acknowledgement-sized datagram is
    /// dropped; the commander has no use for relayed messages.
    async fn wait_for_acks(&mut self, deadline: Instant, buf: &mut [u8]) {
        while !self.core.tracker.all_acked() {
            let Some((len, from)) = self.core.transport.recv(deadline, buf).await else {
                return;
            };
            if len != ACK_LEN {
                tracing::trace!("dropping {}-byte datagram during ack wait", len);
                continue;
            }
            match Ack::from_bytes(&buf[..len]) {
                Ok(ack) => self.core.handle_ack(ack, from),
                Err(e) => tracing::trace!("dropping malformed ack: {}", e),
            }
        }
    }
}
