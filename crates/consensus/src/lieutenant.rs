//! Lieutenant role: receive, verify, countersign, relay, decide
//!
//! A lieutenant runs rounds 1 through f+1. Round 1 is pure reception;
//! every later round first relays the messages accepted in the previous
//! round, then keeps receiving until the round expires, retransmitting to
//! peers that have not acknowledged. A message is accepted when its whole
//! signature chain verifies and it carries an order not seen before; the
//! lieutenant then countersigns it and queues the extended chain for the
//! next round. At the end it decides the single collected order, or
//! retreat when the collection is empty or disputed.

use std::collections::BTreeSet;

use tokio::time::Instant;

use crate::config::Config;
use crate::crypto::{KeyStore, Signer};
use crate::error::Result;
use crate::node::NodeCore;
use crate::tracker::SendPass;
use crate::transport::Transport;
use crate::types::{recv_buffer_len, Ack, Order, SignedMessage, ACK_LEN, SIGNED_MIN_LEN};
use crate::{ACK_TIMEOUT, ROUND_TIMEOUT};

pub struct Lieutenant {
    core: NodeCore,
    keys: KeyStore,
    values: BTreeSet<Order>,
    forward_queue: Vec<SignedMessage>,
}

impl Lieutenant {
    pub fn new(config: Config, transport: Transport, signer: Signer, keys: KeyStore) -> Self {
        Self {
            core: NodeCore::new(config, transport, signer),
            keys,
            values: BTreeSet::new(),
            forward_queue: Vec::new(),
        }
    }

    /// Run rounds until f+1 have elapsed, then decide.
    pub async fn run(mut self) -> Result<Order> {
        let my_id = self.core.config.my_id;
        tracing::info!("lieutenant {} awaiting orders", my_id);

        loop {
            let deadline = Instant::now() + ROUND_TIMEOUT;
            let batch = if self.core.round > 1 {
                if self.core.round > self.core.config.max_failures + 1 {
                    break;
                }
                self.core.tracker.reset();
                let batch = std::mem::take(&mut self.forward_queue);
                self.forward_batch(&batch, deadline).await;
                batch
            } else {
                Vec::new()
            };

            self.receive_phase(&batch, deadline).await?;
            self.core.round += 1;
        }

        let decision = decide(&self.values);
        tracing::info!(
            "lieutenant {} decided {} from {} distinct order(s)",
            my_id,
            decision,
            self.values.len()
        );
        Ok(decision)
    }

    /// Relay every message accepted last round to the peers that have not
    /// already signed it.
    async fn forward_batch(&mut self, batch: &[SignedMessage], deadline: Instant) {
        for message in batch {
            if Instant::now() >= deadline {
                tracing::warn!(
                    "round {} expired with messages left to relay",
                    self.core.round
                );
                break;
            }
            // the tracker was reset at the round boundary; re-derive the
            // excluded peers from the chain itself (our own signature is
            // the last entry)
            for sig in &message.sigs {
                self.core.tracker.mark_do_not_send(sig.signer);
            }
            let payload = message.to_bytes();
            self.core.send_with_retry(&payload, deadline).await;
        }
    }

    /// Collect datagrams until the round deadline, interleaving
    /// retransmissions to peers that have not acknowledged.
    async fn receive_phase(&mut self, batch: &[SignedMessage], deadline: Instant) -> Result<()> {
        let mut buf = vec![0u8; recv_buffer_len(self.core.config.num_generals)];

        if self.core.round == 1 {
            // nothing is in flight yet; sit on the socket for the round
            return self.receive_pass(deadline, &mut buf).await;
        }

        while Instant::now() < deadline {
            let window = deadline.min(Instant::now() + ACK_TIMEOUT);
            self.receive_pass(window, &mut buf).await?;
            if !self.core.tracker.all_acked() && Instant::now() < deadline {
                for message in batch {
                    self.core
                        .send_pass(SendPass::RetryUnacked, &message.to_bytes())
                        .await;
                }
            }
        }
        Ok(())
    }

    /// Drain the socket until `deadline`, classifying by datagram size.
    async fn receive_pass(&mut self, deadline: Instant, buf: &mut [u8]) -> Result<()> {
        loop {
            let Some((len, from)) = self.core.transport.recv(deadline, buf).await else {
                return Ok(());
            };
            if len == ACK_LEN {
                match Ack::from_bytes(&buf[..len]) {
                    Ok(ack) => self.core.handle_ack(ack, from),
                    Err(e) => tracing::trace!("dropping malformed ack: {}", e),
                }
            } else if len >= SIGNED_MIN_LEN {
                self.handle_signed(&buf[..len], from).await?;
            } else {
                tracing::trace!("dropping runt datagram of {} bytes", len);
            }
        }
    }

    /// Acknowledge, verify and possibly queue one inbound signed message.
    async fn handle_signed(&mut self, datagram: &[u8], from: std::net::SocketAddr) -> Result<()> {
        let Some(source) = self.core.transport.peer_id(from) else {
            tracing::debug!("dropping datagram from unknown source {}", from);
            return Ok(());
        };
        if let Err(e) = self.core.transport.send_ack(from.ip(), self.core.round).await {
            tracing::warn!("could not acknowledge general {}: {}", source, e);
        }

        let message = match SignedMessage::from_bytes(datagram) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("dropping malformed message from general {}: {}", source, e);
                return Ok(());
            }
        };
        if !chain_verifies(&self.keys, self.core.config.num_generals, &message) {
            tracing::debug!("dropping message from general {}: chain did not verify", source);
            return Ok(());
        }

        // no later sweep this round may echo to anyone who already signed
        for sig in &message.sigs {
            self.core.tracker.mark_do_not_send(sig.signer);
        }

        if self.values.contains(&message.order) {
            // each distinct order is relayed at most once
            return Ok(());
        }
        if message.total_sigs() > self.core.round {
            tracing::debug!(
                "catching up from round {} to {}",
                self.core.round,
                message.total_sigs()
            );
            self.core.round = message.total_sigs();
        }
        self.values.insert(message.order);
        tracing::info!(
            "accepted {} under a chain of {} signature(s)",
            message.order,
            message.total_sigs()
        );

        let forward = extend_chain(&self.core.signer, &message)?;
        self.forward_queue.push(forward);
        Ok(())
    }
}

/// Walk the chain backwards: every signature must cover the one before
/// it, and the first must cover the order's wire bytes. Signer ids must
/// name real generals even when cryptographic checks are off.
fn chain_verifies(keys: &KeyStore, num_generals: u32, message: &SignedMessage) -> bool {
    if message
        .sigs
        .iter()
        .any(|sig| sig.signer == 0 || sig.signer > num_generals)
    {
        return false;
    }
    for i in (1..message.sigs.len()).rev() {
        let sig = &message.sigs[i];
        if !keys.verify(sig.signer, &message.sigs[i - 1].bytes, &sig.bytes) {
            return false;
        }
    }
    let first = &message.sigs[0];
    keys.verify(first.signer, &message.order.wire_bytes(), &first.bytes)
}

/// Countersign a verified message: the new signature covers the last
/// block of the incoming chain.
fn extend_chain(signer: &Signer, message: &SignedMessage) -> Result<SignedMessage> {
    let last = &message.sigs[message.sigs.len() - 1];
    let sig = signer.sign(&last.bytes)?;
    let mut sigs = message.sigs.clone();
    sigs.push(sig);
    Ok(SignedMessage {
        order: message.order,
        sigs,
    })
}

/// Lamport's choice rule with retreat as the default: an empty or
/// disputed collection retreats, a unanimous one obeys.
fn decide(values: &BTreeSet<Order>) -> Order {
    let mut iter = values.iter();
    match (iter.next(), iter.next()) {
        (Some(&only), None) => only,
        _ => Order::Retreat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::SendStatus;
    use crate::types::{SignatureRecord, SIG_LEN};
    use rsa::RsaPrivateKey;
    use std::collections::HashMap;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::path::{Path, PathBuf};

    fn zero_sig(signer: u32) -> SignatureRecord {
        SignatureRecord {
            signer,
            bytes: [0u8; SIG_LEN],
        }
    }

    fn crypto_off_lieutenant(port: u16) -> Lieutenant {
        let config = Config {
            my_id: 2,
            num_generals: 4,
            max_failures: 1,
            port,
            hosts: vec!["127.0.0.1".into(); 4],
            ip_to_id: HashMap::from([(Ipv4Addr::new(127, 0, 0, 1), 1)]),
            my_addr: Ipv4Addr::new(127, 0, 0, 1),
            crypto_off: true,
            keys_dir: PathBuf::from("unused"),
        };
        let transport = Transport::bind(&config).unwrap();
        let signer = Signer::load(Path::new("unused"), 2, true).unwrap();
        Lieutenant::new(config, transport, signer, KeyStore::disabled())
    }

    #[tokio::test]
    async fn test_each_order_is_relayed_at_most_once() {
        let mut lieutenant = crypto_off_lieutenant(28553);
        let from: SocketAddr = "127.0.0.1:9999".parse().unwrap();

        let attack = SignedMessage {
            order: Order::Attack,
            sigs: vec![zero_sig(1)],
        };
        lieutenant
            .handle_signed(&attack.to_bytes(), from)
            .await
            .unwrap();
        // a duplicate changes nothing
        lieutenant
            .handle_signed(&attack.to_bytes(), from)
            .await
            .unwrap();

        assert_eq!(lieutenant.values.len(), 1);
        assert_eq!(lieutenant.forward_queue.len(), 1);
        assert_eq!(lieutenant.forward_queue[0].total_sigs(), 2);
        assert_eq!(lieutenant.forward_queue[0].sigs[1].signer, 2);
        assert_eq!(lieutenant.core.round, 1);
        // the sender already signed; it must not be echoed to
        assert_eq!(lieutenant.core.tracker.status(1), SendStatus::DoNotSend);
    }

    #[tokio::test]
    async fn test_longer_chain_pulls_the_round_forward() {
        let mut lieutenant = crypto_off_lieutenant(28554);
        let from: SocketAddr = "127.0.0.1:9999".parse().unwrap();

        let retreat = SignedMessage {
            order: Order::Retreat,
            sigs: vec![zero_sig(1), zero_sig(3)],
        };
        lieutenant
            .handle_signed(&retreat.to_bytes(), from)
            .await
            .unwrap();

        assert_eq!(lieutenant.core.round, 2);
        assert_eq!(lieutenant.forward_queue.len(), 1);
        assert_eq!(lieutenant.forward_queue[0].total_sigs(), 3);
        assert_eq!(lieutenant.core.tracker.status(3), SendStatus::DoNotSend);
    }

    #[tokio::test]
    async fn test_unknown_sources_are_dropped() {
        let mut lieutenant = crypto_off_lieutenant(28555);
        let from: SocketAddr = "10.9.9.9:9999".parse().unwrap();

        let attack = SignedMessage {
            order: Order::Attack,
            sigs: vec![zero_sig(1)],
        };
        lieutenant
            .handle_signed(&attack.to_bytes(), from)
            .await
            .unwrap();
        assert!(lieutenant.values.is_empty());
        assert!(lieutenant.forward_queue.is_empty());
    }

    #[test]
    fn test_decide_defaults_to_retreat() {
        let mut values = BTreeSet::new();
        assert_eq!(decide(&values), Order::Retreat);

        values.insert(Order::Attack);
        assert_eq!(decide(&values), Order::Attack);

        values.insert(Order::Retreat);
        assert_eq!(decide(&values), Order::Retreat);
    }

    #[test]
    fn test_decide_single_retreat() {
        let values = BTreeSet::from([Order::Retreat]);
        assert_eq!(decide(&values), Order::Retreat);
    }

    fn keypair() -> RsaPrivateKey {
        RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap()
    }

    #[test]
    fn test_extend_chain_keeps_it_verifiable() {
        let commander_key = keypair();
        let my_key = keypair();
        let keys = KeyStore::from_keys(
            HashMap::from([
                (1, commander_key.to_public_key()),
                (2, my_key.to_public_key()),
            ]),
            false,
        );

        let commander = Signer::from_key(1, commander_key);
        let original = SignedMessage {
            order: Order::Attack,
            sigs: vec![commander.sign(&Order::Attack.wire_bytes()).unwrap()],
        };
        assert!(chain_verifies(&keys, 4, &original));

        let me = Signer::from_key(2, my_key);
        let extended = extend_chain(&me, &original).unwrap();
        assert_eq!(extended.total_sigs(), original.total_sigs() + 1);
        assert_eq!(extended.sigs[1].signer, 2);
        assert!(chain_verifies(&keys, 4, &extended));
    }

    #[test]
    fn test_chain_rejects_tampered_order() {
        let key = keypair();
        let keys = KeyStore::from_keys(HashMap::from([(1, key.to_public_key())]), false);
        let signer = Signer::from_key(1, key);

        let mut message = SignedMessage {
            order: Order::Attack,
            sigs: vec![signer.sign(&Order::Attack.wire_bytes()).unwrap()],
        };
        assert!(chain_verifies(&keys, 4, &message));

        // a relay flipping the order invalidates the chain
        message.order = Order::Retreat;
        assert!(!chain_verifies(&keys, 4, &message));
    }

    #[test]
    fn test_chain_rejects_unknown_signer_even_with_crypto_off() {
        let keys = KeyStore::disabled();
        let message = SignedMessage {
            order: Order::Attack,
            sigs: vec![SignatureRecord {
                signer: 7,
                bytes: [0u8; SIG_LEN],
            }],
        };
        assert!(!chain_verifies(&keys, 4, &message));
        assert!(!chain_verifies(
            &keys,
            4,
            &SignedMessage {
                order: Order::Attack,
                sigs: vec![SignatureRecord {
                    signer: 0,
                    bytes: [0u8; SIG_LEN],
                }],
            }
        ));
    }
}
