//! Wire records for the agreement protocol
//!
//! Two datagram layouts share the port: a variable-length signed message
//! and a fixed-size acknowledgement. Every integer travels in network
//! byte order; signatures are raw 256-byte RSA-2048 blocks. The receiver
//! disambiguates by datagram length together with the leading type word.

use std::fmt;

use thiserror::Error;

/// 1-based identifier of a general, assigned by hostfile line order.
pub type GeneralId = u32;

/// Wire type tag of a signed message.
pub const MSG_TYPE_SIGNED: u32 = 1;
/// Wire type tag of an acknowledgement.
pub const MSG_TYPE_ACK: u32 = 2;

/// Width of one RSA-2048 signature.
pub const SIG_LEN: usize = 256;
/// One chain entry: signer id followed by the signature block.
pub const SIG_RECORD_LEN: usize = 4 + SIG_LEN;
/// Fixed prefix of a signed message: type, total_sigs, order.
pub const SIGNED_HEADER_LEN: usize = 12;
/// A signed message carries at least one signature.
pub const SIGNED_MIN_LEN: usize = SIGNED_HEADER_LEN + SIG_RECORD_LEN;
/// An acknowledgement: type and round.
pub const ACK_LEN: usize = 8;

/// Receive buffer size large enough for the longest honest chain.
pub fn recv_buffer_len(num_generals: u32) -> usize {
    SIGNED_HEADER_LEN + SIG_RECORD_LEN * num_generals as usize
}

/// Why a datagram failed to decode. Every variant is grounds to drop it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram length {0} matches no message layout")]
    BadLength(usize),

    #[error("unexpected message type {0}")]
    BadType(u32),

    #[error("order {0} is not valid on the wire")]
    BadOrder(u32),

    #[error("header claims {header} signatures, datagram carries {actual}")]
    SigCountMismatch { header: u32, actual: u32 },
}

/// The binary order under agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum Order {
    Retreat = 0,
    Attack = 1,
}

impl Order {
    pub fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Order::Retreat),
            1 => Some(Order::Attack),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        self as u32
    }

    /// The four bytes the commander's signature covers: the wire encoding.
    pub fn wire_bytes(self) -> [u8; 4] {
        self.to_wire().to_be_bytes()
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Order::Retreat => write!(f, "retreat"),
            Order::Attack => write!(f, "attack"),
        }
    }
}

/// One link of a signature chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    pub signer: GeneralId,
    pub bytes: [u8; SIG_LEN],
}

/// An order plus the chain of generals that have signed it.
///
/// `sigs[0]` covers the order's wire bytes; each later entry covers the
/// signature block immediately before it. The wire `total_sigs` field is
/// derived from the chain length, so an encoded message can never carry
/// an inconsistent count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    pub order: Order,
    pub sigs: Vec<SignatureRecord>,
}

impl SignedMessage {
    pub fn total_sigs(&self) -> u32 {
        self.sigs.len() as u32
    }

    /// Serialize for transmission.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SIGNED_HEADER_LEN + self.sigs.len() * SIG_RECORD_LEN);
        buf.extend_from_slice(&MSG_TYPE_SIGNED.to_be_bytes());
        buf.extend_from_slice(&(self.sigs.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.order.to_wire().to_be_bytes());
        for sig in &self.sigs {
            buf.extend_from_slice(&sig.signer.to_be_bytes());
            buf.extend_from_slice(&sig.bytes);
        }
        buf
    }

    /// Decode a datagram, inferring the signature count from its length.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < SIGNED_MIN_LEN {
            return Err(WireError::BadLength(buf.len()));
        }
        let msg_type = read_u32(buf, 0);
        if msg_type != MSG_TYPE_SIGNED {
            return Err(WireError::BadType(msg_type));
        }
        let total_sigs = read_u32(buf, 4);
        let raw_order = read_u32(buf, 8);
        let order = Order::from_wire(raw_order).ok_or(WireError::BadOrder(raw_order))?;

        let body = buf.len() - SIGNED_HEADER_LEN;
        if body % SIG_RECORD_LEN != 0 {
            return Err(WireError::BadLength(buf.len()));
        }
        let inferred = (body / SIG_RECORD_LEN) as u32;
        if inferred != total_sigs {
            return Err(WireError::SigCountMismatch {
                header: total_sigs,
                actual: inferred,
            });
        }

        let mut sigs = Vec::with_capacity(inferred as usize);
        for i in 0..inferred as usize {
            let at = SIGNED_HEADER_LEN + i * SIG_RECORD_LEN;
            let signer = read_u32(buf, at);
            let mut bytes = [0u8; SIG_LEN];
            bytes.copy_from_slice(&buf[at + 4..at + SIG_RECORD_LEN]);
            sigs.push(SignatureRecord { signer, bytes });
        }
        Ok(SignedMessage { order, sigs })
    }
}

/// Receipt confirmation for one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub round: u32,
}

impl Ack {
    pub fn to_bytes(self) -> [u8; ACK_LEN] {
        let mut buf = [0u8; ACK_LEN];
        buf[..4].copy_from_slice(&MSG_TYPE_ACK.to_be_bytes());
        buf[4..].copy_from_slice(&self.round.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() != ACK_LEN {
            return Err(WireError::BadLength(buf.len()));
        }
        let msg_type = read_u32(buf, 0);
        if msg_type != MSG_TYPE_ACK {
            return Err(WireError::BadType(msg_type));
        }
        Ok(Ack {
            round: read_u32(buf, 4),
        })
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(signer: GeneralId, fill: u8) -> SignatureRecord {
        SignatureRecord {
            signer,
            bytes: [fill; SIG_LEN],
        }
    }

    #[test]
    fn test_signed_message_round_trip() {
        let msg = SignedMessage {
            order: Order::Attack,
            sigs: vec![sig(1, 0xAB), sig(3, 0xCD)],
        };
        let bytes = msg.to_bytes();
        assert_eq!(bytes.len(), SIGNED_HEADER_LEN + 2 * SIG_RECORD_LEN);

        let decoded = SignedMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.total_sigs(), 2);
        // decode then re-encode is byte-exact
        assert_eq!(decoded.to_bytes(), bytes);
    }

    #[test]
    fn test_single_signature_probe() {
        // a commander's round-1 message is exactly 272 bytes
        let msg = SignedMessage {
            order: Order::Attack,
            sigs: vec![sig(1, 0x11)],
        };
        let bytes = msg.to_bytes();
        assert_eq!(bytes.len(), 272);
        assert_eq!(&bytes[..4], &1u32.to_be_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_be_bytes());
        assert_eq!(&bytes[8..12], &1u32.to_be_bytes());
        assert!(SignedMessage::from_bytes(&bytes).is_ok());
    }

    #[test]
    fn test_rejects_bad_type() {
        let mut bytes = SignedMessage {
            order: Order::Retreat,
            sigs: vec![sig(2, 0)],
        }
        .to_bytes();
        bytes[3] = 9;
        assert_eq!(SignedMessage::from_bytes(&bytes), Err(WireError::BadType(9)));
    }

    #[test]
    fn test_rejects_bad_order() {
        let mut bytes = SignedMessage {
            order: Order::Retreat,
            sigs: vec![sig(2, 0)],
        }
        .to_bytes();
        bytes[11] = 2;
        assert_eq!(SignedMessage::from_bytes(&bytes), Err(WireError::BadOrder(2)));
    }

    #[test]
    fn test_rejects_count_mismatch() {
        let mut bytes = SignedMessage {
            order: Order::Attack,
            sigs: vec![sig(1, 0)],
        }
        .to_bytes();
        // header claims two signatures, datagram carries one
        bytes[7] = 2;
        assert_eq!(
            SignedMessage::from_bytes(&bytes),
            Err(WireError::SigCountMismatch {
                header: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_rejects_odd_lengths() {
        let msg = SignedMessage {
            order: Order::Attack,
            sigs: vec![sig(1, 0)],
        };
        let mut bytes = msg.to_bytes();
        bytes.push(0); // trailing slack
        assert_eq!(
            SignedMessage::from_bytes(&bytes),
            Err(WireError::BadLength(273))
        );
        assert_eq!(
            SignedMessage::from_bytes(&bytes[..20]),
            Err(WireError::BadLength(20))
        );
    }

    #[test]
    fn test_ack_round_trip() {
        let ack = Ack { round: 7 };
        let bytes = ack.to_bytes();
        assert_eq!(bytes.len(), ACK_LEN);
        assert_eq!(&bytes[..4], &2u32.to_be_bytes());
        assert_eq!(Ack::from_bytes(&bytes).unwrap(), ack);
    }

    #[test]
    fn test_ack_rejects_wrong_type_or_size() {
        let mut bytes = Ack { round: 1 }.to_bytes();
        bytes[3] = 1;
        assert_eq!(Ack::from_bytes(&bytes), Err(WireError::BadType(1)));
        assert_eq!(Ack::from_bytes(&[0; 7]), Err(WireError::BadLength(7)));
    }

    #[test]
    fn test_order_wire_values() {
        assert_eq!(Order::from_wire(0), Some(Order::Retreat));
        assert_eq!(Order::from_wire(1), Some(Order::Attack));
        assert_eq!(Order::from_wire(2), None);
        assert_eq!(Order::Attack.wire_bytes(), [0, 0, 0, 1]);
        assert_eq!(Order::Attack.to_string(), "attack");
        assert_eq!(Order::Retreat.to_string(), "retreat");
    }
}
