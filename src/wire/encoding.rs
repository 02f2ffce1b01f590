use async_trait::async_trait;
use prost::{bytes::BufMut, Message};

use super::{BytesBus, Transport, TransportError};
use crate::{
    messages::{address_from, hash_from, ConversionError, ParticipantMessage},
    perunwire::{
        envelope, ChannelProposalRejMsg, ChannelUpdateRejMsg, Envelope,
    },
    types::Address,
};

/// Wraps a [BytesBus] into a [Transport] by encoding each message as a
/// protobuf [Envelope] behind a big endian `u16` length.
#[derive(Debug)]
pub struct ProtoBufEncodingLayer<B: BytesBus> {
    pub bus: B,
    /// Our own peer address, written into every envelope.
    pub identity: Address,
}

impl<B: BytesBus> ProtoBufEncodingLayer<B> {
    pub fn new(bus: B, identity: Address) -> Self {
        Self { bus, identity }
    }

    fn encode<T: Message>(msg: T) -> Result<Vec<u8>, TransportError> {
        // Peers expect a fixed two byte length, `encode_length_delimited`
        // would write a LEB128 varint instead.
        let len = msg.encoded_len();
        if len >= (1 << 16) {
            return Err(TransportError::Encoding(format!(
                "message of {} bytes does not fit a frame",
                len
            )));
        }

        let mut buf = Vec::with_capacity(2 + len);
        buf.put_slice(&(len as u16).to_be_bytes());
        msg.encode(&mut buf)
            .map_err(|e| TransportError::Encoding(e.to_string()))?;
        Ok(buf)
    }

    /// Decode one frame into the sender's address and the message.
    pub fn decode(frame: &[u8]) -> Result<(Address, ParticipantMessage), ConversionError> {
        if frame.len() < 2 {
            return Err(ConversionError::FrameLength);
        }
        let len = u16::from_be_bytes([frame[0], frame[1]]) as usize;
        if frame.len() != 2 + len {
            return Err(ConversionError::FrameLength);
        }
        let envelope = Envelope::decode(&frame[2..])?;
        let sender = address_from(envelope.sender)?;

        let msg = match envelope.msg.ok_or(ConversionError::ExptectedSome)? {
            envelope::Msg::LedgerChannelProposalMsg(m) => {
                ParticipantMessage::ChannelProposal(m.try_into()?)
            }
            envelope::Msg::LedgerChannelProposalAccMsg(m) => {
                ParticipantMessage::ProposalAccepted(m.try_into()?)
            }
            envelope::Msg::ChannelProposalRejMsg(m) => ParticipantMessage::ProposalRejected {
                id: hash_from(m.proposal_id)?,
                reason: m.reason,
            },
            envelope::Msg::ChannelUpdateMsg(m) => ParticipantMessage::ChannelUpdate(m.try_into()?),
            envelope::Msg::ChannelUpdateAccMsg(m) => {
                ParticipantMessage::ChannelUpdateAccepted(m.try_into()?)
            }
            envelope::Msg::ChannelUpdateRejMsg(m) => ParticipantMessage::ChannelUpdateRejected {
                id: hash_from(m.channel_id)?,
                version: m.version,
                reason: m.reason,
            },
        };
        Ok((sender, msg))
    }
}

#[async_trait]
impl<B: BytesBus> Transport for ProtoBufEncodingLayer<B> {
    async fn send(&self, peer: &Address, msg: ParticipantMessage) -> Result<(), TransportError> {
        let wiremsg: envelope::Msg = match msg {
            ParticipantMessage::ChannelProposal(msg) => {
                envelope::Msg::LedgerChannelProposalMsg(msg.into())
            }
            ParticipantMessage::ProposalAccepted(msg) => {
                envelope::Msg::LedgerChannelProposalAccMsg(msg.into())
            }
            ParticipantMessage::ProposalRejected { id, reason } => {
                envelope::Msg::ChannelProposalRejMsg(ChannelProposalRejMsg {
                    proposal_id: id.0.to_vec(),
                    reason,
                })
            }
            ParticipantMessage::ChannelUpdate(msg) => envelope::Msg::ChannelUpdateMsg(msg.into()),
            ParticipantMessage::ChannelUpdateAccepted(msg) => {
                envelope::Msg::ChannelUpdateAccMsg(msg.into())
            }
            ParticipantMessage::ChannelUpdateRejected {
                id,
                version,
                reason,
            } => envelope::Msg::ChannelUpdateRejMsg(ChannelUpdateRejMsg {
                channel_id: id.0.to_vec(),
                version,
                reason,
            }),
        };

        let envelope = Envelope {
            sender: self.identity.0.to_vec(),
            recipient: peer.0.to_vec(),
            msg: Some(wiremsg),
        };

        let buf = Self::encode(envelope)?;
        tracing::trace!(peer = ?peer, len = buf.len(), "sending frame");
        self.bus.send(peer, &buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{Balances, Params, State},
        messages::{LedgerChannelProposal, LedgerChannelUpdate},
        types::{Asset, Hash},
    };
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingBus {
        frames: Mutex<Vec<(Address, Vec<u8>)>>,
    }

    #[async_trait]
    impl BytesBus for RecordingBus {
        async fn send(&self, peer: &Address, msg: &[u8]) -> Result<(), TransportError> {
            self.frames.lock().unwrap().push((*peer, msg.to_vec()));
            Ok(())
        }
    }

    fn layer() -> ProtoBufEncodingLayer<RecordingBus> {
        ProtoBufEncodingLayer::new(RecordingBus::default(), Address([0xaa; 20]))
    }

    async fn transmit(msg: ParticipantMessage) -> (Address, ParticipantMessage) {
        let layer = layer();
        let peer = Address([0xbb; 20]);
        layer.send(&peer, msg).await.unwrap();
        let frames = layer.bus.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, peer);
        ProtoBufEncodingLayer::<RecordingBus>::decode(&frames[0].1).unwrap()
    }

    #[tokio::test]
    async fn proposal_survives_the_wire() {
        let asset = Asset {
            chain_id: 1337.into(),
            holder: Address([7; 20]),
        };
        let prop = LedgerChannelProposal {
            proposal_id: Hash([3; 32]),
            challenge_duration: 60,
            nonce: crate::types::U256::MAX,
            app: Address::default(),
            init_bals: vec![(asset, Balances(vec![100.into(), 0.into()]))],
            participant: Address([1; 20]),
        };

        let (sender, msg) = transmit(ParticipantMessage::ChannelProposal(prop.clone())).await;
        assert_eq!(sender, Address([0xaa; 20]));
        assert_eq!(msg, ParticipantMessage::ChannelProposal(prop));
    }

    #[tokio::test]
    async fn update_with_final_state_survives_the_wire() {
        let params = Params {
            challenge_duration: 10,
            nonce: 5.into(),
            participants: vec![Address([1; 20]), Address([2; 20])],
            app: Address::default(),
        };
        let state = State::new(&params, Asset::default(), Balances(vec![1.into(), 2.into()]))
            .clone_with(State::mark_final)
            .unwrap();
        let update = LedgerChannelUpdate { state, actor_idx: 1 };

        let (_, msg) = transmit(ParticipantMessage::ChannelUpdate(update.clone())).await;
        assert_eq!(msg, ParticipantMessage::ChannelUpdate(update));
    }

    #[test]
    fn truncated_frames_are_rejected() {
        type Layer = ProtoBufEncodingLayer<RecordingBus>;
        assert_eq!(Layer::decode(&[0]), Err(ConversionError::FrameLength));
        assert_eq!(Layer::decode(&[0, 5, 1, 2]), Err(ConversionError::FrameLength));
    }

    #[test]
    fn state_with_app_data_is_not_supported() {
        let mut wire: crate::perunwire::State = State::new(
            &Params {
                challenge_duration: 1,
                nonce: 1.into(),
                participants: vec![Address([1; 20]), Address([2; 20])],
                app: Address::default(),
            },
            Asset::default(),
            Balances(vec![1.into(), 1.into()]),
        )
        .into();
        wire.data = vec![1, 2, 3];
        assert_eq!(
            State::try_from(wire),
            Err(ConversionError::StateChannelsNotSupported)
        );
    }
}
