//! Protobuf messages exchanged between channel participants.
//!
//! Field layout follows the `perunwire` package, restricted to the messages a
//! two-party payment channel needs. The types are derived directly instead of
//! being generated from `.proto` files, so building does not need `protoc`.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(bytes = "vec", tag = "1")]
    pub sender: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub recipient: ::prost::alloc::vec::Vec<u8>,
    #[prost(oneof = "envelope::Msg", tags = "3, 4, 5, 6, 7, 8")]
    pub msg: ::core::option::Option<envelope::Msg>,
}

pub mod envelope {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Msg {
        #[prost(message, tag = "3")]
        LedgerChannelProposalMsg(super::LedgerChannelProposalMsg),
        #[prost(message, tag = "4")]
        LedgerChannelProposalAccMsg(super::LedgerChannelProposalAccMsg),
        #[prost(message, tag = "5")]
        ChannelProposalRejMsg(super::ChannelProposalRejMsg),
        #[prost(message, tag = "6")]
        ChannelUpdateMsg(super::ChannelUpdateMsg),
        #[prost(message, tag = "7")]
        ChannelUpdateAccMsg(super::ChannelUpdateAccMsg),
        #[prost(message, tag = "8")]
        ChannelUpdateRejMsg(super::ChannelUpdateRejMsg),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Asset {
    #[prost(bytes = "vec", tag = "1")]
    pub chain_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub holder: ::prost::alloc::vec::Vec<u8>,
}

/// Balances of all participants for one asset, big endian.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Balance {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub balance: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Balances {
    #[prost(message, repeated, tag = "1")]
    pub balances: ::prost::alloc::vec::Vec<Balance>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Allocation {
    #[prost(message, repeated, tag = "1")]
    pub assets: ::prost::alloc::vec::Vec<Asset>,
    #[prost(message, optional, tag = "2")]
    pub balances: ::core::option::Option<Balances>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct State {
    #[prost(bytes = "vec", tag = "1")]
    pub id: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub version: u64,
    #[prost(message, optional, tag = "3")]
    pub allocation: ::core::option::Option<Allocation>,
    #[prost(bytes = "vec", tag = "4")]
    pub app: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub data: ::prost::alloc::vec::Vec<u8>,
    #[prost(bool, tag = "6")]
    pub is_final: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LedgerChannelProposalMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub proposal_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub challenge_duration: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub nonce: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub app: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, optional, tag = "5")]
    pub init_bals: ::core::option::Option<Allocation>,
    #[prost(bytes = "vec", tag = "6")]
    pub participant: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LedgerChannelProposalAccMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub proposal_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub participant: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelProposalRejMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub proposal_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, tag = "2")]
    pub reason: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelUpdate {
    #[prost(message, optional, tag = "1")]
    pub state: ::core::option::Option<State>,
    #[prost(uint32, tag = "2")]
    pub actor_idx: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelUpdateMsg {
    #[prost(message, optional, tag = "1")]
    pub channel_update: ::core::option::Option<ChannelUpdate>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelUpdateAccMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub version: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChannelUpdateRejMsg {
    #[prost(bytes = "vec", tag = "1")]
    pub channel_id: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint64, tag = "2")]
    pub version: u64,
    #[prost(string, tag = "3")]
    pub reason: ::prost::alloc::string::String,
}
