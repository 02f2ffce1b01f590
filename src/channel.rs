mod active;
mod balances;
mod channel_update;
mod proposal;
mod settle;
mod state;
mod watcher;

pub use active::*;
pub use balances::*;
pub use channel_update::*;
pub use proposal::*;
pub use settle::Registration;
pub use state::*;
pub use watcher::ConcludedHandler;

/// ID (Index) of a participant in the channel.
///
/// `0` is the proposer of the channel, `1` the proposee.
pub type PartIdx = usize;

/// Only two-party channels are supported.
pub const PARTICIPANTS: usize = 2;
