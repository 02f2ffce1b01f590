//! Client configuration, fixed at construction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{Address, Asset};

const DEFAULT_SECONDARY_GRACE_SECS: u64 = 60;

fn default_secondary_grace_secs() -> u64 {
    DEFAULT_SECONDARY_GRACE_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// The only asset channels of this client hold.
    pub asset: Asset,
    /// Adjudicator contract disputes and withdrawals go through.
    pub adjudicator: Address,
    /// How long a secondary settlement waits for the counterparty to conclude
    /// the channel before registering and waiting on its own.
    #[serde(default = "default_secondary_grace_secs")]
    pub secondary_grace_secs: u64,
}

impl Config {
    pub fn new(asset: Asset, adjudicator: Address) -> Self {
        Config {
            asset,
            adjudicator,
            secondary_grace_secs: DEFAULT_SECONDARY_GRACE_SECS,
        }
    }

    pub fn secondary_grace(&self) -> Duration {
        Duration::from_secs(self.secondary_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::U256;

    #[test]
    fn deserializes_from_json() {
        let json = r#"{
            "asset": {
                "chain_id": "1337",
                "holder": "0xb051EAD0C6CC2f568166F8fEC4f07511B88678bA"
            },
            "adjudicator": "0xDc4A7e107aD6dBDA1870df34d70B51796BBd1335"
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.asset.chain_id, U256::from(1337));
        assert_eq!(
            cfg.adjudicator,
            Address::from_hex("dc4a7e107ad6dbda1870df34d70b51796bbd1335").unwrap()
        );
        assert_eq!(cfg.secondary_grace(), Duration::from_secs(60));

        let back: Config = serde_json::from_str(&serde_json::to_string(&cfg).unwrap()).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn rejects_malformed_addresses() {
        let json = r#"{
            "asset": { "chain_id": "1", "holder": "0x1234" },
            "adjudicator": "0xDc4A7e107aD6dBDA1870df34d70B51796BBd1335"
        }"#;
        assert!(serde_json::from_str::<Config>(json).is_err());
    }
}
