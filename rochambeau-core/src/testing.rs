//! Shared fixtures for unit tests

use crate::clock::ManualClock;
use crate::engine::{EngineConfig, GameEngine};
use crate::registry::Play;
use crate::types::{Address, Amount, Choice, Commitment, Secret};
use crate::withdrawal::{FundsTransfer, RecordingTransfer};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub const WAGER: Amount = 100;
pub const DEPOSIT: Amount = 500;
pub const ONE_HOUR: Duration = Duration::from_secs(3600);

pub fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub struct Harness {
    pub engine: GameEngine,
    pub clock: Arc<ManualClock>,
    pub transfer: Arc<RecordingTransfer>,
    pub owner: Address,
    pub alice: Address,
    pub bob: Address,
    pub carol: Address,
    pub secret: Secret,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let transfer = Arc::new(RecordingTransfer::new());
        Self::build(config, transfer.clone(), transfer)
    }

    pub fn with_transfer(transfer: Arc<dyn FundsTransfer>) -> Self {
        Self::build(EngineConfig::default(), transfer, Arc::new(RecordingTransfer::new()))
    }

    fn build(
        config: EngineConfig,
        transfer: Arc<dyn FundsTransfer>,
        recording: Arc<RecordingTransfer>,
    ) -> Self {
        init_tracing();
        let clock = Arc::new(ManualClock::new(epoch()));
        let owner = Address::new([0x0e; 20]);
        let engine = GameEngine::new(config, owner, clock.clone(), transfer).unwrap();

        Self {
            engine,
            clock,
            transfer: recording,
            owner,
            alice: Address::new([0xa1; 20]),
            bob: Address::new([0xb0; 20]),
            carol: Address::new([0xc4; 20]),
            secret: Secret::from_slice(b"aliceSecret").unwrap(),
        }
    }

    /// Alice's commitment to `choice` with the fixture secret
    pub fn alice_commitment(&self, choice: Choice) -> Commitment {
        self.engine
            .commit(choice.code(), &self.secret, &self.alice)
            .unwrap()
    }

    /// Alice opens with rock, 100 wagered out of 500, one hour, against Bob
    pub async fn open_default(&self) -> Play {
        self.engine
            .open(
                self.alice,
                self.alice_commitment(Choice::Rock),
                WAGER,
                ONE_HOUR,
                self.bob,
                DEPOSIT,
            )
            .await
            .unwrap()
    }

    /// Default open followed by Bob joining with `choice`
    pub async fn open_and_join(&self, choice: Choice) -> Play {
        let play = self.open_default().await;
        self.engine
            .join(self.bob, play.commitment, choice.code(), DEPOSIT)
            .await
            .unwrap()
    }

    pub async fn assert_conserved(&self) {
        let conservation = self.engine.conservation().await.unwrap();
        assert!(conservation.holds(), "conservation violated: {:?}", conservation);
    }
}
