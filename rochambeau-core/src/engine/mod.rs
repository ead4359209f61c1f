pub mod config;

pub use config::EngineConfig;

use crate::clock::Clock;
use crate::commitment::{CommitmentHasher, Sha256Hasher};
use crate::error::{
    AuthorizationError, GameError, ResourceError, Result, StateError, TemporalError,
    ValidationError,
};
use crate::escrow::{EscrowLedger, LedgerChanges, Totals};
use crate::events::{EventBus, GameEvent, RecordedEvent};
use crate::registry::{Play, PlayRegistry, PlayState};
use crate::storage::{
    Batch, Storage, META_CONFIG, META_CONTEXT, META_OWNER, META_PAUSED,
};
use crate::types::{Address, Amount, Choice, Commitment, GameContext, Outcome, Secret};
use crate::withdrawal::{FundsTransfer, WithdrawalGateway};
use chrono::{DateTime, SubsecRound, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

/// Everything one operation changes, applied only after all checks passed
#[derive(Debug, Default)]
pub(crate) struct Transition {
    pub play: Option<Play>,
    pub balances: Option<LedgerChanges>,
    pub totals: Option<Totals>,
    pub paused: Option<bool>,
    pub events: Vec<GameEvent>,
}

pub(crate) struct EngineState {
    registry: PlayRegistry,
    ledger: EscrowLedger,
    totals: Totals,
    paused: bool,
    storage: Option<Storage>,
}

impl EngineState {
    fn ensure_running(&self) -> Result<()> {
        if self.paused {
            return Err(StateError::Paused.into());
        }
        Ok(())
    }

    /// Persists, then applies, a transition. Nothing changes if this fails.
    fn apply(&mut self, transition: Transition, now: DateTime<Utc>) -> Result<Vec<GameEvent>> {
        if let Some(play) = &transition.play {
            self.registry.check_transition(play)?;
        }

        if let Some(storage) = self.storage.as_mut() {
            let batch = Batch {
                play: transition.play.as_ref(),
                balances: transition.balances.as_ref(),
                totals: transition.totals,
                paused: transition.paused,
                events: &transition.events,
            };
            storage.commit_batch(&batch, now)?;
        }

        self.apply_in_memory(transition)
    }

    /// Applies a transition without writing it to storage
    fn apply_in_memory(&mut self, transition: Transition) -> Result<Vec<GameEvent>> {
        if let Some(play) = transition.play {
            self.registry.record(play)?;
        }
        if let Some(changes) = transition.balances {
            self.ledger.apply(changes);
        }
        if let Some(totals) = transition.totals {
            self.totals = totals;
        }
        if let Some(paused) = transition.paused {
            self.paused = paused;
        }

        Ok(transition.events)
    }
}

const RELEASE_ATTEMPTS: u32 = 3;
const RELEASE_BACKOFF: Duration = Duration::from_millis(50);

fn release_transition(state: &EngineState, caller: Address, amount: Amount) -> Result<Transition> {
    let mut staged = state.ledger.stage();
    staged.credit(caller, amount)?;
    let balances = staged.into_changes();
    let totals = state.totals.withdrawal_reverted(amount)?;

    Ok(Transition {
        balances: Some(balances),
        totals: Some(totals),
        ..Transition::default()
    })
}

/// Shared by the engine and its withdrawal gateway
pub(crate) struct EngineCore {
    config: EngineConfig,
    result_window: chrono::Duration,
    context: GameContext,
    owner: Address,
    clock: Arc<dyn Clock>,
    hasher: Arc<dyn CommitmentHasher>,
    bus: EventBus,
    state: Mutex<EngineState>,
}

impl EngineCore {
    /// Current time at the precision plays are stored with
    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(3)
    }

    fn commit(&self, state: &mut EngineState, transition: Transition, now: DateTime<Utc>) -> Result<()> {
        let events = state.apply(transition, now)?;
        for event in events {
            self.bus.publish(event);
        }
        Ok(())
    }

    /// Debits `caller` ahead of an external transfer
    pub(crate) async fn reserve_withdrawal(&self, caller: Address, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Err(ValidationError::ZeroWithdrawal.into());
        }

        let mut state = self.state.lock().await;
        let now = self.now();

        let mut staged = state.ledger.stage();
        staged.debit(caller, amount)?;
        let balances = staged.into_changes();
        let totals = state.totals.withdrawn(amount)?;

        let transition = Transition {
            balances: Some(balances),
            totals: Some(totals),
            ..Transition::default()
        };
        self.commit(&mut state, transition, now)
    }

    /// Gives back a reserved amount whose transfer failed.
    ///
    /// Persisting is retried; if storage keeps refusing, the credit is still
    /// applied in memory so the funds stay withdrawable, and the next write
    /// touching this balance persists it.
    pub(crate) async fn release_withdrawal(&self, caller: Address, amount: Amount) -> Result<()> {
        for attempt in 1..=RELEASE_ATTEMPTS {
            let result = {
                let mut state = self.state.lock().await;
                let now = self.now();
                let transition = release_transition(&state, caller, amount)?;
                self.commit(&mut state, transition, now)
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        "Restoring {} to {} failed (attempt {}/{}): {}",
                        amount,
                        caller,
                        attempt,
                        RELEASE_ATTEMPTS,
                        e
                    );
                    if attempt < RELEASE_ATTEMPTS {
                        tokio::time::sleep(RELEASE_BACKOFF).await;
                    }
                }
            }
        }

        let mut state = self.state.lock().await;
        let transition = release_transition(&state, caller, amount)?;
        state.apply_in_memory(transition)?;
        tracing::error!(
            "Restored {} to {} in memory only; storage is behind until the balance changes again",
            amount,
            caller
        );
        Ok(())
    }

    pub(crate) async fn confirm_withdrawal(&self, caller: Address, amount: Amount) -> Result<()> {
        let mut state = self.state.lock().await;
        let now = self.now();

        let transition = Transition {
            events: vec![GameEvent::Withdrawn { caller, amount }],
            ..Transition::default()
        };
        self.commit(&mut state, transition, now)
    }
}

/// Snapshot of the conservation law
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conservation {
    pub balances: Amount,
    pub in_plays: Amount,
    pub net_deposits: Amount,
}

impl Conservation {
    pub fn holds(&self) -> bool {
        self.balances.checked_add(self.in_plays) == Some(self.net_deposits)
    }
}

/// Commit-reveal rock/paper/scissors over an escrow ledger.
///
/// Every state-changing call runs inside one critical section, so calls are
/// totally ordered and never observe each other half-applied. Failed calls
/// leave no trace.
#[derive(Clone)]
pub struct GameEngine {
    core: Arc<EngineCore>,
    gateway: WithdrawalGateway,
}

impl GameEngine {
    /// In-memory engine
    pub fn new(
        config: EngineConfig,
        owner: Address,
        clock: Arc<dyn Clock>,
        transfer: Arc<dyn FundsTransfer>,
    ) -> Result<Self> {
        config.validate()?;
        let state = EngineState {
            registry: PlayRegistry::new(),
            ledger: EscrowLedger::new(),
            totals: Totals::default(),
            paused: config.start_paused,
            storage: None,
        };
        Self::assemble(config, GameContext::random(), owner, clock, transfer, state)
    }

    /// Engine backed by a sqlite file; reopening restores every play,
    /// balance and the game context.
    pub async fn open_db(
        db_path: &Path,
        config: EngineConfig,
        owner: Address,
        clock: Arc<dyn Clock>,
        transfer: Arc<dyn FundsTransfer>,
    ) -> Result<Self> {
        config.validate()?;
        let storage = Storage::open(db_path).await?;

        let context = match storage.get_meta(META_CONTEXT)? {
            Some(id) => GameContext::from_uuid(
                Uuid::parse_str(&id).map_err(|e| GameError::corrupt(format!("Bad context: {}", e)))?,
            ),
            None => {
                let context = GameContext::random();
                storage.set_meta(META_CONTEXT, &context.to_string())?;
                context
            }
        };

        match storage.get_meta(META_CONFIG)? {
            Some(stored) => {
                let stored: EngineConfig = serde_json::from_str(&stored)?;
                if stored.max_play_window != config.max_play_window
                    || stored.result_window != config.result_window
                {
                    return Err(GameError::config(
                        "Engine was created with different play windows",
                    ));
                }
            }
            None => storage.set_meta(META_CONFIG, &serde_json::to_string(&config)?)?,
        }

        match storage.get_meta(META_OWNER)? {
            Some(stored) if stored != owner.to_string() => {
                return Err(GameError::config(format!(
                    "Engine is owned by {}, not {}",
                    stored, owner
                )));
            }
            Some(_) => {}
            None => storage.set_meta(META_OWNER, &owner.to_string())?,
        }

        let paused = match storage.get_meta(META_PAUSED)?.as_deref() {
            Some("1") => true,
            Some(_) => false,
            None => config.start_paused,
        };

        let registry = PlayRegistry::from_plays(storage.plays().load_plays()?);
        let ledger = EscrowLedger::from_balances(storage.balances().load_balances()?);
        let totals = storage.load_totals()?;

        tracing::info!(
            "Opened engine {} with {} plays and {} balances",
            context,
            registry.len(),
            ledger.len()
        );

        let state = EngineState {
            registry,
            ledger,
            totals,
            paused,
            storage: Some(storage),
        };
        Self::assemble(config, context, owner, clock, transfer, state)
    }

    fn assemble(
        config: EngineConfig,
        context: GameContext,
        owner: Address,
        clock: Arc<dyn Clock>,
        transfer: Arc<dyn FundsTransfer>,
        state: EngineState,
    ) -> Result<Self> {
        let core = Arc::new(EngineCore {
            result_window: config.result_window_delta()?,
            bus: EventBus::with_capacity(config.event_capacity),
            config,
            context,
            owner,
            clock,
            hasher: Arc::new(Sha256Hasher),
            state: Mutex::new(state),
        });
        let gateway = WithdrawalGateway::new(core.clone(), transfer);
        Ok(Self { core, gateway })
    }

    pub fn context(&self) -> GameContext {
        self.core.context
    }

    pub fn owner(&self) -> Address {
        self.core.owner
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.core.bus.subscribe()
    }

    /// Commitment `caller` must open with to later reveal `choice_code`
    pub fn commit(&self, choice_code: u8, secret: &Secret, caller: &Address) -> Result<Commitment> {
        Ok(self
            .core
            .hasher
            .commit(choice_code, secret, &self.core.context, caller)?)
    }

    /// Initiator escrows `wager` out of `deposit` and pins `responder`
    pub async fn open(
        &self,
        caller: Address,
        commitment: Commitment,
        wager: Amount,
        deadline_offset: Duration,
        responder: Address,
        deposit: Amount,
    ) -> Result<Play> {
        let mut state = self.core.state.lock().await;
        let now = self.core.now();
        state.ensure_running()?;

        if state.registry.contains(&commitment) {
            tracing::debug!("Rejected open: commitment {} reused", commitment);
            return Err(StateError::PlayCommitmentReused(commitment).into());
        }

        if wager < 1 {
            return Err(ValidationError::MinimumWagerNotMet(wager).into());
        }

        if deadline_offset > self.core.config.max_play_window {
            return Err(ValidationError::DeadlineTooFar {
                requested: deadline_offset,
                max: self.core.config.max_play_window,
            }
            .into());
        }

        if deposit < wager {
            return Err(ResourceError::InsufficientDeposit {
                need: wager,
                available: deposit,
            }
            .into());
        }

        let offset = chrono::Duration::from_std(deadline_offset)
            .map_err(|e| GameError::config(format!("Deadline offset out of range: {}", e)))?;
        let deadline = now
            .checked_add_signed(offset)
            .ok_or(ValidationError::DeadlineTooFar {
                requested: deadline_offset,
                max: self.core.config.max_play_window,
            })?
            .trunc_subsecs(3);

        let play = Play::new(commitment, caller, responder, wager, now, deadline);

        let mut staged = state.ledger.stage();
        staged.credit(caller, deposit - wager)?;
        let balances = staged.into_changes();
        let totals = state.totals.deposited(deposit)?;

        let transition = Transition {
            play: Some(play.clone()),
            balances: Some(balances),
            totals: Some(totals),
            events: vec![
                GameEvent::Deposited {
                    player: caller,
                    amount: deposit,
                },
                GameEvent::Opened {
                    commitment,
                    initiator: caller,
                    wager,
                    deadline,
                    responder,
                },
            ],
            ..Transition::default()
        };
        self.core.commit(&mut state, transition, now)?;

        tracing::info!(
            "Play {} opened by {} against {} for {}",
            commitment,
            caller,
            responder,
            wager
        );
        Ok(play)
    }

    /// Pinned responder matches the wager and records a visible choice
    pub async fn join(
        &self,
        caller: Address,
        commitment: Commitment,
        choice_code: u8,
        deposit: Amount,
    ) -> Result<Play> {
        let mut state = self.core.state.lock().await;
        let now = self.core.now();
        state.ensure_running()?;

        let play = state
            .registry
            .get(&commitment)
            .filter(|play| play.state() == PlayState::Open)
            .ok_or(StateError::UnknownPlay(commitment))?;

        if caller != play.responder {
            return Err(AuthorizationError::WrongResponder {
                expected: play.responder,
                caller,
            }
            .into());
        }

        let choice = Choice::try_from(choice_code)?;

        if now > play.deadline {
            return Err(TemporalError::DeadlineExpired {
                deadline: play.deadline,
            }
            .into());
        }

        if deposit < play.wager {
            return Err(ResourceError::InsufficientDeposit {
                need: play.wager,
                available: deposit,
            }
            .into());
        }

        let updated = play.with_responder(choice, now);

        let mut staged = state.ledger.stage();
        staged.credit(caller, deposit - play.wager)?;
        let balances = staged.into_changes();
        let totals = state.totals.deposited(deposit)?;

        let transition = Transition {
            play: Some(updated.clone()),
            balances: Some(balances),
            totals: Some(totals),
            events: vec![
                GameEvent::Deposited {
                    player: caller,
                    amount: deposit,
                },
                GameEvent::Joined {
                    commitment,
                    responder: caller,
                    choice,
                },
            ],
            ..Transition::default()
        };
        self.core.commit(&mut state, transition, now)?;

        tracing::info!("Player {} joined play {} with {}", caller, commitment, choice);
        Ok(updated)
    }

    /// Initiator opens their commitment and the play is settled
    pub async fn reveal(&self, caller: Address, choice_code: u8, secret: &Secret) -> Result<Outcome> {
        let mut state = self.core.state.lock().await;
        let now = self.core.now();
        state.ensure_running()?;

        let commitment = self.commit(choice_code, secret, &caller)?;
        let choice = Choice::try_from(choice_code)?;

        let play = state
            .registry
            .get(&commitment)
            .ok_or(StateError::UnknownPlay(commitment))?;

        if play.resolved {
            return Err(StateError::AlreadyResolved(commitment).into());
        }

        let responder_choice = play
            .responder_choice
            .ok_or(StateError::ResponderNotJoined(commitment))?;

        let outcome = choice.against(responder_choice);
        let pot = play
            .wager
            .checked_mul(2)
            .ok_or(ValidationError::AmountOverflow)?;

        let mut staged = state.ledger.stage();
        let winner = match outcome {
            Outcome::Tie => {
                staged.credit(play.initiator, play.wager)?;
                staged.credit(play.responder, play.wager)?;
                None
            }
            Outcome::InitiatorWins => {
                staged.credit(play.initiator, pot)?;
                Some(play.initiator)
            }
            Outcome::ResponderWins => {
                staged.credit(play.responder, pot)?;
                Some(play.responder)
            }
            Outcome::Forfeited | Outcome::ClaimedBack => {
                return Err(GameError::corrupt(format!(
                    "Reveal of play {} produced {:?}",
                    commitment, outcome
                )));
            }
        };
        let balances = staged.into_changes();
        let updated = play.with_outcome(outcome);

        let transition = Transition {
            play: Some(updated),
            balances: Some(balances),
            events: vec![GameEvent::Revealed {
                commitment,
                winner,
                revealer: caller,
            }],
            ..Transition::default()
        };
        self.core.commit(&mut state, transition, now)?;

        tracing::info!(
            "Play {} revealed: {} against {} ({:?})",
            commitment,
            choice,
            responder_choice,
            outcome
        );
        Ok(outcome)
    }

    /// Responder takes the pot when the initiator sat out the result window
    pub async fn force_reveal(&self, caller: Address, commitment: Commitment) -> Result<()> {
        let mut state = self.core.state.lock().await;
        let now = self.core.now();
        state.ensure_running()?;

        let play = state
            .registry
            .get(&commitment)
            .ok_or(StateError::UnknownPlay(commitment))?;

        if play.resolved {
            return Err(StateError::AlreadyResolved(commitment).into());
        }

        let joined_at = play
            .responder_joined_at
            .ok_or(StateError::ResponderNotJoined(commitment))?;

        if caller != play.responder {
            return Err(AuthorizationError::WrongResponder {
                expected: play.responder,
                caller,
            }
            .into());
        }

        let available_at = joined_at
            .checked_add_signed(self.core.result_window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if now < available_at {
            return Err(TemporalError::ResultWindowNotElapsed { available_at }.into());
        }

        let pot = play
            .wager
            .checked_mul(2)
            .ok_or(ValidationError::AmountOverflow)?;

        let mut staged = state.ledger.stage();
        staged.credit(play.responder, pot)?;
        let balances = staged.into_changes();
        let updated = play.with_outcome(Outcome::Forfeited);

        let transition = Transition {
            play: Some(updated),
            balances: Some(balances),
            events: vec![GameEvent::ForceRevealed {
                commitment,
                winner: caller,
                revealer: caller,
            }],
            ..Transition::default()
        };
        self.core.commit(&mut state, transition, now)?;

        tracing::info!("Play {} force-revealed by {}", commitment, caller);
        Ok(())
    }

    /// Refunds the initiator of a play nobody joined before its deadline.
    /// Anyone may trigger it.
    pub async fn claim_back(&self, caller: Address, commitment: Commitment) -> Result<()> {
        let mut state = self.core.state.lock().await;
        let now = self.core.now();
        state.ensure_running()?;

        let play = state
            .registry
            .get(&commitment)
            .ok_or(StateError::UnknownPlay(commitment))?;

        if play.resolved {
            return Err(StateError::AlreadyResolved(commitment).into());
        }

        if play.responder_choice.is_some() {
            return Err(StateError::ResponderAlreadyJoined(commitment).into());
        }

        if now <= play.deadline {
            return Err(TemporalError::DeadlineNotReached {
                deadline: play.deadline,
            }
            .into());
        }

        let mut staged = state.ledger.stage();
        staged.credit(play.initiator, play.wager)?;
        let balances = staged.into_changes();
        let beneficiary = play.initiator;
        let updated = play.with_outcome(Outcome::ClaimedBack);

        let transition = Transition {
            play: Some(updated),
            balances: Some(balances),
            events: vec![GameEvent::ClaimedBack {
                commitment,
                beneficiary,
                triggered_by: caller,
            }],
            ..Transition::default()
        };
        self.core.commit(&mut state, transition, now)?;

        tracing::info!(
            "Play {} claimed back for {} by {}",
            commitment,
            beneficiary,
            caller
        );
        Ok(())
    }

    /// Pull payment out of escrow; see [`WithdrawalGateway::withdraw`]
    pub async fn withdraw(&self, caller: Address, amount: Amount) -> Result<()> {
        self.gateway.withdraw(caller, amount).await
    }

    pub async fn pause(&self, caller: Address) -> Result<()> {
        self.set_paused(caller, true).await
    }

    pub async fn resume(&self, caller: Address) -> Result<()> {
        self.set_paused(caller, false).await
    }

    async fn set_paused(&self, caller: Address, paused: bool) -> Result<()> {
        let mut state = self.core.state.lock().await;
        let now = self.core.now();

        if caller != self.core.owner {
            return Err(AuthorizationError::NotOwner(caller).into());
        }

        match (state.paused, paused) {
            (true, true) => return Err(StateError::AlreadyPaused.into()),
            (false, false) => return Err(StateError::NotPaused.into()),
            _ => {}
        }

        let event = if paused {
            GameEvent::Paused { by: caller }
        } else {
            GameEvent::Resumed { by: caller }
        };
        let transition = Transition {
            paused: Some(paused),
            events: vec![event],
            ..Transition::default()
        };
        self.core.commit(&mut state, transition, now)?;

        tracing::warn!(
            "Engine {} {} by {}",
            self.core.context,
            if paused { "paused" } else { "resumed" },
            caller
        );
        Ok(())
    }

    pub async fn is_paused(&self) -> bool {
        self.core.state.lock().await.paused
    }

    pub async fn play(&self, commitment: &Commitment) -> Option<Play> {
        self.core.state.lock().await.registry.get(commitment).cloned()
    }

    pub async fn play_state(&self, commitment: &Commitment) -> Option<PlayState> {
        self.core
            .state
            .lock()
            .await
            .registry
            .get(commitment)
            .map(Play::state)
    }

    pub async fn plays(&self) -> Vec<Play> {
        let state = self.core.state.lock().await;
        let mut plays: Vec<Play> = state.registry.iter().cloned().collect();
        plays.sort_by_key(|play| (play.opened_at, play.commitment));
        plays
    }

    pub async fn balance(&self, address: &Address) -> Amount {
        self.core.state.lock().await.ledger.balance(address)
    }

    pub async fn outstanding_wagers(&self) -> Result<Amount> {
        Ok(self.core.state.lock().await.registry.outstanding_wagers()?)
    }

    pub async fn totals(&self) -> Totals {
        self.core.state.lock().await.totals
    }

    pub async fn conservation(&self) -> Result<Conservation> {
        let state = self.core.state.lock().await;
        Ok(Conservation {
            balances: state.ledger.total()?,
            in_plays: state.registry.outstanding_wagers()?,
            net_deposits: state.totals.net()?,
        })
    }

    /// Persisted event journal; empty for an in-memory engine
    pub async fn events(&self) -> Result<Vec<RecordedEvent>> {
        let state = self.core.state.lock().await;
        match &state.storage {
            Some(storage) => storage.events().load_events(),
            None => Ok(Vec::new()),
        }
    }
}
