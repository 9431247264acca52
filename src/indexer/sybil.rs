//! Sybil-resistance provider handlers
//!
//! Passport and GoodDollar emit different events with the same effect on
//! the index: user records are overwritten, strategy records are toggled.
//! Each event enum maps itself onto a [`SybilAction`] and one handler
//! applies it.

use num_bigint::BigUint;
use tracing::{debug, error};

use super::{ContractReader, EventContext, Indexer};
use crate::events::{GoodDollarEvent, PassportEvent};
use crate::model::*;

/// Provider-neutral effect of a sybil event
#[derive(Debug, Clone, PartialEq)]
pub enum SybilAction {
    Initialized,
    UserUpdated {
        user: Address,
        score: BigUint,
        verified: bool,
    },
    StrategyAdded {
        strategy: Address,
        threshold: BigUint,
        council_safe: Option<Address>,
    },
    StrategyActive {
        strategy: Address,
        active: bool,
    },
    ThresholdModified {
        strategy: Address,
        threshold: BigUint,
    },
}

pub trait SybilProvider {
    const KIND: SybilKind;

    /// Whether a newly added strategy is enforced immediately
    const STRATEGY_STARTS_ACTIVE: bool;

    fn action(&self) -> SybilAction;
}

impl SybilProvider for PassportEvent {
    const KIND: SybilKind = SybilKind::Passport;
    const STRATEGY_STARTS_ACTIVE: bool = false;

    fn action(&self) -> SybilAction {
        match self {
            PassportEvent::Initialized => SybilAction::Initialized,
            PassportEvent::UserScoreAdded { user, score } => SybilAction::UserUpdated {
                user: *user,
                score: score.clone(),
                verified: true,
            },
            PassportEvent::UserRemoved { user } => SybilAction::UserUpdated {
                user: *user,
                score: BigUint::default(),
                verified: false,
            },
            PassportEvent::StrategyAdded { strategy, threshold, council_safe } => SybilAction::StrategyAdded {
                strategy: *strategy,
                threshold: threshold.clone(),
                council_safe: Some(*council_safe),
            },
            PassportEvent::StrategyRemoved { strategy } => SybilAction::StrategyActive {
                strategy: *strategy,
                active: false,
            },
            PassportEvent::StrategyActivated { strategy } => SybilAction::StrategyActive {
                strategy: *strategy,
                active: true,
            },
            PassportEvent::ThresholdModified { strategy, new_threshold } => SybilAction::ThresholdModified {
                strategy: *strategy,
                threshold: new_threshold.clone(),
            },
        }
    }
}

impl SybilProvider for GoodDollarEvent {
    const KIND: SybilKind = SybilKind::GoodDollar;
    const STRATEGY_STARTS_ACTIVE: bool = true;

    fn action(&self) -> SybilAction {
        match self {
            GoodDollarEvent::Initialized => SybilAction::Initialized,
            GoodDollarEvent::UserValidated { user } => SybilAction::UserUpdated {
                user: *user,
                score: BigUint::from(1u8),
                verified: true,
            },
            GoodDollarEvent::UserInvalidated { user } => SybilAction::UserUpdated {
                user: *user,
                score: BigUint::default(),
                verified: false,
            },
            GoodDollarEvent::GoodDollarStrategyAdded { strategy, council_safe } => SybilAction::StrategyAdded {
                strategy: *strategy,
                threshold: BigUint::default(),
                council_safe: Some(*council_safe),
            },
        }
    }
}

impl<R: ContractReader> Indexer<R> {
    pub(crate) fn apply_sybil<P: SybilProvider>(&mut self, ctx: &EventContext, event: &P) {
        let kind = P::KIND;
        match event.action() {
            SybilAction::Initialized => {
                self.store.sybil_protections.save(SybilProtection {
                    id: ctx.address.to_string(),
                    kind,
                });
                debug!(provider = %ctx.address, kind = kind.as_str(), "Sybil provider initialized");
            }
            SybilAction::UserUpdated { user, score, verified } => {
                self.ensure_provider(ctx, kind);
                let id = sybil_id(kind, &user);
                debug!(user = %user, kind = kind.as_str(), score = %score, verified, "Sybil user updated");
                self.store.sybil_users.save(SybilUser {
                    id,
                    kind,
                    user_address: user,
                    score,
                    verified,
                    last_updated: ctx.block_timestamp,
                    provider: ctx.address.to_string(),
                });
            }
            SybilAction::StrategyAdded { strategy, threshold, council_safe } => {
                self.ensure_provider(ctx, kind);
                self.store.sybil_strategies.save(SybilStrategy {
                    id: sybil_id(kind, &strategy),
                    kind,
                    strategy,
                    provider: ctx.address.to_string(),
                    threshold,
                    council_safe,
                    active: P::STRATEGY_STARTS_ACTIVE,
                });
            }
            SybilAction::StrategyActive { strategy, active } => {
                let mut record = self.sybil_strategy_or_default(ctx, kind, &strategy);
                record.active = active;
                self.store.sybil_strategies.save(record);
            }
            SybilAction::ThresholdModified { strategy, threshold } => {
                let mut record = self.sybil_strategy_or_default(ctx, kind, &strategy);
                record.threshold = threshold;
                self.store.sybil_strategies.save(record);
            }
        }
    }

    fn ensure_provider(&mut self, ctx: &EventContext, kind: SybilKind) {
        let id = ctx.address.to_string();
        if self.store.sybil_protections.contains(&id) {
            return;
        }
        error!(provider = %id, kind = kind.as_str(), "Sybil provider not initialized, creating it");
        self.store.sybil_protections.save(SybilProtection { id, kind });
    }

    fn sybil_strategy_or_default(&mut self, ctx: &EventContext, kind: SybilKind, strategy: &Address) -> SybilStrategy {
        let id = sybil_id(kind, strategy);
        if let Some(existing) = self.store.sybil_strategies.get(&id) {
            return existing.clone();
        }
        self.missing(ctx, "sybil strategy", &id);
        SybilStrategy {
            id,
            kind,
            strategy: *strategy,
            provider: ctx.address.to_string(),
            threshold: BigUint::default(),
            council_safe: None,
            active: false,
        }
    }
}
