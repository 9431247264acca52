//! Conviction-voting strategy handlers

use num_bigint::BigUint;
use tracing::{debug, error, info};

use super::{ContractReader, EventContext, Indexer, StrategyState, WarningKind};
use crate::abi::InitializeParams;
use crate::conviction::max_conviction;
use crate::events::CvStrategyEvent;
use crate::model::*;

impl<R: ContractReader> Indexer<R> {
    pub(crate) fn apply_cv_strategy(&mut self, ctx: &EventContext, event: &CvStrategyEvent) {
        match event {
            CvStrategyEvent::InitializedCV { pool_id, data } => self.initialized_cv(ctx, pool_id, data),
            CvStrategyEvent::ProposalCreated { proposal_id, .. } => self.proposal_created(ctx, proposal_id),
            CvStrategyEvent::SupportAdded {
                from,
                proposal_id,
                amount,
                total_staked_amount,
                conviction_last,
            } => self.support_added(ctx, from, proposal_id, amount, total_staked_amount, conviction_last),
            CvStrategyEvent::PoolAmountIncreased { amount } => self.pool_amount_increased(ctx, amount),
            CvStrategyEvent::PowerIncreased { member, points_to_increase } => {
                self.power_changed(ctx, member, points_to_increase, true)
            }
            CvStrategyEvent::PowerDecreased { member, points_to_decrease } => {
                self.power_changed(ctx, member, points_to_decrease, false)
            }
            CvStrategyEvent::PointsDeactivated { member } => self.points_deactivated(ctx, member),
            CvStrategyEvent::Distributed { proposal_id, .. } => self.distributed(ctx, proposal_id),
            CvStrategyEvent::ProposalDisputed {
                arbitrator,
                proposal_id,
                dispute_id,
                challenger,
                context,
            } => self.proposal_disputed(ctx, arbitrator, proposal_id, dispute_id, challenger, context),
            CvStrategyEvent::Ruling { arbitrator, dispute_id, ruling } => {
                self.ruling(ctx, arbitrator, dispute_id, ruling)
            }
            CvStrategyEvent::ProposalCancelled { proposal_id } => {
                let id = crate::model::proposal_id(&ctx.address, proposal_id);
                self.refresh_status(ctx, &id, proposal_id, ProposalStatus::Cancelled);
            }
        }
    }

    fn initialized_cv(&mut self, ctx: &EventContext, pool_id: &BigUint, data: &[u8]) {
        let params = match InitializeParams::decode(data) {
            Ok(params) => params,
            Err(e) => {
                error!(strategy = %ctx.address, error = %e, "InitializedCV payload could not be decoded");
                self.warn(ctx, WarningKind::DecodeFailed, format!("InitializedCV for {}: {}", ctx.address, e));
                return;
            }
        };

        let state = match self.reader.strategy(&ctx.address) {
            Some(state) => state,
            None => {
                error!(strategy = %ctx.address, "Strategy read reverted during initialization");
                self.warn(
                    ctx,
                    WarningKind::ContractCallReverted,
                    format!("strategy read reverted for {}", ctx.address),
                );
                StrategyState::default()
            }
        };

        let config = StrategyConfig {
            id: config_id(&ctx.address, pool_id),
            strategy: ctx.address.to_string(),
            decay: params.decay,
            max_ratio: params.max_ratio,
            weight: params.weight,
            min_threshold_points: params.min_threshold_points,
            proposal_type: params.proposal_type,
            point_system: params.point_system,
            max_amount: params.max_amount,
            d: D,
        };
        let max_cv_supply =
            max_conviction(&state.total_effective_active_points, &config.decay).unwrap_or_default();

        let strategy = Strategy {
            id: ctx.address.to_string(),
            address: ctx.address,
            pool_id: pool_id.clone(),
            registry_community: params.registry_community,
            config: config.id.clone(),
            token: state.token,
            pool_amount: state.pool_amount,
            max_cv_supply,
            total_effective_active_points: state.total_effective_active_points,
            metadata: state.metadata.clone(),
        };

        info!(
            strategy = %strategy.address,
            pool_id = %pool_id,
            proposal_type = ?config.proposal_type,
            "Strategy initialized"
        );
        self.store.configs.save(config);
        self.store.strategies.save(strategy);

        if let Some(cid) = state.metadata {
            self.schedule_content(&cid, MetadataKind::Pool);
        }
    }

    fn proposal_created(&mut self, ctx: &EventContext, number: &BigUint) {
        let id = proposal_id(&ctx.address, number);
        let Some(decay) = self.strategy_decay(ctx) else {
            return;
        };

        let Some(state) = self.reader.proposal(&ctx.address, number) else {
            error!(proposal = %id, "getProposal reverted");
            self.warn(ctx, WarningKind::ContractCallReverted, format!("getProposal reverted for {}", id));
            return;
        };
        let Some(status) = ProposalStatus::from_code(state.status) else {
            self.warn(
                ctx,
                WarningKind::DecodeFailed,
                format!("proposal {} has unknown status code {}", id, state.status),
            );
            return;
        };

        let max_cv_staked = max_conviction(&state.staked_amount, &decay).unwrap_or_default();
        let proposal = Proposal {
            id: id.clone(),
            strategy: ctx.address.to_string(),
            proposal_number: number.clone(),
            beneficiary: state.beneficiary,
            requested_token: state.requested_token,
            requested_amount: state.requested_amount,
            staked_amount: state.staked_amount,
            threshold: state.threshold,
            max_cv_staked,
            block_last: state.block_last,
            conviction_last: state.conviction_last,
            status,
            submitter: state.submitter,
            metadata: state.metadata.clone(),
            created_at: ctx.block_timestamp,
            updated_at: ctx.block_timestamp,
        };

        debug!(proposal = %id, status = %status, "Proposal created");
        self.store.proposals.save(proposal);
        self.schedule_content(&state.metadata, MetadataKind::Proposal);
    }

    fn support_added(
        &mut self,
        ctx: &EventContext,
        from: &Address,
        number: &BigUint,
        amount: &BigUint,
        total_staked_amount: &BigUint,
        conviction_last: &BigUint,
    ) {
        let id = proposal_id(&ctx.address, number);
        let Some(mut proposal) = self.store.proposals.get(&id).cloned() else {
            self.missing(ctx, "proposal", &id);
            return;
        };
        let Some(strategy) = self.store.strategies.get(&proposal.strategy).cloned() else {
            self.missing(ctx, "strategy", &proposal.strategy);
            return;
        };
        let member_strategy_key = member_strategy_id(from, &strategy.address);
        let Some(mut member_strategy) = self.store.member_strategies.get(&member_strategy_key).cloned() else {
            self.missing(ctx, "member strategy", &member_strategy_key);
            return;
        };

        let stake_key = stake_id(&proposal.id, from, &strategy.address);
        let previous = self
            .store
            .stakes
            .get(&stake_key)
            .map(|s| s.amount.clone())
            .unwrap_or_default();

        member_strategy.total_staked_points =
            crate::model::amount::saturating_sub(&(&member_strategy.total_staked_points + amount), &previous);

        let decay = self
            .store
            .config_of(&strategy)
            .map(|c| c.decay.clone())
            .unwrap_or_default();
        proposal.max_cv_staked = max_conviction(total_staked_amount, &decay).unwrap_or_default();
        proposal.staked_amount = total_staked_amount.clone();
        proposal.conviction_last = conviction_last.clone();
        proposal.block_last = ctx.block_number;
        proposal.updated_at = ctx.block_timestamp;

        debug!(
            proposal = %proposal.id,
            member = %from,
            amount = %amount,
            total = %total_staked_amount,
            "Support updated"
        );

        self.store.stakes.save(Stake {
            id: stake_key,
            member: *from,
            proposal: proposal.id.clone(),
            pool_id: strategy.pool_id.clone(),
            amount: amount.clone(),
            created_at: ctx.block_timestamp,
        });
        self.store.member_strategies.save(member_strategy);
        self.store.proposals.save(proposal);
    }

    fn pool_amount_increased(&mut self, ctx: &EventContext, amount: &BigUint) {
        let key = ctx.address.to_string();
        let Some(mut strategy) = self.store.strategies.get(&key).cloned() else {
            self.missing(ctx, "strategy", &key);
            return;
        };
        strategy.pool_amount += amount;
        self.store.strategies.save(strategy);
    }

    fn power_changed(&mut self, ctx: &EventContext, member: &Address, points: &BigUint, increase: bool) {
        let key = ctx.address.to_string();
        let Some(mut strategy) = self.store.strategies.get(&key).cloned() else {
            self.missing(ctx, "strategy", &key);
            return;
        };

        match self.reader.strategy(&ctx.address) {
            Some(state) => {
                let decay = self
                    .store
                    .config_of(&strategy)
                    .map(|c| c.decay.clone())
                    .unwrap_or_default();
                strategy.max_cv_supply =
                    max_conviction(&state.total_effective_active_points, &decay).unwrap_or_default();
                strategy.total_effective_active_points = state.total_effective_active_points;
                self.store.strategies.save(strategy);
            }
            None => {
                error!(strategy = %ctx.address, "totalEffectiveActivePoints read reverted");
                self.warn(
                    ctx,
                    WarningKind::ContractCallReverted,
                    format!("totalEffectiveActivePoints reverted for {}", ctx.address),
                );
            }
        }

        let member_key = member_strategy_id(member, &ctx.address);
        let member_strategy = match self.store.member_strategies.get(&member_key).cloned() {
            Some(mut existing) => {
                existing.activated_points = if increase {
                    &existing.activated_points + points
                } else {
                    crate::model::amount::saturating_sub(&existing.activated_points, points)
                };
                existing
            }
            None if increase => MemberStrategy {
                id: member_key,
                member: *member,
                strategy: key,
                activated_points: points.clone(),
                total_staked_points: BigUint::default(),
            },
            None => {
                self.missing(ctx, "member strategy", &member_key);
                return;
            }
        };
        self.store.member_strategies.save(member_strategy);
    }

    /// Zero every stake the member holds in this strategy and take it back
    /// out of the proposal and member totals.
    fn points_deactivated(&mut self, ctx: &EventContext, member: &Address) {
        let strategy_key = ctx.address.to_string();
        let stakes: Vec<Stake> = self
            .store
            .stakes
            .values()
            .filter(|stake| stake.member == *member && stake.amount > BigUint::default())
            .filter(|stake| {
                self.store
                    .proposals
                    .get(&stake.proposal)
                    .is_some_and(|p| p.strategy == strategy_key)
            })
            .cloned()
            .collect();
        if stakes.is_empty() {
            debug!(strategy = %ctx.address, member = %member, "No stakes to release");
            return;
        }

        let decay = self
            .store
            .strategies
            .get(&strategy_key)
            .and_then(|strategy| self.store.config_of(strategy))
            .map(|c| c.decay.clone())
            .unwrap_or_default();
        let mut released = BigUint::default();

        for mut stake in stakes {
            let withdrawn = std::mem::take(&mut stake.amount);
            let Some(mut proposal) = self.store.proposals.get(&stake.proposal).cloned() else {
                continue;
            };
            proposal.staked_amount = crate::model::amount::saturating_sub(&proposal.staked_amount, &withdrawn);

            match self.reader.proposal(&ctx.address, &proposal.proposal_number) {
                Some(state) => {
                    proposal.max_cv_staked = max_conviction(&state.staked_amount, &decay).unwrap_or_default();
                    proposal.conviction_last = state.conviction_last;
                }
                None => {
                    error!(proposal = %proposal.id, "getProposal reverted during deactivation");
                    self.warn(
                        ctx,
                        WarningKind::ContractCallReverted,
                        format!("getProposal reverted for {}, using indexed stake", proposal.id),
                    );
                    proposal.max_cv_staked = max_conviction(&proposal.staked_amount, &decay).unwrap_or_default();
                }
            }
            proposal.updated_at = ctx.block_timestamp;

            debug!(proposal = %proposal.id, member = %member, amount = %withdrawn, "Stake released");
            released += &withdrawn;
            self.store.proposals.save(proposal);
            self.store.stakes.save(stake);
        }

        let member_key = member_strategy_id(member, &ctx.address);
        match self.store.member_strategies.get(&member_key).cloned() {
            Some(mut member_strategy) => {
                member_strategy.total_staked_points =
                    crate::model::amount::saturating_sub(&member_strategy.total_staked_points, &released);
                self.store.member_strategies.save(member_strategy);
            }
            None => self.missing(ctx, "member strategy", &member_key),
        }
        info!(strategy = %ctx.address, member = %member, released = %released, "Points deactivated");
    }

    fn distributed(&mut self, ctx: &EventContext, number: &BigUint) {
        let id = proposal_id(&ctx.address, number);
        if !self.refresh_status(ctx, &id, number, ProposalStatus::Executed) {
            return;
        }
        if let Some(state) = self.reader.strategy(&ctx.address) {
            if let Some(mut strategy) = self.store.strategies.get(&ctx.address.to_string()).cloned() {
                strategy.pool_amount = state.pool_amount;
                self.store.strategies.save(strategy);
            }
        }
    }

    fn proposal_disputed(
        &mut self,
        ctx: &EventContext,
        arbitrator: &Address,
        number: &BigUint,
        dispute: &BigUint,
        challenger: &Address,
        context: &str,
    ) {
        let proposal = proposal_id(&ctx.address, number);
        self.store.disputes.save(ProposalDispute {
            id: dispute_id(arbitrator, dispute),
            dispute_id: dispute.clone(),
            proposal: proposal.clone(),
            challenger: *challenger,
            context: context.to_string(),
            status: DisputeStatus::Waiting,
            ruling_outcome: None,
            created_at: ctx.block_timestamp,
            ruled_at: None,
        });
        self.schedule_content(context, MetadataKind::Dispute);
        info!(proposal = %proposal, dispute = %dispute, challenger = %challenger, "Proposal disputed");

        self.refresh_status(ctx, &proposal, number, ProposalStatus::Disputed);
    }

    fn ruling(&mut self, ctx: &EventContext, arbitrator: &Address, dispute: &BigUint, ruling: &BigUint) {
        let key = dispute_id(arbitrator, dispute);
        let Some(mut record) = self.store.disputes.get(&key).cloned() else {
            self.missing(ctx, "dispute", &key);
            return;
        };
        let Some(number) = self.store.proposals.get(&record.proposal).map(|p| p.proposal_number.clone()) else {
            let proposal = record.proposal.clone();
            self.missing(ctx, "proposal", &proposal);
            return;
        };

        record.status = DisputeStatus::Solved;
        record.ruled_at = Some(ctx.block_timestamp);
        record.ruling_outcome = Some(ruling.clone());
        let proposal = record.proposal.clone();
        self.store.disputes.save(record);

        // 1 upholds the proposal, 2 upholds the challenge
        let implied = if *ruling == BigUint::from(1u8) {
            Some(ProposalStatus::Active)
        } else if *ruling == BigUint::from(2u8) {
            Some(ProposalStatus::Rejected)
        } else {
            None
        };
        match implied {
            Some(status) => {
                self.refresh_status(ctx, &proposal, &number, status);
            }
            None => {
                if let Some(state) = self.reader.proposal(&ctx.address, &number) {
                    if let Some(status) = ProposalStatus::from_code(state.status) {
                        self.transition(ctx, &proposal, status);
                    }
                }
            }
        }
    }

    /// Re-read a proposal's status, falling back to the status the event
    /// implies when the read reverts. Returns false if the proposal is unknown.
    fn refresh_status(
        &mut self,
        ctx: &EventContext,
        id: &str,
        number: &BigUint,
        implied: ProposalStatus,
    ) -> bool {
        if !self.store.proposals.contains(id) {
            self.missing(ctx, "proposal", id);
            return false;
        }

        let read = self
            .reader
            .proposal(&ctx.address, number)
            .and_then(|state| ProposalStatus::from_code(state.status));
        let status = match read {
            Some(status) => status,
            None => {
                error!(proposal = %id, "getProposal reverted, using status implied by event");
                self.warn(
                    ctx,
                    WarningKind::ContractCallReverted,
                    format!("getProposal reverted for {}, assuming {}", id, implied),
                );
                implied
            }
        };
        self.transition(ctx, id, status);
        true
    }

    fn transition(&mut self, ctx: &EventContext, id: &str, next: ProposalStatus) {
        let Some(mut proposal) = self.store.proposals.get(id).cloned() else {
            return;
        };
        if !proposal.status.can_transition_to(next) {
            self.warn(
                ctx,
                WarningKind::InvalidTransition,
                format!("proposal {} cannot move from {} to {}", id, proposal.status, next),
            );
            return;
        }
        if proposal.status != next {
            info!(proposal = %id, from = %proposal.status, to = %next, "Proposal status changed");
        }
        proposal.status = next;
        proposal.updated_at = ctx.block_timestamp;
        self.store.proposals.save(proposal);
    }

    /// Decay of the strategy emitting the event
    fn strategy_decay(&mut self, ctx: &EventContext) -> Option<BigUint> {
        let key = ctx.address.to_string();
        let Some(strategy) = self.store.strategies.get(&key) else {
            self.missing(ctx, "strategy", &key);
            return None;
        };
        match self.store.config_of(strategy) {
            Some(config) => Some(config.decay.clone()),
            None => {
                let config = strategy.config.clone();
                self.missing(ctx, "strategy config", &config);
                None
            }
        }
    }

    pub(crate) fn missing(&mut self, ctx: &EventContext, kind: &str, id: &str) {
        self.warn(ctx, WarningKind::MissingEntity, format!("{} not found: {}", kind, id));
    }
}
