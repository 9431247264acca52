//! Collateral vault handlers
//!
//! Deposits accumulate per (vault, proposal, depositor). Withdrawals
//! subtract and clamp at zero; an underflow flags the entity instead of
//! driving the amount negative.

use num_bigint::BigUint;
use tracing::{debug, error};

use super::{ContractReader, EventContext, Indexer, WarningKind};
use crate::events::CollateralVaultEvent;
use crate::model::*;

impl<R: ContractReader> Indexer<R> {
    pub(crate) fn apply_collateral(&mut self, ctx: &EventContext, event: &CollateralVaultEvent) {
        match event {
            CollateralVaultEvent::CollateralDeposited { proposal_id, user, amount } => {
                self.collateral_deposited(ctx, proposal_id, user, amount)
            }
            CollateralVaultEvent::CollateralWithdrawn {
                proposal_id,
                user,
                amount,
                is_insufficient_available_amount,
            } => self.collateral_withdrawn(ctx, proposal_id, user, user, amount, *is_insufficient_available_amount),
            CollateralVaultEvent::CollateralWithdrawnFor {
                proposal_id,
                from_user,
                to_user,
                amount,
                is_insufficient_available_amount,
            } => self.collateral_withdrawn(
                ctx,
                proposal_id,
                from_user,
                to_user,
                amount,
                *is_insufficient_available_amount,
            ),
        }
    }

    fn collateral_deposited(&mut self, ctx: &EventContext, proposal: &BigUint, user: &Address, amount: &BigUint) {
        self.ensure_vault(ctx);

        let id = deposit_id(&ctx.address, proposal, user);
        let deposit = match self.store.deposits.get(&id).cloned() {
            Some(mut existing) => {
                existing.amount += amount;
                existing
            }
            None => CollateralVaultDeposit {
                id: id.clone(),
                collateral_vault: ctx.address.to_string(),
                proposal_id: proposal.clone(),
                depositor: *user,
                amount: amount.clone(),
                created_at: ctx.block_timestamp,
                withdrawn_at: None,
                withdrawn_to: None,
                insufficient_available_amount: false,
            },
        };
        debug!(deposit = %id, amount = %deposit.amount, "Collateral deposited");
        self.store.deposits.save(deposit);
    }

    fn collateral_withdrawn(
        &mut self,
        ctx: &EventContext,
        proposal: &BigUint,
        from: &Address,
        to: &Address,
        amount: &BigUint,
        reported_insufficient: bool,
    ) {
        self.ensure_vault(ctx);

        let id = deposit_id(&ctx.address, proposal, from);
        let missing = !self.store.deposits.contains(&id);
        let mut deposit = match self.store.deposits.get(&id).cloned() {
            Some(existing) => existing,
            None => {
                self.warn(
                    ctx,
                    WarningKind::MissingEntity,
                    format!("withdrawal of {} from unknown deposit {}", amount, id),
                );
                CollateralVaultDeposit {
                    id: id.clone(),
                    collateral_vault: ctx.address.to_string(),
                    proposal_id: proposal.clone(),
                    depositor: *from,
                    amount: BigUint::default(),
                    created_at: ctx.block_timestamp,
                    withdrawn_at: None,
                    withdrawn_to: None,
                    insufficient_available_amount: false,
                }
            }
        };

        let underflow = *amount > deposit.amount;
        deposit.amount = crate::model::amount::saturating_sub(&deposit.amount, amount);
        deposit.withdrawn_at = Some(ctx.block_timestamp);
        deposit.withdrawn_to = Some(*to);

        if missing || underflow || reported_insufficient {
            deposit.insufficient_available_amount = true;
            error!(
                proposal_id = %proposal,
                user = %from,
                requested = %amount,
                "Insufficient available amount to withdraw"
            );
            self.warn(
                ctx,
                WarningKind::InsufficientCollateral,
                format!("insufficient collateral for withdrawal of {} from {}", amount, id),
            );
        }

        debug!(deposit = %id, remaining = %deposit.amount, to = %to, "Collateral withdrawn");
        self.store.deposits.save(deposit);
    }

    /// Create the vault record on first sight, resolving its owning strategy
    fn ensure_vault(&mut self, ctx: &EventContext) {
        let id = ctx.address.to_string();
        if self.store.vaults.contains(&id) {
            return;
        }
        let strategy = self.reader.vault_owner(&ctx.address);
        if strategy.is_none() {
            self.warn(
                ctx,
                WarningKind::ContractCallReverted,
                format!("owner() reverted for vault {}", ctx.address),
            );
        }
        self.store.vaults.save(CollateralVault { id, strategy });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChainEvent, LogEvent};
    use crate::indexer::RecordedReader;

    fn vault() -> Address {
        "0x00000000000000000000000000000000000000ee".parse().unwrap()
    }

    fn user() -> Address {
        "0x00000000000000000000000000000000000000b1".parse().unwrap()
    }

    fn at(block: u64, event: CollateralVaultEvent) -> LogEvent {
        LogEvent {
            address: vault(),
            block_number: block,
            block_timestamp: 500 + block,
            log_index: 0,
            event: ChainEvent::CollateralVault(event),
        }
    }

    fn indexer() -> Indexer<RecordedReader> {
        let owner: Address = "0x00000000000000000000000000000000000000aa".parse().unwrap();
        Indexer::new(RecordedReader::new().with_vault_owner(&vault(), owner))
    }

    #[test]
    fn test_repeated_deposits_accumulate() {
        let mut indexer = indexer();
        for block in [1, 2] {
            indexer.apply(&at(
                block,
                CollateralVaultEvent::CollateralDeposited {
                    proposal_id: BigUint::from(1u32),
                    user: user(),
                    amount: BigUint::from(25u32),
                },
            ));
        }
        let id = deposit_id(&vault(), &BigUint::from(1u32), &user());
        let deposit = indexer.store().deposits.get(&id).unwrap();
        assert_eq!(deposit.amount, BigUint::from(50u32));
        assert_eq!(deposit.created_at, 501);

        let vault_record = indexer.store().vaults.get(&vault().to_string()).unwrap();
        assert!(vault_record.strategy.is_some());
    }

    #[test]
    fn test_withdraw_for_credits_recipient_and_clamps() {
        let mut indexer = indexer();
        let recipient: Address = "0x00000000000000000000000000000000000000b2".parse().unwrap();
        indexer.apply(&at(
            1,
            CollateralVaultEvent::CollateralDeposited {
                proposal_id: BigUint::from(2u32),
                user: user(),
                amount: BigUint::from(10u32),
            },
        ));
        indexer.apply(&at(
            2,
            CollateralVaultEvent::CollateralWithdrawnFor {
                proposal_id: BigUint::from(2u32),
                from_user: user(),
                to_user: recipient,
                amount: BigUint::from(15u32),
                is_insufficient_available_amount: false,
            },
        ));

        let id = deposit_id(&vault(), &BigUint::from(2u32), &user());
        let deposit = indexer.store().deposits.get(&id).unwrap();
        assert_eq!(deposit.amount, BigUint::default());
        assert_eq!(deposit.withdrawn_to, Some(recipient));
        assert!(deposit.insufficient_available_amount);
        assert_eq!(indexer.warnings().last().unwrap().kind, WarningKind::InsufficientCollateral);
    }

    #[test]
    fn test_reported_insufficient_flag_is_kept() {
        let mut indexer = indexer();
        indexer.apply(&at(
            1,
            CollateralVaultEvent::CollateralDeposited {
                proposal_id: BigUint::from(3u32),
                user: user(),
                amount: BigUint::from(10u32),
            },
        ));
        indexer.apply(&at(
            2,
            CollateralVaultEvent::CollateralWithdrawn {
                proposal_id: BigUint::from(3u32),
                user: user(),
                amount: BigUint::from(4u32),
                is_insufficient_available_amount: true,
            },
        ));
        let id = deposit_id(&vault(), &BigUint::from(3u32), &user());
        let deposit = indexer.store().deposits.get(&id).unwrap();
        assert_eq!(deposit.amount, BigUint::from(6u32));
        assert!(deposit.insufficient_available_amount);
    }

    #[test]
    fn test_zero_withdrawal_from_unknown_deposit_is_flagged() {
        let mut indexer = indexer();
        indexer.apply(&at(
            1,
            CollateralVaultEvent::CollateralWithdrawn {
                proposal_id: BigUint::from(4u32),
                user: user(),
                amount: BigUint::default(),
                is_insufficient_available_amount: false,
            },
        ));
        let id = deposit_id(&vault(), &BigUint::from(4u32), &user());
        let deposit = indexer.store().deposits.get(&id).unwrap();
        assert_eq!(deposit.amount, BigUint::default());
        assert!(deposit.insufficient_available_amount);

        let kinds: Vec<WarningKind> = indexer.warnings().map(|w| w.kind).collect();
        assert_eq!(kinds, vec![WarningKind::MissingEntity, WarningKind::InsufficientCollateral]);
    }

    #[test]
    fn test_first_withdrawal_creates_vault_record() {
        let mut indexer = indexer();
        indexer.apply(&at(
            1,
            CollateralVaultEvent::CollateralWithdrawn {
                proposal_id: BigUint::from(5u32),
                user: user(),
                amount: BigUint::from(3u32),
                is_insufficient_available_amount: false,
            },
        ));
        let deposit = indexer
            .store()
            .deposits
            .get(&deposit_id(&vault(), &BigUint::from(5u32), &user()))
            .unwrap();
        let vault_record = indexer.store().vaults.get(&deposit.collateral_vault).unwrap();
        assert_eq!(vault_record.id, vault().to_string());
        assert!(vault_record.strategy.is_some());
    }
}
