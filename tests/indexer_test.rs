//! Event fold integration tests
//!
//! Replays realistic event sequences through the public indexer API:
//! - collateral accounting and the clamp-at-zero withdrawal
//! - idempotent sybil score updates
//! - a pool lifecycle from initialization to execution
//! - snapshot persistence and resume

use gardens_indexer::abi::InitializeParams;
use gardens_indexer::events::{
    parse_event_log, ChainEvent, CollateralVaultEvent, CvStrategyEvent, GoodDollarEvent, LogEvent, PassportEvent,
};
use gardens_indexer::indexer::{Indexer, ProposalState, RecordedReader, StrategyState, WarningKind};
use gardens_indexer::model::{
    deposit_id, member_strategy_id, proposal_id, stake_id, Address, MetadataKind, PointSystem, PoolType,
    ProposalStatus, SybilKind,
};
use gardens_indexer::store::SnapshotDb;
use num_bigint::BigUint;
use tempfile::TempDir;

fn addr(last: &str) -> Address {
    format!("0x{:0>40}", last).parse().unwrap()
}

fn log(address: Address, block: u64, log_index: u32, event: ChainEvent) -> LogEvent {
    LogEvent {
        address,
        block_number: block,
        block_timestamp: 1_700_000_000 + block * 12,
        log_index,
        event,
    }
}

fn big(v: u64) -> BigUint {
    BigUint::from(v)
}

fn deposited(proposal: u64, user: Address, amount: u64) -> ChainEvent {
    ChainEvent::CollateralVault(CollateralVaultEvent::CollateralDeposited {
        proposal_id: big(proposal),
        user,
        amount: big(amount),
    })
}

fn withdrawn(proposal: u64, user: Address, amount: u64) -> ChainEvent {
    ChainEvent::CollateralVault(CollateralVaultEvent::CollateralWithdrawn {
        proposal_id: big(proposal),
        user,
        amount: big(amount),
        is_insufficient_available_amount: false,
    })
}

// =============================================================================
// Collateral
// =============================================================================

#[test]
fn test_deposit_then_partial_withdrawal() {
    let vault = addr("a1");
    let user = addr("b1");
    let mut indexer = Indexer::new(RecordedReader::new());

    indexer.apply(&log(vault, 10, 0, deposited(1, user, 100)));
    indexer.apply(&log(vault, 11, 0, withdrawn(1, user, 40)));

    let deposit = indexer.store().deposits.get(&deposit_id(&vault, &big(1), &user)).unwrap();
    assert_eq!(deposit.amount, big(60));
    assert!(!deposit.insufficient_available_amount);
    assert_eq!(deposit.withdrawn_to, Some(user));
    assert!(indexer.warnings().all(|w| w.kind != WarningKind::InsufficientCollateral));
}

#[test]
fn test_withdrawal_without_deposit_clamps_and_flags() {
    let vault = addr("a1");
    let user = addr("b1");
    let mut indexer = Indexer::new(RecordedReader::new());

    let stats = indexer.apply_all([log(vault, 10, 0, withdrawn(1, user, 25))].iter());
    assert_eq!(stats.applied, 1);

    let deposit = indexer.store().deposits.get(&deposit_id(&vault, &big(1), &user)).unwrap();
    assert_eq!(deposit.amount, big(0));
    assert!(deposit.insufficient_available_amount);

    let kinds: Vec<WarningKind> = indexer.warnings().map(|w| w.kind).collect();
    assert!(kinds.contains(&WarningKind::MissingEntity));
    assert!(kinds.contains(&WarningKind::InsufficientCollateral));
}

#[test]
fn test_overdrawn_withdrawal_keeps_later_deposits_whole() {
    let vault = addr("a1");
    let user = addr("b1");
    let mut indexer = Indexer::new(RecordedReader::new());

    indexer.apply(&log(vault, 10, 0, deposited(1, user, 30)));
    indexer.apply(&log(vault, 11, 0, withdrawn(1, user, 50)));
    indexer.apply(&log(vault, 12, 0, deposited(1, user, 20)));

    let deposit = indexer.store().deposits.get(&deposit_id(&vault, &big(1), &user)).unwrap();
    assert_eq!(deposit.amount, big(20));
    assert!(deposit.insufficient_available_amount);
}

// =============================================================================
// Sybil providers
// =============================================================================

#[test]
fn test_repeated_score_event_is_idempotent() {
    let scorer = addr("5c");
    let user = addr("b1");
    let event = ChainEvent::PassportScorer(PassportEvent::UserScoreAdded { user, score: big(42) });
    let mut indexer = Indexer::new(RecordedReader::new());

    indexer.apply(&log(scorer, 5, 0, event.clone()));
    indexer.apply(&log(scorer, 5, 0, event));

    let record = indexer.store().sybil_user(SybilKind::Passport, &user).unwrap();
    assert_eq!(record.score, big(42));
    assert!(record.verified);
    assert_eq!(indexer.store().sybil_users.len(), 1);
    // Same position is a retry, not a reorder
    assert_eq!(indexer.warnings().filter(|w| w.kind == WarningKind::OutOfOrder).count(), 0);
}

#[test]
fn test_providers_keep_separate_records() {
    let user = addr("b1");
    let mut indexer = Indexer::new(RecordedReader::new());

    indexer.apply(&log(
        addr("5c"),
        1,
        0,
        ChainEvent::PassportScorer(PassportEvent::UserScoreAdded { user, score: big(7) }),
    ));
    indexer.apply(&log(addr("6d"), 2, 0, ChainEvent::GoodDollarSybil(GoodDollarEvent::UserValidated { user })));
    indexer.apply(&log(addr("5c"), 3, 0, ChainEvent::PassportScorer(PassportEvent::UserRemoved { user })));

    let passport = indexer.store().sybil_user(SybilKind::Passport, &user).unwrap();
    assert_eq!(passport.score, big(0));
    assert!(!passport.verified);

    let good_dollar = indexer.store().sybil_user(SybilKind::GoodDollar, &user).unwrap();
    assert_eq!(good_dollar.score, big(1));
    assert!(good_dollar.verified);
}

// =============================================================================
// Pool lifecycle
// =============================================================================

fn pool_reader(strategy: Address, status: u8) -> RecordedReader {
    RecordedReader::new()
        .with_strategy(
            &strategy,
            StrategyState {
                pool_amount: big(10_000),
                total_effective_active_points: big(500_000),
                token: None,
                metadata: None,
            },
        )
        .with_proposal(
            &strategy,
            1,
            ProposalState {
                submitter: addr("b1"),
                beneficiary: addr("b2"),
                requested_token: Address::ZERO,
                requested_amount: big(0),
                staked_amount: big(0),
                status,
                block_last: 2,
                conviction_last: big(0),
                threshold: big(250_000),
                metadata: "QmUNLLsPACCz1vLxQVkXqqLX5R1X345qqfHbsf67hvA3Nn".into(),
            },
        )
}

fn init_event(pool_type: PoolType) -> ChainEvent {
    let data = InitializeParams {
        registry_community: addr("c0"),
        decay: big(5_000_000),
        max_ratio: big(2_000_000),
        weight: big(10_000),
        min_threshold_points: big(0),
        proposal_type: pool_type,
        point_system: PointSystem::Fixed,
        max_amount: big(0),
    }
    .encode();
    ChainEvent::CvStrategy(CvStrategyEvent::InitializedCV { pool_id: big(3), data })
}

#[test]
fn test_pool_lifecycle_to_execution() {
    let strategy = addr("aa");
    let member = addr("b1");
    let mut indexer = Indexer::new(pool_reader(strategy, 1));

    let events = vec![
        log(strategy, 1, 0, init_event(PoolType::Signaling)),
        log(
            strategy,
            1,
            1,
            ChainEvent::CvStrategy(CvStrategyEvent::PowerIncreased { member, points_to_increase: big(100_000) }),
        ),
        log(
            strategy,
            2,
            0,
            ChainEvent::CvStrategy(CvStrategyEvent::ProposalCreated { pool_id: big(3), proposal_id: big(1) }),
        ),
        log(
            strategy,
            3,
            0,
            ChainEvent::CvStrategy(CvStrategyEvent::SupportAdded {
                from: member,
                proposal_id: big(1),
                amount: big(100_000),
                total_staked_amount: big(100_000),
                conviction_last: big(0),
            }),
        ),
    ];
    let stats = indexer.apply_all(events.iter());
    assert_eq!(stats.applied, 4);
    assert_eq!(stats.warnings, 0);

    let id = proposal_id(&strategy, &big(1));
    let proposal = indexer.store().proposal(&id).unwrap();
    assert_eq!(proposal.staked_amount, big(100_000));
    assert_eq!(proposal.block_last, 3);
    // 100_000 * D / (D - D/2)
    assert_eq!(proposal.max_cv_staked, big(200_000));
    assert_eq!(indexer.store().stakes_of(&id).len(), 1);

    // Contract now reports executed
    let executed = ProposalState {
        status: 4,
        ..indexer.reader().proposals.values().next().unwrap().clone()
    };
    indexer.reader_mut().set_proposal(&strategy, &big(1), executed);
    indexer.apply(&log(
        strategy,
        4,
        0,
        ChainEvent::CvStrategy(CvStrategyEvent::Distributed {
            proposal_id: big(1),
            beneficiary: addr("b2"),
            amount: big(0),
        }),
    ));
    assert_eq!(indexer.store().proposal(&id).unwrap().status, ProposalStatus::Executed);

    // Terminal: with the read reverted the cancel implies cancelled, which is refused
    indexer.reader_mut().proposals.clear();
    indexer.apply(&log(
        strategy,
        5,
        0,
        ChainEvent::CvStrategy(CvStrategyEvent::ProposalCancelled { proposal_id: big(1) }),
    ));
    assert_eq!(indexer.store().proposal(&id).unwrap().status, ProposalStatus::Executed);
    assert!(indexer.warnings().any(|w| w.kind == WarningKind::InvalidTransition));
}

#[test]
fn test_points_deactivated_releases_member_stakes() {
    let strategy = addr("aa");
    let leaving = addr("b1");
    let staying = addr("b3");
    let mut indexer = Indexer::new(pool_reader(strategy, 1));

    let support = |from: Address, amount: u64, total: u64| {
        ChainEvent::CvStrategy(CvStrategyEvent::SupportAdded {
            from,
            proposal_id: big(1),
            amount: big(amount),
            total_staked_amount: big(total),
            conviction_last: big(0),
        })
    };
    let power = |member: Address| {
        ChainEvent::CvStrategy(CvStrategyEvent::PowerIncreased { member, points_to_increase: big(100_000) })
    };
    let events = vec![
        log(strategy, 1, 0, init_event(PoolType::Signaling)),
        log(strategy, 1, 1, power(leaving)),
        log(strategy, 1, 2, power(staying)),
        log(
            strategy,
            2,
            0,
            ChainEvent::CvStrategy(CvStrategyEvent::ProposalCreated { pool_id: big(3), proposal_id: big(1) }),
        ),
        log(strategy, 3, 0, support(leaving, 100_000, 100_000)),
        log(strategy, 3, 1, support(staying, 50_000, 150_000)),
    ];
    indexer.apply_all(events.iter());

    // Contract after deactivation: only the remaining stake
    let after = ProposalState {
        staked_amount: big(50_000),
        conviction_last: big(123),
        ..indexer.reader().proposals.values().next().unwrap().clone()
    };
    indexer.reader_mut().set_proposal(&strategy, &big(1), after);
    let stats = indexer.apply_all(
        [log(strategy, 4, 0, ChainEvent::CvStrategy(CvStrategyEvent::PointsDeactivated { member: leaving }))].iter(),
    );
    assert_eq!(stats.warnings, 0);

    let id = proposal_id(&strategy, &big(1));
    let proposal = indexer.store().proposal(&id).unwrap();
    assert_eq!(proposal.staked_amount, big(50_000));
    assert_eq!(proposal.conviction_last, big(123));
    // 50_000 * D / (D - D/2)
    assert_eq!(proposal.max_cv_staked, big(100_000));

    let stake_total: BigUint = indexer.store().stakes_of(&id).iter().map(|s| s.amount.clone()).sum();
    assert_eq!(stake_total, proposal.staked_amount);
    let released = indexer.store().stakes.get(&stake_id(&id, &leaving, &strategy)).unwrap();
    assert_eq!(released.amount, big(0));

    let leaving_member = indexer.store().member_strategies.get(&member_strategy_id(&leaving, &strategy)).unwrap();
    assert_eq!(leaving_member.total_staked_points, big(0));
    let staying_member = indexer.store().member_strategies.get(&member_strategy_id(&staying, &strategy)).unwrap();
    assert_eq!(staying_member.total_staked_points, big(50_000));

    // A second deactivation has nothing left to release
    indexer.apply(&log(strategy, 5, 0, ChainEvent::CvStrategy(CvStrategyEvent::PointsDeactivated { member: leaving })));
    assert_eq!(indexer.store().proposal(&id).unwrap().staked_amount, big(50_000));
}

#[test]
fn test_json_lines_replay() {
    let content = r#"
# vault activity
{"address":"0x00000000000000000000000000000000000000a1","block_number":10,"block_timestamp":1700000000,"log_index":0,"event":{"contract":"CollateralVault","event":{"name":"CollateralDeposited","proposal_id":"1","user":"0x00000000000000000000000000000000000000b1","amount":"100"}}}
{"address":"0x00000000000000000000000000000000000000a1","block_number":11,"block_timestamp":1700000012,"log_index":0,"event":{"contract":"CollateralVault","event":{"name":"CollateralWithdrawn","proposal_id":"1","user":"0x00000000000000000000000000000000000000b1","amount":"40"}}}
"#;
    let lines = parse_event_log(content);
    assert_eq!(lines.len(), 2);

    let mut indexer = Indexer::new(RecordedReader::new());
    let stats = indexer.replay(lines.iter());
    assert_eq!(stats.rejected, 0);
    let deposit = indexer
        .store()
        .deposits
        .get(&deposit_id(&addr("a1"), &big(1), &addr("b1")))
        .unwrap();
    assert_eq!(deposit.amount, big(60));
    assert_eq!(indexer.cursor(), Some((11, 0)));
}

#[test]
fn test_bad_event_line_is_recorded_and_replay_continues() {
    let content = r#"
{"address":"0x00000000000000000000000000000000000000a1","block_number":10,"block_timestamp":1700000000,"log_index":0,"event":{"contract":"CollateralVault","event":{"name":"CollateralDeposited","proposal_id":"1","user":"0x00000000000000000000000000000000000000b1","amount":"100"}}}
{"address":"0x00000000000000000000000000000000000000aa","block_number":11,"block_timestamp":1700000012,"log_index":0,"event":{"contract":"CvStrategy","event":{"name":"InitializedCV","pool_id":"1","data":"0x123"}}}
{"address":"0x00000000000000000000000000000000000000a1","block_number":12,"block_timestamp":1700000024,"log_index":0,"event":{"contract":"CollateralVault","event":{"name":"CollateralDeposited","proposal_id":"1","user":"0x00000000000000000000000000000000000000b1","amount":"5"}}}
"#;
    let lines = parse_event_log(content);
    assert_eq!(lines.len(), 3);

    let mut indexer = Indexer::new(RecordedReader::new());
    let stats = indexer.replay(lines.iter());
    assert_eq!(stats.applied, 2);
    assert_eq!(stats.rejected, 1);

    // The deposit after the bad line still landed
    let deposit = indexer
        .store()
        .deposits
        .get(&deposit_id(&addr("a1"), &big(1), &addr("b1")))
        .unwrap();
    assert_eq!(deposit.amount, big(105));
    assert_eq!(indexer.cursor(), Some((12, 0)));
    assert!(indexer.store().strategies.is_empty());

    let decode: Vec<_> = indexer.warnings().filter(|w| w.kind == WarningKind::DecodeFailed).collect();
    assert_eq!(decode.len(), 1);
    assert_eq!(decode[0].block_number, 11);
    assert!(decode[0].detail.contains("line 3"));
}

// =============================================================================
// Snapshot persistence
// =============================================================================

#[test]
fn test_snapshot_survives_restart() {
    let dir = TempDir::new().unwrap();
    let strategy = addr("aa");
    let mut indexer = Indexer::new(pool_reader(strategy, 1));
    indexer.apply(&log(strategy, 1, 0, init_event(PoolType::Signaling)));
    indexer.apply(&log(
        strategy,
        2,
        0,
        ChainEvent::CvStrategy(CvStrategyEvent::ProposalCreated { pool_id: big(3), proposal_id: big(1) }),
    ));

    {
        let mut db = SnapshotDb::open(dir.path()).unwrap();
        db.save(&indexer.snapshot()).unwrap();
    }

    let db = SnapshotDb::open(dir.path()).unwrap();
    let resumed = Indexer::from_snapshot(RecordedReader::new(), db.load().unwrap(), 100);
    assert_eq!(resumed.cursor(), Some((2, 0)));
    assert_eq!(resumed.store().counts(), indexer.store().counts());
    assert_eq!(
        resumed.pending_content(),
        vec![(
            "QmUNLLsPACCz1vLxQVkXqqLX5R1X345qqfHbsf67hvA3Nn".to_string(),
            MetadataKind::Proposal
        )]
    );
    let id = proposal_id(&strategy, &big(1));
    assert_eq!(resumed.store().proposal(&id), indexer.store().proposal(&id));
}
