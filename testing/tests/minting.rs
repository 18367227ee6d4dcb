//! Minting behavior against the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::sync::Arc;
use turnstile_core::environment::Clock;
use turnstile_core::minter::{MintError, Minter, MinterConfig};
use turnstile_core::store::TicketStore;
use turnstile_core::types::{IdempotencyKey, Money, TicketState, UserId};
use turnstile_testing::fixtures::{Fixture, GA_PRICE};
use turnstile_testing::{RepeatingCodeSource, init_test_tracing};

#[tokio::test]
async fn mints_one_ticket_per_line_item() {
    init_test_tracing();
    let fx = Fixture::new();
    let owner = UserId::new();

    let result = fx.mint("pay-3", &fx.request(owner, &[1, 2, 4])).await.unwrap();

    assert!(!result.is_replay());
    let tickets = result.tickets();
    assert_eq!(tickets.len(), 3);
    assert_eq!(
        tickets.iter().map(|t| t.quantity).collect::<Vec<_>>(),
        vec![1, 2, 4]
    );
    for t in tickets {
        assert_eq!(t.owner_user_id, owner);
        assert_eq!(t.state, TicketState::Unredeemed);
        assert_eq!(t.price, GA_PRICE);
        assert_eq!(t.issued_at, fx.clock.now());
        assert_eq!(t.valid_until, t.issued_at + MinterConfig::default().validity);
        assert_eq!(fx.store.get(t.id).await.unwrap().as_ref(), Some(t));
    }
}

#[tokio::test]
async fn retry_with_same_key_returns_same_tickets() {
    let fx = Fixture::new();
    let request = fx.request(UserId::new(), &[1, 1, 1]);

    let first = fx.mint("pay-K1", &request).await.unwrap();
    let again = fx.mint("pay-K1", &request).await.unwrap();

    assert!(again.is_replay());
    let first_ids: Vec<_> = first.tickets().iter().map(|t| t.id).collect();
    let again_ids: Vec<_> = again.tickets().iter().map(|t| t.id).collect();
    assert_eq!(first_ids, again_ids);
    assert_eq!(fx.store.ticket_count(), 3);
}

#[tokio::test]
async fn replay_ignores_later_catalog_changes() {
    let fx = Fixture::new();
    let request = fx.request(UserId::new(), &[2]);
    fx.mint("pay-before-sellout", &request).await.unwrap();

    fx.catalog.set_available(fx.event_id, fx.ticket_type_id, false);

    assert!(fx.mint("pay-before-sellout", &request).await.unwrap().is_replay());
}

#[tokio::test]
async fn key_reuse_for_different_purchase_is_rejected() {
    let fx = Fixture::new();
    let owner = UserId::new();
    fx.mint("pay-reuse", &fx.request(owner, &[1])).await.unwrap();

    let err = fx.mint("pay-reuse", &fx.request(owner, &[2])).await.unwrap_err();

    assert!(matches!(err, MintError::IdempotencyKeyReused { .. }));
    assert_eq!(fx.store.ticket_count(), 1);
}

#[tokio::test]
async fn concurrent_same_key_mints_once() {
    let fx = Arc::new(Fixture::new());
    let request = fx.request(UserId::new(), &[1, 1]);

    let attempts = (0..8).map(|_| {
        let fx = Arc::clone(&fx);
        let request = request.clone();
        tokio::spawn(async move { fx.mint("pay-race", &request).await })
    });
    let results: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| !r.is_replay()).count(), 1);
    let id_sets: HashSet<Vec<_>> = results
        .iter()
        .map(|r| r.tickets().iter().map(|t| t.id).collect())
        .collect();
    assert_eq!(id_sets.len(), 1);
    assert_eq!(fx.store.ticket_count(), 2);
}

#[tokio::test]
async fn failed_batch_leaves_nothing_and_retry_succeeds() {
    let fx = Fixture::new();
    let owner = UserId::new();
    let request = fx.request(owner, &[1, 1, 1]);
    fx.store.fail_next_batch_writes(1);

    let err = fx.mint("pay-partial", &request).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(fx.store.ticket_count(), 0);
    assert!(fx.store.list_for_owner(owner).await.unwrap().is_empty());

    let retried = fx.mint("pay-partial", &request).await.unwrap();
    assert!(!retried.is_replay());
    assert_eq!(retried.tickets().len(), 3);
}

#[tokio::test]
async fn redemption_codes_are_unique_across_many_batches() {
    let fx = Fixture::new();
    let mut codes = HashSet::new();
    for i in 0..200 {
        let result = fx
            .mint(&format!("pay-bulk-{i}"), &fx.request(UserId::new(), &[1, 1, 1, 1, 1]))
            .await
            .unwrap();
        for t in result.tickets() {
            assert!(codes.insert(t.redemption_code.clone()));
        }
    }
    assert_eq!(codes.len(), 1_000);
}

#[tokio::test]
async fn code_collision_aborts_the_whole_batch() {
    let fx = Fixture::new();
    let minter = Minter::new(
        fx.store.clone(),
        fx.catalog.clone(),
        fx.clock.clone(),
        Arc::new(RepeatingCodeSource::new(7)),
        MinterConfig::default(),
    );
    let owner = UserId::new();
    let key = IdempotencyKey::for_payment("pay-collide");

    let err = minter.mint(&key, &fx.request(owner, &[1, 1])).await.unwrap_err();

    assert_eq!(err, MintError::CodeCollision);
    assert!(err.is_retryable());
    assert_eq!(fx.store.ticket_count(), 0);
    assert!(fx.store.get_batch(key).await.unwrap().is_none());
}

#[tokio::test]
async fn purchase_validation() {
    let fx = Fixture::with_config(MinterConfig {
        max_quantity_per_line: 4,
        ..MinterConfig::default()
    });
    let owner = UserId::new();

    let empty = fx.request(owner, &[]);
    assert_eq!(fx.mint("pay-v1", &empty).await.unwrap_err(), MintError::EmptyPurchase);

    let zero = fx.request(owner, &[1, 0]);
    assert!(matches!(
        fx.mint("pay-v2", &zero).await.unwrap_err(),
        MintError::InvalidQuantity { line: 1, quantity: 0, max: 4 }
    ));

    let too_many = fx.request(owner, &[5]);
    assert!(matches!(
        fx.mint("pay-v3", &too_many).await.unwrap_err(),
        MintError::InvalidQuantity { quantity: 5, .. }
    ));

    let mut unknown = fx.request(owner, &[1]);
    unknown.items[0].ticket_type_id = turnstile_core::types::TicketTypeId::new();
    assert!(matches!(
        fx.mint("pay-v4", &unknown).await.unwrap_err(),
        MintError::UnknownTicketType { .. }
    ));

    let mut stale_quote = fx.request(owner, &[1]);
    stale_quote.items[0].price = Money::from_cents(1);
    assert!(matches!(
        fx.mint("pay-v5", &stale_quote).await.unwrap_err(),
        MintError::PriceChanged { current, .. } if current == GA_PRICE
    ));

    fx.catalog.set_available(fx.event_id, fx.ticket_type_id, false);
    assert!(matches!(
        fx.mint("pay-v6", &fx.request(owner, &[1])).await.unwrap_err(),
        MintError::SoldOut { .. }
    ));

    assert_eq!(fx.store.ticket_count(), 0);
}

#[tokio::test]
async fn infrastructure_failures_are_retryable() {
    let fx = Fixture::new();
    let request = fx.request(UserId::new(), &[1]);

    fx.catalog.set_unreachable(true);
    assert!(fx.mint("pay-infra", &request).await.unwrap_err().is_retryable());
    fx.catalog.set_unreachable(false);

    fx.store.set_unavailable(true);
    assert!(fx.mint("pay-infra", &request).await.unwrap_err().is_retryable());
    fx.store.set_unavailable(false);

    assert!(fx.mint("pay-infra", &request).await.is_ok());
}

proptest::proptest! {
    #![proptest_config(proptest::prelude::ProptestConfig::with_cases(32))]

    #[test]
    fn any_valid_purchase_mints_and_replays_line_for_line(
        quantities in proptest::collection::vec(1u32..=10, 1..8),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let fx = Fixture::new();
            let request = fx.request(UserId::new(), &quantities);

            let minted = fx.mint("pay-prop", &request).await.unwrap();
            let replayed = fx.mint("pay-prop", &request).await.unwrap();

            let minted_quantities: Vec<u32> = minted.tickets().iter().map(|t| t.quantity).collect();
            assert_eq!(minted_quantities, quantities);
            assert!(replayed.is_replay());
            assert_eq!(replayed.tickets(), minted.tickets());

            let codes: HashSet<_> = minted.tickets().iter().map(|t| &t.redemption_code).collect();
            assert_eq!(codes.len(), quantities.len());
            assert_eq!(fx.store.ticket_count(), quantities.len());
        });
    }
}

#[tokio::test]
async fn batch_size_is_bounded_even_with_unit_lines() {
    let fx = Fixture::with_config(MinterConfig {
        max_quantity_per_line: 1,
        max_items_per_batch: 8,
        ..MinterConfig::default()
    });
    let owner = UserId::new();

    let at_limit = fx.request(owner, &[1; 8]);
    assert_eq!(fx.mint("pay-b8", &at_limit).await.unwrap().tickets().len(), 8);

    let flood = fx.request(owner, &vec![1; 5000]);
    assert_eq!(
        fx.mint("pay-b5000", &flood).await.unwrap_err(),
        MintError::TooManyItems { items: 5000, max: 8 }
    );
    assert_eq!(fx.store.ticket_count(), 8);
}

#[tokio::test]
async fn unrepresentable_validity_is_an_error_not_a_panic() {
    let fx = Fixture::with_config(MinterConfig {
        validity: chrono::Duration::days(100_000_000),
        ..MinterConfig::default()
    });
    let key = IdempotencyKey::for_payment("pay-far-future");

    let err = fx.mint("pay-far-future", &fx.request(UserId::new(), &[1])).await.unwrap_err();

    assert_eq!(err, MintError::ValidityOutOfRange);
    assert!(!err.is_retryable());
    assert_eq!(fx.store.ticket_count(), 0);
    assert!(fx.store.get_batch(key).await.unwrap().is_none());
}
