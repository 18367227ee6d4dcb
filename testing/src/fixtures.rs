//! Pre-wired minter, validator and doubles over a single on-sale event.

use crate::catalog::StaticCatalog;
use crate::mocks::{ManualClock, test_epoch};
use crate::store::InMemoryTicketStore;
use chrono::Duration;
use std::sync::Arc;
use turnstile_core::code::OsRngCodeSource;
use turnstile_core::minter::{LineItem, MintError, MintRequest, MintResult, Minter, MinterConfig};
use turnstile_core::types::{
    DisplayFields, EventId, IdempotencyKey, Money, ScannerId, Ticket, TicketId, TicketTypeId,
    UserId,
};
use turnstile_core::validator::{RedemptionValidator, ScanOutcome, ValidateError};

/// Price of the fixture's general admission ticket
pub const GA_PRICE: Money = Money::from_cents(4_200);

/// A minter and validator sharing one in-memory store, catalog and clock.
///
/// The catalog holds one event with a "General Admission" type priced at
/// [`GA_PRICE`]. The clock starts at [`test_epoch`].
pub struct Fixture {
    /// Shared store
    pub store: Arc<InMemoryTicketStore>,
    /// Shared catalog
    pub catalog: Arc<StaticCatalog>,
    /// Shared clock
    pub clock: Arc<ManualClock>,
    /// Minter over the shared doubles
    pub minter: Minter,
    /// Validator over the shared doubles
    pub validator: RedemptionValidator,
    /// The on-sale event
    pub event_id: EventId,
    /// Its general admission type
    pub ticket_type_id: TicketTypeId,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    /// Wire everything with the default minter config.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MinterConfig::default())
    }

    /// Wire everything with `config`.
    #[must_use]
    pub fn with_config(config: MinterConfig) -> Self {
        let store = Arc::new(InMemoryTicketStore::new());
        let catalog = Arc::new(StaticCatalog::new());
        let clock = Arc::new(ManualClock::new(test_epoch()));
        let event_id = EventId::new();
        let ticket_type_id = TicketTypeId::new();
        catalog.insert(event_id, ticket_type_id, "General Admission", GA_PRICE);

        let minter = Minter::new(
            store.clone(),
            catalog.clone(),
            clock.clone(),
            Arc::new(OsRngCodeSource),
            config,
        );
        let validator = RedemptionValidator::new(store.clone(), clock.clone());

        Self {
            store,
            catalog,
            clock,
            minter,
            validator,
            event_id,
            ticket_type_id,
        }
    }

    /// A general admission line of `quantity`.
    #[must_use]
    pub const fn line(&self, quantity: u32) -> LineItem {
        LineItem {
            event_id: self.event_id,
            ticket_type_id: self.ticket_type_id,
            quantity,
            price: GA_PRICE,
        }
    }

    /// A purchase of one general admission ticket per entry of `quantities`.
    #[must_use]
    pub fn request(&self, owner: UserId, quantities: &[u32]) -> MintRequest {
        MintRequest {
            owner,
            items: quantities.iter().map(|&q| self.line(q)).collect(),
        }
    }

    /// Display fields for the fixture event.
    #[must_use]
    pub fn display(&self) -> DisplayFields {
        DisplayFields {
            event_title: "Turnstile Test Night".to_string(),
            image_url: Some("https://cdn.example/poster.png".to_string()),
            venue: "Hall 1".to_string(),
            starts_at: test_epoch() + Duration::days(14),
        }
    }

    /// Mint `request` under the key derived from `payment_id`.
    ///
    /// # Errors
    ///
    /// Propagates the minter's error.
    pub async fn mint(&self, payment_id: &str, request: &MintRequest) -> Result<MintResult, MintError> {
        self.minter
            .mint(&IdempotencyKey::for_payment(payment_id), request)
            .await
    }

    /// Mint a single one-admission ticket for `owner`.
    ///
    /// # Panics
    ///
    /// Panics if minting fails.
    #[allow(clippy::panic)]
    pub async fn mint_one(&self, owner: UserId) -> Ticket {
        let payment = format!("pay-{}", TicketId::new());
        match self.mint(&payment, &self.request(owner, &[1])).await {
            Ok(result) => result.into_tickets().remove(0),
            Err(e) => panic!("fixture mint failed: {e}"),
        }
    }

    /// Scan `ticket` at the fixture event from `scanner`.
    ///
    /// # Errors
    ///
    /// Propagates infrastructure failures.
    pub async fn scan(&self, ticket: &Ticket, scanner: &str) -> Result<ScanOutcome, ValidateError> {
        self.validator
            .validate(
                ticket.redemption_code.as_str(),
                self.event_id,
                &ScannerId::new(scanner),
            )
            .await
    }
}
