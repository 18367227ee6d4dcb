//! Checkout Orchestrator: turns a confirmed payment into minted, cached tickets.
//!
//! The flow for a cart checkout:
//!
//! 1. refuse unless the payment signal says `succeeded`
//! 2. expand every cart line into one unit line item per admission
//! 3. derive the idempotency key from the payment confirmation id
//! 4. mint through a [`MintClient`], retrying transient failures with the same key
//! 5. write every minted ticket into the [`OfflineCache`]
//! 6. remove the purchased lines from the [`Cart`]
//!
//! Any failure before step 6 leaves the cart untouched. Because the key is a
//! function of the payment, re-running a failed or timed-out checkout replays
//! the original mint instead of charging twice for new tickets.

use crate::cache::{CacheBackend, CacheError, OfflineCache};
use crate::minter::{LineItem, MintError, MintRequest, MintResult, Minter};
use crate::retry::{RetryPolicy, retry_with_predicate};
use crate::types::{DisplayFields, EventId, IdempotencyKey, Money, Ticket, TicketTypeId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

// ============================================================================
// Cart
// ============================================================================

/// A line in the cart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Event
    pub event_id: EventId,
    /// Ticket type
    pub ticket_type_id: TicketTypeId,
    /// Number of admissions
    pub quantity: u32,
    /// Quoted unit price
    pub unit_price: Money,
    /// Display fields cached with each minted ticket
    pub display: DisplayFields,
}

impl CartLine {
    fn same_product(&self, other: &Self) -> bool {
        self.event_id == other.event_id && self.ticket_type_id == other.ticket_type_id
    }
}

/// The shopping cart. Shared by the UI and the orchestrator.
#[derive(Debug, Default)]
pub struct Cart {
    lines: Mutex<Vec<CartLine>>,
}

impl Cart {
    /// Create an empty cart
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a line, merging with an existing line for the same ticket type.
    ///
    /// A merged line takes the newer quote and display fields.
    pub fn add(&self, line: CartLine) {
        let mut lines = self.lock();
        if let Some(existing) = lines.iter_mut().find(|l| l.same_product(&line)) {
            existing.quantity = existing.quantity.saturating_add(line.quantity);
            existing.unit_price = line.unit_price;
            existing.display = line.display;
        } else {
            lines.push(line);
        }
    }

    /// Set the quantity of a ticket type. Zero removes the line.
    ///
    /// Returns whether a line for the ticket type existed.
    pub fn set_quantity(&self, event_id: EventId, ticket_type_id: TicketTypeId, quantity: u32) -> bool {
        let mut lines = self.lock();
        let Some(pos) = lines
            .iter()
            .position(|l| l.event_id == event_id && l.ticket_type_id == ticket_type_id)
        else {
            return false;
        };
        if quantity == 0 {
            lines.remove(pos);
        } else {
            lines[pos].quantity = quantity;
        }
        true
    }

    /// Remove a ticket type. Returns whether it was present.
    pub fn remove(&self, event_id: EventId, ticket_type_id: TicketTypeId) -> bool {
        self.set_quantity(event_id, ticket_type_id, 0)
    }

    /// Empty the cart
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Snapshot of the current lines
    #[must_use]
    pub fn lines(&self) -> Vec<CartLine> {
        self.lock().clone()
    }

    /// Whether the cart has no lines
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sum of `unit_price * quantity`, `None` on overflow.
    #[must_use]
    pub fn total(&self) -> Option<Money> {
        self.lock().iter().try_fold(Money::default(), |acc, l| {
            acc.checked_add(l.unit_price.checked_multiply(l.quantity)?)
        })
    }

    /// Subtract a completed purchase from the cart.
    ///
    /// Lines added or grown after the purchase snapshot was taken survive.
    fn complete(&self, purchased: &[CartLine]) {
        let mut lines = self.lock();
        for bought in purchased {
            if let Some(line) = lines.iter_mut().find(|l| l.same_product(bought)) {
                line.quantity = line.quantity.saturating_sub(bought.quantity);
            }
        }
        lines.retain(|l| l.quantity > 0);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CartLine>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Expand cart lines into unit line items, one per admission, with the
/// display fields for each resulting ticket in the same order.
#[must_use]
pub fn expand_lines(lines: &[CartLine]) -> (Vec<LineItem>, Vec<DisplayFields>) {
    lines
        .iter()
        .flat_map(|line| {
            (0..line.quantity).map(move |_| {
                (
                    LineItem {
                        event_id: line.event_id,
                        ticket_type_id: line.ticket_type_id,
                        quantity: 1,
                        price: line.unit_price,
                    },
                    line.display.clone(),
                )
            })
        })
        .unzip()
}

// ============================================================================
// Payment and minting seams
// ============================================================================

/// Signal from the payment processor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    /// Stable id of the charge
    pub confirmation_id: String,
    /// Whether the charge succeeded
    pub succeeded: bool,
}

/// How the orchestrator reaches the minter.
pub trait MintClient: Send + Sync {
    /// Mint `request` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`MintError`]; [`MintError::is_retryable`] decides whether the
    /// orchestrator tries again.
    fn mint(
        &self,
        key: &IdempotencyKey,
        request: &MintRequest,
    ) -> impl Future<Output = Result<MintResult, MintError>> + Send;
}

/// Mints in-process through a [`Minter`].
#[derive(Clone)]
pub struct LocalMintClient {
    minter: Minter,
}

impl LocalMintClient {
    /// Wrap a minter
    #[must_use]
    pub const fn new(minter: Minter) -> Self {
        Self { minter }
    }
}

impl MintClient for LocalMintClient {
    async fn mint(&self, key: &IdempotencyKey, request: &MintRequest) -> Result<MintResult, MintError> {
        self.minter.mint(key, request).await
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Checkout failure. The cart is unchanged whenever this is returned.
#[derive(Error, Debug)]
pub enum CheckoutError {
    /// The payment signal was not a success.
    #[error("Payment {confirmation_id} is not confirmed")]
    PaymentNotConfirmed {
        /// Confirmation id that was presented
        confirmation_id: String,
    },

    /// Nothing to buy.
    #[error("Cart is empty")]
    EmptyCart,

    /// The minter refused the purchase.
    #[error("Mint rejected: {0}")]
    MintRejected(MintError),

    /// Minting kept failing transiently; retry the checkout.
    #[error("Mint failed, retry checkout: {0}")]
    Retryable(MintError),

    /// Tickets were minted but could not be cached; retry the checkout.
    #[error("Tickets minted but not cached: {0}")]
    Cache(#[from] CacheError),
}

impl CheckoutError {
    /// Whether re-running the same checkout may succeed.
    ///
    /// A retried checkout reuses the payment-derived key, so it never mints twice.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_) | Self::Cache(_))
    }
}

/// Completed checkout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutReceipt {
    /// Key the mint ran under
    pub idempotency_key: IdempotencyKey,
    /// Minted tickets, one per admission
    pub tickets: Vec<Ticket>,
    /// Whether the tickets came from an earlier attempt
    pub replayed: bool,
}

/// Runs checkouts for the device's user.
pub struct CheckoutOrchestrator<M, B> {
    mint_client: M,
    cart: Arc<Cart>,
    cache: Arc<OfflineCache<B>>,
    retry: RetryPolicy,
}

impl<M: MintClient, B: CacheBackend> CheckoutOrchestrator<M, B> {
    /// Create an orchestrator. Tickets are minted for the cache owner.
    #[must_use]
    pub const fn new(
        mint_client: M,
        cart: Arc<Cart>,
        cache: Arc<OfflineCache<B>>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            mint_client,
            cart,
            cache,
            retry,
        }
    }

    /// The injected cart
    #[must_use]
    pub fn cart(&self) -> &Arc<Cart> {
        &self.cart
    }

    /// Check out the whole cart against `payment`.
    ///
    /// # Errors
    ///
    /// See [`CheckoutError`]; the cart is kept on every error.
    pub async fn checkout(
        &self,
        payment: &PaymentConfirmation,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        ensure_paid(payment)?;
        let lines = self.cart.lines();
        if lines.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let receipt = self.purchase(&lines, payment).await?;
        self.cart.complete(&lines);
        Ok(receipt)
    }

    /// One-click purchase of a single line, bypassing the cart.
    ///
    /// # Errors
    ///
    /// See [`CheckoutError`].
    pub async fn buy_now(
        &self,
        line: CartLine,
        payment: &PaymentConfirmation,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        ensure_paid(payment)?;
        if line.quantity == 0 {
            return Err(CheckoutError::EmptyCart);
        }
        self.purchase(std::slice::from_ref(&line), payment).await
    }

    async fn purchase(
        &self,
        lines: &[CartLine],
        payment: &PaymentConfirmation,
    ) -> Result<CheckoutReceipt, CheckoutError> {
        let (items, displays) = expand_lines(lines);
        let request = MintRequest {
            owner: self.cache.owner(),
            items,
        };
        let key = IdempotencyKey::for_payment(&payment.confirmation_id);

        let client = &self.mint_client;
        let (key_ref, request_ref) = (&key, &request);
        let minted = retry_with_predicate(
            &self.retry,
            move || client.mint(key_ref, request_ref),
            MintError::is_retryable,
        )
        .await
        .map_err(|e| {
            if e.is_retryable() {
                tracing::warn!(key = %key, error = %e, "Checkout mint failed transiently");
                CheckoutError::Retryable(e)
            } else {
                tracing::warn!(key = %key, error = %e, "Checkout mint rejected");
                CheckoutError::MintRejected(e)
            }
        })?;

        let replayed = minted.is_replay();
        let tickets = minted.into_tickets();
        self.cache
            .put_many(tickets.iter().cloned().zip(displays).collect())
            .await?;

        tracing::info!(
            key = %key,
            tickets = tickets.len(),
            replayed,
            "Checkout completed"
        );

        Ok(CheckoutReceipt {
            idempotency_key: key,
            tickets,
            replayed,
        })
    }
}

fn ensure_paid(payment: &PaymentConfirmation) -> Result<(), CheckoutError> {
    if payment.succeeded {
        Ok(())
    } else {
        tracing::warn!(
            confirmation_id = %payment.confirmation_id,
            "Refusing to mint for unconfirmed payment"
        );
        Err(CheckoutError::PaymentNotConfirmed {
            confirmation_id: payment.confirmation_id.clone(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;

    fn line(quantity: u32) -> CartLine {
        CartLine {
            event_id: EventId::new(),
            ticket_type_id: TicketTypeId::new(),
            quantity,
            unit_price: Money::from_cents(1250),
            display: DisplayFields {
                event_title: "Harbour Lights".to_string(),
                image_url: Some("https://img.example/harbour.png".to_string()),
                venue: "Old Dock".to_string(),
                starts_at: Utc::now(),
            },
        }
    }

    #[test]
    fn add_merges_same_ticket_type() {
        let cart = Cart::new();
        let l = line(2);
        cart.add(l.clone());
        cart.add(CartLine { quantity: 3, ..l.clone() });
        cart.add(line(1));

        let lines = cart.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].quantity, 5);
        assert_eq!(cart.total(), Some(Money::from_cents(1250 * 6)));
    }

    #[test]
    fn zero_quantity_removes_line() {
        let cart = Cart::new();
        let l = line(2);
        cart.add(l.clone());

        assert!(cart.set_quantity(l.event_id, l.ticket_type_id, 0));
        assert!(cart.is_empty());
        assert!(!cart.remove(l.event_id, l.ticket_type_id));
    }

    #[test]
    fn completion_keeps_lines_added_later() {
        let cart = Cart::new();
        let first = line(2);
        cart.add(first.clone());
        let snapshot = cart.lines();

        let late = line(1);
        cart.add(late.clone());
        cart.add(CartLine { quantity: 1, ..first.clone() });

        cart.complete(&snapshot);

        let left = cart.lines();
        assert_eq!(left.len(), 2);
        assert_eq!(left[0].quantity, 1);
        assert_eq!(left[1], late);
    }

    #[test]
    fn unpaid_is_refused() {
        let payment = PaymentConfirmation {
            confirmation_id: "ch_declined".to_string(),
            succeeded: false,
        };
        assert!(matches!(
            ensure_paid(&payment),
            Err(CheckoutError::PaymentNotConfirmed { .. })
        ));
    }

    proptest! {
        #[test]
        fn expansion_yields_one_unit_item_per_admission(quantities in prop::collection::vec(1u32..6, 1..5)) {
            let lines: Vec<CartLine> = quantities.iter().map(|&q| line(q)).collect();
            let (items, displays) = expand_lines(&lines);

            let admissions: u32 = quantities.iter().sum();
            prop_assert_eq!(items.len(), admissions as usize);
            prop_assert_eq!(displays.len(), items.len());
            prop_assert!(items.iter().all(|i| i.quantity == 1));

            let mut offset = 0;
            for l in &lines {
                for item in &items[offset..offset + l.quantity as usize] {
                    prop_assert_eq!(item.event_id, l.event_id);
                    prop_assert_eq!(item.price, l.unit_price);
                }
                offset += l.quantity as usize;
            }
        }
    }
}
