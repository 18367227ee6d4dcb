//! HTTP API tests over the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::{TestResponse, TestServer};
use chrono::Duration;
use serde_json::{Value, json};
use std::sync::Arc;
use turnstile_core::cache::{CacheConfig, InMemoryCacheBackend, OfflineCache};
use turnstile_core::checkout::{Cart, CartLine, CheckoutOrchestrator, PaymentConfirmation};
use turnstile_core::minter::{LineItem, MintRequest, MinterConfig};
use turnstile_core::retry::RetryPolicy;
use turnstile_core::store::TicketStore;
use turnstile_core::types::{
    DisplayFields, EventId, Money, Ticket, TicketId, TicketState, TicketTypeId, UserId,
};
use turnstile_service::api::{MintResponse, ScanRequest, TicketView};
use turnstile_service::auth::{Principal, StaticSessionResolver};
use turnstile_service::error::ErrorBody;
use turnstile_service::{AppState, HttpMintClient, build_router};
use turnstile_testing::{InMemoryTicketStore, ManualClock, StaticCatalog, test_epoch};

const PRICE: Money = Money::from_cents(3_000);

struct Api {
    server: TestServer,
    sessions: Arc<StaticSessionResolver>,
    store: Arc<InMemoryTicketStore>,
    catalog: Arc<StaticCatalog>,
    clock: Arc<ManualClock>,
    event_id: EventId,
    ticket_type_id: TicketTypeId,
    staff_token: String,
}

impl Api {
    fn holder(&self, owner: UserId) -> String {
        login(&self.sessions, Principal::holder(owner))
    }

    fn new() -> Self {
        let (state, sessions, store, catalog, clock, event_id, ticket_type_id) = wired_state();
        let staff_token = login(&sessions, Principal::staff(UserId::new()));
        Self {
            server: TestServer::new(build_router(state)).unwrap(),
            sessions,
            staff_token,
            store,
            catalog,
            clock,
            event_id,
            ticket_type_id,
        }
    }

    fn request(&self, owner: UserId, lines: usize) -> MintRequest {
        MintRequest {
            owner,
            items: (0..lines)
                .map(|_| LineItem {
                    event_id: self.event_id,
                    ticket_type_id: self.ticket_type_id,
                    quantity: 1,
                    price: PRICE,
                })
                .collect(),
        }
    }

    async fn mint_with_key(&self, key: &str, request: &MintRequest) -> TestResponse {
        self.server
            .post("/api/mints")
            .add_header(AUTHORIZATION, bearer(&self.holder(request.owner)))
            .add_header(
                HeaderName::from_static("idempotency-key"),
                HeaderValue::from_str(key).unwrap(),
            )
            .json(request)
            .await
    }

    async fn mint(&self, owner: UserId, lines: usize) -> Vec<Ticket> {
        let key = format!("pay_{}", TicketId::new());
        let response = self.mint_with_key(&key, &self.request(owner, lines)).await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
        response.json::<MintResponse>().tickets
    }

    async fn scan(&self, code: &str, event_id: EventId, scanner: &str) -> TestResponse {
        let body = json!({ "code": code, "event_id": event_id, "scanner": scanner });
        self.server
            .post("/api/scans")
            .add_header(AUTHORIZATION, bearer(&self.staff_token))
            .json(&body)
            .await
    }

    async fn get_as(&self, token: &str, path: &str) -> TestResponse {
        self.server
            .get(path)
            .add_header(AUTHORIZATION, bearer(token))
            .await
    }

    async fn revoke_as(&self, token: &str, id: TicketId, reason: &str) -> TestResponse {
        self.server
            .post(&format!("/api/tickets/{id}/revoke"))
            .add_header(AUTHORIZATION, bearer(token))
            .json(&json!({ "reason": reason }))
            .await
    }
}

fn login(sessions: &StaticSessionResolver, principal: Principal) -> String {
    let token = format!("tok_{}", TicketId::new());
    sessions.insert(token.clone(), principal);
    token
}

fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {token}")).unwrap()
}

#[allow(clippy::type_complexity)]
fn wired_state() -> (
    AppState,
    Arc<StaticSessionResolver>,
    Arc<InMemoryTicketStore>,
    Arc<StaticCatalog>,
    Arc<ManualClock>,
    EventId,
    TicketTypeId,
) {
    let store = Arc::new(InMemoryTicketStore::new());
    let catalog = Arc::new(StaticCatalog::new());
    let clock = Arc::new(ManualClock::new(test_epoch()));
    let event_id = EventId::new();
    let ticket_type_id = TicketTypeId::new();
    catalog.insert(event_id, ticket_type_id, "Balcony", PRICE);
    let sessions = Arc::new(StaticSessionResolver::new());

    let state = AppState::new(
        store.clone(),
        catalog.clone(),
        sessions.clone(),
        clock.clone(),
        MinterConfig::default(),
    );
    (state, sessions, store, catalog, clock, event_id, ticket_type_id)
}

fn error_code(response: &TestResponse) -> String {
    response.json::<ErrorBody>().code
}

#[tokio::test]
async fn test_health_and_readiness() {
    let api = Api::new();

    let health = api.server.get("/health").await;
    assert_eq!(health.status_code(), StatusCode::OK);
    assert_eq!(health.json::<Value>()["status"], "ok");

    assert_eq!(api.server.get("/ready").await.status_code(), StatusCode::OK);

    api.store.set_unavailable(true);
    let ready = api.server.get("/ready").await;
    assert_eq!(ready.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(ready.json::<Value>()["database"], false);
}

#[tokio::test]
async fn test_mint_creates_then_replays() {
    let api = Api::new();
    let owner = UserId::new();
    let request = api.request(owner, 3);

    let first = api.mint_with_key("pay_order_000000001", &request).await;
    assert_eq!(first.status_code(), StatusCode::CREATED);
    let first = first.json::<MintResponse>();
    assert!(!first.replayed);
    assert_eq!(first.tickets.len(), 3);

    let second = api.mint_with_key("pay_order_000000001", &request).await;
    assert_eq!(second.status_code(), StatusCode::OK);
    let second = second.json::<MintResponse>();
    assert!(second.replayed);
    assert_eq!(second.tickets, first.tickets);
    assert_eq!(api.store.ticket_count(), 3);
}

#[tokio::test]
async fn test_mint_requires_valid_idempotency_key() {
    let api = Api::new();
    let request = api.request(UserId::new(), 1);

    let missing = api
        .server
        .post("/api/mints")
        .add_header(AUTHORIZATION, bearer(&api.holder(request.owner)))
        .json(&request)
        .await;
    assert_eq!(missing.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&missing), "BAD_REQUEST");

    let short = api.mint_with_key("abc", &request).await;
    assert_eq!(short.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(api.store.ticket_count(), 0);
}

#[tokio::test]
async fn test_mint_rejections_map_to_distinct_statuses() {
    let api = Api::new();
    let owner = UserId::new();

    api.mint_with_key("pay_reuse_00000001", &api.request(owner, 1)).await;
    let reused = api.mint_with_key("pay_reuse_00000001", &api.request(owner, 2)).await;
    assert_eq!(reused.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(&reused), "IDEMPOTENCY_KEY_REUSED");

    let empty = api.mint_with_key("pay_empty_00000001", &api.request(owner, 0)).await;
    assert_eq!(empty.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error_code(&empty), "EMPTY_PURCHASE");

    api.catalog
        .set_price(api.event_id, api.ticket_type_id, Money::from_cents(3_500));
    let repriced = api.mint_with_key("pay_price_00000001", &api.request(owner, 1)).await;
    assert_eq!(repriced.status_code(), StatusCode::CONFLICT);
    assert_eq!(error_code(&repriced), "PRICE_CHANGED");

    api.catalog.set_price(api.event_id, api.ticket_type_id, PRICE);
    api.catalog
        .set_available(api.event_id, api.ticket_type_id, false);
    let sold_out = api.mint_with_key("pay_soldout_000001", &api.request(owner, 1)).await;
    assert_eq!(sold_out.status_code(), StatusCode::CONFLICT);
    assert_eq!(error_code(&sold_out), "SOLD_OUT");

    assert_eq!(api.store.ticket_count(), 1);
}

#[tokio::test]
async fn test_mint_store_outage_is_unavailable() {
    let api = Api::new();
    api.store.set_unavailable(true);

    let response = api
        .mint_with_key("pay_outage_0000001", &api.request(UserId::new(), 1))
        .await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_scan_outcomes_are_ok_responses() {
    let api = Api::new();
    let ticket = api.mint(UserId::new(), 1).await.remove(0);
    let code = ticket.redemption_code.as_str();

    let accepted = api.scan(code, api.event_id, "gate-1").await;
    assert_eq!(accepted.status_code(), StatusCode::OK);
    let accepted = accepted.json::<Value>();
    assert_eq!(accepted["result"], "accepted");
    assert_eq!(accepted["admission"]["quantity"], 1);
    assert_eq!(accepted["cue"], "confirm");

    let again = api.scan(code, api.event_id, "gate-2").await;
    assert_eq!(again.status_code(), StatusCode::OK);
    let again = again.json::<Value>();
    assert_eq!(again["result"], "rejected");
    assert_eq!(again["reason"], "already_used");
    assert_eq!(again["redeemed_by"], "gate-1");

    let unknown = api.scan("definitely-not-a-code", api.event_id, "gate-1").await;
    assert_eq!(unknown.status_code(), StatusCode::OK);
    assert_eq!(unknown.json::<Value>()["reason"], "unknown_code");
}

#[tokio::test]
async fn test_scan_at_wrong_door_leaves_ticket_unredeemed() {
    let api = Api::new();
    let ticket = api.mint(UserId::new(), 1).await.remove(0);

    let response = api
        .scan(ticket.redemption_code.as_str(), EventId::new(), "gate-1")
        .await;
    let body = response.json::<Value>();
    assert_eq!(body["reason"], "wrong_event");
    assert_eq!(body["cue"], "warn");

    let stored = api
        .get_as(&api.holder(ticket.owner_user_id), &format!("/api/tickets/{}", ticket.id))
        .await
        .json::<Ticket>();
    assert_eq!(stored.state, TicketState::Unredeemed);
}

#[tokio::test]
async fn test_scan_store_outage_is_not_a_rejection() {
    let api = Api::new();
    let ticket = api.mint(UserId::new(), 1).await.remove(0);
    api.store.set_unavailable(true);

    let request = ScanRequest {
        code: ticket.redemption_code.as_str().to_string(),
        event_id: api.event_id,
        scanner: turnstile_core::types::ScannerId::new("gate-1"),
    };
    let response = api
        .server
        .post("/api/scans")
        .add_header(AUTHORIZATION, bearer(&api.staff_token))
        .json(&request)
        .await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error_code(&response), "STORE_UNAVAILABLE");
}

#[tokio::test]
async fn test_ticket_reads_report_effective_state() {
    let api = Api::new();
    let owner = UserId::new();
    let minted = api.mint(owner, 2).await;
    let token = api.holder(owner);

    let listed = api
        .get_as(&token, &format!("/api/users/{owner}/tickets"))
        .await
        .json::<Vec<Ticket>>();
    assert_eq!(listed, minted);

    api.clock.advance(Duration::days(366));
    let expired = api
        .get_as(&token, &format!("/api/tickets/{}", minted[0].id))
        .await
        .json::<Ticket>();
    assert_eq!(expired.state, TicketState::Expired);

    let missing = api
        .get_as(&token, &format!("/api/tickets/{}", TicketId::new()))
        .await;
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(&missing), "NOT_FOUND");

    let nobody = UserId::new();
    let empty = api
        .get_as(&api.holder(nobody), &format!("/api/users/{nobody}/tickets"))
        .await
        .json::<Vec<Ticket>>();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_revocation_voids_unredeemed_tickets_only() {
    let api = Api::new();
    let tickets = api.mint(UserId::new(), 2).await;

    let revoked = api.revoke_as(&api.staff_token, tickets[0].id, "refund").await;
    assert_eq!(revoked.status_code(), StatusCode::OK);
    let revoked = revoked.json::<TicketView>();
    assert_eq!(revoked.state, TicketState::Revoked);
    assert!(revoked.redemption_code.is_none());
    assert_eq!(revoked.revocation_reason.as_deref(), Some("refund"));

    let scan = api
        .scan(tickets[0].redemption_code.as_str(), api.event_id, "gate-1")
        .await;
    assert_eq!(scan.json::<Value>()["reason"], "revoked");

    api.scan(tickets[1].redemption_code.as_str(), api.event_id, "gate-1")
        .await;
    let too_late = api.revoke_as(&api.staff_token, tickets[1].id, "refund").await;
    assert_eq!(too_late.status_code(), StatusCode::CONFLICT);
    assert_eq!(error_code(&too_late), "NOT_REVOCABLE");

    let blank = api.revoke_as(&api.staff_token, tickets[1].id, "  ").await;
    assert_eq!(blank.status_code(), StatusCode::BAD_REQUEST);

    let missing = api.revoke_as(&api.staff_token, TicketId::new(), "refund").await;
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_codes_and_door_operations_are_access_controlled() {
    let api = Api::new();
    let owner = UserId::new();
    let ticket = api.mint(owner, 2).await.remove(0);
    let stranger = UserId::new();
    let stranger_token = api.holder(stranger);
    let ticket_path = format!("/api/tickets/{}", ticket.id);
    let list_path = format!("/api/users/{owner}/tickets");

    let anonymous = api.server.get(&list_path).await;
    assert_eq!(anonymous.status_code(), StatusCode::UNAUTHORIZED);
    let unknown_session = api.get_as("tok_not_issued", &ticket_path).await;
    assert_eq!(unknown_session.status_code(), StatusCode::UNAUTHORIZED);

    let foreign_list = api.get_as(&stranger_token, &list_path).await;
    assert_eq!(foreign_list.status_code(), StatusCode::FORBIDDEN);
    let foreign_ticket = api.get_as(&stranger_token, &ticket_path).await;
    assert_eq!(foreign_ticket.status_code(), StatusCode::NOT_FOUND);

    let staff_view = api.get_as(&api.staff_token, &list_path).await.json::<Vec<Value>>();
    assert_eq!(staff_view.len(), 2);
    assert!(staff_view.iter().all(|t| t.get("redemption_code").is_none()));
    let staff_ticket = api.get_as(&api.staff_token, &ticket_path).await.json::<TicketView>();
    assert_eq!(staff_ticket.owner_user_id, owner);
    assert!(staff_ticket.redemption_code.is_none());

    let holder_scan = api
        .server
        .post("/api/scans")
        .add_header(AUTHORIZATION, bearer(&stranger_token))
        .json(&json!({
            "code": ticket.redemption_code.as_str(),
            "event_id": api.event_id,
            "scanner": "pocket",
        }))
        .await;
    assert_eq!(holder_scan.status_code(), StatusCode::FORBIDDEN);
    let owner_revoke = api.revoke_as(&api.holder(owner), ticket.id, "changed my mind").await;
    assert_eq!(owner_revoke.status_code(), StatusCode::FORBIDDEN);

    let for_someone_else = api
        .server
        .post("/api/mints")
        .add_header(AUTHORIZATION, bearer(&stranger_token))
        .add_header(
            HeaderName::from_static("idempotency-key"),
            HeaderValue::from_static("pay_not_mine_00001"),
        )
        .json(&api.request(owner, 1))
        .await;
    assert_eq!(for_someone_else.status_code(), StatusCode::FORBIDDEN);

    let stored = api.store.get(ticket.id).await.unwrap().unwrap();
    assert_eq!(stored.state, TicketState::Unredeemed);
    assert_eq!(api.store.ticket_count(), 2);
}

#[tokio::test]
async fn test_checkout_through_http_mint_client() {
    let (state, sessions, store, _catalog, clock, event_id, ticket_type_id) = wired_state();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });

    let owner = UserId::new();
    let cache = Arc::new(
        OfflineCache::open(
            InMemoryCacheBackend::new(),
            owner,
            CacheConfig::default(),
            clock.clone(),
        )
        .await
        .unwrap(),
    );
    let cart = Arc::new(Cart::new());
    cart.add(CartLine {
        event_id,
        ticket_type_id,
        quantity: 2,
        unit_price: PRICE,
        display: closing_night(),
    });

    let orchestrator = CheckoutOrchestrator::new(
        HttpMintClient::new(format!("http://{addr}"), std::time::Duration::from_secs(5))
            .unwrap()
            .with_bearer_token(login(&sessions, Principal::holder(owner))),
        cart.clone(),
        cache.clone(),
        RetryPolicy::none(),
    );
    let payment = PaymentConfirmation {
        confirmation_id: "ch_closing_night".to_string(),
        succeeded: true,
    };

    let receipt = orchestrator.checkout(&payment).await.unwrap();
    assert!(!receipt.replayed);
    assert_eq!(receipt.tickets.len(), 2);
    assert!(cart.is_empty());
    assert_eq!(cache.list_for_user().await.len(), 2);
    assert_eq!(store.ticket_count(), 2);

    let line = CartLine {
        event_id,
        ticket_type_id,
        quantity: 2,
        unit_price: PRICE,
        display: closing_night(),
    };
    let replay = orchestrator.buy_now(line, &payment).await.unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.tickets, receipt.tickets);
    assert_eq!(store.ticket_count(), 2);
}

fn closing_night() -> DisplayFields {
    DisplayFields {
        event_title: "Closing Night".to_string(),
        image_url: None,
        venue: "Main Hall".to_string(),
        starts_at: test_epoch() + Duration::days(3),
    }
}
