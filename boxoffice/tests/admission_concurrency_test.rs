//! Concurrent check-in tests.
//!
//! Many scan stations admitting the same ticket at once must produce exactly
//! one admission.
//!
//! Run with: `cargo test --test admission_concurrency_test`

#![allow(clippy::unwrap_used)]

use boxoffice::storage::Repositories;
use boxoffice::types::{
    Admission, AgentContext, AgentId, EventId, ListingRef, Money, OrderId, ScanCode, Ticket, TicketId,
};
use boxoffice::{AdmitOutcome, CheckIn, VerificationGate};
use boxoffice_core::environment::Clock;
use boxoffice_testing::test_clock;
use std::sync::Arc;

const STATIONS: usize = 16;

async fn gate_with_ticket(code: &str) -> (Arc<VerificationGate>, Ticket, ListingRef) {
    let repos = Repositories::in_memory();
    let listing = ListingRef::Event(EventId::new());
    let ticket = Ticket {
        id: TicketId::new(),
        order_id: OrderId::new(),
        listing,
        holder_name: "Wanjiku".to_string(),
        holder_email: None,
        tier_label: "Regular".to_string(),
        unit_price: Money::from_cents(1_000),
        code: ScanCode::new(code),
        line_index: 0,
        unit_index: 0,
        admission: Admission::NotAdmitted,
        issued_at: test_clock().now(),
    };
    assert!(repos.tickets.insert_if_absent(&ticket).await.unwrap());
    let gate = VerificationGate::new(
        Arc::clone(&repos.tickets),
        Arc::clone(&repos.assignments),
        Arc::new(test_clock()),
    );
    (Arc::new(gate), ticket, listing)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_admits_produce_one_admission() {
    let (gate, ticket, listing) = gate_with_ticket("TKT-ABCDEFGHJKLMNPQR").await;

    let handles: Vec<_> = (0..STATIONS)
        .map(|_| {
            let gate = Arc::clone(&gate);
            let agent = AgentContext::agent(AgentId::new(), vec![listing]);
            tokio::spawn(async move { gate.admit(ticket.id, &agent).await })
        })
        .collect();

    let mut admitted = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            AdmitOutcome::Admitted(_) => admitted += 1,
            AdmitOutcome::AlreadyAdmitted(t) => {
                assert!(t.admission.is_admitted());
                already += 1;
            },
        }
    }

    assert_eq!(admitted, 1);
    assert_eq!(already, STATIONS - 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_check_ins_produce_one_admission() {
    let (gate, ticket, listing) = gate_with_ticket("TKT-STUVWXYZ23456789").await;

    let handles: Vec<_> = (0..STATIONS)
        .map(|_| {
            let gate = Arc::clone(&gate);
            let code = ticket.code.clone();
            let agent = AgentContext::admin(AgentId::new());
            tokio::spawn(async move { gate.check_in(&code, listing, &agent).await })
        })
        .collect();

    let mut admitted = Vec::new();
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            CheckIn::Admitted(t) => admitted.push(t),
            CheckIn::AlreadyAdmitted(_) => {},
            CheckIn::NotFound => unreachable!("ticket exists"),
        }
    }

    assert_eq!(admitted.len(), 1);
    assert!(matches!(
        admitted[0].admission,
        Admission::Admitted { at, .. } if at == test_clock().now()
    ));
}
