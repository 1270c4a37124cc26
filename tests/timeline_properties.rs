use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use chat_sync::models::{Author, Message, MessageType, OutgoingMessage, TempId};
use chat_sync::store::TimelineStore;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn message(id: u8) -> Message {
    Message {
        id: format!("m{id}"),
        conversation_id: "C1".to_string(),
        sender_id: "peer".to_string(),
        content: Some(format!("message {id}")),
        message_type: MessageType::Text,
        media_url: None,
        reply_to_id: None,
        is_deleted: false,
        created_at: at(i64::from(id)),
        sender: None,
        client_id: None,
    }
}

/// Newest-first page, the way the server returns history.
fn page(mut ids: Vec<u8>) -> Vec<Message> {
    ids.sort_unstable_by(|a, b| b.cmp(a));
    ids.into_iter().map(message).collect()
}

fn me() -> Author {
    Author { id: "me".to_string(), full_name: Some("Me".to_string()), avatar_url: None }
}

#[derive(Debug, Clone)]
enum Op {
    Live(u8),
    Older(Vec<u8>),
    Send,
    Echo { pending: usize, id: u8 },
    Confirm { pending: usize, id: u8 },
    Fail { pending: usize },
    Remove(u8),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..40).prop_map(Op::Live),
        prop::collection::vec(0u8..40, 0..8).prop_map(Op::Older),
        Just(Op::Send),
        (0usize..4, 0u8..40).prop_map(|(pending, id)| Op::Echo { pending, id }),
        (0usize..4, 0u8..40).prop_map(|(pending, id)| Op::Confirm { pending, id }),
        (0usize..4).prop_map(|pending| Op::Fail { pending }),
        (0u8..40).prop_map(Op::Remove),
    ]
}

fn pick(temps: &[TempId], index: usize) -> Option<&TempId> {
    if temps.is_empty() {
        None
    } else {
        temps.get(index % temps.len())
    }
}

fn apply(store: &mut TimelineStore, temps: &mut Vec<TempId>, op: Op) {
    match op {
        Op::Live(id) => {
            store.append_live(message(id));
        }
        Op::Older(ids) => {
            store.prepend_older(page(ids)).unwrap();
        }
        Op::Send => {
            temps.push(store.send_optimistic(&OutgoingMessage::text("hi"), &me(), Utc::now()));
        }
        Op::Echo { pending, id } => {
            if let Some(temp_id) = pick(temps, pending) {
                let mut echo = message(id);
                echo.client_id = Some(temp_id.to_string());
                store.append_live(echo);
            }
        }
        Op::Confirm { pending, id } => {
            if let Some(temp_id) = pick(temps, pending).cloned() {
                let _ = store.reconcile_sent(&temp_id, message(id));
            }
        }
        Op::Fail { pending } => {
            if let Some(temp_id) = pick(temps, pending).cloned() {
                let _ = store.reconcile_failed(&temp_id);
            }
        }
        Op::Remove(id) => {
            store.remove(&format!("m{id}"));
        }
    }
}

fn seeded(initial: Vec<u8>) -> TimelineStore {
    let mut store = TimelineStore::new("C1");
    store.begin_loading().unwrap();
    store.seed(page(initial)).unwrap();
    store
}

proptest! {
    #[test]
    fn no_operation_sequence_duplicates_an_entry(
        initial in prop::collection::vec(0u8..40, 0..10),
        ops in prop::collection::vec(arb_op(), 0..60),
    ) {
        let mut store = seeded(initial);
        let mut temps = Vec::new();
        for op in ops {
            apply(&mut store, &mut temps, op);

            let mut confirmed = HashSet::new();
            let mut temporary = HashSet::new();
            for entry in store.entries() {
                if let Some(id) = entry.identity.confirmed_id() {
                    prop_assert!(confirmed.insert(id.to_string()), "duplicate id {}", id);
                    prop_assert!(store.contains(id));
                }
                if let Some(temp_id) = entry.identity.temp_id() {
                    prop_assert!(temporary.insert(temp_id.clone()), "duplicate temp id {}", temp_id);
                }
            }
        }
    }

    #[test]
    fn overlapping_older_pages_merge_once(
        initial in prop::collection::vec(20u8..40, 1..10),
        older in prop::collection::vec(0u8..30, 0..12),
    ) {
        let mut once = seeded(initial.clone());
        once.prepend_older(page(older.clone())).unwrap();

        let mut twice = seeded(initial);
        twice.prepend_older(page(older.clone())).unwrap();
        prop_assert_eq!(twice.prepend_older(page(older)).unwrap(), 0);
        prop_assert_eq!(once.entries(), twice.entries());
    }

    #[test]
    fn live_pushes_keep_chronological_order(
        initial in prop::collection::vec(0u8..40, 0..10),
        pushes in prop::collection::vec(0u8..40, 0..30),
    ) {
        let mut store = seeded(initial);
        for id in pushes {
            store.append_live(message(id));
        }
        let times: Vec<_> = store.entries().iter().map(|e| e.created_at).collect();
        prop_assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }
}
