mod common;

use common::*;
use parley_client::{ClientError, ClientEvent, ConversationView, LoadOutcome};
use parley_shared::{BackendError, ChangeEvent, ChangeKind, MessageId, Table};
use parley_store::Operation;

fn insert_event(row: serde_json::Value) -> ChangeEvent {
    ChangeEvent {
        table: Table::Messages,
        kind: ChangeKind::Insert,
        new: Some(row),
        old: None,
    }
}

#[tokio::test]
async fn first_page_is_the_newest_fifty_in_chronological_order() {
    let f = signed_in_as_alice().await;
    seed_messages(&f.backend, f.direct, f.bob, 1..=60);

    f.client.select(Some(chat_of(&f.client, f.direct))).await.unwrap();

    let messages = f.client.messages().messages(f.direct);
    assert_eq!(messages.len(), 50);
    assert_eq!(messages.first().unwrap().content, "m11");
    assert_eq!(messages.last().unwrap().content, "m60");
    assert!(messages.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    assert_eq!(
        messages[0].sender.as_ref().map(|p| p.username.as_str()),
        Some("bob")
    );
}

#[tokio::test]
async fn older_pages_prepend_until_exhausted() {
    let f = signed_in_as_alice().await;
    seed_messages(&f.backend, f.direct, f.bob, 1..=60);
    f.client.select(Some(chat_of(&f.client, f.direct))).await.unwrap();

    assert_eq!(
        f.client.load_older().await.unwrap(),
        LoadOutcome::Loaded {
            fetched: 10,
            added: 10
        }
    );
    let all = f.client.messages().messages(f.direct);
    assert_eq!(all.len(), 60);
    assert_eq!(all[0].content, "m1");

    let selects = f.backend.calls(Operation::Select);
    assert_eq!(f.client.load_older().await.unwrap(), LoadOutcome::Exhausted);
    assert_eq!(f.backend.calls(Operation::Select), selects);
}

#[tokio::test]
async fn live_redelivery_of_a_paged_message_is_kept_once() {
    let f = signed_in_as_alice().await;
    let ids = seed_messages(&f.backend, f.direct, f.bob, 1..=1);
    f.client.select(Some(chat_of(&f.client, f.direct))).await.unwrap();
    assert_eq!(contents(&f.client.messages().messages(f.direct)), ["m1"]);

    // The transport re-delivers m1, then a fresh message.
    f.backend
        .publish_change(insert_event(message_row(f.direct, ids[0], f.bob, "m1", 1)));
    f.backend.publish_change(insert_event(message_row(
        f.direct,
        MessageId::new(),
        f.bob,
        "m2",
        2,
    )));

    eventually(|| f.client.messages().messages(f.direct).len() == 2).await;
    assert_eq!(contents(&f.client.messages().messages(f.direct)), ["m1", "m2"]);
}

#[tokio::test]
async fn duplicate_live_deliveries_are_kept_once() {
    let f = signed_in_as_alice().await;
    f.client.select(Some(chat_of(&f.client, f.direct))).await.unwrap();

    let id = MessageId::new();
    for _ in 0..3 {
        f.backend
            .publish_change(insert_event(message_row(f.direct, id, f.bob, "hi", 5)));
    }
    f.backend.publish_change(insert_event(message_row(
        f.direct,
        MessageId::new(),
        f.bob,
        "after",
        6,
    )));

    eventually(|| f.client.messages().messages(f.direct).len() == 2).await;
    assert_eq!(contents(&f.client.messages().messages(f.direct)), ["hi", "after"]);
}

#[tokio::test]
async fn late_live_delivery_lands_in_chronological_position() {
    let f = signed_in_as_alice().await;
    seed_messages(&f.backend, f.direct, f.bob, 1..=3);
    f.client.select(Some(chat_of(&f.client, f.direct))).await.unwrap();

    f.backend.publish_change(insert_event(message_row(
        f.direct,
        MessageId::new(),
        f.bob,
        "late",
        2,
    )));

    eventually(|| f.client.messages().messages(f.direct).len() == 4).await;
    assert_eq!(
        contents(&f.client.messages().messages(f.direct)),
        ["m1", "m2", "late", "m3"]
    );
}

#[tokio::test]
async fn sent_message_arrives_once_through_the_live_feed() {
    let f = signed_in_as_alice().await;
    seed_messages(&f.backend, f.direct, f.bob, 1..=2);
    f.client.select(Some(chat_of(&f.client, f.direct))).await.unwrap();

    f.client.composer().set_input("hello bob");
    let id = f.client.composer().submit().await.unwrap();

    eventually(|| f.client.messages().messages(f.direct).iter().any(|m| m.id == id)).await;
    let messages = f.client.messages().messages(f.direct);
    assert_eq!(messages.iter().filter(|m| m.id == id).count(), 1);
    assert_eq!(messages.last().unwrap().content, "hello bob");

    match f.client.view() {
        ConversationView::Open { title, messages, .. } => {
            assert_eq!(title, "bob");
            assert_eq!(messages.len(), 3);
        }
        ConversationView::Empty => panic!("conversation should be open"),
    }
}

#[tokio::test]
async fn updates_and_deletes_are_applied() {
    let f = signed_in_as_alice().await;
    let ids = seed_messages(&f.backend, f.direct, f.bob, 1..=2);
    f.client.select(Some(chat_of(&f.client, f.direct))).await.unwrap();

    f.backend
        .update_rows(
            Table::Messages,
            &[parley_shared::Filter::eq("id", ids[0].to_string())],
            serde_json::json!({ "content": "m1 (edited)" }),
        )
        .unwrap();
    eventually(|| f.client.messages().messages(f.direct)[0].content == "m1 (edited)").await;

    f.backend
        .delete_rows(
            Table::Messages,
            &[parley_shared::Filter::eq("id", ids[1].to_string())],
        )
        .unwrap();
    eventually(|| f.client.messages().messages(f.direct).len() == 1).await;
}

#[tokio::test]
async fn at_most_one_live_subscription() {
    let f = signed_in_as_alice().await;
    let group = create_chat(&f.backend, "group", Some("team"), f.alice, &[f.alice, f.bob], at(10));
    f.client.directory().refresh().await.unwrap();

    for chat in [f.direct, group, f.direct, f.direct] {
        f.client.select(Some(chat_of(&f.client, chat))).await.unwrap();
        assert_eq!(f.backend.active_subscriptions(Table::Messages), 1);
        assert_eq!(f.client.selector().live_chat_id().await, Some(chat));
    }

    // Nobody listens to the group any more.
    let delivered = f.backend.publish_change(insert_event(message_row(
        group,
        MessageId::new(),
        f.bob,
        "unheard",
        1,
    )));
    assert_eq!(delivered, 0);

    f.client.select(None).await.unwrap();
    assert_eq!(f.backend.active_subscriptions(Table::Messages), 0);
    assert_eq!(f.client.view(), ConversationView::Empty);
}

#[tokio::test]
async fn transient_page_failures_are_retried() {
    let f = signed_in_as_alice().await;
    seed_messages(&f.backend, f.direct, f.bob, 1..=3);
    let before = f.backend.calls(Operation::Select);

    f.backend.fail_next(Operation::Select, 2, BackendError::Timeout);
    f.client.select(Some(chat_of(&f.client, f.direct))).await.unwrap();

    assert_eq!(f.backend.calls(Operation::Select), before + 3);
    assert_eq!(f.client.messages().messages(f.direct).len(), 3);
}

#[tokio::test]
async fn failed_page_is_reported_and_retried_on_next_load() {
    let f = signed_in_as_alice().await;
    seed_messages(&f.backend, f.direct, f.bob, 1..=3);
    let mut events = f.client.subscribe();

    f.backend.fail_next(
        Operation::Select,
        1,
        BackendError::Rejected("permission denied".into()),
    );
    let err = f
        .client
        .select(Some(chat_of(&f.client, f.direct)))
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::Validation("permission denied".into()));

    let failure = next_event(&mut events, |e| matches!(e, ClientEvent::Failure { .. })).await;
    assert_eq!(
        failure,
        ClientEvent::Failure {
            action: "load_messages",
            message: "permission denied".into()
        }
    );

    // The live feed stayed open and the same page is fetched again.
    assert_eq!(f.backend.active_subscriptions(Table::Messages), 1);
    assert_eq!(
        f.client.load_older().await.unwrap(),
        LoadOutcome::Loaded {
            fetched: 3,
            added: 3
        }
    );
}
