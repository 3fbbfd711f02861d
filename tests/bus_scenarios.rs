//! End-to-end message bus scenario: broadcast survives a concurrent unregister.

use pantheon_core::pantheon::bus::Priority;
use pantheon_core::Bus;

#[tokio::test]
async fn scenario_f_broadcast_skips_a_participant_unregistered_mid_flight() {
    let bus = Bus::new();
    let mut inbox_b = bus.register("b");
    let mut inbox_c = bus.register("c");
    let _inbox_a = bus.register("a");

    // c leaves the bus before the broadcast goes out; it must not receive anything, and its
    // absence must not stop delivery to the participants still registered.
    bus.unregister("c");

    bus.broadcast("a", "announce", serde_json::json!({"n": 1}), Priority::Normal);

    let received = inbox_b.recv().await.unwrap();
    assert_eq!(received.topic, "announce");
    assert_eq!(received.payload["n"], 1);

    assert!(inbox_c.recv().await.is_none());
    assert!(!bus.is_registered("c"));
}

#[tokio::test]
async fn scenario_f_request_reply_survives_concurrent_broadcast_traffic() {
    let bus = Bus::new();
    let mut responder_inbox = bus.register("responder");
    let _bystander = bus.register("bystander");

    let bus_ref = &bus;
    let (request_result, _) = tokio::join!(
        bus_ref.request(
            "caller",
            "responder",
            "ask",
            serde_json::json!({"q": 1}),
            std::time::Duration::from_secs(1),
        ),
        async {
            bus_ref.broadcast("caller", "noise", serde_json::json!("ignore me"), Priority::Low);
            let incoming = responder_inbox.recv().await.unwrap();
            assert_eq!(incoming.topic, "ask");
            bus_ref.reply(
                incoming.correlation_id.as_ref().unwrap(),
                "responder",
                "answer",
                serde_json::json!({"a": 2}),
            );
        }
    );

    let reply = request_result.unwrap();
    assert_eq!(reply.payload["a"], 2);
}

#[tokio::test]
async fn history_reports_most_recent_messages_first_across_participants() {
    let bus = Bus::new();
    let _inbox_a = bus.register("a");
    let _inbox_b = bus.register("b");

    bus.send("a", "b", "first", serde_json::json!(1), Priority::Normal).unwrap();
    bus.send("b", "a", "second", serde_json::json!(2), Priority::Normal).unwrap();
    bus.send("a", "b", "third", serde_json::json!(3), Priority::Normal).unwrap();

    let recent = bus.history(2);
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].topic, "third");
    assert_eq!(recent[1].topic, "second");
}

#[tokio::test]
async fn subscribers_see_matching_traffic_without_registering_as_a_recipient() {
    let bus = Bus::new();
    let _inbox_b = bus.register("b");
    let mut subscription = bus.subscribe(Some("alert"));

    bus.send("a", "b", "status", serde_json::json!("ok"), Priority::Normal).unwrap();
    bus.send("a", "b", "alert", serde_json::json!("fire"), Priority::High).unwrap();

    let received = subscription.recv().await.unwrap();
    assert_eq!(received.topic, "alert");
    assert_eq!(received.payload, serde_json::json!("fire"));
}
