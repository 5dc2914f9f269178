use super::Broker;
use super::directory::TopicDirectory;
use super::guard::PublishGuard;
use super::message::{BASE_TOPIC, Message, QoS, SUBSCRIBERS_TOPIC};
use super::session::Session;
use super::topic::Topic;
use crate::transport::message::{DisconnectReason, ServerMessage};
use crate::utils::error::BrokerError;
use tokio::sync::mpsc;
use tungstenite::protocol::Message as WsMessage;

fn connect(broker: &mut Broker, id: &str) -> mpsc::UnboundedReceiver<WsMessage> {
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    assert!(broker.register_session(Session::new(id, tx)).is_none());
    rx
}

fn drain(rx: &mut mpsc::UnboundedReceiver<WsMessage>) -> Vec<ServerMessage> {
    let mut frames = Vec::new();
    while let Ok(WsMessage::Text(text)) = rx.try_recv() {
        frames.push(serde_json::from_str(&text).unwrap());
    }
    frames
}

fn messages_on(frames: &[ServerMessage], topic: &str) -> Vec<Message> {
    frames
        .iter()
        .filter_map(|frame| match frame {
            ServerMessage::Message(msg) if msg.topic == topic => Some(msg.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_topic_subscribe_is_idempotent() {
    let mut topic = Topic::new("test_topic");
    assert!(topic.subscribe("client1".to_string()));
    assert!(!topic.subscribe("client1".to_string()));
    assert_eq!(topic.subscribers.len(), 1);
    assert!(topic.unsubscribe("client1"));
    assert!(topic.is_empty());
}

#[test]
fn test_directory_prunes_empty_entries() {
    let mut directory = TopicDirectory::new();
    directory.subscribe("chat", "a");
    directory.subscribe("chat", "b");
    directory.subscribe("news", "a");

    directory.unsubscribe("chat", "a");
    assert!(directory.contains_topic("chat"));
    directory.unsubscribe("chat", "b");
    assert!(!directory.contains_topic("chat"));
    assert_eq!(directory.catalogue(), vec!["news".to_string()]);
}

#[test]
fn test_directory_entry_exists_iff_subscribers_nonempty() {
    let mut directory = TopicDirectory::new();
    let ops: &[(bool, &str, &str)] = &[
        (true, "t1", "a"),
        (true, "t1", "b"),
        (false, "t1", "a"),
        (true, "t2", "a"),
        (false, "t2", "c"),
        (false, "t1", "b"),
        (false, "t1", "b"),
        (true, "t3", "c"),
        (false, "t2", "a"),
    ];
    for (subscribe, topic, session) in ops {
        if *subscribe {
            directory.subscribe(topic, session);
        } else {
            directory.unsubscribe(topic, session);
        }
        for name in ["t1", "t2", "t3"] {
            assert_eq!(
                directory.contains_topic(name),
                !directory.subscribers_of(name).is_empty()
            );
        }
    }
    assert_eq!(directory.catalogue(), vec!["t3".to_string()]);
}

#[test]
fn test_directory_remove_session_reports_topics() {
    let mut directory = TopicDirectory::new();
    directory.subscribe("chat", "a");
    directory.subscribe("news", "a");
    directory.subscribe("news", "b");

    let left = directory.remove_session("a");
    assert_eq!(left, vec!["chat".to_string(), "news".to_string()]);
    assert!(!directory.contains_session("a"));
    assert_eq!(directory.catalogue(), vec!["news".to_string()]);
}

#[test]
fn test_register_takes_over_duplicate_id() {
    let mut broker = Broker::default();
    let mut old_rx = connect(&mut broker, "client01");
    let mut watcher = connect(&mut broker, "watcher");
    broker.subscribe(BASE_TOPIC, "watcher");
    broker.subscribe("chat", "client01");
    drain(&mut old_rx);
    drain(&mut watcher);

    let (tx, _new_rx) = mpsc::unbounded_channel::<WsMessage>();
    let replacement = Session::new("client01", tx);
    let new_connection = replacement.connection;
    let displaced = broker.register_session(replacement).unwrap();
    let old_connection = displaced.connection;
    assert_ne!(old_connection, new_connection);

    let frames = drain(&mut old_rx);
    assert!(frames.iter().any(|frame| matches!(
        frame,
        ServerMessage::Disconnect {
            reason: DisconnectReason::ClientIdInUse
        }
    )));
    assert!(!broker.directory().contains_topic("chat"));
    assert_eq!(messages_on(&drain(&mut watcher), BASE_TOPIC).last().unwrap().payload, "Base");

    // The old connection closing must not remove its successor.
    broker.release_session("client01", old_connection);
    assert!(broker.is_registered("client01"));

    broker.release_session("client01", new_connection);
    assert!(!broker.is_registered("client01"));
}

#[test]
fn test_subscribe_broadcasts_catalogue() {
    let mut broker = Broker::default();
    let mut rx_a = connect(&mut broker, "a");
    let _rx_b = connect(&mut broker, "b");

    broker.subscribe(BASE_TOPIC, "a");
    drain(&mut rx_a);

    broker.subscribe("chat", "b");
    let frames = drain(&mut rx_a);
    let broadcasts = messages_on(&frames, BASE_TOPIC);
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].payload, "Base,chat");
    assert_eq!(broadcasts[0].sender(), Some("Base"));
    assert_eq!(broadcasts[0].qos, QoS::ExactlyOnce);
}

#[test]
fn test_subscribe_to_base_broadcasts_twice() {
    let mut broker = Broker::default();
    let mut rx = connect(&mut broker, "a");

    broker.subscribe(BASE_TOPIC, "a");
    let frames = drain(&mut rx);
    let broadcasts = messages_on(&frames, BASE_TOPIC);
    assert_eq!(broadcasts.len(), 2);
    assert!(broadcasts.iter().all(|m| m.payload == "Base"));
}

#[test]
fn test_disconnect_sends_one_consolidated_broadcast() {
    let mut broker = Broker::default();
    let mut watcher = connect(&mut broker, "watcher");
    let _rx = connect(&mut broker, "leaver");
    broker.subscribe(BASE_TOPIC, "watcher");
    for topic in ["t1", "t2", "t3"] {
        broker.subscribe(topic, "leaver");
    }
    drain(&mut watcher);

    broker.disconnect_session("leaver");

    let frames = drain(&mut watcher);
    let broadcasts = messages_on(&frames, BASE_TOPIC);
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].payload, "Base");
    assert!(!broker.is_registered("leaver"));
    assert!(!broker.directory().contains_session("leaver"));
}

#[test]
fn test_publish_routes_to_subscribers_only() {
    let mut broker = Broker::default();
    let mut rx_a = connect(&mut broker, "a");
    let mut rx_b = connect(&mut broker, "b");
    broker.subscribe("chat", "a");
    drain(&mut rx_a);

    let msg = Message::new("chat", "hello", QoS::AtLeastOnce).with_sender("b");
    broker.publish_from("b", msg).unwrap();

    let received = messages_on(&drain(&mut rx_a), "chat");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].payload, "hello");
    assert_eq!(received[0].sender(), Some("b"));
    assert!(!received[0].message_id.is_empty());
    assert!(drain(&mut rx_b).is_empty());
}

#[test]
fn test_forged_base_publish_is_rejected() {
    let mut broker = Broker::default();
    let mut rx = connect(&mut broker, "a");
    let _rx_m = connect(&mut broker, "mallory");
    broker.subscribe(BASE_TOPIC, "a");
    drain(&mut rx);

    let forged = Message::new(BASE_TOPIC, "fake1,fake2", QoS::ExactlyOnce).with_sender("Base");
    let result = broker.publish_from("mallory", forged);

    assert!(matches!(result, Err(BrokerError::ForgedControlWrite { .. })));
    assert!(drain(&mut rx).is_empty());
    assert_eq!(broker.guard().rejected(), 1);
}

#[test]
fn test_publish_from_unregistered_session_fails() {
    let mut broker = Broker::default();
    let mut rx = connect(&mut broker, "a");
    broker.subscribe("chat", "a");
    drain(&mut rx);

    let msg = Message::new("chat", "hello", QoS::AtMostOnce);
    let result = broker.publish_from("ghost", msg);

    assert_eq!(result, Err(BrokerError::UnknownSession("ghost".to_string())));
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn test_guard_ignores_ordinary_topics() {
    let directory = TopicDirectory::new();
    let mut guard = PublishGuard::new();
    assert!(guard.check(&directory, "a", "chat", "anything").is_ok());
    assert!(guard.check(&directory, "a", BASE_TOPIC, "anything").is_err());
}

#[test]
fn test_guard_accepts_known_session_name() {
    let mut directory = TopicDirectory::new();
    directory.subscribe("chat", "client01");
    let mut guard = PublishGuard::new();
    assert!(guard.check(&directory, "x", SUBSCRIBERS_TOPIC, "client01").is_ok());
    assert!(guard.check(&directory, "x", SUBSCRIBERS_TOPIC, "chat").is_ok());
    assert_eq!(guard.rejected(), 0);
}

#[test]
fn test_subscriber_list_request_is_answered_to_requester() {
    let mut broker = Broker::default();
    let mut rx_a = connect(&mut broker, "a");
    let _rx_b = connect(&mut broker, "b");
    broker.subscribe(SUBSCRIBERS_TOPIC, "a");
    broker.subscribe("chat", "a");
    broker.subscribe("chat", "b");
    drain(&mut rx_a);

    let request = Message::new(SUBSCRIBERS_TOPIC, "chat", QoS::ExactlyOnce).with_sender("a");
    broker.publish_from("a", request).unwrap();

    let received = messages_on(&drain(&mut rx_a), SUBSCRIBERS_TOPIC);
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].payload, "chat");
    assert_eq!(received[1].payload, "a,b");
    assert_eq!(received[1].sender(), Some("a"));
}

#[test]
fn test_subscribers_of_unknown_topic_is_empty() {
    let mut broker = Broker::default();
    let mut rx = connect(&mut broker, "a");
    broker.subscribe(SUBSCRIBERS_TOPIC, "a");
    drain(&mut rx);

    broker.broadcast_subscribers_of("nope", "a");
    let received = messages_on(&drain(&mut rx), SUBSCRIBERS_TOPIC);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].payload, "");
}

#[test]
fn test_publish_to_session_with_closed_channel() {
    let mut broker = Broker::default();
    let rx = connect(&mut broker, "a");
    let _rx_b = connect(&mut broker, "b");

    // Drop the receiver to close the channel
    drop(rx);

    broker.subscribe("chat", "a");
    let msg = Message::new("chat", "hello", QoS::AtMostOnce).with_sender("b");
    assert!(broker.publish_from("b", msg).is_ok());
    assert!(broker.directory().contains_topic("chat"));
}

#[test]
fn test_shutdown_notifies_sessions() {
    let mut broker = Broker::default();
    let mut rx = connect(&mut broker, "a");

    broker.shutdown();

    let frames = drain(&mut rx);
    assert!(matches!(
        frames.as_slice(),
        [ServerMessage::Disconnect {
            reason: DisconnectReason::ServerShuttingDown
        }]
    ));
}
