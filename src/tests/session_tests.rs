#[cfg(test)]
mod session_tests {
    use std::time::Duration;

    use serde_json::{Map, Value, json};

    use crate::error::NcsError;
    use crate::message::MessageKind;
    use crate::session::{ExchangeState, IdSequence, Session};
    use crate::tests::{ScriptedTransport, body, connected, msg, query_end};

    async fn initiated(transport: &ScriptedTransport) -> Session<'_, ScriptedTransport> {
        transport.push_reply(connected("S1"));
        Session::open(transport, "user1", "device", Map::new()).await.unwrap()
    }

    #[test]
    fn test_id_sequence_starts_at_one() {
        let mut ids = IdSequence::new();
        let drawn: Vec<u64> = (0..5).map(|_| ids.next_id()).collect();
        assert_eq!(drawn, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_transaction_and_audio_ids_are_independent() {
        let transport = ScriptedTransport::default();
        let mut session = Session::new(&transport);

        assert_eq!(session.next_transaction_id(), 1);
        assert_eq!(session.next_transaction_id(), 2);
        assert_eq!(session.next_audio_id(), 1);
        assert_eq!(session.next_transaction_id(), 3);
        assert_eq!(session.next_audio_id(), 2);
    }

    #[test]
    fn test_aborted_transactions_never_reuse_ids() {
        let transport = ScriptedTransport::default();
        let mut session = Session::new(&transport);

        let first = session.create_transaction();
        drop(first);
        let second = session.create_transaction();
        assert_eq!(second.id(), 2);
        assert_eq!(session.create_audio_transfer().id(), 1);
    }

    #[test]
    fn test_sessions_do_not_share_counters() {
        let transport = ScriptedTransport::default();
        let mut a = Session::new(&transport);
        let mut b = Session::new(&transport);

        assert_eq!(a.next_transaction_id(), 1);
        assert_eq!(a.next_transaction_id(), 2);
        assert_eq!(b.next_transaction_id(), 1);
    }

    #[tokio::test]
    async fn test_initiate_stores_session_id() {
        let transport = ScriptedTransport::new(vec![connected("S1")]);
        let mut session = Session::new(&transport);
        assert!(session.id().is_none());

        let extra = body(json!({ "codec": "audio/opus;rate=16000" }));
        session.initiate("alice", "dev-1", extra).await.unwrap();
        assert_eq!(session.id(), Some("S1"));

        let sent = transport.sent_messages();
        assert_eq!(sent.len(), 1);
        let connect = &sent[0];
        assert_eq!(*connect.kind(), MessageKind::Connect);
        assert_eq!(connect.get("user_id"), Some(&json!("alice")));
        assert_eq!(connect.get("device_id"), Some(&json!("dev-1")));
        assert_eq!(connect.get("codec"), Some(&json!("audio/opus;rate=16000")));
    }

    #[tokio::test]
    async fn test_initiate_rejects_non_connected_reply() {
        let transport = ScriptedTransport::new(vec![msg(json!({ "message": "query_error" }))]);
        let mut session = Session::new(&transport);

        let result = session.initiate("user1", "device", Map::new()).await;
        match result {
            Err(NcsError::Protocol(reason)) => {
                assert_eq!(reason, "invalid session connection message")
            }
            other => panic!("expected protocol error, got {:?}", other.err()),
        }
        assert!(session.id().is_none());
    }

    #[tokio::test]
    async fn test_initiate_twice_is_rejected() {
        let transport = ScriptedTransport::default();
        let mut session = initiated(&transport).await;
        transport.push_reply(connected("S2"));

        let result = session.initiate("user1", "device", Map::new()).await;
        assert!(matches!(result, Err(NcsError::Protocol(_))));
        assert_eq!(session.id(), Some("S1"));
        assert_eq!(transport.pending_replies(), 1);
    }

    #[tokio::test]
    async fn test_initiate_times_out() {
        let transport = ScriptedTransport::default();
        let mut session = Session::new(&transport).with_receive_timeout(Some(Duration::from_millis(10)));

        let result = session.initiate("user1", "device", Map::new()).await;
        assert!(matches!(result, Err(NcsError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_operations_before_begin_fail() {
        let transport = ScriptedTransport::default();
        let mut session = initiated(&transport).await;
        let mut transaction = session.create_transaction();

        let parameter = transaction.send_parameter("REQUEST_INFO", "dictionary", Map::new()).await;
        assert!(matches!(parameter, Err(NcsError::Protocol(_))));

        let end = transaction.end(false, None).await;
        assert!(matches!(end, Err(NcsError::Protocol(_))));

        let wait = transaction.wait_for_query_end(None).await;
        assert!(matches!(wait, Err(NcsError::Protocol(_))));

        assert_eq!(transaction.state(), ExchangeState::Created);
        assert_eq!(transport.sent_kinds(), vec!["connect"]);
    }

    #[tokio::test]
    async fn test_begin_twice_fails() {
        let transport = ScriptedTransport::default();
        let mut session = initiated(&transport).await;
        let mut transaction = session.begin_transaction(Map::new()).await.unwrap();

        let result = transaction.begin(Map::new()).await;
        assert!(matches!(result, Err(NcsError::Protocol(_))));
        assert_eq!(transaction.state(), ExchangeState::Began);
    }

    #[tokio::test]
    async fn test_ended_transaction_is_terminal() {
        let transport = ScriptedTransport::default();
        let mut session = initiated(&transport).await;
        let mut transaction = session.begin_transaction(Map::new()).await.unwrap();
        transaction.end(false, None).await.unwrap();
        assert_eq!(transaction.state(), ExchangeState::Ended);

        let parameter = transaction.send_parameter("X", "dictionary", Map::new()).await;
        assert!(matches!(parameter, Err(NcsError::Protocol(_))));
        assert!(matches!(transaction.end(false, None).await, Err(NcsError::Protocol(_))));
        assert!(matches!(transaction.begin(Map::new()).await, Err(NcsError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_text_exchange_returns_matching_query_end() {
        let transport = ScriptedTransport::default();
        let mut session = initiated(&transport).await;

        let fields = body(json!({ "command": "NDSP_APP_CMD", "language": "eng-USA" }));
        let mut transaction = session.begin_transaction(fields).await.unwrap();
        assert_eq!(transaction.id(), 1);

        let request = body(json!({
            "dictionary": { "application_data": { "text_input": "roll a die" } }
        }));
        transaction
            .send_parameter("REQUEST_INFO", "dictionary", request)
            .await
            .unwrap();

        transport.push_reply(query_end(1));
        let reply = transaction.end(true, None).await.unwrap().unwrap();
        assert_eq!(*reply.kind(), MessageKind::QueryEnd);
        assert_eq!(reply.transaction_id(), Some(1));

        let sent = transport.sent_messages();
        assert_eq!(transport.sent_kinds(), vec!["connect", "query_begin", "query_parameter", "query_end"]);
        for message in &sent[1..] {
            assert_eq!(message.transaction_id(), Some(1));
        }
        assert_eq!(sent[1].get("command"), Some(&json!("NDSP_APP_CMD")));
        assert_eq!(sent[2].get("parameter_name"), Some(&json!("REQUEST_INFO")));
        assert_eq!(sent[2].get("parameter_type"), Some(&json!("dictionary")));
        assert_eq!(
            sent[2].pointer("/dictionary/application_data/text_input"),
            Some(&json!("roll a die"))
        );
    }

    #[tokio::test]
    async fn test_mismatched_transaction_reply_is_discarded() {
        let transport = ScriptedTransport::default();
        let mut session = initiated(&transport).await;
        let mut transaction = session.begin_transaction(Map::new()).await.unwrap();

        transport.push_reply(query_end(7));
        transport.push_reply(msg(json!({ "message": "query_response", "transaction_id": 1 })));
        transport.push_reply(query_end(1));

        let reply = transaction.end(true, None).await.unwrap().unwrap();
        assert_eq!(reply.transaction_id(), Some(1));
        assert_eq!(transport.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_ends_the_wait() {
        let transport = ScriptedTransport::default();
        let mut session = initiated(&transport).await;
        let mut transaction = session.begin_transaction(Map::new()).await.unwrap();

        transport.push_reply(msg(json!({ "message": "disconnect" })));
        let reply = transaction.end(true, None).await.unwrap().unwrap();
        assert_eq!(*reply.kind(), MessageKind::Disconnect);
    }

    #[tokio::test]
    async fn test_end_without_wait_then_wait_times_out() {
        let transport = ScriptedTransport::default();
        let mut session = initiated(&transport).await;
        let mut transaction = session.begin_transaction(Map::new()).await.unwrap();

        let immediate = tokio::time::timeout(Duration::from_secs(1), transaction.end(false, None))
            .await
            .expect("end(wait = false) must not block");
        assert!(immediate.unwrap().is_none());

        let limit = Duration::from_millis(20);
        let waited = tokio::time::timeout(Duration::from_secs(1), transaction.wait_for_query_end(Some(limit)))
            .await
            .expect("bounded wait must not hang");
        match waited {
            Err(NcsError::Timeout(reported)) => assert_eq!(reported, limit),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_timeout_still_reads_buffered_reply() {
        let transport = ScriptedTransport::default();
        let mut session = initiated(&transport).await;
        let mut transaction = session.begin_transaction(Map::new()).await.unwrap();

        transport.push_reply(query_end(1));
        let reply = transaction.end(true, Some(Duration::ZERO)).await.unwrap().unwrap();
        assert_eq!(reply.transaction_id(), Some(1));
    }

    #[tokio::test]
    async fn test_zero_timeout_without_reply_times_out() {
        let transport = ScriptedTransport::default();
        let mut session = initiated(&transport).await;
        let transaction = session.begin_transaction(Map::new()).await.unwrap();

        match transaction.wait_for_query_end(Some(Duration::ZERO)).await {
            Err(NcsError::Timeout(reported)) => assert_eq!(reported, Duration::ZERO),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unbounded_wait_reports_transport_timeout() {
        let idle = Duration::from_secs(30);
        let transport = ScriptedTransport::with_idle_timeout(Vec::new(), idle);
        let mut session = initiated(&transport).await;
        let transaction = session.begin_transaction(Map::new()).await.unwrap();

        match transaction.wait_for_query_end(None).await {
            Err(NcsError::Timeout(reported)) => assert_eq!(reported, idle),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_error_is_surfaced() {
        let transport = ScriptedTransport::default();
        let mut session = initiated(&transport).await;
        let mut transaction = session.begin_transaction(Map::new()).await.unwrap();

        transport.push_reply(msg(json!({
            "message": "query_error",
            "transaction_id": 1,
            "reason": "Unknown context tag"
        })));
        match transaction.end(true, None).await {
            Err(NcsError::Query { reason }) => assert_eq!(reason, "Unknown context tag"),
            other => panic!("expected query error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_error_for_other_transaction_is_ignored() {
        let transport = ScriptedTransport::default();
        let mut session = initiated(&transport).await;
        let mut transaction = session.begin_transaction(Map::new()).await.unwrap();

        transport.push_reply(msg(json!({ "message": "query_error", "transaction_id": 4 })));
        transport.push_reply(query_end(1));
        let reply = transaction.end(true, None).await.unwrap().unwrap();
        assert_eq!(reply.transaction_id(), Some(1));
    }

    #[tokio::test]
    async fn test_audio_transfer_lifecycle() {
        let transport = ScriptedTransport::default();
        let mut session = initiated(&transport).await;
        let mut transfer = session.create_audio_transfer();

        assert_eq!(transfer.info().get("audio_id"), Some(&Value::from(1u64)));
        assert!(matches!(transfer.send_bytes(&[1, 2]).await, Err(NcsError::Protocol(_))));

        transfer.begin(Map::new()).await.unwrap();
        transfer.send_bytes(&[1, 2, 3]).await.unwrap();
        transfer.end().await.unwrap();
        assert!(matches!(transfer.send_bytes(&[4]).await, Err(NcsError::Protocol(_))));

        assert_eq!(transport.sent_kinds(), vec!["connect", "audio", "<bytes>", "audio_end"]);
        let sent = transport.sent_messages();
        assert_eq!(sent[1].audio_id(), Some(1));
        assert_eq!(sent[2].audio_id(), Some(1));
        assert!(sent[1].transaction_id().is_none());
        assert_eq!(transport.sent_bytes(), vec![vec![1, 2, 3]]);
    }
}
