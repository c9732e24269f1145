mod common;

use std::sync::Arc;

use relay_session::envelope::Envelope;
use relay_session::store::{FileRef, MemoryStore};
use relay_session::{Client, ClientConfig};

use common::{FakeMediaFactory, ScriptedFactory, init_logging, wait_for};

async fn connected_client(factory: Arc<ScriptedFactory>) -> Arc<Client> {
    init_logging();
    let client = Client::new(
        ClientConfig::new("ws://relay.test/socket", "desk-1"),
        factory,
        FakeMediaFactory::new(),
        Arc::new(MemoryStore::new()),
    )
    .await
    .unwrap();
    client.connect().await.unwrap();
    client
}

#[tokio::test]
async fn register_is_sent_on_connect() {
    let factory = ScriptedFactory::new();
    let client = connected_client(factory.clone()).await;
    assert!(client.is_connected());

    wait_for("register frame", async || {
        !factory.sent_frames().await.is_empty()
    })
    .await;
    let frames = factory.sent_frames().await;
    let register = Envelope::parse(&frames[0]).unwrap();
    assert_eq!(
        register,
        Envelope::Register {
            client_id: "desk-1".into(),
            is_admin: false,
            name: "desk-1".into(),
        }
    );
}

#[tokio::test]
async fn inbound_chat_lands_in_the_session_log() {
    let factory = ScriptedFactory::new();
    let client = connected_client(factory.clone()).await;
    let mut inbox = client.event_bus().new_message.subscribe();

    factory
        .push_frame(
            r#"{"type":"chat","session_uuid":"A","from":"visitor","message":"hello","timestamp":1700000000}"#,
        )
        .await;

    let store = client.store();
    wait_for("chat to land", async || {
        store.lock().await.session("A").is_some()
    })
    .await;

    let store = store.lock().await;
    let session = store.session("A").unwrap();
    assert_eq!(session.log.len(), 1);
    assert_eq!(session.log[0].sender, "visitor");
    assert_eq!(session.log[0].timestamp_ms, 1_700_000_000_000);

    let event = inbox.recv().await.unwrap();
    assert_eq!(event.session_id, "A");
}

#[tokio::test]
async fn optimistic_send_confirms_on_echo() {
    let factory = ScriptedFactory::new();
    let client = connected_client(factory.clone()).await;

    client.send_chat("A", "hi there").await.unwrap();
    let store = client.store();
    {
        let store = store.lock().await;
        let log = &store.session("A").unwrap().log;
        assert_eq!(log.len(), 1);
        assert!(log[0].pending);
    }

    // Replay the wire frame back at the client, as the relay echo would.
    let frames = factory.sent_frames().await;
    let chat_frame = frames
        .iter()
        .find(|f| f.contains("\"chat\""))
        .expect("chat frame was sent");
    let echo = chat_frame.replace("\"targetSession\":\"A\"", "\"session_uuid\":\"A\"");
    factory.push_frame(&echo).await;

    wait_for("echo to confirm", async || {
        let store = store.lock().await;
        let log = &store.session("A").unwrap().log;
        log.len() == 1 && !log[0].pending
    })
    .await;
    assert_eq!(store.lock().await.pending_count(), 0);
}

#[tokio::test]
async fn file_send_goes_on_the_wire_with_metadata() {
    let factory = ScriptedFactory::new();
    let client = connected_client(factory.clone()).await;

    client
        .send_file(
            "A",
            FileRef {
                file_name: "report.pdf".into(),
                file_url: "https://files.test/report.pdf".into(),
                mime_type: "application/pdf".into(),
                size: 4096,
            },
        )
        .await
        .unwrap();

    let frames = factory.sent_frames().await;
    let file_frame = frames.iter().find(|f| f.contains("\"file\"")).unwrap();
    match Envelope::parse(file_frame).unwrap() {
        Envelope::File {
            target_session,
            file_name,
            size,
            ..
        } => {
            assert_eq!(target_session.as_deref(), Some("A"));
            assert_eq!(file_name, "report.pdf");
            assert_eq!(size, 4096);
        }
        other => panic!("expected a file envelope, got {other:?}"),
    }
}

#[tokio::test]
async fn server_push_archives_and_restore_round_trips() {
    let factory = ScriptedFactory::new();
    let client = connected_client(factory.clone()).await;

    factory
        .push_frame(r#"{"type":"chat","session_uuid":"A","from":"visitor","message":"hi","timestamp":1700000000}"#)
        .await;
    let store = client.store();
    wait_for("session to exist", async || {
        store.lock().await.session("A").is_some()
    })
    .await;

    factory
        .push_frame(r#"{"type":"session_closed","session_uuid":"A"}"#)
        .await;
    wait_for("archive", async || store.lock().await.is_archived("A")).await;
    assert_eq!(store.lock().await.active_sessions().count(), 0);

    client.restore_session("A").await.unwrap();
    assert!(!store.lock().await.is_archived("A"));
    let frames = factory.sent_frames().await;
    assert!(
        frames.iter().any(|f| f.contains("restore_session")),
        "restore must be announced to the relay"
    );
}

#[tokio::test]
async fn disconnect_rolls_back_unconfirmed_messages() {
    let factory = ScriptedFactory::new();
    let client = connected_client(factory.clone()).await;

    client.send_chat("A", "never confirmed").await.unwrap();
    assert_eq!(client.store().lock().await.pending_count(), 1);

    client.disconnect().await;
    assert!(!client.is_connected());
    let store = client.store();
    let store = store.lock().await;
    assert_eq!(store.pending_count(), 0);
    assert_eq!(store.session("A").unwrap().log.len(), 0);
}
