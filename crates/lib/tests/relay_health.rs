//! Integration test: start the relay on a free port, connect channels to it, and push
//! targeted and mass notifications over HTTP. The relay task is aborted when each test ends.

use notichan::channel::{self, ChannelHandle, Credential};
use notichan::config::{MassPredicate, RelayConfig, RelayUser};
use notichan::relay::{self, DeliveryReport};
use notichan::sink::{AtomicCounter, EventSink, NotificationEvent, NotificationKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

async fn start_relay(users: &[(&str, RelayUser)]) -> (u16, tokio::task::JoinHandle<()>) {
    let port = free_port();
    let mut config = RelayConfig::default();
    config.port = port;
    for (token, user) in users {
        config.users.insert(token.to_string(), user.clone());
    }
    let handle = tokio::spawn(async move {
        let _ = relay::run_relay(config).await;
    });

    let url = format!("http://127.0.0.1:{}/", port);
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                let json: serde_json::Value = resp.json().await.expect("parse JSON");
                assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
                assert_eq!(json.get("port").and_then(|v| v.as_u64()), Some(port as u64));
                return (port, handle);
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    handle.abort();
    panic!("relay on port {} did not become healthy within 5s", port);
}

struct Client {
    handle: ChannelHandle,
    events: mpsc::UnboundedReceiver<NotificationEvent>,
    counter: Arc<AtomicCounter>,
}

async fn connect(port: u16, token: &str) -> Client {
    let (sink, events) = EventSink::new();
    let counter = Arc::new(AtomicCounter::default());
    let handle = channel::open(
        &format!("ws://127.0.0.1:{}/notifications", port),
        Credential::new(token),
        MassPredicate::ParsedField,
        Arc::new(sink),
        counter.clone(),
    )
    .expect("valid endpoint");
    assert!(tokio::time::timeout(WAIT, handle.opened()).await.unwrap());
    Client {
        handle,
        events,
        counter,
    }
}

/// POST until `expected` sockets accepted the frame (logins are processed asynchronously).
async fn post_until_delivered(url: &str, body: serde_json::Value, expected: usize) {
    let client = reqwest::Client::new();
    let mut last = None;
    for _ in 0..100 {
        let report: DeliveryReport = client
            .post(url)
            .json(&body)
            .send()
            .await
            .expect("relay reachable")
            .json()
            .await
            .expect("delivery report");
        if report.delivered == expected {
            return;
        }
        last = Some(report.delivered);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} delivered {:?}, expected {}", url, last, expected);
}

async fn next_kind(client: &mut Client) -> NotificationKind {
    tokio::time::timeout(WAIT, client.events.recv())
        .await
        .expect("notification within timeout")
        .expect("sink alive")
        .kind
}

#[tokio::test]
async fn targeted_notification_reaches_logged_in_user_only() {
    let (port, relay_task) = start_relay(&[("tok-34", RelayUser::new("34"))]).await;
    let mut known = connect(port, "tok-34").await;
    let mut stranger = connect(port, "not-registered").await;

    post_until_delivered(
        &format!("http://127.0.0.1:{}/notify", port),
        serde_json::json!({
            "userId": "34",
            "targetType": "class",
            "targetAction": "created",
            "targetId": "9"
        }),
        1,
    )
    .await;

    assert_eq!(
        next_kind(&mut known).await,
        NotificationKind::Targeted {
            target_type: "class".into(),
            target_action: "created".into()
        }
    );
    assert!(
        tokio::time::timeout(Duration::from_millis(200), stranger.events.recv())
            .await
            .is_err(),
        "unregistered socket must not get targeted notifications"
    );
    assert_eq!(stranger.counter.get(), 0);

    known.handle.close();
    stranger.handle.close();
    relay_task.abort();
}

#[tokio::test]
async fn mass_notification_reaches_every_socket() {
    let (port, relay_task) = start_relay(&[("tok-1", RelayUser::new("1"))]).await;
    let mut a = connect(port, "tok-1").await;
    let mut b = connect(port, "anonymous").await;

    post_until_delivered(
        &format!("http://127.0.0.1:{}/mass-notify", port),
        serde_json::json!({ "message": "Server maintenance" }),
        2,
    )
    .await;

    for client in [&mut a, &mut b] {
        assert_eq!(
            next_kind(client).await,
            NotificationKind::Broadcast {
                message: "Server maintenance".into()
            }
        );
    }

    for _ in 0..100 {
        if a.counter.get() == 1 && b.counter.get() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!((a.counter.get(), b.counter.get()), (1, 1));
    relay_task.abort();
}

#[tokio::test]
async fn university_mass_notification_reaches_its_users_only() {
    let (port, relay_task) = start_relay(&[
        ("tok-1", RelayUser::new("1").with_university("7")),
        ("tok-2", RelayUser::new("2").with_university("8")),
    ])
    .await;
    let mut campus = connect(port, "tok-1").await;
    let mut other_campus = connect(port, "tok-2").await;
    let mut anonymous = connect(port, "anonymous").await;

    post_until_delivered(
        &format!("http://127.0.0.1:{}/mass-notify", port),
        serde_json::json!({ "message": "Library closed", "universityId": "7" }),
        1,
    )
    .await;
    assert_eq!(
        next_kind(&mut campus).await,
        NotificationKind::Broadcast {
            message: "Library closed".into()
        }
    );
    for client in [&mut other_campus, &mut anonymous] {
        assert!(
            tokio::time::timeout(Duration::from_millis(200), client.events.recv())
                .await
                .is_err(),
            "university mass notification leaked to another socket"
        );
    }

    // Without a university it still goes to everyone.
    post_until_delivered(
        &format!("http://127.0.0.1:{}/mass-notify", port),
        serde_json::json!({ "message": "Server maintenance" }),
        3,
    )
    .await;
    for client in [&mut campus, &mut other_campus, &mut anonymous] {
        assert_eq!(
            next_kind(client).await,
            NotificationKind::Broadcast {
                message: "Server maintenance".into()
            }
        );
    }
    relay_task.abort();
}

#[tokio::test]
async fn notify_requires_user_id() {
    let (port, relay_task) = start_relay(&[]).await;
    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/notify", port))
        .json(&serde_json::json!({
            "userId": " ",
            "targetType": "class",
            "targetAction": "created"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    relay_task.abort();
}

#[tokio::test]
async fn relay_refuses_non_loopback_bind() {
    let mut config = RelayConfig::default();
    config.bind = "0.0.0.0".to_string();
    config.port = free_port();
    assert!(relay::run_relay(config).await.is_err());
}
