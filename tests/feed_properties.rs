use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;

use ping_feed::auth::MemoryIdentityProvider;
use ping_feed::common::LocationError;
use ping_feed::config::{AppConfig, LocationProviderKind};
use ping_feed::feed::{ClientSettings, PINGS_COLLECTION, RetryPolicy};
use ping_feed::location::{Accuracy, LocationProvider, NoLocation, Permission};
use ping_feed::storage::{MemoryCollectionStore, OrderBy};
use ping_feed::{Coords, Identity, Ping, PingClient, PingError, PingFeed, SqlitePingClient};

const WAIT: Duration = Duration::from_secs(5);

struct MockLocation {
    permission: Permission,
    coords: Coords,
}

impl LocationProvider for MockLocation {
    async fn request_permission(&self) -> Permission {
        self.permission
    }

    async fn current_position(&self, _accuracy: Accuracy) -> Result<Coords, LocationError> {
        Ok(self.coords)
    }
}

fn granted() -> MockLocation {
    MockLocation {
        permission: Permission::Granted,
        coords: Coords {
            lat: 37.0,
            lng: -122.0,
        },
    }
}

fn denied() -> MockLocation {
    MockLocation {
        permission: Permission::Denied,
        ..granted()
    }
}

fn memory_client<L: LocationProvider>(
    location: L,
) -> PingClient<MemoryIdentityProvider, MemoryCollectionStore, L> {
    PingClient::new(
        MemoryIdentityProvider::new(),
        MemoryCollectionStore::new(),
        location,
    )
    .with_settings(ClientSettings {
        location_timeout: Duration::from_secs(1),
        retry: RetryPolicy {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(50),
        },
    })
}

async fn snapshot_where<F>(feed: &mut PingFeed, mut accept: F) -> Vec<Ping>
where
    F: FnMut(&[Ping]) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let pings = feed.next().await.expect("feed ended");
            if accept(&pings) {
                return pings;
            }
        }
    })
    .await
    .expect("no matching snapshot")
}

fn assert_newest_first(pings: &[Ping]) {
    for pair in pings.windows(2) {
        assert!(
            pair[0].created_at >= pair[1].created_at,
            "{} before {}",
            pair[0].created_at,
            pair[1].created_at
        );
    }
}

#[tokio::test]
async fn created_pings_show_up_with_unique_ids() {
    let client = memory_client(NoLocation);
    let identity = client.ensure_identity().await.unwrap();
    let mut feed = client.watch_pings();

    let mut ids = HashSet::new();
    for message in ["one", "two", "three"] {
        ids.insert(client.create_ping(&identity, Some(message)).await.unwrap());
    }
    assert_eq!(ids.len(), 3);

    let pings = snapshot_where(&mut feed, |pings| pings.len() == 3).await;
    for ping in &pings {
        assert!(ids.contains(&ping.id));
        assert_eq!(ping.uid, identity.uid());
    }
    let messages: Vec<_> = pings.iter().filter_map(|p| p.message.as_deref()).collect();
    assert_eq!(messages, ["three", "two", "one"]);
}

#[tokio::test]
async fn denied_permission_means_no_coords() {
    let client = memory_client(denied());
    let identity = client.ensure_identity().await.unwrap();
    client.create_ping(&identity, Some("no gps")).await.unwrap();

    let mut feed = client.watch_pings();
    let pings = snapshot_where(&mut feed, |pings| !pings.is_empty()).await;
    assert_eq!(pings[0].coords, None);
}

#[tokio::test]
async fn granted_permission_records_mocked_position() {
    let client = memory_client(granted());
    let identity = client.ensure_identity().await.unwrap();
    client.create_ping(&identity, None).await.unwrap();

    let mut feed = client.watch_pings();
    let pings = snapshot_where(&mut feed, |pings| !pings.is_empty()).await;
    assert_eq!(
        pings[0].coords,
        Some(Coords {
            lat: 37.0,
            lng: -122.0
        })
    );
}

#[tokio::test]
async fn every_snapshot_is_newest_first() {
    let client = memory_client(NoLocation);
    let identity = client.ensure_identity().await.unwrap();
    let mut feed = client.watch_pings();

    // Equal commit times exercise the insertion-order tie break.
    for (i, at) in [1_000, 1_000, 3_000, 3_000, 5_000].into_iter().enumerate() {
        client.store().freeze_clock(Some(at));
        client
            .create_ping(&identity, Some(&i.to_string()))
            .await
            .unwrap();
    }

    let mut seen = 0;
    while seen < 5 {
        let pings = snapshot_where(&mut feed, |_| true).await;
        assert_newest_first(&pings);
        seen = pings.len();
    }

    let final_snapshot = client
        .store()
        .documents(PINGS_COLLECTION, &OrderBy::descending("createdAt"));
    let order: Vec<_> = final_snapshot
        .iter()
        .map(|d| d.fields["message"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(order, ["4", "3", "2", "1", "0"]);
}

#[tokio::test]
async fn no_callbacks_after_unsubscribe() {
    let client = memory_client(NoLocation);
    let identity = client.ensure_identity().await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let mut subscription = client.subscribe_to_pings(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    tokio::time::timeout(WAIT, async {
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("initial snapshot never delivered");

    subscription.unsubscribe();
    let after_unsubscribe = calls.load(Ordering::SeqCst);

    client.create_ping(&identity, Some("late")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    subscription.unsubscribe();

    assert_eq!(calls.load(Ordering::SeqCst), after_unsubscribe);
    assert!(!subscription.is_active());
}

#[tokio::test]
async fn ensure_identity_is_stable() {
    let client = memory_client(NoLocation);
    let first = client.ensure_identity().await.unwrap();
    let second = client.ensure_identity().await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn missing_message_is_stored_as_null() {
    let client = memory_client(NoLocation);
    client
        .create_ping(&Identity::new("user-1"), None)
        .await
        .unwrap();
    client
        .create_ping(&Identity::new("user-1"), Some(""))
        .await
        .unwrap();

    let documents = client
        .store()
        .documents(PINGS_COLLECTION, &OrderBy::descending("createdAt"));
    assert_eq!(documents.len(), 2);
    for document in &documents {
        assert_eq!(document.fields.get("message"), Some(&Value::Null));
        assert_eq!(document.fields.get("uid"), Some(&Value::from("user-1")));
    }

    let mut feed = client.watch_pings();
    let pings = snapshot_where(&mut feed, |pings| pings.len() == 2).await;
    assert!(pings.iter().all(|p| p.message.is_none()));
}

#[tokio::test]
async fn failed_insert_is_surfaced_and_leaves_no_record() {
    let client = memory_client(granted());
    let identity = client.ensure_identity().await.unwrap();
    client.store().fail_next_inserts(1);

    let result = client.create_ping(&identity, Some("lost")).await;
    assert!(matches!(result, Err(PingError::WriteFailed(_))));

    let mut feed = client.watch_pings();
    let pings = snapshot_where(&mut feed, |_| true).await;
    assert!(pings.is_empty());
}

#[tokio::test]
async fn feed_survives_store_disconnect() {
    let client = memory_client(NoLocation);
    let identity = client.ensure_identity().await.unwrap();
    let mut feed = client.watch_pings();
    snapshot_where(&mut feed, |_| true).await;

    client
        .store()
        .break_subscriptions(PINGS_COLLECTION, "stream reset");
    client.create_ping(&identity, Some("later")).await.unwrap();

    let pings = snapshot_where(&mut feed, |pings| pings.len() == 1).await;
    assert_eq!(pings[0].message.as_deref(), Some("later"));
}

#[tokio::test]
async fn sqlite_client_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.store.database_path = dir.path().join("feed.db").to_string_lossy().into_owned();
    config.store.poll_interval_ms = 20;
    config.location.provider = LocationProviderKind::Fixed;
    config.location.lat = Some(37.0);
    config.location.lng = Some(-122.0);

    let sender = SqlitePingClient::from_config(&config).unwrap();
    let viewer = SqlitePingClient::from_config(&config).unwrap();

    let identity = sender.ensure_identity().await.unwrap();
    // Both handles share the installation identity through the database file.
    assert_eq!(viewer.ensure_identity().await.unwrap(), identity);

    let mut feed = viewer.watch_pings();
    snapshot_where(&mut feed, |_| true).await;

    let id = sender.create_ping(&identity, Some("  hello  ")).await.unwrap();
    let pings = snapshot_where(&mut feed, |pings| !pings.is_empty()).await;
    assert_eq!(pings[0].id, id);
    assert_eq!(pings[0].message.as_deref(), Some("hello"));
    assert_eq!(
        pings[0].coords,
        Some(Coords {
            lat: 37.0,
            lng: -122.0
        })
    );

    feed.unsubscribe();
    assert!(feed.next().await.is_none());
}
