//! Integration tests for the key-value cache and pub/sub channel.
//!
//! These need a running server and are skipped unless `REDIS_TEST_URL` is set,
//! e.g. `REDIS_TEST_URL=redis://127.0.0.1:6379`.

use async_datastore::config::KeyValueConfig;
use async_datastore::kv::{KeyValueCache, KeyValueDatabase, PubSubChannel};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

fn test_config() -> Option<KeyValueConfig> {
    let raw = std::env::var("REDIS_TEST_URL").ok()?;
    let url = Url::parse(&raw).expect("REDIS_TEST_URL must be a URL");
    let mut config = KeyValueConfig::new(
        url.host_str().unwrap_or("127.0.0.1"),
        url.port().unwrap_or(6379),
    );
    if let Some(password) = url.password() {
        config = config.with_password(password);
    }
    Some(config)
}

fn connect() -> Option<KeyValueDatabase> {
    let config = test_config()?;
    let database = KeyValueDatabase::new();
    database.connect(&config).unwrap();
    Some(database)
}

/// Keys and channels unique to this run so parallel tests do not collide.
fn unique(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("async-datastore-test:{}:{}", prefix, nanos)
}

#[tokio::test]
async fn test_set_then_get_round_trip() {
    let Some(database) = connect() else {
        eprintln!("REDIS_TEST_URL not set, skipping");
        return;
    };
    let cache = KeyValueCache::new(database.clone());
    let key = unique("round-trip");

    cache.set(&key, "v1", 60).unwrap().await.unwrap();
    assert_eq!(cache.get(&key).unwrap().await.unwrap().as_deref(), Some("v1"));
    assert!(cache.exists(&key).unwrap().await.unwrap());

    database.close();
}

#[tokio::test]
async fn test_missing_key_is_absent() {
    let Some(database) = connect() else {
        eprintln!("REDIS_TEST_URL not set, skipping");
        return;
    };
    let cache = KeyValueCache::new(database.clone());
    let key = unique("missing");

    assert_eq!(cache.get(&key).unwrap().await.unwrap(), None);
    assert!(!cache.exists(&key).unwrap().await.unwrap());

    database.close();
}

#[tokio::test]
async fn test_key_expires_after_ttl() {
    let Some(database) = connect() else {
        eprintln!("REDIS_TEST_URL not set, skipping");
        return;
    };
    let cache = KeyValueCache::new(database.clone());
    let key = unique("ttl");

    cache.set(&key, "short-lived", 1).unwrap().await.unwrap();
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(cache.get(&key).unwrap().await.unwrap(), None);

    database.close();
}

#[tokio::test]
async fn test_connections_return_to_pool() {
    let Some(database) = connect() else {
        eprintln!("REDIS_TEST_URL not set, skipping");
        return;
    };
    let cache = KeyValueCache::new(database.clone());

    for i in 0..5 {
        let key = unique(&format!("pool-{}", i));
        cache.set(&key, "x", 30).unwrap().await.unwrap();
    }
    let state = database.state().unwrap();
    assert_eq!(state.connections, state.idle_connections);

    database.close();
}

#[tokio::test]
async fn test_published_message_reaches_handler_once() {
    let Some(database) = connect() else {
        eprintln!("REDIS_TEST_URL not set, skipping");
        return;
    };
    let channel_name = unique("chat");
    let received = Arc::new(Mutex::new(Vec::new()));

    let subscriber = PubSubChannel::new(database.clone());
    let sink = Arc::clone(&received);
    subscriber
        .subscribe(channel_name.clone(), move |channel, payload| {
            sink.lock()
                .unwrap()
                .push((channel.to_string(), payload.to_string()));
        })
        .unwrap()
        .await
        .unwrap();
    assert!(subscriber.is_listening());

    let publisher = PubSubChannel::new(database.clone());
    publisher.publish(channel_name.clone(), "hello").unwrap();

    for _ in 0..100 {
        if !received.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // Leave time for a duplicate to show up
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        *received.lock().unwrap(),
        vec![(channel_name.clone(), "hello".to_string())]
    );

    // close joins the listen thread; keep that off the runtime thread
    let subscriber = tokio::task::spawn_blocking(move || {
        subscriber.close();
        subscriber
    })
    .await
    .unwrap();
    assert!(!subscriber.is_listening());
    publisher.close();
    database.close();
}

#[tokio::test]
async fn test_stream_delivers_in_order_and_unsubscribe_returns_to_idle() {
    let Some(database) = connect() else {
        eprintln!("REDIS_TEST_URL not set, skipping");
        return;
    };
    let channel_name = unique("ordered");
    let pubsub = PubSubChannel::new(database.clone());

    let (ready, mut messages) = pubsub.subscribe_stream(channel_name.clone()).unwrap();
    ready.await.unwrap();

    // A second subscription on the same instance is refused
    assert!(pubsub.subscribe("other", |_, _| {}).is_err());

    for i in 0..3 {
        pubsub.publish(channel_name.clone(), format!("m{}", i)).unwrap();
        // publish is fire-and-forget; space them out to keep send order
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for i in 0..3 {
        let msg = tokio::time::timeout(Duration::from_secs(5), messages.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.channel, channel_name);
        assert_eq!(msg.payload, format!("m{}", i));
    }

    let pubsub = tokio::task::spawn_blocking(move || {
        pubsub.unsubscribe();
        pubsub
    })
    .await
    .unwrap();
    assert!(!pubsub.is_listening());
    // The stream ends once the listener is gone
    assert!(messages.recv().await.is_none());

    pubsub.close();
    database.close();
}

#[tokio::test]
async fn test_publish_without_subscriber_does_not_block() {
    let Some(database) = connect() else {
        eprintln!("REDIS_TEST_URL not set, skipping");
        return;
    };
    let pubsub = PubSubChannel::new(database.clone());

    let started = std::time::Instant::now();
    pubsub.publish(unique("nobody"), "into the void").unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));

    pubsub.close();
    database.close();
}
