// Concurrency tests for the connection registry

use std::sync::Arc;

use swiftchat_relay::core::{ConnectionId, ConnectionRegistry};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_register_and_lookup() {
    let registry = Arc::new(ConnectionRegistry::new());

    let mut tasks = Vec::new();
    for user in 0..50 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            let user_id = format!("user-{}", user);
            let mut last = None;
            for _ in 0..20 {
                let id = ConnectionId::new();
                registry.register(&user_id, id);
                assert!(registry.lookup(&user_id).is_some());
                last = Some(id);
            }
            (user_id, last)
        }));
    }

    for task in tasks {
        let (user_id, last) = task.await.unwrap();
        assert_eq!(registry.lookup(&user_id), last);
    }
    assert_eq!(registry.len(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stale_disconnects_never_evict_current_device() {
    let registry = Arc::new(ConnectionRegistry::new());
    let current = ConnectionId::new();

    let stale: Vec<ConnectionId> = (0..32).map(|_| ConnectionId::new()).collect();
    for id in &stale {
        registry.register("u1", *id);
    }
    registry.register("u1", current);

    let mut tasks = Vec::new();
    for id in stale {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            registry.unregister_connection("u1", &id)
        }));
    }
    for task in tasks {
        assert!(!task.await.unwrap());
    }

    assert_eq!(registry.lookup("u1"), Some(current));
}
