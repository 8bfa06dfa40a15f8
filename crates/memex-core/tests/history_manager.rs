//! End-to-end manager behaviour over both backends.

use memex_core::{
    FifoAlgorithm, HistoryConfig, HistoryManager, Role, StorageConfig, ThreadQuery, VolatileStore,
};
use memex_models::metadata;
use std::sync::Arc;

#[tokio::test]
async fn fifo_window_examples() {
    let manager = HistoryManager::new(Arc::new(VolatileStore::new()))
        .with_algorithm(Arc::new(FifoAlgorithm::new(3).unwrap()));

    manager.add_message("chat", "sys", Role::System, None).await.unwrap();
    for (content, role) in [
        ("u1", Role::User),
        ("a1", Role::Assistant),
        ("u2", Role::User),
        ("a2", Role::Assistant),
    ] {
        manager.add_message("chat", content, role, None).await.unwrap();
    }

    let windowed = manager.get_thread("chat", true).await.unwrap();
    let contents: Vec<_> = windowed.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["sys", "u2", "a2"]);

    let full = manager.get_thread("chat", false).await.unwrap();
    assert_eq!(full.message_count(), 5);
}

#[tokio::test]
async fn durable_history_survives_restart() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("history.redb");
    let config = HistoryConfig {
        storage: StorageConfig::durable(&path),
        ..HistoryConfig::default()
    };

    let thread_id = {
        let manager = config.build().unwrap();
        let thread = manager
            .create_thread(Some(metadata! { "user_id" => "u-7" }))
            .await
            .unwrap();
        manager
            .add_message(&thread.id, "remember me", Role::User, None)
            .await
            .unwrap();
        thread.id
    };

    let manager = config.build().unwrap();
    let thread = manager.get_thread(&thread_id, false).await.unwrap();
    assert_eq!(thread.metadata["user_id"].as_str(), Some("u-7"));
    assert_eq!(thread.messages[0].content, "remember me");

    let found = manager
        .search_threads(&ThreadQuery::new().with_metadata("user_id", "u-7"))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn storage_cap_and_metadata_counts() {
    let store = StorageConfig::volatile().with_max_messages(3).open().unwrap();
    let manager = HistoryManager::new(store)
        .with_algorithm(Arc::new(FifoAlgorithm::new(10).unwrap().with_message_counts()));

    for i in 0..5 {
        manager
            .add_message("capped", format!("m{i}"), Role::User, None)
            .await
            .unwrap();
    }

    let thread = manager.get_thread("capped", false).await.unwrap();
    let contents: Vec<_> = thread.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["m2", "m3", "m4"]);
    assert_eq!(thread.metadata["message_count"].as_i64(), Some(4));
    assert_eq!(thread.metadata["user_count"].as_i64(), Some(4));
}

#[tokio::test]
async fn delete_and_list() {
    let manager = HistoryManager::new(Arc::new(VolatileStore::new()));
    let first = manager.create_thread(None).await.unwrap();
    let second = manager.create_thread(None).await.unwrap();

    assert_eq!(manager.list_threads(10, 0).await.unwrap().len(), 2);
    assert!(manager.delete_thread(&first.id).await.unwrap());
    assert!(!manager.delete_thread(&first.id).await.unwrap());
    assert!(!manager.delete_thread("never-created").await.unwrap());

    let remaining = manager.list_threads(10, 0).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, second.id);

    let err = manager.get_thread(&first.id, false).await.unwrap_err();
    assert_eq!(err.kind(), memex_traits::ErrorKind::NotFound);
}
