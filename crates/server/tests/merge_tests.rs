//! Merge engine tests: byte-exact assembly, failure rollback, recovery.

mod common;

use common::TestServer;
use common::fixtures::{seeded_bytes, split_into_chunks};
use common::mocks::FailingBlobStore;
use common::server::collect_stream;
use depot_core::{OpenSessionRequest, SessionStatus};
use depot_storage::BlobStore;

async fn open_session(server: &TestServer, total_chunks: u32, declared_size: u64) -> String {
    server
        .state
        .manager
        .open(OpenSessionRequest {
            file_name: "merge.bin".to_string(),
            declared_size,
            mime_type: None,
            total_chunks,
            uploaded_by: None,
        })
        .await
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_merge_concatenates_chunks_in_index_order() {
    let server = TestServer::new().await;
    let data = seeded_bytes(7, 10_000);
    let chunks = split_into_chunks(&data, 1_500);
    let total = chunks.len() as u32;

    let id = open_session(&server, total, data.len() as u64).await;

    // Submit in reverse order; merge order must still be by index.
    for (index, chunk) in chunks.iter().enumerate().rev() {
        server
            .state
            .manager
            .submit_chunk(&id, index as u32, total, chunk.clone())
            .await
            .unwrap();
    }

    server.state.manager.complete(&id).await.unwrap();
    let view = server.wait_for_merge(&id).await;
    assert_eq!(view.status, SessionStatus::Completed);

    let blob_ref = view.blob_ref.unwrap();
    let merged = collect_stream(server.state.blobs.get_stream(&blob_ref).await.unwrap()).await;
    assert_eq!(merged, data.as_ref());
}

#[tokio::test]
async fn test_merge_failure_leaves_no_partial_object() {
    // Allow two stream writes, then every write fails mid-merge.
    let server =
        TestServer::with_blobs(|inner| FailingBlobStore::wrap(inner, 2, usize::MAX)).await;

    let data = seeded_bytes(11, 4_000);
    let chunks = split_into_chunks(&data, 1_000);
    let id = open_session(&server, chunks.len() as u32, data.len() as u64).await;
    for (index, chunk) in chunks.iter().enumerate() {
        server
            .state
            .manager
            .submit_chunk(&id, index as u32, chunks.len() as u32, chunk.clone())
            .await
            .unwrap();
    }

    server.state.manager.complete(&id).await.unwrap();
    let view = server.wait_for_merge(&id).await;

    assert_eq!(view.status, SessionStatus::Failed);
    assert_eq!(view.retry_count, 1);
    assert!(view.error_message.is_some());
    assert!(view.blob_ref.is_none());

    // The partially written object was aborted, never made visible.
    let key = depot_server::MergeEngine::blob_key(
        &depot_core::SessionId::parse(&id).unwrap(),
    );
    assert!(!server.state.blobs.exists(&key).await.unwrap());

    // Staged chunks survive the failure for re-submission.
    for index in 0..chunks.len() as u32 {
        assert!(
            server
                .state
                .staging
                .has_chunk(&depot_core::SessionId::parse(&id).unwrap(), index)
                .await
                .unwrap()
        );
    }
}

#[tokio::test]
async fn test_failed_session_can_be_redriven() {
    // Fail the first merge's first write, then let everything through.
    let server = TestServer::with_blobs(|inner| FailingBlobStore::wrap(inner, 0, 1)).await;

    let data = seeded_bytes(13, 2_000);
    let chunks = split_into_chunks(&data, 1_000);
    let id = open_session(&server, chunks.len() as u32, data.len() as u64).await;
    for (index, chunk) in chunks.iter().enumerate() {
        server
            .state
            .manager
            .submit_chunk(&id, index as u32, chunks.len() as u32, chunk.clone())
            .await
            .unwrap();
    }

    server.state.manager.complete(&id).await.unwrap();
    let view = server.wait_for_merge(&id).await;
    assert_eq!(view.status, SessionStatus::Failed);
    assert_eq!(view.retry_count, 1);

    // Re-submitting a chunk flips failed -> uploading.
    server
        .state
        .manager
        .submit_chunk(&id, 0, chunks.len() as u32, chunks[0].clone())
        .await
        .unwrap();
    let view = server.state.manager.get_status(&id).await.unwrap();
    assert_eq!(view.status, SessionStatus::Uploading);

    // The failure schedule is exhausted, so the second merge goes through.
    server.state.manager.complete(&id).await.unwrap();
    let view = server.wait_for_merge(&id).await;
    assert_eq!(view.status, SessionStatus::Completed);

    let merged =
        collect_stream(server.state.blobs.get_stream(&view.blob_ref.unwrap()).await.unwrap())
            .await;
    assert_eq!(merged, data.as_ref());
}

#[tokio::test]
async fn test_complete_detects_externally_deleted_chunk() {
    let server = TestServer::new().await;
    let data = seeded_bytes(17, 3_000);
    let chunks = split_into_chunks(&data, 1_000);
    let id = open_session(&server, chunks.len() as u32, data.len() as u64).await;
    for (index, chunk) in chunks.iter().enumerate() {
        server
            .state
            .manager
            .submit_chunk(&id, index as u32, chunks.len() as u32, chunk.clone())
            .await
            .unwrap();
    }

    // Something deletes a staged chunk out-of-band; the prefix counter is
    // full but the pre-merge existence check must catch it.
    let session_id = depot_core::SessionId::parse(&id).unwrap();
    server.state.staging.remove_chunk(&session_id, 1).await.unwrap();

    let err = server.state.manager.complete(&id).await.unwrap_err();
    assert!(matches!(err, depot_server::ApiError::Upload(_)));
    assert!(err.to_string().contains("re-upload"));

    // No merge was dispatched.
    let view = server.state.manager.get_status(&id).await.unwrap();
    assert_eq!(view.status, SessionStatus::Uploading);
}

#[tokio::test]
async fn test_merge_is_noop_on_completed_session() {
    let server = TestServer::new().await;
    let data = seeded_bytes(19, 1_000);
    let id = open_session(&server, 1, data.len() as u64).await;
    server
        .state
        .manager
        .submit_chunk(&id, 0, 1, data.clone())
        .await
        .unwrap();
    server.state.manager.complete(&id).await.unwrap();
    let view = server.wait_for_merge(&id).await;
    assert_eq!(view.status, SessionStatus::Completed);

    // Driving the engine again against the completed session is a no-op.
    let session_id = depot_core::SessionId::parse(&id).unwrap();
    server.state.merge.merge(session_id).await.unwrap();

    let after = server.state.manager.get_status(&id).await.unwrap();
    assert_eq!(after.status, SessionStatus::Completed);
    assert_eq!(after.retry_count, 0);
}

#[tokio::test]
async fn test_declared_size_is_advisory() {
    let server = TestServer::new().await;
    // Declared size is wildly off; the merge must still complete.
    let data = seeded_bytes(23, 5_000);
    let id = open_session(&server, 1, 100).await;
    server
        .state
        .manager
        .submit_chunk(&id, 0, 1, data.clone())
        .await
        .unwrap();
    server.state.manager.complete(&id).await.unwrap();

    let view = server.wait_for_merge(&id).await;
    assert_eq!(view.status, SessionStatus::Completed);
    let merged =
        collect_stream(server.state.blobs.get_stream(&view.blob_ref.unwrap()).await.unwrap())
            .await;
    assert_eq!(merged.len(), 5_000);
}
