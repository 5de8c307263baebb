//! Integration tests for `PgEventLog`.

use chrono::Utc;
use futures::StreamExt;
use sqlx::PgPool;
use stayline_core::error::DomainError;
use stayline_core::event_log::{EventFilter, EventLog, ExpectedVersion, StoredEvent};
use stayline_event_store::pg_event_log::PgEventLog;
use uuid::Uuid;

/// Helper to build a `StoredEvent` with sensible defaults.
fn make_stored_event(stream_id: Uuid, event_type: &str) -> StoredEvent {
    StoredEvent {
        event_id: Uuid::new_v4(),
        aggregate_id: stream_id,
        event_type: event_type.to_string(),
        payload: serde_json::json!({"key": "value"}),
        sequence_number: 0,
        correlation_id: Uuid::new_v4(),
        causation_id: Uuid::new_v4(),
        occurred_at: Utc::now(),
    }
}

// --- read_stream ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_read_stream_returns_empty_vec_for_nonexistent_stream(pool: PgPool) {
    let log = PgEventLog::new(pool);

    let events = log.read_stream(Uuid::new_v4()).await.unwrap();

    assert!(events.is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_append_and_read_single_event(pool: PgPool) {
    let log = PgEventLog::new(pool);
    let stream_id = Uuid::new_v4();
    let event = make_stored_event(stream_id, "test.created");
    let expected_event_id = event.event_id;
    let expected_payload = event.payload.clone();
    let expected_correlation_id = event.correlation_id;

    let next_version = log
        .append_to_stream(stream_id, ExpectedVersion::NoStream, &[event])
        .await
        .unwrap();

    assert_eq!(next_version, 1);
    let loaded = log.read_stream(stream_id).await.unwrap();
    assert_eq!(loaded.len(), 1);
    let e = &loaded[0];
    assert_eq!(e.event_id, expected_event_id);
    assert_eq!(e.aggregate_id, stream_id);
    assert_eq!(e.event_type, "test.created");
    assert_eq!(e.payload, expected_payload);
    assert_eq!(e.sequence_number, 1);
    assert_eq!(e.correlation_id, expected_correlation_id);
}

// --- versions ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_append_stamps_consecutive_sequence_numbers(pool: PgPool) {
    let log = PgEventLog::new(pool);
    let stream_id = Uuid::new_v4();
    log.append_to_stream(
        stream_id,
        ExpectedVersion::NoStream,
        &[
            make_stored_event(stream_id, "test.a"),
            make_stored_event(stream_id, "test.b"),
        ],
    )
    .await
    .unwrap();

    let next_version = log
        .append_to_stream(
            stream_id,
            ExpectedVersion::Exact(2),
            &[make_stored_event(stream_id, "test.c")],
        )
        .await
        .unwrap();

    assert_eq!(next_version, 3);
    let loaded = log.read_stream(stream_id).await.unwrap();
    let sequence: Vec<i64> = loaded.iter().map(|e| e.sequence_number).collect();
    assert_eq!(sequence, vec![1, 2, 3]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_append_with_stale_version_is_concurrency_conflict(pool: PgPool) {
    let log = PgEventLog::new(pool);
    let stream_id = Uuid::new_v4();
    log.append_to_stream(
        stream_id,
        ExpectedVersion::NoStream,
        &[make_stored_event(stream_id, "test.a")],
    )
    .await
    .unwrap();
    log.append_to_stream(
        stream_id,
        ExpectedVersion::Exact(1),
        &[make_stored_event(stream_id, "test.b")],
    )
    .await
    .unwrap();

    let result = log
        .append_to_stream(
            stream_id,
            ExpectedVersion::Exact(1),
            &[make_stored_event(stream_id, "test.c")],
        )
        .await;

    match result {
        Err(DomainError::ConcurrencyConflict {
            stream_id: id,
            actual,
            ..
        }) => {
            assert_eq!(id, stream_id);
            assert_eq!(actual, 2);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
    assert_eq!(log.read_stream(stream_id).await.unwrap().len(), 2);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_append_no_stream_to_existing_stream_fails(pool: PgPool) {
    let log = PgEventLog::new(pool);
    let stream_id = Uuid::new_v4();
    log.append_to_stream(
        stream_id,
        ExpectedVersion::NoStream,
        &[make_stored_event(stream_id, "test.a")],
    )
    .await
    .unwrap();

    let result = log
        .append_to_stream(
            stream_id,
            ExpectedVersion::NoStream,
            &[make_stored_event(stream_id, "test.a")],
        )
        .await;

    assert!(matches!(result, Err(DomainError::StreamAlreadyExists(id)) if id == stream_id));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_empty_append_returns_current_version(pool: PgPool) {
    let log = PgEventLog::new(pool);
    let stream_id = Uuid::new_v4();
    log.append_to_stream(
        stream_id,
        ExpectedVersion::Any,
        &[make_stored_event(stream_id, "test.a")],
    )
    .await
    .unwrap();

    let version = log
        .append_to_stream(stream_id, ExpectedVersion::Any, &[])
        .await
        .unwrap();

    assert_eq!(version, 1);
}

// --- global log ---

#[sqlx::test(migrations = "../../migrations")]
async fn test_read_all_pages_in_position_order(pool: PgPool) {
    let log = PgEventLog::new(pool);
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    log.append_to_stream(a, ExpectedVersion::Any, &[make_stored_event(a, "test.a")])
        .await
        .unwrap();
    log.append_to_stream(b, ExpectedVersion::Any, &[make_stored_event(b, "test.b")])
        .await
        .unwrap();
    log.append_to_stream(a, ExpectedVersion::Any, &[make_stored_event(a, "test.c")])
        .await
        .unwrap();

    let first_page = log.read_all(None, 2).await.unwrap();
    let second_page = log
        .read_all(Some(first_page[1].position), 2)
        .await
        .unwrap();

    assert_eq!(first_page.len(), 2);
    assert_eq!(second_page.len(), 1);
    assert!(first_page[0].position < first_page[1].position);
    assert!(first_page[1].position < second_page[0].position);
    assert_eq!(second_page[0].event_type(), "test.c");
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_subscribe_to_all_catches_up_then_receives_live_events(pool: PgPool) {
    // Arrange
    let log = PgEventLog::new(pool);
    let stream_id = Uuid::new_v4();
    log.append_to_stream(
        stream_id,
        ExpectedVersion::Any,
        &[
            make_stored_event(stream_id, "test.first"),
            make_stored_event(stream_id, "$checkpoint"),
        ],
    )
    .await
    .unwrap();
    let mut subscription = log.subscribe_to_all(None, EventFilter::default());

    // Act
    let historical = subscription.next().await.unwrap().unwrap();
    log.append_to_stream(
        stream_id,
        ExpectedVersion::Any,
        &[make_stored_event(stream_id, "test.live")],
    )
    .await
    .unwrap();
    let live = tokio::time::timeout(std::time::Duration::from_secs(5), subscription.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // Assert
    assert_eq!(historical.event_type(), "test.first");
    assert_eq!(live.event_type(), "test.live");
    assert!(live.position > historical.position);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_subscribe_to_all_is_exclusive_of_start_position(pool: PgPool) {
    let log = PgEventLog::new(pool);
    let stream_id = Uuid::new_v4();
    log.append_to_stream(
        stream_id,
        ExpectedVersion::Any,
        &[
            make_stored_event(stream_id, "test.one"),
            make_stored_event(stream_id, "test.two"),
        ],
    )
    .await
    .unwrap();
    let all = log.read_all(None, 10).await.unwrap();

    let mut subscription = log.subscribe_to_all(Some(all[0].position), EventFilter::all());
    let first = subscription.next().await.unwrap().unwrap();

    assert_eq!(first.position, all[1].position);
    assert_eq!(first.event_type(), "test.two");
}
