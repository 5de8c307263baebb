//! `PostgreSQL` implementation of the `EventLog` trait.

use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use stayline_core::error::DomainError;
use stayline_core::event_log::{
    EventFilter, EventLog, EventStream, ExpectedVersion, RecordedEvent, StoredEvent,
};

use crate::db_error;

/// `LISTEN`/`NOTIFY` channel signalled after every committed append. The
/// payload is the first global position of the batch.
pub const EVENTS_NOTIFY_CHANNEL: &str = "stayline_domain_events";

/// Advisory lock taken by every append. Serialising appends makes global
/// positions visible in commit order, so readers never skip a position that
/// commits late.
const APPEND_LOCK_KEY: i64 = 0x5354_4159_4c49_4e45;

const CATCH_UP_PAGE_SIZE: usize = 500;

const SELECT_COLUMNS: &str = "SELECT position, event_id, aggregate_id, event_type, payload, \
     sequence_number, correlation_id, causation_id, occurred_at FROM domain_events";

/// PostgreSQL-backed event log.
#[derive(Debug, Clone)]
pub struct PgEventLog {
    pool: PgPool,
}

impl PgEventLog {
    /// Creates a new `PgEventLog`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_version(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        stream_id: Uuid,
    ) -> Result<i64, DomainError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(MAX(sequence_number), 0) FROM domain_events WHERE aggregate_id = $1",
        )
        .bind(stream_id)
        .fetch_one(&mut **tx)
        .await
        .map_err(db_error)
    }
}

fn decode_row(row: &PgRow) -> Result<RecordedEvent, sqlx::Error> {
    Ok(RecordedEvent {
        position: row.try_get("position")?,
        event: StoredEvent {
            event_id: row.try_get("event_id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            sequence_number: row.try_get("sequence_number")?,
            correlation_id: row.try_get("correlation_id")?,
            causation_id: row.try_get("causation_id")?,
            occurred_at: row.try_get("occurred_at")?,
        },
    })
}

fn decode_rows(rows: &[PgRow]) -> Result<Vec<RecordedEvent>, DomainError> {
    rows.iter()
        .map(decode_row)
        .collect::<Result<_, _>>()
        .map_err(db_error)
}

#[async_trait]
impl EventLog for PgEventLog {
    #[instrument(skip(self))]
    async fn read_stream(&self, stream_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE aggregate_id = $1 ORDER BY sequence_number ASC"
        ))
        .bind(stream_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(decode_rows(&rows)?
            .into_iter()
            .map(|recorded| recorded.event)
            .collect())
    }

    #[instrument(skip(self, events), fields(%expected, count = events.len()))]
    async fn append_to_stream(
        &self,
        stream_id: Uuid,
        expected: ExpectedVersion,
        events: &[StoredEvent],
    ) -> Result<i64, DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        let actual = Self::current_version(&mut tx, stream_id).await?;
        expected.check(stream_id, actual)?;

        if events.is_empty() {
            tx.commit().await.map_err(db_error)?;
            return Ok(actual);
        }

        let mut version = actual;
        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO domain_events (event_id, aggregate_id, event_type, payload, \
             sequence_number, correlation_id, causation_id, occurred_at) ",
        );
        qb.push_values(events, |mut b, event| {
            version += 1;
            b.push_bind(event.event_id)
                .push_bind(stream_id)
                .push_bind(&event.event_type)
                .push_bind(&event.payload)
                .push_bind(version)
                .push_bind(event.correlation_id)
                .push_bind(event.causation_id)
                .push_bind(event.occurred_at);
        });
        qb.push(" RETURNING position");

        let positions: Vec<i64> = qb
            .build_query_scalar()
            .fetch_all(&mut *tx)
            .await
            .map_err(|err| {
                if let sqlx::Error::Database(db) = &err
                    && db.is_unique_violation()
                {
                    return DomainError::ConcurrencyConflict {
                        stream_id,
                        expected,
                        actual,
                    };
                }
                db_error(err)
            })?;

        let first_position = positions.first().copied().ok_or_else(|| {
            DomainError::Infrastructure("insert returned no positions".to_owned())
        })?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(EVENTS_NOTIFY_CHANNEL)
            .bind(first_position.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        debug!(
            next_version = version,
            first_position, "appended events to stream"
        );
        Ok(version)
    }

    async fn read_all(
        &self,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RecordedEvent>, DomainError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE position > $1 ORDER BY position ASC LIMIT $2"
        ))
        .bind(after.unwrap_or(0))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        decode_rows(&rows)
    }

    /// Listens on [`EVENTS_NOTIFY_CHANNEL`] first, then pages through history
    /// after `after`. Every notification triggers another page read from the
    /// last delivered position, so events committed during catch-up are not
    /// lost.
    fn subscribe_to_all(&self, after: Option<i64>, filter: EventFilter) -> EventStream<'_> {
        let log = self.clone();

        Box::pin(async_stream::stream! {
            let mut listener = match PgListener::connect_with(&log.pool).await {
                Ok(listener) => listener,
                Err(err) => {
                    yield Err(db_error(err));
                    return;
                }
            };
            if let Err(err) = listener.listen(EVENTS_NOTIFY_CHANNEL).await {
                yield Err(db_error(err));
                return;
            }

            let mut last_position = after;
            let mut caught_up = false;
            loop {
                if caught_up && let Err(err) = listener.recv().await {
                    yield Err(db_error(err));
                    return;
                }

                loop {
                    let page = match log.read_all(last_position, CATCH_UP_PAGE_SIZE).await {
                        Ok(page) => page,
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    };
                    let full_page = page.len() == CATCH_UP_PAGE_SIZE;
                    for recorded in page {
                        last_position = Some(recorded.position);
                        if filter.matches(recorded.event_type()) {
                            yield Ok(recorded);
                        }
                    }
                    if !full_page {
                        break;
                    }
                }
                caught_up = true;
            }
        })
    }
}
