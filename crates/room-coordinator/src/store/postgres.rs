//! Postgres-backed [`RoomStore`].
//!
//! # Security
//!
//! - All queries use parameterized statements (SQL injection safe)
//! - Driver errors are mapped to `RcError::Store` and only logged server-side

use super::{
    ParticipantRecord, Role, Room, RoomStore, StoreOperation, User, WaitingRoomEntry,
    WaitingStatus,
};
use crate::errors::RcError;
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretString};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::{Duration, Instant};
use tracing::instrument;

/// Connection acquire timeout for the pool.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Room store over a Postgres pool.
#[derive(Clone)]
pub struct PgRoomStore {
    pool: PgPool,
}

impl PgRoomStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns `RcError::Store` if the initial connection fails.
    pub async fn connect(
        database_url: &SecretString,
        max_connections: u32,
    ) -> Result<Self, RcError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(database_url.expose_secret())
            .await
            .map_err(|e| RcError::Store(format!("failed to connect: {e}")))?;
        Ok(Self { pool })
    }

    /// Readiness probe.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

/// Time a query, record the outcome and map driver errors.
fn finish<T>(
    op: StoreOperation,
    start: Instant,
    result: Result<T, sqlx::Error>,
) -> Result<T, RcError> {
    let duration = start.elapsed();
    match result {
        Ok(value) => {
            metrics::record_store_query(op.as_str(), "success", duration);
            Ok(value)
        }
        Err(e) => {
            metrics::record_store_query(op.as_str(), "error", duration);
            tracing::error!(target: "rc.store", operation = %op, error = %e, "Store query failed");
            Err(RcError::from(e))
        }
    }
}

#[async_trait::async_trait]
impl RoomStore for PgRoomStore {
    #[instrument(skip_all, name = "rc.store.get_user")]
    async fn get_user(&self, user_id: &str) -> Result<Option<User>, RcError> {
        let start = Instant::now();
        let row: Result<Option<UserRow>, _> =
            sqlx::query_as("SELECT id, name FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await;
        let row = finish(StoreOperation::GetUser, start, row)?;

        Ok(row.map(User::from))
    }

    #[instrument(skip_all, name = "rc.store.get_room")]
    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, RcError> {
        let start = Instant::now();
        let row: Result<Option<RoomRow>, _> = sqlx::query_as(
            r#"
            SELECT id, code, title, host_id, is_active, video_enabled,
                   audio_only, max_participants, waiting_room_enabled
            FROM rooms
            WHERE id = $1
            "#,
        )
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await;
        let row = finish(StoreOperation::GetRoom, start, row)?;

        Ok(row.map(Room::from))
    }

    #[instrument(skip_all, name = "rc.store.get_participant_record")]
    async fn get_participant_record(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<Option<ParticipantRecord>, RcError> {
        let start = Instant::now();
        // Prefer the active record, then the most recent one
        let row: Result<Option<ParticipantRow>, _> = sqlx::query_as(
            r#"
            SELECT user_id, room_id, role, joined_at, left_at
            FROM participants
            WHERE user_id = $1 AND room_id = $2
            ORDER BY (left_at IS NULL) DESC, joined_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await;
        let row = finish(StoreOperation::GetParticipantRecord, start, row)?;

        row.map(ParticipantRecord::try_from).transpose()
    }

    #[instrument(skip_all, name = "rc.store.set_participant_left_at")]
    async fn set_participant_left_at(
        &self,
        user_id: &str,
        room_id: &str,
        left_at: DateTime<Utc>,
    ) -> Result<(), RcError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE participants
            SET left_at = $3
            WHERE user_id = $1 AND room_id = $2 AND left_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(room_id)
        .bind(left_at)
        .execute(&self.pool)
        .await;
        let result = finish(StoreOperation::SetParticipantLeftAt, start, result)?;

        tracing::debug!(
            target: "rc.store",
            rows_affected = result.rows_affected(),
            "Participant marked as left"
        );
        Ok(())
    }

    #[instrument(skip_all, name = "rc.store.create_participant_record")]
    async fn create_participant_record(
        &self,
        user_id: &str,
        room_id: &str,
        role: Role,
    ) -> Result<ParticipantRecord, RcError> {
        let start = Instant::now();
        let row: Result<ParticipantRow, _> = sqlx::query_as(
            r#"
            INSERT INTO participants (user_id, room_id, role, joined_at)
            VALUES ($1, $2, $3, NOW())
            RETURNING user_id, room_id, role, joined_at, left_at
            "#,
        )
        .bind(user_id)
        .bind(room_id)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await;
        let row = finish(StoreOperation::CreateParticipantRecord, start, row)?;

        ParticipantRecord::try_from(row)
    }

    #[instrument(skip_all, name = "rc.store.get_waiting_room_entry")]
    async fn get_waiting_room_entry(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<Option<WaitingRoomEntry>, RcError> {
        let start = Instant::now();
        let row: Result<Option<WaitingRoomRow>, _> = sqlx::query_as(
            r#"
            SELECT user_id, room_id, status
            FROM waiting_room
            WHERE user_id = $1 AND room_id = $2
            "#,
        )
        .bind(user_id)
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await;
        let row = finish(StoreOperation::GetWaitingRoomEntry, start, row)?;

        row.map(WaitingRoomEntry::try_from).transpose()
    }

    #[instrument(skip_all, name = "rc.store.set_waiting_room_status")]
    async fn set_waiting_room_status(
        &self,
        user_id: &str,
        room_id: &str,
        status: WaitingStatus,
    ) -> Result<(), RcError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE waiting_room
            SET status = $3
            WHERE user_id = $1 AND room_id = $2
            "#,
        )
        .bind(user_id)
        .bind(room_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await;
        finish(StoreOperation::SetWaitingRoomStatus, start, result)?;
        Ok(())
    }
}

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    name: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RoomRow {
    id: String,
    code: String,
    title: String,
    host_id: String,
    is_active: bool,
    video_enabled: bool,
    audio_only: bool,
    max_participants: i32,
    waiting_room_enabled: bool,
}

impl From<RoomRow> for Room {
    fn from(row: RoomRow) -> Self {
        Self {
            id: row.id,
            code: row.code,
            title: row.title,
            host_id: row.host_id,
            is_active: row.is_active,
            video_enabled: row.video_enabled,
            audio_only: row.audio_only,
            max_participants: row.max_participants,
            waiting_room_enabled: row.waiting_room_enabled,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ParticipantRow {
    user_id: String,
    room_id: String,
    role: String,
    joined_at: DateTime<Utc>,
    left_at: Option<DateTime<Utc>>,
}

impl TryFrom<ParticipantRow> for ParticipantRecord {
    type Error = RcError;

    fn try_from(row: ParticipantRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: row.user_id,
            room_id: row.room_id,
            role: Role::try_from(row.role)?,
            joined_at: row.joined_at,
            left_at: row.left_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WaitingRoomRow {
    user_id: String,
    room_id: String,
    status: String,
}

impl TryFrom<WaitingRoomRow> for WaitingRoomEntry {
    type Error = RcError;

    fn try_from(row: WaitingRoomRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: row.user_id,
            room_id: row.room_id,
            status: WaitingStatus::try_from(row.status)?,
        })
    }
}
