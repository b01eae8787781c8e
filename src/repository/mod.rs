//! Repository layer for database persistence.
//!
//! All database access uses Diesel ORM over SQLite. Timestamps are stored
//! as fixed-width RFC 3339 text so string ordering is time ordering.

pub mod aoi;
pub mod grid;
pub mod listing;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod response;
pub mod task;
pub mod util;

pub use aoi::AoiRepository;
pub use grid::{GridRepository, TileInsert};
pub use listing::ListingRepository;
pub use pool::{DbError, DbPool, DieselError, SqliteConn};
pub use response::ResponseRepository;
pub use task::{TaskRepository, TaskTransition};

use chrono::{DateTime, Utc};
use diesel::QueryableByName;
use diesel_async::RunQueryDsl;

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

#[derive(QueryableByName)]
struct LastInsertRowId {
    #[diesel(sql_type = diesel::sql_types::BigInt, column_name = "last_insert_rowid()")]
    id: i64,
}

/// Rowid of the last insert on this connection.
pub(crate) async fn last_insert_rowid(conn: &mut SqliteConn) -> Result<i64, DbError> {
    diesel::sql_query("SELECT last_insert_rowid()")
        .get_result::<LastInsertRowId>(conn)
        .await
        .map(|r| r.id)
}

/// Every repository over one pool.
#[derive(Clone)]
pub struct Repositories {
    pub grid: GridRepository,
    pub listings: ListingRepository,
    pub responses: ResponseRepository,
    pub tasks: TaskRepository,
    pub aois: AoiRepository,
}

impl Repositories {
    pub fn new(pool: DbPool) -> Self {
        Self {
            grid: GridRepository::new(pool.clone()),
            listings: ListingRepository::new(pool.clone()),
            responses: ResponseRepository::new(pool.clone()),
            tasks: TaskRepository::new(pool.clone()),
            aois: AoiRepository::new(pool),
        }
    }

    /// Open repositories for a database URL, applying pending migrations first.
    pub async fn open(database_url: &str) -> Result<Self, DbError> {
        migrations::run_migrations(database_url).await?;
        Ok(Self::new(DbPool::from_url(database_url)?))
    }
}
