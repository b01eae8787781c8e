//! Archive of raw vendor responses.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::{NewResponseRow, ResponseRow};
use super::pool::{DbPool, DieselError};
use super::util::{corrupt_column, format_datetime};
use super::{last_insert_rowid, parse_datetime};
use crate::models::{NewResponse, ResponseRecord, ResponseType};
use crate::schema::responses;
use crate::with_conn;

impl TryFrom<ResponseRow> for ResponseRecord {
    type Error = DieselError;

    fn try_from(row: ResponseRow) -> Result<Self, Self::Error> {
        let response_type = ResponseType::from_str(&row.response_type).ok_or_else(|| {
            corrupt_column("responses.response_type", &row.response_type, "unknown type")
        })?;
        let query = serde_json::from_str(&row.query)
            .map_err(|e| corrupt_column("responses.query", &row.query, e))?;
        Ok(ResponseRecord {
            id: row.id,
            response_type,
            status_code: row.status_code as u16,
            payload: row.payload,
            url: row.url,
            query,
            elapsed_ms: row.elapsed_ms,
            task_id: row.task_id,
            listing_id: row.listing_id,
            created_at: parse_datetime(&row.created_at),
        })
    }
}

#[derive(Clone)]
pub struct ResponseRepository {
    pool: DbPool,
}

impl ResponseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Archive a response and return its id.
    pub async fn insert(&self, response: &NewResponse) -> Result<i64, DieselError> {
        let created_at = format_datetime(&Utc::now());
        let query = response.query.to_string();
        let row = NewResponseRow {
            response_type: response.response_type.as_str(),
            status_code: i32::from(response.status_code),
            payload: &response.payload,
            url: &response.url,
            query: &query,
            elapsed_ms: response.elapsed_ms,
            task_id: response.task_id.as_deref(),
            listing_id: response.listing_id,
            created_at: &created_at,
        };

        with_conn!(self.pool, conn, {
            diesel::insert_into(responses::table)
                .values(&row)
                .execute(&mut conn)
                .await?;
            last_insert_rowid(&mut conn).await
        })
    }

    pub async fn get(&self, id: i64) -> Result<Option<ResponseRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            responses::table
                .find(id)
                .first::<ResponseRow>(&mut conn)
                .await
                .optional()
                .and_then(|opt| opt.map(ResponseRecord::try_from).transpose())
        })
    }

    /// Responses recorded while running a task, oldest first.
    pub async fn for_task(&self, task_id: &str) -> Result<Vec<ResponseRecord>, DieselError> {
        with_conn!(self.pool, conn, {
            responses::table
                .filter(responses::task_id.eq(task_id))
                .order(responses::id.asc())
                .load::<ResponseRow>(&mut conn)
                .await
                .and_then(|rows| rows.into_iter().map(ResponseRecord::try_from).collect())
        })
    }

    pub async fn count(&self) -> Result<i64, DieselError> {
        with_conn!(self.pool, conn, {
            responses::table.count().get_result::<i64>(&mut conn).await
        })
    }
}
