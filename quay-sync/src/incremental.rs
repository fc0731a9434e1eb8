//! The incremental sync worker.

use std::time::Duration;

use futures_util::TryStreamExt;
use sqlx::{Connection, MySqlConnection};
use tracing::{info, warn};

use quay_core::db::{column_text, is_duplicate_key, row_text};
use quay_core::heartbeat::Heartbeat;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::sql;

#[derive(Debug)]
pub struct IncrementalSync {
    config: SyncConfig,
}

impl IncrementalSync {
    pub fn new(config: SyncConfig) -> Self {
        Self { config }
    }

    /// Connect both sides and cycle forever. Any error aborts the run; the
    /// supervisor restarts the worker. Duplicate-key violations are
    /// explicitly fatal: under a correct watermark they cannot happen, so
    /// one means the source is lying.
    pub async fn run(&mut self, heartbeat: &Heartbeat) -> Result<()> {
        let mut local = MySqlConnection::connect_with(&self.config.local.to_options()).await?;
        let mut remote = MySqlConnection::connect_with(&self.config.remote.to_options()).await?;
        info!(
            "sync {}:{} -> {}:{}",
            self.config.remote, self.config.remote_table, self.config.local, self.config.local_table
        );

        self.fill_column_lists(&mut local).await?;

        loop {
            let moved = match self.cycle(&mut local, &mut remote, heartbeat).await {
                Ok(moved) => moved,
                Err(SyncError::Sqlx(e)) if is_duplicate_key(&e) => {
                    warn!("duplicate key from a watermarked source: {e}");
                    return Err(SyncError::Sqlx(e));
                }
                Err(e) => return Err(e),
            };
            heartbeat.beat().await;

            if !moved {
                tokio::time::sleep(Duration::from_secs(self.config.timetvl)).await;
            }
        }
    }

    /// Fill empty column lists from the local table's dictionary.
    async fn fill_column_lists(&mut self, local: &mut MySqlConnection) -> Result<()> {
        if !self.config.remote_cols.is_empty() && !self.config.local_cols.is_empty() {
            return Ok(());
        }

        let all_cols: Vec<String> = sqlx::query_scalar(
            "select column_name from information_schema.columns \
             where table_schema=database() and table_name=? order by ordinal_position",
        )
        .bind(&self.config.local_table)
        .fetch_all(&mut *local)
        .await?;

        if all_cols.is_empty() {
            return Err(SyncError::Config(format!(
                "table {} does not exist",
                self.config.local_table
            )));
        }
        if self.config.remote_cols.is_empty() {
            self.config.remote_cols = all_cols.clone();
        }
        if self.config.local_cols.is_empty() {
            self.config.local_cols = all_cols;
        }
        if self.config.remote_cols.len() != self.config.local_cols.len() {
            return Err(SyncError::Config(format!(
                "remotecols has {} names but localcols has {}",
                self.config.remote_cols.len(),
                self.config.local_cols.len()
            )));
        }
        Ok(())
    }

    /// One watermark cycle. Returns whether any row moved.
    async fn cycle(
        &self,
        local: &mut MySqlConnection,
        remote: &mut MySqlConnection,
        heartbeat: &Heartbeat,
    ) -> Result<bool> {
        let max_key = self.find_max_key(local).await?;

        let rows = match &self.config.fed_table {
            None => self.row_copy_cycle(local, remote, max_key, heartbeat).await?,
            Some(fed) => {
                self.federated_cycle(local, remote, max_key, fed, heartbeat)
                    .await?
            }
        };

        if rows > 0 {
            info!(
                "sync {} to {} ({rows} rows)",
                self.config.remote_table, self.config.local_table
            );
        }
        Ok(rows > 0)
    }

    /// The watermark: `max(local_key)`, 0 on an empty table.
    async fn find_max_key(&self, local: &mut MySqlConnection) -> Result<i64> {
        let max: Option<i64> =
            sqlx::query_scalar(&sql::max_key(&self.config.local_key, &self.config.local_table))
                .fetch_one(local)
                .await?;
        Ok(max.unwrap_or(0))
    }

    /// Row-copy variant: values stream through this process and are
    /// re-inserted row by row inside a per-batch transaction.
    async fn row_copy_cycle(
        &self,
        local: &mut MySqlConnection,
        remote: &mut MySqlConnection,
        max_key: i64,
        heartbeat: &Heartbeat,
    ) -> Result<u64> {
        let select_sql = sql::select_increment(
            &self.config.remote_cols.join(","),
            &self.config.remote_table,
            &self.config.remote_key,
            &self.config.where_suffix,
        );
        let insert_sql = sql::insert_row(&self.config.local_table, &self.config.local_cols);

        let mut rows = sqlx::query(&select_sql).bind(max_key).fetch(remote);
        let mut batch: Vec<Vec<String>> = Vec::with_capacity(self.config.maxcount);
        let mut total: u64 = 0;

        while let Some(row) = rows.try_next().await? {
            batch.push(row_text(&row)?);
            if batch.len() >= self.config.maxcount {
                self.flush_rows(local, &insert_sql, &batch).await?;
                total += batch.len() as u64;
                batch.clear();
                heartbeat.beat().await;
            }
        }
        if !batch.is_empty() {
            self.flush_rows(local, &insert_sql, &batch).await?;
            total += batch.len() as u64;
        }
        Ok(total)
    }

    async fn flush_rows(
        &self,
        local: &mut MySqlConnection,
        insert_sql: &str,
        batch: &[Vec<String>],
    ) -> Result<()> {
        let mut tx = local.begin().await?;
        for values in batch {
            let mut insert = sqlx::query(insert_sql);
            for value in values {
                insert = insert.bind(value);
            }
            insert.execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Federated variant: only key values travel; each batch is one
    /// server-side `INSERT … SELECT … WHERE key IN (…)`.
    async fn federated_cycle(
        &self,
        local: &mut MySqlConnection,
        remote: &mut MySqlConnection,
        max_key: i64,
        fed_table: &str,
        heartbeat: &Heartbeat,
    ) -> Result<u64> {
        let select_sql = sql::select_increment(
            &self.config.remote_key,
            &self.config.remote_table,
            &self.config.remote_key,
            &self.config.where_suffix,
        );

        let mut rows = sqlx::query(&select_sql).bind(max_key).fetch(remote);
        let mut keys: Vec<String> = Vec::with_capacity(self.config.maxcount);
        let mut total: u64 = 0;

        while let Some(row) = rows.try_next().await? {
            keys.push(column_text(&row, 0)?);
            if keys.len() >= self.config.maxcount {
                self.flush_keys(local, fed_table, &keys).await?;
                total += keys.len() as u64;
                keys.clear();
                heartbeat.beat().await;
            }
        }
        if !keys.is_empty() {
            self.flush_keys(local, fed_table, &keys).await?;
            total += keys.len() as u64;
        }
        Ok(total)
    }

    async fn flush_keys(
        &self,
        local: &mut MySqlConnection,
        fed_table: &str,
        keys: &[String],
    ) -> Result<()> {
        let insert_sql = sql::insert_select_in(
            &self.config.local_table,
            &self.config.local_cols,
            &self.config.remote_cols.join(","),
            fed_table,
            &self.config.remote_key,
            keys.len(),
        );
        let mut insert = sqlx::query(&insert_sql);
        for key in keys {
            insert = insert.bind(key);
        }
        insert.execute(&mut *local).await?;
        Ok(())
    }
}
