//! The full-refresh worker.
//!
//! One run replaces a configured slice of the local table with the remote
//! truth and returns; the supervisor schedules the next run. Unlike the
//! incremental worker there is no watermark, so deletes and re-inserts are
//! the whole game.

use futures_util::TryStreamExt;
use sqlx::{Connection, MySqlConnection};
use tracing::info;

use quay_core::db::column_text;
use quay_core::heartbeat::Heartbeat;

use crate::config::{RefreshConfig, RefreshMode};
use crate::error::Result;
use crate::sql;

#[derive(Debug)]
pub struct RefreshSync {
    config: RefreshConfig,
}

impl RefreshSync {
    pub fn new(config: RefreshConfig) -> Self {
        Self { config }
    }

    /// One refresh run.
    pub async fn run(&self, heartbeat: &Heartbeat) -> Result<()> {
        let mut local = MySqlConnection::connect_with(&self.config.local.to_options()).await?;

        match self.config.mode {
            RefreshMode::Single => self.refresh_single(&mut local).await?,
            RefreshMode::Batched => {
                let mut remote =
                    MySqlConnection::connect_with(&self.config.remote.to_options()).await?;
                self.refresh_batched(&mut local, &mut remote, heartbeat).await?;
            }
        }
        Ok(())
    }

    /// Small slice: one delete plus one insert-select, one transaction.
    async fn refresh_single(&self, local: &mut MySqlConnection) -> Result<()> {
        let delete_sql = sql::delete_where(&self.config.local_table, &self.config.where_suffix);
        let insert_sql = sql::insert_select_where(
            &self.config.local_table,
            &self.config.local_cols,
            &self.config.remote_cols.join(","),
            &self.config.fed_table,
            &self.config.where_suffix,
        );

        let mut tx = local.begin().await?;
        let deleted = sqlx::query(&delete_sql).execute(&mut *tx).await?.rows_affected();
        let inserted = sqlx::query(&insert_sql).execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;

        info!(
            "refresh {} from {}: -{deleted} +{inserted} rows",
            self.config.local_table, self.config.fed_table
        );
        Ok(())
    }

    /// Large slice: scan the matching remote keys, then per key batch
    /// delete the local rows and re-insert them through the federated
    /// table, committing per batch.
    async fn refresh_batched(
        &self,
        local: &mut MySqlConnection,
        remote: &mut MySqlConnection,
        heartbeat: &Heartbeat,
    ) -> Result<()> {
        let select_sql = sql::select_keys(
            &self.config.remote_key,
            &self.config.remote_table,
            &self.config.where_suffix,
        );

        let mut rows = sqlx::query(&select_sql).fetch(remote);
        let mut keys: Vec<String> = Vec::with_capacity(self.config.maxcount);
        let mut total: u64 = 0;

        while let Some(row) = rows.try_next().await? {
            keys.push(column_text(&row, 0)?);
            if keys.len() >= self.config.maxcount {
                self.flush_batch(local, &keys).await?;
                total += keys.len() as u64;
                keys.clear();
                heartbeat.beat().await;
            }
        }
        if !keys.is_empty() {
            self.flush_batch(local, &keys).await?;
            total += keys.len() as u64;
        }

        info!(
            "refresh {} from {}: {total} rows",
            self.config.local_table, self.config.fed_table
        );
        Ok(())
    }

    async fn flush_batch(&self, local: &mut MySqlConnection, keys: &[String]) -> Result<()> {
        let delete_sql =
            sql::delete_keys_in(&self.config.local_table, &self.config.local_key, keys.len());
        let insert_sql = sql::insert_select_in(
            &self.config.local_table,
            &self.config.local_cols,
            &self.config.remote_cols.join(","),
            &self.config.fed_table,
            &self.config.remote_key,
            keys.len(),
        );

        let mut tx = local.begin().await?;
        let mut delete = sqlx::query(&delete_sql);
        for key in keys {
            delete = delete.bind(key);
        }
        delete.execute(&mut *tx).await?;

        let mut insert = sqlx::query(&insert_sql);
        for key in keys {
            insert = insert.bind(key);
        }
        insert.execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}
