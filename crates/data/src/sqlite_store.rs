use std::collections::BTreeSet;

use anchor_risk_core::{
    AddRecord, AnchorPosition, DecisionRecord, EngineError, EngineResult, MaintenanceCounter,
    Position, PositionStore, ProtectOrder, ProtectStatus, Side, TriggerState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};

use crate::codec::{
    date, decimal, flag, optional_timestamp, parsed, store_err, timestamp, DATE_FORMAT,
};

/// [`PositionStore`] backed by `SQLite`.
///
/// Multi-row mutations run inside a single transaction; versioned rows are
/// updated with `WHERE version = ?` so concurrent writers surface as
/// [`EngineError::Contention`].
#[derive(Clone)]
pub struct SqlitePositionStore {
    pool: SqlitePool,
}

impl SqlitePositionStore {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Journal entries for one instrument, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Store`] on query or decode failure.
    pub async fn recent_decisions(&self, instrument: &str, limit: i64) -> EngineResult<Vec<DecisionRecord>> {
        let rows = sqlx::query(
            r"
            SELECT component, instrument, side, action, outcome, mode, reason, steps_json, created_at
            FROM decisions
            WHERE instrument = ?1
            ORDER BY id DESC
            LIMIT ?2
            ",
        )
        .bind(instrument)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(decision_from_row).collect()
    }

    async fn load_position(
        tx: &mut Transaction<'_, Sqlite>,
        instrument: &str,
        side: Side,
    ) -> EngineResult<Position> {
        let row = sqlx::query("SELECT * FROM positions WHERE instrument = ?1 AND side = ?2")
            .bind(instrument)
            .bind(side.as_str())
            .fetch_optional(&mut **tx)
            .await
            .map_err(store_err)?;

        match row {
            Some(row) => position_from_row(&row),
            None => Err(EngineError::PositionNotFound {
                instrument: instrument.to_string(),
                side,
            }),
        }
    }

    async fn write_size(
        tx: &mut Transaction<'_, Sqlite>,
        position: &Position,
    ) -> EngineResult<()> {
        sqlx::query(
            r"
            UPDATE positions SET size = ?1, weighted_avg_price = ?2
            WHERE instrument = ?3 AND side = ?4
            ",
        )
        .bind(position.size.to_string())
        .bind(position.weighted_avg_price.to_string())
        .bind(&position.instrument)
        .bind(position.side.as_str())
        .execute(&mut **tx)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl PositionStore for SqlitePositionStore {
    async fn get_open_positions(&self) -> EngineResult<Vec<Position>> {
        let rows = sqlx::query("SELECT * FROM positions ORDER BY opened_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.iter().map(position_from_row).collect()
    }

    async fn get_position(&self, instrument: &str, side: Side) -> EngineResult<Option<Position>> {
        let row = sqlx::query("SELECT * FROM positions WHERE instrument = ?1 AND side = ?2")
            .bind(instrument)
            .bind(side.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        row.as_ref().map(position_from_row).transpose()
    }

    async fn open_position(&self, position: &Position) -> EngineResult<()> {
        let result = sqlx::query(
            r"
            INSERT INTO positions
                (instrument, side, opened_size, size, weighted_avg_price, leverage,
                 margin_mode, granularity_tier, is_anchor, opened_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (instrument, side) DO NOTHING
            ",
        )
        .bind(&position.instrument)
        .bind(position.side.as_str())
        .bind(position.opened_size.to_string())
        .bind(position.size.to_string())
        .bind(position.weighted_avg_price.to_string())
        .bind(position.leverage.to_string())
        .bind(position.margin_mode.to_string())
        .bind(position.granularity_tier.to_string())
        .bind(i64::from(position.is_anchor))
        .bind(position.opened_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::InvalidInput(format!(
                "position already open for {} {}",
                position.instrument, position.side
            )));
        }
        Ok(())
    }

    async fn get_add_records(&self, instrument: &str, side: Side) -> EngineResult<Vec<AddRecord>> {
        let rows = sqlx::query(
            r"
            SELECT instrument, side, add_size, add_price, stage_index, trigger_loss_rate, created_at
            FROM add_records
            WHERE instrument = ?1 AND side = ?2
            ORDER BY stage_index ASC
            ",
        )
        .bind(instrument)
        .bind(side.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                let stage_index: i64 = row.try_get("stage_index").map_err(store_err)?;
                Ok(AddRecord {
                    instrument: row.try_get("instrument").map_err(store_err)?,
                    side: parsed(row, "side")?,
                    add_size: decimal(row, "add_size")?,
                    add_price: decimal(row, "add_price")?,
                    stage_index: u32::try_from(stage_index).map_err(store_err)?,
                    trigger_loss_rate: decimal(row, "trigger_loss_rate")?,
                    created_at: timestamp(row, "created_at")?,
                })
            })
            .collect()
    }

    async fn append_add_record(&self, record: &AddRecord) -> EngineResult<Position> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let mut position = Self::load_position(&mut tx, &record.instrument, record.side).await?;
        position.apply_add(record.add_size, record.add_price)?;

        let inserted = sqlx::query(
            r"
            INSERT INTO add_records
                (instrument, side, add_size, add_price, stage_index, trigger_loss_rate, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (instrument, side, stage_index) DO NOTHING
            ",
        )
        .bind(&record.instrument)
        .bind(record.side.as_str())
        .bind(record.add_size.to_string())
        .bind(record.add_price.to_string())
        .bind(i64::from(record.stage_index))
        .bind(record.trigger_loss_rate.to_string())
        .bind(record.created_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        // Another writer already consumed this stage.
        if inserted.rows_affected() == 0 {
            return Err(EngineError::Contention(format!(
                "add stage {} for {} {}",
                record.stage_index, record.instrument, record.side
            )));
        }

        Self::write_size(&mut tx, &position).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(position)
    }

    async fn grow_position(
        &self,
        instrument: &str,
        side: Side,
        size: Decimal,
        price: Decimal,
    ) -> EngineResult<Position> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let mut position = Self::load_position(&mut tx, instrument, side).await?;
        position.apply_add(size, price)?;
        Self::write_size(&mut tx, &position).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(position)
    }

    async fn set_position_leverage(&self, instrument: &str, side: Side, leverage: Decimal) -> EngineResult<Position> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let mut position = Self::load_position(&mut tx, instrument, side).await?;
        sqlx::query("UPDATE positions SET leverage = ?1 WHERE instrument = ?2 AND side = ?3")
            .bind(leverage.to_string())
            .bind(instrument)
            .bind(side.as_str())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        tx.commit().await.map_err(store_err)?;
        position.leverage = leverage;
        Ok(position)
    }

    async fn reduce_position(
        &self,
        instrument: &str,
        side: Side,
        amount: Decimal,
    ) -> EngineResult<Option<Position>> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let mut position = Self::load_position(&mut tx, instrument, side).await?;
        let remaining = position.apply_reduce(amount)?;

        if remaining.is_zero() {
            for table in ["positions", "add_records", "trigger_states"] {
                let sql = format!("DELETE FROM {table} WHERE instrument = ?1 AND side = ?2");
                sqlx::query(&sql)
                    .bind(instrument)
                    .bind(side.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(store_err)?;
            }
            tx.commit().await.map_err(store_err)?;
            return Ok(None);
        }

        Self::write_size(&mut tx, &position).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(Some(position))
    }

    async fn insert_anchor(&self, anchor: &AnchorPosition) -> EngineResult<AnchorPosition> {
        let result = sqlx::query(
            r"
            INSERT INTO anchors
                (instrument, side, anchor_price, anchor_size, current_price, profit_rate,
                 unrealized_pnl, status, opened_at, closed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', ?8, NULL)
            ",
        )
        .bind(&anchor.instrument)
        .bind(anchor.side.as_str())
        .bind(anchor.anchor_price.to_string())
        .bind(anchor.anchor_size.to_string())
        .bind(anchor.current_price.to_string())
        .bind(anchor.profit_rate.to_string())
        .bind(anchor.unrealized_pnl.to_string())
        .bind(anchor.opened_at.timestamp_millis())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => {
                let mut stored = anchor.clone();
                stored.id = done.last_insert_rowid();
                Ok(stored)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(EngineError::DuplicateAnchor {
                instrument: anchor.instrument.clone(),
                side: anchor.side,
            }),
            Err(e) => Err(store_err(e)),
        }
    }

    async fn get_active_anchor(&self, instrument: &str, side: Side) -> EngineResult<Option<AnchorPosition>> {
        let row = sqlx::query(
            "SELECT * FROM anchors WHERE instrument = ?1 AND side = ?2 AND status = 'active'",
        )
        .bind(instrument)
        .bind(side.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.as_ref().map(anchor_from_row).transpose()
    }

    async fn list_active_anchors(&self) -> EngineResult<Vec<AnchorPosition>> {
        let rows = sqlx::query("SELECT * FROM anchors WHERE status = 'active' ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.iter().map(anchor_from_row).collect()
    }

    async fn update_anchor_marks(&self, anchor: &AnchorPosition) -> EngineResult<()> {
        sqlx::query(
            r"
            UPDATE anchors SET current_price = ?1, profit_rate = ?2, unrealized_pnl = ?3
            WHERE id = ?4 AND status = 'active'
            ",
        )
        .bind(anchor.current_price.to_string())
        .bind(anchor.profit_rate.to_string())
        .bind(anchor.unrealized_pnl.to_string())
        .bind(anchor.id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn close_anchor(&self, anchor_id: i64) -> EngineResult<()> {
        sqlx::query("UPDATE anchors SET status = 'closed', closed_at = ?1 WHERE id = ?2")
            .bind(Utc::now().timestamp_millis())
            .bind(anchor_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn release_anchor(&self, anchor_id: i64) -> EngineResult<()> {
        sqlx::query("DELETE FROM anchors WHERE id = ?1 AND status = 'active'")
            .bind(anchor_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn last_anchor_open_time(&self, instrument: &str) -> EngineResult<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT MAX(opened_at) AS opened_at FROM anchors WHERE instrument = ?1")
            .bind(instrument)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        optional_timestamp(&row, "opened_at")
    }

    async fn insert_protect_orders(&self, orders: &[ProtectOrder]) -> EngineResult<Vec<ProtectOrder>> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let anchor_ids: BTreeSet<i64> = orders.iter().map(|o| o.anchor_id).collect();
        for anchor_id in anchor_ids {
            let pending: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM protect_orders WHERE anchor_id = ?1 AND status = 'pending'",
            )
            .bind(anchor_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(store_err)?;
            if pending > 0 {
                return Err(EngineError::DuplicateProtectOrders { anchor_id });
            }
        }

        let mut stored = Vec::with_capacity(orders.len());
        for order in orders {
            let done = sqlx::query(
                r"
                INSERT INTO protect_orders
                    (anchor_id, instrument, kind, offset_percent, leverage, close_percent,
                     trigger_price, anchor_size, status, created_at, executed_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL)
                ",
            )
            .bind(order.anchor_id)
            .bind(&order.instrument)
            .bind(order.kind.to_string())
            .bind(order.offset_percent.to_string())
            .bind(order.leverage.to_string())
            .bind(order.close_percent.to_string())
            .bind(order.trigger_price.to_string())
            .bind(order.anchor_size.to_string())
            .bind(order.status.to_string())
            .bind(order.created_at.timestamp_millis())
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

            let mut saved = order.clone();
            saved.id = done.last_insert_rowid();
            stored.push(saved);
        }

        tx.commit().await.map_err(store_err)?;
        Ok(stored)
    }

    async fn get_protect_orders(&self, anchor_id: i64) -> EngineResult<Vec<ProtectOrder>> {
        let rows = sqlx::query("SELECT * FROM protect_orders WHERE anchor_id = ?1 ORDER BY id ASC")
            .bind(anchor_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.iter().map(protect_order_from_row).collect()
    }

    async fn list_open_protect_orders(&self) -> EngineResult<Vec<ProtectOrder>> {
        let rows = sqlx::query(
            "SELECT * FROM protect_orders WHERE status IN ('pending', 'triggered') ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.iter().map(protect_order_from_row).collect()
    }

    async fn transition_protect_order(
        &self,
        order_id: i64,
        from: ProtectStatus,
        to: ProtectStatus,
    ) -> EngineResult<()> {
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                id: order_id,
                from,
                to,
            });
        }

        let executed_at = (to == ProtectStatus::Executed).then(|| Utc::now().timestamp_millis());
        let result = sqlx::query(
            r"
            UPDATE protect_orders SET status = ?1, executed_at = COALESCE(?2, executed_at)
            WHERE id = ?3 AND status = ?4
            ",
        )
        .bind(to.to_string())
        .bind(executed_at)
        .bind(order_id)
        .bind(from.to_string())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::Contention(format!("protect order {order_id}")));
        }
        Ok(())
    }

    async fn get_trigger_state(&self, instrument: &str, side: Side) -> EngineResult<TriggerState> {
        let row = sqlx::query(
            "SELECT triggered_levels, version FROM trigger_states WHERE instrument = ?1 AND side = ?2",
        )
        .bind(instrument)
        .bind(side.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let Some(row) = row else {
            return Ok(TriggerState::empty(instrument, side));
        };

        let levels_json: String = row.try_get("triggered_levels").map_err(store_err)?;
        let triggered_levels: BTreeSet<Decimal> = serde_json::from_str(&levels_json).map_err(store_err)?;
        Ok(TriggerState {
            instrument: instrument.to_string(),
            side,
            triggered_levels,
            version: row.try_get("version").map_err(store_err)?,
        })
    }

    async fn set_trigger_state(&self, state: &TriggerState) -> EngineResult<()> {
        let levels_json = serde_json::to_string(&state.triggered_levels).map_err(store_err)?;

        let result = if state.version == 0 {
            sqlx::query(
                r"
                INSERT INTO trigger_states (instrument, side, triggered_levels, version)
                VALUES (?1, ?2, ?3, 1)
                ON CONFLICT (instrument, side) DO NOTHING
                ",
            )
            .bind(&state.instrument)
            .bind(state.side.as_str())
            .bind(levels_json)
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                r"
                UPDATE trigger_states SET triggered_levels = ?1, version = version + 1
                WHERE instrument = ?2 AND side = ?3 AND version = ?4
                ",
            )
            .bind(levels_json)
            .bind(&state.instrument)
            .bind(state.side.as_str())
            .bind(state.version)
            .execute(&self.pool)
            .await
        }
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::Contention(format!(
                "trigger state {} {}",
                state.instrument, state.side
            )));
        }
        Ok(())
    }

    async fn get_maintenance_counter(
        &self,
        instrument: &str,
        side: Side,
    ) -> EngineResult<Option<MaintenanceCounter>> {
        let row = sqlx::query(
            r"
            SELECT date, count, super_count, last_maintenance_time, version
            FROM maintenance_counters WHERE instrument = ?1 AND side = ?2
            ",
        )
        .bind(instrument)
        .bind(side.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let count: i64 = row.try_get("count").map_err(store_err)?;
        let super_count: i64 = row.try_get("super_count").map_err(store_err)?;
        Ok(Some(MaintenanceCounter {
            instrument: instrument.to_string(),
            side,
            date: date(&row, "date")?,
            count: u32::try_from(count).map_err(store_err)?,
            super_count: u32::try_from(super_count).map_err(store_err)?,
            last_maintenance_time: optional_timestamp(&row, "last_maintenance_time")?,
            version: row.try_get("version").map_err(store_err)?,
        }))
    }

    async fn set_maintenance_counter(&self, counter: &MaintenanceCounter) -> EngineResult<()> {
        let date = counter.date.format(DATE_FORMAT).to_string();
        let last = counter.last_maintenance_time.map(|t| t.timestamp_millis());

        let result = if counter.version == 0 {
            sqlx::query(
                r"
                INSERT INTO maintenance_counters
                    (instrument, side, date, count, super_count, last_maintenance_time, version)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)
                ON CONFLICT (instrument, side) DO NOTHING
                ",
            )
            .bind(&counter.instrument)
            .bind(counter.side.as_str())
            .bind(date)
            .bind(i64::from(counter.count))
            .bind(i64::from(counter.super_count))
            .bind(last)
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                r"
                UPDATE maintenance_counters
                SET date = ?1, count = ?2, super_count = ?3, last_maintenance_time = ?4,
                    version = version + 1
                WHERE instrument = ?5 AND side = ?6 AND version = ?7
                ",
            )
            .bind(date)
            .bind(i64::from(counter.count))
            .bind(i64::from(counter.super_count))
            .bind(last)
            .bind(&counter.instrument)
            .bind(counter.side.as_str())
            .bind(counter.version)
            .execute(&self.pool)
            .await
        }
        .map_err(store_err)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::Contention(format!(
                "maintenance counter {} {}",
                counter.instrument, counter.side
            )));
        }
        Ok(())
    }

    async fn record_decision(&self, record: &DecisionRecord) -> EngineResult<()> {
        let steps_json = serde_json::to_string(&record.steps).map_err(store_err)?;
        sqlx::query(
            r"
            INSERT INTO decisions
                (component, instrument, side, action, outcome, mode, reason, steps_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ",
        )
        .bind(&record.component)
        .bind(&record.instrument)
        .bind(record.side.map(Side::as_str))
        .bind(&record.action)
        .bind(record.outcome.to_string())
        .bind(record.mode.to_string())
        .bind(&record.reason)
        .bind(steps_json)
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }
}

fn position_from_row(row: &SqliteRow) -> EngineResult<Position> {
    Ok(Position {
        instrument: row.try_get("instrument").map_err(store_err)?,
        side: parsed(row, "side")?,
        opened_size: decimal(row, "opened_size")?,
        size: decimal(row, "size")?,
        weighted_avg_price: decimal(row, "weighted_avg_price")?,
        leverage: decimal(row, "leverage")?,
        margin_mode: parsed(row, "margin_mode")?,
        granularity_tier: parsed(row, "granularity_tier")?,
        is_anchor: flag(row, "is_anchor")?,
        opened_at: timestamp(row, "opened_at")?,
    })
}

fn anchor_from_row(row: &SqliteRow) -> EngineResult<AnchorPosition> {
    Ok(AnchorPosition {
        id: row.try_get("id").map_err(store_err)?,
        instrument: row.try_get("instrument").map_err(store_err)?,
        side: parsed(row, "side")?,
        anchor_price: decimal(row, "anchor_price")?,
        anchor_size: decimal(row, "anchor_size")?,
        current_price: decimal(row, "current_price")?,
        profit_rate: decimal(row, "profit_rate")?,
        unrealized_pnl: decimal(row, "unrealized_pnl")?,
        status: parsed(row, "status")?,
        opened_at: timestamp(row, "opened_at")?,
        closed_at: optional_timestamp(row, "closed_at")?,
    })
}

fn protect_order_from_row(row: &SqliteRow) -> EngineResult<ProtectOrder> {
    Ok(ProtectOrder {
        id: row.try_get("id").map_err(store_err)?,
        anchor_id: row.try_get("anchor_id").map_err(store_err)?,
        instrument: row.try_get("instrument").map_err(store_err)?,
        kind: parsed(row, "kind")?,
        offset_percent: decimal(row, "offset_percent")?,
        leverage: decimal(row, "leverage")?,
        close_percent: decimal(row, "close_percent")?,
        trigger_price: decimal(row, "trigger_price")?,
        anchor_size: decimal(row, "anchor_size")?,
        status: parsed(row, "status")?,
        created_at: timestamp(row, "created_at")?,
        executed_at: optional_timestamp(row, "executed_at")?,
    })
}

fn decision_from_row(row: &SqliteRow) -> EngineResult<DecisionRecord> {
    let steps_json: String = row.try_get("steps_json").map_err(store_err)?;
    let side: Option<String> = row.try_get("side").map_err(store_err)?;
    let outcome: String = row.try_get("outcome").map_err(store_err)?;
    let mode: String = row.try_get("mode").map_err(store_err)?;
    Ok(DecisionRecord {
        component: row.try_get("component").map_err(store_err)?,
        instrument: row.try_get("instrument").map_err(store_err)?,
        side: side.as_deref().map(str::parse::<Side>).transpose()?,
        action: row.try_get("action").map_err(store_err)?,
        outcome: serde_json::from_value(serde_json::Value::String(outcome)).map_err(store_err)?,
        mode: serde_json::from_value(serde_json::Value::String(mode)).map_err(store_err)?,
        reason: row.try_get("reason").map_err(store_err)?,
        steps: serde_json::from_str(&steps_json).map_err(store_err)?,
        created_at: timestamp(row, "created_at")?,
    })
}
