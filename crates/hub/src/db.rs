use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;

use crate::policy::TimeOfDay;
use crate::store::{FieldValue, OutletField, OutletId, OutletStore, StoreError};

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// One row of the `outlets` table, as shown by the status API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutletRecord {
    pub outlet_id: OutletId,
    pub name: String,
    pub on: bool,
    pub stop_charging_percent: Option<u8>,
    pub timer_on: Option<TimeOfDay>,
    pub timer_off: Option<TimeOfDay>,
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/powerstrip/powerstrip.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Outlet rows
    // ----------------------------

    /// Create the outlet row if missing and set its display name. Status and
    /// policy columns of an existing row are left untouched.
    pub async fn upsert_outlet(&self, outlet_id: OutletId, name: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outlets (outlet_id, name)
            VALUES (?, ?)
            ON CONFLICT(outlet_id) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(i64::from(outlet_id))
        .bind(name)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert_outlet failed for outlet {outlet_id}"))?;
        Ok(())
    }

    /// Fill in policy settings that have never been set. Values already in
    /// the store (for example changed by the phone) win over the seed.
    pub async fn seed_policy(
        &self,
        outlet_id: OutletId,
        stop_charging_percent: Option<u8>,
        timer_on: Option<TimeOfDay>,
        timer_off: Option<TimeOfDay>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outlets SET
              stop_charging_percent = COALESCE(stop_charging_percent, ?),
              timer_on = COALESCE(timer_on, ?),
              timer_off = COALESCE(timer_off, ?)
            WHERE outlet_id = ?
            "#,
        )
        .bind(stop_charging_percent.map(i64::from))
        .bind(timer_on.map(|t| t.to_string()))
        .bind(timer_off.map(|t| t.to_string()))
        .bind(i64::from(outlet_id))
        .execute(&self.pool)
        .await
        .with_context(|| format!("seed_policy failed for outlet {outlet_id}"))?;
        Ok(())
    }

    pub async fn load_outlets(&self) -> Result<Vec<OutletRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT outlet_id, name, current_status,
                   stop_charging_percent, timer_on, timer_off
            FROM outlets
            ORDER BY outlet_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("load_outlets failed")?;

        rows.iter()
            .map(|r| outlet_record(r).context("load_outlets: bad row"))
            .collect()
    }
}

fn outlet_record(r: &SqliteRow) -> Result<OutletRecord, StoreError> {
    let raw_id: i64 = r.try_get("outlet_id")?;
    let outlet_id = OutletId::try_from(raw_id).map_err(|_| StoreError::Corrupt {
        outlet: 0,
        field: OutletField::CurrentStatus,
        detail: format!("outlet_id {raw_id} out of range"),
    })?;
    Ok(OutletRecord {
        outlet_id,
        name: r.try_get("name")?,
        on: decode_status(outlet_id, r.try_get("current_status")?)?,
        stop_charging_percent: r
            .try_get::<Option<i64>, _>("stop_charging_percent")?
            .map(|p| decode_percent(outlet_id, p))
            .transpose()?,
        timer_on: r
            .try_get::<Option<String>, _>("timer_on")?
            .map(|s| decode_time(outlet_id, OutletField::TimerOn, &s))
            .transpose()?,
        timer_off: r
            .try_get::<Option<String>, _>("timer_off")?
            .map(|s| decode_time(outlet_id, OutletField::TimerOff, &s))
            .transpose()?,
    })
}

// ---------------------------------------------------------------------------
// Column decoding
// ---------------------------------------------------------------------------

fn decode_status(outlet: OutletId, raw: i64) -> Result<bool, StoreError> {
    match raw {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StoreError::Corrupt {
            outlet,
            field: OutletField::CurrentStatus,
            detail: format!("status {other} is not 0/1"),
        }),
    }
}

fn decode_percent(outlet: OutletId, raw: i64) -> Result<u8, StoreError> {
    u8::try_from(raw)
        .ok()
        .filter(|p| *p <= 100)
        .ok_or_else(|| StoreError::Corrupt {
            outlet,
            field: OutletField::StopChargingPercent,
            detail: format!("percent {raw} out of range"),
        })
}

fn decode_time(outlet: OutletId, field: OutletField, raw: &str) -> Result<TimeOfDay, StoreError> {
    TimeOfDay::parse_stored(raw).map_err(|detail| StoreError::Corrupt {
        outlet,
        field,
        detail,
    })
}

// ---------------------------------------------------------------------------
// OutletStore
// ---------------------------------------------------------------------------

// Column names cannot be bound, so each field gets its own fixed statement.
fn select_sql(field: OutletField) -> &'static str {
    match field {
        OutletField::CurrentStatus => "SELECT current_status FROM outlets WHERE outlet_id = ?",
        OutletField::StopChargingPercent => {
            "SELECT stop_charging_percent FROM outlets WHERE outlet_id = ?"
        }
        OutletField::TimerOn => "SELECT timer_on FROM outlets WHERE outlet_id = ?",
        OutletField::TimerOff => "SELECT timer_off FROM outlets WHERE outlet_id = ?",
    }
}

fn update_sql(field: OutletField) -> &'static str {
    match field {
        OutletField::CurrentStatus => "UPDATE outlets SET current_status = ? WHERE outlet_id = ?",
        OutletField::StopChargingPercent => {
            "UPDATE outlets SET stop_charging_percent = ? WHERE outlet_id = ?"
        }
        OutletField::TimerOn => "UPDATE outlets SET timer_on = ? WHERE outlet_id = ?",
        OutletField::TimerOff => "UPDATE outlets SET timer_off = ? WHERE outlet_id = ?",
    }
}

#[async_trait]
impl OutletStore for Db {
    async fn read(
        &self,
        field: OutletField,
        outlet: OutletId,
    ) -> Result<Option<FieldValue>, StoreError> {
        let row = sqlx::query(select_sql(field))
            .bind(i64::from(outlet))
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::UnknownOutlet(outlet))?;

        match field {
            OutletField::CurrentStatus => {
                let raw: i64 = row.try_get(0)?;
                Ok(Some(FieldValue::Status(decode_status(outlet, raw)?)))
            }
            OutletField::StopChargingPercent => row
                .try_get::<Option<i64>, _>(0)?
                .map(|p| decode_percent(outlet, p).map(FieldValue::Percent))
                .transpose(),
            OutletField::TimerOn | OutletField::TimerOff => row
                .try_get::<Option<String>, _>(0)?
                .map(|s| decode_time(outlet, field, &s).map(FieldValue::Time))
                .transpose(),
        }
    }

    async fn write(
        &self,
        field: OutletField,
        outlet: OutletId,
        value: FieldValue,
    ) -> Result<(), StoreError> {
        if !field.accepts(value) {
            return Err(StoreError::TypeMismatch { field, value });
        }

        let query = sqlx::query(update_sql(field));
        let query = match value {
            FieldValue::Status(on) => query.bind(i64::from(on)),
            FieldValue::Percent(p) => query.bind(i64::from(p)),
            FieldValue::Time(t) => query.bind(t.to_string()),
        };
        let result = query
            .bind(i64::from(outlet))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownOutlet(outlet));
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
