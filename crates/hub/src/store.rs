//! Logical outlet store: the read/write interface the dispatcher works
//! against. `db::Db` is the sqlite implementation.
//!
//! Fields are a closed enum and values are typed, so no caller ever builds
//! query text out of field names or payload content.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::policy::TimeOfDay;

/// Outlet number as printed on the strip, starting at 1.
pub type OutletId = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutletField {
    CurrentStatus,
    StopChargingPercent,
    TimerOn,
    TimerOff,
}

impl OutletField {
    pub fn name(self) -> &'static str {
        match self {
            Self::CurrentStatus => "currentstatus",
            Self::StopChargingPercent => "stopchargingpercent",
            Self::TimerOn => "timer_on",
            Self::TimerOff => "timer_off",
        }
    }

    /// Whether `value` has the type this field stores.
    pub fn accepts(self, value: FieldValue) -> bool {
        matches!(
            (self, value),
            (Self::CurrentStatus, FieldValue::Status(_))
                | (Self::StopChargingPercent, FieldValue::Percent(_))
                | (Self::TimerOn | Self::TimerOff, FieldValue::Time(_))
        )
    }
}

impl fmt::Display for OutletField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    Status(bool),
    Percent(u8),
    Time(TimeOfDay),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("outlet {0} does not exist")]
    UnknownOutlet(OutletId),

    #[error("{field} cannot hold {value:?}")]
    TypeMismatch { field: OutletField, value: FieldValue },

    #[error("outlet {outlet} has a corrupt {field}: {detail}")]
    Corrupt {
        outlet: OutletId,
        field: OutletField,
        detail: String,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait OutletStore: Send + Sync {
    /// `Ok(None)` when the outlet exists but the field has never been set.
    async fn read(
        &self,
        field: OutletField,
        outlet: OutletId,
    ) -> Result<Option<FieldValue>, StoreError>;

    async fn write(
        &self,
        field: OutletField,
        outlet: OutletId,
        value: FieldValue,
    ) -> Result<(), StoreError>;

    async fn read_status(&self, outlet: OutletId) -> Result<bool, StoreError> {
        match self.read(OutletField::CurrentStatus, outlet).await? {
            Some(FieldValue::Status(on)) => Ok(on),
            other => Err(unexpected(outlet, OutletField::CurrentStatus, other)),
        }
    }

    async fn read_percent(
        &self,
        field: OutletField,
        outlet: OutletId,
    ) -> Result<Option<u8>, StoreError> {
        match self.read(field, outlet).await? {
            Some(FieldValue::Percent(p)) => Ok(Some(p)),
            None => Ok(None),
            other => Err(unexpected(outlet, field, other)),
        }
    }

    async fn read_time(
        &self,
        field: OutletField,
        outlet: OutletId,
    ) -> Result<Option<TimeOfDay>, StoreError> {
        match self.read(field, outlet).await? {
            Some(FieldValue::Time(t)) => Ok(Some(t)),
            None => Ok(None),
            other => Err(unexpected(outlet, field, other)),
        }
    }
}

fn unexpected(outlet: OutletId, field: OutletField, got: Option<FieldValue>) -> StoreError {
    StoreError::Corrupt {
        outlet,
        field,
        detail: format!("unexpected value {got:?}"),
    }
}
