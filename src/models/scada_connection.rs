//! SCADA connection entity model
//!
//! One row per well-to-device link. The endpoint password is stored sealed;
//! see [`crate::crypto`].

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "scada_connections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub well_id: Uuid,

    /// Operator-facing name (3..=100 characters)
    pub name: String,

    /// Device endpoint, e.g. `opc.tcp://10.0.0.7:4840`
    pub endpoint_url: String,

    /// `None`, `Sign` or `SignAndEncrypt`
    pub security_mode: String,

    pub security_policy: String,

    pub username: Option<String>,

    /// AES-256-GCM sealed password
    pub password_ciphertext: Option<Vec<u8>>,

    /// Seconds between polls (1..=300)
    pub poll_interval_seconds: i32,

    /// `inactive`, `connecting`, `active` or `error`
    pub status: String,

    pub last_connected_at: Option<DateTimeWithTimeZone>,

    pub last_error_message: Option<String>,

    pub is_enabled: bool,

    /// Bumped on every operator change; status writes leave it alone
    pub config_revision: i64,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,

    pub created_by: Uuid,

    pub updated_by: Uuid,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
