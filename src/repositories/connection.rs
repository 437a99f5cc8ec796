//! Connection repository for database operations
//!
//! SeaORM implementation of [`ConnectionStore`]. Endpoint passwords are sealed
//! with the configured [`CryptoKey`] on the way in and opened on the way out.

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{ConnectionStore, StoreResult};
use crate::crypto::{CredentialScope, CryptoKey, open_password, seal_password};
use crate::domain::{Endpoint, ScadaConnection};
use crate::error::MonitorError;
use crate::models::scada_connection::{self, Entity as ScadaConnectionEntity};
use crate::models::{from_db_time, to_db_time};

/// Repository for connection database operations
#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
    /// Key sealing endpoint passwords
    pub crypto_key: CryptoKey,
}

impl ConnectionRepository {
    /// Creates a new ConnectionRepository instance
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    fn to_active_model(
        &self,
        connection: &ScadaConnection,
    ) -> StoreResult<scada_connection::ActiveModel> {
        let password_ciphertext = connection
            .endpoint
            .password
            .as_deref()
            .map(|password| seal_password(&self.crypto_key, &scope_of(connection), password))
            .transpose()?;

        Ok(scada_connection::ActiveModel {
            id: Set(connection.id),
            tenant_id: Set(connection.tenant_id),
            well_id: Set(connection.well_id),
            name: Set(connection.name.clone()),
            endpoint_url: Set(connection.endpoint.url.clone()),
            security_mode: Set(connection.endpoint.security_mode.as_str().to_string()),
            security_policy: Set(connection.endpoint.security_policy.clone()),
            username: Set(connection.endpoint.username.clone()),
            password_ciphertext: Set(password_ciphertext),
            poll_interval_seconds: Set(connection.poll_interval_seconds as i32),
            status: Set(connection.status.as_str().to_string()),
            last_connected_at: Set(connection.last_connected_at.map(to_db_time)),
            last_error_message: Set(connection.last_error_message.clone()),
            is_enabled: Set(connection.is_enabled),
            config_revision: Set(connection.config_revision),
            created_at: Set(to_db_time(connection.created_at)),
            updated_at: Set(to_db_time(connection.updated_at)),
            created_by: Set(connection.created_by),
            updated_by: Set(connection.updated_by),
        })
    }

    fn from_model(&self, model: scada_connection::Model) -> StoreResult<ScadaConnection> {
        let id = model.id;
        let corrupt = |reason: String| MonitorError::corrupt("connection", id, reason);

        let status = model
            .status
            .parse()
            .map_err(|err| corrupt(format!("{err}")))?;
        let security_mode = model
            .security_mode
            .parse()
            .map_err(|err| corrupt(format!("{err}")))?;
        let poll_interval_seconds = u32::try_from(model.poll_interval_seconds)
            .map_err(|_| corrupt(format!("poll interval {}", model.poll_interval_seconds)))?;

        let scope = CredentialScope {
            tenant_id: model.tenant_id,
            well_id: model.well_id,
            connection_id: model.id,
        };
        let password = match model.password_ciphertext.as_deref() {
            Some(sealed) => Some(open_password(&self.crypto_key, &scope, sealed).map_err(|err| {
                tracing::error!(
                    tenant_id = %model.tenant_id,
                    connection_id = %model.id,
                    "Endpoint password decryption failed"
                );
                MonitorError::Crypto(err)
            })?),
            None => None,
        };

        Ok(ScadaConnection {
            id,
            tenant_id: model.tenant_id,
            well_id: model.well_id,
            name: model.name,
            endpoint: Endpoint {
                url: model.endpoint_url,
                security_mode,
                security_policy: model.security_policy,
                username: model.username,
                password,
            },
            poll_interval_seconds,
            status,
            last_connected_at: model.last_connected_at.map(from_db_time),
            last_error_message: model.last_error_message,
            is_enabled: model.is_enabled,
            config_revision: model.config_revision,
            created_at: from_db_time(model.created_at),
            updated_at: from_db_time(model.updated_at),
            created_by: model.created_by,
            updated_by: model.updated_by,
        })
    }

    fn from_models(&self, models: Vec<scada_connection::Model>) -> StoreResult<Vec<ScadaConnection>> {
        models
            .into_iter()
            .map(|model| self.from_model(model))
            .collect()
    }
}

fn scope_of(connection: &ScadaConnection) -> CredentialScope {
    CredentialScope {
        tenant_id: connection.tenant_id,
        well_id: connection.well_id,
        connection_id: connection.id,
    }
}

#[async_trait]
impl ConnectionStore for ConnectionRepository {
    async fn find_by_well_id(
        &self,
        tenant_id: Uuid,
        well_id: Uuid,
    ) -> StoreResult<Vec<ScadaConnection>> {
        let models = ScadaConnectionEntity::find()
            .filter(scada_connection::Column::TenantId.eq(tenant_id))
            .filter(scada_connection::Column::WellId.eq(well_id))
            .order_by_asc(scada_connection::Column::CreatedAt)
            .order_by_asc(scada_connection::Column::Id)
            .all(&*self.db)
            .await?;
        self.from_models(models)
    }

    async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<Option<ScadaConnection>> {
        ScadaConnectionEntity::find_by_id(id)
            .filter(scada_connection::Column::TenantId.eq(tenant_id))
            .one(&*self.db)
            .await?
            .map(|model| self.from_model(model))
            .transpose()
    }

    async fn find_all(&self, tenant_id: Uuid) -> StoreResult<Vec<ScadaConnection>> {
        let models = ScadaConnectionEntity::find()
            .filter(scada_connection::Column::TenantId.eq(tenant_id))
            .order_by_asc(scada_connection::Column::CreatedAt)
            .order_by_asc(scada_connection::Column::Id)
            .all(&*self.db)
            .await?;
        self.from_models(models)
    }

    async fn find_enabled(&self) -> StoreResult<Vec<ScadaConnection>> {
        let models = ScadaConnectionEntity::find()
            .filter(scada_connection::Column::IsEnabled.eq(true))
            .order_by_asc(scada_connection::Column::CreatedAt)
            .order_by_asc(scada_connection::Column::Id)
            .all(&*self.db)
            .await?;
        self.from_models(models)
    }

    #[instrument(skip_all, fields(connection_id = %connection.id()))]
    async fn save(&self, connection: &ScadaConnection) -> StoreResult<()> {
        let active = self.to_active_model(connection)?;

        let txn = self.db.begin().await?;
        let existing = ScadaConnectionEntity::find_by_id(connection.id)
            .one(&txn)
            .await?;

        match existing {
            Some(row) if row.tenant_id != connection.tenant_id => {
                txn.rollback().await?;
                return Err(MonitorError::not_found("connection", connection.id));
            }
            Some(_) => {
                active.update(&txn).await?;
            }
            None => {
                ScadaConnectionEntity::insert(active)
                    .exec_without_returning(&txn)
                    .await?;
            }
        }

        txn.commit().await?;
        Ok(())
    }

    #[instrument(skip_all, fields(connection_id = %connection.id()))]
    async fn update_status(&self, connection: &ScadaConnection) -> StoreResult<bool> {
        let result = ScadaConnectionEntity::update_many()
            .col_expr(
                scada_connection::Column::Status,
                Expr::value(connection.status.as_str()),
            )
            .col_expr(
                scada_connection::Column::LastConnectedAt,
                Expr::value(connection.last_connected_at.map(to_db_time)),
            )
            .col_expr(
                scada_connection::Column::LastErrorMessage,
                Expr::value(connection.last_error_message.clone()),
            )
            .col_expr(
                scada_connection::Column::UpdatedAt,
                Expr::value(to_db_time(connection.updated_at)),
            )
            .filter(scada_connection::Column::Id.eq(connection.id))
            .filter(scada_connection::Column::TenantId.eq(connection.tenant_id))
            .filter(scada_connection::Column::IsEnabled.eq(true))
            .filter(scada_connection::Column::ConfigRevision.eq(connection.config_revision))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            debug!("Status write skipped; connection changed since it was read");
        }
        Ok(result.rows_affected > 0)
    }

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<()> {
        let result = ScadaConnectionEntity::delete_many()
            .filter(scada_connection::Column::Id.eq(id))
            .filter(scada_connection::Column::TenantId.eq(tenant_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(MonitorError::not_found("connection", id));
        }
        Ok(())
    }
}
