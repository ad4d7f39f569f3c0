use chrono::{DateTime, Utc};
use ixp_gate_domain::model::{AccessRecord, AccessState, AcquireRequest, NetworkId};
use ixp_gate_domain::storage::{AccessStore, StorageError, StorageResult};
use sea_orm::sea_query::{ConditionalStatement, OnConflict, Query};
use sea_orm::{ActiveEnum, ColumnTrait, Condition, EntityTrait, Set};

use crate::entity::access_records::{self, AccessStateDb};
use crate::{update_returning, SeaOrmStorage};

#[async_trait::async_trait]
impl AccessStore for SeaOrmStorage {
    async fn try_acquire(&self, request: AcquireRequest) -> StorageResult<Option<AccessRecord>> {
        let granted = request.granted_record();
        let model = access_records::ActiveModel {
            network_id: Set(granted.network_id.as_str().to_string()),
            state: Set(AccessStateDb::Accessed),
            last_transition_at: Set(granted.last_transition_at),
            lease_expires_at: Set(granted.lease_expires_at),
        };
        let inserted = access_records::Entity::insert(model)
            .on_conflict(
                OnConflict::column(access_records::Column::NetworkId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        if inserted > 0 {
            return Ok(Some(granted));
        }

        // Row exists: take it over only if idle or its lease has lapsed.
        let mut query = Query::update();
        query.table(access_records::Entity);
        query.value(
            access_records::Column::State,
            AccessStateDb::Accessed.to_value(),
        );
        query.value(access_records::Column::LastTransitionAt, request.at);
        query.value(
            access_records::Column::LeaseExpiresAt,
            request.lease_expires_at,
        );
        query.and_where(access_records::Column::NetworkId.eq(request.network_id.as_str()));
        query.cond_where(
            Condition::any()
                .add(access_records::Column::State.eq(AccessStateDb::Idle))
                .add(access_records::Column::LeaseExpiresAt.lte(request.at)),
        );
        query.returning_all();

        update_returning::<_, access_records::Model>(self.connection(), &query)
            .await?
            .map(model_to_record)
            .transpose()
    }

    async fn release(
        &self,
        network_id: &NetworkId,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<AccessRecord>> {
        let mut query = Query::update();
        query.table(access_records::Entity);
        query.value(access_records::Column::State, AccessStateDb::Idle.to_value());
        query.value(access_records::Column::LastTransitionAt, at);
        query.value(
            access_records::Column::LeaseExpiresAt,
            Option::<DateTime<Utc>>::None,
        );
        query.and_where(access_records::Column::NetworkId.eq(network_id.as_str()));
        query.and_where(access_records::Column::State.eq(AccessStateDb::Accessed));
        // A lapsed lease already counts as idle; nothing is held to release.
        query.cond_where(
            Condition::any()
                .add(access_records::Column::LeaseExpiresAt.is_null())
                .add(access_records::Column::LeaseExpiresAt.gt(at)),
        );
        query.returning_all();

        update_returning::<_, access_records::Model>(self.connection(), &query)
            .await?
            .map(model_to_record)
            .transpose()
    }

    async fn find_access(&self, network_id: &NetworkId) -> StorageResult<Option<AccessRecord>> {
        let maybe = access_records::Entity::find_by_id(network_id.as_str().to_string())
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        maybe.map(model_to_record).transpose()
    }
}

fn model_to_record(model: access_records::Model) -> StorageResult<AccessRecord> {
    Ok(AccessRecord {
        network_id: NetworkId::new(model.network_id),
        state: match model.state {
            AccessStateDb::Idle => AccessState::Idle,
            AccessStateDb::Accessed => AccessState::Accessed,
        },
        last_transition_at: model.last_transition_at,
        lease_expires_at: model.lease_expires_at,
    })
}
