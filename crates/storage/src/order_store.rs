use chrono::{DateTime, Utc};
use ixp_gate_domain::model::{Currency, NewOrder, OrderId, OrderStatus, PaymentOrder};
use ixp_gate_domain::storage::{OrderStore, StorageError, StorageResult};
use sea_orm::sea_query::{ConditionalStatement, Expr, Query};
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, EntityTrait, Set, TransactionTrait,
};

use crate::entity::payment_orders::{self, OrderStatusDb};
use crate::{update_returning, SeaOrmStorage};

#[async_trait::async_trait]
impl OrderStore for SeaOrmStorage {
    async fn insert_order(&self, order: NewOrder) -> StorageResult<PaymentOrder> {
        let model = payment_orders::ActiveModel {
            order_id: Set(order.order_id.into_inner()),
            amount_minor: Set(order.amount_minor),
            currency: Set(order.currency.as_str().to_string()),
            payer: Set(order.payer),
            status: Set(OrderStatusDb::Created),
            rejected_attempts: Set(0),
            payment_id: Set(None),
            created_at: Set(order.created_at),
            settled_at: Set(None),
        };
        let created = model
            .insert(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        model_to_order(created)
    }

    async fn find_order(&self, order_id: &OrderId) -> StorageResult<Option<PaymentOrder>> {
        let maybe = payment_orders::Entity::find_by_id(order_id.as_str().to_string())
            .one(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        maybe.map(model_to_order).transpose()
    }

    async fn mark_verified(
        &self,
        order_id: &OrderId,
        payment_id: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<PaymentOrder>> {
        let mut query = Query::update();
        query.table(payment_orders::Entity);
        query.value(
            payment_orders::Column::Status,
            OrderStatusDb::Verified.to_value(),
        );
        query.value(payment_orders::Column::PaymentId, payment_id);
        query.value(payment_orders::Column::SettledAt, at);
        query.and_where(payment_orders::Column::OrderId.eq(order_id.as_str()));
        query.and_where(payment_orders::Column::Status.eq(OrderStatusDb::Created));
        query.returning_all();

        update_returning::<_, payment_orders::Model>(self.connection(), &query)
            .await?
            .map(model_to_order)
            .transpose()
    }

    async fn record_rejection(
        &self,
        order_id: &OrderId,
        max_rejections: u32,
        at: DateTime<Utc>,
    ) -> StorageResult<Option<PaymentOrder>> {
        let txn = self
            .connection()
            .begin()
            .await
            .map_err(StorageError::from_source)?;

        let mut bump = Query::update();
        bump.table(payment_orders::Entity);
        bump.value(
            payment_orders::Column::RejectedAttempts,
            Expr::col(payment_orders::Column::RejectedAttempts).add(1),
        );
        bump.and_where(payment_orders::Column::OrderId.eq(order_id.as_str()));
        bump.and_where(payment_orders::Column::Status.eq(OrderStatusDb::Created));
        bump.returning_all();

        let mut updated = update_returning::<_, payment_orders::Model>(&txn, &bump).await?;
        if let Some(model) = &updated {
            if i64::from(model.rejected_attempts) >= i64::from(max_rejections) {
                let mut fail = Query::update();
                fail.table(payment_orders::Entity);
                fail.value(
                    payment_orders::Column::Status,
                    OrderStatusDb::Failed.to_value(),
                );
                fail.value(payment_orders::Column::SettledAt, at);
                fail.and_where(payment_orders::Column::OrderId.eq(order_id.as_str()));
                fail.and_where(payment_orders::Column::Status.eq(OrderStatusDb::Created));
                fail.returning_all();
                updated = update_returning(&txn, &fail).await?;
            }
        }

        txn.commit().await.map_err(StorageError::from_source)?;
        updated.map(model_to_order).transpose()
    }
}

fn model_to_order(model: payment_orders::Model) -> StorageResult<PaymentOrder> {
    let currency = Currency::parse(&model.currency)
        .map_err(|err| StorageError::Corrupt(err.to_string()))?;
    let rejected_attempts = u32::try_from(model.rejected_attempts).map_err(|_| {
        StorageError::Corrupt(format!(
            "order {} has negative rejection count",
            model.order_id
        ))
    })?;

    Ok(PaymentOrder {
        order_id: OrderId::new(model.order_id),
        amount_minor: model.amount_minor,
        currency,
        payer: model.payer,
        status: match model.status {
            OrderStatusDb::Created => OrderStatus::Created,
            OrderStatusDb::Verified => OrderStatus::Verified,
            OrderStatusDb::Failed => OrderStatus::Failed,
        },
        rejected_attempts,
        payment_id: model.payment_id,
        created_at: model.created_at,
        settled_at: model.settled_at,
    })
}
