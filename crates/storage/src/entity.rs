pub mod access_records {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "access_records")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub network_id: String,
        pub state: AccessStateDb,
        pub last_transition_at: DateTimeUtc,
        pub lease_expires_at: Option<DateTimeUtc>,
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
    #[sea_orm(rs_type = "i8", db_type = "TinyInteger")]
    pub enum AccessStateDb {
        #[sea_orm(num_value = 0)]
        Idle,
        #[sea_orm(num_value = 1)]
        Accessed,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod payment_orders {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "payment_orders")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub order_id: String,
        pub amount_minor: i64,
        pub currency: String,
        pub payer: String,
        pub status: OrderStatusDb,
        #[sea_orm(default_value = 0)]
        pub rejected_attempts: i32,
        pub payment_id: Option<String>,
        pub created_at: DateTimeUtc,
        pub settled_at: Option<DateTimeUtc>,
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
    #[sea_orm(rs_type = "i8", db_type = "TinyInteger")]
    pub enum OrderStatusDb {
        #[sea_orm(num_value = 0)]
        Created,
        #[sea_orm(num_value = 1)]
        Verified,
        #[sea_orm(num_value = 2)]
        Failed,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
