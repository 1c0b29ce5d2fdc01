use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub username: String,
    #[sea_orm(unique)]
    pub email: String,
    pub full_name: Option<String>,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::mailbox::Entity")]
    Mailboxes,
    #[sea_orm(has_many = "super::delivery_log::Entity")]
    DeliveryLogs,
    #[sea_orm(has_many = "super::outgoing_domain::Entity")]
    OutgoingDomains,
}

impl Related<super::mailbox::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Mailboxes.def()
    }
}

impl Related<super::delivery_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeliveryLogs.def()
    }
}

impl Related<super::outgoing_domain::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OutgoingDomains.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
