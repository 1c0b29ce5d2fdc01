use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A configured sending identity: one provider plus its credentials.
///
/// `settings` is an opaque JSON string; each provider adapter parses the
/// fields it needs and rejects mailboxes with incomplete configuration.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "mailboxes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: Option<String>,
    pub email: String,
    /// Provider tag: gmail, outlook, yahoo, smtp, ses, mailgun, sendgrid
    pub provider: String,
    /// Authentication mode: password, oauth2, or api_key
    pub auth_type: String,
    #[serde(skip_serializing)]
    pub settings: Option<String>,
    pub is_verified: bool,
    pub owner_id: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::OwnerId",
        to = "super::user::Column::Id"
    )]
    Owner,
    #[sea_orm(has_many = "super::delivery_log::Entity")]
    DeliveryLogs,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Owner.def()
    }
}

impl Related<super::delivery_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeliveryLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
