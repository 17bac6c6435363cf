use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One grant or deny of a permission mask to one subject on one resource.
/// `object_id = None` scopes the entry to the whole resource type.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "acl_entries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub type_id: i64,
    pub object_id: Option<i64>,
    /// Subject id: a user id when `principal`, an authority id otherwise.
    pub sid: i64,
    pub principal: bool,
    pub mask: i32,
    pub granting: bool,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
