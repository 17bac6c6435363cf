use crate::authz::acl::{AclEntryLoader, AclEntryRow};
use crate::authz::context::{NamedRef, Principal};
use crate::authz::errors::AuthzError;
use crate::entities;
use crate::settings::Database as DbCfg;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    Set,
};
use serde::{Deserialize, Serialize};

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(&cfg.url).await?;
    Ok(db)
}

// User and membership functions

pub async fn create_user(
    db: &DatabaseConnection,
    username: &str,
    nickname: Option<String>,
    email: Option<String>,
) -> Result<entities::user::Model, DbErr> {
    let user = entities::user::ActiveModel {
        username: Set(username.to_string()),
        nickname: Set(nickname),
        email: Set(email),
        enabled: Set(true),
        created_at: Set(Utc::now().timestamp()),
        ..Default::default()
    };

    user.insert(db).await
}

pub async fn get_user_by_username(
    db: &DatabaseConnection,
    username: &str,
) -> Result<Option<entities::user::Model>, DbErr> {
    use entities::user::{Column, Entity};

    Entity::find()
        .filter(Column::Username.eq(username))
        .one(db)
        .await
}

pub async fn get_authority_by_name(
    db: &DatabaseConnection,
    name: &str,
) -> Result<Option<entities::authority::Model>, DbErr> {
    use entities::authority::{Column, Entity};

    Entity::find().filter(Column::Name.eq(name)).one(db).await
}

pub async fn create_authority(
    db: &DatabaseConnection,
    name: &str,
) -> Result<entities::authority::Model, DbErr> {
    let authority = entities::authority::ActiveModel {
        name: Set(name.to_string()),
        description: Set(None),
        ..Default::default()
    };

    authority.insert(db).await
}

pub async fn create_group(
    db: &DatabaseConnection,
    name: &str,
) -> Result<entities::group::Model, DbErr> {
    let group = entities::group::ActiveModel {
        name: Set(name.to_string()),
        description: Set(None),
        ..Default::default()
    };

    group.insert(db).await
}

pub async fn grant_authority(
    db: &DatabaseConnection,
    user_id: i64,
    authority_id: i64,
) -> Result<(), DbErr> {
    let link = entities::user_authority::ActiveModel {
        user_id: Set(user_id),
        authority_id: Set(authority_id),
    };
    link.insert(db).await?;
    Ok(())
}

pub async fn join_group(
    db: &DatabaseConnection,
    user_id: i64,
    group_id: i64,
) -> Result<(), DbErr> {
    let link = entities::user_group::ActiveModel {
        user_id: Set(user_id),
        group_id: Set(group_id),
    };
    link.insert(db).await?;
    Ok(())
}

/// Assemble the principal for an authenticated user id: the user row plus
/// group and authority memberships. `None` for unknown or disabled users.
pub async fn load_principal(
    db: &DatabaseConnection,
    user_id: i64,
) -> Result<Option<Principal>, DbErr> {
    use entities::user::{Column, Entity};

    let Some(user) = Entity::find()
        .filter(Column::Id.eq(user_id))
        .filter(Column::Enabled.eq(true))
        .one(db)
        .await?
    else {
        return Ok(None);
    };

    let authority_ids: Vec<i64> = entities::user_authority::Entity::find()
        .filter(entities::user_authority::Column::UserId.eq(user_id))
        .all(db)
        .await?
        .into_iter()
        .map(|link| link.authority_id)
        .collect();

    let authorities = if authority_ids.is_empty() {
        vec![]
    } else {
        entities::authority::Entity::find()
            .filter(entities::authority::Column::Id.is_in(authority_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|a| NamedRef {
                id: a.id,
                name: a.name,
            })
            .collect()
    };

    let group_ids: Vec<i64> = entities::user_group::Entity::find()
        .filter(entities::user_group::Column::UserId.eq(user_id))
        .all(db)
        .await?
        .into_iter()
        .map(|link| link.group_id)
        .collect();

    let groups = if group_ids.is_empty() {
        vec![]
    } else {
        entities::group::Entity::find()
            .filter(entities::group::Column::Id.is_in(group_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|g| NamedRef {
                id: g.id,
                name: g.name,
            })
            .collect()
    };

    Ok(Some(Principal {
        id: user.id,
        username: user.username,
        nickname: user.nickname,
        groups,
        authorities,
    }))
}

// ACL class and entry functions

pub async fn ensure_acl_class(
    db: &DatabaseConnection,
    name: &str,
) -> Result<entities::acl_class::Model, DbErr> {
    use entities::acl_class::{Column, Entity};

    if let Some(class) = Entity::find().filter(Column::Name.eq(name)).one(db).await? {
        return Ok(class);
    }

    let class = entities::acl_class::ActiveModel {
        name: Set(name.to_string()),
        description: Set(None),
        ..Default::default()
    };
    class.insert(db).await
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAclEntry {
    pub resource_type: String,
    pub object_id: Option<i64>,
    pub sid: i64,
    pub principal: bool,
    pub mask: i32,
    pub granting: bool,
}

pub async fn create_acl_entry(
    db: &DatabaseConnection,
    input: NewAclEntry,
) -> Result<entities::acl_entry::Model, DbErr> {
    let class = ensure_acl_class(db, &input.resource_type).await?;

    let entry = entities::acl_entry::ActiveModel {
        type_id: Set(class.id),
        object_id: Set(input.object_id),
        sid: Set(input.sid),
        principal: Set(input.principal),
        mask: Set(input.mask),
        granting: Set(input.granting),
        created_at: Set(Utc::now().timestamp()),
        ..Default::default()
    };

    entry.insert(db).await
}

/// ACL entry joined with its class name, as served by the admin endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct AclEntryView {
    pub id: i64,
    pub resource_type: String,
    pub object_id: Option<i64>,
    pub sid: i64,
    pub principal: bool,
    pub mask: i32,
    pub granting: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AclEntryFilter {
    pub resource_type: Option<String>,
    pub object_id: Option<i64>,
    pub mask: Option<i32>,
}

pub async fn list_acl_entries(
    db: &DatabaseConnection,
    filter: AclEntryFilter,
) -> Result<Vec<AclEntryView>, DbErr> {
    use entities::acl_entry::{Column, Entity};
    use std::collections::HashMap;

    let class_names: HashMap<i64, String> = entities::acl_class::Entity::find()
        .all(db)
        .await?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect();

    let mut select = Entity::find();
    if let Some(type_name) = &filter.resource_type {
        let type_id = class_names
            .iter()
            .find(|(_, name)| *name == type_name)
            .map(|(id, _)| *id)
            .unwrap_or(-1);
        select = select.filter(Column::TypeId.eq(type_id));
    }
    if let Some(object_id) = filter.object_id {
        select = select.filter(Column::ObjectId.eq(object_id));
    }
    if let Some(mask) = filter.mask {
        select = select.filter(Column::Mask.eq(mask));
    }

    let views = select
        .all(db)
        .await?
        .into_iter()
        .map(|entry| AclEntryView {
            id: entry.id,
            resource_type: class_names
                .get(&entry.type_id)
                .cloned()
                .unwrap_or_default(),
            object_id: entry.object_id,
            sid: entry.sid,
            principal: entry.principal,
            mask: entry.mask,
            granting: entry.granting,
        })
        .collect();

    Ok(views)
}

pub async fn delete_acl_entry(db: &DatabaseConnection, id: i64) -> Result<bool, DbErr> {
    use entities::acl_entry::{Column, Entity};

    let result = Entity::delete_many()
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;

    Ok(result.rows_affected > 0)
}

// Sample resource functions

pub async fn create_document(
    db: &DatabaseConnection,
    owner_id: i64,
    title: &str,
) -> Result<entities::document::Model, DbErr> {
    let document = entities::document::ActiveModel {
        owner_id: Set(owner_id),
        title: Set(title.to_string()),
        created_at: Set(Utc::now().timestamp()),
        ..Default::default()
    };

    document.insert(db).await
}

/// ACL entry loader over the database, the collaborator behind
/// `AclResolver::get_acl`.
pub struct DbAclEntryLoader {
    db: DatabaseConnection,
}

impl DbAclEntryLoader {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AclEntryLoader for DbAclEntryLoader {
    async fn load_entries(
        &self,
        mask: i32,
        type_name: &str,
        object_id: Option<i64>,
    ) -> Result<Vec<AclEntryRow>, AuthzError> {
        use entities::acl_entry::{Column, Entity};

        let Some(class) = entities::acl_class::Entity::find()
            .filter(entities::acl_class::Column::Name.eq(type_name))
            .one(&self.db)
            .await?
        else {
            return Ok(vec![]);
        };

        let mut select = Entity::find()
            .filter(Column::TypeId.eq(class.id))
            .filter(Column::Mask.eq(mask));
        select = match object_id {
            Some(id) => select.filter(Column::ObjectId.eq(id)),
            None => select.filter(Column::ObjectId.is_null()),
        };

        let rows = select
            .all(&self.db)
            .await?
            .into_iter()
            .map(|entry| AclEntryRow {
                type_name: type_name.to_string(),
                object_id: entry.object_id,
                sid: entry.sid,
                principal: entry.principal,
                mask: entry.mask,
                granting: entry.granting,
            })
            .collect();

        Ok(rows)
    }
}
