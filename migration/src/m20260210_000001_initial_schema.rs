use sea_orm_migration::sea_orm;
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Enable foreign keys for SQLite
        if manager.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        // Create users table
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(pk_auto(Users::Id).big_integer())
                    .col(string_uniq(Users::Username))
                    .col(string_null(Users::Nickname))
                    .col(string_null(Users::Email))
                    .col(boolean(Users::Enabled))
                    .col(big_integer(Users::CreatedAt))
                    .to_owned(),
            )
            .await?;

        // Create authorities table
        manager
            .create_table(
                Table::create()
                    .table(Authorities::Table)
                    .if_not_exists()
                    .col(pk_auto(Authorities::Id).big_integer())
                    .col(string_uniq(Authorities::Name))
                    .col(string_null(Authorities::Description))
                    .to_owned(),
            )
            .await?;

        // Create groups table
        manager
            .create_table(
                Table::create()
                    .table(Groups::Table)
                    .if_not_exists()
                    .col(pk_auto(Groups::Id).big_integer())
                    .col(string_uniq(Groups::Name))
                    .col(string_null(Groups::Description))
                    .to_owned(),
            )
            .await?;

        // Create user_authorities join table
        manager
            .create_table(
                Table::create()
                    .table(UserAuthorities::Table)
                    .if_not_exists()
                    .col(big_integer(UserAuthorities::UserId))
                    .col(big_integer(UserAuthorities::AuthorityId))
                    .primary_key(
                        Index::create()
                            .col(UserAuthorities::UserId)
                            .col(UserAuthorities::AuthorityId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(UserAuthorities::Table, UserAuthorities::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(UserAuthorities::Table, UserAuthorities::AuthorityId)
                            .to(Authorities::Table, Authorities::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Create user_groups join table
        manager
            .create_table(
                Table::create()
                    .table(UserGroups::Table)
                    .if_not_exists()
                    .col(big_integer(UserGroups::UserId))
                    .col(big_integer(UserGroups::GroupId))
                    .primary_key(
                        Index::create()
                            .col(UserGroups::UserId)
                            .col(UserGroups::GroupId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(UserGroups::Table, UserGroups::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(UserGroups::Table, UserGroups::GroupId)
                            .to(Groups::Table, Groups::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Create acl_classes table
        manager
            .create_table(
                Table::create()
                    .table(AclClasses::Table)
                    .if_not_exists()
                    .col(pk_auto(AclClasses::Id).big_integer())
                    .col(string_uniq(AclClasses::Name))
                    .col(string_null(AclClasses::Description))
                    .to_owned(),
            )
            .await?;

        // Create acl_entries table
        manager
            .create_table(
                Table::create()
                    .table(AclEntries::Table)
                    .if_not_exists()
                    .col(pk_auto(AclEntries::Id).big_integer())
                    .col(big_integer(AclEntries::TypeId))
                    .col(big_integer_null(AclEntries::ObjectId))
                    .col(big_integer(AclEntries::Sid))
                    .col(boolean(AclEntries::Principal))
                    .col(integer(AclEntries::Mask))
                    .col(boolean(AclEntries::Granting))
                    .col(big_integer(AclEntries::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .from(AclEntries::Table, AclEntries::TypeId)
                            .to(AclClasses::Table, AclClasses::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Lookups always filter by (type, object, mask)
        manager
            .create_index(
                Index::create()
                    .name("idx_acl_entries_type_object_mask")
                    .table(AclEntries::Table)
                    .col(AclEntries::TypeId)
                    .col(AclEntries::ObjectId)
                    .col(AclEntries::Mask)
                    .to_owned(),
            )
            .await?;

        // Create documents table (sample guarded resource)
        manager
            .create_table(
                Table::create()
                    .table(Documents::Table)
                    .if_not_exists()
                    .col(pk_auto(Documents::Id).big_integer())
                    .col(big_integer(Documents::OwnerId))
                    .col(string(Documents::Title))
                    .col(big_integer(Documents::CreatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .from(Documents::Table, Documents::OwnerId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Documents::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AclEntries::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AclClasses::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UserGroups::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UserAuthorities::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Groups::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Authorities::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Username,
    Nickname,
    Email,
    Enabled,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Authorities {
    Table,
    Id,
    Name,
    Description,
}

#[derive(DeriveIden)]
enum Groups {
    Table,
    Id,
    Name,
    Description,
}

#[derive(DeriveIden)]
enum UserAuthorities {
    Table,
    UserId,
    AuthorityId,
}

#[derive(DeriveIden)]
enum UserGroups {
    Table,
    UserId,
    GroupId,
}

#[derive(DeriveIden)]
enum AclClasses {
    Table,
    Id,
    Name,
    Description,
}

#[derive(DeriveIden)]
enum AclEntries {
    Table,
    Id,
    TypeId,
    ObjectId,
    Sid,
    Principal,
    Mask,
    Granting,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Documents {
    Table,
    Id,
    OwnerId,
    Title,
    CreatedAt,
}
