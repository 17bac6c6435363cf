pub mod acl_class;
pub mod acl_entry;
pub mod authority;
pub mod document;
pub mod group;
pub mod user;
pub mod user_authority;
pub mod user_group;

pub use acl_class::Entity as AclClass;
pub use acl_entry::Entity as AclEntry;
pub use authority::Entity as Authority;
pub use document::Entity as Document;
pub use group::Entity as Group;
pub use user::Entity as User;
pub use user_authority::Entity as UserAuthority;
pub use user_group::Entity as UserGroup;
