//! SeaORM entity models
//!
//! Relational entities (users, roles, profiles, references, notifications)
//! and the document-store entity holding achievement content.

mod enums;

pub mod achievement_content;
pub mod achievement_reference;
pub mod lecturer;
pub mod notification;
pub mod permission;
pub mod role;
pub mod role_permission;
pub mod student;
pub mod user;

pub use enums::{AchievementStatus, AchievementType};

pub use role::{
    Entity as RoleEntity,
    Model as Role,
    ActiveModel as RoleActiveModel,
    Column as RoleColumn,
};

pub use permission::{
    Entity as PermissionEntity,
    Model as Permission,
    ActiveModel as PermissionActiveModel,
    Column as PermissionColumn,
};

pub use role_permission::{
    Entity as RolePermissionEntity,
    Model as RolePermission,
    ActiveModel as RolePermissionActiveModel,
    Column as RolePermissionColumn,
};

pub use user::{
    Entity as UserEntity,
    Model as User,
    ActiveModel as UserActiveModel,
    Column as UserColumn,
};

pub use student::{
    Entity as StudentEntity,
    Model as Student,
    ActiveModel as StudentActiveModel,
    Column as StudentColumn,
};

pub use lecturer::{
    Entity as LecturerEntity,
    Model as Lecturer,
    ActiveModel as LecturerActiveModel,
    Column as LecturerColumn,
};

pub use achievement_reference::{
    Entity as AchievementReferenceEntity,
    Model as AchievementReference,
    ActiveModel as AchievementReferenceActiveModel,
    Column as AchievementReferenceColumn,
};

pub use achievement_content::{
    Entity as AchievementContentEntity,
    Model as AchievementContent,
    ActiveModel as AchievementContentActiveModel,
    Column as AchievementContentColumn,
};

pub use notification::{
    Entity as NotificationEntity,
    Model as Notification,
    ActiveModel as NotificationActiveModel,
    Column as NotificationColumn,
};
