//! Roles are process-global (unique name); assignment to a user is
//! realm-scoped through `user_roles`. A role named after a realm's owner is
//! implicitly seeded and auto-assigned to every user of that realm.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub name: String,
    pub description: Option<String>,
}
