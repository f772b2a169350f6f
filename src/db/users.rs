use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio_postgres::{Client, Row};
use tracing::debug;

use super::{like_pattern, map_delete_error, PgStore};
use crate::error::{map_write_error, ApiResult, AppError};
use crate::models::*;
use crate::repository::{CatalogRepository, RoleRepository, UserRepository};

const USER_COLUMNS: &str =
    "id, username, password_hash, email, real_name, avatar, status, last_login_at, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, code, name, description, status, created_at, updated_at";

fn user_from_row(row: &Row) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        email: row.get("email"),
        real_name: row.get("real_name"),
        avatar: row.get("avatar"),
        status: row.get("status"),
        last_login_at: row.get("last_login_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn role_from_row(row: &Row) -> Role {
    Role {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        description: row.get("description"),
        status: row.get("status"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn permission_from_row(row: &Row) -> Permission {
    Permission {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        module: row.get("module"),
        action: row.get("action"),
        description: row.get("description"),
    }
}

/// Attach role lists to a batch of users with one query
async fn with_roles(client: &Client, users: Vec<User>) -> ApiResult<Vec<UserWithRoles>> {
    let ids: Vec<i64> = users.iter().map(|u| u.id).collect();
    let rows = client
        .query(
            "SELECT ur.user_id, r.id, r.code, r.name, r.description, r.status, r.created_at, r.updated_at
             FROM user_roles ur JOIN roles r ON r.id = ur.role_id
             WHERE ur.user_id = ANY($1)
             ORDER BY r.id",
            &[&ids],
        )
        .await?;

    let mut by_user: HashMap<i64, Vec<Role>> = HashMap::new();
    for row in &rows {
        by_user
            .entry(row.get("user_id"))
            .or_default()
            .push(role_from_row(row));
    }

    Ok(users
        .into_iter()
        .map(|user| {
            let roles = by_user.remove(&user.id).unwrap_or_default();
            UserWithRoles { user, roles }
        })
        .collect())
}

async fn with_permissions(client: &Client, roles: Vec<Role>) -> ApiResult<Vec<RoleWithPermissions>> {
    let ids: Vec<i64> = roles.iter().map(|r| r.id).collect();
    let rows = client
        .query(
            "SELECT rp.role_id, p.id, p.code, p.name, p.module, p.action, p.description
             FROM role_permissions rp JOIN permissions p ON p.id = rp.permission_id
             WHERE rp.role_id = ANY($1)
             ORDER BY p.module, p.code",
            &[&ids],
        )
        .await?;

    let mut by_role: HashMap<i64, Vec<Permission>> = HashMap::new();
    for row in &rows {
        by_role
            .entry(row.get("role_id"))
            .or_default()
            .push(permission_from_row(row));
    }

    Ok(roles
        .into_iter()
        .map(|role| {
            let permissions = by_role.remove(&role.id).unwrap_or_default();
            RoleWithPermissions { role, permissions }
        })
        .collect())
}

async fn load_user(client: &Client, column: &str, value: &(dyn tokio_postgres::types::ToSql + Sync)) -> ApiResult<Option<UserWithRoles>> {
    let sql = format!("SELECT {} FROM users WHERE {} = $1", USER_COLUMNS, column);
    let Some(row) = client.query_opt(&sql, &[value]).await? else {
        return Ok(None);
    };
    Ok(with_roles(client, vec![user_from_row(&row)]).await?.pop())
}

async fn load_role(client: &Client, id: i64) -> ApiResult<Option<RoleWithPermissions>> {
    let sql = format!("SELECT {} FROM roles WHERE id = $1", ROLE_COLUMNS);
    let Some(row) = client.query_opt(&sql, &[&id]).await? else {
        return Ok(None);
    };
    Ok(with_permissions(client, vec![role_from_row(&row)]).await?.pop())
}

/// Write errors on the users table, telling username and email clashes apart
fn map_user_write_error(e: tokio_postgres::Error) -> AppError {
    let on_email = e
        .as_db_error()
        .and_then(|db| db.constraint())
        .map_or(false, |c| c.contains("email"));
    map_write_error(e, if on_email { "邮箱已被使用" } else { "用户名已存在" })
}

#[async_trait]
impl UserRepository for PgStore {
    async fn list_users(&self, filter: &UserFilter, page: PageRequest) -> ApiResult<(Vec<UserWithRoles>, i64)> {
        let client = self.client().await?;
        let keyword = like_pattern(filter.keyword.as_deref());
        let condition = "($1::text IS NULL OR username ILIKE $1 OR real_name ILIKE $1 OR email ILIKE $1)";

        let total: i64 = client
            .query_one(&format!("SELECT COUNT(*) FROM users WHERE {}", condition), &[&keyword])
            .await?
            .get(0);
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM users WHERE {} ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
                    USER_COLUMNS, condition
                ),
                &[&keyword, &page.limit(), &page.offset()],
            )
            .await?;

        let users = rows.iter().map(user_from_row).collect();
        Ok((with_roles(&client, users).await?, total))
    }

    async fn find_user(&self, id: i64) -> ApiResult<Option<UserWithRoles>> {
        let client = self.client().await?;
        load_user(&client, "id", &id).await
    }

    async fn find_user_by_username(&self, username: &str) -> ApiResult<Option<UserWithRoles>> {
        let client = self.client().await?;
        load_user(&client, "username", &username).await
    }

    async fn create_user(&self, user: NewUser) -> ApiResult<UserWithRoles> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                "INSERT INTO users (username, password_hash, email, real_name) VALUES ($1, $2, $3, $4) RETURNING id",
                &[&user.username, &user.password_hash, &user.email, &user.real_name],
            )
            .await
            .map_err(map_user_write_error)?;
        let id: i64 = row.get(0);

        tx.execute(
            "INSERT INTO user_roles (user_id, role_id) SELECT $1, UNNEST($2::bigint[]) ON CONFLICT DO NOTHING",
            &[&id, &user.role_ids],
        )
        .await
        .map_err(|e| map_write_error(e, "用户名已存在"))?;
        tx.commit().await?;

        load_user(&client, "id", &id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("User {} vanished after insert", id)))
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> ApiResult<Option<UserWithRoles>> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let updated = tx
            .execute(
                "UPDATE users SET
                     email = COALESCE($2, email),
                     real_name = COALESCE($3, real_name),
                     status = COALESCE($4, status),
                     password_hash = COALESCE($5, password_hash),
                     updated_at = NOW()
                 WHERE id = $1",
                &[&id, &changes.email, &changes.real_name, &changes.status, &changes.password_hash],
            )
            .await
            .map_err(map_user_write_error)?;
        if updated == 0 {
            return Ok(None);
        }

        if let Some(role_ids) = &changes.role_ids {
            tx.execute("DELETE FROM user_roles WHERE user_id = $1", &[&id]).await?;
            tx.execute(
                "INSERT INTO user_roles (user_id, role_id) SELECT $1, UNNEST($2::bigint[]) ON CONFLICT DO NOTHING",
                &[&id, role_ids],
            )
            .await
            .map_err(|e| map_write_error(e, "用户名已存在"))?;
        }
        tx.commit().await?;

        load_user(&client, "id", &id).await
    }

    async fn delete_user(&self, id: i64) -> ApiResult<bool> {
        let client = self.client().await?;
        let deleted = client
            .execute("DELETE FROM users WHERE id = $1", &[&id])
            .await
            .map_err(|e| map_delete_error(e, "该用户已被任务引用，无法删除"))?;
        Ok(deleted > 0)
    }

    async fn touch_login(&self, id: i64, at: DateTime<Utc>) -> ApiResult<()> {
        let client = self.client().await?;
        client
            .execute("UPDATE users SET last_login_at = $2 WHERE id = $1", &[&id, &at])
            .await?;
        Ok(())
    }

    async fn permissions_of(&self, user_id: i64) -> ApiResult<Vec<Permission>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT DISTINCT p.id, p.code, p.name, p.module, p.action, p.description
                 FROM user_roles ur
                 JOIN roles r ON r.id = ur.role_id AND r.status = $2
                 JOIN role_permissions rp ON rp.role_id = r.id
                 JOIN permissions p ON p.id = rp.permission_id
                 WHERE ur.user_id = $1
                 ORDER BY p.module, p.code",
                &[&user_id, &STATUS_ENABLED],
            )
            .await?;
        Ok(rows.iter().map(permission_from_row).collect())
    }
}

#[async_trait]
impl RoleRepository for PgStore {
    async fn list_roles(&self, filter: &RoleFilter, page: PageRequest) -> ApiResult<(Vec<RoleWithPermissions>, i64)> {
        let client = self.client().await?;
        let keyword = like_pattern(filter.keyword.as_deref());
        let condition = "($1::text IS NULL OR code ILIKE $1 OR name ILIKE $1)";

        let total: i64 = client
            .query_one(&format!("SELECT COUNT(*) FROM roles WHERE {}", condition), &[&keyword])
            .await?
            .get(0);
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM roles WHERE {} ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
                    ROLE_COLUMNS, condition
                ),
                &[&keyword, &page.limit(), &page.offset()],
            )
            .await?;

        let roles = rows.iter().map(role_from_row).collect();
        Ok((with_permissions(&client, roles).await?, total))
    }

    async fn find_role(&self, id: i64) -> ApiResult<Option<RoleWithPermissions>> {
        let client = self.client().await?;
        load_role(&client, id).await
    }

    async fn create_role(&self, request: &CreateRoleRequest) -> ApiResult<RoleWithPermissions> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let id: i64 = tx
            .query_one(
                "INSERT INTO roles (code, name, description) VALUES ($1, $2, $3) RETURNING id",
                &[&request.code, &request.name, &request.description],
            )
            .await
            .map_err(|e| map_write_error(e, "角色编码已存在"))?
            .get(0);
        tx.execute(
            "INSERT INTO role_permissions (role_id, permission_id) SELECT $1, UNNEST($2::bigint[]) ON CONFLICT DO NOTHING",
            &[&id, &request.permission_ids],
        )
        .await
        .map_err(|e| map_write_error(e, "角色编码已存在"))?;
        tx.commit().await?;

        load_role(&client, id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Role {} vanished after insert", id)))
    }

    async fn update_role(&self, id: i64, request: &UpdateRoleRequest) -> ApiResult<Option<RoleWithPermissions>> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let updated = tx
            .execute(
                "UPDATE roles SET
                     name = COALESCE($2, name),
                     description = COALESCE($3, description),
                     status = COALESCE($4, status),
                     updated_at = NOW()
                 WHERE id = $1",
                &[&id, &request.name, &request.description, &request.status],
            )
            .await?;
        if updated == 0 {
            return Ok(None);
        }

        if let Some(permission_ids) = &request.permission_ids {
            tx.execute("DELETE FROM role_permissions WHERE role_id = $1", &[&id]).await?;
            tx.execute(
                "INSERT INTO role_permissions (role_id, permission_id) SELECT $1, UNNEST($2::bigint[]) ON CONFLICT DO NOTHING",
                &[&id, permission_ids],
            )
            .await
            .map_err(|e| map_write_error(e, "角色编码已存在"))?;
        }
        tx.commit().await?;

        load_role(&client, id).await
    }

    async fn delete_role(&self, id: i64) -> ApiResult<bool> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        if tx
            .query_opt("SELECT id FROM roles WHERE id = $1 FOR UPDATE", &[&id])
            .await?
            .is_none()
        {
            return Ok(false);
        }
        let holders: i64 = tx
            .query_one("SELECT COUNT(*) FROM user_roles WHERE role_id = $1", &[&id])
            .await?
            .get(0);
        if holders > 0 {
            return Err(AppError::BadRequest("该角色下还有用户，无法删除".to_string()));
        }

        tx.execute("DELETE FROM roles WHERE id = $1", &[&id])
            .await
            .map_err(|e| map_delete_error(e, "该角色下还有用户，无法删除"))?;
        tx.commit().await?;
        Ok(true)
    }

    async fn list_permissions(&self, module: Option<&str>) -> ApiResult<Vec<Permission>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT id, code, name, module, action, description FROM permissions
                 WHERE ($1::text IS NULL OR module = $1)
                 ORDER BY module, code",
                &[&module],
            )
            .await?;
        Ok(rows.iter().map(permission_from_row).collect())
    }
}

#[async_trait]
impl CatalogRepository for PgStore {
    async fn list_data_types(&self) -> ApiResult<Vec<DataType>> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT id, code, name, description, created_at FROM data_types ORDER BY code", &[])
            .await?;
        Ok(rows
            .iter()
            .map(|row| DataType {
                id: row.get("id"),
                code: row.get("code"),
                name: row.get("name"),
                description: row.get("description"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn list_format_rules(&self) -> ApiResult<Vec<FormatRule>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT id, code, name, pattern, description, created_at FROM format_rules ORDER BY code",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| FormatRule {
                id: row.get("id"),
                code: row.get("code"),
                name: row.get("name"),
                pattern: row.get("pattern"),
                description: row.get("description"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn list_rule_categories(&self) -> ApiResult<Vec<RuleCategory>> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT id, code, name, description, created_at FROM rule_categories ORDER BY code", &[])
            .await?;
        Ok(rows
            .iter()
            .map(|row| RuleCategory {
                id: row.get("id"),
                code: row.get("code"),
                name: row.get("name"),
                description: row.get("description"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn list_rule_templates(&self, rule_type: Option<RuleType>) -> ApiResult<Vec<RuleTemplate>> {
        let client = self.client().await?;
        let rule_type = rule_type.map(|t| t.as_str());
        let rows = client
            .query(
                "SELECT id, code, name, rule_type, template_expression, description, created_at
                 FROM rule_templates
                 WHERE ($1::text IS NULL OR rule_type = $1)
                 ORDER BY code",
                &[&rule_type],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| RuleTemplate {
                id: row.get("id"),
                code: row.get("code"),
                name: row.get("name"),
                rule_type: row.get("rule_type"),
                template_expression: row.get("template_expression"),
                description: row.get("description"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn list_data_element_categories(&self) -> ApiResult<Vec<DataElementCategory>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT id, code, name, parent_id, sort_order, description
                 FROM data_element_categories ORDER BY sort_order, id",
                &[],
            )
            .await?;
        debug!("Loaded {} data element categories", rows.len());
        Ok(rows
            .iter()
            .map(|row| DataElementCategory {
                id: row.get("id"),
                code: row.get("code"),
                name: row.get("name"),
                parent_id: row.get("parent_id"),
                sort_order: row.get("sort_order"),
                description: row.get("description"),
            })
            .collect())
    }
}
