//! In-memory storage backend
//!
//! Every table lives inside one `RwLock`, so each repository call holds the
//! write lock for its whole read-check-write sequence. That gives the same
//! atomicity the Postgres backend gets from transactions.

mod registries;
mod tasks;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{conflict_error, ApiResult, AppError};
use crate::models::*;
use crate::repository::{CatalogRepository, RoleRepository, UserRepository};
use crate::seed;

#[derive(Default)]
struct MemoryData {
    next_id: i64,
    users: Vec<User>,
    /// `(user_id, role_id)`
    user_roles: Vec<(i64, i64)>,
    roles: Vec<Role>,
    permissions: Vec<Permission>,
    /// `(role_id, permission_id)`
    role_permissions: Vec<(i64, i64)>,
    data_types: Vec<DataType>,
    format_rules: Vec<FormatRule>,
    rule_categories: Vec<RuleCategory>,
    rule_templates: Vec<RuleTemplate>,
    categories: Vec<DataElementCategory>,
    data_elements: Vec<DataElement>,
    data_element_versions: Vec<EntityVersion>,
    quality_rules: Vec<QualityRule>,
    quality_rule_versions: Vec<EntityVersion>,
    mapping_rules: Vec<MappingRule>,
    field_mappings: Vec<FieldMapping>,
    value_mappings: Vec<ValueMapping>,
    data_sources: Vec<ExternalDataSource>,
    sync_tasks: Vec<SyncTask>,
    sync_records: Vec<SyncRecord>,
    quality_checks: Vec<QualityCheck>,
    quality_reports: Vec<QualityReport>,
    tasks: Vec<Task>,
    assignments: Vec<TaskAssignment>,
    executions: Vec<TaskExecution>,
}

impl MemoryData {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn user_with_roles(&self, user: &User) -> UserWithRoles {
        let roles = self
            .roles
            .iter()
            .filter(|r| self.user_roles.contains(&(user.id, r.id)))
            .cloned()
            .collect();
        UserWithRoles {
            user: user.clone(),
            roles,
        }
    }

    fn role_with_permissions(&self, role: &Role) -> RoleWithPermissions {
        let permissions = self
            .permissions
            .iter()
            .filter(|p| self.role_permissions.contains(&(role.id, p.id)))
            .cloned()
            .collect();
        RoleWithPermissions {
            role: role.clone(),
            permissions,
        }
    }

    fn ensure_roles_exist(&self, role_ids: &[i64]) -> ApiResult<()> {
        if role_ids.iter().all(|id| self.roles.iter().any(|r| r.id == *id)) {
            Ok(())
        } else {
            Err(missing_reference())
        }
    }

    fn ensure_permissions_exist(&self, permission_ids: &[i64]) -> ApiResult<()> {
        if permission_ids
            .iter()
            .all(|id| self.permissions.iter().any(|p| p.id == *id))
        {
            Ok(())
        } else {
            Err(missing_reference())
        }
    }

    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.users
            .iter()
            .any(|u| u.email.as_deref() == Some(email) && Some(u.id) != except)
    }

    fn seed(&mut self, admin_password_hash: &str) {
        let now = Utc::now();

        for p in seed::PERMISSIONS {
            let id = self.next_id();
            self.permissions.push(Permission {
                id,
                code: p.code.to_string(),
                name: p.name.to_string(),
                module: p.module.to_string(),
                action: p.action.to_string(),
                description: None,
            });
        }

        for r in seed::ROLES {
            let id = self.next_id();
            self.roles.push(Role {
                id,
                code: r.code.to_string(),
                name: r.name.to_string(),
                description: Some(r.description.to_string()),
                status: STATUS_ENABLED,
                created_at: now,
                updated_at: now,
            });
            for (p, permission) in seed::PERMISSIONS.iter().zip(self.permissions.clone()) {
                if (r.grants)(p) {
                    self.role_permissions.push((id, permission.id));
                }
            }
        }

        for (code, name, description) in seed::DATA_TYPES {
            let id = self.next_id();
            self.data_types.push(DataType {
                id,
                code: code.to_string(),
                name: name.to_string(),
                description: Some(description.to_string()),
                created_at: now,
            });
        }

        for (code, name, pattern, description) in seed::FORMAT_RULES {
            let id = self.next_id();
            self.format_rules.push(FormatRule {
                id,
                code: code.to_string(),
                name: name.to_string(),
                pattern: Some(pattern.to_string()),
                description: Some(description.to_string()),
                created_at: now,
            });
        }

        for (code, name, description) in seed::RULE_CATEGORIES {
            let id = self.next_id();
            self.rule_categories.push(RuleCategory {
                id,
                code: code.to_string(),
                name: name.to_string(),
                description: Some(description.to_string()),
                created_at: now,
            });
        }

        for (code, name, rule_type, expression, description) in seed::RULE_TEMPLATES {
            let Ok(rule_type) = rule_type.parse::<RuleType>() else {
                continue;
            };
            let id = self.next_id();
            self.rule_templates.push(RuleTemplate {
                id,
                code: code.to_string(),
                name: name.to_string(),
                rule_type,
                template_expression: Some(expression.to_string()),
                description: Some(description.to_string()),
                created_at: now,
            });
        }

        for (code, name, parent, sort_order) in seed::DATA_ELEMENT_CATEGORIES {
            let parent_id = parent.and_then(|p| self.categories.iter().find(|c| c.code == p).map(|c| c.id));
            let id = self.next_id();
            self.categories.push(DataElementCategory {
                id,
                code: code.to_string(),
                name: name.to_string(),
                parent_id,
                sort_order: *sort_order,
                description: None,
            });
        }

        let admin_id = self.next_id();
        self.users.push(User {
            id: admin_id,
            username: seed::ADMIN_USERNAME.to_string(),
            password_hash: admin_password_hash.to_string(),
            email: None,
            real_name: Some("系统管理员".to_string()),
            avatar: None,
            status: STATUS_ENABLED,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        });
        if let Some(admin_role) = self.roles.iter().find(|r| r.code == seed::ADMIN_ROLE) {
            self.user_roles.push((admin_id, admin_role.id));
        }
    }
}

/// Storage backend keeping every table in process memory
pub struct MemoryStore {
    data: RwLock<MemoryData>,
}

impl MemoryStore {
    /// Empty store without reference data
    pub fn new() -> Self {
        Self {
            data: RwLock::new(MemoryData::default()),
        }
    }

    /// Store loaded with the reference data and the `admin` account
    pub fn seeded(admin_password_hash: &str) -> Self {
        let mut data = MemoryData::default();
        data.seed(admin_password_hash);
        debug!(
            "Seeded memory store with {} permissions and {} roles",
            data.permissions.len(),
            data.roles.len()
        );
        Self {
            data: RwLock::new(data),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn missing_reference() -> AppError {
    AppError::BadRequest("关联数据不存在".to_string())
}

/// Sort newest first by `(created_at, id)` and cut out the requested page
fn page_newest_first<T: Clone>(
    rows: Vec<&T>,
    key: impl Fn(&T) -> (DateTime<Utc>, i64),
    page: PageRequest,
) -> (Vec<T>, i64) {
    let mut rows: Vec<T> = rows.into_iter().cloned().collect();
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
    page.slice(rows)
}

/// Newest first, at most `limit` rows
fn latest<T: Clone>(rows: Vec<&T>, key: impl Fn(&T) -> (DateTime<Utc>, i64), limit: i64) -> Vec<T> {
    page_newest_first(rows, key, PageRequest { page: 1, page_size: limit.max(0) }).0
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn list_users(&self, filter: &UserFilter, page: PageRequest) -> ApiResult<(Vec<UserWithRoles>, i64)> {
        let data = self.data.read().await;
        let rows = data
            .users
            .iter()
            .filter(|u| {
                filter.keyword.as_deref().map_or(true, |k| {
                    contains_keyword(&u.username, k)
                        || u.real_name.as_deref().map_or(false, |n| contains_keyword(n, k))
                        || u.email.as_deref().map_or(false, |e| contains_keyword(e, k))
                })
            })
            .collect();
        let (users, total) = page_newest_first(rows, |u: &User| (u.created_at, u.id), page);
        Ok((users.iter().map(|u| data.user_with_roles(u)).collect(), total))
    }

    async fn find_user(&self, id: i64) -> ApiResult<Option<UserWithRoles>> {
        let data = self.data.read().await;
        Ok(data.users.iter().find(|u| u.id == id).map(|u| data.user_with_roles(u)))
    }

    async fn find_user_by_username(&self, username: &str) -> ApiResult<Option<UserWithRoles>> {
        let data = self.data.read().await;
        Ok(data
            .users
            .iter()
            .find(|u| u.username == username)
            .map(|u| data.user_with_roles(u)))
    }

    async fn create_user(&self, user: NewUser) -> ApiResult<UserWithRoles> {
        let mut data = self.data.write().await;
        if data.users.iter().any(|u| u.username == user.username) {
            return Err(conflict_error("用户名已存在"));
        }
        if let Some(email) = &user.email {
            if data.email_taken(email, None) {
                return Err(conflict_error("邮箱已被使用"));
            }
        }
        data.ensure_roles_exist(&user.role_ids)?;

        let now = Utc::now();
        let id = data.next_id();
        let created = User {
            id,
            username: user.username,
            password_hash: user.password_hash,
            email: user.email,
            real_name: user.real_name,
            avatar: None,
            status: STATUS_ENABLED,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        data.users.push(created.clone());
        let role_ids: HashSet<i64> = user.role_ids.into_iter().collect();
        data.user_roles.extend(role_ids.into_iter().map(|role_id| (id, role_id)));
        Ok(data.user_with_roles(&created))
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> ApiResult<Option<UserWithRoles>> {
        let mut data = self.data.write().await;
        let Some(index) = data.users.iter().position(|u| u.id == id) else {
            return Ok(None);
        };
        if let Some(email) = &changes.email {
            if data.email_taken(email, Some(id)) {
                return Err(conflict_error("邮箱已被使用"));
            }
        }
        if let Some(role_ids) = &changes.role_ids {
            data.ensure_roles_exist(role_ids)?;
        }

        let user = &mut data.users[index];
        if changes.email.is_some() {
            user.email = changes.email;
        }
        if changes.real_name.is_some() {
            user.real_name = changes.real_name;
        }
        if let Some(status) = changes.status {
            user.status = status;
        }
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        user.updated_at = Utc::now();

        if let Some(role_ids) = changes.role_ids {
            data.user_roles.retain(|(user_id, _)| *user_id != id);
            let role_ids: HashSet<i64> = role_ids.into_iter().collect();
            data.user_roles.extend(role_ids.into_iter().map(|role_id| (id, role_id)));
        }

        let user = data.users[index].clone();
        Ok(Some(data.user_with_roles(&user)))
    }

    async fn delete_user(&self, id: i64) -> ApiResult<bool> {
        let mut data = self.data.write().await;
        let Some(index) = data.users.iter().position(|u| u.id == id) else {
            return Ok(false);
        };
        let referenced = data
            .assignments
            .iter()
            .any(|a| a.assigned_to == id || a.assigned_by == id)
            || data.executions.iter().any(|e| e.executor_id == id);
        if referenced {
            return Err(AppError::BadRequest("该用户已被任务引用，无法删除".to_string()));
        }
        data.users.remove(index);
        data.user_roles.retain(|(user_id, _)| *user_id != id);
        Ok(true)
    }

    async fn touch_login(&self, id: i64, at: DateTime<Utc>) -> ApiResult<()> {
        let mut data = self.data.write().await;
        if let Some(user) = data.users.iter_mut().find(|u| u.id == id) {
            user.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn permissions_of(&self, user_id: i64) -> ApiResult<Vec<Permission>> {
        let data = self.data.read().await;
        let role_ids: HashSet<i64> = data
            .user_roles
            .iter()
            .filter(|(uid, _)| *uid == user_id)
            .map(|(_, rid)| *rid)
            .filter(|rid| {
                data.roles
                    .iter()
                    .any(|r| r.id == *rid && r.status == STATUS_ENABLED)
            })
            .collect();
        let permission_ids: HashSet<i64> = data
            .role_permissions
            .iter()
            .filter(|(rid, _)| role_ids.contains(rid))
            .map(|(_, pid)| *pid)
            .collect();
        let mut permissions: Vec<Permission> = data
            .permissions
            .iter()
            .filter(|p| permission_ids.contains(&p.id))
            .cloned()
            .collect();
        permissions.sort_by(|a, b| (&a.module, &a.code).cmp(&(&b.module, &b.code)));
        Ok(permissions)
    }
}

#[async_trait]
impl RoleRepository for MemoryStore {
    async fn list_roles(&self, filter: &RoleFilter, page: PageRequest) -> ApiResult<(Vec<RoleWithPermissions>, i64)> {
        let data = self.data.read().await;
        let rows = data
            .roles
            .iter()
            .filter(|r| {
                filter
                    .keyword
                    .as_deref()
                    .map_or(true, |k| contains_keyword(&r.code, k) || contains_keyword(&r.name, k))
            })
            .collect();
        let (roles, total) = page_newest_first(rows, |r: &Role| (r.created_at, r.id), page);
        Ok((roles.iter().map(|r| data.role_with_permissions(r)).collect(), total))
    }

    async fn find_role(&self, id: i64) -> ApiResult<Option<RoleWithPermissions>> {
        let data = self.data.read().await;
        Ok(data
            .roles
            .iter()
            .find(|r| r.id == id)
            .map(|r| data.role_with_permissions(r)))
    }

    async fn create_role(&self, request: &CreateRoleRequest) -> ApiResult<RoleWithPermissions> {
        let mut data = self.data.write().await;
        if data.roles.iter().any(|r| r.code == request.code) {
            return Err(conflict_error("角色编码已存在"));
        }
        data.ensure_permissions_exist(&request.permission_ids)?;

        let now = Utc::now();
        let id = data.next_id();
        let role = Role {
            id,
            code: request.code.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            status: STATUS_ENABLED,
            created_at: now,
            updated_at: now,
        };
        data.roles.push(role.clone());
        let permission_ids: HashSet<i64> = request.permission_ids.iter().copied().collect();
        data.role_permissions
            .extend(permission_ids.into_iter().map(|pid| (id, pid)));
        Ok(data.role_with_permissions(&role))
    }

    async fn update_role(&self, id: i64, request: &UpdateRoleRequest) -> ApiResult<Option<RoleWithPermissions>> {
        let mut data = self.data.write().await;
        let Some(index) = data.roles.iter().position(|r| r.id == id) else {
            return Ok(None);
        };
        if let Some(permission_ids) = &request.permission_ids {
            data.ensure_permissions_exist(permission_ids)?;
        }

        let role = &mut data.roles[index];
        if let Some(name) = &request.name {
            role.name = name.clone();
        }
        if request.description.is_some() {
            role.description = request.description.clone();
        }
        if let Some(status) = request.status {
            role.status = status;
        }
        role.updated_at = Utc::now();

        if let Some(permission_ids) = &request.permission_ids {
            data.role_permissions.retain(|(rid, _)| *rid != id);
            let permission_ids: HashSet<i64> = permission_ids.iter().copied().collect();
            data.role_permissions
                .extend(permission_ids.into_iter().map(|pid| (id, pid)));
        }

        let role = data.roles[index].clone();
        Ok(Some(data.role_with_permissions(&role)))
    }

    async fn delete_role(&self, id: i64) -> ApiResult<bool> {
        let mut data = self.data.write().await;
        let Some(index) = data.roles.iter().position(|r| r.id == id) else {
            return Ok(false);
        };
        if data.user_roles.iter().any(|(_, rid)| *rid == id) {
            return Err(AppError::BadRequest("该角色下还有用户，无法删除".to_string()));
        }
        data.roles.remove(index);
        data.role_permissions.retain(|(rid, _)| *rid != id);
        Ok(true)
    }

    async fn list_permissions(&self, module: Option<&str>) -> ApiResult<Vec<Permission>> {
        let data = self.data.read().await;
        let mut permissions: Vec<Permission> = data
            .permissions
            .iter()
            .filter(|p| module.map_or(true, |m| p.module == m))
            .cloned()
            .collect();
        permissions.sort_by(|a, b| (&a.module, &a.code).cmp(&(&b.module, &b.code)));
        Ok(permissions)
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn list_data_types(&self) -> ApiResult<Vec<DataType>> {
        let mut rows = self.data.read().await.data_types.clone();
        rows.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(rows)
    }

    async fn list_format_rules(&self) -> ApiResult<Vec<FormatRule>> {
        let mut rows = self.data.read().await.format_rules.clone();
        rows.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(rows)
    }

    async fn list_rule_categories(&self) -> ApiResult<Vec<RuleCategory>> {
        let mut rows = self.data.read().await.rule_categories.clone();
        rows.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(rows)
    }

    async fn list_rule_templates(&self, rule_type: Option<RuleType>) -> ApiResult<Vec<RuleTemplate>> {
        let data = self.data.read().await;
        let mut rows: Vec<RuleTemplate> = data
            .rule_templates
            .iter()
            .filter(|t| rule_type.map_or(true, |rt| t.rule_type == rt))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(rows)
    }

    async fn list_data_element_categories(&self) -> ApiResult<Vec<DataElementCategory>> {
        Ok(self.data.read().await.categories.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn new_user(username: &str, email: Option<&str>) -> NewUser {
        NewUser {
            username: username.to_string(),
            password_hash: "hash".to_string(),
            email: email.map(str::to_string),
            real_name: None,
            role_ids: vec![],
        }
    }

    #[tokio::test]
    async fn test_seeded_admin_holds_every_permission() {
        let store = MemoryStore::seeded("hash");
        let admin = store.find_user_by_username("admin").await.unwrap().unwrap();
        assert_eq!(admin.role_codes(), vec!["admin".to_string()]);

        let permissions = store.permissions_of(admin.user.id).await.unwrap();
        assert_eq!(permissions.len(), seed::PERMISSIONS.len());
    }

    #[tokio::test]
    async fn test_duplicate_username_and_email_conflict() {
        let store = MemoryStore::new();
        store.create_user(new_user("alice", Some("a@example.com"))).await.unwrap();

        let err = store.create_user(new_user("alice", None)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == "用户名已存在"));

        let err = store
            .create_user(new_user("bob", Some("a@example.com")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == "邮箱已被使用"));

        let (users, total) = store
            .list_users(&UserFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(users[0].user.username, "alice");
    }

    #[tokio::test]
    async fn test_role_with_users_cannot_be_deleted() {
        let store = MemoryStore::seeded("hash");
        let admin_role = store
            .list_roles(&RoleFilter { keyword: Some("admin".into()) }, PageRequest::default())
            .await
            .unwrap()
            .0
            .remove(0);

        let err = store.delete_role(admin_role.role.id).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "该角色下还有用户，无法删除"));
        assert!(store.find_role(admin_role.role.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_user_replaces_role_links() {
        let store = MemoryStore::seeded("hash");
        let (roles, _) = store
            .list_roles(&RoleFilter::default(), PageRequest::default())
            .await
            .unwrap();
        let viewer = roles.iter().find(|r| r.role.code == "viewer").unwrap().role.id;
        let steward = roles.iter().find(|r| r.role.code == "data_steward").unwrap().role.id;

        let mut user = new_user("carol", None);
        user.role_ids = vec![viewer];
        let created = store.create_user(user).await.unwrap();

        let updated = store
            .update_user(
                created.user.id,
                UserChanges {
                    role_ids: Some(vec![steward]),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.role_codes(), vec!["data_steward".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_role_id_is_rejected() {
        let store = MemoryStore::new();
        let mut user = new_user("dave", None);
        user.role_ids = vec![999];
        let err = store.create_user(user).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn test_page_newest_first_orders_by_creation() {
        let now = Utc::now();
        let rows = vec![(now, 1), (now, 3), (now - chrono::Duration::seconds(5), 2)];
        let (page, total) = page_newest_first(rows.iter().collect(), |r: &(DateTime<Utc>, i64)| *r, PageRequest::default());
        assert_eq!(total, 3);
        assert_eq!(page.iter().map(|r| r.1).collect::<Vec<_>>(), vec![3, 1, 2]);
    }
}
