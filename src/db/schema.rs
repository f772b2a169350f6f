//! Table definitions and reference data
//!
//! Statements are idempotent so the bootstrap can run on every start.

use crate::auth::password::hash_password;
use crate::error::ApiResult;
use crate::seed;
use deadpool_postgres::Object;
use tracing::{debug, info};

/// Tables in dependency order
const TABLES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        username VARCHAR(50) NOT NULL UNIQUE,
        password_hash VARCHAR(255) NOT NULL,
        email VARCHAR(100) UNIQUE,
        real_name VARCHAR(50),
        avatar TEXT,
        status SMALLINT NOT NULL DEFAULT 1,
        last_login_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS roles (
        id BIGSERIAL PRIMARY KEY,
        code VARCHAR(50) NOT NULL UNIQUE,
        name VARCHAR(100) NOT NULL,
        description TEXT,
        status SMALLINT NOT NULL DEFAULT 1,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS permissions (
        id BIGSERIAL PRIMARY KEY,
        code VARCHAR(100) NOT NULL UNIQUE,
        name VARCHAR(100) NOT NULL,
        module VARCHAR(50) NOT NULL,
        action VARCHAR(50) NOT NULL,
        description TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS user_roles (
        user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        role_id BIGINT NOT NULL REFERENCES roles(id) ON DELETE RESTRICT,
        PRIMARY KEY (user_id, role_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS role_permissions (
        role_id BIGINT NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        permission_id BIGINT NOT NULL REFERENCES permissions(id) ON DELETE CASCADE,
        PRIMARY KEY (role_id, permission_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS data_types (
        id BIGSERIAL PRIMARY KEY,
        code VARCHAR(50) NOT NULL UNIQUE,
        name VARCHAR(100) NOT NULL,
        description TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS format_rules (
        id BIGSERIAL PRIMARY KEY,
        code VARCHAR(50) NOT NULL UNIQUE,
        name VARCHAR(100) NOT NULL,
        pattern TEXT,
        description TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS rule_categories (
        id BIGSERIAL PRIMARY KEY,
        code VARCHAR(50) NOT NULL UNIQUE,
        name VARCHAR(100) NOT NULL,
        description TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS rule_templates (
        id BIGSERIAL PRIMARY KEY,
        code VARCHAR(50) NOT NULL UNIQUE,
        name VARCHAR(100) NOT NULL,
        rule_type VARCHAR(20) NOT NULL,
        template_expression TEXT,
        description TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS data_element_categories (
        id BIGSERIAL PRIMARY KEY,
        code VARCHAR(50) NOT NULL UNIQUE,
        name VARCHAR(100) NOT NULL,
        parent_id BIGINT REFERENCES data_element_categories(id) ON DELETE RESTRICT,
        sort_order INTEGER NOT NULL DEFAULT 0,
        description TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS data_elements (
        id BIGSERIAL PRIMARY KEY,
        code VARCHAR(50) NOT NULL UNIQUE,
        name VARCHAR(100) NOT NULL,
        description TEXT,
        data_type_id BIGINT REFERENCES data_types(id) ON DELETE RESTRICT,
        format_rule_id BIGINT REFERENCES format_rules(id) ON DELETE RESTRICT,
        length INTEGER,
        is_required BOOLEAN NOT NULL DEFAULT FALSE,
        default_value VARCHAR(255),
        value_range VARCHAR(255),
        business_rule TEXT,
        category_id BIGINT REFERENCES data_element_categories(id) ON DELETE RESTRICT,
        status SMALLINT NOT NULL DEFAULT 1,
        version INTEGER NOT NULL DEFAULT 1,
        created_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        updated_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS data_element_versions (
        id BIGSERIAL PRIMARY KEY,
        data_element_id BIGINT NOT NULL REFERENCES data_elements(id) ON DELETE CASCADE,
        version INTEGER NOT NULL,
        content JSONB NOT NULL,
        created_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS quality_rules (
        id BIGSERIAL PRIMARY KEY,
        code VARCHAR(50) NOT NULL UNIQUE,
        name VARCHAR(100) NOT NULL,
        description TEXT,
        rule_type VARCHAR(20) NOT NULL,
        data_source VARCHAR(100),
        table_name VARCHAR(100),
        field_name VARCHAR(100),
        rule_expression TEXT,
        severity VARCHAR(20) NOT NULL DEFAULT 'error',
        category_id BIGINT REFERENCES rule_categories(id) ON DELETE RESTRICT,
        status SMALLINT NOT NULL DEFAULT 1,
        version INTEGER NOT NULL DEFAULT 1,
        created_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        updated_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS quality_rule_versions (
        id BIGSERIAL PRIMARY KEY,
        quality_rule_id BIGINT NOT NULL REFERENCES quality_rules(id) ON DELETE CASCADE,
        version INTEGER NOT NULL,
        content JSONB NOT NULL,
        created_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS mapping_rules (
        id BIGSERIAL PRIMARY KEY,
        code VARCHAR(50) NOT NULL UNIQUE,
        name VARCHAR(100) NOT NULL,
        description TEXT,
        source_system VARCHAR(100) NOT NULL,
        source_table VARCHAR(100) NOT NULL,
        target_system VARCHAR(100) NOT NULL,
        target_table VARCHAR(100) NOT NULL,
        mapping_type VARCHAR(20) NOT NULL DEFAULT 'one_to_one',
        status SMALLINT NOT NULL DEFAULT 1,
        created_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        updated_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS field_mappings (
        id BIGSERIAL PRIMARY KEY,
        mapping_rule_id BIGINT NOT NULL REFERENCES mapping_rules(id) ON DELETE CASCADE,
        source_field VARCHAR(100) NOT NULL,
        target_field VARCHAR(100) NOT NULL,
        transform_expression TEXT,
        sort_order INTEGER NOT NULL DEFAULT 0
    )"#,
    r#"CREATE TABLE IF NOT EXISTS value_mappings (
        id BIGSERIAL PRIMARY KEY,
        mapping_rule_id BIGINT NOT NULL REFERENCES mapping_rules(id) ON DELETE CASCADE,
        source_value VARCHAR(255) NOT NULL,
        target_value VARCHAR(255) NOT NULL,
        description TEXT
    )"#,
    r#"CREATE TABLE IF NOT EXISTS external_data_sources (
        id BIGSERIAL PRIMARY KEY,
        code VARCHAR(50) NOT NULL UNIQUE,
        name VARCHAR(100) NOT NULL,
        description TEXT,
        source_type VARCHAR(20) NOT NULL,
        connection_config JSONB NOT NULL DEFAULT '{}'::jsonb,
        api_endpoint VARCHAR(255),
        api_key VARCHAR(255),
        status SMALLINT NOT NULL DEFAULT 1,
        created_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        updated_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sync_tasks (
        id BIGSERIAL PRIMARY KEY,
        code VARCHAR(50) NOT NULL UNIQUE,
        name VARCHAR(100) NOT NULL,
        description TEXT,
        sync_type VARCHAR(20) NOT NULL,
        source_id BIGINT NOT NULL REFERENCES external_data_sources(id) ON DELETE RESTRICT,
        target_type VARCHAR(50) NOT NULL,
        target_config JSONB NOT NULL DEFAULT '{}'::jsonb,
        sync_frequency VARCHAR(20) NOT NULL,
        cron_expression VARCHAR(100),
        sync_enabled BOOLEAN NOT NULL DEFAULT FALSE,
        sync_status VARCHAR(20) NOT NULL DEFAULT 'idle',
        last_sync_time TIMESTAMPTZ,
        sync_log TEXT,
        created_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        updated_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sync_records (
        id BIGSERIAL PRIMARY KEY,
        sync_task_id BIGINT NOT NULL REFERENCES sync_tasks(id) ON DELETE CASCADE,
        sync_status VARCHAR(20) NOT NULL,
        total_count INTEGER NOT NULL DEFAULT 0,
        success_count INTEGER NOT NULL DEFAULT 0,
        failed_count INTEGER NOT NULL DEFAULT 0,
        updated_count INTEGER NOT NULL DEFAULT 0,
        inserted_count INTEGER NOT NULL DEFAULT 0,
        sync_details JSONB NOT NULL DEFAULT '{}'::jsonb,
        error_message TEXT,
        duration_seconds INTEGER NOT NULL DEFAULT 0,
        sync_time TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS quality_checks (
        id BIGSERIAL PRIMARY KEY,
        code VARCHAR(50) NOT NULL UNIQUE,
        name VARCHAR(100) NOT NULL,
        description TEXT,
        quality_rule_id BIGINT REFERENCES quality_rules(id) ON DELETE SET NULL,
        data_element_id BIGINT REFERENCES data_elements(id) ON DELETE SET NULL,
        check_type VARCHAR(50),
        status VARCHAR(20) NOT NULL DEFAULT 'pending',
        last_check_time TIMESTAMPTZ,
        created_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        updated_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS quality_reports (
        id BIGSERIAL PRIMARY KEY,
        check_id BIGINT NOT NULL REFERENCES quality_checks(id) ON DELETE CASCADE,
        check_time TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        total_records INTEGER NOT NULL DEFAULT 0,
        error_records INTEGER NOT NULL DEFAULT 0,
        warning_records INTEGER NOT NULL DEFAULT 0,
        success_records INTEGER NOT NULL DEFAULT 0,
        error_rate DOUBLE PRECISION NOT NULL DEFAULT 0,
        warning_rate DOUBLE PRECISION NOT NULL DEFAULT 0,
        success_rate DOUBLE PRECISION NOT NULL DEFAULT 0,
        duration_seconds INTEGER NOT NULL DEFAULT 0,
        created_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS tasks (
        id BIGSERIAL PRIMARY KEY,
        code VARCHAR(50) NOT NULL UNIQUE,
        name VARCHAR(100) NOT NULL,
        description TEXT,
        task_type VARCHAR(20) NOT NULL,
        priority VARCHAR(10) NOT NULL DEFAULT 'medium',
        status VARCHAR(20) NOT NULL DEFAULT 'pending',
        related_data_element_id BIGINT REFERENCES data_elements(id) ON DELETE RESTRICT,
        related_quality_rule_id BIGINT REFERENCES quality_rules(id) ON DELETE RESTRICT,
        related_mapping_rule_id BIGINT REFERENCES mapping_rules(id) ON DELETE RESTRICT,
        plan_start_time TIMESTAMPTZ,
        plan_end_time TIMESTAMPTZ,
        actual_start_time TIMESTAMPTZ,
        actual_end_time TIMESTAMPTZ,
        review_comment TEXT,
        created_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        updated_by BIGINT REFERENCES users(id) ON DELETE SET NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS task_assignments (
        id BIGSERIAL PRIMARY KEY,
        task_id BIGINT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        assigned_to BIGINT NOT NULL REFERENCES users(id) ON DELETE RESTRICT,
        assigned_by BIGINT NOT NULL REFERENCES users(id) ON DELETE RESTRICT,
        status VARCHAR(20) NOT NULL DEFAULT 'pending',
        reject_reason TEXT,
        deadline TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS task_executions (
        id BIGSERIAL PRIMARY KEY,
        task_id BIGINT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
        executor_id BIGINT NOT NULL REFERENCES users(id) ON DELETE RESTRICT,
        status VARCHAR(20) NOT NULL,
        start_time TIMESTAMPTZ NOT NULL,
        end_time TIMESTAMPTZ,
        execution_log TEXT,
        result_summary TEXT,
        processed_count INTEGER NOT NULL DEFAULT 0,
        success_count INTEGER NOT NULL DEFAULT 0,
        failed_count INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_user_roles_role_id ON user_roles(role_id)",
    "CREATE INDEX IF NOT EXISTS idx_data_elements_category_id ON data_elements(category_id)",
    "CREATE INDEX IF NOT EXISTS idx_data_element_versions_element ON data_element_versions(data_element_id, version DESC)",
    "CREATE INDEX IF NOT EXISTS idx_quality_rule_versions_rule ON quality_rule_versions(quality_rule_id, version DESC)",
    "CREATE INDEX IF NOT EXISTS idx_field_mappings_rule ON field_mappings(mapping_rule_id)",
    "CREATE INDEX IF NOT EXISTS idx_value_mappings_rule ON value_mappings(mapping_rule_id)",
    "CREATE INDEX IF NOT EXISTS idx_sync_tasks_source_id ON sync_tasks(source_id)",
    "CREATE INDEX IF NOT EXISTS idx_sync_records_task ON sync_records(sync_task_id, sync_time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_quality_reports_check ON quality_reports(check_id, check_time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
    "CREATE INDEX IF NOT EXISTS idx_task_assignments_task ON task_assignments(task_id)",
    "CREATE INDEX IF NOT EXISTS idx_task_executions_task ON task_executions(task_id)",
];

/// Create every table and index that does not exist yet
pub async fn create_tables(client: &Object) -> ApiResult<()> {
    for statement in TABLES.iter().chain(INDEXES) {
        client.batch_execute(statement).await?;
    }
    info!("Database tables initialized");
    Ok(())
}

/// Insert the reference data and the `admin` account when missing.
///
/// Seeded roles only receive their default grants when the role row is
/// created, so later edits made through the API survive a restart.
pub async fn seed(client: &Object, admin_password: &str) -> ApiResult<()> {
    for p in seed::PERMISSIONS {
        client
            .execute(
                "INSERT INTO permissions (code, name, module, action) VALUES ($1, $2, $3, $4)
                 ON CONFLICT (code) DO NOTHING",
                &[&p.code, &p.name, &p.module, &p.action],
            )
            .await?;
    }

    for role in seed::ROLES {
        let inserted = client
            .query_opt(
                "INSERT INTO roles (code, name, description) VALUES ($1, $2, $3)
                 ON CONFLICT (code) DO NOTHING RETURNING id",
                &[&role.code, &role.name, &role.description],
            )
            .await?;
        let Some(row) = inserted else {
            continue;
        };
        let role_id: i64 = row.get(0);
        let granted: Vec<&str> = seed::PERMISSIONS
            .iter()
            .filter(|p| (role.grants)(p))
            .map(|p| p.code)
            .collect();
        client
            .execute(
                "INSERT INTO role_permissions (role_id, permission_id)
                 SELECT $1, id FROM permissions WHERE code = ANY($2)",
                &[&role_id, &granted],
            )
            .await?;
        debug!("Seeded role {} with {} permissions", role.code, granted.len());
    }

    for (code, name, description) in seed::DATA_TYPES {
        client
            .execute(
                "INSERT INTO data_types (code, name, description) VALUES ($1, $2, $3)
                 ON CONFLICT (code) DO NOTHING",
                &[code, name, description],
            )
            .await?;
    }

    for (code, name, pattern, description) in seed::FORMAT_RULES {
        client
            .execute(
                "INSERT INTO format_rules (code, name, pattern, description) VALUES ($1, $2, $3, $4)
                 ON CONFLICT (code) DO NOTHING",
                &[code, name, pattern, description],
            )
            .await?;
    }

    for (code, name, description) in seed::RULE_CATEGORIES {
        client
            .execute(
                "INSERT INTO rule_categories (code, name, description) VALUES ($1, $2, $3)
                 ON CONFLICT (code) DO NOTHING",
                &[code, name, description],
            )
            .await?;
    }

    for (code, name, rule_type, expression, description) in seed::RULE_TEMPLATES {
        client
            .execute(
                "INSERT INTO rule_templates (code, name, rule_type, template_expression, description)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (code) DO NOTHING",
                &[code, name, rule_type, expression, description],
            )
            .await?;
    }

    for (code, name, parent, sort_order) in seed::DATA_ELEMENT_CATEGORIES {
        client
            .execute(
                "INSERT INTO data_element_categories (code, name, parent_id, sort_order)
                 VALUES ($1, $2, (SELECT id FROM data_element_categories WHERE code = $3), $4)
                 ON CONFLICT (code) DO NOTHING",
                &[code, name, parent, sort_order],
            )
            .await?;
    }

    let admin_exists = client
        .query_opt("SELECT id FROM users WHERE username = $1", &[&seed::ADMIN_USERNAME])
        .await?
        .is_some();
    if !admin_exists {
        let password_hash = hash_password(admin_password)?;
        client
            .execute(
                "WITH admin AS (
                     INSERT INTO users (username, password_hash, real_name) VALUES ($1, $2, '系统管理员')
                     ON CONFLICT (username) DO NOTHING RETURNING id
                 )
                 INSERT INTO user_roles (user_id, role_id)
                 SELECT admin.id, roles.id FROM admin, roles WHERE roles.code = $3",
                &[&seed::ADMIN_USERNAME, &password_hash, &seed::ADMIN_ROLE],
            )
            .await?;
        info!("Created bootstrap account '{}'", seed::ADMIN_USERNAME);
    }

    Ok(())
}
