use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::{Client, Row};

use super::{like_pattern, map_delete_error, PgStore};
use crate::error::{map_write_error, ApiResult, AppError};
use crate::models::*;
use crate::repository::{
    snapshot, DataElementRepository, DataSourceRepository, MappingRuleRepository, QualityCheckRepository,
    QualityRuleRepository, SyncTaskRepository,
};

const DATA_ELEMENT_COLUMNS: &str = "id, code, name, description, data_type_id, format_rule_id, length, \
    is_required, default_value, value_range, business_rule, category_id, status, version, \
    created_by, updated_by, created_at, updated_at";

const QUALITY_RULE_COLUMNS: &str = "id, code, name, description, rule_type, data_source, table_name, \
    field_name, rule_expression, severity, category_id, status, version, \
    created_by, updated_by, created_at, updated_at";

const MAPPING_RULE_COLUMNS: &str = "id, code, name, description, source_system, source_table, \
    target_system, target_table, mapping_type, status, created_by, updated_by, created_at, updated_at";

const DATA_SOURCE_COLUMNS: &str = "id, code, name, description, source_type, connection_config, \
    api_endpoint, api_key, status, created_by, updated_by, created_at, updated_at";

const SYNC_TASK_COLUMNS: &str = "id, code, name, description, sync_type, source_id, target_type, \
    target_config, sync_frequency, cron_expression, sync_enabled, sync_status, last_sync_time, \
    sync_log, created_by, updated_by, created_at, updated_at";

const SYNC_RECORD_COLUMNS: &str = "id, sync_task_id, sync_status, total_count, success_count, \
    failed_count, updated_count, inserted_count, sync_details, error_message, duration_seconds, sync_time";

const QUALITY_CHECK_COLUMNS: &str = "id, code, name, description, quality_rule_id, data_element_id, \
    check_type, status, last_check_time, created_by, updated_by, created_at, updated_at";

const QUALITY_REPORT_COLUMNS: &str = "id, check_id, check_time, total_records, error_records, \
    warning_records, success_records, error_rate, warning_rate, success_rate, duration_seconds, \
    created_by, created_at";

fn data_element_from_row(row: &Row) -> DataElement {
    DataElement {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        description: row.get("description"),
        data_type_id: row.get("data_type_id"),
        format_rule_id: row.get("format_rule_id"),
        length: row.get("length"),
        is_required: row.get("is_required"),
        default_value: row.get("default_value"),
        value_range: row.get("value_range"),
        business_rule: row.get("business_rule"),
        category_id: row.get("category_id"),
        status: row.get("status"),
        version: row.get("version"),
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn quality_rule_from_row(row: &Row) -> QualityRule {
    QualityRule {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        description: row.get("description"),
        rule_type: row.get("rule_type"),
        data_source: row.get("data_source"),
        table_name: row.get("table_name"),
        field_name: row.get("field_name"),
        rule_expression: row.get("rule_expression"),
        severity: row.get("severity"),
        category_id: row.get("category_id"),
        status: row.get("status"),
        version: row.get("version"),
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn version_from_row(row: &Row) -> EntityVersion {
    EntityVersion {
        id: row.get("id"),
        entity_id: row.get("entity_id"),
        version: row.get("version"),
        content: row.get("content"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
    }
}

fn mapping_rule_from_row(row: &Row) -> MappingRule {
    MappingRule {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        description: row.get("description"),
        source_system: row.get("source_system"),
        source_table: row.get("source_table"),
        target_system: row.get("target_system"),
        target_table: row.get("target_table"),
        mapping_type: row.get("mapping_type"),
        status: row.get("status"),
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn data_source_from_row(row: &Row) -> ExternalDataSource {
    ExternalDataSource {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        description: row.get("description"),
        source_type: row.get("source_type"),
        connection_config: row.get("connection_config"),
        api_endpoint: row.get("api_endpoint"),
        api_key: row.get("api_key"),
        status: row.get("status"),
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn sync_task_from_row(row: &Row) -> SyncTask {
    SyncTask {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        description: row.get("description"),
        sync_type: row.get("sync_type"),
        source_id: row.get("source_id"),
        target_type: row.get("target_type"),
        target_config: row.get("target_config"),
        sync_frequency: row.get("sync_frequency"),
        cron_expression: row.get("cron_expression"),
        sync_enabled: row.get("sync_enabled"),
        sync_status: row.get("sync_status"),
        last_sync_time: row.get("last_sync_time"),
        sync_log: row.get("sync_log"),
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn sync_record_from_row(row: &Row) -> SyncRecord {
    SyncRecord {
        id: row.get("id"),
        sync_task_id: row.get("sync_task_id"),
        sync_status: row.get("sync_status"),
        total_count: row.get("total_count"),
        success_count: row.get("success_count"),
        failed_count: row.get("failed_count"),
        updated_count: row.get("updated_count"),
        inserted_count: row.get("inserted_count"),
        sync_details: row.get("sync_details"),
        error_message: row.get("error_message"),
        duration_seconds: row.get("duration_seconds"),
        sync_time: row.get("sync_time"),
    }
}

fn quality_check_from_row(row: &Row) -> QualityCheck {
    QualityCheck {
        id: row.get("id"),
        code: row.get("code"),
        name: row.get("name"),
        description: row.get("description"),
        quality_rule_id: row.get("quality_rule_id"),
        data_element_id: row.get("data_element_id"),
        check_type: row.get("check_type"),
        status: row.get("status"),
        last_check_time: row.get("last_check_time"),
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn quality_report_from_row(row: &Row) -> QualityReport {
    QualityReport {
        id: row.get("id"),
        check_id: row.get("check_id"),
        check_time: row.get("check_time"),
        total_records: row.get("total_records"),
        error_records: row.get("error_records"),
        warning_records: row.get("warning_records"),
        success_records: row.get("success_records"),
        error_rate: row.get("error_rate"),
        warning_rate: row.get("warning_rate"),
        success_rate: row.get("success_rate"),
        duration_seconds: row.get("duration_seconds"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
    }
}

/// Lock a row, refuse the delete while `guard_sql` counts dependents, then delete it.
/// Returns `Ok(false)` when the row does not exist.
async fn guarded_delete(
    client: &mut Client,
    table: &str,
    id: i64,
    guard_sql: &str,
    guard_msg: &str,
) -> ApiResult<bool> {
    let tx = client.transaction().await?;
    let lock = format!("SELECT id FROM {} WHERE id = $1 FOR UPDATE", table);
    if tx.query_opt(&lock, &[&id]).await?.is_none() {
        return Ok(false);
    }

    let dependents: i64 = tx.query_one(guard_sql, &[&id]).await?.get(0);
    if dependents > 0 {
        return Err(AppError::BadRequest(guard_msg.to_string()));
    }

    let delete = format!("DELETE FROM {} WHERE id = $1", table);
    tx.execute(&delete, &[&id])
        .await
        .map_err(|e| map_delete_error(e, guard_msg))?;
    tx.commit().await?;
    Ok(true)
}

#[async_trait]
impl DataElementRepository for PgStore {
    async fn list_data_elements(&self, filter: &DataElementFilter, page: PageRequest) -> ApiResult<(Vec<DataElement>, i64)> {
        let client = self.client().await?;
        let keyword = like_pattern(filter.keyword.as_deref());
        let condition = "($1::text IS NULL OR code ILIKE $1 OR name ILIKE $1)
            AND ($2::bigint IS NULL OR category_id = $2)
            AND ($3::smallint IS NULL OR status = $3)";

        let total: i64 = client
            .query_one(
                &format!("SELECT COUNT(*) FROM data_elements WHERE {}", condition),
                &[&keyword, &filter.category_id, &filter.status],
            )
            .await?
            .get(0);
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM data_elements WHERE {} ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5",
                    DATA_ELEMENT_COLUMNS, condition
                ),
                &[&keyword, &filter.category_id, &filter.status, &page.limit(), &page.offset()],
            )
            .await?;
        Ok((rows.iter().map(data_element_from_row).collect(), total))
    }

    async fn find_data_element(&self, id: i64) -> ApiResult<Option<DataElement>> {
        let client = self.client().await?;
        let sql = format!("SELECT {} FROM data_elements WHERE id = $1", DATA_ELEMENT_COLUMNS);
        Ok(client.query_opt(&sql, &[&id]).await?.as_ref().map(data_element_from_row))
    }

    async fn data_element_versions(&self, id: i64, limit: i64) -> ApiResult<Vec<EntityVersion>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT id, data_element_id AS entity_id, version, content, created_by, created_at
                 FROM data_element_versions WHERE data_element_id = $1
                 ORDER BY created_at DESC, version DESC LIMIT $2",
                &[&id, &limit],
            )
            .await?;
        Ok(rows.iter().map(version_from_row).collect())
    }

    async fn create_data_element(&self, request: &CreateDataElementRequest, actor: i64) -> ApiResult<DataElement> {
        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO data_elements (code, name, description, data_type_id, format_rule_id, length,
                 is_required, default_value, value_range, business_rule, category_id, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             RETURNING {}",
            DATA_ELEMENT_COLUMNS
        );
        let row = client
            .query_one(
                &sql,
                &[
                    &request.code,
                    &request.name,
                    &request.description,
                    &request.data_type_id,
                    &request.format_rule_id,
                    &request.length,
                    &request.is_required,
                    &request.default_value,
                    &request.value_range,
                    &request.business_rule,
                    &request.category_id,
                    &actor,
                ],
            )
            .await
            .map_err(|e| map_write_error(e, "数据元编码已存在"))?;
        Ok(data_element_from_row(&row))
    }

    async fn update_data_element(&self, id: i64, request: &UpdateDataElementRequest, actor: i64) -> ApiResult<Option<DataElement>> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let lock = format!("SELECT {} FROM data_elements WHERE id = $1 FOR UPDATE", DATA_ELEMENT_COLUMNS);
        let Some(row) = tx.query_opt(&lock, &[&id]).await? else {
            return Ok(None);
        };
        let current = data_element_from_row(&row);
        let mut next = current.clone();
        request.apply_to(&mut next);

        tx.execute(
            "INSERT INTO data_element_versions (data_element_id, version, content, created_by)
             VALUES ($1, $2, $3, $4)",
            &[&id, &current.version, &snapshot(&current)?, &actor],
        )
        .await?;

        let sql = format!(
            "UPDATE data_elements SET
                 code = $2, name = $3, description = $4, data_type_id = $5, format_rule_id = $6,
                 length = $7, is_required = $8, default_value = $9, value_range = $10,
                 business_rule = $11, category_id = $12, status = $13,
                 version = version + 1, updated_by = $14, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            DATA_ELEMENT_COLUMNS
        );
        let row = tx
            .query_one(
                &sql,
                &[
                    &id,
                    &next.code,
                    &next.name,
                    &next.description,
                    &next.data_type_id,
                    &next.format_rule_id,
                    &next.length,
                    &next.is_required,
                    &next.default_value,
                    &next.value_range,
                    &next.business_rule,
                    &next.category_id,
                    &next.status,
                    &actor,
                ],
            )
            .await
            .map_err(|e| map_write_error(e, "数据元编码已存在"))?;
        tx.commit().await?;
        Ok(Some(data_element_from_row(&row)))
    }

    async fn delete_data_element(&self, id: i64) -> ApiResult<bool> {
        let mut client = self.client().await?;
        guarded_delete(
            &mut client,
            "data_elements",
            id,
            "SELECT COUNT(*) FROM tasks WHERE related_data_element_id = $1",
            "该数据元已被任务引用，无法删除",
        )
        .await
    }
}

#[async_trait]
impl QualityRuleRepository for PgStore {
    async fn list_quality_rules(&self, filter: &QualityRuleFilter, page: PageRequest) -> ApiResult<(Vec<QualityRule>, i64)> {
        let client = self.client().await?;
        let keyword = like_pattern(filter.keyword.as_deref());
        let rule_type = filter.rule_type.map(|t| t.as_str());
        let condition = "($1::text IS NULL OR code ILIKE $1 OR name ILIKE $1)
            AND ($2::text IS NULL OR rule_type = $2)
            AND ($3::smallint IS NULL OR status = $3)";

        let total: i64 = client
            .query_one(
                &format!("SELECT COUNT(*) FROM quality_rules WHERE {}", condition),
                &[&keyword, &rule_type, &filter.status],
            )
            .await?
            .get(0);
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM quality_rules WHERE {} ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5",
                    QUALITY_RULE_COLUMNS, condition
                ),
                &[&keyword, &rule_type, &filter.status, &page.limit(), &page.offset()],
            )
            .await?;
        Ok((rows.iter().map(quality_rule_from_row).collect(), total))
    }

    async fn find_quality_rule(&self, id: i64) -> ApiResult<Option<QualityRule>> {
        let client = self.client().await?;
        let sql = format!("SELECT {} FROM quality_rules WHERE id = $1", QUALITY_RULE_COLUMNS);
        Ok(client.query_opt(&sql, &[&id]).await?.as_ref().map(quality_rule_from_row))
    }

    async fn quality_rule_versions(&self, id: i64, limit: i64) -> ApiResult<Vec<EntityVersion>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT id, quality_rule_id AS entity_id, version, content, created_by, created_at
                 FROM quality_rule_versions WHERE quality_rule_id = $1
                 ORDER BY created_at DESC, version DESC LIMIT $2",
                &[&id, &limit],
            )
            .await?;
        Ok(rows.iter().map(version_from_row).collect())
    }

    async fn create_quality_rule(&self, request: &CreateQualityRuleRequest, actor: i64) -> ApiResult<QualityRule> {
        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO quality_rules (code, name, description, rule_type, data_source, table_name,
                 field_name, rule_expression, severity, category_id, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {}",
            QUALITY_RULE_COLUMNS
        );
        let row = client
            .query_one(
                &sql,
                &[
                    &request.code,
                    &request.name,
                    &request.description,
                    &request.rule_type.as_str(),
                    &request.data_source,
                    &request.table_name,
                    &request.field_name,
                    &request.rule_expression,
                    &request.severity.as_str(),
                    &request.category_id,
                    &actor,
                ],
            )
            .await
            .map_err(|e| map_write_error(e, "质量规则编码已存在"))?;
        Ok(quality_rule_from_row(&row))
    }

    async fn update_quality_rule(&self, id: i64, request: &UpdateQualityRuleRequest, actor: i64) -> ApiResult<Option<QualityRule>> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let lock = format!("SELECT {} FROM quality_rules WHERE id = $1 FOR UPDATE", QUALITY_RULE_COLUMNS);
        let Some(row) = tx.query_opt(&lock, &[&id]).await? else {
            return Ok(None);
        };
        let current = quality_rule_from_row(&row);
        let mut next = current.clone();
        request.apply_to(&mut next);

        tx.execute(
            "INSERT INTO quality_rule_versions (quality_rule_id, version, content, created_by)
             VALUES ($1, $2, $3, $4)",
            &[&id, &current.version, &snapshot(&current)?, &actor],
        )
        .await?;

        let sql = format!(
            "UPDATE quality_rules SET
                 code = $2, name = $3, description = $4, rule_type = $5, data_source = $6,
                 table_name = $7, field_name = $8, rule_expression = $9, severity = $10,
                 category_id = $11, status = $12,
                 version = version + 1, updated_by = $13, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            QUALITY_RULE_COLUMNS
        );
        let row = tx
            .query_one(
                &sql,
                &[
                    &id,
                    &next.code,
                    &next.name,
                    &next.description,
                    &next.rule_type.as_str(),
                    &next.data_source,
                    &next.table_name,
                    &next.field_name,
                    &next.rule_expression,
                    &next.severity.as_str(),
                    &next.category_id,
                    &next.status,
                    &actor,
                ],
            )
            .await
            .map_err(|e| map_write_error(e, "质量规则编码已存在"))?;
        tx.commit().await?;
        Ok(Some(quality_rule_from_row(&row)))
    }

    async fn delete_quality_rule(&self, id: i64) -> ApiResult<bool> {
        let mut client = self.client().await?;
        guarded_delete(
            &mut client,
            "quality_rules",
            id,
            "SELECT COUNT(*) FROM tasks WHERE related_quality_rule_id = $1",
            "该质量规则已被任务引用，无法删除",
        )
        .await
    }
}

async fn load_mapping_detail(client: &Client, id: i64) -> ApiResult<Option<MappingRuleDetail>> {
    let sql = format!("SELECT {} FROM mapping_rules WHERE id = $1", MAPPING_RULE_COLUMNS);
    let Some(row) = client.query_opt(&sql, &[&id]).await? else {
        return Ok(None);
    };

    let field_mappings = client
        .query(
            "SELECT id, mapping_rule_id, source_field, target_field, transform_expression, sort_order
             FROM field_mappings WHERE mapping_rule_id = $1 ORDER BY sort_order, id",
            &[&id],
        )
        .await?
        .iter()
        .map(|r| FieldMapping {
            id: r.get("id"),
            mapping_rule_id: r.get("mapping_rule_id"),
            source_field: r.get("source_field"),
            target_field: r.get("target_field"),
            transform_expression: r.get("transform_expression"),
            sort_order: r.get("sort_order"),
        })
        .collect();

    let value_mappings = client
        .query(
            "SELECT id, mapping_rule_id, source_value, target_value, description
             FROM value_mappings WHERE mapping_rule_id = $1 ORDER BY id",
            &[&id],
        )
        .await?
        .iter()
        .map(|r| ValueMapping {
            id: r.get("id"),
            mapping_rule_id: r.get("mapping_rule_id"),
            source_value: r.get("source_value"),
            target_value: r.get("target_value"),
            description: r.get("description"),
        })
        .collect();

    Ok(Some(MappingRuleDetail {
        rule: mapping_rule_from_row(&row),
        field_mappings,
        value_mappings,
    }))
}

async fn insert_field_mappings(
    tx: &tokio_postgres::Transaction<'_>,
    rule_id: i64,
    inputs: &[FieldMappingInput],
) -> ApiResult<()> {
    for input in inputs {
        tx.execute(
            "INSERT INTO field_mappings (mapping_rule_id, source_field, target_field, transform_expression, sort_order)
             VALUES ($1, $2, $3, $4, $5)",
            &[&rule_id, &input.source_field, &input.target_field, &input.transform_expression, &input.sort_order],
        )
        .await?;
    }
    Ok(())
}

async fn insert_value_mappings(
    tx: &tokio_postgres::Transaction<'_>,
    rule_id: i64,
    inputs: &[ValueMappingInput],
) -> ApiResult<()> {
    for input in inputs {
        tx.execute(
            "INSERT INTO value_mappings (mapping_rule_id, source_value, target_value, description)
             VALUES ($1, $2, $3, $4)",
            &[&rule_id, &input.source_value, &input.target_value, &input.description],
        )
        .await?;
    }
    Ok(())
}

#[async_trait]
impl MappingRuleRepository for PgStore {
    async fn list_mapping_rules(&self, filter: &MappingRuleFilter, page: PageRequest) -> ApiResult<(Vec<MappingRule>, i64)> {
        let client = self.client().await?;
        let keyword = like_pattern(filter.keyword.as_deref());
        let condition = "($1::text IS NULL OR code ILIKE $1 OR name ILIKE $1
                OR source_system ILIKE $1 OR target_system ILIKE $1)
            AND ($2::smallint IS NULL OR status = $2)";

        let total: i64 = client
            .query_one(
                &format!("SELECT COUNT(*) FROM mapping_rules WHERE {}", condition),
                &[&keyword, &filter.status],
            )
            .await?
            .get(0);
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM mapping_rules WHERE {} ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4",
                    MAPPING_RULE_COLUMNS, condition
                ),
                &[&keyword, &filter.status, &page.limit(), &page.offset()],
            )
            .await?;
        Ok((rows.iter().map(mapping_rule_from_row).collect(), total))
    }

    async fn find_mapping_rule(&self, id: i64) -> ApiResult<Option<MappingRuleDetail>> {
        let client = self.client().await?;
        load_mapping_detail(&client, id).await
    }

    async fn create_mapping_rule(&self, request: &CreateMappingRuleRequest, actor: i64) -> ApiResult<MappingRuleDetail> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let id: i64 = tx
            .query_one(
                "INSERT INTO mapping_rules (code, name, description, source_system, source_table,
                     target_system, target_table, mapping_type, created_by)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 RETURNING id",
                &[
                    &request.code,
                    &request.name,
                    &request.description,
                    &request.source_system,
                    &request.source_table,
                    &request.target_system,
                    &request.target_table,
                    &request.mapping_type.as_str(),
                    &actor,
                ],
            )
            .await
            .map_err(|e| map_write_error(e, "映射规则编码已存在"))?
            .get(0);
        insert_field_mappings(&tx, id, &request.field_mappings).await?;
        insert_value_mappings(&tx, id, &request.value_mappings).await?;
        tx.commit().await?;

        load_mapping_detail(&client, id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Mapping rule {} vanished after insert", id)))
    }

    async fn update_mapping_rule(&self, id: i64, request: &UpdateMappingRuleRequest, actor: i64) -> ApiResult<Option<MappingRuleDetail>> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let lock = format!("SELECT {} FROM mapping_rules WHERE id = $1 FOR UPDATE", MAPPING_RULE_COLUMNS);
        let Some(row) = tx.query_opt(&lock, &[&id]).await? else {
            return Ok(None);
        };
        let mut next = mapping_rule_from_row(&row);
        request.apply_to(&mut next);

        tx.execute(
            "UPDATE mapping_rules SET
                 code = $2, name = $3, description = $4, source_system = $5, source_table = $6,
                 target_system = $7, target_table = $8, mapping_type = $9, status = $10,
                 updated_by = $11, updated_at = NOW()
             WHERE id = $1",
            &[
                &id,
                &next.code,
                &next.name,
                &next.description,
                &next.source_system,
                &next.source_table,
                &next.target_system,
                &next.target_table,
                &next.mapping_type.as_str(),
                &next.status,
                &actor,
            ],
        )
        .await
        .map_err(|e| map_write_error(e, "映射规则编码已存在"))?;

        if let Some(fields) = &request.field_mappings {
            tx.execute("DELETE FROM field_mappings WHERE mapping_rule_id = $1", &[&id]).await?;
            insert_field_mappings(&tx, id, fields).await?;
        }
        if let Some(values) = &request.value_mappings {
            tx.execute("DELETE FROM value_mappings WHERE mapping_rule_id = $1", &[&id]).await?;
            insert_value_mappings(&tx, id, values).await?;
        }
        tx.commit().await?;

        load_mapping_detail(&client, id).await
    }

    async fn delete_mapping_rule(&self, id: i64) -> ApiResult<bool> {
        let mut client = self.client().await?;
        guarded_delete(
            &mut client,
            "mapping_rules",
            id,
            "SELECT COUNT(*) FROM tasks WHERE related_mapping_rule_id = $1",
            "该映射规则已被任务引用，无法删除",
        )
        .await
    }
}

#[async_trait]
impl DataSourceRepository for PgStore {
    async fn list_data_sources(&self, filter: &DataSourceFilter, page: PageRequest) -> ApiResult<(Vec<ExternalDataSource>, i64)> {
        let client = self.client().await?;
        let keyword = like_pattern(filter.keyword.as_deref());
        let source_type = filter.source_type.map(|t| t.as_str());
        let condition = "($1::text IS NULL OR code ILIKE $1 OR name ILIKE $1)
            AND ($2::text IS NULL OR source_type = $2)
            AND ($3::smallint IS NULL OR status = $3)";

        let total: i64 = client
            .query_one(
                &format!("SELECT COUNT(*) FROM external_data_sources WHERE {}", condition),
                &[&keyword, &source_type, &filter.status],
            )
            .await?
            .get(0);
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM external_data_sources WHERE {} ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5",
                    DATA_SOURCE_COLUMNS, condition
                ),
                &[&keyword, &source_type, &filter.status, &page.limit(), &page.offset()],
            )
            .await?;
        Ok((rows.iter().map(data_source_from_row).collect(), total))
    }

    async fn find_data_source(&self, id: i64) -> ApiResult<Option<ExternalDataSource>> {
        let client = self.client().await?;
        let sql = format!("SELECT {} FROM external_data_sources WHERE id = $1", DATA_SOURCE_COLUMNS);
        Ok(client.query_opt(&sql, &[&id]).await?.as_ref().map(data_source_from_row))
    }

    async fn sync_tasks_of_source(&self, source_id: i64, limit: i64) -> ApiResult<Vec<SyncTask>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {} FROM sync_tasks WHERE source_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
            SYNC_TASK_COLUMNS
        );
        let rows = client.query(&sql, &[&source_id, &limit]).await?;
        Ok(rows.iter().map(sync_task_from_row).collect())
    }

    async fn create_data_source(&self, request: &CreateDataSourceRequest, actor: i64) -> ApiResult<ExternalDataSource> {
        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO external_data_sources (code, name, description, source_type, connection_config,
                 api_endpoint, api_key, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {}",
            DATA_SOURCE_COLUMNS
        );
        let row = client
            .query_one(
                &sql,
                &[
                    &request.code,
                    &request.name,
                    &request.description,
                    &request.source_type.as_str(),
                    &request.connection_config,
                    &request.api_endpoint,
                    &request.api_key,
                    &actor,
                ],
            )
            .await
            .map_err(|e| map_write_error(e, "数据源编码已存在"))?;
        Ok(data_source_from_row(&row))
    }

    async fn update_data_source(&self, id: i64, request: &UpdateDataSourceRequest, actor: i64) -> ApiResult<Option<ExternalDataSource>> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let lock = format!("SELECT {} FROM external_data_sources WHERE id = $1 FOR UPDATE", DATA_SOURCE_COLUMNS);
        let Some(row) = tx.query_opt(&lock, &[&id]).await? else {
            return Ok(None);
        };
        let mut next = data_source_from_row(&row);
        request.apply_to(&mut next);

        let sql = format!(
            "UPDATE external_data_sources SET
                 code = $2, name = $3, description = $4, source_type = $5, connection_config = $6,
                 api_endpoint = $7, api_key = $8, status = $9, updated_by = $10, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            DATA_SOURCE_COLUMNS
        );
        let row = tx
            .query_one(
                &sql,
                &[
                    &id,
                    &next.code,
                    &next.name,
                    &next.description,
                    &next.source_type.as_str(),
                    &next.connection_config,
                    &next.api_endpoint,
                    &next.api_key,
                    &next.status,
                    &actor,
                ],
            )
            .await
            .map_err(|e| map_write_error(e, "数据源编码已存在"))?;
        tx.commit().await?;
        Ok(Some(data_source_from_row(&row)))
    }

    async fn delete_data_source(&self, id: i64) -> ApiResult<bool> {
        let mut client = self.client().await?;
        guarded_delete(
            &mut client,
            "external_data_sources",
            id,
            "SELECT COUNT(*) FROM sync_tasks WHERE source_id = $1",
            "该数据源下还有同步任务，无法删除",
        )
        .await
    }
}

#[async_trait]
impl SyncTaskRepository for PgStore {
    async fn list_sync_tasks(&self, filter: &SyncTaskFilter, page: PageRequest) -> ApiResult<(Vec<SyncTask>, i64)> {
        let client = self.client().await?;
        let keyword = like_pattern(filter.keyword.as_deref());
        let sync_type = filter.sync_type.map(|t| t.as_str());
        let sync_status = filter.sync_status.map(|s| s.as_str());
        let condition = "($1::text IS NULL OR code ILIKE $1 OR name ILIKE $1)
            AND ($2::text IS NULL OR sync_type = $2)
            AND ($3::text IS NULL OR sync_status = $3)";

        let total: i64 = client
            .query_one(
                &format!("SELECT COUNT(*) FROM sync_tasks WHERE {}", condition),
                &[&keyword, &sync_type, &sync_status],
            )
            .await?
            .get(0);
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM sync_tasks WHERE {} ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5",
                    SYNC_TASK_COLUMNS, condition
                ),
                &[&keyword, &sync_type, &sync_status, &page.limit(), &page.offset()],
            )
            .await?;
        Ok((rows.iter().map(sync_task_from_row).collect(), total))
    }

    async fn find_sync_task(&self, id: i64) -> ApiResult<Option<SyncTask>> {
        let client = self.client().await?;
        let sql = format!("SELECT {} FROM sync_tasks WHERE id = $1", SYNC_TASK_COLUMNS);
        Ok(client.query_opt(&sql, &[&id]).await?.as_ref().map(sync_task_from_row))
    }

    async fn sync_records(&self, sync_task_id: i64, limit: i64) -> ApiResult<Vec<SyncRecord>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {} FROM sync_records WHERE sync_task_id = $1 ORDER BY sync_time DESC, id DESC LIMIT $2",
            SYNC_RECORD_COLUMNS
        );
        let rows = client.query(&sql, &[&sync_task_id, &limit]).await?;
        Ok(rows.iter().map(sync_record_from_row).collect())
    }

    async fn create_sync_task(&self, request: &CreateSyncTaskRequest, actor: i64) -> ApiResult<SyncTask> {
        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO sync_tasks (code, name, description, sync_type, source_id, target_type,
                 target_config, sync_frequency, cron_expression, sync_enabled, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {}",
            SYNC_TASK_COLUMNS
        );
        let row = client
            .query_one(
                &sql,
                &[
                    &request.code,
                    &request.name,
                    &request.description,
                    &request.sync_type.as_str(),
                    &request.source_id,
                    &request.target_type,
                    &request.target_config,
                    &request.sync_frequency.as_str(),
                    &request.cron_expression,
                    &request.sync_enabled,
                    &actor,
                ],
            )
            .await
            .map_err(|e| map_write_error(e, "同步任务编码已存在"))?;
        Ok(sync_task_from_row(&row))
    }

    async fn update_sync_task(&self, id: i64, request: &UpdateSyncTaskRequest, actor: i64) -> ApiResult<Option<SyncTask>> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let lock = format!("SELECT {} FROM sync_tasks WHERE id = $1 FOR UPDATE", SYNC_TASK_COLUMNS);
        let Some(row) = tx.query_opt(&lock, &[&id]).await? else {
            return Ok(None);
        };
        let mut next = sync_task_from_row(&row);
        request.apply_to(&mut next);

        let sql = format!(
            "UPDATE sync_tasks SET
                 code = $2, name = $3, description = $4, sync_type = $5, source_id = $6,
                 target_type = $7, target_config = $8, sync_frequency = $9, cron_expression = $10,
                 sync_enabled = $11, updated_by = $12, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            SYNC_TASK_COLUMNS
        );
        let row = tx
            .query_one(
                &sql,
                &[
                    &id,
                    &next.code,
                    &next.name,
                    &next.description,
                    &next.sync_type.as_str(),
                    &next.source_id,
                    &next.target_type,
                    &next.target_config,
                    &next.sync_frequency.as_str(),
                    &next.cron_expression,
                    &next.sync_enabled,
                    &actor,
                ],
            )
            .await
            .map_err(|e| map_write_error(e, "同步任务编码已存在"))?;
        tx.commit().await?;
        Ok(Some(sync_task_from_row(&row)))
    }

    async fn delete_sync_task(&self, id: i64) -> ApiResult<bool> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let Some(row) = tx
            .query_opt("SELECT sync_enabled FROM sync_tasks WHERE id = $1 FOR UPDATE", &[&id])
            .await?
        else {
            return Ok(false);
        };
        let enabled: bool = row.get(0);
        if enabled {
            return Err(AppError::BadRequest("同步任务正在运行，无法删除".to_string()));
        }

        tx.execute("DELETE FROM sync_tasks WHERE id = $1", &[&id]).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn begin_sync(&self, id: i64, actor: i64) -> ApiResult<Option<SyncTask>> {
        let client = self.client().await?;
        let sql = format!(
            "UPDATE sync_tasks SET sync_status = $3, updated_by = $2, updated_at = NOW()
             WHERE id = $1 AND sync_status <> $3
             RETURNING {}",
            SYNC_TASK_COLUMNS
        );
        let row = client
            .query_opt(&sql, &[&id, &actor, &SyncStatus::Running.as_str()])
            .await?;
        Ok(row.as_ref().map(sync_task_from_row))
    }

    async fn finish_sync(&self, id: i64, record: NewSyncRecord, status: SyncStatus, log: &str, actor: i64) -> ApiResult<SyncRecord> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let sql = format!(
            "INSERT INTO sync_records (sync_task_id, sync_status, total_count, success_count, failed_count,
                 updated_count, inserted_count, sync_details, error_message, duration_seconds)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING {}",
            SYNC_RECORD_COLUMNS
        );
        let row = tx
            .query_one(
                &sql,
                &[
                    &id,
                    &record.sync_status.as_str(),
                    &record.total_count,
                    &record.success_count,
                    &record.failed_count,
                    &record.updated_count,
                    &record.inserted_count,
                    &record.sync_details,
                    &record.error_message,
                    &record.duration_seconds,
                ],
            )
            .await?;
        let saved = sync_record_from_row(&row);

        tx.execute(
            "UPDATE sync_tasks SET sync_status = $2, last_sync_time = $3, sync_log = $4,
                 updated_by = $5, updated_at = NOW()
             WHERE id = $1",
            &[&id, &status.as_str(), &saved.sync_time, &log, &actor],
        )
        .await?;
        tx.commit().await?;
        Ok(saved)
    }

    async fn abort_sync(&self, id: i64, log: &str, actor: i64) -> ApiResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "UPDATE sync_tasks SET sync_status = $2, sync_log = $3, updated_by = $4, updated_at = NOW()
                 WHERE id = $1 AND sync_status = $5",
                &[&id, &SyncStatus::Failed.as_str(), &log, &actor, &SyncStatus::Running.as_str()],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl QualityCheckRepository for PgStore {
    async fn list_quality_checks(&self, filter: &QualityCheckFilter, page: PageRequest) -> ApiResult<(Vec<QualityCheck>, i64)> {
        let client = self.client().await?;
        let keyword = like_pattern(filter.keyword.as_deref());
        let status = filter.status.map(|s| s.as_str());
        let condition = "($1::text IS NULL OR code ILIKE $1 OR name ILIKE $1)
            AND ($2::text IS NULL OR status = $2)";

        let total: i64 = client
            .query_one(
                &format!("SELECT COUNT(*) FROM quality_checks WHERE {}", condition),
                &[&keyword, &status],
            )
            .await?
            .get(0);
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM quality_checks WHERE {} ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4",
                    QUALITY_CHECK_COLUMNS, condition
                ),
                &[&keyword, &status, &page.limit(), &page.offset()],
            )
            .await?;
        Ok((rows.iter().map(quality_check_from_row).collect(), total))
    }

    async fn find_quality_check(&self, id: i64) -> ApiResult<Option<QualityCheck>> {
        let client = self.client().await?;
        let sql = format!("SELECT {} FROM quality_checks WHERE id = $1", QUALITY_CHECK_COLUMNS);
        Ok(client.query_opt(&sql, &[&id]).await?.as_ref().map(quality_check_from_row))
    }

    async fn create_quality_check(&self, request: &CreateQualityCheckRequest, actor: i64) -> ApiResult<QualityCheck> {
        let client = self.client().await?;
        let sql = format!(
            "INSERT INTO quality_checks (code, name, description, quality_rule_id, data_element_id,
                 check_type, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {}",
            QUALITY_CHECK_COLUMNS
        );
        let row = client
            .query_one(
                &sql,
                &[
                    &request.code,
                    &request.name,
                    &request.description,
                    &request.quality_rule_id,
                    &request.data_element_id,
                    &request.check_type,
                    &actor,
                ],
            )
            .await
            .map_err(|e| map_write_error(e, "质量检查编码已存在"))?;
        Ok(quality_check_from_row(&row))
    }

    async fn delete_quality_check(&self, id: i64) -> ApiResult<bool> {
        let client = self.client().await?;
        let deleted = client
            .execute("DELETE FROM quality_checks WHERE id = $1", &[&id])
            .await?;
        Ok(deleted > 0)
    }

    async fn reports_of_check(&self, check_id: i64, limit: i64) -> ApiResult<Vec<QualityReport>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {} FROM quality_reports WHERE check_id = $1 ORDER BY check_time DESC, id DESC LIMIT $2",
            QUALITY_REPORT_COLUMNS
        );
        let rows = client.query(&sql, &[&check_id, &limit]).await?;
        Ok(rows.iter().map(quality_report_from_row).collect())
    }

    async fn begin_check(&self, id: i64, actor: i64) -> ApiResult<Option<QualityCheck>> {
        let client = self.client().await?;
        let sql = format!(
            "UPDATE quality_checks SET status = $3, updated_by = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            QUALITY_CHECK_COLUMNS
        );
        let row = client
            .query_opt(&sql, &[&id, &actor, &CheckStatus::Running.as_str()])
            .await?;
        Ok(row.as_ref().map(quality_check_from_row))
    }

    async fn finish_check(&self, id: i64, report: NewQualityReport, actor: i64) -> ApiResult<QualityReport> {
        let mut client = self.client().await?;
        let tx = client.transaction().await?;

        let sql = format!(
            "INSERT INTO quality_reports (check_id, total_records, error_records, warning_records,
                 success_records, error_rate, warning_rate, success_rate, duration_seconds, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING {}",
            QUALITY_REPORT_COLUMNS
        );
        let row = tx
            .query_one(
                &sql,
                &[
                    &id,
                    &report.total_records,
                    &report.error_records,
                    &report.warning_records,
                    &report.success_records,
                    &report.error_rate,
                    &report.warning_rate,
                    &report.success_rate,
                    &report.duration_seconds,
                    &actor,
                ],
            )
            .await?;
        let saved = quality_report_from_row(&row);

        tx.execute(
            "UPDATE quality_checks SET status = $2, last_check_time = $3, updated_by = $4, updated_at = NOW()
             WHERE id = $1",
            &[&id, &CheckStatus::Completed.as_str(), &saved.check_time, &actor],
        )
        .await?;
        tx.commit().await?;
        Ok(saved)
    }

    async fn fail_check(&self, id: i64, actor: i64) -> ApiResult<()> {
        let client = self.client().await?;
        client
            .execute(
                "UPDATE quality_checks SET status = $2, updated_by = $3, updated_at = NOW() WHERE id = $1",
                &[&id, &CheckStatus::Failed.as_str(), &actor],
            )
            .await?;
        Ok(())
    }

    async fn list_quality_reports(&self, filter: &QualityReportFilter, page: PageRequest) -> ApiResult<(Vec<QualityReport>, i64)> {
        let client = self.client().await?;
        let condition = "($1::bigint IS NULL OR check_id = $1)";

        let total: i64 = client
            .query_one(
                &format!("SELECT COUNT(*) FROM quality_reports WHERE {}", condition),
                &[&filter.check_id],
            )
            .await?
            .get(0);
        let rows = client
            .query(
                &format!(
                    "SELECT {} FROM quality_reports WHERE {} ORDER BY check_time DESC, id DESC LIMIT $2 OFFSET $3",
                    QUALITY_REPORT_COLUMNS, condition
                ),
                &[&filter.check_id, &page.limit(), &page.offset()],
            )
            .await?;
        Ok((rows.iter().map(quality_report_from_row).collect(), total))
    }

    async fn quality_trend(&self, check_id: i64, since: DateTime<Utc>) -> ApiResult<Vec<QualityReport>> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT {} FROM quality_reports WHERE check_id = $1 AND check_time >= $2 ORDER BY check_time, id",
            QUALITY_REPORT_COLUMNS
        );
        let rows = client.query(&sql, &[&check_id, &since]).await?;
        Ok(rows.iter().map(quality_report_from_row).collect())
    }
}
