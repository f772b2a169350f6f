//! Registry tables of the in-memory backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{latest, missing_reference, page_newest_first, MemoryData, MemoryStore};
use crate::error::{conflict_error, ApiResult, AppError};
use crate::models::*;
use crate::repository::{
    snapshot, DataElementRepository, DataSourceRepository, MappingRuleRepository, QualityCheckRepository,
    QualityRuleRepository, SyncTaskRepository,
};

impl MemoryData {
    /// Optional foreign keys of a data element must point at existing rows
    fn check_element_refs(&self, data_type_id: Option<i64>, format_rule_id: Option<i64>, category_id: Option<i64>) -> ApiResult<()> {
        let ok = data_type_id.map_or(true, |id| self.data_types.iter().any(|t| t.id == id))
            && format_rule_id.map_or(true, |id| self.format_rules.iter().any(|f| f.id == id))
            && category_id.map_or(true, |id| self.categories.iter().any(|c| c.id == id));
        if ok {
            Ok(())
        } else {
            Err(missing_reference())
        }
    }

    fn check_rule_category(&self, category_id: Option<i64>) -> ApiResult<()> {
        if category_id.map_or(true, |id| self.rule_categories.iter().any(|c| c.id == id)) {
            Ok(())
        } else {
            Err(missing_reference())
        }
    }

    fn replace_field_mappings(&mut self, rule_id: i64, inputs: &[FieldMappingInput]) {
        self.field_mappings.retain(|f| f.mapping_rule_id != rule_id);
        for input in inputs {
            let id = self.next_id();
            self.field_mappings.push(FieldMapping {
                id,
                mapping_rule_id: rule_id,
                source_field: input.source_field.clone(),
                target_field: input.target_field.clone(),
                transform_expression: input.transform_expression.clone(),
                sort_order: input.sort_order,
            });
        }
    }

    fn replace_value_mappings(&mut self, rule_id: i64, inputs: &[ValueMappingInput]) {
        self.value_mappings.retain(|v| v.mapping_rule_id != rule_id);
        for input in inputs {
            let id = self.next_id();
            self.value_mappings.push(ValueMapping {
                id,
                mapping_rule_id: rule_id,
                source_value: input.source_value.clone(),
                target_value: input.target_value.clone(),
                description: input.description.clone(),
            });
        }
    }

    fn mapping_rule_detail(&self, rule: &MappingRule) -> MappingRuleDetail {
        let mut field_mappings: Vec<FieldMapping> = self
            .field_mappings
            .iter()
            .filter(|f| f.mapping_rule_id == rule.id)
            .cloned()
            .collect();
        field_mappings.sort_by_key(|f| (f.sort_order, f.id));
        let value_mappings = self
            .value_mappings
            .iter()
            .filter(|v| v.mapping_rule_id == rule.id)
            .cloned()
            .collect();
        MappingRuleDetail {
            rule: rule.clone(),
            field_mappings,
            value_mappings,
        }
    }
}

fn version_key(v: &EntityVersion) -> (DateTime<Utc>, i64) {
    (v.created_at, v.version as i64)
}

#[async_trait]
impl DataElementRepository for MemoryStore {
    async fn list_data_elements(&self, filter: &DataElementFilter, page: PageRequest) -> ApiResult<(Vec<DataElement>, i64)> {
        let data = self.data.read().await;
        let rows = data.data_elements.iter().filter(|e| filter.matches(e)).collect();
        Ok(page_newest_first(rows, |e: &DataElement| (e.created_at, e.id), page))
    }

    async fn find_data_element(&self, id: i64) -> ApiResult<Option<DataElement>> {
        let data = self.data.read().await;
        Ok(data.data_elements.iter().find(|e| e.id == id).cloned())
    }

    async fn data_element_versions(&self, id: i64, limit: i64) -> ApiResult<Vec<EntityVersion>> {
        let data = self.data.read().await;
        let rows = data
            .data_element_versions
            .iter()
            .filter(|v| v.entity_id == id)
            .collect();
        Ok(latest(rows, version_key, limit))
    }

    async fn create_data_element(&self, request: &CreateDataElementRequest, actor: i64) -> ApiResult<DataElement> {
        let mut data = self.data.write().await;
        if data.data_elements.iter().any(|e| e.code == request.code) {
            return Err(conflict_error("数据元编码已存在"));
        }
        data.check_element_refs(request.data_type_id, request.format_rule_id, request.category_id)?;

        let now = Utc::now();
        let element = DataElement {
            id: data.next_id(),
            code: request.code.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            data_type_id: request.data_type_id,
            format_rule_id: request.format_rule_id,
            length: request.length,
            is_required: request.is_required,
            default_value: request.default_value.clone(),
            value_range: request.value_range.clone(),
            business_rule: request.business_rule.clone(),
            category_id: request.category_id,
            status: STATUS_ENABLED,
            version: 1,
            created_by: Some(actor),
            updated_by: None,
            created_at: now,
            updated_at: now,
        };
        data.data_elements.push(element.clone());
        Ok(element)
    }

    async fn update_data_element(&self, id: i64, request: &UpdateDataElementRequest, actor: i64) -> ApiResult<Option<DataElement>> {
        let mut data = self.data.write().await;
        let Some(index) = data.data_elements.iter().position(|e| e.id == id) else {
            return Ok(None);
        };
        if let Some(code) = &request.code {
            if data.data_elements.iter().any(|e| e.code == *code && e.id != id) {
                return Err(conflict_error("数据元编码已存在"));
            }
        }

        let current = data.data_elements[index].clone();
        let mut updated = current.clone();
        request.apply_to(&mut updated);
        data.check_element_refs(updated.data_type_id, updated.format_rule_id, updated.category_id)?;

        let now = Utc::now();
        let version = EntityVersion {
            id: data.next_id(),
            entity_id: id,
            version: current.version,
            content: snapshot(&current)?,
            created_by: Some(actor),
            created_at: now,
        };
        data.data_element_versions.push(version);

        updated.version = current.version + 1;
        updated.updated_by = Some(actor);
        updated.updated_at = now;
        data.data_elements[index] = updated.clone();
        Ok(Some(updated))
    }

    async fn delete_data_element(&self, id: i64) -> ApiResult<bool> {
        let mut data = self.data.write().await;
        let Some(index) = data.data_elements.iter().position(|e| e.id == id) else {
            return Ok(false);
        };
        if data.tasks.iter().any(|t| t.related_data_element_id == Some(id)) {
            return Err(AppError::BadRequest("该数据元已被任务引用，无法删除".to_string()));
        }
        data.data_elements.remove(index);
        data.data_element_versions.retain(|v| v.entity_id != id);
        for check in data.quality_checks.iter_mut().filter(|c| c.data_element_id == Some(id)) {
            check.data_element_id = None;
        }
        Ok(true)
    }
}

#[async_trait]
impl QualityRuleRepository for MemoryStore {
    async fn list_quality_rules(&self, filter: &QualityRuleFilter, page: PageRequest) -> ApiResult<(Vec<QualityRule>, i64)> {
        let data = self.data.read().await;
        let rows = data.quality_rules.iter().filter(|r| filter.matches(r)).collect();
        Ok(page_newest_first(rows, |r: &QualityRule| (r.created_at, r.id), page))
    }

    async fn find_quality_rule(&self, id: i64) -> ApiResult<Option<QualityRule>> {
        let data = self.data.read().await;
        Ok(data.quality_rules.iter().find(|r| r.id == id).cloned())
    }

    async fn quality_rule_versions(&self, id: i64, limit: i64) -> ApiResult<Vec<EntityVersion>> {
        let data = self.data.read().await;
        let rows = data
            .quality_rule_versions
            .iter()
            .filter(|v| v.entity_id == id)
            .collect();
        Ok(latest(rows, version_key, limit))
    }

    async fn create_quality_rule(&self, request: &CreateQualityRuleRequest, actor: i64) -> ApiResult<QualityRule> {
        let mut data = self.data.write().await;
        if data.quality_rules.iter().any(|r| r.code == request.code) {
            return Err(conflict_error("质量规则编码已存在"));
        }
        data.check_rule_category(request.category_id)?;

        let now = Utc::now();
        let rule = QualityRule {
            id: data.next_id(),
            code: request.code.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            rule_type: request.rule_type,
            data_source: request.data_source.clone(),
            table_name: request.table_name.clone(),
            field_name: request.field_name.clone(),
            rule_expression: request.rule_expression.clone(),
            severity: request.severity,
            category_id: request.category_id,
            status: STATUS_ENABLED,
            version: 1,
            created_by: Some(actor),
            updated_by: None,
            created_at: now,
            updated_at: now,
        };
        data.quality_rules.push(rule.clone());
        Ok(rule)
    }

    async fn update_quality_rule(&self, id: i64, request: &UpdateQualityRuleRequest, actor: i64) -> ApiResult<Option<QualityRule>> {
        let mut data = self.data.write().await;
        let Some(index) = data.quality_rules.iter().position(|r| r.id == id) else {
            return Ok(None);
        };
        if let Some(code) = &request.code {
            if data.quality_rules.iter().any(|r| r.code == *code && r.id != id) {
                return Err(conflict_error("质量规则编码已存在"));
            }
        }

        let current = data.quality_rules[index].clone();
        let mut updated = current.clone();
        request.apply_to(&mut updated);
        data.check_rule_category(updated.category_id)?;

        let now = Utc::now();
        let version = EntityVersion {
            id: data.next_id(),
            entity_id: id,
            version: current.version,
            content: snapshot(&current)?,
            created_by: Some(actor),
            created_at: now,
        };
        data.quality_rule_versions.push(version);

        updated.version = current.version + 1;
        updated.updated_by = Some(actor);
        updated.updated_at = now;
        data.quality_rules[index] = updated.clone();
        Ok(Some(updated))
    }

    async fn delete_quality_rule(&self, id: i64) -> ApiResult<bool> {
        let mut data = self.data.write().await;
        let Some(index) = data.quality_rules.iter().position(|r| r.id == id) else {
            return Ok(false);
        };
        if data.tasks.iter().any(|t| t.related_quality_rule_id == Some(id)) {
            return Err(AppError::BadRequest("该质量规则已被任务引用，无法删除".to_string()));
        }
        data.quality_rules.remove(index);
        data.quality_rule_versions.retain(|v| v.entity_id != id);
        for check in data.quality_checks.iter_mut().filter(|c| c.quality_rule_id == Some(id)) {
            check.quality_rule_id = None;
        }
        Ok(true)
    }
}

#[async_trait]
impl MappingRuleRepository for MemoryStore {
    async fn list_mapping_rules(&self, filter: &MappingRuleFilter, page: PageRequest) -> ApiResult<(Vec<MappingRule>, i64)> {
        let data = self.data.read().await;
        let rows = data.mapping_rules.iter().filter(|r| filter.matches(r)).collect();
        Ok(page_newest_first(rows, |r: &MappingRule| (r.created_at, r.id), page))
    }

    async fn find_mapping_rule(&self, id: i64) -> ApiResult<Option<MappingRuleDetail>> {
        let data = self.data.read().await;
        Ok(data
            .mapping_rules
            .iter()
            .find(|r| r.id == id)
            .map(|r| data.mapping_rule_detail(r)))
    }

    async fn create_mapping_rule(&self, request: &CreateMappingRuleRequest, actor: i64) -> ApiResult<MappingRuleDetail> {
        let mut data = self.data.write().await;
        if data.mapping_rules.iter().any(|r| r.code == request.code) {
            return Err(conflict_error("映射规则编码已存在"));
        }

        let now = Utc::now();
        let rule = MappingRule {
            id: data.next_id(),
            code: request.code.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            source_system: request.source_system.clone(),
            source_table: request.source_table.clone(),
            target_system: request.target_system.clone(),
            target_table: request.target_table.clone(),
            mapping_type: request.mapping_type,
            status: STATUS_ENABLED,
            created_by: Some(actor),
            updated_by: None,
            created_at: now,
            updated_at: now,
        };
        data.mapping_rules.push(rule.clone());
        data.replace_field_mappings(rule.id, &request.field_mappings);
        data.replace_value_mappings(rule.id, &request.value_mappings);
        Ok(data.mapping_rule_detail(&rule))
    }

    async fn update_mapping_rule(&self, id: i64, request: &UpdateMappingRuleRequest, actor: i64) -> ApiResult<Option<MappingRuleDetail>> {
        let mut data = self.data.write().await;
        let Some(index) = data.mapping_rules.iter().position(|r| r.id == id) else {
            return Ok(None);
        };
        if let Some(code) = &request.code {
            if data.mapping_rules.iter().any(|r| r.code == *code && r.id != id) {
                return Err(conflict_error("映射规则编码已存在"));
            }
        }

        let rule = &mut data.mapping_rules[index];
        request.apply_to(rule);
        rule.updated_by = Some(actor);
        rule.updated_at = Utc::now();
        let rule = rule.clone();

        if let Some(fields) = &request.field_mappings {
            data.replace_field_mappings(id, fields);
        }
        if let Some(values) = &request.value_mappings {
            data.replace_value_mappings(id, values);
        }
        Ok(Some(data.mapping_rule_detail(&rule)))
    }

    async fn delete_mapping_rule(&self, id: i64) -> ApiResult<bool> {
        let mut data = self.data.write().await;
        let Some(index) = data.mapping_rules.iter().position(|r| r.id == id) else {
            return Ok(false);
        };
        if data.tasks.iter().any(|t| t.related_mapping_rule_id == Some(id)) {
            return Err(AppError::BadRequest("该映射规则已被任务引用，无法删除".to_string()));
        }
        data.mapping_rules.remove(index);
        data.field_mappings.retain(|f| f.mapping_rule_id != id);
        data.value_mappings.retain(|v| v.mapping_rule_id != id);
        Ok(true)
    }
}

#[async_trait]
impl DataSourceRepository for MemoryStore {
    async fn list_data_sources(&self, filter: &DataSourceFilter, page: PageRequest) -> ApiResult<(Vec<ExternalDataSource>, i64)> {
        let data = self.data.read().await;
        let rows = data.data_sources.iter().filter(|s| filter.matches(s)).collect();
        Ok(page_newest_first(rows, |s: &ExternalDataSource| (s.created_at, s.id), page))
    }

    async fn find_data_source(&self, id: i64) -> ApiResult<Option<ExternalDataSource>> {
        let data = self.data.read().await;
        Ok(data.data_sources.iter().find(|s| s.id == id).cloned())
    }

    async fn sync_tasks_of_source(&self, source_id: i64, limit: i64) -> ApiResult<Vec<SyncTask>> {
        let data = self.data.read().await;
        let rows = data.sync_tasks.iter().filter(|t| t.source_id == source_id).collect();
        Ok(latest(rows, |t: &SyncTask| (t.created_at, t.id), limit))
    }

    async fn create_data_source(&self, request: &CreateDataSourceRequest, actor: i64) -> ApiResult<ExternalDataSource> {
        let mut data = self.data.write().await;
        if data.data_sources.iter().any(|s| s.code == request.code) {
            return Err(conflict_error("数据源编码已存在"));
        }

        let now = Utc::now();
        let source = ExternalDataSource {
            id: data.next_id(),
            code: request.code.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            source_type: request.source_type,
            connection_config: request.connection_config.clone(),
            api_endpoint: request.api_endpoint.clone(),
            api_key: request.api_key.clone(),
            status: STATUS_ENABLED,
            created_by: Some(actor),
            updated_by: None,
            created_at: now,
            updated_at: now,
        };
        data.data_sources.push(source.clone());
        Ok(source)
    }

    async fn update_data_source(&self, id: i64, request: &UpdateDataSourceRequest, actor: i64) -> ApiResult<Option<ExternalDataSource>> {
        let mut data = self.data.write().await;
        let Some(index) = data.data_sources.iter().position(|s| s.id == id) else {
            return Ok(None);
        };
        if let Some(code) = &request.code {
            if data.data_sources.iter().any(|s| s.code == *code && s.id != id) {
                return Err(conflict_error("数据源编码已存在"));
            }
        }
        let source = &mut data.data_sources[index];
        request.apply_to(source);
        source.updated_by = Some(actor);
        source.updated_at = Utc::now();
        Ok(Some(source.clone()))
    }

    async fn delete_data_source(&self, id: i64) -> ApiResult<bool> {
        let mut data = self.data.write().await;
        let Some(index) = data.data_sources.iter().position(|s| s.id == id) else {
            return Ok(false);
        };
        if data.sync_tasks.iter().any(|t| t.source_id == id) {
            return Err(AppError::BadRequest("该数据源下还有同步任务，无法删除".to_string()));
        }
        data.data_sources.remove(index);
        Ok(true)
    }
}

#[async_trait]
impl SyncTaskRepository for MemoryStore {
    async fn list_sync_tasks(&self, filter: &SyncTaskFilter, page: PageRequest) -> ApiResult<(Vec<SyncTask>, i64)> {
        let data = self.data.read().await;
        let rows = data.sync_tasks.iter().filter(|t| filter.matches(t)).collect();
        Ok(page_newest_first(rows, |t: &SyncTask| (t.created_at, t.id), page))
    }

    async fn find_sync_task(&self, id: i64) -> ApiResult<Option<SyncTask>> {
        let data = self.data.read().await;
        Ok(data.sync_tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn sync_records(&self, sync_task_id: i64, limit: i64) -> ApiResult<Vec<SyncRecord>> {
        let data = self.data.read().await;
        let rows = data
            .sync_records
            .iter()
            .filter(|r| r.sync_task_id == sync_task_id)
            .collect();
        Ok(latest(rows, |r: &SyncRecord| (r.sync_time, r.id), limit))
    }

    async fn create_sync_task(&self, request: &CreateSyncTaskRequest, actor: i64) -> ApiResult<SyncTask> {
        let mut data = self.data.write().await;
        if data.sync_tasks.iter().any(|t| t.code == request.code) {
            return Err(conflict_error("同步任务编码已存在"));
        }
        if !data.data_sources.iter().any(|s| s.id == request.source_id) {
            return Err(missing_reference());
        }

        let now = Utc::now();
        let task = SyncTask {
            id: data.next_id(),
            code: request.code.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            sync_type: request.sync_type,
            source_id: request.source_id,
            target_type: request.target_type.clone(),
            target_config: request.target_config.clone(),
            sync_frequency: request.sync_frequency,
            cron_expression: request.cron_expression.clone(),
            sync_enabled: request.sync_enabled,
            sync_status: SyncStatus::Idle,
            last_sync_time: None,
            sync_log: None,
            created_by: Some(actor),
            updated_by: None,
            created_at: now,
            updated_at: now,
        };
        data.sync_tasks.push(task.clone());
        Ok(task)
    }

    async fn update_sync_task(&self, id: i64, request: &UpdateSyncTaskRequest, actor: i64) -> ApiResult<Option<SyncTask>> {
        let mut data = self.data.write().await;
        let Some(index) = data.sync_tasks.iter().position(|t| t.id == id) else {
            return Ok(None);
        };
        if let Some(code) = &request.code {
            if data.sync_tasks.iter().any(|t| t.code == *code && t.id != id) {
                return Err(conflict_error("同步任务编码已存在"));
            }
        }
        if let Some(source_id) = request.source_id {
            if !data.data_sources.iter().any(|s| s.id == source_id) {
                return Err(missing_reference());
            }
        }
        let task = &mut data.sync_tasks[index];
        request.apply_to(task);
        task.updated_by = Some(actor);
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn delete_sync_task(&self, id: i64) -> ApiResult<bool> {
        let mut data = self.data.write().await;
        let Some(index) = data.sync_tasks.iter().position(|t| t.id == id) else {
            return Ok(false);
        };
        if data.sync_tasks[index].sync_enabled {
            return Err(AppError::BadRequest("同步任务正在运行，无法删除".to_string()));
        }
        data.sync_tasks.remove(index);
        data.sync_records.retain(|r| r.sync_task_id != id);
        Ok(true)
    }

    async fn begin_sync(&self, id: i64, actor: i64) -> ApiResult<Option<SyncTask>> {
        let mut data = self.data.write().await;
        let Some(task) = data
            .sync_tasks
            .iter_mut()
            .find(|t| t.id == id && t.sync_status != SyncStatus::Running)
        else {
            return Ok(None);
        };
        task.sync_status = SyncStatus::Running;
        task.updated_by = Some(actor);
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    async fn finish_sync(&self, id: i64, record: NewSyncRecord, status: SyncStatus, log: &str, actor: i64) -> ApiResult<SyncRecord> {
        let mut data = self.data.write().await;
        let now = Utc::now();
        let Some(index) = data.sync_tasks.iter().position(|t| t.id == id) else {
            return Err(AppError::NotFound("同步任务不存在".to_string()));
        };

        let record = SyncRecord {
            id: data.next_id(),
            sync_task_id: id,
            sync_status: record.sync_status,
            total_count: record.total_count,
            success_count: record.success_count,
            failed_count: record.failed_count,
            updated_count: record.updated_count,
            inserted_count: record.inserted_count,
            sync_details: record.sync_details,
            error_message: record.error_message,
            duration_seconds: record.duration_seconds,
            sync_time: now,
        };
        data.sync_records.push(record.clone());

        let task = &mut data.sync_tasks[index];
        task.sync_status = status;
        task.last_sync_time = Some(now);
        task.sync_log = Some(log.to_string());
        task.updated_by = Some(actor);
        task.updated_at = now;
        Ok(record)
    }

    async fn abort_sync(&self, id: i64, log: &str, actor: i64) -> ApiResult<()> {
        let mut data = self.data.write().await;
        if let Some(task) = data
            .sync_tasks
            .iter_mut()
            .find(|t| t.id == id && t.sync_status == SyncStatus::Running)
        {
            task.sync_status = SyncStatus::Failed;
            task.sync_log = Some(log.to_string());
            task.updated_by = Some(actor);
            task.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl QualityCheckRepository for MemoryStore {
    async fn list_quality_checks(&self, filter: &QualityCheckFilter, page: PageRequest) -> ApiResult<(Vec<QualityCheck>, i64)> {
        let data = self.data.read().await;
        let rows = data.quality_checks.iter().filter(|c| filter.matches(c)).collect();
        Ok(page_newest_first(rows, |c: &QualityCheck| (c.created_at, c.id), page))
    }

    async fn find_quality_check(&self, id: i64) -> ApiResult<Option<QualityCheck>> {
        let data = self.data.read().await;
        Ok(data.quality_checks.iter().find(|c| c.id == id).cloned())
    }

    async fn create_quality_check(&self, request: &CreateQualityCheckRequest, actor: i64) -> ApiResult<QualityCheck> {
        let mut data = self.data.write().await;
        if data.quality_checks.iter().any(|c| c.code == request.code) {
            return Err(conflict_error("质量检查编码已存在"));
        }
        let refs_ok = request
            .quality_rule_id
            .map_or(true, |id| data.quality_rules.iter().any(|r| r.id == id))
            && request
                .data_element_id
                .map_or(true, |id| data.data_elements.iter().any(|e| e.id == id));
        if !refs_ok {
            return Err(missing_reference());
        }

        let now = Utc::now();
        let check = QualityCheck {
            id: data.next_id(),
            code: request.code.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
            quality_rule_id: request.quality_rule_id,
            data_element_id: request.data_element_id,
            check_type: request.check_type.clone(),
            status: CheckStatus::Pending,
            last_check_time: None,
            created_by: Some(actor),
            updated_by: None,
            created_at: now,
            updated_at: now,
        };
        data.quality_checks.push(check.clone());
        Ok(check)
    }

    async fn delete_quality_check(&self, id: i64) -> ApiResult<bool> {
        let mut data = self.data.write().await;
        let Some(index) = data.quality_checks.iter().position(|c| c.id == id) else {
            return Ok(false);
        };
        data.quality_checks.remove(index);
        data.quality_reports.retain(|r| r.check_id != id);
        Ok(true)
    }

    async fn reports_of_check(&self, check_id: i64, limit: i64) -> ApiResult<Vec<QualityReport>> {
        let data = self.data.read().await;
        let rows = data
            .quality_reports
            .iter()
            .filter(|r| r.check_id == check_id)
            .collect();
        Ok(latest(rows, |r: &QualityReport| (r.created_at, r.id), limit))
    }

    async fn begin_check(&self, id: i64, actor: i64) -> ApiResult<Option<QualityCheck>> {
        let mut data = self.data.write().await;
        let Some(check) = data.quality_checks.iter_mut().find(|c| c.id == id) else {
            return Ok(None);
        };
        check.status = CheckStatus::Running;
        check.updated_by = Some(actor);
        check.updated_at = Utc::now();
        Ok(Some(check.clone()))
    }

    async fn finish_check(&self, id: i64, report: NewQualityReport, actor: i64) -> ApiResult<QualityReport> {
        let mut data = self.data.write().await;
        let now = Utc::now();
        let Some(index) = data.quality_checks.iter().position(|c| c.id == id) else {
            return Err(AppError::NotFound("质量检查不存在".to_string()));
        };

        let report = QualityReport {
            id: data.next_id(),
            check_id: id,
            check_time: now,
            total_records: report.total_records,
            error_records: report.error_records,
            warning_records: report.warning_records,
            success_records: report.success_records,
            error_rate: report.error_rate,
            warning_rate: report.warning_rate,
            success_rate: report.success_rate,
            duration_seconds: report.duration_seconds,
            created_by: Some(actor),
            created_at: now,
        };
        data.quality_reports.push(report.clone());

        let check = &mut data.quality_checks[index];
        check.status = CheckStatus::Completed;
        check.last_check_time = Some(now);
        check.updated_by = Some(actor);
        check.updated_at = now;
        Ok(report)
    }

    async fn fail_check(&self, id: i64, actor: i64) -> ApiResult<()> {
        let mut data = self.data.write().await;
        if let Some(check) = data.quality_checks.iter_mut().find(|c| c.id == id) {
            check.status = CheckStatus::Failed;
            check.updated_by = Some(actor);
            check.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_quality_reports(&self, filter: &QualityReportFilter, page: PageRequest) -> ApiResult<(Vec<QualityReport>, i64)> {
        let data = self.data.read().await;
        let rows = data
            .quality_reports
            .iter()
            .filter(|r| filter.check_id.map_or(true, |id| r.check_id == id))
            .collect();
        Ok(page_newest_first(rows, |r: &QualityReport| (r.check_time, r.id), page))
    }

    async fn quality_trend(&self, check_id: i64, since: DateTime<Utc>) -> ApiResult<Vec<QualityReport>> {
        let data = self.data.read().await;
        let mut rows: Vec<QualityReport> = data
            .quality_reports
            .iter()
            .filter(|r| r.check_id == check_id && r.check_time >= since)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.check_time, r.id));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn element_request(code: &str) -> CreateDataElementRequest {
        serde_json::from_value(serde_json::json!({ "code": code, "name": "客户编号" })).unwrap()
    }

    #[tokio::test]
    async fn test_update_appends_one_version_with_previous_snapshot() {
        let store = MemoryStore::seeded("hash");
        let element = store.create_data_element(&element_request("DE001"), 1).await.unwrap();
        assert_eq!(element.version, 1);

        let request = UpdateDataElementRequest {
            name: Some("客户唯一编号".into()),
            ..Default::default()
        };
        let updated = store
            .update_data_element(element.id, &request, 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.name, "客户唯一编号");

        let versions = store.data_element_versions(element.id, 10).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version, 1);
        assert_eq!(versions[0].content["name"], "客户编号");
    }

    #[tokio::test]
    async fn test_update_to_taken_code_conflicts_without_writing() {
        let store = MemoryStore::seeded("hash");
        store.create_data_element(&element_request("DE001"), 1).await.unwrap();
        let second = store.create_data_element(&element_request("DE002"), 1).await.unwrap();

        let request = UpdateDataElementRequest {
            code: Some("DE001".into()),
            ..Default::default()
        };
        let err = store.update_data_element(second.id, &request, 1).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(store.data_element_versions(second.id, 10).await.unwrap().is_empty());
        assert_eq!(store.find_data_element(second.id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_unknown_category_is_rejected() {
        let store = MemoryStore::seeded("hash");
        let mut request = element_request("DE001");
        request.category_id = Some(9999);
        let err = store.create_data_element(&request, 1).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_mapping_children_replaced_only_when_supplied() {
        let store = MemoryStore::new();
        let request: CreateMappingRuleRequest = serde_json::from_value(serde_json::json!({
            "code": "MR1",
            "name": "客户映射",
            "sourceSystem": "CRM",
            "sourceTable": "customer",
            "targetSystem": "DW",
            "targetTable": "dim_customer",
            "fieldMappings": [
                { "sourceField": "name", "targetField": "customer_name", "sortOrder": 2 },
                { "sourceField": "id", "targetField": "customer_id", "sortOrder": 1 }
            ],
            "valueMappings": [{ "sourceValue": "M", "targetValue": "male" }]
        }))
        .unwrap();
        let created = store.create_mapping_rule(&request, 1).await.unwrap();
        let order: Vec<_> = created.field_mappings.iter().map(|f| f.source_field.as_str()).collect();
        assert_eq!(order, vec!["id", "name"]);

        let rename = UpdateMappingRuleRequest {
            name: Some("客户维度映射".into()),
            ..Default::default()
        };
        let updated = store.update_mapping_rule(created.rule.id, &rename, 1).await.unwrap().unwrap();
        assert_eq!(updated.field_mappings.len(), 2);
        assert_eq!(updated.value_mappings.len(), 1);

        let clear = UpdateMappingRuleRequest {
            value_mappings: Some(vec![]),
            ..Default::default()
        };
        let updated = store.update_mapping_rule(created.rule.id, &clear, 1).await.unwrap().unwrap();
        assert_eq!(updated.field_mappings.len(), 2);
        assert!(updated.value_mappings.is_empty());
    }

    #[tokio::test]
    async fn test_begin_sync_refuses_running_task() {
        let store = MemoryStore::new();
        let source_request: CreateDataSourceRequest = serde_json::from_value(serde_json::json!({
            "code": "SRC1", "name": "CRM", "sourceType": "database"
        }))
        .unwrap();
        let source = store.create_data_source(&source_request, 1).await.unwrap();
        let task_request: CreateSyncTaskRequest = serde_json::from_value(serde_json::json!({
            "code": "SYNC1", "name": "同步客户", "syncType": "data_element",
            "sourceId": source.id, "targetType": "data_element", "syncFrequency": "manual"
        }))
        .unwrap();
        let task = store.create_sync_task(&task_request, 1).await.unwrap();

        assert!(store.begin_sync(task.id, 1).await.unwrap().is_some());
        assert!(store.begin_sync(task.id, 1).await.unwrap().is_none());

        let err = store.delete_data_source(source.id).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(ref m) if m == "该数据源下还有同步任务，无法删除"));
    }
}
