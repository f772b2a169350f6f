//! Reference data loaded into every fresh store
//!
//! Both storage backends insert exactly these rows, so lookups and the
//! default role graph look the same whichever backend is running.

/// Username of the bootstrap administrator
pub const ADMIN_USERNAME: &str = "admin";

/// Role code whose holders pass every permission check
pub const ADMIN_ROLE: &str = "admin";

pub struct PermissionSeed {
    pub code: &'static str,
    pub name: &'static str,
    pub module: &'static str,
    pub action: &'static str,
}

const fn perm(code: &'static str, name: &'static str, module: &'static str, action: &'static str) -> PermissionSeed {
    PermissionSeed { code, name, module, action }
}

pub const PERMISSIONS: &[PermissionSeed] = &[
    perm("user:view", "查看用户", "user", "view"),
    perm("user:manage", "管理用户", "user", "manage"),
    perm("role:view", "查看角色", "role", "view"),
    perm("role:manage", "管理角色", "role", "manage"),
    perm("data_element:view", "查看数据元", "data_element", "view"),
    perm("data_element:manage", "管理数据元", "data_element", "manage"),
    perm("quality_rule:view", "查看质量规则", "quality_rule", "view"),
    perm("quality_rule:manage", "管理质量规则", "quality_rule", "manage"),
    perm("mapping_rule:view", "查看映射规则", "mapping_rule", "view"),
    perm("mapping_rule:manage", "管理映射规则", "mapping_rule", "manage"),
    perm("data_source:view", "查看外部数据源", "data_source", "view"),
    perm("data_source:manage", "管理外部数据源", "data_source", "manage"),
    perm("sync_task:view", "查看同步任务", "sync_task", "view"),
    perm("sync_task:execute", "执行同步任务", "sync_task", "execute"),
    perm("quality_check:view", "查看质量检查", "quality_check", "view"),
    perm("quality_check:execute", "执行质量检查", "quality_check", "execute"),
    perm("task:view", "查看任务", "task", "view"),
    perm("task:manage", "管理任务", "task", "manage"),
    perm("task:assign", "分配任务", "task", "assign"),
    perm("task:review", "审核任务", "task", "review"),
];

pub struct RoleSeed {
    pub code: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Decides which seeded permissions the role starts with
    pub grants: fn(&PermissionSeed) -> bool,
}

pub const ROLES: &[RoleSeed] = &[
    RoleSeed {
        code: ADMIN_ROLE,
        name: "系统管理员",
        description: "拥有全部权限",
        grants: grant_all,
    },
    RoleSeed {
        code: "data_steward",
        name: "数据管理员",
        description: "维护数据标准并处理治理任务",
        grants: grant_data_work,
    },
    RoleSeed {
        code: "viewer",
        name: "只读用户",
        description: "只能查看",
        grants: grant_view_only,
    },
];

fn grant_all(_: &PermissionSeed) -> bool {
    true
}

fn grant_data_work(p: &PermissionSeed) -> bool {
    p.module != "user" && p.module != "role"
}

fn grant_view_only(p: &PermissionSeed) -> bool {
    p.action == "view"
}

/// `(code, name, description)`
pub const DATA_TYPES: &[(&str, &str, &str)] = &[
    ("boolean", "布尔", "真或假"),
    ("date", "日期", "YYYY-MM-DD"),
    ("datetime", "日期时间", "ISO 8601 时间戳"),
    ("decimal", "小数", "定点小数"),
    ("integer", "整数", "64 位有符号整数"),
    ("string", "字符串", "变长字符串"),
    ("text", "长文本", "不限长度文本"),
];

/// `(code, name, pattern, description)`
pub const FORMAT_RULES: &[(&str, &str, &str, &str)] = &[
    ("date_ymd", "日期格式", r"^\d{4}-\d{2}-\d{2}$", "年-月-日"),
    ("email", "邮箱", r"^[^@\s]+@[^@\s]+\.[^@\s]+$", "电子邮箱地址"),
    ("id_card", "身份证号", r"^\d{17}[\dXx]$", "18 位居民身份证号"),
    ("mobile", "手机号", r"^1[3-9]\d{9}$", "11 位手机号码"),
    ("postal_code", "邮政编码", r"^\d{6}$", "6 位邮政编码"),
];

/// `(code, name, description)`
pub const RULE_CATEGORIES: &[(&str, &str, &str)] = &[
    ("basic", "基础规则", "通用字段级校验"),
    ("business", "业务规则", "业务口径相关校验"),
    ("compliance", "合规规则", "监管与合规要求"),
];

/// `(code, name, rule_type, template_expression, description)`
pub const RULE_TEMPLATES: &[(&str, &str, &str, &str, &str)] = &[
    ("accuracy_range", "取值范围校验", "accuracy", "{field} BETWEEN {min} AND {max}", "数值必须落在区间内"),
    ("accuracy_regex", "格式校验", "accuracy", "{field} ~ '{pattern}'", "值必须匹配正则表达式"),
    ("completeness_not_null", "非空校验", "completeness", "{field} IS NOT NULL", "字段不能为空"),
    ("consistency_equal", "一致性校验", "consistency", "{left} = {right}", "两个字段取值必须一致"),
    ("reference_exists", "引用校验", "reference", "{field} IN (SELECT {key} FROM {table})", "值必须存在于引用表"),
    ("timeliness_within", "时效性校验", "timeliness", "{field} >= NOW() - INTERVAL '{days} days'", "数据必须在时间窗口内更新"),
    ("uniqueness_single", "唯一性校验", "uniqueness", "COUNT({field}) = COUNT(DISTINCT {field})", "字段值不能重复"),
];

/// `(code, name, parent code, sort order)`; parents precede their children
pub const DATA_ELEMENT_CATEGORIES: &[(&str, &str, Option<&str>, i32)] = &[
    ("basic", "基础数据", None, 1),
    ("person", "人员信息", Some("basic"), 1),
    ("organization", "机构信息", Some("basic"), 2),
    ("business", "业务数据", None, 2),
    ("finance", "财务数据", Some("business"), 1),
    ("product", "产品数据", Some("business"), 2),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RuleType;

    #[test]
    fn test_permission_codes_are_unique() {
        let mut codes: Vec<_> = PERMISSIONS.iter().map(|p| p.code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), PERMISSIONS.len());
    }

    #[test]
    fn test_template_rule_types_parse() {
        for (code, _, rule_type, _, _) in RULE_TEMPLATES {
            assert!(rule_type.parse::<RuleType>().is_ok(), "template {} has bad type", code);
        }
    }

    #[test]
    fn test_category_parents_come_first() {
        for (i, (code, _, parent, _)) in DATA_ELEMENT_CATEGORIES.iter().enumerate() {
            if let Some(parent) = parent {
                let pos = DATA_ELEMENT_CATEGORIES.iter().position(|c| c.0 == *parent);
                assert!(matches!(pos, Some(p) if p < i), "{} listed before its parent", code);
            }
        }
    }

    #[test]
    fn test_viewer_role_only_views() {
        let viewer = ROLES.iter().find(|r| r.code == "viewer").unwrap();
        assert!(PERMISSIONS.iter().filter(|p| (viewer.grants)(p)).all(|p| p.action == "view"));
    }
}
