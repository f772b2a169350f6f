use super::create_router;
use crate::auth::password::hash_password_with_cost;
use crate::config::Settings;
use crate::repository::MemoryStore;
use crate::seed::{ADMIN_ROLE, ADMIN_USERNAME};
use crate::state::{AppState, SharedState};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use once_cell::sync::Lazy;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const ADMIN_PASSWORD: &str = "admin123";

static ADMIN_HASH: Lazy<String> = Lazy::new(|| hash_password_with_cost(ADMIN_PASSWORD, 4).unwrap());

fn app() -> (Router, SharedState) {
    let store = Arc::new(MemoryStore::seeded(&ADMIN_HASH));
    let state = Arc::new(AppState::new(store, Settings::default()));
    (create_router(state.clone()), state)
}

async fn admin_token(state: &SharedState) -> String {
    let admin = state.users.find_user_by_username(ADMIN_USERNAME).await.unwrap().unwrap();
    state
        .tokens
        .issue(admin.user.id, ADMIN_USERNAME, vec![ADMIN_ROLE.to_string()])
        .unwrap()
}

async fn send(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn login(app: &Router, username: &str, password: &str) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "username": username, "password": password })),
    )
    .await
}

async fn create_element(app: &Router, token: &str, code: &str) -> (StatusCode, Value) {
    send(
        app,
        Method::POST,
        "/api/data-elements",
        Some(token),
        Some(json!({ "code": code, "name": "客户编号" })),
    )
    .await
}

async fn create_task(app: &Router, token: &str, extra: Value) -> i64 {
    let mut body = json!({ "name": "清洗客户数据", "taskType": "cleaning" });
    if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        body.extend(extra.clone());
    }
    let (status, json) = send(app, Method::POST, "/api/tasks", Some(token), Some(body)).await;
    assert_eq!(status, StatusCode::OK, "{}", json);
    json["data"]["id"].as_i64().unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = app();
    let (status, json) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let (app, _) = app();

    let (status, json) = send(&app, Method::GET, "/api/data-elements", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "未授权访问");

    let (status, _) = send(&app, Method::GET, "/api/tasks", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_login_then_me() {
    let (app, _) = app();

    let (status, json) = login(&app, ADMIN_USERNAME, ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["user"]["username"], ADMIN_USERNAME);
    assert_eq!(json["data"]["user"]["roles"][0]["code"], ADMIN_ROLE);
    let token = json["data"]["token"].as_str().unwrap().to_string();

    let (status, json) = send(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["data"]["permissions"].as_array().unwrap().len() > 1);

    let (status, json) = login(&app, ADMIN_USERNAME, "wrong-password").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "用户名或密码错误");

    let (status, _) = login(&app, "ghost", ADMIN_PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_disabled_account_cannot_log_in() {
    let (app, state) = app();
    let token = admin_token(&state).await;

    let (status, json) = send(
        &app,
        Method::POST,
        "/api/users",
        Some(&token),
        Some(json!({ "username": "zhang", "password": "secret1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = json["data"]["id"].as_i64().unwrap();

    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/api/users/{}", id),
        Some(&token),
        Some(json!({ "status": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = login(&app, "zhang", "secret1").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"], "账号已被禁用");
}

#[tokio::test]
async fn test_registered_user_lacks_management_permission() {
    let (app, _) = app();
    let body = json!({ "username": "li", "password": "secret1", "email": "li@example.com" });

    let (status, json) = send(&app, Method::POST, "/api/auth/register", None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "注册成功");

    let (status, json) = send(&app, Method::POST, "/api/auth/register", None, Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "用户名已存在");

    let (_, json) = login(&app, "li", "secret1").await;
    let token = json["data"]["token"].as_str().unwrap().to_string();

    let (status, json) = send(&app, Method::GET, "/api/users", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"], "权限不足");

    // Registries only need a valid token
    let (status, _) = send(&app, Method::GET, "/api/data-elements", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_register_validation_message() {
    let (app, _) = app();
    let (status, json) = send(
        &app,
        Method::POST,
        "/api/auth/register",
        None,
        Some(json!({ "username": "wang", "password": "123" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "密码长度需为6-100位");
}

#[tokio::test]
async fn test_cannot_delete_self() {
    let (app, state) = app();
    let token = admin_token(&state).await;
    let admin = state.users.find_user_by_username(ADMIN_USERNAME).await.unwrap().unwrap();

    let (status, json) = send(
        &app,
        Method::DELETE,
        &format!("/api/users/{}", admin.user.id),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "不能删除自己");
}

#[tokio::test]
async fn test_duplicate_code_conflicts_without_writing() {
    let (app, state) = app();
    let token = admin_token(&state).await;

    let (status, _) = create_element(&app, &token, "DE001").await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = create_element(&app, &token, "DE001").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "数据元编码已存在");

    let (_, json) = send(&app, Method::GET, "/api/data-elements", Some(&token), None).await;
    assert_eq!(json["data"]["total"], 1);
}

#[tokio::test]
async fn test_update_bumps_version_and_keeps_history() {
    let (app, state) = app();
    let token = admin_token(&state).await;
    let (_, json) = create_element(&app, &token, "DE002").await;
    let id = json["data"]["id"].as_i64().unwrap();

    let (status, json) = send(
        &app,
        Method::PUT,
        &format!("/api/data-elements/{}", id),
        Some(&token),
        Some(json!({ "name": "客户唯一编号", "version": 99 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["version"], 2);
    assert_eq!(json["data"]["name"], "客户唯一编号");

    let (_, json) = send(&app, Method::GET, &format!("/api/data-elements/{}", id), Some(&token), None).await;
    let versions = json["data"]["versions"].as_array().unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0]["version"], 1);
    assert_eq!(versions[0]["content"]["name"], "客户编号");
}

#[tokio::test]
async fn test_referenced_element_cannot_be_deleted() {
    let (app, state) = app();
    let token = admin_token(&state).await;
    let (_, json) = create_element(&app, &token, "DE003").await;
    let id = json["data"]["id"].as_i64().unwrap();
    create_task(&app, &token, json!({ "relatedDataElementId": id })).await;

    let uri = format!("/api/data-elements/{}", id);
    let (status, json) = send(&app, Method::DELETE, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "该数据元已被任务引用，无法删除");

    let (status, _) = send(&app, Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let (app, state) = app();
    let token = admin_token(&state).await;
    let (status, json) = send(&app, Method::GET, "/api/mapping-rules/4242", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "映射规则不存在");
}

#[tokio::test]
async fn test_assign_only_from_pending() {
    let (app, state) = app();
    let token = admin_token(&state).await;
    let admin = state.users.find_user_by_username(ADMIN_USERNAME).await.unwrap().unwrap();
    let task = create_task(&app, &token, json!({})).await;

    let uri = format!("/api/tasks/{}/assign", task);
    let body = json!({ "assignedTo": admin.user.id });
    let (status, json) = send(&app, Method::POST, &uri, Some(&token), Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "pending");

    let (status, json) = send(&app, Method::POST, &uri, Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "任务状态不允许分配");

    let (_, json) = send(&app, Method::GET, &format!("/api/tasks/{}", task), Some(&token), None).await;
    assert_eq!(json["data"]["status"], "assigned");
    assert_eq!(json["data"]["assignments"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_quality_rule_routes_keep_history() {
    let (app, state) = app();
    let token = admin_token(&state).await;

    let body = json!({ "code": "QR_PHONE", "name": "手机号完整性", "ruleType": "completeness" });
    let (status, json) = send(&app, Method::POST, "/api/quality-rules", Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "创建质量规则成功");
    assert_eq!(json["data"]["severity"], "error");
    let uri = format!("/api/quality-rules/{}", json["data"]["id"].as_i64().unwrap());

    let (status, json) = send(&app, Method::PUT, &uri, Some(&token), Some(json!({ "severity": "warning" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["version"], 2);

    let (_, json) = send(&app, Method::GET, &uri, Some(&token), None).await;
    assert_eq!(json["data"]["severity"], "warning");
    assert_eq!(json["data"]["versions"][0]["version"], 1);

    let (status, _) = send(&app, Method::GET, "/api/quality-rules?ruleType=freshness", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::DELETE, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, json) = send(&app, Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "质量规则不存在");
}

#[tokio::test]
async fn test_task_actions_reject_incomplete_bodies() {
    let (app, state) = app();
    let token = admin_token(&state).await;
    let task = create_task(&app, &token, json!({})).await;

    for action in ["assign", "respond", "review"] {
        let uri = format!("/api/tasks/{}/{}", task, action);
        let (status, json) = send(&app, Method::POST, &uri, Some(&token), Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", action);
        assert_eq!(json["success"], false);
        assert_eq!(json["code"], "VALIDATION_ERROR");
    }

    let uri = format!("/api/tasks/{}/review", task);
    let (status, json) = send(&app, Method::POST, &uri, Some(&token), Some(json!({ "action": " " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "操作不能为空");

    let (_, json) = send(&app, Method::GET, &format!("/api/tasks/{}", task), Some(&token), None).await;
    assert_eq!(json["data"]["status"], "pending");
}

#[tokio::test]
async fn test_task_lifecycle_through_http() {
    let (app, state) = app();
    let token = admin_token(&state).await;
    let admin = state.users.find_user_by_username(ADMIN_USERNAME).await.unwrap().unwrap();
    let task = create_task(&app, &token, json!({ "priority": "high" })).await;
    let base = format!("/api/tasks/{}", task);

    send(
        &app,
        Method::POST,
        &format!("{}/assign", base),
        Some(&token),
        Some(json!({ "assignedTo": admin.user.id })),
    )
    .await;

    let (status, json) = send(
        &app,
        Method::PUT,
        &format!("{}/respond", base),
        Some(&token),
        Some(json!({ "action": "reject" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "拒绝原因不能为空");

    let (status, json) = send(
        &app,
        Method::POST,
        &format!("{}/respond", base),
        Some(&token),
        Some(json!({ "action": "accept" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "in_progress");

    let (status, json) = send(
        &app,
        Method::POST,
        &format!("{}/complete", base),
        Some(&token),
        Some(json!({ "resultSummary": "清洗完成", "processedCount": 10, "successCount": 9, "failedCount": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["processedCount"], 10);

    let (status, json) = send(
        &app,
        Method::POST,
        &format!("{}/review", base),
        Some(&token),
        Some(json!({ "action": "approve" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["message"], "审核通过");
    assert_eq!(json["data"]["status"], "completed");
}

#[tokio::test]
async fn test_executors_through_http() {
    let (app, state) = app();
    let token = admin_token(&state).await;

    let (status, json) = send(
        &app,
        Method::POST,
        "/api/quality-checks",
        Some(&token),
        Some(json!({ "code": "QC_CUSTOMER", "name": "客户表检查" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let check = json["data"]["id"].as_i64().unwrap();

    let (status, json) = send(
        &app,
        Method::POST,
        &format!("/api/quality-checks/{}/execute", check),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let total = json["data"]["totalRecords"].as_i64().unwrap();
    assert!((1000..11000).contains(&total));

    let (_, json) = send(
        &app,
        Method::GET,
        &format!("/api/quality-trends?checkId={}", check),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);

    let (status, json) = send(&app, Method::GET, "/api/quality-trends", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "请指定检查ID");

    let (status, _) = send(&app, Method::POST, "/api/sync-tasks/999/execute", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_filter_is_bad_request() {
    let (app, state) = app();
    let token = admin_token(&state).await;
    let (status, _) = send(&app, Method::GET, "/api/tasks?status=finished", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_category_tree_and_grouped_permissions() {
    let (app, state) = app();
    let token = admin_token(&state).await;

    let (_, json) = send(&app, Method::GET, "/api/data-element-categories", Some(&token), None).await;
    let roots = json["data"].as_array().unwrap();
    assert_eq!(roots.len(), 2);
    assert_eq!(roots[0]["code"], "basic");
    assert_eq!(roots[0]["children"].as_array().unwrap().len(), 2);

    let (_, json) = send(&app, Method::GET, "/api/permissions?module=task", Some(&token), None).await;
    assert_eq!(json["data"]["task"].as_array().unwrap().len(), 4);
    assert!(json["data"].get("user").is_none());
}
