//! Request extractors and query helpers shared by the handlers

use crate::error::{validation_error, ApiResult, AppError};
use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use std::str::FromStr;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// JSON body that has passed `validator` checks.
///
/// Malformed bodies and the first failed rule are both reported as 400.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| validation_error(format!("请求格式不正确: {}", e.body_text())))?;

        value
            .validate()
            .map_err(|e| validation_error(first_message(&e).unwrap_or_else(|| "请求参数不正确".to_string())))?;

        Ok(ValidatedJson(value))
    }
}

/// First failure message, fields visited in name order, nested lists included
fn first_message(errors: &ValidationErrors) -> Option<String> {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    fields.into_iter().find_map(|(field, kind)| match kind {
        ValidationErrorsKind::Field(errs) => errs.first().map(|e| {
            e.message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("{}格式不正确", field))
        }),
        ValidationErrorsKind::Struct(inner) => first_message(inner),
        ValidationErrorsKind::List(items) => items.values().find_map(|inner| first_message(inner)),
    })
}

/// Parse an optional enum query parameter, 400 on unknown values
pub fn parse_filter<T>(name: &str, value: Option<&str>) -> ApiResult<Option<T>>
where
    T: FromStr,
{
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| AppError::BadRequest(format!("无效的{}参数: {}", name, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use validator::Validate;

    #[derive(Debug, Validate)]
    struct Sample {
        #[validate(length(min = 3, message = "名称过短"))]
        name: String,
    }

    #[test]
    fn test_first_message_uses_rule_message() {
        let errors = Sample { name: "ab".into() }.validate().unwrap_err();
        assert_eq!(first_message(&errors).as_deref(), Some("名称过短"));
    }

    #[test]
    fn test_parse_filter() {
        let status: Option<TaskStatus> = parse_filter("status", Some("reviewing")).unwrap();
        assert_eq!(status, Some(TaskStatus::Reviewing));

        let blank: Option<TaskStatus> = parse_filter("status", Some(" ")).unwrap();
        assert_eq!(blank, None);

        assert!(parse_filter::<TaskStatus>("status", Some("done")).is_err());
        assert!(parse_filter::<i16>("status", Some("x")).is_err());
    }
}
