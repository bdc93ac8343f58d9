use serde_json::{Map, Value};

use crate::core::errors::ConfigError;

pub fn validate_config(config: &Value) -> Result<(), ConfigError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 0, 65535)?;
        validate_string_array_field(
            server,
            "server.cors_allowed_origins",
            "cors_allowed_origins",
        )?;
    }

    if let Some(llm) = expect_optional_object(root, "llm")? {
        validate_optional_string_field(llm, "llm.base_url", "base_url")?;
        validate_optional_string_field(llm, "llm.api_key", "api_key")?;
        validate_optional_string_field(llm, "llm.model", "model")?;
        validate_optional_string_field(llm, "llm.embedding_model", "embedding_model")?;
        validate_u64_field(llm, "llm.timeout_secs", "timeout_secs", 1, 86_400)?;
    }

    if let Some(kb) = expect_optional_object(root, "kb")? {
        validate_u64_field(kb, "kb.top_k", "top_k", 1, 1_000)?;
        validate_f64_field(kb, "kb.score_threshold", "score_threshold", 0.0, 1.0)?;
        validate_f64_field(kb, "kb.temperature", "temperature", 0.0, 1.0)?;
        validate_optional_u64_field(kb, "kb.max_tokens", "max_tokens", 1, 1_000_000)?;
        validate_bool_field(kb, "kb.no_match_fallback_enabled", "no_match_fallback_enabled")?;
        validate_optional_string_field(kb, "kb.no_match_fallback_text", "no_match_fallback_text")?;
        validate_bool_field(kb, "kb.fusion_search_enabled", "fusion_search_enabled")?;
        validate_bool_field(kb, "kb.dump_retrieved_docs", "dump_retrieved_docs")?;

        if let Some(fusion) = expect_optional_object(kb, "fusion")? {
            validate_f64_field(fusion, "kb.fusion.rrf_k", "rrf_k", f64::MIN_POSITIVE, 10_000.0)?;
            validate_u64_field(fusion, "kb.fusion.query_count", "query_count", 1, 20)?;
        }
    }

    if let Some(prompts) = expect_optional_object(root, "prompts")? {
        if let Some(templates) = expect_optional_object(prompts, "knowledge_base_chat")? {
            for name in templates.keys() {
                validate_optional_string_field(
                    templates,
                    &format!("prompts.knowledge_base_chat.{}", name),
                    name,
                )?;
            }
        }
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ConfigError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(config_type_error(key, "object")),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(range_error(path, min, max));
    }
    Ok(())
}

/// Like [`validate_u64_field`], but `null` stands for "unset".
fn validate_optional_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ConfigError> {
    match section.get(key) {
        Some(Value::Null) | None => Ok(()),
        Some(_) => validate_u64_field(section, path, key, min, max),
    }
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if number < min || number > max {
        return Err(range_error(path, min, max));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.is_null() || value.as_str().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "string"))
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(ConfigError::Invalid {
                path: format!("{}[{}]", path, index),
                message: "value cannot be empty".to_string(),
            });
        }
    }
    Ok(())
}

fn range_error<T: std::fmt::Display>(path: &str, min: T, max: T) -> ConfigError {
    ConfigError::Invalid {
        path: path.to_string(),
        message: format!("must be between {} and {}", min, max),
    }
}

fn config_type_error(path: &str, expected: &str) -> ConfigError {
    ConfigError::Invalid {
        path: path.to_string(),
        message: format!("expected {}", expected),
    }
}
