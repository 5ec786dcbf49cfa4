//! Catalog and ledger entry validation.

use crate::schema;
use hardkit_common::Error;
use jsonschema::JSONSchema;
use serde_json::Value;
use thiserror::Error as ThisError;

/// Validation error type.
#[derive(ThisError, Debug)]
pub enum ValidationError {
    #[error("{message} at {path}")]
    Schema { message: String, path: String },

    #[error("Duplicate module {module} in {platform} {level}")]
    DuplicateModule {
        module: String,
        platform: String,
        level: String,
    },
}

/// Result of a validation pass.
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_against(schema_value: &Value, instance: &Value) -> Result<ValidationResult, Error> {
    let mut result = ValidationResult::new();

    let compiled = JSONSchema::compile(schema_value)
        .map_err(|e| Error::SchemaValidation(e.to_string()))?;

    let validation = compiled.validate(instance);
    if let Err(errors) = validation {
        for error in errors {
            result.add_error(ValidationError::Schema {
                message: error.to_string(),
                path: error.instance_path.to_string(),
            });
        }
    }

    Ok(result)
}

/// Validate a catalog document against the JSON schema.
///
/// A module listed twice within one level is only a warning: resolution
/// deduplicates anyway.
pub fn validate_catalog(catalog: &Value) -> Result<ValidationResult, Error> {
    let mut result = validate_against(&schema::catalog_schema(), catalog)?;

    if let Some(platforms) = catalog.get("platforms").and_then(|p| p.as_object()) {
        for (platform, levels) in platforms {
            let Some(levels) = levels.as_object() else {
                continue;
            };
            for (level, modules) in levels {
                let names: Vec<&str> = modules
                    .as_array()
                    .map(|a| a.iter().filter_map(|m| m.as_str()).collect())
                    .unwrap_or_default();
                for (i, name) in names.iter().enumerate() {
                    if names[..i].contains(name) {
                        result.add_warning(
                            ValidationError::DuplicateModule {
                                module: name.to_string(),
                                platform: platform.clone(),
                                level: level.clone(),
                            }
                            .to_string(),
                        );
                    }
                }
            }
        }
    }

    Ok(result)
}

/// Validate a rollback ledger entry: a JSON object carrying a `value` field.
pub fn validate_ledger_entry(entry: &Value) -> Result<ValidationResult, Error> {
    validate_against(&schema::ledger_entry_schema(), entry)
}
