//! JSON schema definitions for catalog and ledger validation.

/// JSON Schema for catalog configuration files.
pub const CATALOG_SCHEMA: &str = r##"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "$id": "https://hardkit.dev/schemas/catalog.json",
  "title": "Hardkit Module Catalog",
  "type": "object",
  "required": ["platforms"],
  "properties": {
    "scripts_dir": { "type": "string", "minLength": 1 },
    "ledger_dir": { "type": "string", "minLength": 1 },
    "lock_path": { "type": ["string", "null"] },
    "module_timeout_secs": { "type": ["integer", "null"], "minimum": 1 },
    "platforms": {
      "type": "object",
      "minProperties": 1,
      "additionalProperties": false,
      "properties": {
        "linux": { "$ref": "#/definitions/levelTable" },
        "windows": { "$ref": "#/definitions/levelTable" }
      }
    }
  },
  "definitions": {
    "levelTable": {
      "type": "object",
      "additionalProperties": false,
      "properties": {
        "L1": { "$ref": "#/definitions/moduleList" },
        "L2": { "$ref": "#/definitions/moduleList" },
        "L3": { "$ref": "#/definitions/moduleList" }
      }
    },
    "moduleList": {
      "type": "array",
      "items": {
        "type": "string",
        "minLength": 1,
        "pattern": "^[^/\\\\]+$"
      }
    }
  }
}"##;

/// JSON Schema for a rollback ledger entry.
pub const LEDGER_ENTRY_SCHEMA: &str = r##"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "$id": "https://hardkit.dev/schemas/ledger-entry.json",
  "title": "Hardkit Rollback Ledger Entry",
  "type": "object",
  "required": ["value"]
}"##;

/// Get the catalog schema as a parsed JSON value.
pub fn catalog_schema() -> serde_json::Value {
    serde_json::from_str(CATALOG_SCHEMA).expect("Invalid catalog schema")
}

/// Get the ledger entry schema as a parsed JSON value.
pub fn ledger_entry_schema() -> serde_json::Value {
    serde_json::from_str(LEDGER_ENTRY_SCHEMA).expect("Invalid ledger entry schema")
}
