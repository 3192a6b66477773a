//! Program parser: converts raw YAML/JSON/TOML text into [`ProgramSchema`].

use std::path::Path;

use super::schema::ProgramSchema;
use crate::error::{GraphError, GraphResult};

/// Supported program file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramFormat {
    /// `.yaml` / `.yml`
    Yaml,
    Json,
    Toml,
}

impl ProgramFormat {
    /// Format implied by a file extension, if any.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "yaml" | "yml" => Some(ProgramFormat::Yaml),
            "json" => Some(ProgramFormat::Json),
            "toml" => Some(ProgramFormat::Toml),
            _ => None,
        }
    }
}

pub fn parse_program(content: &str, format: ProgramFormat) -> GraphResult<ProgramSchema> {
    let parse_error = |e: String| GraphError::Program(format!("parse error: {e}"));
    match format {
        ProgramFormat::Yaml => serde_saphyr::from_str(content).map_err(|e| parse_error(e.to_string())),
        ProgramFormat::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string())),
        ProgramFormat::Toml => {
            // Through serde_json::Value so JSON-typed fields (GraphQL variables) survive.
            let value: toml::Value = toml::from_str(content).map_err(|e| parse_error(e.to_string()))?;
            serde_json::from_value(toml_value_to_json(value)).map_err(|e| parse_error(e.to_string()))
        }
    }
}

/// Reads and parses a program file, picking the format from its extension.
pub fn read_program(path: impl AsRef<Path>) -> GraphResult<ProgramSchema> {
    let path = path.as_ref();
    let format = ProgramFormat::from_path(path).ok_or_else(|| {
        GraphError::Program(format!(
            "{}: unsupported extension, expected .yaml, .yml, .json or .toml",
            path.display()
        ))
    })?;
    let content = std::fs::read_to_string(path)
        .map_err(|e| GraphError::Program(format!("{}: {e}", path.display())))?;
    parse_program(&content, format).map_err(|e| match e {
        GraphError::Program(message) => GraphError::Program(format!("{}: {message}", path.display())),
        other => other,
    })
}

/// TOML has no null, so datetimes are stringified.
fn toml_value_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(toml_value_to_json).collect())
        }
        toml::Value::Table(table) => serde_json::Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_value_to_json(v)))
                .collect(),
        ),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::engines::EngineType;
    use crate::program::checks::CheckSpec;
    use crate::reporting::ReporterConfig;
    use crate::stages::StagePriority;

    const YAML: &str = r#"
name: smoke
stages:
  - name: prepare
    type: setup
  - name: load
    type: execute
    depends: [prepare]
    priority: high
    timeout: 30s
    persona:
      batch_size: 10
      total_time: 2s
    actions:
      - name: health
        url: http://127.0.0.1:8080/health
        checks:
          - status: 200
          - body_contains: ok
  - name: publish
    type: submit
    depends: [load]
    reporters:
      - type: stdout
"#;

    #[test]
    fn test_parse_yaml() {
        let program = parse_program(YAML, ProgramFormat::Yaml).unwrap();
        assert_eq!(program.name, "smoke");
        assert_eq!(program.stages.len(), 3);

        let load = &program.stages[1];
        assert_eq!(load.stage_type, "execute");
        assert_eq!(load.depends, vec!["prepare"]);
        assert_eq!(load.priority, StagePriority::High);
        assert_eq!(load.timeout, Some(Duration::from_secs(30)));
        assert_eq!(load.persona.as_ref().unwrap().batch_size, 10);
        assert_eq!(load.actions[0].engine, EngineType::Http);
        assert_eq!(load.actions[0].method, "GET");
        assert_eq!(
            load.actions[0].checks,
            vec![CheckSpec::Status(200), CheckSpec::BodyContains("ok".to_string())]
        );
        assert_eq!(program.stages[2].reporters, vec![ReporterConfig::Stdout]);
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"name":"j","stages":[{"name":"load","type":"Execute","actions":[
            {"name":"q","engine":"graphql","url":"http://localhost/graphql","query":"{ ping }","variables":{"a":1}}
        ]}]}"#;
        let program = parse_program(json, ProgramFormat::Json).unwrap();
        let action = &program.stages[0].actions[0];
        assert_eq!(action.engine, EngineType::Graphql);
        assert_eq!(action.variables, Some(serde_json::json!({"a": 1})));
        assert!(program.stages[0].allow_parallel);
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
name = "t"

[[stages]]
name = "load"
type = "execute"
workers = 2
wait = 1.5

[[stages.actions]]
name = "ping"
engine = "udp"
url = "udp://127.0.0.1:9000"
body = "ping"
checks = [{ header_present = "x-id" }]
"#;
        let program = parse_program(toml, ProgramFormat::Toml).unwrap();
        let stage = &program.stages[0];
        assert_eq!(stage.workers, Some(2));
        assert_eq!(stage.wait, Some(Duration::from_millis(1500)));
        assert_eq!(stage.actions[0].engine, EngineType::Udp);
        assert_eq!(
            stage.actions[0].checks,
            vec![CheckSpec::HeaderPresent("x-id".to_string())]
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_program("{{{invalid", ProgramFormat::Json).is_err());
        assert!(parse_program("[[[bad", ProgramFormat::Toml).is_err());
        assert!(parse_program("name: x\nstages: 3\n", ProgramFormat::Yaml).is_err());
        assert!(matches!(
            parse_program("", ProgramFormat::Json),
            Err(GraphError::Program(_))
        ));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ProgramFormat::from_path(Path::new("a/b.YML")), Some(ProgramFormat::Yaml));
        assert_eq!(ProgramFormat::from_path(Path::new("b.toml")), Some(ProgramFormat::Toml));
        assert_eq!(ProgramFormat::from_path(Path::new("b.rs")), None);
        assert_eq!(ProgramFormat::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn test_read_program_prefixes_path() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("smoke.yaml");
        std::fs::write(&good, YAML).unwrap();
        assert_eq!(read_program(&good).unwrap().name, "smoke");

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{").unwrap();
        let err = read_program(&bad).unwrap_err().to_string();
        assert!(err.contains("bad.json"));

        assert!(read_program(dir.path().join("notes.txt")).is_err());
    }

    #[test]
    fn test_toml_value_to_json_datetime() {
        let value: toml::Value = toml::from_str("at = 1979-05-27T07:32:00Z").unwrap();
        let json = toml_value_to_json(value);
        assert_eq!(json["at"], serde_json::json!("1979-05-27T07:32:00Z"));
    }
}
