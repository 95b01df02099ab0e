//! Reply template store.
//!
//! Templates carry a schema (required/optional fields, example payload)
//! alongside their subject and body text. `fill` validates required fields
//! strictly before rendering; a validation failure never produces a partial
//! render. Placeholders use `{field}` syntax; a declared optional field
//! that was not provided renders as empty, an undeclared placeholder is a
//! rendering error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::error::TemplateError;

/// Field values for a fill call.
pub type FieldValues = BTreeMap<String, String>;

/// A reply template with its schema metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
    #[serde(default)]
    pub example: serde_json::Value,
}

/// Summary row for listings.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
}

/// A field descriptor in a template schema.
#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: String,
    pub description: String,
}

/// Detailed schema for one template.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateSchema {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub required: Vec<FieldSpec>,
    pub optional: Vec<FieldSpec>,
    pub example: serde_json::Value,
}

/// Rendered subject and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub subject: String,
    pub body: String,
}

/// Outcome of a fill call. Validation always precedes rendering, so
/// `MissingFields` carries no partial output.
#[derive(Debug)]
pub enum FillOutcome {
    Rendered(Rendered),
    NotFound,
    MissingFields { missing: Vec<String> },
    RenderingError { message: String },
}

impl FillOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Rendered(_))
    }

    /// Stable error code per the collaborator contract.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::Rendered(_) => None,
            Self::NotFound => Some("TEMPLATE_NOT_FOUND"),
            Self::MissingFields { .. } => Some("MISSING_FIELDS"),
            Self::RenderingError { .. } => Some("RENDERING_ERROR"),
        }
    }
}

// ── Store ───────────────────────────────────────────────────────────

/// In-process template store: built-in catalogue plus optional overrides
/// loaded from a directory of JSON files.
pub struct TemplateStore {
    templates: BTreeMap<String, Template>,
}

impl TemplateStore {
    /// The built-in catalogue.
    pub fn builtin() -> Self {
        let mut templates = BTreeMap::new();
        for template in builtin_templates() {
            templates.insert(template.id.clone(), template);
        }
        Self { templates }
    }

    /// Built-in catalogue with overrides from `dir`. Each `*.json` file
    /// holds one [`Template`]; a file that fails to parse is skipped with
    /// a warning, matching the store's load-what-you-can contract.
    pub fn with_overrides(dir: &Path) -> Result<Self, TemplateError> {
        let mut store = Self::builtin();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Template>(&raw) {
                Ok(template) => {
                    store.templates.insert(template.id.clone(), template);
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping invalid template file");
                }
            }
        }
        Ok(store)
    }

    /// Summaries of every known template.
    pub fn list(&self) -> Vec<TemplateSummary> {
        self.templates
            .values()
            .map(|t| TemplateSummary {
                id: t.id.clone(),
                name: t.name.clone(),
                description: t.description.clone(),
                version: t.version.clone(),
            })
            .collect()
    }

    /// Detailed schema for one template.
    pub fn schema(&self, id: &str) -> Option<TemplateSchema> {
        let template = self.templates.get(id)?;
        let spec = |name: &String| FieldSpec {
            name: name.clone(),
            kind: "string".into(),
            description: title_case(name),
        };
        Some(TemplateSchema {
            id: template.id.clone(),
            name: template.name.clone(),
            description: template.description.clone(),
            version: template.version.clone(),
            required: template.required.iter().map(spec).collect(),
            optional: template.optional.iter().map(spec).collect(),
            example: template.example.clone(),
        })
    }

    /// Validate and render a template.
    pub fn fill(&self, id: &str, values: &FieldValues) -> FillOutcome {
        let Some(template) = self.templates.get(id) else {
            return FillOutcome::NotFound;
        };

        let missing: Vec<String> = template
            .required
            .iter()
            .filter(|field| !values.contains_key(*field))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return FillOutcome::MissingFields { missing };
        }

        let subject = match render(&template.subject, values, &template.optional) {
            Ok(s) => s,
            Err(message) => return FillOutcome::RenderingError { message },
        };
        let body = match render(&template.body, values, &template.optional) {
            Ok(b) => b,
            Err(message) => return FillOutcome::RenderingError { message },
        };

        FillOutcome::Rendered(Rendered { subject, body })
    }
}

/// Substitute `{field}` placeholders. Declared optional fields default to
/// empty; anything else unresolved fails the render outright.
fn render(text: &str, values: &FieldValues, optional: &[String]) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices();

    while let Some((_, c)) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        let mut closed = false;
        for (_, inner) in chars.by_ref() {
            if inner == '}' {
                closed = true;
                break;
            }
            name.push(inner);
        }
        if !closed {
            return Err("unterminated placeholder".into());
        }
        match values.get(&name) {
            Some(value) => out.push_str(value),
            None if optional.iter().any(|o| o == &name) => {}
            None => return Err(format!("unknown placeholder '{{{name}}}'")),
        }
    }
    Ok(out)
}

fn title_case(field: &str) -> String {
    field
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// The catalogue shipped with the agent.
fn builtin_templates() -> Vec<Template> {
    vec![
        Template {
            id: "candidate_welcome".into(),
            name: "Candidate welcome".into(),
            description: "Acknowledges a received application".into(),
            version: "1.0".into(),
            subject: "Re: Your application".into(),
            body: "Hi {candidate_name},\n\n\
                   Thank you for your application! We have received your CV and our \
                   recruitment team will review it shortly. We will get back to you \
                   about next steps.\n\n\
                   Best regards,\nThe Recruitment Team"
                .into(),
            required: vec!["candidate_name".into()],
            optional: vec![],
            example: serde_json::json!({ "candidate_name": "Jane Doe" }),
        },
        Template {
            id: "position_acknowledgment".into(),
            name: "Position acknowledgment".into(),
            description: "Confirms a position announcement was recorded".into(),
            version: "1.0".into(),
            subject: "Re: {position_title}".into(),
            body: "Hello,\n\n\
                   The position '{position_title}' ({department}) has been recorded \
                   and is now visible to the recruitment team.{candidate_match_info}\n\n\
                   Best regards,\nThe Recruitment Team"
                .into(),
            required: vec!["position_title".into(), "department".into()],
            optional: vec!["candidate_match_info".into()],
            example: serde_json::json!({
                "position_title": "Frontend Developer",
                "department": "Engineering",
                "candidate_match_info": ""
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> FieldValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn builtin_catalogue_lists_both_templates() {
        let store = TemplateStore::builtin();
        let ids: Vec<String> = store.list().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["candidate_welcome", "position_acknowledgment"]);
    }

    #[test]
    fn fill_renders_candidate_welcome() {
        let store = TemplateStore::builtin();
        let outcome = store.fill("candidate_welcome", &values(&[("candidate_name", "Jane")]));
        match outcome {
            FillOutcome::Rendered(rendered) => {
                assert_eq!(rendered.subject, "Re: Your application");
                assert!(rendered.body.starts_with("Hi Jane,"));
            }
            other => panic!("Expected Rendered, got {:?}", other),
        }
    }

    #[test]
    fn fill_missing_required_field_produces_no_output() {
        let store = TemplateStore::builtin();
        let outcome = store.fill("candidate_welcome", &values(&[]));
        assert!(!outcome.is_ok());
        assert_eq!(outcome.error_code(), Some("MISSING_FIELDS"));
        match outcome {
            FillOutcome::MissingFields { missing } => {
                assert_eq!(missing, vec!["candidate_name"]);
            }
            other => panic!("Expected MissingFields, got {:?}", other),
        }
    }

    #[test]
    fn fill_reports_all_missing_fields() {
        let store = TemplateStore::builtin();
        let outcome = store.fill("position_acknowledgment", &values(&[]));
        match outcome {
            FillOutcome::MissingFields { missing } => {
                assert_eq!(missing, vec!["position_title", "department"]);
            }
            other => panic!("Expected MissingFields, got {:?}", other),
        }
    }

    #[test]
    fn fill_unknown_template() {
        let store = TemplateStore::builtin();
        let outcome = store.fill("no_such_template", &values(&[]));
        assert_eq!(outcome.error_code(), Some("TEMPLATE_NOT_FOUND"));
    }

    #[test]
    fn optional_field_defaults_to_empty() {
        let store = TemplateStore::builtin();
        let outcome = store.fill(
            "position_acknowledgment",
            &values(&[("position_title", "Backend Developer"), ("department", "Engineering")]),
        );
        match outcome {
            FillOutcome::Rendered(rendered) => {
                assert_eq!(rendered.subject, "Re: Backend Developer");
                assert!(rendered.body.contains("'Backend Developer' (Engineering)"));
                assert!(!rendered.body.contains('{'));
            }
            other => panic!("Expected Rendered, got {:?}", other),
        }
    }

    #[test]
    fn undeclared_placeholder_is_a_rendering_error() {
        let template = Template {
            id: "broken".into(),
            name: "Broken".into(),
            description: "references a field it never declared".into(),
            version: "1.0".into(),
            subject: "Hello {who}".into(),
            body: "".into(),
            required: vec![],
            optional: vec![],
            example: serde_json::Value::Null,
        };
        let mut store = TemplateStore::builtin();
        store.templates.insert(template.id.clone(), template);

        let outcome = store.fill("broken", &values(&[]));
        assert_eq!(outcome.error_code(), Some("RENDERING_ERROR"));
    }

    #[test]
    fn schema_exposes_required_and_optional() {
        let store = TemplateStore::builtin();
        let schema = store.schema("position_acknowledgment").unwrap();
        let required: Vec<&str> = schema.required.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(required, vec!["position_title", "department"]);
        assert_eq!(schema.optional[0].name, "candidate_match_info");
        assert_eq!(schema.optional[0].description, "Candidate Match Info");
        assert!(schema.example.get("position_title").is_some());
    }

    #[test]
    fn schema_unknown_template_is_none() {
        let store = TemplateStore::builtin();
        assert!(store.schema("nope").is_none());
    }

    #[test]
    fn overrides_replace_builtins_and_add_new() {
        let dir = tempfile::tempdir().unwrap();
        let custom = serde_json::json!({
            "id": "candidate_welcome",
            "name": "Candidate welcome (custom)",
            "description": "override",
            "version": "2.0",
            "subject": "Thanks, {candidate_name}!",
            "body": "Short and sweet, {candidate_name}.",
            "required": ["candidate_name"],
            "optional": [],
            "example": {"candidate_name": "Jane"}
        });
        std::fs::write(
            dir.path().join("candidate_welcome.json"),
            serde_json::to_string_pretty(&custom).unwrap(),
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = TemplateStore::with_overrides(dir.path()).unwrap();
        let outcome = store.fill("candidate_welcome", &values(&[("candidate_name", "Jane")]));
        match outcome {
            FillOutcome::Rendered(rendered) => {
                assert_eq!(rendered.subject, "Thanks, Jane!");
            }
            other => panic!("Expected Rendered, got {:?}", other),
        }
        // Untouched builtin still present
        assert!(store.schema("position_acknowledgment").is_some());
    }

    #[test]
    fn invalid_override_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        let store = TemplateStore::with_overrides(dir.path()).unwrap();
        assert_eq!(store.list().len(), 2);
    }

    #[test]
    fn unterminated_placeholder_fails_render() {
        assert!(render("hello {name", &values(&[("name", "x")]), &[]).is_err());
    }
}
