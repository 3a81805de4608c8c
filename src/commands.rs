//! Command execution.

use crate::loader::{load_definition, Runtime};
use crate::Commands;
use colored::Colorize;
use markflow_core::{
    ApplyError, Context, Definition, Record, Subject, SubjectWorkflow, TransitionBlockerList,
};
use serde_json::{Map, Value};
use std::error::Error;
use std::path::Path;

/// Executes a one-shot command and returns the formatted output.
pub fn execute(runtime: &Runtime, cmd: Commands) -> Result<String, Box<dyn Error>> {
    match cmd {
        Commands::Repl => Err("the REPL cannot run as a one-shot command".into()),

        Commands::Validate { file } => validate(&file),

        Commands::Workflows => Ok(workflows(runtime)),

        Commands::Show { workflow } => show(runtime, &workflow),

        Commands::Create {
            subject_type,
            id,
            fields,
            workflow,
        } => {
            let fields = fields.as_deref().map(parse_object_arg).transpose()?;
            create(
                runtime,
                &subject_type,
                id,
                fields.unwrap_or_default(),
                workflow.as_deref(),
            )
        }

        Commands::List { subject_type } => list(runtime, subject_type.as_deref()),

        Commands::Marking { id, workflow } => marking(runtime, &id, workflow.as_deref()),

        Commands::Can {
            id,
            transition,
            workflow,
        } => can(runtime, &id, &transition, workflow.as_deref()),

        Commands::Enabled { id, workflow } => enabled(runtime, &id, workflow.as_deref()),

        Commands::Apply {
            id,
            transition,
            context,
            workflow,
        } => {
            let context = context.as_deref().map(parse_object_arg).transpose()?;
            apply(
                runtime,
                &id,
                &transition,
                context.unwrap_or_default(),
                workflow.as_deref(),
            )
        }
    }
}

/// Parses and validates a definition file.
pub fn validate(path: &Path) -> Result<String, Box<dyn Error>> {
    let definition = load_definition(path)?;
    Ok(format!(
        "{} {} (checksum: {}, {} places, {} transitions)",
        "Valid".green(),
        path.display().to_string().cyan(),
        definition.checksum(),
        definition.places().len(),
        definition.transitions().len()
    ))
}

pub fn workflows(runtime: &Runtime) -> String {
    let names = runtime.registry.names();
    if names.is_empty() {
        return "No workflows configured".yellow().to_string();
    }
    names
        .iter()
        .map(|n| format!("  {}", n.cyan()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn show(runtime: &Runtime, workflow: &str) -> Result<String, Box<dyn Error>> {
    let wf = runtime
        .registry
        .by_name(workflow)
        .ok_or_else(|| format!("unknown workflow '{}'", workflow))?;
    Ok(format!(
        "{}\n{}",
        format!("Workflow {}", wf.name().cyan()).bold(),
        format_definition(wf.definition())
    ))
}

pub fn create(
    runtime: &Runtime,
    subject_type: &str,
    id: Option<String>,
    fields: Map<String, Value>,
    workflow: Option<&str>,
) -> Result<String, Box<dyn Error>> {
    // Resolve the workflow before anything is stored.
    let lookup = Record {
        kind: subject_type.to_string(),
        id: None,
        fields: fields.clone(),
    };
    let facade = SubjectWorkflow::for_subject(&runtime.registry, &lookup, workflow)?;

    let stored = runtime.repository.insert(subject_type, id, fields)?;
    let mut subject = stored.to_record();
    let marking = facade.initialize(&mut subject, Context::new())?;

    Ok(format!(
        "{} {} {} (marking: {})",
        "Created".green(),
        subject_type,
        stored.id.cyan(),
        marking.to_string().yellow()
    ))
}

pub fn list(runtime: &Runtime, subject_type: Option<&str>) -> Result<String, Box<dyn Error>> {
    let records = runtime.repository.list(subject_type)?;
    if records.is_empty() {
        return Ok("No records".yellow().to_string());
    }
    Ok(records
        .iter()
        .map(|r| format!("  {} {} v{} {}", r.id.cyan(), r.kind, r.version, format_fields(&r.fields)))
        .collect::<Vec<_>>()
        .join("\n"))
}

pub fn marking(
    runtime: &Runtime,
    id: &str,
    workflow: Option<&str>,
) -> Result<String, Box<dyn Error>> {
    let (subject, facade) = resolve(runtime, id, workflow)?;
    let marking = facade.marking(&subject)?;
    if marking.is_empty() {
        return Ok(format!("{} has no marking in {}", id.cyan(), facade.workflow().name()));
    }
    Ok(marking.to_string().yellow().to_string())
}

pub fn can(
    runtime: &Runtime,
    id: &str,
    transition: &str,
    workflow: Option<&str>,
) -> Result<String, Box<dyn Error>> {
    let (subject, facade) = resolve(runtime, id, workflow)?;
    if facade.can_to(&subject, transition)? {
        return Ok(format!("{} {}", "yes".green(), transition));
    }
    let blockers = facade
        .workflow()
        .build_transition_blocker_list(&subject, transition)?;
    Ok(format!(
        "{} {}\n{}",
        "no".red(),
        transition,
        format_blockers(&blockers)
    ))
}

pub fn enabled(
    runtime: &Runtime,
    id: &str,
    workflow: Option<&str>,
) -> Result<String, Box<dyn Error>> {
    let (subject, facade) = resolve(runtime, id, workflow)?;
    let transitions = facade.enabled_transitions(&subject)?;
    if transitions.is_empty() {
        return Ok("No enabled transitions".yellow().to_string());
    }

    let definition = facade.workflow().definition();
    Ok(transitions
        .iter()
        .map(|t| {
            let label = definition
                .metadata()
                .transition_label(t)
                .map(|l| format!(" ({})", l))
                .unwrap_or_default();
            format!(
                "  {}: {} -> {}{}",
                t.name().cyan(),
                t.froms().join(", "),
                t.tos().join(", "),
                label.dimmed()
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

pub fn apply(
    runtime: &Runtime,
    id: &str,
    transition: &str,
    context: Context,
    workflow: Option<&str>,
) -> Result<String, Box<dyn Error>> {
    let (mut subject, facade) = resolve(runtime, id, workflow)?;
    match facade.apply_to(&mut subject, transition, context) {
        Ok(marking) => Ok(format!(
            "{} {} on {} (marking: {})",
            "Applied".green(),
            transition,
            id.cyan(),
            marking.to_string().yellow()
        )),
        Err(ApplyError::Rejected(rejected)) => Err(format!(
            "{}\n{}",
            rejected.message(),
            format_blockers(rejected.blockers())
        )
        .into()),
        Err(e) => Err(e.into()),
    }
}

fn resolve(
    runtime: &Runtime,
    id: &str,
    workflow: Option<&str>,
) -> Result<(Record, SubjectWorkflow), Box<dyn Error>> {
    let subject = runtime
        .repository
        .find(id)?
        .ok_or_else(|| format!("record '{}' not found", id))?
        .to_record();
    let facade = SubjectWorkflow::for_subject(&runtime.registry, &subject, workflow)?;
    tracing::debug!(
        "resolved {} ({}) to workflow {}",
        id,
        subject.subject_type(),
        facade.workflow().name()
    );
    Ok((subject, facade))
}

/// Parses a JSON object argument, or `@file.json` to read it from a file.
pub fn parse_object_arg(arg: &str) -> Result<Map<String, Value>, Box<dyn Error>> {
    let value: Value = if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)?
    } else {
        serde_json::from_str(arg)?
    };
    match value {
        Value::Object(map) => Ok(map),
        other => Err(format!("expected a JSON object, got {}", other).into()),
    }
}

fn format_definition(definition: &Definition) -> String {
    let mut output = String::new();
    output.push_str(&format!("  type: {:?}\n", definition.kind()));
    output.push_str(&format!("  checksum: {}\n", definition.checksum()));
    output.push_str("  places:\n");
    for place in definition.places() {
        let marker = if definition.initial_places().contains(place) {
            "*"
        } else {
            " "
        };
        output.push_str(&format!("   {} {}\n", marker, place));
    }
    output.push_str("  transitions:\n");
    for t in definition.transitions() {
        let guard = t
            .guard()
            .map(|g| format!(" [{}]", g.source()))
            .unwrap_or_default();
        output.push_str(&format!(
            "    {}: {} -> {}{}\n",
            t.name().cyan(),
            t.froms().join(", "),
            t.tos().join(", "),
            guard.dimmed()
        ));
    }
    output.trim_end().to_string()
}

fn format_blockers(blockers: &TransitionBlockerList) -> String {
    blockers
        .iter()
        .map(|b| format!("  - {} {}", b.code.yellow(), b.message))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_fields(fields: &Map<String, Value>) -> String {
    serde_json::to_string(fields).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    const CONFIG: &str = r#"
storage:
  backend: memory
workflows:
  - subject_type: article
    definition:
      type: state_machine
      places: [draft, review, published]
      transitions:
        - name: submit
          from: draft
          to: review
          metadata: {label: Submit for review}
        - name: publish
          from: review
          to: published
          guard: subject.approved
          metadata: {error: Articles need approval before publishing}
"#;

    fn runtime() -> Runtime {
        let config: Config = serde_yaml::from_str(CONFIG).unwrap();
        Runtime::load(&config).unwrap()
    }

    #[test]
    fn test_create_and_apply() {
        let rt = runtime();
        let output = create(&rt, "article", Some("a-1".to_string()), Map::new(), None).unwrap();
        assert!(output.contains("a-1"));
        assert!(output.contains("{draft}"));

        assert!(marking(&rt, "a-1", None).unwrap().contains("{draft}"));
        assert!(enabled(&rt, "a-1", None).unwrap().contains("Submit for review"));

        let output = apply(&rt, "a-1", "submit", Context::new(), None).unwrap();
        assert!(output.contains("{review}"));
        assert_eq!(rt.repository.find("a-1").unwrap().unwrap().fields["status"], "review");
    }

    #[test]
    fn test_rejected_apply_reports_metadata_message() {
        let rt = runtime();
        let mut fields = Map::new();
        fields.insert("status".to_string(), json!("review"));
        rt.repository
            .insert("article", Some("a-2".to_string()), fields)
            .unwrap();

        let output = can(&rt, "a-2", "publish", None).unwrap();
        assert!(output.contains("blocked_by_expression_guard"));

        let err = apply(&rt, "a-2", "publish", Context::new(), None).unwrap_err();
        assert!(err
            .to_string()
            .contains("Articles need approval before publishing"));

        let err = apply(&rt, "a-2", "archive", Context::new(), None).unwrap_err();
        assert!(err.to_string().contains("archive"));
    }

    #[test]
    fn test_unknown_subjects() {
        let rt = runtime();
        assert!(create(&rt, "invoice", None, Map::new(), None).is_err());
        assert!(rt.repository.list(None).unwrap().is_empty());
        assert!(marking(&rt, "missing", None).is_err());
        assert!(show(&rt, "invoice@status").is_err());
        assert!(show(&rt, "article@status").unwrap().contains("publish"));
    }

    #[test]
    fn test_parse_object_arg() {
        assert_eq!(
            parse_object_arg(r#"{"approved": true}"#).unwrap()["approved"],
            json!(true)
        );
        assert!(parse_object_arg("[1, 2]").is_err());
    }
}
