//! Interactive REPL.

use crate::commands;
use crate::loader::{register_trace_listeners, Runtime};
use colored::Colorize;
use markflow_core::Context;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::error::Error;
use std::path::Path;

const HELP_TEXT: &str = r#"
Available commands:
  help                              Show this help
  workflows                         List configured workflows
  show <workflow>                   Show a workflow definition
  validate <file>                   Validate a definition file
  use [workflow]                    Pick the workflow for later commands (none to reset)

  create <type> [id] [fields_json]  Create a record in its initial marking
  list [type]                       List records
  marking <id>                      Show a record's marking
  can <id> <transition>             Check a transition, with blockers
  enabled <id>                      List enabled transitions
  apply <id> <transition> [ctx]     Apply a transition

  trace                             Log every lifecycle event
  quit, exit                        Exit the REPL
"#;

/// REPL state between lines.
#[derive(Default)]
struct Session {
    workflow: Option<String>,
    tracing: bool,
}

pub fn run(runtime: &Runtime) -> Result<(), Box<dyn Error>> {
    println!("{}", "markflow".bold().cyan());

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".markflow_history"))
        .unwrap_or_else(|_| ".markflow_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    let mut session = Session::default();
    loop {
        let prompt = match &session.workflow {
            Some(wf) => format!("{} ", format!("markflow({})>", wf).cyan()),
            None => format!("{} ", "markflow>".cyan()),
        };
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_line(runtime, &mut session, line) {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break,
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    Ok(())
}

/// Runs one REPL line. `Ok(None)` ends the session.
fn execute_line(
    runtime: &Runtime,
    session: &mut Session,
    line: &str,
) -> Result<Option<String>, Box<dyn Error>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(first) = parts.first() else {
        return Ok(Some(String::new()));
    };

    let cmd = first.to_lowercase();
    let args = &parts[1..];
    let workflow = session.workflow.as_deref();

    let output = match cmd.as_str() {
        "help" | "?" => HELP_TEXT.to_string(),

        "quit" | "exit" | "q" => return Ok(None),

        "workflows" | "wf" => commands::workflows(runtime),

        "show" => match args.first().copied().or(workflow) {
            Some(name) => commands::show(runtime, name)?,
            None => "Usage: show <workflow>".to_string(),
        },

        "validate" => match args.first() {
            Some(file) => commands::validate(Path::new(file))?,
            None => "Usage: validate <file>".to_string(),
        },

        "use" => match args.first() {
            Some(name) => {
                if runtime.registry.by_name(name).is_none() {
                    return Err(format!("unknown workflow '{}'", name).into());
                }
                session.workflow = Some(name.to_string());
                format!("Using {}", name.cyan())
            }
            None => {
                session.workflow = None;
                "Workflow selection cleared".to_string()
            }
        },

        "create" | "c" => {
            if args.is_empty() {
                return Ok(Some("Usage: create <type> [id] [fields_json]".to_string()));
            }
            let id = args.get(1).map(|s| s.to_string());
            let fields = if args.len() > 2 {
                commands::parse_object_arg(&args[2..].join(" "))?
            } else {
                Default::default()
            };
            commands::create(runtime, args[0], id, fields, workflow)?
        }

        "list" | "ls" => commands::list(runtime, args.first().copied())?,

        "marking" | "m" => match args.first() {
            Some(id) => commands::marking(runtime, id, workflow)?,
            None => "Usage: marking <id>".to_string(),
        },

        "can" => {
            if args.len() < 2 {
                return Ok(Some("Usage: can <id> <transition>".to_string()));
            }
            commands::can(runtime, args[0], args[1], workflow)?
        }

        "enabled" | "e" => match args.first() {
            Some(id) => commands::enabled(runtime, id, workflow)?,
            None => "Usage: enabled <id>".to_string(),
        },

        "apply" | "a" => {
            if args.len() < 2 {
                return Ok(Some(
                    "Usage: apply <id> <transition> [context_json]".to_string(),
                ));
            }
            let context: Context = if args.len() > 2 {
                commands::parse_object_arg(&args[2..].join(" "))?
            } else {
                Context::new()
            };
            commands::apply(runtime, args[0], args[1], context, workflow)?
        }

        "trace" => {
            if session.tracing {
                "Event tracing already on".yellow().to_string()
            } else {
                register_trace_listeners(&runtime.listeners);
                session.tracing = true;
                format!(
                    "Tracing events under '{}' (set RUST_LOG=info to see them)",
                    runtime.listeners.namespace()
                )
            }
        }

        _ => format!(
            "Unknown command: {}. Type 'help' for available commands.",
            cmd
        ),
    };
    Ok(Some(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config as MarkflowConfig;

    fn runtime() -> Runtime {
        let config: MarkflowConfig = serde_yaml::from_str(
            r#"
storage:
  backend: memory
workflows:
  - subject_type: ticket
    definition:
      places: [open, closed]
      transitions:
        - {name: close, from: open, to: closed}
  - subject_type: ticket
    field: triage
    definition:
      places: [new, triaged]
      transitions:
        - {name: triage, from: new, to: triaged}
"#,
        )
        .unwrap();
        Runtime::load(&config).unwrap()
    }

    #[test]
    fn test_session_workflow_selection() {
        let rt = runtime();
        let mut session = Session::default();

        // Two workflows match tickets until one is selected.
        assert!(execute_line(&rt, &mut session, "create ticket t-1").is_err());
        assert!(execute_line(&rt, &mut session, "use ticket@nothing").is_err());

        execute_line(&rt, &mut session, "use ticket@status").unwrap();
        let output = execute_line(&rt, &mut session, "create ticket t-1")
            .unwrap()
            .unwrap();
        assert!(output.contains("{open}"));

        let output = execute_line(&rt, &mut session, "apply t-1 close {\"by\": \"ops\"}")
            .unwrap()
            .unwrap();
        assert!(output.contains("{closed}"));
        assert_eq!(
            rt.repository.find("t-1").unwrap().unwrap().fields["by"],
            "ops"
        );

        execute_line(&rt, &mut session, "use").unwrap();
        assert!(session.workflow.is_none());
    }

    #[test]
    fn test_usage_and_exit() {
        let rt = runtime();
        let mut session = Session::default();
        let output = execute_line(&rt, &mut session, "can t-1").unwrap().unwrap();
        assert!(output.starts_with("Usage"));
        assert!(execute_line(&rt, &mut session, "quit").unwrap().is_none());
        assert!(execute_line(&rt, &mut session, "frobnicate")
            .unwrap()
            .unwrap()
            .contains("Unknown command"));

        execute_line(&rt, &mut session, "trace").unwrap();
        assert!(session.tracing);
    }
}
