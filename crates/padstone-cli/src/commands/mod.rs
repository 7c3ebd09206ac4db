pub mod build;
pub mod destroy;
pub mod show;
pub mod validate;

use indicatif::{ProgressBar, ProgressStyle};
use padstone_core::{CoreError, Orchestrator, StatePersister};
use padstone_engine::{
    plugin_search_dirs, select_engine, Diagnostics, HookError, ProviderRegistry,
    ProvisioningEngine,
};
use padstone_schema::{load_config, Config};
use padstone_state::StateDocument;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_STATE_ERROR: u8 = 3;
pub const EXIT_PRECONDITION: u8 = 4;
pub const EXIT_INTERRUPTED: u8 = 130;

/// How to reach the provisioning engine and its plugins.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub engine: String,
    pub plugin_dirs: Vec<PathBuf>,
}

impl EngineOptions {
    pub fn engine(&self) -> Result<Arc<dyn ProvisioningEngine>, String> {
        let engine = select_engine(&self.engine).map_err(|e| e.to_string())?;
        debug!("using engine '{}'", engine.name());
        Ok(Arc::from(engine))
    }

    pub fn registry(&self) -> ProviderRegistry {
        ProviderRegistry::discover(&plugin_search_dirs(&self.plugin_dirs))
    }

    /// An orchestrator for `config` with the engine, registry and variables attached.
    pub fn orchestrator(
        &self,
        config: Config,
        variables: BTreeMap<String, String>,
    ) -> Result<Orchestrator, String> {
        Ok(Orchestrator::new(config, self.engine()?, self.registry()).with_variables(variables))
    }
}

/// Attach the state file writer and the progress observer.
pub fn with_hooks(orch: Orchestrator, state_path: &Path, pb: Option<&ProgressBar>) -> Orchestrator {
    let pb = pb.cloned();
    orch.with_persister(StatePersister::new(state_path))
        .with_observer(move |doc: &StateDocument| -> Result<(), HookError> {
            let count = doc.resource_count();
            debug!("state serial {}: {count} resource(s) recorded", doc.serial);
            if let Some(pb) = &pb {
                pb.set_prefix(format!("({count} recorded)"));
            }
            Ok(())
        })
}

pub fn load(config_dir: &Path) -> Result<Config, String> {
    load_config(config_dir).map_err(|e| CoreError::from(e).to_string())
}

/// Parse trailing `name=value` arguments.
pub fn parse_var_specs(specs: &[String]) -> Result<BTreeMap<String, String>, String> {
    let mut vars = BTreeMap::new();
    for spec in specs {
        let Some((name, value)) = spec.split_once('=') else {
            return Err(format!(
                "configuration error: invalid variable '{spec}': expected name=value"
            ));
        };
        if name.is_empty() {
            return Err(format!(
                "configuration error: invalid variable '{spec}': empty name"
            ));
        }
        vars.insert(name.to_owned(), value.to_owned());
    }
    Ok(vars)
}

pub fn print_warnings(diagnostics: &Diagnostics) {
    let style = console::Style::new().yellow();
    for w in &diagnostics.warnings {
        eprintln!("{} {w}", style.apply_to("warning:"));
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} {prefix:.dim}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Run `step`, finishing the spinner (when shown) according to its outcome.
pub fn spin_step<T>(
    pb: Option<&ProgressBar>,
    running: &str,
    done: &str,
    failed: &str,
    step: impl FnOnce() -> Result<T, CoreError>,
) -> Result<T, String> {
    if let Some(pb) = pb {
        pb.set_message(running.to_owned());
    }
    match step() {
        Ok(value) => {
            if let Some(pb) = pb {
                pb.println(format!("✓ {done}"));
            }
            Ok(value)
        }
        Err(e) => {
            if let Some(pb) = pb {
                spin_fail(pb, failed);
            }
            Err(e.to_string())
        }
    }
}

pub fn colorize_phase(phase: &str) -> String {
    use console::Style;
    match phase {
        "built" => Style::new().cyan().apply_to(phase).to_string(),
        "cleaned_up" => Style::new().green().apply_to(phase).to_string(),
        "destroyed" => Style::new().dim().apply_to(phase).to_string(),
        other => other.to_owned(),
    }
}

/// Render an output value the way it would be written in a declaration.
pub fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_specs_split_on_first_equals() {
        let vars = parse_var_specs(&[
            "region=us-east-1".to_owned(),
            "filter=a=b".to_owned(),
            "empty=".to_owned(),
        ])
        .unwrap();
        assert_eq!(vars["region"], "us-east-1");
        assert_eq!(vars["filter"], "a=b");
        assert_eq!(vars["empty"], "");
    }

    #[test]
    fn var_spec_without_equals_is_config_error() {
        let err = parse_var_specs(&["region".to_owned()]).unwrap_err();
        assert!(err.starts_with("configuration error:"), "{err}");
        assert!(parse_var_specs(&["=x".to_owned()]).is_err());
    }

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn colorize_phase_keeps_text() {
        assert!(colorize_phase("built").contains("built"));
        assert!(colorize_phase("cleaned_up").contains("cleaned_up"));
        assert_eq!(colorize_phase("fresh"), "fresh");
    }

    #[test]
    fn format_value_unquotes_strings() {
        assert_eq!(format_value(&serde_json::json!("ami-1")), "ami-1");
        assert_eq!(format_value(&serde_json::json!(["a", 1])), r#"["a",1]"#);
    }

    #[test]
    fn unknown_engine_is_rejected() {
        let opts = EngineOptions {
            engine: "terraform".to_owned(),
            plugin_dirs: Vec::new(),
        };
        assert!(opts.engine().is_err());
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_FAILURE,
            EXIT_CONFIG_ERROR,
            EXIT_STATE_ERROR,
            EXIT_PRECONDITION,
            EXIT_INTERRUPTED,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }
}
