use super::{
    json_pretty, load, parse_var_specs, print_warnings, EngineOptions, EXIT_CONFIG_ERROR,
    EXIT_SUCCESS,
};
use padstone_state::StateFile;
use std::path::Path;

pub fn run(
    opts: &EngineOptions,
    config_dir: &Path,
    state_path: Option<&Path>,
    var_specs: &[String],
    json: bool,
) -> Result<u8, String> {
    let variables = parse_var_specs(var_specs)?;
    let config = load(config_dir)?;
    let mut orch = opts.orchestrator(config, variables)?;
    if let Some(path) = state_path {
        let state = StateFile::new(path)
            .read()
            .map_err(|e| format!("state error: {e}"))?;
        orch = orch.with_state(state);
    }

    let diagnostics = orch.validate().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&diagnostics)?);
    } else {
        print_warnings(&diagnostics);
        for e in &diagnostics.errors {
            eprintln!("{} {e}", console::Style::new().red().apply_to("error:"));
        }
        if !diagnostics.has_errors() {
            let config = orch.config();
            println!(
                "configuration valid: {} group(s), {} provider(s)",
                config.groups.len(),
                config.all_providers().count()
            );
        }
    }
    if diagnostics.has_errors() {
        Ok(EXIT_CONFIG_ERROR)
    } else {
        Ok(EXIT_SUCCESS)
    }
}
