use super::{
    json_pretty, load, parse_var_specs, print_warnings, spin_ok, spin_step, spinner, with_hooks,
    EngineOptions, EXIT_FAILURE, EXIT_SUCCESS,
};
use padstone_core::DestroyOutcome;
use padstone_state::StateFile;
use std::path::Path;

pub fn run(
    opts: &EngineOptions,
    config_dir: &Path,
    state_path: &Path,
    var_specs: &[String],
    json: bool,
) -> Result<u8, String> {
    let file = StateFile::new(state_path);
    if !file.exists() {
        return Err(format!(
            "precondition failed: state file {} does not exist",
            state_path.display()
        ));
    }
    let variables = parse_var_specs(var_specs)?;
    let config = load(config_dir)?;
    let state = file.read().map_err(|e| format!("state error: {e}"))?;

    let pb = if json { None } else { Some(spinner("validating...")) };
    let orch = opts.orchestrator(config, variables)?.with_state(state);
    let mut orch = with_hooks(orch, state_path, pb.as_ref());

    let diagnostics = spin_step(
        pb.as_ref(),
        "validating...",
        "configuration valid",
        "validation failed",
        || orch.ensure_valid(),
    )?;
    if !json {
        print_warnings(&diagnostics);
    }

    let outcome = spin_step(
        pb.as_ref(),
        "destroying...",
        "destroy finished",
        "destroy failed",
        || orch.destroy(),
    )?;

    match outcome {
        DestroyOutcome::Complete => {
            file.remove().map_err(|e| format!("state error: {e}"))?;
            if json {
                let payload = serde_json::json!({
                    "status": "destroyed",
                    "remaining": [],
                });
                println!("{}", json_pretty(&payload)?);
            } else {
                if let Some(pb) = &pb {
                    spin_ok(pb, &format!("removed {}", state_path.display()));
                }
                println!("destroyed all resources");
            }
            Ok(EXIT_SUCCESS)
        }
        DestroyOutcome::Partial { remaining } => {
            let addresses: Vec<String> = remaining
                .iter()
                .map(|(scope, key)| format!("{scope}.{key}"))
                .collect();
            if json {
                let payload = serde_json::json!({
                    "status": "partial",
                    "remaining": addresses,
                    "state_file": state_path,
                });
                println!("{}", json_pretty(&payload)?);
            } else {
                if let Some(pb) = &pb {
                    pb.finish_and_clear();
                }
                eprintln!(
                    "warning: {} resource(s) remain; state kept in {}",
                    addresses.len(),
                    state_path.display()
                );
                for address in &addresses {
                    println!("  {address}");
                }
            }
            Ok(EXIT_FAILURE)
        }
    }
}
