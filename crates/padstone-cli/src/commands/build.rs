use super::{
    colorize_phase, format_value, json_pretty, load, parse_var_specs, print_warnings, spin_ok,
    spin_step, spinner, with_hooks, EngineOptions, EXIT_INTERRUPTED, EXIT_SUCCESS,
};
use padstone_core::shutdown_requested;
use padstone_state::StateFile;
use std::path::Path;
use tracing::warn;

pub fn run(
    opts: &EngineOptions,
    config_dir: &Path,
    state_path: &Path,
    var_specs: &[String],
    json: bool,
) -> Result<u8, String> {
    let file = StateFile::new(state_path);
    if file.exists() {
        return Err(format!(
            "precondition failed: state file {} already exists; destroy it first",
            state_path.display()
        ));
    }
    let variables = parse_var_specs(var_specs)?;
    let config = load(config_dir)?;

    let pb = if json { None } else { Some(spinner("validating...")) };
    let orch = opts.orchestrator(config, variables)?;
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

    spin_step(
        pb.as_ref(),
        "building...",
        "build complete",
        "build failed",
        || orch.build(),
    )?;

    if shutdown_requested() {
        if let Some(pb) = &pb {
            pb.finish_and_clear();
        }
        eprintln!(
            "interrupted: temporary resources are still recorded in {}; run destroy to remove them",
            state_path.display()
        );
        return Ok(EXIT_INTERRUPTED);
    }

    spin_step(
        pb.as_ref(),
        "cleaning up temporary resources...",
        "cleanup complete",
        "cleanup failed",
        || orch.cleanup(),
    )?;

    if orch.temporary_state().is_empty() {
        file.write(orch.result_state())
            .map_err(|e| format!("state error: {e}"))?;
    } else {
        warn!(
            "{} temporary resource(s) survived cleanup; keeping them in {}",
            orch.temporary_state().resource_count(),
            state_path.display()
        );
    }

    let outputs = orch.outputs();
    if json {
        let payload = serde_json::json!({
            "status": orch.phase().to_string(),
            "state_file": state_path,
            "resources": orch.state().resource_count(),
            "outputs": outputs,
            "warnings": diagnostics.warnings,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        if let Some(pb) = &pb {
            spin_ok(
                pb,
                &format!(
                    "{} resource(s) recorded in {}",
                    orch.state().resource_count(),
                    state_path.display()
                ),
            );
        }
        println!("status: {}", colorize_phase(&orch.phase().to_string()));
        if !outputs.is_empty() {
            println!("outputs:");
            for (name, value) in &outputs {
                println!("  {name} = {}", format_value(value));
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
