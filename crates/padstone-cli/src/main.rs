mod commands;

use clap::{Parser, Subcommand};
use commands::{
    EngineOptions, EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_PRECONDITION, EXIT_STATE_ERROR,
};
use padstone_core::install_signal_handler;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "padstone",
    version,
    about = "Build infrastructure with temporary helpers, keep only the results"
)]
struct Cli {
    /// Provisioning engine: `mock` or `exec:<program>`.
    #[arg(
        long,
        env = "PADSTONE_ENGINE",
        default_value = "exec:padstone-engine",
        global = true
    )]
    engine: String,

    /// Extra directory to search for provider and provisioner plugins.
    #[arg(long = "plugin-dir", global = true)]
    plugin_dirs: Vec<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build a configuration, then destroy its temporary resources.
    Build {
        /// Directory holding the declaration files.
        config_dir: PathBuf,
        /// State file to create; must not exist yet.
        state_file: PathBuf,
        /// Variable values as name=value.
        vars: Vec<String>,
    },
    /// Destroy everything recorded in a state file.
    Destroy {
        /// Directory holding the declaration files.
        config_dir: PathBuf,
        /// State file written by a previous build.
        state_file: PathBuf,
        /// Variable values as name=value.
        vars: Vec<String>,
    },
    /// Check a configuration without changing anything.
    Validate {
        /// Directory holding the declaration files.
        config_dir: PathBuf,
        /// Validate against this state instead of an empty one.
        #[arg(long)]
        state: Option<PathBuf>,
        /// Variable values as name=value.
        vars: Vec<String>,
    },
    /// Print the contents of a state file.
    Show {
        /// State file to read.
        state_file: PathBuf,
    },
}

fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("configuration error:") || msg.starts_with("validation failed:") {
        EXIT_CONFIG_ERROR
    } else if msg.starts_with("state error:") || msg.starts_with("state persistence failed:") {
        EXIT_STATE_ERROR
    } else if msg.starts_with("precondition failed:")
        || msg.starts_with("invalid lifecycle transition:")
    {
        EXIT_PRECONDITION
    } else {
        EXIT_FAILURE
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PADSTONE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let opts = EngineOptions {
        engine: cli.engine,
        plugin_dirs: cli.plugin_dirs,
    };
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Build {
            config_dir,
            state_file,
            vars,
        } => commands::build::run(&opts, &config_dir, &state_file, &vars, json_output),
        Commands::Destroy {
            config_dir,
            state_file,
            vars,
        } => commands::destroy::run(&opts, &config_dir, &state_file, &vars, json_output),
        Commands::Validate {
            config_dir,
            state,
            vars,
        } => commands::validate::run(&opts, &config_dir, state.as_deref(), &vars, json_output),
        Commands::Show { state_file } => commands::show::run(&state_file, json_output),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_prefixes_map_to_exit_codes() {
        assert_eq!(exit_code_for("configuration error: bad"), EXIT_CONFIG_ERROR);
        assert_eq!(exit_code_for("validation failed: a; b"), EXIT_CONFIG_ERROR);
        assert_eq!(exit_code_for("state error: checksum"), EXIT_STATE_ERROR);
        assert_eq!(
            exit_code_for("state persistence failed: disk full"),
            EXIT_STATE_ERROR
        );
        assert_eq!(exit_code_for("precondition failed: exists"), EXIT_PRECONDITION);
        assert_eq!(
            exit_code_for("invalid lifecycle transition: fresh -> cleaned_up"),
            EXIT_PRECONDITION
        );
        assert_eq!(exit_code_for("build failed: apply failed: x"), EXIT_FAILURE);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
