use habitat_sandbox::{admit, load_manifest, ConfigError, HabitatConfig};
use serde::Serialize;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: sandbox_admit <manifest.json> [habitat.toml]";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if matches!(args.get(1).map(|s| s.as_str()), Some("--help") | Some("-h")) {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }
    let Some(manifest_path) = args.get(1) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };
    if args.len() > 3 {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    }

    let config = match load_config(args.get(2).map(String::as_str)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config error: {err}");
            return ExitCode::from(2);
        }
    };
    let manifest_text = match std::fs::read_to_string(manifest_path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("read manifest failed ({manifest_path}): {err}");
            return ExitCode::from(2);
        }
    };

    let manifest = match load_manifest(&manifest_text) {
        Ok(manifest) => manifest,
        Err(validation) => {
            print_json(&validation);
            return ExitCode::from(1);
        }
    };
    let result = admit(&manifest, &config.policy);
    print_json(&result);
    if result.admitted {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn load_config(path: Option<&str>) -> Result<HabitatConfig, ConfigError> {
    match path {
        Some(path) => HabitatConfig::from_config_file(Path::new(path)),
        None => HabitatConfig::from_default_sources(),
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(err) => eprintln!("serialize output failed: {err}"),
    }
}
