// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

mod config;
mod runtime;

use anyhow::{Context, Result, anyhow};
use config::Config;
use lovkit_remote::Client;
use lovkit_store::Store;
use lovkit_tui::FormState;
use runtime::LovkitRuntime;
use std::env;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "lovkit.log";

fn main() {
    if let Err(error) = run() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = parse_cli_args(env::args().skip(1), Config::default_path()?)?;
    if options.show_help {
        print_help();
        return Ok(());
    }

    if options.print_config_path {
        println!("{}", options.config_path.display());
        return Ok(());
    }

    if options.print_example {
        print!("{}", Config::example_config(&options.config_path));
        return Ok(());
    }

    let config = Config::load(&options.config_path).with_context(|| {
        format!(
            "load config {}; run `lovkit --print-example-config` to generate a template",
            options.config_path.display()
        )
    })?;
    let settings = config.form_settings()?;
    let db_path = config.db_path()?;

    if options.check_only {
        init_stderr_logging()?;
    } else {
        init_file_logging(&log_path(&db_path)?)?;
    }

    let store = if options.demo {
        Store::open_memory()?
    } else {
        Store::open(&db_path).with_context(|| {
            format!(
                "open database {} -- if this path is wrong, set [storage].db_path or {}",
                db_path.display(),
                lovkit_store::DB_PATH_ENV
            )
        })?
    };
    store.bootstrap()?;

    if options.print_state {
        let prefix = lovkit_store::scope_prefix(&settings.scope, None);
        for entry in store.list_state(&prefix)? {
            println!("{}\t{}\t{}", entry.updated_at, entry.scope_key, entry.value);
        }
        return Ok(());
    }

    if options.reset_state {
        let removed = store.forget(&settings.scope, None)?;
        println!("removed {removed} saved entries");
        return Ok(());
    }

    let runtime = if options.demo || !config.remote_enabled() {
        LovkitRuntime::demo()
    } else {
        let timeout = config.remote_timeout()?;
        let base_url = config.remote_base_url();
        let build = |source: &str| {
            Client::new(base_url, source, timeout).with_context(|| {
                format!(
                    "invalid [remote] config in {}; fix base_url/source/timeout values",
                    options.config_path.display()
                )
            })
        };
        LovkitRuntime::remote(
            build(config.department_source())?,
            build(config.employee_source())?,
        )
    };

    if options.check_only {
        runtime.ping()?;
        info!(
            config = %options.config_path.display(),
            db = %db_path.display(),
            remote = config.remote_enabled(),
            "startup checks passed"
        );
        return Ok(());
    }

    let mut runtime = runtime;
    let mut form = FormState::new(&settings, &store)?;
    info!(scope = ?settings.scope, demo = options.demo, "starting form");
    lovkit_tui::run_app(&mut form, &mut runtime)
}

fn log_path(db_path: &Path) -> Result<PathBuf> {
    let anchor = if db_path == Path::new(":memory:") {
        lovkit_store::default_db_path()?
    } else {
        db_path.to_path_buf()
    };
    Ok(anchor.with_file_name(LOG_FILE_NAME))
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

// The terminal UI owns stdout and stderr, so interactive runs log to a file.
fn init_file_logging(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|error| anyhow!("install log subscriber: {error}"))
}

fn init_stderr_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow!("install log subscriber: {error}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    config_path: PathBuf,
    print_config_path: bool,
    print_example: bool,
    print_state: bool,
    reset_state: bool,
    demo: bool,
    check_only: bool,
    show_help: bool,
}

fn parse_cli_args<I, S>(args: I, default_config_path: PathBuf) -> Result<CliOptions>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = CliOptions {
        config_path: default_config_path,
        print_config_path: false,
        print_example: false,
        print_state: false,
        reset_state: false,
        demo: false,
        check_only: false,
        show_help: false,
    };

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_ref() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config requires a file path"))?;
                options.config_path = PathBuf::from(value.as_ref());
            }
            "--print-config-path" => {
                options.print_config_path = true;
            }
            "--print-example-config" => {
                options.print_example = true;
            }
            "--print-state" => {
                options.print_state = true;
            }
            "--reset-state" => {
                options.reset_state = true;
            }
            "--demo" => {
                options.demo = true;
            }
            "--check" => {
                options.check_only = true;
            }
            "--help" | "-h" => {
                options.show_help = true;
            }
            unknown => {
                return Err(anyhow!(
                    "unknown argument {unknown:?}; run with --help to see supported options"
                ));
            }
        }
    }

    Ok(options)
}

fn print_help() {
    println!("lovkit");
    println!("  --config <path>          Use a specific config path");
    println!("  --print-config-path      Print resolved config path");
    println!("  --print-example-config   Print a config template");
    println!("  --print-state            List saved dialog layouts and recent searches");
    println!("  --reset-state            Forget saved layouts and recent searches for this page");
    println!("  --demo                   Launch with sample data and an in-memory store");
    println!("  --check                  Validate config, database, and remote sources");
    println!("  --help                   Show this help");
}
