//! Liaison letter workstation
//!
//! Looks up an employee, composes the liaison letter, writes a preview and,
//! once confirmed, saves the PDF and records it in the ledger workbook.

mod commands;
mod shell;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use liaison_core::{paths, EmployeeDirectory, IssuanceServices, IssuanceSession, LiaisonConfig};
use shell::Shell;
use std::path::PathBuf;

fn main() -> Result<()> {
    // Initialize logging with INFO as default if RUST_LOG not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("liaison")
        .version("1.0.0")
        .about("Hospital liaison letter workstation")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(paths::DEFAULT_CONFIG_FILE_NAME),
        )
        .arg(
            Arg::new("search")
                .long("search")
                .value_name("QUERY")
                .help("Print ranked employee matches and exit"),
        )
        .arg(
            Arg::new("preview-out")
                .long("preview-out")
                .value_name("FILE")
                .help("Where to write the preview PNG (default: apercu_lettre.png in the output directory)"),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(paths::DEFAULT_CONFIG_FILE_NAME);
    let config = LiaisonConfig::from_file(config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;
    log::info!("Loaded configuration from {}", config_path);
    if config.hospitals.is_empty() {
        log::warn!("No hospitals configured; liaison.example.json lists the usual catalogue");
    }

    if let Some(query) = matches.get_one::<String>("search") {
        return print_matches(&config, query);
    }

    let services = IssuanceServices::from_config(&config).context("Failed to initialize services")?;
    log::info!(
        "Loaded {} employee(s); ledger {} holds {} letter(s)",
        services.directory().len(),
        services.ledger().path().display(),
        services.ledger().row_count()
    );

    let preview_out = matches
        .get_one::<String>("preview-out")
        .map(PathBuf::from)
        .unwrap_or_else(|| paths::preview_path(services.output_dir()));

    let mut shell = Shell::new(
        IssuanceSession::new(services),
        config.hospitals.clone(),
        config.letter.default_care_type.clone(),
        preview_out,
    );

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    shell.run(stdin.lock(), &mut stdout)
}

/// `--search`: only the employee table is needed
fn print_matches(config: &LiaisonConfig, query: &str) -> Result<()> {
    let options = config.employees.source_options()?;
    let directory = EmployeeDirectory::load(&config.employees.path, &options)
        .with_context(|| format!("Failed to load employees from {}", config.employees.path.display()))?;

    let hits = directory.search(query);
    if hits.is_empty() {
        println!("No employee matches '{}'", query);
        return Ok(());
    }
    for record in hits {
        println!("{}\t{}\t{}\t{}", record.id, record.full_name(), record.cin, record.cnss);
    }
    Ok(())
}
