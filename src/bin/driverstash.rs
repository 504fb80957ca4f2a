//! driverstash CLI
//!
//! Inspect and reverse a recorded installation, and manage precompiled
//! packages.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use driverstash::config::TamperPolicy;
use driverstash::journal::installed_driver_info;
use driverstash::package::{
    extract_file, find_package, read_package, write_package, Applicability, Expectation,
    FileKind, FileRecord, PackageContainer,
};
use driverstash::{Config, Result, Uninstaller};
use tracing_subscriber::{fmt, EnvFilter};

/// driverstash
#[derive(Parser, Debug)]
#[command(name = "driverstash")]
#[command(about = "Install journal, uninstall and precompiled packages for a driver installer")]
#[command(version)]
struct Args {
    /// Backup directory holding the journal and displaced files
    #[arg(short, long, default_value = "/var/lib/driverstash")]
    backup_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the installed driver version and description
    Info,

    /// Check that the recorded installation is still intact
    Check,

    /// Reverse the recorded installation
    Uninstall {
        /// Continue even if the journal permissions changed
        #[arg(long)]
        force: bool,
    },

    /// Precompiled package operations
    #[command(subcommand)]
    Package(PackageCommands),
}

#[derive(Subcommand, Debug)]
enum PackageCommands {
    /// List the contents of a package
    Inspect {
        /// Package file
        file: PathBuf,
    },

    /// Find a package matching the given versions in a directory
    Find {
        /// Directory of candidate packages
        dir: PathBuf,

        #[arg(long)]
        driver_version: String,

        #[arg(long)]
        kernel_version: String,

        /// File that must be present (repeatable)
        #[arg(long = "require")]
        required: Vec<String>,
    },

    /// Build a package from interface and module files
    Pack {
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        driver_version: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long)]
        kernel_version: String,

        /// Kernel interface object (repeatable)
        #[arg(long)]
        interface: Vec<PathBuf>,

        /// Kernel module (repeatable)
        #[arg(long)]
        module: Vec<PathBuf>,
    },

    /// Write one embedded file out, verifying its checksum
    Extract {
        file: PathBuf,
        name: String,
        dest: PathBuf,
    },
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,driverstash=debug"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();
    tracing::debug!("driverstash v{}", driverstash::VERSION);

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let builder = Config::builder().backup_dir(&args.backup_dir);

    match args.command {
        Commands::Info => {
            match installed_driver_info(&builder.build())? {
                Some((version, description)) => println!("{} ({})", description, version),
                None => println!("no driver installed"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check => {
            let report = Uninstaller::new(builder.build()).sanity_check()?;
            for diag in &report.diagnostics {
                println!("{}: {}", diag.path.display(), diag.reason);
            }
            println!(
                "{} of {} entries intact",
                report.checked - report.invalid_count(),
                report.checked
            );
            Ok(if report.is_intact() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Uninstall { force } => {
            let policy = if force {
                TamperPolicy::BestEffort
            } else {
                TamperPolicy::Refuse
            };
            let report = Uninstaller::new(builder.tamper_policy(policy).build()).run()?;
            for warning in &report.warnings {
                println!("warning: {}", warning);
            }
            println!(
                "uninstalled {} {}: {} removed, {} restored",
                report.description, report.version, report.removed, report.restored
            );
            Ok(if report.best_effort() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Package(cmd) => run_package(cmd),
    }
}

fn run_package(cmd: PackageCommands) -> Result<ExitCode> {
    match cmd {
        PackageCommands::Inspect { file } => {
            let container = match read_package(&file, &Expectation::any())? {
                Applicability::Applicable(c) => c,
                Applicability::NotApplicable(reason) => {
                    println!("{}", reason);
                    return Ok(ExitCode::FAILURE);
                }
            };
            print_container(&container);
            Ok(ExitCode::SUCCESS)
        }
        PackageCommands::Find {
            dir,
            driver_version,
            kernel_version,
            required,
        } => {
            let expect = Expectation::new(driver_version, kernel_version);
            match find_package(&dir, &expect, required.as_slice())? {
                Some(found) => {
                    println!("{}", found.path.display());
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    println!("no matching package");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        PackageCommands::Pack {
            output,
            driver_version,
            description,
            kernel_version,
            interface,
            module,
        } => {
            let mut container = PackageContainer::new(driver_version, description, kernel_version);
            for path in &interface {
                container.push_file(FileRecord::from_path(FileKind::Interface, path)?);
            }
            for path in &module {
                container.push_file(FileRecord::from_path(FileKind::Module, path)?);
            }
            write_package(&output, &container)?;
            Ok(ExitCode::SUCCESS)
        }
        PackageCommands::Extract { file, name, dest } => {
            let container = match read_package(&file, &Expectation::any())? {
                Applicability::Applicable(c) => c,
                Applicability::NotApplicable(_) => return Ok(ExitCode::FAILURE),
            };
            extract_file(&container, &name, &dest)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_container(container: &PackageContainer) {
    println!("version:     {}", container.version);
    println!("description: {}", container.description);
    println!("kernel:      {}", container.target_kernel);
    for file in &container.files {
        println!(
            "  {:?} {} ({} bytes, crc {}{})",
            file.kind,
            file.name,
            file.data.len(),
            file.checksum,
            if file.is_intact() { "" } else { ", CORRUPT" }
        );
    }
}
