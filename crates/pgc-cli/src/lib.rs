//! `pgccmd` - the migration and codegen front-end for pgc.
//!
//! The binary is bound to one environment: connection settings and the
//! migration directory come from the `POSTGRES_*` variables, and every
//! command drives the core through them. Pass `-d` after the command for
//! query logging.

use std::path::PathBuf;

use anyhow::Context;
use pgc::migrate::Migrator;

mod gen;

fn print_help() {
    println!("Basic Commands: \"$ pgccmd up|init|rollback|status\"");
    println!("Generate init:  \"$ pgccmd gen init StructName shortName\"");
    println!();
    println!("  up [--exec-default]      apply pending migrations");
    println!("  init                     create the bookkeeping tables");
    println!("  migration [default]      create a new empty migration file pair");
    println!("  exec <version|default>   execute one migration");
    println!("  rollback [<version>]     roll back one (or the latest) migration");
    println!("  status                   show recent logs and versions");
    println!("  reset                    forget all applied versions");
    println!();
    println!("For commands other than gen, pass -d for debug query logging");
}

/// Run one pgccmd invocation. `args` is the raw argument vector, program
/// name included.
pub async fn run(args: Vec<String>) -> anyhow::Result<()> {
    if args.len() < 2 {
        print_help();
        anyhow::bail!("no command given");
    }

    let action = args[1].as_str();
    // -d may ride along in position 2 or 3.
    let mut arg2 = String::new();
    let mut debug = false;
    if let Some(a2) = args.get(2) {
        if a2 == "-d" {
            debug = true;
            if let Some(a3) = args.get(3) {
                if !a3.starts_with('-') {
                    arg2 = a3.clone();
                }
            }
        } else {
            arg2 = a2.clone();
            if args.get(3).map(String::as_str) == Some("-d") {
                debug = true;
            }
        }
    }
    init_logging(debug);

    match action {
        "up" | "init" | "exec" | "rollback" | "status" | "reset" => {
            let config = pgc::Config::from_env()?;
            let pool = pgc::create_pool(&config)?;
            let mut client = pool.get().await.context("acquire database connection")?;
            let dir = migration_dir(&config);
            let migrator = Migrator::from_path(&dir)
                .with_context(|| format!("register migrations from {}", dir.display()))?;

            match action {
                "up" => {
                    let installed = migrator
                        .update_schema(&mut client, arg2 == "--exec-default")
                        .await?;
                    if installed.is_empty() {
                        println!("Schema is up to date");
                    } else {
                        println!(
                            "*** Migration(s) ({}) have been installed ***",
                            installed.join(", ")
                        );
                    }
                }
                "init" => {
                    migrator.init_schema(&mut client, false).await?;
                    println!("Schema versioning is now initialized. Run `$ pgccmd status` for info");
                }
                "exec" => {
                    if arg2.is_empty() {
                        anyhow::bail!("please specify migration name to execute");
                    }
                    migrator.execute(&mut client, &arg2).await?;
                    println!("Migration \"{arg2}\" has been executed");
                }
                "rollback" => {
                    if !arg2.is_empty() && !arg2.starts_with('-') {
                        migrator.rollback(&mut client, &arg2).await?;
                        println!("Rolled back migration \"{arg2}\"");
                    } else {
                        migrator.rollback_latest(&mut client).await?;
                    }
                }
                "status" => {
                    let status = migrator.status(&mut client).await?;
                    print_status(&status);
                }
                "reset" => {
                    migrator.reset(&mut client).await?;
                    println!("Migration data has been reset");
                }
                _ => unreachable!(),
            }
        }
        "migration" => {
            let dir = std::env::var(pgc::ENV_PG_MIGRATION_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."));
            let version = Migrator::new(&dir).init_migration(arg2 == "default")?;
            println!("Created migration \"{version}\" in {}", dir.display());
        }
        "gen" => {
            println!("{}", gen::generate(&args)?);
        }
        "help" => print_help(),
        _ => {
            print_help();
            anyhow::bail!("unknown command: {action}");
        }
    }

    Ok(())
}

fn migration_dir(config: &pgc::Config) -> PathBuf {
    config
        .migration_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("."))
}

fn init_logging(debug: bool) {
    let filter = if debug || std::env::var(pgc::ENV_LOG_QUERIES).as_deref() == Ok("true") {
        "pgc=debug"
    } else {
        "pgc=info"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_target(false)
        .try_init();
}

fn print_status(status: &pgc::migrate::MigrationStatus) {
    println!("--------------------------------------------------");
    println!("Last 10 schema change logs");
    println!("--------------------------------------------------");
    if status.logs.is_empty() {
        println!("No logs so far");
    }
    for log in &status.logs {
        println!(
            "{} {:8} version=({}) success={} {}",
            log.created, log.action, log.version, log.success, log.message
        );
    }
    println!("--------------------------------------------------");
    println!("Latest migrations info");
    println!("--------------------------------------------------");
    if status.latest.is_empty() {
        println!("No migrations so far");
    } else {
        // Oldest of the latest batch first.
        for migration in status.latest.iter().rev() {
            println!("{}", migration.version);
        }
    }
    println!("--------------------------------------------------");
}
