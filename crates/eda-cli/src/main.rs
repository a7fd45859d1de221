use anyhow::Result;
use clap::{Parser, Subcommand};
use eda_audit::VerifyResult;
use tracing::warn;

mod commands;

use commands::{order::OrderCmd, statement::StatementCmd};

#[derive(Parser)]
#[command(name = "eda")]
#[command(about = "Progress-billing ledger CLI", long_about = None)]
struct Cli {
    /// Layered config paths in merge order (base -> environment -> site)
    #[arg(long = "config", global = true)]
    config_paths: Vec<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Order ledger commands
    Order {
        #[command(subcommand)]
        cmd: OrderCmd,
    },

    /// Progress statement commands
    Statement {
        #[command(subcommand)]
        cmd: StatementCmd,
    },

    /// Audit trail utilities
    Audit {
        #[command(subcommand)]
        cmd: AuditCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum AuditCmd {
    /// Verify the hash chain of the audit log.
    Verify {
        /// Audit log path (defaults to audit.path from config)
        #[arg(long)]
        path: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    let res = run(cli).await;
    if let Err(ref e) = res {
        if let Some(kind) = eda_db::ledger_error_kind(e) {
            warn!(kind = kind.as_str(), error = %e, "command refused");
            eprintln!("error_kind={}", kind.as_str());
        }
    }
    res
}

async fn run(cli: Cli) -> Result<()> {
    match cli.cmd {
        Commands::Db { cmd } => {
            let cfg = commands::load_config(&cli.config_paths)?;
            let pool = commands::connect(&cfg).await?;
            match cmd {
                DbCmd::Status => {
                    let s = eda_db::status(&pool).await?;
                    println!(
                        "db_ok={} has_statements_table={}",
                        s.ok, s.has_statements_table
                    );
                }
                DbCmd::Migrate => {
                    eda_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = eda_config::load_layered_yaml(&path_refs)?;
            loaded.typed()?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Order { cmd } => {
            let cfg = commands::load_config(&cli.config_paths)?;
            commands::order::dispatch(&cfg, cmd).await?;
        }

        Commands::Statement { cmd } => {
            let cfg = commands::load_config(&cli.config_paths)?;
            commands::statement::dispatch(&cfg, cmd).await?;
        }

        Commands::Audit { cmd } => match cmd {
            AuditCmd::Verify { path } => {
                let path = match path {
                    Some(p) => p,
                    None => commands::load_config(&cli.config_paths)?.audit.path,
                };
                match eda_audit::verify_hash_chain(&path)? {
                    VerifyResult::Valid { lines } => {
                        println!("audit_valid=true lines={} path={}", lines, path);
                    }
                    VerifyResult::Broken { line, reason } => {
                        println!("audit_valid=false line={} path={}", line, path);
                        anyhow::bail!("AUDIT_CHAIN_BROKEN at line {line}: {reason}");
                    }
                }
            }
        },
    }

    Ok(())
}

/// Logs go to stderr; stdout carries the key=value results.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
