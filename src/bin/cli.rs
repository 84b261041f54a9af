//! Rolegate CLI - Main entry point
//!
//! Initialises projects, serves the admin API and inspects permission rules.

use anyhow::{bail, Context, Result};
use clap::Parser;
use rolegate::engine::{
    app::App,
    cli::{formatter::format_count, formatter::CliFormatter, Cli, Commands, OutputFormat, PolicyAction},
    config::{Config, CONFIG_FILE},
    database::Database,
    observability::{init_tracing, HealthReport},
    rbac::PolicyStore,
};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run_cli(cli) {
        CliFormatter::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    let project_dir = cli.get_project_dir();
    let json_output = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Init { name } => cmd_init(&project_dir, &name, json_output),
        Commands::Serve { port, host } => cmd_serve(&project_dir, host, port),
        Commands::Status => cmd_status(&project_dir, json_output),
        Commands::Policy { action } => cmd_policy(action, &project_dir, json_output),
    }
}

fn load_config(project_dir: &Path) -> Result<Config> {
    Config::load(project_dir).with_context(|| format!("loading {}", project_dir.join(CONFIG_FILE).display()))
}

fn open_database(project_dir: &Path, config: &Config) -> Result<Database> {
    let db_path = project_dir.join(&config.database.path);
    Database::new(&db_path).with_context(|| format!("opening {}", db_path.display()))
}

fn cmd_init(project_dir: &Path, name: &str, json: bool) -> Result<()> {
    if project_dir.join(CONFIG_FILE).exists() {
        bail!("{} already exists in {}", CONFIG_FILE, project_dir.display());
    }
    std::fs::create_dir_all(project_dir)?;
    let config = Config::default_for_project(name);
    config.save(project_dir)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "project": name,
                "config": project_dir.join(CONFIG_FILE),
                "database": config.database.path,
            })
        );
    } else {
        CliFormatter::success(&format!("Initialized rolegate project '{}'", name));
        CliFormatter::kv("config", &project_dir.join(CONFIG_FILE).display().to_string());
        CliFormatter::kv("database", &config.database.path.display().to_string());
        CliFormatter::info("Run `rolegate serve` to seed defaults and start the API");
    }
    Ok(())
}

#[tokio::main]
async fn cmd_serve(project_dir: &Path, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = load_config(project_dir)?;
    init_tracing(&config.logs.level);
    if let Some(host) = host {
        config.system.host = host;
    }
    if let Some(port) = port {
        config.system.port = port;
    }

    let addr = format!("{}:{}", config.system.host, config.system.port);
    let prefix = config.system.url_path_prefix.clone();
    let app = App::open(project_dir, config)?;
    let router = app.router();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(%addr, "Admin API listening");
    CliFormatter::success(&format!("Admin API at http://{}/{}", addr, prefix));
    CliFormatter::kv("openapi", &format!("http://{}/{}/base/openapi.json", addr, prefix));

    let served = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await;

    app.shutdown().await;
    served.context("serving admin API")
}

fn cmd_status(project_dir: &Path, json: bool) -> Result<()> {
    let config = load_config(project_dir)?;
    let db = open_database(project_dir, &config)?;
    let store = PolicyStore::sqlite(db.clone())?;
    let report = HealthReport::collect(&db, &store, 0, None);

    let mut counts = serde_json::Map::new();
    for table in db.get_tables()? {
        let count = db.count_rows(&table)?;
        counts.insert(table, count.into());
    }

    if json {
        println!(
            "{}",
            serde_json::json!({
                "health": report,
                "counts": counts,
                "prefix": config.system.url_path_prefix,
                "port": config.system.port,
            })
        );
    } else {
        CliFormatter::header("Rolegate Status");
        CliFormatter::health(&report);
        CliFormatter::header("Tables");
        for (table, count) in &counts {
            CliFormatter::kv(table, &count.to_string());
        }
        CliFormatter::kv("listen", &format!("{}:{}", config.system.host, config.system.port));
    }
    Ok(())
}

fn cmd_policy(action: PolicyAction, project_dir: &Path, json: bool) -> Result<()> {
    let config = load_config(project_dir)?;
    let db = open_database(project_dir, &config)?;
    let store = PolicyStore::sqlite(db)?;

    match action {
        PolicyAction::List { subject } => {
            let rules = match subject.as_deref() {
                Some(subject) => store.query_by_subject(subject),
                None => store.snapshot().iter().cloned().collect(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&rules)?);
            } else {
                CliFormatter::header(&format!("Policy v{} ({})", store.version(), format_count(rules.len(), "rule")));
                CliFormatter::rules(&rules);
            }
        }
        PolicyAction::Check { subject, object, action } => {
            let action = action.to_uppercase();
            let allowed = store.enforce(&subject, &object, &action);
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "subject": subject,
                        "object": object,
                        "action": action,
                        "allowed": allowed,
                    })
                );
            } else if allowed {
                CliFormatter::success(&format!("{} may {} {}", subject, action, object));
            } else {
                CliFormatter::warning(&format!("{} may not {} {}", subject, action, object));
            }
        }
    }
    Ok(())
}
