use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use glance_host_http::HttpPolicy;
use glance_runtime_lua::LuaExecutor;
use glance_scheduler::{Scheduler, SchedulerConfig};
use glance_secret::SecretCodec;
use glance_store::MemoryBackend;
use glance_widget::DashboardDef;

/// Glance - a scheduler and script runtime for dashboard widgets
#[derive(Parser)]
#[command(name = "glance")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the secret key file (default: ~/.glance/secret.key)
  #[arg(long, global = true)]
  secret_key_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Execute a single widget instance once and print the outcome
  Run {
    /// Path to the dashboard file (JSON)
    dashboard_file: PathBuf,

    /// The instance ID to execute
    #[arg(long)]
    instance: String,
  },

  /// Schedule every instance of a dashboard and run until interrupted
  Serve {
    /// Path to the dashboard file (JSON)
    dashboard_file: PathBuf,
  },

  /// Encrypt the password-typed config values of a dashboard file
  Encrypt {
    /// Path to the dashboard file (JSON)
    dashboard_file: PathBuf,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .init();

  let cli = Cli::parse();
  let codec = load_codec(cli.secret_key_file)?;

  match cli.command {
    Some(Commands::Run {
      dashboard_file,
      instance,
    }) => {
      run_instance(dashboard_file, instance, codec)?;
    }
    Some(Commands::Serve { dashboard_file }) => {
      serve(dashboard_file, codec)?;
    }
    Some(Commands::Encrypt { dashboard_file }) => {
      encrypt(dashboard_file, codec)?;
    }
    None => {
      println!("glance - use --help to see available commands");
    }
  }

  Ok(())
}

/// Derive the codec from the key file, or from a well-known development key
/// when no file exists. Every process sharing encrypted configuration must use
/// the same key material.
fn load_codec(secret_key_file: Option<PathBuf>) -> Result<SecretCodec> {
  let path = match secret_key_file {
    Some(path) => path,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".glance")
      .join("secret.key"),
  };

  match std::fs::read_to_string(&path) {
    Ok(material) => Ok(SecretCodec::new(material.trim())),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      warn!(path = %path.display(), "secret key file not found, using development key");
      Ok(SecretCodec::new("glance-development-key"))
    }
    Err(e) => {
      Err(e).with_context(|| format!("failed to read secret key file: {}", path.display()))
    }
  }
}

fn load_dashboard(dashboard_file: &PathBuf) -> Result<DashboardDef> {
  let content = std::fs::read_to_string(dashboard_file)
    .with_context(|| format!("failed to read dashboard file: {}", dashboard_file.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse dashboard file: {}", dashboard_file.display()))
}

/// Seed an in-memory backend from the dashboard file. Stored configuration
/// keeps whatever encryption the file carries; decryption happens per run.
fn seed_backend(dashboard: &DashboardDef) -> Result<Arc<MemoryBackend>> {
  let backend = Arc::new(MemoryBackend::new());
  for definition in &dashboard.definitions {
    backend.insert_definition(definition.clone());
  }
  for instance in &dashboard.instances {
    let definition = dashboard
      .definition(&instance.widget_id)
      .with_context(|| {
        format!(
          "instance '{}' references unknown widget '{}'",
          instance.instance_id, instance.widget_id
        )
      })?;
    backend.insert_config(
      &instance.instance_id,
      instance.config.clone(),
      definition.params.clone(),
    );
  }
  Ok(backend)
}

fn build_scheduler(dashboard: &DashboardDef, codec: SecretCodec) -> Result<Scheduler> {
  let backend = seed_backend(dashboard)?;
  let executor = LuaExecutor::new(&HttpPolicy::default()).context("failed to build HTTP client")?;
  Ok(Scheduler::new(
    SchedulerConfig::default(),
    Arc::new(executor),
    backend,
    codec,
  ))
}

fn run_instance(dashboard_file: PathBuf, instance_id: String, codec: SecretCodec) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    let dashboard = load_dashboard(&dashboard_file)?;
    let Some(instance) = dashboard.instance(&instance_id) else {
      bail!("instance '{instance_id}' not found in dashboard");
    };

    let scheduler = build_scheduler(&dashboard, codec)?;
    let outcome = scheduler
      .run_once(instance)
      .await
      .with_context(|| format!("failed to execute instance '{instance_id}'"))?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
  })
}

fn serve(dashboard_file: PathBuf, codec: SecretCodec) -> Result<()> {
  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async {
    let dashboard = load_dashboard(&dashboard_file)?;
    info!(
      name = %dashboard.name,
      instances = dashboard.instances.len(),
      "loaded dashboard"
    );

    let scheduler = build_scheduler(&dashboard, codec)?;
    for instance in &dashboard.instances {
      scheduler
        .schedule(instance.clone(), std::time::Duration::ZERO)
        .await
        .with_context(|| format!("failed to schedule instance '{}'", instance.instance_id))?;
    }

    tokio::signal::ctrl_c()
      .await
      .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    scheduler.shutdown().await.context("shutdown failed")?;
    Ok(())
  })
}

fn encrypt(dashboard_file: PathBuf, codec: SecretCodec) -> Result<()> {
  let mut dashboard = load_dashboard(&dashboard_file)?;

  let mut encrypted = Vec::with_capacity(dashboard.instances.len());
  for instance in &dashboard.instances {
    let definition = dashboard
      .definition(&instance.widget_id)
      .with_context(|| {
        format!(
          "instance '{}' references unknown widget '{}'",
          instance.instance_id, instance.widget_id
        )
      })?;
    let mut instance = instance.clone();
    instance.config = codec.encrypt_config(&instance.config, &definition.params);
    encrypted.push(instance);
  }
  dashboard.instances = encrypted;

  println!("{}", serde_json::to_string_pretty(&dashboard)?);
  Ok(())
}
