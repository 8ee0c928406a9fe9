use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use kset_apply::{Applier, ApplyOptions, CancelHandle, Destroyer, DestroyOptions, EventStream, InventoryPolicy};
use kset_core::DryRunStrategy;
use kset_inventory::split_objects;
use kset_kubehub::{KubeClient, Propagation};
use kset_printers::{print, printer, PrintError, PrinterKind};
use tracing::{info, warn};

mod manifest;

#[derive(Parser, Debug)]
#[command(name = "ksetctl", version, about = "Apply, preview and destroy sets of Kubernetes objects tracked by an inventory")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Events)]
    output: Output,

    /// Namespace for namespaced objects that don't set one
    #[arg(short = 'n', long = "namespace", global = true, env = "KSET_NAMESPACE", default_value = "default")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Events, Summary, Json }

impl From<Output> for PrinterKind {
    fn from(o: Output) -> Self {
        match o {
            Output::Events => PrinterKind::Events,
            Output::Summary => PrinterKind::Summary,
            Output::Json => PrinterKind::Json,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Policy { MustMatch, AdoptIfNoInventory, AdoptAll }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Cascade { Background, Foreground, Orphan }

impl From<Cascade> for Propagation {
    fn from(c: Cascade) -> Self {
        match c {
            Cascade::Background => Propagation::Background,
            Cascade::Foreground => Propagation::Foreground,
            Cascade::Orphan => Propagation::Orphan,
        }
    }
}

#[derive(Args, Debug)]
struct ApplyArgs {
    /// Manifest files or directories; stdin when omitted or `-`
    paths: Vec<PathBuf>,
    /// Use server-side apply (falls back to client-side merge when unsupported)
    #[arg(long = "server-side", action = ArgAction::SetTrue)]
    server_side: bool,
    /// Take ownership of fields managed by others (server-side apply only)
    #[arg(long = "force-conflicts", action = ArgAction::SetTrue)]
    force_conflicts: bool,
    /// Field manager recorded by server-side apply
    #[arg(long = "field-manager")]
    field_manager: Option<String>,
    /// Leave objects that left the set in place
    #[arg(long = "no-prune", action = ArgAction::SetTrue)]
    no_prune: bool,
    #[arg(long = "inventory-policy", value_enum, default_value_t = Policy::AdoptIfNoInventory)]
    inventory_policy: Policy,
    #[arg(long = "cascade", value_enum, default_value_t = Cascade::Background)]
    cascade: Cascade,
    /// Wait up to this many seconds for applied objects to become Current (0 = don't wait)
    #[arg(long = "reconcile-timeout", default_value_t = 0)]
    reconcile_timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write an inventory marker template into a directory
    Init {
        dir: PathBuf,
        /// Inventory id; a random one is generated when omitted
        #[arg(long = "inventory-id")]
        inventory_id: Option<String>,
        #[arg(long = "name", default_value = "inventory")]
        name: String,
    },
    /// Apply manifests and prune what left the set
    Apply(ApplyArgs),
    /// Show what apply would do without changing the cluster
    Preview {
        #[command(flatten)]
        args: ApplyArgs,
        /// Send requests with the server dry-run flag instead of skipping them
        #[arg(long = "server", action = ArgAction::SetTrue)]
        server: bool,
        /// Preview a destroy instead of an apply
        #[arg(long = "destroy", action = ArgAction::SetTrue)]
        destroy: bool,
    },
    /// Delete every object recorded in the inventory, then the inventory itself
    Destroy {
        paths: Vec<PathBuf>,
        #[arg(long = "cascade", value_enum, default_value_t = Cascade::Background)]
        cascade: Cascade,
    },
}

fn init_tracing() {
    let env = std::env::var("KSET_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // Stdout carries printer output
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KSET_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KSET_METRICS_ADDR; expected host:port");
        }
    }
}

fn apply_options(args: &ApplyArgs, dry_run: DryRunStrategy) -> ApplyOptions {
    let mut opts = ApplyOptions::from_env();
    opts.dry_run = dry_run;
    opts.server_side = args.server_side;
    opts.force_conflicts = args.force_conflicts;
    if let Some(fm) = &args.field_manager { opts.field_manager = fm.clone(); }
    opts.prune = !args.no_prune;
    opts.propagation = args.cascade.into();
    opts.inventory_policy = match args.inventory_policy {
        Policy::MustMatch => InventoryPolicy::MustMatch,
        Policy::AdoptIfNoInventory => InventoryPolicy::AdoptIfNoInventory,
        Policy::AdoptAll => InventoryPolicy::AdoptAll,
    };
    if args.reconcile_timeout > 0 { opts.reconcile_timeout = Some(Duration::from_secs(args.reconcile_timeout)); }
    opts
}

fn load(paths: &[PathBuf], namespace: &str) -> Result<Vec<kube::core::DynamicObject>> {
    let mut objs = manifest::read_manifests(paths, manifest::max_yaml_bytes())?;
    manifest::default_namespace(&mut objs, namespace);
    Ok(objs)
}

/// Cancel the run on Ctrl-C; the stream then ends with a cancellation error.
fn cancel_on_ctrl_c(handle: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received; cancelling run");
            handle.cancel();
        }
    });
}

async fn render(stream: EventStream, output: Output, dry_run: DryRunStrategy) -> Result<()> {
    cancel_on_ctrl_c(stream.cancel_handle());
    let mut p = printer(output.into(), dry_run);
    let mut stdout = std::io::stdout().lock();
    match print(p.as_mut(), stream, &mut stdout).await {
        Ok(()) => Ok(()),
        Err(PrintError::Run(e)) => bail!("{}", e),
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { dir, inventory_id, name } => {
            let id = inventory_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            if id.trim().is_empty() { bail!("inventory id must not be empty"); }
            std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
            let path = dir.join("inventory-template.yaml");
            if path.exists() { bail!("{} already exists", path.display()); }
            std::fs::write(&path, manifest::marker_template(&name, &cli.namespace, id.trim()))
                .with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), inventory_id = %id, "inventory template written");
            println!("{}", path.display());
        }
        Commands::Apply(args) => {
            let objs = load(&args.paths, &cli.namespace)?;
            let opts = apply_options(&args, DryRunStrategy::None);
            let client = Arc::new(KubeClient::try_default().await?);
            info!(objects = objs.len(), "apply invoked");
            render(Applier::new(client).run_objects(objs, opts), cli.output, DryRunStrategy::None).await?;
        }
        Commands::Preview { args, server, destroy } => {
            let dry_run = if server { DryRunStrategy::ServerSide } else { DryRunStrategy::ClientOnly };
            let objs = load(&args.paths, &cli.namespace)?;
            let client = Arc::new(KubeClient::try_default().await?);
            info!(objects = objs.len(), ?dry_run, destroy, "preview invoked");
            let stream = if destroy {
                let (marker, _) = split_objects(objs)?;
                let opts = DestroyOptions { dry_run, propagation: args.cascade.into(), ..DestroyOptions::from_env() };
                Destroyer::new(client).run(marker, opts)
            } else {
                Applier::new(client).run_objects(objs, apply_options(&args, dry_run))
            };
            render(stream, cli.output, dry_run).await?;
        }
        Commands::Destroy { paths, cascade } => {
            let objs = load(&paths, &cli.namespace)?;
            let (marker, _) = split_objects(objs)?;
            let client = Arc::new(KubeClient::try_default().await?);
            let opts = DestroyOptions { propagation: cascade.into(), ..DestroyOptions::from_env() };
            info!(marker = ?marker.metadata.name, "destroy invoked");
            render(Destroyer::new(client).run(marker, opts), cli.output, DryRunStrategy::None).await?;
        }
    }
    Ok(())
}
