mod browse;
mod render;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use sgf_catalog::{sample_transport, CatalogRegistry};
use sgf_core::SourceId;
use sgf_sync::{CatalogLoader, DashboardView, Event, Session, SyncConfig};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::browse::Command;

#[derive(Debug, Parser)]
#[command(name = "sgf-cli")]
#[command(about = "Browse the Coacel and Convivir gluten-free product catalogs")]
struct Cli {
    /// Debug-level logs on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Errors only.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Serve the built-in sample lists instead of fetching over the network.
    #[arg(long, global = true)]
    offline_samples: bool,
    /// Machine-readable output.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load both catalogs and print the unfiltered dashboard.
    Load(ViewArgs),
    /// Load, apply filters and print the matching products.
    Query(QueryArgs),
    /// Interactive filter loop.
    Browse,
    /// Show the effective dataset URLs and proxies.
    Sources,
}

#[derive(Debug, Default, Args)]
struct ViewArgs {
    /// Maximum table rows to print.
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct QueryArgs {
    #[arg(short, long, default_value = "")]
    search: String,
    #[arg(short, long, default_value = "")]
    category: String,
    #[arg(long, default_value = "")]
    company: String,
    /// Restrict to these sources (repeatable); all by default.
    #[arg(long = "source", value_name = "SOURCE")]
    sources: Vec<String>,
    #[command(flatten)]
    view: ViewArgs,
}

fn init_tracing(quiet: bool, verbose: bool) -> Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("SGF_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

fn build_loader(config: &SyncConfig, offline_samples: bool) -> Result<CatalogLoader> {
    if !offline_samples {
        return CatalogLoader::from_config(config);
    }
    let registry = config.registry()?;
    let transport = sample_transport(&registry).context("building sample transport")?;
    Ok(CatalogLoader::new(registry, Arc::new(transport)))
}

fn view_output(view: &DashboardView, json: bool, limit: Option<usize>) -> Result<String> {
    if json {
        Ok(serde_json::to_string_pretty(&render::dashboard_json(view))?)
    } else {
        Ok(render::dashboard(view, limit))
    }
}

fn print_view(view: &DashboardView, json: bool, limit: Option<usize>) -> Result<()> {
    println!("{}", view_output(view, json, limit)?);
    Ok(())
}

fn query_events(args: &QueryArgs) -> Result<Vec<Event>> {
    let mut events = vec![
        Event::SearchChanged(args.search.trim().to_string()),
        Event::CategorySelected(args.category.trim().to_string()),
        Event::CompanySelected(args.company.trim().to_string()),
    ];
    if !args.sources.is_empty() {
        let mut wanted = Vec::new();
        for slug in &args.sources {
            match SourceId::from_slug(slug) {
                Some(source) => wanted.push(source),
                None => bail!("unknown source `{slug}` (expected coacel or convivir)"),
            }
        }
        events.extend(
            SourceId::ALL
                .into_iter()
                .filter(|s| !wanted.contains(s))
                .map(Event::SourceToggled),
        );
    }
    Ok(events)
}

async fn browse(session: &mut Session, json: bool) -> Result<()> {
    session.load().await;
    print_view(&session.state().view(), json, None)?;
    eprintln!("{}", browse::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let command = match browse::parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                eprintln!("{err}");
                continue;
            }
        };
        match run_command(session, command, json).await? {
            Reply::Out(text) => println!("{text}"),
            Reply::Help => eprintln!("{}", browse::HELP),
            Reply::Quit => break,
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Out(String),
    Help,
    Quit,
}

async fn run_command(session: &mut Session, command: Command, json: bool) -> Result<Reply> {
    let reply = match command {
        Command::Event(event) => {
            session.dispatch(event);
            Reply::Out(format!("{} products", session.state().view().total))
        }
        Command::Retry => {
            session.load().await;
            Reply::Out(view_output(&session.state().view(), json, None)?)
        }
        Command::Show(limit) => Reply::Out(view_output(&session.state().view(), json, limit)?),
        Command::Json => Reply::Out(view_output(&session.state().view(), true, None)?),
        Command::Help => Reply::Help,
        Command::Quit => Reply::Quit,
    };
    Ok(reply)
}

fn print_sources(registry: &CatalogRegistry, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(registry)?);
    } else {
        println!("{}", render::registry(registry));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    let config = SyncConfig::from_env();
    let command = cli
        .command
        .unwrap_or_else(|| Commands::Load(ViewArgs::default()));

    if let Commands::Sources = command {
        return print_sources(&config.registry()?, cli.json);
    }

    let loader = build_loader(&config, cli.offline_samples)?;
    let mut session = Session::new(Arc::new(loader));

    match command {
        Commands::Load(args) => {
            session.load().await;
            print_view(&session.state().view(), cli.json, args.limit)?;
        }
        Commands::Query(args) => {
            let events = query_events(&args)?;
            session.load().await;
            for event in events {
                session.dispatch(event);
            }
            print_view(&session.state().view(), cli.json, args.view.limit)?;
        }
        Commands::Browse => browse(&mut session, cli.json).await?,
        Commands::Sources => {}
    }

    if let Some(error) = session.state().error() {
        tracing::warn!(error, "finished without catalog data");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(sources: &[&str]) -> QueryArgs {
        QueryArgs {
            search: " jugo ".into(),
            category: String::new(),
            company: String::new(),
            sources: sources.iter().map(ToString::to_string).collect(),
            view: ViewArgs::default(),
        }
    }

    #[test]
    fn query_sources_toggle_off_the_rest() {
        let events = query_events(&query(&["convivir"])).unwrap();
        assert_eq!(events[0], Event::SearchChanged("jugo".into()));
        assert_eq!(events.last(), Some(&Event::SourceToggled(SourceId::Coacel)));
        assert_eq!(events.len(), 4);

        assert_eq!(query_events(&query(&[])).unwrap().len(), 3);
        assert!(query_events(&query(&["elsewhere"])).is_err());
    }

    #[tokio::test]
    async fn offline_samples_load_both_catalogs() {
        let config = SyncConfig {
            workspace_root: std::env::temp_dir().join("sgf-cli-missing-root"),
            ..SyncConfig::default()
        };
        let loader = build_loader(&config, true).unwrap();
        let mut session = Session::new(Arc::new(loader));
        let view = session.load().await.view();
        assert_eq!(view.total, 20);
        assert!(view.error.is_none());
        assert!(render::dashboard(&view, Some(3)).contains("20 products"));
    }

    #[tokio::test]
    async fn browse_retry_follows_the_json_flag() {
        let config = SyncConfig {
            workspace_root: std::env::temp_dir().join("sgf-cli-missing-root"),
            ..SyncConfig::default()
        };
        let loader = build_loader(&config, true).unwrap();
        let mut session = Session::new(Arc::new(loader));

        let Reply::Out(text) = run_command(&mut session, Command::Retry, true).await.unwrap() else {
            panic!("retry should print the dashboard");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["view"]["total"], 20);
        assert_eq!(value["view"]["generation"], 1);

        let Reply::Out(text) = run_command(&mut session, Command::Retry, false).await.unwrap() else {
            panic!("retry should print the dashboard");
        };
        assert!(text.contains("20 products"));
        assert!(serde_json::from_str::<serde_json::Value>(&text).is_err());
        assert_eq!(
            run_command(&mut session, Command::Quit, true).await.unwrap(),
            Reply::Quit
        );
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["sgf-cli", "query", "--search", "pan", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Some(Commands::Query(ref q)) if q.search == "pan"));
    }
}
