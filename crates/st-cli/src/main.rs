//! Site Tweaker CLI
//!
//! Inspect and edit a settings file, preview the header rule and script
//! resolution for a URL, refresh remote sources, and replay browser events.

mod fetch;
mod settings_file;
mod simulate;

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use clap::{Parser, Subcommand};

use st_core::{extract_domain, path_and_query, resolve, IconState, MenuPlan, ScriptDraft, ScriptKind};
use st_rules::synthesize;
use st_runtime::{Coordinator, CoordinatorConfig, Host, ManualExecution};

use crate::settings_file::{read_settings, write_settings, FileStore};
use crate::simulate::ConsoleHost;

#[derive(Parser)]
#[command(name = "st-cli")]
#[command(about = "Site Tweaker settings and rule tools")]
struct Cli {
    /// Settings file (created on first write)
    #[arg(short, long, global = true, default_value = "site-tweaker-settings.json")]
    settings: PathBuf,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the scripts that apply to a URL
    Resolve {
        url: String,
    },

    /// Print the header-stripping rule as JSON
    Rule,

    /// Show the toolbar icon state for a URL
    Icon {
        url: String,
    },

    /// Show the context menu for a URL
    Menu {
        url: String,
    },

    /// Register a site
    AddSite {
        domain: String,

        /// Strip security headers on this site
        #[arg(long)]
        csp: bool,
    },

    /// Add a script to a site
    AddScript {
        domain: String,

        /// File holding the script body
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long)]
        name: Option<String>,

        /// Treat the file as CSS
        #[arg(long)]
        css: bool,

        /// Run automatically on page load
        #[arg(long)]
        auto_run: bool,
    },

    /// Add a GitHub source and fetch it
    AddSource {
        url: String,

        /// GitHub token for private repositories
        #[arg(short, long)]
        token: Option<String>,
    },

    /// Refresh one source, or all of them
    Refresh {
        /// Source id
        id: Option<String>,
    },

    /// Replay a JSON file of browser events and messages
    Simulate {
        events: PathBuf,

        /// Refuse manual runs while globally disabled
        #[arg(long)]
        strict: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let settings = cli.settings.as_path();
    let result = match cli.command {
        Commands::Resolve { url } => cmd_resolve(settings, &url),
        Commands::Rule => cmd_rule(settings),
        Commands::Icon { url } => cmd_icon(settings, &url),
        Commands::Menu { url } => cmd_menu(settings, &url),
        Commands::AddSite { domain, csp } => cmd_add_site(settings, &domain, csp),
        Commands::AddScript {
            domain,
            file,
            name,
            css,
            auto_run,
        } => cmd_add_script(settings, &domain, &file, name, css, auto_run),
        Commands::AddSource { url, token } => cmd_add_source(settings, &url, token),
        Commands::Refresh { id } => cmd_refresh(settings, id.as_deref()),
        Commands::Simulate { events, strict } => cmd_simulate(settings, &events, strict),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn split_url(url: &str) -> Result<(String, String), String> {
    let domain = extract_domain(url).ok_or_else(|| format!("Not a URL: '{}'", url))?;
    let path = path_and_query(url).unwrap_or_else(|| "/".to_string());
    Ok((domain, path))
}

fn cmd_resolve(settings_path: &Path, url: &str) -> Result<(), String> {
    let settings = read_settings(settings_path)?;
    let (domain, path) = split_url(url)?;
    let matches = resolve(&settings, &domain, &path);

    match matches.site {
        Some(site) => println!("Site:     {} ({})", site.domain, site.id),
        None => println!("Site:     none"),
    }

    let auto_run = matches.auto_run(url);
    println!("Auto-run: {}", auto_run.len());
    for script in &auto_run {
        println!("  {:?} {} [{:?}]", script.kind, script.name, script.identity.origin);
    }

    let manual = matches.manual();
    println!("Manual:   {}", manual.len());
    for script in &manual {
        println!("  {:?} {} [{:?}]", script.kind, script.name, script.identity.origin);
    }

    Ok(())
}

fn cmd_rule(settings_path: &Path) -> Result<(), String> {
    let settings = read_settings(settings_path)?;
    match synthesize(&settings) {
        Some(rule) => {
            let json = serde_json::to_string_pretty(&rule.to_json())
                .map_err(|e| format!("Failed to serialize rule: {}", e))?;
            println!("{}", json);
        }
        None => println!("No header rule (no CSP-enabled sites or sources)"),
    }
    Ok(())
}

fn cmd_icon(settings_path: &Path, url: &str) -> Result<(), String> {
    let settings = read_settings(settings_path)?;
    let state = IconState::derive(&settings, Some(url));
    println!("{}", state.as_str());
    for (size, path) in state.paths() {
        println!("  {:>3}: {}", size, path);
    }
    Ok(())
}

fn cmd_menu(settings_path: &Path, url: &str) -> Result<(), String> {
    let settings = read_settings(settings_path)?;
    let (domain, path) = split_url(url)?;
    let plan = MenuPlan::build(&resolve(&settings, &domain, &path).manual());

    if plan.is_empty() {
        println!("No menu entries");
        return Ok(());
    }
    for entry in &plan.entries {
        let indent = if entry.parent_id.is_some() { "  " } else { "" };
        println!("{}{} [{}]", indent, entry.title, entry.id);
    }
    Ok(())
}

fn cmd_add_site(settings_path: &Path, domain: &str, csp: bool) -> Result<(), String> {
    let mut settings = read_settings(settings_path)?;
    let site_id = settings.add_site(domain).map_err(|e| e.to_string())?.id.clone();
    if csp && !settings.site(&site_id).map_or(false, |site| site.csp_enabled) {
        settings.toggle_site_csp(&site_id).map_err(|e| e.to_string())?;
    }
    write_settings(settings_path, &settings)?;

    println!("Site {} ({})", domain, site_id);
    Ok(())
}

fn cmd_add_script(
    settings_path: &Path,
    domain: &str,
    file: &Path,
    name: Option<String>,
    css: bool,
    auto_run: bool,
) -> Result<(), String> {
    let code = fs::read_to_string(file)
        .map_err(|e| format!("Failed to read '{}': {}", file.display(), e))?;

    let mut settings = read_settings(settings_path)?;
    let site_id = settings.add_site(domain).map_err(|e| e.to_string())?.id.clone();
    let draft = ScriptDraft {
        name,
        code,
        kind: if css { ScriptKind::Css } else { ScriptKind::Js },
        auto_run,
        url_patterns: Vec::new(),
    };
    let script = settings
        .add_script(&site_id, draft)
        .map_err(|e| e.to_string())?;
    println!("Script {} ({}) on {}", script.name, script.id, domain);

    write_settings(settings_path, &settings)
}

/// Coordinator over the settings file, for source operations.
fn file_coordinator(settings_path: &Path) -> Result<Coordinator, String> {
    let console = Rc::new(ConsoleHost::default());
    let host = Host {
        store: Rc::new(FileStore::new(settings_path)),
        injector: console.clone(),
        rules: console.clone(),
        menus: console.clone(),
        tabs: console,
        fetcher: Rc::new(fetch::github_fetcher()?),
    };
    Ok(Coordinator::new(host, CoordinatorConfig::default()))
}

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    Ok(runtime.block_on(future))
}

fn cmd_add_source(settings_path: &Path, url: &str, token: Option<String>) -> Result<(), String> {
    let coordinator = file_coordinator(settings_path)?;
    let source = block_on(coordinator.add_source(url, token))?.map_err(|e| e.to_string())?;

    match &source.last_error {
        Some(error) => println!("Source {} added, but fetch failed: {}", source.id, error),
        None => println!(
            "Source {} added: {} v{} ({} scripts)",
            source.id,
            source.name,
            source.version,
            source.scripts.len()
        ),
    }
    Ok(())
}

fn cmd_refresh(settings_path: &Path, id: Option<&str>) -> Result<(), String> {
    let coordinator = file_coordinator(settings_path)?;

    match id {
        Some(id) => {
            let source = block_on(coordinator.refresh_source(id))?.map_err(|e| e.to_string())?;
            match &source.last_error {
                Some(error) => return Err(format!("Refresh of {} failed: {}", source.url, error)),
                None => println!("Refreshed {} ({} scripts)", source.name, source.scripts.len()),
            }
        }
        None => {
            let count = block_on(coordinator.refresh_all_sources())?.map_err(|e| e.to_string())?;
            println!("Refreshed {} sources", count);

            for source in read_settings(settings_path)?.sources {
                if let Some(error) = source.last_error {
                    println!("  {}: {}", source.url, error);
                }
            }
        }
    }
    Ok(())
}

fn cmd_simulate(settings_path: &Path, events_path: &Path, strict: bool) -> Result<(), String> {
    let settings = read_settings(settings_path)?;
    let text = fs::read_to_string(events_path)
        .map_err(|e| format!("Failed to read '{}': {}", events_path.display(), e))?;
    let steps = simulate::parse_steps(&text)?;

    let config = CoordinatorConfig {
        manual_execution: if strict {
            ManualExecution::RequireEnabled
        } else {
            ManualExecution::Always
        },
        ..CoordinatorConfig::default()
    };

    let transcript = block_on(simulate::run_simulation(settings, config, steps))??;
    for line in transcript {
        println!("{}", line);
    }
    Ok(())
}
