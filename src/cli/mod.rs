//! CLI mode for latexer-sw: install, inspect and serve the offline cache.

mod progress;

use std::path::PathBuf;
#[cfg(feature = "server")]
use std::sync::Arc;

use crate::{
    AppConfig, CacheStorage, DiskCacheStorage, Error, MatchScope, PathConfig, ReqwestNetwork,
    ServiceWorker,
};

use progress::{BarProgress, print_activation, print_caches, print_fetch, print_install_summary};

/// What the CLI was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Pre-cache the configured resources and activate.
    Install,
    /// Activate a cache installed by an earlier run.
    Activate,
    /// Answer one request through the worker.
    Fetch {
        /// URL, relative to the base URL or absolute.
        url: String,
        /// Where to write the body, if anywhere.
        output: Option<PathBuf>,
    },
    /// List partitions and their entries.
    List,
    /// Serve the application through the worker over HTTP.
    Serve {
        /// Skip install and activation before serving.
        no_install: bool,
    },
    /// Print usage.
    Help,
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// The requested command.
    pub command: Command,
    /// Explicit config file path.
    pub config: Option<PathBuf>,
    /// Override for the cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Override for the base URL.
    pub base_url: Option<String>,
    /// Override for the lookup scope.
    pub scope: Option<MatchScope>,
    /// Override for the bind host.
    pub host: Option<String>,
    /// Override for the bind port.
    pub port: Option<u16>,
}

/// Prints usage to stderr.
pub fn print_usage() {
    eprintln!("Usage: latexer-sw <COMMAND> [OPTIONS]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  install             Pre-cache the configured assets, then activate");
    eprintln!("  activate            Activate an existing install, removing stale caches");
    eprintln!("  fetch <url>         Answer one request cache-first");
    eprintln!("  list                List cache partitions and entries");
    eprintln!("  serve               Install, activate and serve the app over HTTP");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <PATH>   Config file (default: platform config dir)");
    eprintln!("  --cache-dir <DIR>     Cache storage directory");
    eprintln!("  --base-url <URL>      Origin the app is served from");
    eprintln!("  --scope <all|named>   Which caches fetch lookups search");
    eprintln!("  -o, --output <PATH>   (fetch) write the body to a file");
    eprintln!("  --host <HOST>         (serve) bind address");
    eprintln!("  --port <PORT>         (serve) bind port");
    eprintln!("  --no-install          (serve) serve the existing cache as-is");
    eprintln!("  -h, --help            Show this help");
}

impl Options {
    /// Parses arguments (without the program name).
    ///
    /// # Errors
    ///
    /// Returns a message describing the first invalid argument.
    pub fn parse<I, T>(args: I) -> std::result::Result<Self, String>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut args = args.into_iter().map(Into::into);
        let mut positional = Vec::new();
        let mut opts = Self {
            command: Command::Help,
            config: None,
            cache_dir: None,
            base_url: None,
            scope: None,
            host: None,
            port: None,
        };
        let mut output = None;
        let mut no_install = false;
        let mut help = false;

        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .ok_or_else(|| format!("{flag} requires a value"))
            };
            match arg.as_str() {
                "-h" | "--help" => help = true,
                "-c" | "--config" => opts.config = Some(PathBuf::from(value(&*arg)?)),
                "--cache-dir" => opts.cache_dir = Some(PathBuf::from(value(&*arg)?)),
                "--base-url" => opts.base_url = Some(value(&*arg)?),
                "--scope" => {
                    opts.scope = Some(match value(&*arg)?.as_str() {
                        "all" => MatchScope::AllCaches,
                        "named" => MatchScope::Named,
                        other => return Err(format!("unknown scope {other:?}")),
                    });
                }
                "-o" | "--output" => output = Some(PathBuf::from(value(&*arg)?)),
                "--host" => opts.host = Some(value(&*arg)?),
                "--port" => {
                    let text = value(&*arg)?;
                    opts.port = Some(text.parse().map_err(|_| format!("invalid port {text:?}"))?);
                }
                "--no-install" => no_install = true,
                flag if flag.starts_with('-') => return Err(format!("unknown option {flag}")),
                _ => positional.push(arg),
            }
        }

        if help {
            return Ok(opts);
        }
        let mut positional = positional.into_iter();
        opts.command = match positional.next().as_deref() {
            None => Command::Help,
            Some("install") => Command::Install,
            Some("activate") => Command::Activate,
            Some("list") => Command::List,
            Some("serve") => Command::Serve { no_install },
            Some("fetch") => Command::Fetch {
                url: positional.next().ok_or("fetch requires a URL")?,
                output,
            },
            Some(other) => return Err(format!("unknown command {other:?}")),
        };
        if let Some(extra) = positional.next() {
            return Err(format!("unexpected argument {extra:?}"));
        }
        Ok(opts)
    }

    /// Loads the config file and applies command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed.
    pub fn resolve_config(&self) -> crate::Result<AppConfig> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(PathConfig::default_config_file);
        let mut config = AppConfig::load(&path)?;
        if let Some(dir) = &self.cache_dir {
            config.paths.cache_dir.clone_from(dir);
        }
        if let Some(url) = &self.base_url {
            config.worker.base_url.clone_from(url);
        }
        if let Some(scope) = self.scope {
            config.worker.match_scope = scope;
        }
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        Ok(config)
    }
}

fn build_worker(config: &AppConfig) -> crate::Result<ServiceWorker> {
    let storage = DiskCacheStorage::new(&config.paths.cache_dir);
    ServiceWorker::new(config.worker.clone(), storage, ReqwestNetwork::new()?)
}

async fn install(worker: &mut ServiceWorker) -> crate::Result<()> {
    let progress = BarProgress::new(worker.config().precache.len());
    let result = worker.install(&progress).await;
    progress.finish();
    let stats = result?;

    let swept = match worker.activate().await {
        Ok(swept) => swept,
        Err(e) => {
            log::warn!("Stale cache cleanup failed: {e}");
            Vec::new()
        }
    };
    print_install_summary(&stats, &swept);
    Ok(())
}

async fn activate(worker: &mut ServiceWorker) -> crate::Result<()> {
    worker.restore_installed().await?;
    let swept = worker.activate().await?;
    print_activation(&worker.config().cache_name, &swept);
    Ok(())
}

async fn list(worker: &ServiceWorker) -> crate::Result<()> {
    let storage = worker.storage();
    let mut caches = Vec::new();
    for name in storage.keys().await? {
        let keys = storage.entries(&name).await?;
        caches.push((name, keys));
    }
    print_caches(&caches, &worker.config().cache_name);
    Ok(())
}

async fn fetch(worker: &ServiceWorker, url: &str, output: Option<PathBuf>) -> crate::Result<()> {
    let request = worker.request(url)?;
    let outcome = worker.handle_fetch(&request).await?;
    print_fetch(request.url.as_str(), &outcome);
    if let Some(path) = output {
        tokio::fs::write(&path, &outcome.response.body).await?;
        log::info!("Wrote body to {}", path.display());
    }
    Ok(())
}

#[cfg(feature = "server")]
async fn serve(mut worker: ServiceWorker, config: &AppConfig, no_install: bool) -> crate::Result<()> {
    use tokio_util::sync::CancellationToken;

    if !no_install {
        install(&mut worker).await?;
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received SIGINT");
        }
        signal.cancel();
    });

    crate::server::serve(listener, Arc::new(worker), shutdown).await
}

#[cfg(not(feature = "server"))]
async fn serve(_worker: ServiceWorker, _config: &AppConfig, _no_install: bool) -> crate::Result<()> {
    Err(Error::FeatureDisabled("server"))
}

/// Runs the CLI with the process arguments.
///
/// # Errors
///
/// Returns the first error from config loading, install, fetch or serving.
pub async fn run() -> crate::Result<()> {
    let options = match Options::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(msg) => {
            eprintln!("Error: {msg}");
            print_usage();
            std::process::exit(2);
        }
    };
    if options.command == Command::Help {
        print_usage();
        return Ok(());
    }

    let config = options.resolve_config()?;
    let mut worker = build_worker(&config)?;

    let result = match options.command {
        Command::Install => install(&mut worker).await,
        Command::Activate => activate(&mut worker).await,
        Command::List => list(&worker).await,
        Command::Fetch { url, output } => fetch(&worker, &url, output).await,
        Command::Serve { no_install } => serve(worker, &config, no_install).await,
        Command::Help => Ok(()),
    };
    if let Err(Error::Install { url, source }) = &result {
        log::error!("Install failed at {url}: {source}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_install_with_overrides() {
        let opts = Options::parse([
            "install",
            "--cache-dir",
            "/tmp/c",
            "--base-url",
            "https://latexer.example/",
            "--scope",
            "named",
        ])
        .unwrap();
        assert_eq!(opts.command, Command::Install);
        assert_eq!(opts.cache_dir, Some(PathBuf::from("/tmp/c")));
        assert_eq!(opts.base_url.as_deref(), Some("https://latexer.example/"));
        assert_eq!(opts.scope, Some(MatchScope::Named));
    }

    #[test]
    fn parse_activate() {
        let opts = Options::parse(["activate", "--cache-dir", "/tmp/c"]).unwrap();
        assert_eq!(opts.command, Command::Activate);
        assert!(Options::parse(["activate", "now"]).is_err());
    }

    fn config_in(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.paths.cache_dir = dir.to_path_buf();
        config.worker.precache = Vec::new();
        config
    }

    #[tokio::test]
    async fn activate_uses_existing_partition() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = DiskCacheStorage::new(dir.path());
        storage.open("latexer-cache-v0").await.unwrap();
        storage.open("latexer-cache-v1").await.unwrap();

        let config = config_in(dir.path());
        let mut worker = build_worker(&config).unwrap();
        activate(&mut worker).await.unwrap();
        assert_eq!(worker.state(), crate::WorkerState::Activated);
        assert_eq!(storage.keys().await.unwrap(), vec!["latexer-cache-v1"]);
    }

    #[tokio::test]
    async fn activate_without_install_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut worker = build_worker(&config_in(dir.path())).unwrap();
        let err = activate(&mut worker).await.unwrap_err();
        assert!(matches!(err, Error::CacheNotFound(_)));
    }

    #[cfg(not(feature = "server"))]
    #[tokio::test]
    async fn serve_reports_missing_feature() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config_in(dir.path());
        let worker = build_worker(&config).unwrap();
        let err = serve(worker, &config, true).await.unwrap_err();
        assert!(matches!(err, Error::FeatureDisabled("server")));
    }

    #[test]
    fn parse_fetch_requires_url() {
        assert!(Options::parse(["fetch"]).is_err());
        let opts = Options::parse(["fetch", "index.html", "-o", "out.html"]).unwrap();
        assert_eq!(
            opts.command,
            Command::Fetch {
                url: "index.html".to_string(),
                output: Some(PathBuf::from("out.html")),
            }
        );
    }

    #[test]
    fn parse_serve_flags() {
        let opts = Options::parse(["serve", "--port", "9000", "--no-install"]).unwrap();
        assert_eq!(opts.command, Command::Serve { no_install: true });
        assert_eq!(opts.port, Some(9000));
        assert!(Options::parse(["serve", "--port", "lots"]).is_err());
    }

    #[test]
    fn parse_rejects_unknown_input() {
        assert!(Options::parse(["explode"]).is_err());
        assert!(Options::parse(["install", "--frobnicate"]).is_err());
        assert!(Options::parse(["install", "extra"]).is_err());
        assert!(Options::parse(["--scope", "everything", "list"]).is_err());
        assert!(Options::parse(["--config"]).is_err());
    }

    #[test]
    fn help_wins() {
        assert_eq!(Options::parse(Vec::<String>::new()).unwrap().command, Command::Help);
        assert_eq!(Options::parse(["install", "-h"]).unwrap().command, Command::Help);
    }

    #[test]
    fn overrides_apply_over_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[worker]\ncache_name = \"latexer-cache-v2\"\n[server]\nport = 1\n")
            .unwrap();
        let opts = Options::parse([
            "list",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "8080",
        ])
        .unwrap();

        let config = opts.resolve_config().unwrap();
        assert_eq!(config.worker.cache_name, "latexer-cache-v2");
        assert_eq!(config.server.port, 8080);
    }
}
