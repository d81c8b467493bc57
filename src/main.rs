mod catalog;
mod client;
mod collector;
mod config;
mod http;
mod hypervisor;
mod metrics;
mod snapshot;

use axum::serve;
use clap::Parser;
use collector::XenCollector;
use config::Config;
use hypervisor::libxenstat::LibXenstat;
use metrics::Metrics;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "xentop-exporter")]
#[command(version)]
struct Cli {
    /// YAML config; built-in defaults are used when omitted.
    #[arg(long)]
    config: Option<String>,
    /// Overrides `listen` from the config.
    #[arg(long)]
    bind: Option<String>,
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match &cli.config {
        Some(path) => match Config::load_from_file(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = %err, "не удалось загрузить конфигурацию");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if let Some(bind) = cli.bind {
        cfg.listen = bind;
    }
    let addr = match cfg.validate().and_then(|_| cfg.bind_address()) {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, "некорректная конфигурация");
            std::process::exit(1);
        }
    };

    info!(
        listen = %addr,
        granularity = ?cfg.granularity,
        scrape_timeout_secs = cfg.scrape_timeout_secs,
        "запуск xentop-exporter"
    );

    let collector = match XenCollector::new(LibXenstat::new(cfg.library_path()), cfg.granularity)
    {
        Ok(c) => c,
        Err(err) => {
            error!(error = %err, "не удалось создать коллектор Xen");
            std::process::exit(1);
        }
    };
    let metrics = match Metrics::new(&collector) {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            std::process::exit(1);
        }
    };

    let listener = match http::bind(&addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, listen = %addr, "не удалось запустить HTTP-сервер");
            std::process::exit(1);
        }
    };

    // Connection failures are retried on every scrape.
    {
        let collector = collector.clone();
        match tokio::task::spawn_blocking(move || collector.snapshot()).await {
            Ok(Ok(domains)) => info!(domains = domains.len(), "подключение к гипервизору установлено"),
            Ok(Err(err)) => warn!(error = %err, "гипервизор недоступен, повторная попытка при следующем опросе"),
            Err(err) => error!(error = %err, "первичный опрос гипервизора завершился аварийно"),
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let app = http::build_router(metrics.clone(), collector.clone(), cfg.scrape_timeout());
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "ошибка HTTP-сервера");
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
    }
    info!("получен Ctrl+C, выполняется остановка");

    let _ = shutdown_tx.send(true);
    let _ = http_task.await;

    if collector.is_connected() {
        let _ = tokio::task::spawn_blocking(move || collector.close()).await;
        info!("соединение с гипервизором закрыто");
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
