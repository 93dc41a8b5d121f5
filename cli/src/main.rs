use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tokio_stream::StreamExt;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

use sitescrape::{HttpFetcher, JsonStore, ScrapeConfig, Scraper, Store};

mod config;
use config::Config;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored sitemap ids
    Show,
    /// Dump one sitemap definition
    Print { name: String },
    /// Stream stored records for a sitemap
    Data {
        name: String,

        #[clap(long)]
        /// Emit csv rows instead of JSON lines
        csv: bool,
    },
    /// Clear stored data and run the scraper end-to-end
    Rescrape { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than TRACE (e.g, debug, info, warn, etc.)
        // will be written to stdout.
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let args = Args::parse();
    debug!("CLI arguments parsed {:?}", args);
    let config = Config::from_env()?;
    let store = JsonStore::new(&config.store_url);

    match args.command {
        Command::Show => {
            for id in store.sitemap_ids().await? {
                println!("{}", id);
            }
        }
        Command::Print { name } => {
            let sitemap = store.get_sitemap(&name).await?;
            println!("{}", sitemap.to_json()?);
        }
        Command::Data { name, csv } => {
            let sitemap = store.get_sitemap(&name).await?;
            let records = store.records(&name).await?;
            if csv {
                for row in sitemap.csv_rows(&records) {
                    let cells: Vec<String> = row.iter().map(|c| csv_cell(c)).collect();
                    println!("{}", cells.join(","));
                }
            } else {
                let mut stream = tokio_stream::iter(records);
                while let Some(record) = stream.next().await {
                    println!("{}", serde_json::to_string(&record)?);
                }
            }
        }
        Command::Rescrape { name } => {
            let sitemap = store.get_sitemap(&name).await?;
            store.clear_records(&name).await?;
            info!("rescraping {}", name);

            let fetcher = HttpFetcher::new(
                &config.user_agent,
                Duration::from_millis(config.request_timeout_ms),
            )?;
            let mut scraper = Scraper::new(
                sitemap,
                Arc::new(fetcher),
                Arc::new(store),
                ScrapeConfig {
                    request_interval: Duration::from_millis(config.request_interval_ms),
                    pageload_delay: Duration::from_millis(config.pageload_delay_ms),
                },
            );
            scraper.run().await?;
        }
    }

    Ok(())
}

/// Minimal csv escaping: cells with separators or quotes get quoted.
fn csv_cell(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}
