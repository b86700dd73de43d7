use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use crs_offline::configuration::config::Config;
use crs_offline::enrichment::Enricher;
use crs_offline::storage::FileStorage;
use crs_offline::web_interface::WebServer;
use log::{error, info};

#[derive(Parser)]
#[command(name = "crs-offline")]
#[command(version = "0.1.0")]
#[command(about = "Offline CRS inspection of recorded HTTP exchanges")]
struct Args {
    config_file: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the analysis API
    Serve {
        /// Overrides `server.port`
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Enrich one record file and print the document as JSON
    Enrich {
        record: PathBuf,

        /// Print the basic view instead of the full document
        #[arg(long)]
        basic: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    // Get command-line arguments
    let args = Args::parse();

    if let Command::Serve { .. } = args.command {
        println!(
            "
==============================================================================
          crs-offline v0.1.0: threat enrichment of recorded HTTP traffic
==============================================================================
"
        );
    }

    info!("Importing configuration");

    if args.config_file.is_empty() {
        error!("No configuration file found");
        std::process::exit(1);
    }

    let config = match Config::from_file(Path::new(args.config_file.as_str())) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration from file: {}", e);
            std::process::exit(1);
        }
    };

    info!("Configuration imported successfully");

    let enricher = match Enricher::from_config(&config) {
        Ok(enricher) => enricher,
        Err(e) => {
            error!("Unable to create the enricher: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    match args.command {
        Command::Serve { port } => {
            let storage = match FileStorage::from_env_or(&config.storage.records_dir) {
                Ok(storage) => storage,
                Err(e) => {
                    error!("Unable to open record storage: {}, exiting...", e);
                    std::process::exit(1);
                }
            };
            let server = WebServer::new(Arc::new(storage), Arc::new(enricher));
            let port = port.unwrap_or(config.server.port);
            if let Err(e) = server.start(&config.server.bind_address, port).await {
                error!("Error occured in the web server: {}, exiting...", e);
                std::process::exit(1);
            }
        }
        Command::Enrich { record, basic } => {
            let file = match tokio::fs::File::open(&record).await {
                Ok(file) => file,
                Err(e) => {
                    error!("Unable to open record {}: {}", record.display(), e);
                    std::process::exit(1);
                }
            };
            let doc = match enricher.enrich_record(file).await {
                Ok(doc) => doc,
                Err(e) => {
                    error!("Unable to enrich record {}: {}", record.display(), e);
                    std::process::exit(1);
                }
            };
            let json = if basic {
                serde_json::to_string_pretty(&doc.basic_view())
            } else {
                serde_json::to_string_pretty(&doc)
            };
            match json {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    error!("Unable to serialize document: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let args =
            Args::try_parse_from(["crs-offline", "conf.toml", "serve", "--port", "9000"]).unwrap();
        assert_eq!(args.config_file, "conf.toml");
        assert!(matches!(args.command, Command::Serve { port: Some(9000) }));

        let args =
            Args::try_parse_from(["crs-offline", "conf.toml", "enrich", "r.http", "--basic"])
                .unwrap();
        match args.command {
            Command::Enrich { record, basic } => {
                assert_eq!(record, PathBuf::from("r.http"));
                assert!(basic);
            }
            _ => panic!("expected enrich"),
        }

        assert!(Args::try_parse_from(["crs-offline", "conf.toml"]).is_err());
    }
}
