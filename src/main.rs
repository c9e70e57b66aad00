use clap::{Parser, Subcommand};
use notekb::commands::{
    build_clusters, build_embeddings, build_index, build_modules, serve, show_status,
};
use notekb::config::Config;

#[derive(Parser)]
#[command(name = "notekb")]
#[command(about = "A markdown knowledge-base indexing and retrieval engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the corpus and (re)build the passage index
    BuildIndex,
    /// Embed chunks that lack vectors under the configured model
    BuildEmbeddings {
        /// Batch size per embedder call
        #[arg(long)]
        batch: Option<usize>,
    },
    /// Partition embedded chunks into topic clusters
    BuildClusters {
        /// Cluster count; derived from the corpus size when omitted
        #[arg(long)]
        k: Option<usize>,
    },
    /// Assign files to coarse modules
    BuildModules,
    /// Start the HTTP frontend
    Serve,
    /// Show store statistics
    Status,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(2);
        }
    };

    let result = match cli.command {
        Commands::BuildIndex => build_index(config).await,
        Commands::BuildEmbeddings { batch } => build_embeddings(config, batch).await,
        Commands::BuildClusters { k } => build_clusters(config, k).await,
        Commands::BuildModules => build_modules(config).await,
        Commands::Serve => serve(config).await,
        Commands::Status => show_status(config).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["notekb", "build-index"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::BuildIndex));
        }
    }

    #[test]
    fn build_embeddings_batch_flag() {
        let cli = Cli::try_parse_from(["notekb", "build-embeddings", "--batch", "32"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::BuildEmbeddings { batch } = parsed.command {
                assert_eq!(batch, Some(32));
            }
        }
    }

    #[test]
    fn build_clusters_k_flag() {
        let cli = Cli::try_parse_from(["notekb", "build-clusters", "--k", "16"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::BuildClusters { k } = parsed.command {
                assert_eq!(k, Some(16));
            }
        }
    }

    #[test]
    fn serve_command() {
        let cli = Cli::try_parse_from(["notekb", "serve"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn invalid_command_is_usage_error() {
        let cli = Cli::try_parse_from(["notekb", "explode"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["notekb", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
