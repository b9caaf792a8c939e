use clap::{Parser, Subcommand};
use frost_ceremony::{generate_keys, sign_message, validate_signature, CeremonyConfig, Topology};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "frost-ceremony")]
#[command(about = "CLI for FROST DKG and threshold signing ceremonies", long_about = None)]
struct Cli {
    /// JSON ceremony configuration; command line arguments override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the DKG and write the ceremony file
    Generate {
        #[arg(short, long)]
        t: Option<u16>,
        #[arg(short, long)]
        n: Option<usize>,
        #[arg(long, value_enum)]
        topology: Option<Topology>,
        #[arg(long, default_value = "./results/frost_ceremony.json")]
        keys_file: String,
    },
    /// Sign a transaction carrying a memo
    Sign {
        #[arg(short, long)]
        memo: String,
        #[arg(long, value_delimiter = ',', default_value = "0,1")]
        signers: Vec<usize>,
        #[arg(long)]
        expert_mode: bool,
        #[arg(long, default_value = "./results/frost_ceremony.json")]
        keys_file: String,
        #[arg(long, default_value = "./results/signed_transaction.json")]
        signature_file: String,
    },
    /// Verify a signed transaction against the ceremony's group key
    Verify {
        #[arg(long, default_value = "./results/frost_ceremony.json")]
        keys_file: String,
        #[arg(long, default_value = "./results/signed_transaction.json")]
        signature_file: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => CeremonyConfig::from_file(path)?,
        None => CeremonyConfig::default(),
    };

    match cli.command {
        Commands::Generate {
            t,
            n,
            topology,
            keys_file,
        } => {
            if let Some(t) = t {
                config.min_signers = t;
            }
            if let Some(n) = n {
                config.participants = n;
            }
            if let Some(topology) = topology {
                config.topology = topology;
            }
            println!("Generating keys...");
            generate_keys(&config, &keys_file)?;
        }
        Commands::Sign {
            memo,
            signers,
            expert_mode,
            keys_file,
            signature_file,
        } => {
            println!("Signing transaction with memo: {}", memo);
            sign_message(
                &memo,
                &signers,
                &keys_file,
                &signature_file,
                expert_mode || config.expert_mode,
            )?;
        }
        Commands::Verify {
            keys_file,
            signature_file,
        } => {
            println!("Using signature file: {}", signature_file);
            validate_signature(&keys_file, &signature_file)?;
        }
    }

    Ok(())
}
