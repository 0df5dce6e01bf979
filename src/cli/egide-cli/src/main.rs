//! Egide CLI - Command line interface.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "egide")]
#[command(about = "Nubster Egide CLI - Manage secrets, keys, and certificates")]
#[command(version)]
struct Cli {
    /// Egide server address
    #[arg(long, default_value = "http://localhost:8200", env = "EGIDE_ADDR")]
    addr: String,

    /// Authentication token
    #[arg(long, env = "EGIDE_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Operator commands (init, seal, unseal)
    Operator {
        #[command(subcommand)]
        command: OperatorCommands,
    },
    /// Secrets management
    Secrets {
        #[command(subcommand)]
        command: SecretsCommands,
    },
    /// Transit encryption
    Transit {
        #[command(subcommand)]
        command: TransitCommands,
    },
    /// KMS operations
    Kms {
        #[command(subcommand)]
        command: KmsCommands,
    },
    /// PKI operations
    Pki {
        #[command(subcommand)]
        command: PkiCommands,
    },
    /// Server status
    Status,
}

#[derive(Subcommand)]
enum OperatorCommands {
    /// Initialize a new Egide server
    Init {
        /// Number of key shares
        #[arg(long, default_value = "5")]
        key_shares: u8,
        /// Key threshold required to unseal
        #[arg(long, default_value = "3")]
        key_threshold: u8,
    },
    /// Unseal the server
    Unseal {
        /// Unseal key
        key: Option<String>,
    },
    /// Seal the server
    Seal,
}

#[derive(Subcommand)]
enum SecretsCommands {
    /// Get a secret
    Get {
        /// Secret path
        path: String,
    },
    /// Store a secret
    Put {
        /// Secret path
        path: String,
        /// Key=value pairs
        #[arg(required = true)]
        data: Vec<String>,
    },
    /// Delete a secret
    Delete {
        /// Secret path
        path: String,
    },
    /// List secrets
    List {
        /// Path prefix
        #[arg(default_value = "")]
        prefix: String,
    },
}

#[derive(Subcommand)]
enum TransitCommands {
    /// Encrypt data
    Encrypt {
        /// Key name
        key: String,
        /// Plaintext (or read from stdin)
        plaintext: Option<String>,
    },
    /// Decrypt data
    Decrypt {
        /// Key name
        key: String,
        /// Ciphertext
        ciphertext: String,
    },
}

#[derive(Subcommand)]
enum KmsCommands {
    /// Create a new key
    Create {
        /// Key name
        name: String,
        /// Key type (aes256, rsa2048, rsa4096, ecdsa-p256, ed25519)
        #[arg(long, default_value = "aes256")]
        key_type: String,
    },
    /// List keys
    List,
    /// Rotate a key
    Rotate {
        /// Key name
        name: String,
    },
}

#[derive(Subcommand)]
enum PkiCommands {
    /// Initialize CA
    InitCa {
        /// Common name
        #[arg(long)]
        cn: String,
        /// Organization
        #[arg(long)]
        org: Option<String>,
    },
    /// Issue a certificate
    Issue {
        /// Common name
        #[arg(long)]
        cn: String,
        /// Template name
        #[arg(long, default_value = "server")]
        template: String,
    },
    /// List certificates
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // TODO: Implement command handlers

    match cli.command {
        Commands::Status => {
            println!("Checking Egide server at {}...", cli.addr);
            // TODO: Implement status check
        },
        Commands::Operator { command } => {
            match command {
                OperatorCommands::Init {
                    key_shares,
                    key_threshold,
                } => {
                    println!(
                        "Initializing Egide with {} shares, threshold {}...",
                        key_shares, key_threshold
                    );
                    // TODO: Implement init
                },
                OperatorCommands::Unseal { key: _key } => {
                    println!("Unsealing Egide...");
                    // TODO: Implement unseal
                },
                OperatorCommands::Seal => {
                    println!("Sealing Egide...");
                    // TODO: Implement seal
                },
            }
        },
        Commands::Secrets { command } => {
            match command {
                SecretsCommands::Get { path } => {
                    println!("Getting secret: {}", path);
                    // TODO: Implement get
                },
                SecretsCommands::Put { path, data: _data } => {
                    println!("Storing secret: {}", path);
                    // TODO: Implement put
                },
                SecretsCommands::Delete { path } => {
                    println!("Deleting secret: {}", path);
                    // TODO: Implement delete
                },
                SecretsCommands::List { prefix } => {
                    println!("Listing secrets with prefix: {}", prefix);
                    // TODO: Implement list
                },
            }
        },
        Commands::Transit { command } => {
            match command {
                TransitCommands::Encrypt {
                    key,
                    plaintext: _plaintext,
                } => {
                    println!("Encrypting with key: {}", key);
                    // TODO: Implement encrypt
                },
                TransitCommands::Decrypt {
                    key,
                    ciphertext: _ciphertext,
                } => {
                    println!("Decrypting with key: {}", key);
                    // TODO: Implement decrypt
                },
            }
        },
        Commands::Kms { command } => {
            match command {
                KmsCommands::Create { name, key_type } => {
                    println!("Creating key {} of type {}", name, key_type);
                    // TODO: Implement create
                },
                KmsCommands::List => {
                    println!("Listing keys...");
                    // TODO: Implement list
                },
                KmsCommands::Rotate { name } => {
                    println!("Rotating key: {}", name);
                    // TODO: Implement rotate
                },
            }
        },
        Commands::Pki { command } => {
            match command {
                PkiCommands::InitCa { cn, org: _org } => {
                    println!("Initializing CA with CN: {}", cn);
                    // TODO: Implement init-ca
                },
                PkiCommands::Issue {
                    cn,
                    template: _template,
                } => {
                    println!("Issuing certificate for: {}", cn);
                    // TODO: Implement issue
                },
                PkiCommands::List => {
                    println!("Listing certificates...");
                    // TODO: Implement list
                },
            }
        },
    }

    Ok(())
}
