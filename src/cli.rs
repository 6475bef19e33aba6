#[cfg(feature = "cli")]
use crate::batch::BatchProcessor;
#[cfg(feature = "cli")]
use crate::config::AuthorityConfig;
#[cfg(feature = "cli")]
use crate::error::{Error, Result};
#[cfg(feature = "cli")]
use crate::host::HostProfile;
#[cfg(feature = "cli")]
use crate::issuer::{CertificateIssuer, IssuanceInstance};
#[cfg(feature = "cli")]
use crate::revocation::RevocationManager;
#[cfg(feature = "cli")]
use crate::secret::{CachedSecret, FileSecret, PromptSecret, SecretSource};
#[cfg(feature = "cli")]
use crate::store::{AuthorityStore, CONFIG_FILE};
#[cfg(feature = "cli")]
use crate::toolkit::RcgenToolkit;
#[cfg(feature = "cli")]
use crate::types::{CertStatus, DistinguishedName, KeyAlgorithm, Target};
#[cfg(feature = "cli")]
use chrono::NaiveDate;
#[cfg(feature = "cli")]
use clap::{Args, Parser, Subcommand};
#[cfg(feature = "cli")]
use colored::Colorize;
#[cfg(feature = "cli")]
use std::path::{Path, PathBuf};

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "caledger")]
#[command(version, about = "A small file-backed certificate authority", long_about = None)]
pub struct Cli {
    #[arg(short, long, default_value = ".", help = "Authority directory")]
    pub store: PathBuf,

    #[arg(
        long,
        help = "Read the CA passphrase from this file; an empty prompt answer generates one into it"
    )]
    pub passphrase_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Args)]
pub struct SubjectArgs {
    #[arg(long, help = "Common name for the CA")]
    cn: Option<String>,

    #[arg(short, long, help = "Organization name")]
    org: Option<String>,

    #[arg(short = 'u', long, help = "Organizational unit")]
    ou: Option<String>,

    #[arg(short = 'C', long, help = "Country code (2 letters)")]
    country: Option<String>,

    #[arg(short = 'S', long, help = "State or province")]
    state: Option<String>,

    #[arg(short = 'L', long, help = "Locality or city")]
    locality: Option<String>,

    #[arg(short, long, help = "Key algorithm (default ecdsa-p256)")]
    algorithm: Option<String>,

    #[arg(short, long, help = "Validity in days")]
    validity: Option<u32>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Initialize a root Certificate Authority in the store")]
    InitRoot {
        #[command(flatten)]
        subject: SubjectArgs,
    },

    #[command(about = "Initialize an intermediate Certificate Authority signed by a parent store")]
    InitIntermediate {
        #[arg(short, long, help = "Parent authority directory")]
        parent: PathBuf,

        #[command(flatten)]
        subject: SubjectArgs,
    },

    #[command(about = "Onboard a host: write its configuration from the template")]
    Onboard {
        #[arg(help = "Hostname")]
        hostname: String,

        #[arg(help = "Additional subject alternative names (IPs or DNS names)")]
        alt_names: Vec<String>,
    },

    #[command(about = "Issue a certificate for an onboarded host")]
    Sign {
        #[arg(help = "Hostname")]
        hostname: String,

        #[arg(long, help = "Issuance date used for the instance directory (YYYY-MM-DD)")]
        date: Option<NaiveDate>,
    },

    #[command(about = "Revoke the current certificate of a host or intermediate (ca:<path>)")]
    Revoke {
        #[arg(help = "Hostname, or ca:<path> for an intermediate authority")]
        target: String,
    },

    #[command(about = "Regenerate the Certificate Revocation List")]
    Crl,

    #[command(about = "List ledger entries")]
    List {
        #[arg(long, help = "Only names with this status: valid, expired, revoked")]
        status: Option<String>,

        #[cfg(feature = "json")]
        #[arg(long, help = "Print records as JSON")]
        json: bool,
    },

    #[command(about = "Onboard and sign every host in a list, skipping existing hosts")]
    Batch {
        #[arg(help = "Host list: one `hostname [alt ...]` per line")]
        file: PathBuf,

        #[arg(long, help = "Issuance date used for the instance directories (YYYY-MM-DD)")]
        date: Option<NaiveDate>,
    },
}

#[cfg(feature = "cli")]
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    let store_path = cli.store;
    let toolkit = RcgenToolkit::new();
    let mut secret = secret_source(cli.passphrase_file);

    match cli.command {
        Commands::InitRoot { subject } => {
            let config = authority_config(&store_path, subject)?;
            let store =
                AuthorityStore::initialize_root(&store_path, config, secret.as_mut(), &toolkit)?;

            println!("{}", "Root CA created successfully!".green().bold());
            print_authority(&store)?;
        }

        Commands::InitIntermediate { parent, subject } => {
            let config = authority_config(&store_path, subject)?;
            let mut parent_store = AuthorityStore::open(&parent)?;
            let store = AuthorityStore::initialize_intermediate(
                &store_path,
                config,
                &mut parent_store,
                secret.as_mut(),
                &toolkit,
            )?;

            println!("{}", "Intermediate CA created successfully!".green().bold());
            print_authority(&store)?;
            println!("  {}: {}", "Parent".cyan(), parent_store.common_name());
        }

        Commands::Onboard {
            hostname,
            alt_names,
        } => {
            let store = AuthorityStore::open(&store_path)?;
            let profile = HostProfile::onboard(&store, &hostname, &alt_names)?;

            println!("{}", "Host onboarded successfully!".green().bold());
            println!("  {}: {}", "Config".cyan(), profile.config_path.display());
            for name in profile.alt_names() {
                println!("  {}: {}", "Alt Name".cyan(), name);
            }
        }

        Commands::Sign { hostname, date } => {
            let mut store = AuthorityStore::open(&store_path)?;
            let instance = CertificateIssuer::issue_for_host(
                &mut store,
                &hostname,
                secret.as_mut(),
                &toolkit,
                date.unwrap_or_else(today),
            )?;

            println!("{}", "Certificate issued successfully!".green().bold());
            print_instance(&instance);
        }

        Commands::Revoke { target } => {
            let mut store = AuthorityStore::open(&store_path)?;
            let target = Target::parse(&target);
            let record =
                RevocationManager::revoke(&mut store, &target, secret.as_mut(), &toolkit)?;

            println!("{}", "Certificate revoked successfully!".green().bold());
            println!("  {}: {}", "Serial".cyan(), record.serial);
            println!("  {}: {}", "Subject".cyan(), record.subject);
            println!(
                "  {}: {}",
                "CRL Number".cyan(),
                store.serials().peek_crl_number()?.saturating_sub(1)
            );
        }

        Commands::Crl => {
            let mut store = AuthorityStore::open(&store_path)?;
            let number = RevocationManager::generate_crl(&mut store, secret.as_mut(), &toolkit)?;

            println!("{}", "CRL generated successfully!".green().bold());
            println!("  {}: {}", "CRL Number".cyan(), number);
            println!(
                "  {}: {}",
                "Revoked Certificates".cyan(),
                store.ledger()?.revoked().count()
            );
        }

        #[cfg(feature = "json")]
        Commands::List { status, json } => {
            let mut store = AuthorityStore::open(&store_path)?;
            store.refresh_expiry()?;
            if json {
                let wanted = status
                    .as_deref()
                    .map(str::parse::<CertStatus>)
                    .transpose()?;
                let records: Vec<_> = store
                    .ledger()?
                    .records()
                    .filter(|r| wanted.map_or(true, |s| r.status == s))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print_ledger(&store, status.as_deref())?;
            }
        }

        #[cfg(not(feature = "json"))]
        Commands::List { status } => {
            let mut store = AuthorityStore::open(&store_path)?;
            store.refresh_expiry()?;
            print_ledger(&store, status.as_deref())?;
        }

        Commands::Batch { file, date } => {
            let mut store = AuthorityStore::open(&store_path)?;
            let hosts = BatchProcessor::parse_host_list(&std::fs::read_to_string(&file)?);
            let report = BatchProcessor::run(
                &mut store,
                &hosts,
                secret.as_mut(),
                &toolkit,
                date.unwrap_or_else(today),
            )?;

            println!("{}", "Batch completed successfully!".green().bold());
            for instance in &report.provisioned {
                println!(
                    "  {} {} ({})",
                    "Issued".green(),
                    instance.hostname,
                    instance.serial
                );
            }
            for host in &report.skipped {
                println!("  {} {}", "Skipped".yellow(), host);
            }
        }
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn secret_source(passphrase_file: Option<PathBuf>) -> Box<dyn SecretSource> {
    match passphrase_file {
        Some(path) => Box::new(CachedSecret::new(FileSecret::new(
            path,
            PromptSecret::new("CA passphrase (empty to generate): "),
        ))),
        None => Box::new(CachedSecret::new(PromptSecret::default())),
    }
}

/// Starts from an existing `ca.toml` when the operator wrote one, then applies
/// the command-line values on top.
#[cfg(feature = "cli")]
fn authority_config(store: &Path, args: SubjectArgs) -> Result<AuthorityConfig> {
    let existing = store.join(CONFIG_FILE);
    let mut config = if existing.is_file() {
        AuthorityConfig::load(&existing)?
    } else {
        let cn = args.cn.clone().ok_or_else(|| {
            Error::InvalidInput(format!(
                "--cn is required when {} has no {}",
                store.display(),
                CONFIG_FILE
            ))
        })?;
        AuthorityConfig::new(DistinguishedName::new(cn))
    };

    let subject = &mut config.subject;
    if let Some(cn) = args.cn {
        subject.common_name = cn;
    }
    if let Some(o) = args.org {
        subject.organization = Some(o);
    }
    if let Some(u) = args.ou {
        subject.organizational_unit = Some(u);
    }
    if let Some(c) = args.country {
        subject.country = Some(c);
    }
    if let Some(s) = args.state {
        subject.state = Some(s);
    }
    if let Some(l) = args.locality {
        subject.locality = Some(l);
    }
    if let Some(algorithm) = args.algorithm {
        config.key_algorithm = algorithm.parse::<KeyAlgorithm>()?;
    }
    if let Some(days) = args.validity {
        config.validity_days = Some(days);
    }

    Ok(config)
}

#[cfg(feature = "cli")]
fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

#[cfg(feature = "cli")]
fn print_authority(store: &AuthorityStore) -> Result<()> {
    let config = store.config();
    println!("  {}: {}", "Store".cyan(), store.path().display());
    println!("  {}: {}", "Subject".cyan(), config.subject);
    println!("  {}: {}", "Algorithm".cyan(), config.key_algorithm.name());
    println!("  {}: {} days", "Validity".cyan(), config.validity_days()?);
    println!("  {}: {}", "Next Serial".cyan(), store.serials().peek_serial()?);
    Ok(())
}

#[cfg(feature = "cli")]
fn print_instance(instance: &IssuanceInstance) {
    println!("  {}: {}", "Serial".cyan(), instance.serial);
    println!("  {}: {}", "Directory".cyan(), instance.dir.display());
    println!("  {}: {}", "Certificate".cyan(), instance.file("crt").display());
    if instance.generated_key {
        println!("  {}: {}", "Private Key".cyan(), instance.file("key").display());
        println!("  {}: {}", "PKCS#12".cyan(), instance.file("p12").display());
        println!("  {}: {}", "Export Passphrase".cyan(), instance.file("pass").display());
    }
    if instance.keystore {
        println!("  {}: {}", "Keystore".cyan(), instance.file("jks").display());
    }
    if instance.chained {
        println!("  {}: {}", "Full Chain".cyan(), instance.file("chained.crt").display());
    }
}

#[cfg(feature = "cli")]
fn print_ledger(store: &AuthorityStore, status: Option<&str>) -> Result<()> {
    let ledger = store.ledger()?;

    if let Some(status) = status {
        let status = status.parse::<CertStatus>()?;
        for name in ledger.list_by_status(status) {
            println!("{}", name);
        }
        return Ok(());
    }

    println!("{}", format!("Ledger of {}", store.common_name()).bold().cyan());
    println!("{}", "=".repeat(80));
    for record in ledger.records() {
        let status = match record.status {
            CertStatus::Valid => record.status.to_string().green(),
            CertStatus::Expired => record.status.to_string().yellow(),
            CertStatus::Revoked => record.status.to_string().red(),
        };
        println!(
            "{:>6}  {:<8}  {}  {}",
            record.serial.to_string(),
            status,
            record.not_after.format("%Y-%m-%d"),
            record.subject
        );
    }
    Ok(())
}
