//! Provisions and tears down the AWS resources of course exercises.
//!
//! Credentials and region come from the usual AWS sources, optionally
//! narrowed with `--profile` and `--region`. Run with `RUST_LOG=info` to see
//! each call as it is made.
//!
//! ```sh
//! course c2w1 create --email me@example.com
//! course c2w1 list --kind queue
//! course c4w1 create
//! course c4w1 run --text "Hello, World!"
//! course manifest exercise.toml delete
//! ```
use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use colored::Colorize;
use data_encoding::BASE64;
use lab::{aws::manifest::Manifest, aws::Session, Action, Listing, Project, Report};

mod c2w1;
mod c4w1;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "course", about = "Provision the AWS resources of course exercises")]
struct Cli {
    /// AWS region, defaults to the profile's region.
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// Named AWS profile.
    #[arg(long, env = "AWS_PROFILE")]
    profile: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serverless order pipeline (API Gateway, SQS, Lambda, DynamoDB, SNS).
    C2w1 {
        /// create, delete or list
        action: Action,
        /// Act on a single kind of resource, eg "queue".
        #[arg(long)]
        kind: Option<String>,
        /// Address subscribed to the order topic.
        #[arg(long, env = "LAB_NOTIFICATION_EMAIL")]
        email: Option<String>,
    },
    /// KMS encryption through an assumed role.
    C4w1 {
        #[arg(value_enum)]
        step: c4w1::Step,
        /// Name (alias) of the key.
        #[arg(long, default_value = c4w1::KEY)]
        key: String,
        /// Message to encrypt when running.
        #[arg(long, default_value = "Hello, World!")]
        text: String,
    },
    /// Create a throwaway key, encrypt and decrypt with it, then delete it.
    KmsCheck,
    /// Act on the resources declared in a TOML or JSON manifest.
    Manifest {
        path: PathBuf,
        /// create, delete or list
        action: Action,
        #[arg(long)]
        kind: Option<String>,
    },
    /// Show the account and region in use.
    Whoami,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Prints the reports, returning whether every entry succeeded.
fn print_reports(reports: &[Report]) -> bool {
    for report in reports {
        println!("{report}");
    }
    let failed: usize = reports
        .iter()
        .map(|report| report.count(lab::Status::Failed))
        .sum();
    if failed > 0 {
        println!("{}", format!("{failed} resource(s) failed").red());
    }
    failed == 0
}

fn print_listings(listings: &[Listing]) {
    for listing in listings {
        println!("{listing}");
    }
}

fn print_round_trip(trip: &c4w1::RoundTrip, text: &str) -> bool {
    println!("key:        {}", trip.key.bold());
    println!("ciphertext: {}", BASE64.encode(&trip.ciphertext));
    println!("plaintext:  {}", String::from_utf8_lossy(&trip.plaintext));
    if trip.matches(text) {
        println!("{}", "round trip succeeded".green());
        true
    } else {
        println!("{}", "decrypted text does not match".red());
        false
    }
}

async fn act(
    project: &mut Project<Session>,
    action: Action,
    kind: Option<&str>,
) -> lab::Result<bool> {
    println!("{} {}", action.to_string().bold(), project.name());
    match action {
        Action::List => {
            print_listings(&project.list(kind).await?);
            Ok(true)
        }
        Action::Create => Ok(print_reports(&project.create(kind).await?)),
        Action::Delete => Ok(print_reports(&project.delete(kind).await?)),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();
    let session = Session::load(cli.region, cli.profile).await;

    let success = match cli.command {
        Command::C2w1 {
            action,
            kind,
            email,
        } => {
            let mut project = c2w1::project(session, email.as_deref());
            act(&mut project, action, kind.as_deref()).await?
        }
        Command::C4w1 { step, key, text } => match step {
            c4w1::Step::Create => {
                act(&mut c4w1::project(session, &key), Action::Create, None).await?
            }
            c4w1::Step::Delete => {
                act(&mut c4w1::project(session, &key), Action::Delete, None).await?
            }
            c4w1::Step::List => act(&mut c4w1::project(session, &key), Action::List, None).await?,
            c4w1::Step::Run => {
                let mut project = c4w1::project(session.clone(), &key);
                act(&mut project, Action::Create, None).await?
                    && print_round_trip(&c4w1::run(&session, &key, &text).await?, &text)
            }
        },
        Command::KmsCheck => {
            let text = "Hello, World!";
            let mut project = c4w1::check_project(session);
            let created = act(&mut project, Action::Create, None).await?;
            let round_trip = if created {
                let trip = c4w1::round_trip(&mut project, c4w1::CHECK_KEY, text).await;
                match trip {
                    Ok(trip) => print_round_trip(&trip, text),
                    Err(e) => {
                        log::error!("{e}");
                        false
                    }
                }
            } else {
                false
            };
            // The key is scheduled for deletion even when the round trip failed.
            let deleted = act(&mut project, Action::Delete, None).await?;
            created && round_trip && deleted
        }
        Command::Manifest { path, action, kind } => {
            let manifest = Manifest::from_path(&path)?;
            let mut project = manifest.into_project(&session).await?;
            act(&mut project, action, kind.as_deref()).await?
        }
        Command::Whoami => {
            println!("account: {}", session.account_id().await?);
            println!("region:  {}", session.region()?);
            true
        }
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
