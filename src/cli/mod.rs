use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, Write};

use crate::application::{LedgerService, NewSubscription, DEFAULT_STATEMENT_LIMIT};
use crate::domain::{
    format_cents, parse_cents, parse_reference, Availability, Settlement, WithdrawalId,
    REFERENCE_PREFIX,
};
use crate::io::Exporter;
use crate::settings::Settings;

/// Azell - Withdrawal ledger for invested balances
#[derive(Parser)]
#[command(name = "azell")]
#[command(about = "Request, cancel and settle withdrawals against invested balances")]
#[command(version)]
pub struct Cli {
    /// Database file path (overrides the configuration file)
    #[arg(short, long)]
    pub database: Option<String>,

    /// Configuration file (defaults to ./azell.toml when present)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Register a user's subscription to a product
    Subscribe {
        /// Invested amount (e.g., "1000.00" or "1000")
        amount: String,

        /// User ID
        #[arg(long)]
        user: i64,

        /// Product ID
        #[arg(long)]
        product: i64,

        /// Term in months
        #[arg(long, default_value = "12")]
        term_months: u32,

        /// Annual rate in percent
        #[arg(long, default_value = "0")]
        rate: f64,

        /// Currency code
        #[arg(long, default_value = "USD")]
        currency: String,

        /// Start date (YYYY-MM-DD, defaults to now)
        #[arg(long)]
        start_date: Option<String>,
    },

    /// Show the amount available for withdrawal in a product
    Availability {
        /// User ID
        #[arg(long)]
        user: i64,

        /// Product ID
        #[arg(long)]
        product: i64,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Withdrawal commands
    #[command(subcommand)]
    Withdraw(WithdrawCommands),

    /// Show balance, applied yield and latest ledger entries
    Statement {
        /// User ID
        #[arg(long)]
        user: i64,

        /// Maximum number of entries to show
        #[arg(short, long, default_value_t = DEFAULT_STATEMENT_LIMIT)]
        limit: usize,

        /// Output format: table, json
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// Export a user's data to CSV or JSON
    Export {
        /// What to export: entries, withdrawals, full
        export_type: String,

        /// User ID
        #[arg(long)]
        user: i64,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,

        /// Format: csv, json (default: csv, json for full)
        #[arg(short, long)]
        format: Option<String>,
    },

    /// Verify ledger integrity
    Check,
}

#[derive(Subcommand)]
pub enum WithdrawCommands {
    /// Request a withdrawal
    Request {
        /// Amount to withdraw (e.g., "400.00" or "400")
        amount: String,

        /// User ID
        #[arg(long)]
        user: i64,

        /// Product ID
        #[arg(long)]
        product: i64,
    },

    /// Cancel an in-progress withdrawal
    Cancel {
        /// Withdrawal ID or reference (e.g., 5 or WDR-000005)
        withdrawal: String,

        /// User ID
        #[arg(long)]
        user: i64,
    },

    /// Settle an in-progress withdrawal (back office)
    Settle {
        /// Withdrawal ID or reference
        withdrawal: String,

        /// Outcome: applied, rejected
        #[arg(long)]
        outcome: String,

        /// Settlement notes
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Show a withdrawal request
    Show {
        /// Withdrawal ID or reference
        withdrawal: String,

        /// User ID
        #[arg(long)]
        user: i64,
    },

    /// List withdrawal requests of a user
    List {
        /// User ID
        #[arg(long)]
        user: i64,
    },
}

impl Cli {
    pub async fn run(self, settings: Settings) -> Result<()> {
        let database = self
            .database
            .clone()
            .unwrap_or_else(|| settings.database.path.clone());

        match self.command {
            Commands::Init => {
                LedgerService::init_with_options(&database, &settings.store_options()).await?;
                println!("Database initialized: {}", database);
            }

            Commands::Subscribe {
                amount,
                user,
                product,
                term_months,
                rate,
                currency,
                start_date,
            } => {
                let service = open_service(&database, &settings).await?;
                let invested_cents =
                    parse_cents(&amount).context("Invalid amount format. Use '1000.00' or '1000'")?;
                let start_date = match start_date {
                    Some(date_str) => parse_date(&date_str).with_context(|| {
                        format!("Invalid date format '{}'. Use YYYY-MM-DD", date_str)
                    })?,
                    None => Utc::now(),
                };

                let subscription = service
                    .register_subscription(NewSubscription {
                        user_id: user,
                        product_id: product,
                        invested_cents,
                        start_date,
                        term_months,
                        annual_rate: rate,
                        currency,
                    })
                    .await?;

                println!(
                    "Subscribed user {} to product {}: {} {}",
                    subscription.user_id,
                    subscription.product_id,
                    format_cents(subscription.invested_cents),
                    subscription.currency
                );
            }

            Commands::Availability {
                user,
                product,
                format,
            } => {
                let service = open_service(&database, &settings).await?;
                let availability = service.compute_availability(user, product).await?;
                match format.as_str() {
                    "json" => println!("{}", serde_json::to_string_pretty(&availability)?),
                    _ => print_availability(&availability),
                }
            }

            Commands::Withdraw(cmd) => {
                let service = open_service(&database, &settings).await?;
                run_withdraw_command(&service, cmd).await?;
            }

            Commands::Statement {
                user,
                limit,
                format,
            } => {
                let service = open_service(&database, &settings).await?;
                let statement = service.statement(user, limit).await?;
                if format == "json" {
                    println!("{}", serde_json::to_string_pretty(&statement)?);
                    return Ok(());
                }

                println!("Statement for user {}", statement.user_id);
                println!("  Balance:      {:>15}", format_cents(statement.balance));
                println!("  Total yield:  {:>15}", format_cents(statement.total_yield));
                println!();
                if statement.entries.is_empty() {
                    println!("No entries found.");
                } else {
                    println!(
                        "{:<12} {:<8} {:<11} {:<12} {:<12} {:>12}",
                        "DATE", "PRODUCT", "TYPE", "REFERENCE", "STATUS", "AMOUNT"
                    );
                    println!("{}", "-".repeat(72));
                    for entry in &statement.entries {
                        println!(
                            "{:<12} {:<8} {:<11} {:<12} {:<12} {:>12}",
                            entry.occurred_at.format("%Y-%m-%d"),
                            entry.product_id,
                            entry.entry_type,
                            entry.reference,
                            entry.status,
                            format_cents(entry.amount_cents)
                        );
                    }
                }
            }

            Commands::Export {
                export_type,
                user,
                output,
                format,
            } => {
                let service = open_service(&database, &settings).await?;
                run_export_command(&service, &export_type, user, output.as_deref(), format.as_deref())
                    .await?;
            }

            Commands::Check => {
                let service = open_service(&database, &settings).await?;
                let report = service.check_integrity().await?;
                println!("Subscriptions: {}", report.subscription_count);
                println!("Withdrawals:   {}", report.withdrawal_count);
                println!("Entries:       {}", report.entry_count);
                if report.is_healthy() {
                    println!("\nLedger is consistent.");
                } else {
                    println!("\nFound {} issue(s):", report.issues.len());
                    for issue in &report.issues {
                        println!("  {}", serde_json::to_string(issue)?);
                    }
                    bail!("ledger integrity check failed");
                }
            }
        }

        Ok(())
    }
}

async fn open_service(database: &str, settings: &Settings) -> Result<LedgerService> {
    let service = LedgerService::connect_with_options(database, &settings.store_options())
        .await
        .with_context(|| format!("Could not open database '{}'. Run 'azell init' first", database))?;
    Ok(service.with_options(settings.service_options()))
}

async fn run_withdraw_command(service: &LedgerService, cmd: WithdrawCommands) -> Result<()> {
    match cmd {
        WithdrawCommands::Request {
            amount,
            user,
            product,
        } => {
            let amount_cents =
                parse_cents(&amount).context("Invalid amount format. Use '400.00' or '400'")?;
            let receipt = service.request_withdrawal(user, product, amount_cents).await?;

            println!(
                "Withdrawal {} created: {} ({})",
                receipt.reference,
                format_cents(amount_cents),
                receipt.status
            );
            println!("  Invested:          {:>15}", format_cents(receipt.invested));
            println!(
                "  Pending:           {:>15}",
                format_cents(receipt.pending_withdrawals)
            );
            println!(
                "  Applied:           {:>15}",
                format_cents(receipt.applied_withdrawals)
            );
            println!(
                "  Available before:  {:>15}",
                format_cents(receipt.available_before)
            );
            println!(
                "  Available after:   {:>15}",
                format_cents(receipt.available_after)
            );
        }

        WithdrawCommands::Cancel { withdrawal, user } => {
            let withdrawal_id = parse_withdrawal_id(&withdrawal)?;
            let receipt = service.cancel_withdrawal(user, withdrawal_id).await?;
            println!("Cancelled withdrawal {} ({})", receipt.reference, receipt.status);
        }

        WithdrawCommands::Settle {
            withdrawal,
            outcome,
            notes,
        } => {
            let withdrawal_id = parse_withdrawal_id(&withdrawal)?;
            let outcome = Settlement::from_str(&outcome)
                .with_context(|| format!("Invalid outcome '{}'. Use applied or rejected", outcome))?;
            let request = service
                .settle_withdrawal(withdrawal_id, outcome, notes)
                .await?;
            println!("Settled withdrawal {} ({})", request.reference(), request.status);
        }

        WithdrawCommands::Show { withdrawal, user } => {
            let withdrawal_id = parse_withdrawal_id(&withdrawal)?;
            let request = service.get_withdrawal(user, withdrawal_id).await?;

            println!("Withdrawal: {}", request.reference());
            println!("  ID:            {}", request.id);
            println!("  User:          {}", request.user_id);
            println!("  Product:       {}", request.product_id);
            println!("  Amount:        {}", format_cents(request.amount_cents));
            println!("  Status:        {}", request.status);
            println!(
                "  Requested:     {}",
                request.requested_at.format("%Y-%m-%d %H:%M:%S")
            );
            if let Some(processed) = request.processed_at {
                println!("  Processed:     {}", processed.format("%Y-%m-%d %H:%M:%S"));
            }
            if let Some(notes) = &request.notes {
                println!("  Notes:         {}", notes);
            }
        }

        WithdrawCommands::List { user } => {
            let requests = service.list_withdrawals(user).await?;
            if requests.is_empty() {
                println!("No withdrawals found.");
                return Ok(());
            }

            println!(
                "{:<12} {:<8} {:>12} {:<12} {:<12}",
                "REFERENCE", "PRODUCT", "AMOUNT", "STATUS", "REQUESTED"
            );
            println!("{}", "-".repeat(60));
            for request in &requests {
                println!(
                    "{:<12} {:<8} {:>12} {:<12} {:<12}",
                    request.reference(),
                    request.product_id,
                    format_cents(request.amount_cents),
                    request.status,
                    request.requested_at.format("%Y-%m-%d")
                );
            }
        }
    }

    Ok(())
}

async fn run_export_command(
    service: &LedgerService,
    export_type: &str,
    user: i64,
    output: Option<&str>,
    format: Option<&str>,
) -> Result<()> {
    let writer: Box<dyn Write> = match output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to create '{}'", path))?,
        ),
        None => Box::new(io::stdout()),
    };

    let exporter = Exporter::new(service);
    match (export_type, format.unwrap_or("csv")) {
        ("entries", "csv") => {
            let count = exporter.export_entries_csv(user, writer).await?;
            eprintln!("Exported {} entries", count);
        }
        ("withdrawals", "csv") => {
            let count = exporter.export_withdrawals_csv(user, writer).await?;
            eprintln!("Exported {} withdrawals", count);
        }
        ("full", _) | (_, "json") => {
            let snapshot = exporter.export_json(user, writer).await?;
            eprintln!(
                "Exported {} entries and {} withdrawals",
                snapshot.entries.len(),
                snapshot.withdrawals.len()
            );
        }
        (other, fmt) => bail!(
            "Unknown export '{}' with format '{}'. Use entries, withdrawals or full",
            other,
            fmt
        ),
    }

    Ok(())
}

fn print_availability(availability: &Availability) {
    println!("Invested:   {:>15}", format_cents(availability.invested));
    println!(
        "Pending:    {:>15}",
        format_cents(availability.pending_withdrawals)
    );
    println!(
        "Applied:    {:>15}",
        format_cents(availability.applied_withdrawals)
    );
    println!("{}", "-".repeat(27));
    println!("Available:  {:>15}", format_cents(availability.available));
}

/// Accept either a numeric id or a `WDR-` reference.
fn parse_withdrawal_id(input: &str) -> Result<WithdrawalId> {
    let input = input.trim();
    if input.starts_with(REFERENCE_PREFIX) {
        return parse_reference(input).with_context(|| format!("Invalid reference '{}'", input));
    }
    input
        .parse()
        .with_context(|| format!("Invalid withdrawal ID '{}'", input))
}

fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")?;
    Ok(date
        .and_hms_opt(0, 0, 0)
        .context("Invalid time")?
        .and_utc())
}
