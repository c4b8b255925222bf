use std::io;
use std::path::PathBuf;
use std::process;
use std::str::FromStr;
#[macro_use]
extern crate log;

use anyhow::{bail, Context};
use clap::{Arg, ArgMatches, Command};
use mock_bank::{
    AccountType, Bank, BankConfig, FileStorage, ProfileUpdate, Registration, ResetPolicy,
    Transaction, TransferRequest, User,
};
use rust_decimal::Decimal;
use serde::Serialize;

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn cli() -> Command<'static> {
    let account = || {
        Arg::new("account")
            .long("account")
            .takes_value(true)
            .default_value("LIQUIDITE")
            .help("LIQUIDITE, ASSURANCE, ECONOMIE or EPARGNE")
    };
    let amount = || {
        Arg::new("amount")
            .long("amount")
            .takes_value(true)
            .required(true)
    };
    let profile = |cmd: Command<'static>, required: bool| {
        let field = |name: &'static str| Arg::new(name).long(name).takes_value(true);
        cmd.arg(field("first-name").required(required))
            .arg(field("last-name").required(required))
            .arg(field("email").required(required))
            .arg(field("phone"))
            .arg(field("address"))
            .arg(field("city"))
            .arg(field("postal-code"))
            .arg(field("country"))
    };

    Command::new("mock-bank")
        .about("Demo banking client backed by a local snapshot store")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .takes_value(true)
                .default_value(".mock-bank")
                .global(true),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .takes_value(true)
                .help("Defaults to <data-dir>/mock-bank.toml")
                .global(true),
        )
        .arg(
            Arg::new("dev")
                .long("dev")
                .help("Reseed the demo users on every access")
                .global(true),
        )
        .subcommand(
            Command::new("login")
                .arg(Arg::new("client-number").required(true))
                .arg(Arg::new("code").required(true)),
        )
        .subcommand(Command::new("logout"))
        .subcommand(Command::new("whoami"))
        .subcommand(profile(
            Command::new("register")
                .arg(Arg::new("code").long("code").takes_value(true).required(true))
                .arg(
                    Arg::new("client-number")
                        .long("client-number")
                        .takes_value(true)
                        .help("Generated when omitted"),
                )
                .arg(Arg::new("no-login").long("no-login")),
            true,
        ))
        .subcommand(profile(Command::new("update"), false))
        .subcommand(
            Command::new("change-code")
                .arg(Arg::new("current").required(true))
                .arg(Arg::new("new").required(true)),
        )
        .subcommand(
            Command::new("history")
                .arg(Arg::new("account").long("account").takes_value(true))
                .arg(Arg::new("search").long("search").takes_value(true))
                .arg(Arg::new("csv").long("csv")),
        )
        .subcommand(Command::new("stats"))
        .subcommand(
            Command::new("transfer")
                .arg(account())
                .arg(Arg::new("to").long("to").takes_value(true).required(true))
                .arg(Arg::new("iban").long("iban").takes_value(true).required(true))
                .arg(amount())
                .arg(Arg::new("memo").long("memo").takes_value(true)),
        )
        .subcommand(Command::new("withdraw").arg(account()).arg(amount()))
        .subcommand(
            Command::new("deposit")
                .arg(account())
                .arg(amount())
                .arg(
                    Arg::new("agent")
                        .long("agent")
                        .takes_value(true)
                        .default_value("Agent"),
                ),
        )
        .subcommand(
            Command::new("move")
                .arg(Arg::new("from").long("from").takes_value(true).required(true))
                .arg(Arg::new("to").long("to").takes_value(true).required(true))
                .arg(amount()),
        )
        .subcommand(Command::new("reset").about("Reload the users snapshot"))
}

fn run() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    let data_dir = PathBuf::from(matches.value_of("data-dir").unwrap_or(".mock-bank"));
    let config_path = matches
        .value_of("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| data_dir.join(BankConfig::filename()));
    let mut config = BankConfig::load(&config_path)?;
    if matches.is_present("dev") {
        config = config.with_reset_policy(ResetPolicy::OnEveryAccess);
    }

    let mut bank = Bank::open(FileStorage::new(data_dir), config);
    let _subscription = bank.subscribe(|session| match session {
        Some(user) => debug!("Session now {} {}", user.first_name, user.last_name),
        None => debug!("Session cleared"),
    });

    match matches.subcommand() {
        Some(("login", args)) => {
            let user = bank.login(required(args, "client-number")?, required(args, "code")?)?;
            print_json(&user)
        }
        Some(("logout", _)) => bank.logout().map_err(Into::into),
        Some(("whoami", _)) => match bank.current_user()? {
            Some(user) => print_json(&user),
            None => bail!("Not logged in"),
        },
        Some(("register", args)) => register(&mut bank, args),
        Some(("update", args)) => {
            let update = profile_update(args);
            if update.is_empty() {
                bail!("Nothing to update");
            }
            print_json(&bank.update_user(update)?)
        }
        Some(("change-code", args)) => {
            bank.change_code(required(args, "current")?, required(args, "new")?)?;
            println!("Code changed");
            Ok(())
        }
        Some(("history", args)) => history(&mut bank, args),
        Some(("stats", _)) => {
            let user = logged_in(&bank)?;
            print_json(&bank.get_transaction_stats(&user.id)?)
        }
        Some(("transfer", args)) => {
            let transaction = bank.transfer(TransferRequest {
                account: account_arg(args, "account")?,
                beneficiary: required(args, "to")?.to_string(),
                iban: required(args, "iban")?.to_string(),
                amount: amount_arg(args)?,
                memo: args.value_of("memo").map(str::to_string),
            })?;
            print_json(&transaction)
        }
        Some(("withdraw", args)) => {
            let withdrawal = bank.withdraw(account_arg(args, "account")?, amount_arg(args)?)?;
            print_json(&withdrawal)
        }
        Some(("deposit", args)) => {
            let transaction = bank.deposit(
                account_arg(args, "account")?,
                amount_arg(args)?,
                required(args, "agent")?,
            )?;
            print_json(&transaction)
        }
        Some(("move", args)) => {
            let transaction = bank.transfer_between_accounts(
                account_arg(args, "from")?,
                account_arg(args, "to")?,
                amount_arg(args)?,
            )?;
            print_json(&transaction)
        }
        Some(("reset", _)) => bank.force_reload().map_err(Into::into),
        _ => bail!("Unknown command"),
    }
}

fn register(bank: &mut Bank<FileStorage>, args: &ArgMatches) -> anyhow::Result<()> {
    let client_number = match args.value_of("client-number") {
        Some(number) => number.to_string(),
        None => bank.generate_client_number()?.to_string(),
    };
    let update = profile_update(args);
    let registration = Registration {
        client_number,
        code: required(args, "code")?.to_string(),
        first_name: update.first_name.unwrap_or_default(),
        last_name: update.last_name.unwrap_or_default(),
        email: update.email.unwrap_or_default(),
        phone: update.phone,
        address: update.address,
        city: update.city,
        postal_code: update.postal_code,
        country: update.country,
    };

    let user = if args.is_present("no-login") {
        bank.register_without_login(registration)?
    } else {
        bank.register(registration)?
    };
    println!("Client number: {}", user.client_number);
    print_json(&user)
}

fn history(bank: &mut Bank<FileStorage>, args: &ArgMatches) -> anyhow::Result<()> {
    let user = logged_in(bank)?;
    let transactions = match (args.value_of("account"), args.value_of("search")) {
        (Some(_), Some(_)) => bail!("Use either --account or --search"),
        (Some(_), None) => {
            bank.get_transactions_by_account(&user.id, account_arg(args, "account")?)?
        }
        (None, Some(term)) => bank.search_transactions(&user.id, term)?,
        (None, None) => bank.get_user_transactions(&user.id)?,
    };

    if args.is_present("csv") {
        let mut wtr = csv::Writer::from_writer(io::stdout());
        for transaction in &transactions {
            wtr.serialize(HistoryRow::from(transaction))?;
        }
        wtr.flush()?;
        return Ok(());
    }
    print_json(&transactions)
}

/// One CSV line per transaction, every column always present
#[derive(Serialize)]
struct HistoryRow<'a> {
    reference: &'a str,
    date: String,
    time: String,
    kind: &'static str,
    account: AccountType,
    counterparty: &'a str,
    counterparty_number: &'a str,
    amount: Decimal,
    fee: Decimal,
    currency: &'a str,
    status: String,
    failure_reason: &'a str,
    memo: &'a str,
}

impl<'a> From<&'a Transaction> for HistoryRow<'a> {
    fn from(tx: &'a Transaction) -> Self {
        Self {
            reference: &tx.reference,
            date: tx.date.format("%Y-%m-%d").to_string(),
            time: tx.time.format("%H:%M:%S").to_string(),
            kind: tx.transaction_type.label(),
            account: tx.account_type,
            counterparty: &tx.counterparty,
            counterparty_number: &tx.counterparty_number,
            amount: tx.amount,
            fee: tx.fee,
            currency: &tx.currency,
            status: tx.status.to_string(),
            failure_reason: tx.failure_reason.as_deref().unwrap_or_default(),
            memo: tx.memo.as_deref().unwrap_or_default(),
        }
    }
}

fn logged_in(bank: &Bank<FileStorage>) -> anyhow::Result<User> {
    bank.current_user()?.context("Not logged in")
}

fn profile_update(args: &ArgMatches) -> ProfileUpdate {
    let value = |name: &str| args.value_of(name).map(str::to_string);
    ProfileUpdate {
        first_name: value("first-name"),
        last_name: value("last-name"),
        email: value("email"),
        phone: value("phone"),
        address: value("address"),
        city: value("city"),
        postal_code: value("postal-code"),
        country: value("country"),
    }
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> anyhow::Result<&'a str> {
    args.value_of(name)
        .with_context(|| format!("Missing --{name}"))
}

fn account_arg(args: &ArgMatches, name: &str) -> anyhow::Result<AccountType> {
    AccountType::from_str(required(args, name)?)
}

fn amount_arg(args: &ArgMatches) -> anyhow::Result<Decimal> {
    let raw = required(args, "amount")?;
    Decimal::from_str(raw).with_context(|| format!("Invalid amount {raw}"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
