use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;

mod allocation;
mod console;
mod datetime;
mod duration;
mod ledger;
mod log_command;
mod money;
mod pay_command;
mod time_entry;

use console::Console;
use ledger::CsvLedger;
use log_command::{LogArgs, LogCommand};
use pay_command::{PayArgs, PayCommand};

/// 作業時間をプロジェクトごとのCSVに記録し、支払いを消し込むためのCLIアプリケーション。
///
/// # Examples
/// ```
/// $ cargo run -- log --project acme
/// $ cargo run -- pay
/// ```
#[derive(Debug, Parser)]
#[clap(version, about)]
struct Args {
    #[clap(
        short = 'v',
        long = "verbose",
        help = "Increases log verbosity (-v info, -vv debug)",
        parse(from_occurrences)
    )]
    verbose: u64,

    #[clap(
        short = 'd',
        long = "dir",
        env = "HORAS_DIR",
        default_value = ".",
        help = "Directory holding the project CSV files",
        parse(from_os_str)
    )]
    dir: PathBuf,

    #[clap(subcommand)]
    subcommand: SubCommands,
}

/// サブコマンドを表す列挙型。
#[derive(Debug, Subcommand)]
enum SubCommands {
    /// Logs a new time entry
    Log(LogArgs),
    /// Checks the balance and applies payments
    Pay(PayArgs),
}

fn main() -> Result<()> {
    let args = Args::parse();

    setup_logger(args.verbose)?;

    let repository = CsvLedger::new(&args.dir);
    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let mut writer = io::stdout();
    let mut console = Console::new(&mut reader, &mut writer);

    match args.subcommand {
        SubCommands::Log(log_args) => {
            LogCommand::new(&repository).run(log_args, &mut console)?;
        }
        SubCommands::Pay(pay_args) => PayCommand::new(&repository).run(pay_args, &mut console)?,
    }

    Ok(())
}

/// ログの出力先とレベルを設定する。
///
/// 対話的な出力と混ざらないよう、ログは標準エラー出力に書き出す。
fn setup_logger(verbose: u64) -> Result<()> {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%H:%M:%S"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(io::stderr())
        .apply()
        .context("Failed to initialize logger")?;

    Ok(())
}
