use std::io::{BufRead, Write};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use log::{info, warn};
use rust_decimal::Decimal;

use crate::console::{Console, ConsolePresenter};
use crate::datetime::{self, format_datetime};
use crate::duration::{format_minutes, parse_minutes};
use crate::ledger::{project_file_name, Ledger, LedgerRepository, DEFAULT_PROJECT_FILE};
use crate::money::round2;
use crate::time_entry::{LedgerRecord, PaymentHistory, PaymentStatus, TimeEntry};

/// 時間単価が決まっていない場合に利用する時間単価。
pub const DEFAULT_HOURLY_RATE: Decimal = Decimal::from_parts(11363, 0, 0, false, 2);

/// この時間を超える作業時間は確認を求める。
const ALERT_THRESHOLD_MINUTES: u32 = 5 * 60;

/// 作業時間を1件記録するためのサブコマンド。
#[derive(Debug, clap::Args)]
pub struct LogArgs {
    #[clap(
        short = 'p',
        long = "project",
        help = "Project name to log into (defaults to apontamentos.csv)"
    )]
    project: Option<String>,

    #[clap(
        short = 'r',
        long = "rate",
        env = "HORAS_HOURLY_RATE",
        help = "Hourly rate used when the project has none recorded",
        parse(try_from_str = parse_rate),
    )]
    rate: Option<Decimal>,
}

/// `log`サブコマンドの結果。
#[derive(Debug, PartialEq)]
pub enum LogOutcome {
    Saved(TimeEntry),
    Cancelled,
}

pub struct LogCommand<'a, L: LedgerRepository> {
    repository: &'a L,
}

impl<'a, L: LedgerRepository> LogCommand<'a, L> {
    /// 新しい`LogCommand`を返す。
    ///
    /// # Arguments
    /// * `repository` - 台帳を読み書きするためのリポジトリ
    pub fn new(repository: &'a L) -> Self {
        Self { repository }
    }

    /// `log`サブコマンドの処理を行う。
    ///
    /// 作業内容と作業時間を入力してもらい、現在時刻を終了時刻としてエントリーを作成する。
    /// 確認後に台帳へ追記し、未払いの合計を表示する。
    ///
    /// # Arguments
    ///
    /// * `args` - `log`サブコマンドの引数
    /// * `console` - 入出力に利用するコンソール
    pub fn run<R: BufRead, W: Write>(
        &self,
        args: LogArgs,
        console: &mut Console<R, W>,
    ) -> Result<LogOutcome> {
        let file_name = match args.project.as_deref() {
            Some(name) => project_file_name(name)
                .ok_or_else(|| anyhow!("Invalid project name: {:?}", name))?,
            None => DEFAULT_PROJECT_FILE.to_string(),
        };
        info!("Logging into {}", file_name);

        console.say("\n=== New time entry ===")?;
        let activity = console.ask("Activity: ")?;
        if activity.is_empty() {
            console.say("Description is required. Operation cancelled.")?;
            return Ok(LogOutcome::Cancelled);
        }
        let minutes = ask_duration(console)?;

        let ledger = self.repository.load(&file_name).unwrap_or_else(|err| {
            warn!("Failed to read {}, numbering from 1: {:#}", file_name, err);
            Ledger::default()
        });
        let rate = ledger
            .hourly_rate()
            .or(args.rate)
            .unwrap_or(DEFAULT_HOURLY_RATE);

        let total_value = Decimal::from(minutes)
            .checked_mul(rate)
            .map(|value| round2(value / Decimal::from(60)))
            .ok_or_else(|| {
                anyhow!(
                    "Entry value is too large: {} at {} per hour",
                    format_minutes(minutes),
                    rate
                )
            })?;

        let end = datetime::now();
        let start = end - Duration::minutes(i64::from(minutes));
        let entry = TimeEntry {
            id: ledger.next_id(),
            duration_label: format_minutes(minutes),
            activity,
            start_time: format_datetime(&start),
            end_time: format_datetime(&end),
            hourly_rate: Some(rate),
            total_value,
            status: PaymentStatus::Unpaid,
            amount_paid: None,
            amount_pending: None,
            history: PaymentHistory::default(),
        };

        console.show_entry("Entry preview", &entry, false)?;
        if !console.confirm("Save entry?")? {
            console.say("Operation cancelled. Nothing was saved.")?;
            return Ok(LogOutcome::Cancelled);
        }

        self.repository
            .append(&file_name, &LedgerRecord::from_domain(&entry))
            .with_context(|| format!("Failed to save entry to {}", file_name))?;
        console.say(&format!("\nEntry saved to {}", file_name))?;

        let totals = self
            .repository
            .load(&file_name)
            .with_context(|| format!("Failed to read {}", file_name))?
            .unpaid_totals();
        console.show_unpaid_totals(&totals)?;

        Ok(LogOutcome::Saved(entry))
    }
}

/// 作業時間を有効な値が入力されるまで繰り返し入力してもらう。
///
/// 5時間を超える場合は確認を求め、承認されなければ再入力してもらう。
fn ask_duration<R: BufRead, W: Write>(console: &mut Console<R, W>) -> Result<u32> {
    loop {
        let minutes = console.ask_valid("Duration (e.g. 30m, 1h30m, 2h): ", |input| {
            parse_minutes(input)
                .ok_or_else(|| "Invalid duration. Use forms like '1h30m', '45m' or '2h'.".to_string())
        })?;
        if minutes <= ALERT_THRESHOLD_MINUTES {
            return Ok(minutes);
        }

        let hours = round2(Decimal::from(minutes) / Decimal::from(60));
        console.say(&format!("\nWarning: the duration is {:.2}h (> 5h).", hours))?;
        if console.confirm("Confirm anyway?")? {
            return Ok(minutes);
        }
        console.say("Duration discarded. Enter it again.")?;
    }
}

/// 時間単価をパースする。
fn parse_rate(s: &str) -> Result<Decimal> {
    let rate = Decimal::from_str(&s.trim().replace(',', "."))
        .with_context(|| format!("Failed to parse hourly rate: {}", s))?;
    if rate <= Decimal::ZERO {
        return Err(anyhow!("Hourly rate must be greater than zero: {}", s));
    }

    Ok(round2(rate))
}
