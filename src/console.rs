use std::io::{BufRead, Write};

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;

use crate::allocation::Allocation;
use crate::duration::format_minutes;
use crate::ledger::UnpaidTotals;
use crate::money::format_reais;
use crate::time_entry::TimeEntry;

const RULE_WIDTH: usize = 40;
const WIDE_RULE_WIDTH: usize = 60;

/// 対話的な入出力を行うコンソール。
///
/// 標準入出力の代わりに任意の`BufRead`と`Write`を渡せるため、テストでは`Cursor`と`Vec<u8>`を利用する。
pub struct Console<'a, R: BufRead, W: Write> {
    reader: &'a mut R,
    writer: &'a mut W,
}

impl<'a, R: BufRead, W: Write> Console<'a, R, W> {
    /// 新しい`Console`を返す。
    pub fn new(reader: &'a mut R, writer: &'a mut W) -> Self {
        Self { reader, writer }
    }

    /// 1行を出力する。
    pub fn say(&mut self, text: &str) -> Result<()> {
        writeln!(self.writer, "{}", text).context("Failed to write to console")
    }

    /// プロンプトを表示し、入力された1行を前後の空白を除いて返す。
    ///
    /// 入力が閉じられている場合はエラーを返す。
    pub fn ask(&mut self, prompt: &str) -> Result<String> {
        write!(self.writer, "{}", prompt).context("Failed to write prompt")?;
        self.writer.flush().context("Failed to flush prompt")?;

        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .context("Failed to read from console")?;
        if read == 0 {
            bail!("Input closed while waiting for: {}", prompt.trim());
        }

        Ok(line.trim().to_string())
    }

    /// 有効な値が入力されるまで繰り返し入力を求める。
    ///
    /// `parse`がエラーメッセージを返した場合は、それを表示して再度入力を求める。
    pub fn ask_valid<T, F>(&mut self, prompt: &str, mut parse: F) -> Result<T>
    where
        F: FnMut(&str) -> std::result::Result<T, String>,
    {
        loop {
            let input = self.ask(prompt)?;
            match parse(&input) {
                Ok(value) => return Ok(value),
                Err(message) => self.say(&message)?,
            }
        }
    }

    /// `(y/n)`で確認を求める。`y`または`yes`のみ承認とする。
    pub fn confirm(&mut self, prompt: &str) -> Result<bool> {
        let answer = self.ask(&format!("{} (y/n): ", prompt))?;
        Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
    }
}

/// 台帳の内容をコンソールに表示するためのtrait。
pub trait ConsolePresenter {
    /// エントリーの概要を表示する。
    ///
    /// # Arguments
    ///
    /// * `title` - 見出し
    /// * `entry` - 表示するエントリー
    /// * `show_status` - 支払い状況を表示するかどうか
    fn show_entry(&mut self, title: &str, entry: &TimeEntry, show_status: bool) -> Result<()>;

    /// 未払いの作業時間と金額を表示する。
    fn show_unpaid_totals(&mut self, totals: &UnpaidTotals) -> Result<()>;

    /// プロジェクトの未払い残高と次に支払うエントリーを表示する。
    fn show_balance(
        &mut self,
        project: &str,
        balance: Decimal,
        next: Option<&TimeEntry>,
    ) -> Result<()>;

    /// 支払いの配分結果のプレビューを表示する。
    fn show_allocation(&mut self, date: &str, description: &str, allocation: &Allocation)
        -> Result<()>;
}

impl<'a, R: BufRead, W: Write> ConsolePresenter for Console<'a, R, W> {
    fn show_entry(&mut self, title: &str, entry: &TimeEntry, show_status: bool) -> Result<()> {
        let rule = "-".repeat(RULE_WIDTH);
        writeln!(self.writer, "\n{}:", title)?;
        writeln!(self.writer, "{}", rule)?;
        writeln!(self.writer, "ID (n)      : {}", entry.id)?;
        writeln!(self.writer, "Activity    : {}", entry.activity)?;
        writeln!(self.writer, "Duration    : {}", entry.duration_label)?;
        writeln!(self.writer, "Start       : {}", entry.start_time)?;
        writeln!(self.writer, "End         : {}", entry.end_time)?;
        writeln!(self.writer, "Value       : {}", format_reais(entry.total_value))?;
        if show_status {
            writeln!(self.writer, "Paid        : {}", entry.status.label())?;
        }
        writeln!(self.writer, "{}", rule)
            .with_context(|| format!("Failed to write entry: {:?}", entry))?;

        Ok(())
    }

    fn show_unpaid_totals(&mut self, totals: &UnpaidTotals) -> Result<()> {
        let rule = "-".repeat(RULE_WIDTH);
        writeln!(self.writer, "\nPending:")?;
        writeln!(self.writer, "{}", rule)?;
        writeln!(self.writer, "Unpaid hours : {}", format_minutes(totals.minutes))?;
        writeln!(self.writer, "Unpaid value : {}", format_reais(totals.value))?;
        writeln!(self.writer, "{}", rule).context("Failed to write unpaid totals")?;

        Ok(())
    }

    fn show_balance(
        &mut self,
        project: &str,
        balance: Decimal,
        next: Option<&TimeEntry>,
    ) -> Result<()> {
        let rule = "-".repeat(WIDE_RULE_WIDTH);
        writeln!(self.writer, "\nPending:")?;
        writeln!(self.writer, "{}", rule)?;
        writeln!(self.writer, "Project        : {}", project)?;
        writeln!(self.writer, "Balance due    : {}", format_reais(balance))?;
        if let Some(entry) = next {
            writeln!(self.writer, "{}", rule)?;
            writeln!(self.writer, "Next to settle:")?;
            writeln!(self.writer, "ID (n)     : {}", entry.id)?;
            writeln!(self.writer, "Status     : {}", entry.status.label())?;
            writeln!(self.writer, "Activity   : {}", entry.activity)?;
            writeln!(
                self.writer,
                "Target     : {}",
                format_reais(entry.pending_contribution())
            )?;
        }
        writeln!(self.writer, "{}", rule).context("Failed to write balance")?;

        Ok(())
    }

    fn show_allocation(
        &mut self,
        date: &str,
        description: &str,
        allocation: &Allocation,
    ) -> Result<()> {
        let rule = "-".repeat(WIDE_RULE_WIDTH);
        writeln!(self.writer, "\nPreview:")?;
        writeln!(self.writer, "{}", rule)?;
        writeln!(self.writer, "Date            : {}", date)?;
        writeln!(self.writer, "Description     : {}", description)?;
        writeln!(self.writer, "Payment         : {}", format_reais(allocation.applied))?;
        writeln!(
            self.writer,
            "Balance before  : {}",
            format_reais(allocation.balance_before)
        )?;
        writeln!(
            self.writer,
            "Balance after   : {}",
            format_reais(allocation.balance_after)
        )?;
        writeln!(self.writer, "Entries settled : {}", allocation.settled)?;
        if let Some(partial) = allocation.partial {
            writeln!(self.writer, "Partial on (n)  : {}", partial.id)?;
            writeln!(self.writer, "Still pending   : {}", format_reais(partial.pending))?;
        }
        writeln!(self.writer, "{}", rule).context("Failed to write allocation preview")?;

        Ok(())
    }
}
