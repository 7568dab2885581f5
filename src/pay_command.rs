use std::io::{BufRead, Write};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use rust_decimal::Decimal;

use crate::allocation::{allocate, pending_balance, Allocation, Payment};
use crate::console::{Console, ConsolePresenter};
use crate::datetime::{self, format_datetime, parse_payment_date};
use crate::ledger::{project_file_name, Ledger, LedgerRepository};
use crate::log_command::DEFAULT_HOURLY_RATE;
use crate::money::{format_2, format_reais, parse_money, round2};
use crate::time_entry::PaymentStatus;

/// 支払いを管理するためのサブコマンド。
#[derive(Debug, clap::Args)]
pub struct PayArgs {
    #[clap(
        short = 'p',
        long = "project",
        help = "Project name; skips the project picker and creates the project if missing"
    )]
    project: Option<String>,
}

/// 選択されたプロジェクト。
#[derive(Clone, Debug, PartialEq)]
pub struct Project {
    pub file_name: String,
    pub hourly_rate: Decimal,
}

pub struct PayCommand<'a, L: LedgerRepository> {
    repository: &'a L,
}

impl<'a, L: LedgerRepository> PayCommand<'a, L> {
    /// 新しい`PayCommand`を返す。
    pub fn new(repository: &'a L) -> Self {
        Self { repository }
    }

    /// `pay`サブコマンドの処理を行う。
    ///
    /// プロジェクトを選択または作成し、残高確認・支払い・終了のメニューを表示する。
    pub fn run<R: BufRead, W: Write>(
        &self,
        args: PayArgs,
        console: &mut Console<R, W>,
    ) -> Result<()> {
        let project = match args.project.as_deref() {
            Some(name) => {
                let file_name = project_file_name(name)
                    .ok_or_else(|| anyhow!("Invalid project name: {:?}", name))?;
                if self.repository.exists(&file_name) {
                    self.open_project(&file_name, console)?
                } else {
                    self.create_project_named(&file_name, console)?
                }
            }
            None => self.select_or_create_project(console)?,
        };

        self.menu(&project, console)
    }

    /// メニューを表示し、終了が選ばれるまで操作を繰り返す。
    pub fn menu<R: BufRead, W: Write>(
        &self,
        project: &Project,
        console: &mut Console<R, W>,
    ) -> Result<()> {
        loop {
            console.say("\n=== Payments ===")?;
            console.say("1. Check balance")?;
            console.say("2. Apply payment")?;
            console.say("3. Exit")?;
            match console.ask("Choice: ")?.as_str() {
                "1" => {
                    self.check_balance(project, console)?;
                }
                "2" => {
                    self.apply_payment(project, console)?;
                }
                "3" => return Ok(()),
                _ => console.say("Invalid option.")?,
            }
        }
    }

    /// 既存のプロジェクトを一覧から選ぶか、新しいプロジェクトを作成する。
    pub fn select_or_create_project<R: BufRead, W: Write>(
        &self,
        console: &mut Console<R, W>,
    ) -> Result<Project> {
        loop {
            let projects = self
                .repository
                .list_projects()
                .context("Failed to list projects")?;
            if projects.is_empty() {
                console.say("\nNo project found. Let's create the first one.")?;
                return self.create_project(console);
            }

            console.say("\n=== Projects ===")?;
            for (index, name) in projects.iter().enumerate() {
                console.say(&format!("{}. {}", index + 1, name))?;
            }
            console.say(&format!("{}. Create new project", projects.len() + 1))?;

            let choice = console.ask("Select an option: ")?;
            let Ok(index) = choice.parse::<usize>() else {
                console.say("Enter the option number.")?;
                continue;
            };
            if (1..=projects.len()).contains(&index) {
                let file_name = &projects[index - 1];
                console.say(&format!("\nSelected project: {}", file_name))?;
                return self.open_project(file_name, console);
            }
            if index == projects.len() + 1 {
                return self.create_project(console);
            }
            console.say("Invalid option. Try again.")?;
        }
    }

    /// 名前を入力してもらい、新しいプロジェクトを作成する。
    fn create_project<R: BufRead, W: Write>(&self, console: &mut Console<R, W>) -> Result<Project> {
        console.say("\n--- New project ---")?;
        let file_name = loop {
            let name = console.ask("Project name: ")?;
            let Some(file_name) = project_file_name(&name) else {
                console.say("Invalid name. Use letters, numbers, '-' or '_'.")?;
                continue;
            };
            if self.repository.exists(&file_name) {
                console.say("A project with that name already exists. Choose another.")?;
                continue;
            }
            break file_name;
        };

        self.create_project_named(&file_name, console)
    }

    fn create_project_named<R: BufRead, W: Write>(
        &self,
        file_name: &str,
        console: &mut Console<R, W>,
    ) -> Result<Project> {
        let hourly_rate = ask_hourly_rate(console, Some(DEFAULT_HOURLY_RATE))?;
        self.repository
            .create_project(file_name)
            .with_context(|| format!("Failed to create project {}", file_name))?;
        console.say(&format!("Project created: {}", file_name))?;

        Ok(Project {
            file_name: file_name.to_string(),
            hourly_rate,
        })
    }

    /// 既存のプロジェクトを開く。
    ///
    /// 時間単価が記録されていない場合は入力してもらい、台帳の列を標準の列順に揃える。
    fn open_project<R: BufRead, W: Write>(
        &self,
        file_name: &str,
        console: &mut Console<R, W>,
    ) -> Result<Project> {
        let stored = self
            .repository
            .load(file_name)
            .with_context(|| format!("Failed to read {}", file_name))?
            .hourly_rate();
        let hourly_rate = match stored {
            Some(rate) => rate,
            None => {
                console.say(
                    "\nThis project has no hourly rate yet. \
                     Enter the rate to use for all its entries.",
                )?;
                ask_hourly_rate(console, Some(DEFAULT_HOURLY_RATE))?
            }
        };
        self.repository
            .sync_layout(file_name, Some(hourly_rate))
            .with_context(|| format!("Failed to synchronize layout of {}", file_name))?;

        Ok(Project {
            file_name: file_name.to_string(),
            hourly_rate,
        })
    }

    /// 未払い残高と次に支払うエントリーを表示し、残高を返す。
    pub fn check_balance<R: BufRead, W: Write>(
        &self,
        project: &Project,
        console: &mut Console<R, W>,
    ) -> Result<Decimal> {
        let ledger = self.load_synced(project)?;
        let entries = ledger.entries();
        let balance = pending_balance(&entries);
        let next = entries
            .iter()
            .find(|entry| entry.status != PaymentStatus::Paid);

        console.show_balance(&project.file_name, balance, next)?;

        Ok(balance)
    }

    /// 支払いを入力してもらい、古いエントリーから順に配分して保存する。
    ///
    /// 残高がない場合や、確認が拒否された場合は何も保存せずに`None`を返す。
    pub fn apply_payment<R: BufRead, W: Write>(
        &self,
        project: &Project,
        console: &mut Console<R, W>,
    ) -> Result<Option<Allocation>> {
        let mut ledger = self.load_synced(project)?;
        let mut entries = ledger.entries();
        let balance = pending_balance(&entries);
        if balance <= Decimal::ZERO {
            console.say("\nNothing to pay. The pending balance is zero.")?;
            return Ok(None);
        }

        console.say("\n=== Apply payment ===")?;
        console.say(&format!("Current balance: {}", format_reais(balance)))?;

        let payment = Payment {
            date: ask_payment_date(console)?,
            description: ask_payment_description(console)?,
            amount: ask_payment_amount(console)?,
        };

        let allocation = allocate(&mut entries, &payment)?;
        debug!("Allocation for {}: {:?}", project.file_name, allocation);
        if allocation.discarded > Decimal::ZERO {
            console.say("\nNote: the payment exceeds the balance. The excess will be ignored.")?;
        }
        console.show_allocation(&payment.date, &payment.description, &allocation)?;

        if !console.confirm("Save payment?")? {
            console.say("Operation cancelled. Nothing was saved.")?;
            return Ok(None);
        }

        ledger.apply_payments(&entries);
        self.repository
            .save(&project.file_name, &ledger)
            .with_context(|| format!("Failed to save payment to {}", project.file_name))?;
        info!(
            "Applied {} to {} ({} settled)",
            format_2(allocation.applied),
            project.file_name,
            allocation.settled
        );
        console.say("\nPayment recorded.")?;
        self.check_balance(project, console)?;

        Ok(Some(allocation))
    }

    fn load_synced(&self, project: &Project) -> Result<Ledger> {
        self.repository
            .sync_layout(&project.file_name, Some(project.hourly_rate))
            .with_context(|| format!("Failed to synchronize layout of {}", project.file_name))?;
        self.repository
            .load(&project.file_name)
            .with_context(|| format!("Failed to read {}", project.file_name))
    }
}

/// 時間単価を入力してもらう。空欄の場合は提案値を利用する。
fn ask_hourly_rate<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    suggested: Option<Decimal>,
) -> Result<Decimal> {
    let prompt = match suggested {
        Some(rate) => format!("Hourly rate (R$) [{}]: ", format_2(rate)),
        None => "Hourly rate (R$): ".to_string(),
    };
    console.ask_valid(&prompt, |input| {
        if input.is_empty() {
            return suggested
                .map(round2)
                .ok_or_else(|| "Enter a value greater than zero.".to_string());
        }
        let rate = Decimal::from_str(&input.replace(',', "."))
            .map_err(|_| "Invalid value. Enter numbers only.".to_string())?;
        if rate <= Decimal::ZERO {
            return Err("The value must be greater than zero.".to_string());
        }
        Ok(round2(rate))
    })
}

/// 支払日を入力してもらう。空欄の場合は現在時刻を利用する。
fn ask_payment_date<R: BufRead, W: Write>(console: &mut Console<R, W>) -> Result<String> {
    let now = format_datetime(&datetime::now());
    console.ask_valid(&format!("Payment date [{}]: ", now), |input| {
        if input.is_empty() {
            return Ok(now.clone());
        }
        parse_payment_date(input)
            .map(|date| format_datetime(&date))
            .ok_or_else(|| "Invalid format. Use YYYY-MM-DD or YYYY-MM-DD HH:MM[:SS].".to_string())
    })
}

fn ask_payment_description<R: BufRead, W: Write>(console: &mut Console<R, W>) -> Result<String> {
    console.ask_valid(
        "Payment description (e.g. Pix, invoice 123, reference): ",
        |input| {
            if input.is_empty() {
                Err("Description is required.".to_string())
            } else {
                Ok(input.to_string())
            }
        },
    )
}

fn ask_payment_amount<R: BufRead, W: Write>(console: &mut Console<R, W>) -> Result<Decimal> {
    console.ask_valid("Payment amount (R$): ", |input| {
        let amount = round2(parse_money(input));
        if amount <= Decimal::ZERO {
            Err("Enter a value greater than zero.".to_string())
        } else {
            Ok(amount)
        }
    })
}
