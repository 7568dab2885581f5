use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use regex::Regex;
use rust_decimal::Decimal;
use tempfile::NamedTempFile;

use crate::duration::parse_minutes;
use crate::money::{difference, format_2, parse_money};
use crate::time_entry::{LedgerRecord, PaymentStatus, TimeEntry};

/// 台帳CSVの標準の列順。
pub const FIELDNAMES: [&str; 12] = [
    "n",
    "tempo_total",
    "atividade",
    "data_inicio",
    "data_fim",
    "valor_hora",
    "valor",
    "pago",
    "valor_pago",
    "valor_pendente",
    "data_pagamento",
    "descricao_pagamento",
];

/// プロジェクトを指定しない場合に記録するファイル。
pub const DEFAULT_PROJECT_FILE: &str = "apontamentos.csv";

/// プロジェクト名をファイル名に変換する。
///
/// 小文字にし、英数字・`_`・`-`以外の連続を`_`1文字にまとめ、前後の`_`を取り除いて`.csv`を付ける。
/// 何も残らない場合は`None`を返す。
///
/// # Examples
///
/// ```
/// assert_eq!(project_file_name("Cliente ACME"), Some("cliente_acme.csv".to_string()));
/// ```
pub fn project_file_name(name: &str) -> Option<String> {
    static NON_WORD: OnceLock<Regex> = OnceLock::new();
    static UNDERSCORES: OnceLock<Regex> = OnceLock::new();
    let non_word = NON_WORD.get_or_init(|| Regex::new(r"[^\w\-]+").expect("regex must compile"));
    let underscores = UNDERSCORES.get_or_init(|| Regex::new(r"_+").expect("regex must compile"));

    let lowered = name.trim().to_lowercase();
    let replaced = non_word.replace_all(&lowered, "_");
    let collapsed = underscores.replace_all(&replaced, "_");
    let slug = collapsed.trim_matches('_');
    if slug.is_empty() {
        return None;
    }

    if slug.ends_with(".csv") {
        Some(slug.to_string())
    } else {
        Some(format!("{}.csv", slug))
    }
}

/// 1つのプロジェクトの台帳。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Ledger {
    /// ファイルのヘッダー行。
    pub headers: Vec<String>,
    /// ファイルの並び順の行。
    pub records: Vec<LedgerRecord>,
}

/// 未払いの作業時間と金額の合計。
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UnpaidTotals {
    pub minutes: u32,
    pub value: Decimal,
}

impl Ledger {
    /// ヘッダーが標準の列順と一致するかを返す。
    pub fn is_canonical(&self) -> bool {
        self.headers.iter().map(String::as_str).eq(FIELDNAMES)
    }

    /// 行を`TimeEntry`に変換して返す。
    pub fn entries(&self) -> Vec<TimeEntry> {
        self.records
            .iter()
            .cloned()
            .map(LedgerRecord::into_domain)
            .collect()
    }

    /// 支払いの配分結果を行に反映する。
    ///
    /// 変更のあったエントリーの支払いに関する列のみ更新し、それ以外の行と列はそのまま残す。
    pub fn apply_payments(&mut self, entries: &[TimeEntry]) {
        for (record, entry) in self.records.iter_mut().zip(entries) {
            if record.clone().into_domain() != *entry {
                record.update_payment(entry);
            }
        }
    }

    /// 次に割り当てるIDを返す。既存IDの最大値に1を足した値とする。
    pub fn next_id(&self) -> u64 {
        self.records
            .iter()
            .map(LedgerRecord::id)
            .max()
            .unwrap_or(0)
            + 1
    }

    /// プロジェクトの時間単価を返す。
    ///
    /// `valor_hora`列がない場合や、値が記録された行がない場合は`None`を返す。
    pub fn hourly_rate(&self) -> Option<Decimal> {
        if !self.headers.iter().any(|header| header == "valor_hora") {
            return None;
        }
        self.records.iter().find_map(|record| {
            let raw = record.valor_hora.trim();
            if raw.is_empty() {
                return None;
            }
            Decimal::from_str(&raw.replace(',', ".")).ok()
        })
    }

    /// 完済していない行の作業時間と金額を合計する。
    ///
    /// 合計が桁あふれする行は加算しない。
    pub fn unpaid_totals(&self) -> UnpaidTotals {
        self.records
            .iter()
            .filter(|record| PaymentStatus::parse(&record.pago) != PaymentStatus::Paid)
            .fold(UnpaidTotals::default(), |mut totals, record| {
                let minutes = parse_minutes(&record.tempo_total).unwrap_or(0);
                let value = parse_money(&record.valor);
                if let (Some(total_minutes), Some(total_value)) = (
                    totals.minutes.checked_add(minutes),
                    totals.value.checked_add(value),
                ) {
                    totals.minutes = total_minutes;
                    totals.value = total_value;
                } else {
                    debug!("Skipping entry {} in unpaid totals", record.n);
                }
                totals
            })
    }
}

/// 台帳を永続化するためのtrait。
#[cfg_attr(test, mockall::automock)]
pub trait LedgerRepository {
    /// プロジェクトのファイル名を名前順に返す。
    fn list_projects(&self) -> Result<Vec<String>>;

    /// プロジェクトのファイルが存在するかを返す。
    fn exists(&self, file_name: &str) -> bool;

    /// ヘッダーのみのプロジェクトファイルを作成する。既に存在する場合はエラーを返す。
    fn create_project(&self, file_name: &str) -> Result<()>;

    /// 台帳を読み込む。ファイルが存在しない場合は空の台帳を返す。
    fn load(&self, file_name: &str) -> Result<Ledger>;

    /// 台帳を標準の列順で書き直す。
    fn save(&self, file_name: &str, ledger: &Ledger) -> Result<()>;

    /// 1行を追記する。
    fn append(&self, file_name: &str, record: &LedgerRecord) -> Result<()>;

    /// 台帳を標準の列順に揃え、空の時間単価を補完する。書き直した場合は`true`を返す。
    fn sync_layout(&self, file_name: &str, default_rate: Option<Decimal>) -> Result<bool>;
}

/// 作業ディレクトリのCSVファイルを台帳として扱うリポジトリ。
///
/// # Examples
///
/// ```
/// let repository = CsvLedger::new(".");
/// let ledger = repository.load("apontamentos.csv").unwrap();
/// ```
pub struct CsvLedger {
    dir: PathBuf,
}

impl CsvLedger {
    /// 新しい`CsvLedger`を返す。
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// 一時ファイルに書き込んでからリネームすることで、行をアトミックに書き直す。
    fn write_records(&self, path: &Path, records: &[LedgerRecord]) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("Failed to create temporary file in {:?}", self.dir))?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&mut tmp);
            writer
                .write_record(FIELDNAMES)
                .context("Failed to write header")?;
            for record in records {
                writer
                    .serialize(record)
                    .with_context(|| format!("Failed to write record: {:?}", record))?;
            }
            writer.flush().context("Failed to flush records")?;
        }
        tmp.persist(path)
            .with_context(|| format!("Failed to replace {:?}", path))?;
        debug!("Wrote {} records to {:?}", records.len(), path);

        Ok(())
    }
}

impl LedgerRepository for CsvLedger {
    fn list_projects(&self) -> Result<Vec<String>> {
        let mut projects = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read directory {:?}", self.dir))?
        {
            let dir_entry = dir_entry.context("Failed to read directory entry")?;
            let name = dir_entry.file_name().to_string_lossy().to_string();
            if dir_entry.path().is_file() && name.to_lowercase().ends_with(".csv") {
                projects.push(name);
            }
        }
        projects.sort();

        Ok(projects)
    }

    fn exists(&self, file_name: &str) -> bool {
        self.path(file_name).exists()
    }

    fn create_project(&self, file_name: &str) -> Result<()> {
        let path = self.path(file_name);
        if path.exists() {
            bail!("Project already exists: {:?}", path);
        }
        self.write_records(&path, &[])?;
        info!("Created project {:?}", path);

        Ok(())
    }

    fn load(&self, file_name: &str) -> Result<Ledger> {
        let path = self.path(file_name);
        if !path.is_file() {
            return Ok(Ledger::default());
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&path)
            .with_context(|| format!("Failed to open {:?}", path))?;
        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read header of {:?}", path))?
            .iter()
            .map(String::from)
            .collect();
        let records = reader
            .deserialize::<LedgerRecord>()
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to read records of {:?}", path))?;

        Ok(Ledger { headers, records })
    }

    fn save(&self, file_name: &str, ledger: &Ledger) -> Result<()> {
        let path = self.path(file_name);
        self.write_records(&path, &ledger.records)?;
        info!("Saved {} entries to {:?}", ledger.records.len(), path);

        Ok(())
    }

    fn append(&self, file_name: &str, record: &LedgerRecord) -> Result<()> {
        let path = self.path(file_name);
        let headers = self.load(file_name)?.headers;
        let headers = if headers.is_empty() {
            FIELDNAMES.iter().map(|header| header.to_string()).collect()
        } else {
            headers
        };
        let needs_header = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {:?} for append", path))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer
                .write_record(&headers)
                .context("Failed to write header")?;
        }
        writer
            .write_record(
                headers
                    .iter()
                    .map(|header| record.get(header).unwrap_or_default()),
            )
            .with_context(|| format!("Failed to append record: {:?}", record))?;
        writer.flush().context("Failed to flush record")?;
        info!("Appended entry {} to {:?}", record.n, path);

        Ok(())
    }

    fn sync_layout(&self, file_name: &str, default_rate: Option<Decimal>) -> Result<bool> {
        let path = self.path(file_name);
        if !path.is_file() {
            return Ok(false);
        }

        let ledger = self.load(file_name)?;
        let needs_columns = !ledger.is_canonical();
        let needs_rate = default_rate.is_some()
            && ledger
                .records
                .iter()
                .any(|record| record.valor_hora.trim().is_empty());
        let needs_pending = ledger.records.iter().any(|record| {
            PaymentStatus::parse(&record.pago) == PaymentStatus::Partial
                && record.valor_pendente.trim().is_empty()
        });
        if !needs_columns && !needs_rate && !needs_pending {
            return Ok(false);
        }

        let records: Vec<LedgerRecord> = ledger
            .records
            .into_iter()
            .map(|mut record| {
                if record.valor_hora.trim().is_empty() {
                    if let Some(rate) = default_rate {
                        record.valor_hora = format_2(rate);
                    }
                }
                if PaymentStatus::parse(&record.pago) == PaymentStatus::Partial
                    && record.valor_pendente.trim().is_empty()
                {
                    let pending =
                        difference(parse_money(&record.valor), parse_money(&record.valor_pago))
                            .max(Decimal::ZERO);
                    record.valor_pendente = format_2(pending);
                }
                record
            })
            .collect();
        self.write_records(&path, &records)?;
        info!("Synchronized layout of {:?}", path);

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::rstest;
    use rust_decimal::Decimal;
    use tempfile::tempdir;

    use super::{project_file_name, CsvLedger, Ledger, LedgerRepository, FIELDNAMES};
    use crate::time_entry::{LedgerRecord, PaymentStatus};

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    const LEGACY_CSV: &str = "\
n,tempo_total,atividade,data_inicio,data_fim,valor,pago
1,1h,setup,2024-01-01 08:00:00,2024-01-01 09:00:00,100.00,Sim
2,30m,review,2024-01-02 08:00:00,2024-01-02 08:30:00,50.00,Parcial
3,2h,deploy,2024-01-03 08:00:00,2024-01-03 10:00:00,200.00,Não
";

    fn record(n: &str, valor: &str) -> LedgerRecord {
        LedgerRecord {
            n: n.to_string(),
            tempo_total: "1h".to_string(),
            atividade: format!("task {}", n),
            data_inicio: "2024-01-01 08:00:00".to_string(),
            data_fim: "2024-01-01 09:00:00".to_string(),
            valor_hora: "100.00".to_string(),
            valor: valor.to_string(),
            pago: "Não".to_string(),
            ..Default::default()
        }
    }

    #[rstest]
    #[case::simple("acme", Some("acme.csv"))]
    #[case::spaces_and_case("  Cliente ACME  ", Some("cliente_acme.csv"))]
    #[case::symbols("a!!b??c", Some("a_b_c.csv"))]
    #[case::keeps_hyphen("site-novo", Some("site-novo.csv"))]
    #[case::edge_underscores("__x__", Some("x.csv"))]
    #[case::dot_is_replaced("notas.csv", Some("notas_csv.csv"))]
    #[case::accented("São Paulo", Some("são_paulo.csv"))]
    #[case::only_symbols("!!!", None)]
    #[case::empty("   ", None)]
    fn test_project_file_name(#[case] input: &str, #[case] expected: Option<&str>) {
        assert_eq!(project_file_name(input).as_deref(), expected);
    }

    #[rstest]
    #[case::empty(&[], 1)]
    #[case::gap(&["1", "2", "4"], 5)]
    #[case::malformed(&["abc", "", "2"], 3)]
    #[case::all_malformed(&["x"], 1)]
    fn test_next_id(#[case] ids: &[&str], #[case] expected: u64) {
        let ledger = Ledger {
            headers: vec![],
            records: ids.iter().map(|id| record(id, "10")).collect(),
        };

        assert_eq!(ledger.next_id(), expected);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let repository = CsvLedger::new(dir.path());

        let ledger = repository.load("missing.csv").unwrap();

        assert_eq!(ledger, Ledger::default());
        assert_eq!(ledger.next_id(), 1);
    }

    #[test]
    fn test_load_legacy_layout() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("old.csv"), LEGACY_CSV).unwrap();
        let repository = CsvLedger::new(dir.path());

        let ledger = repository.load("old.csv").unwrap();

        assert!(!ledger.is_canonical());
        assert_eq!(ledger.records.len(), 3);
        assert_eq!(ledger.records[1].pago, "Parcial");
        assert_eq!(ledger.records[1].valor_hora, "");
        assert_eq!(ledger.hourly_rate(), None);
        assert_eq!(ledger.next_id(), 4);
    }

    #[test]
    fn test_unpaid_totals() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("old.csv"), LEGACY_CSV).unwrap();
        let repository = CsvLedger::new(dir.path());

        let totals = repository.load("old.csv").unwrap().unpaid_totals();

        assert_eq!(totals.minutes, 150);
        assert_eq!(totals.value, dec("250"));
    }

    #[test]
    fn test_sync_layout_migrates_legacy_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.csv");
        fs::write(&path, LEGACY_CSV).unwrap();
        let repository = CsvLedger::new(dir.path());

        let rewritten = repository.sync_layout("old.csv", Some(dec("90"))).unwrap();
        let ledger = repository.load("old.csv").unwrap();

        assert!(rewritten);
        assert!(ledger.is_canonical());
        assert!(ledger.records.iter().all(|r| r.valor_hora == "90.00"));
        assert_eq!(ledger.records[1].valor_pendente, "50.00");
        assert_eq!(ledger.records[0].valor_pendente, "");
        assert_eq!(ledger.records[2].valor, "200.00");
        assert_eq!(ledger.hourly_rate(), Some(dec("90")));
    }

    /// 2回目の同期では何も書き換えない。
    #[rstest]
    #[case::with_rate(Some("113.63"))]
    #[case::without_rate(None)]
    fn test_sync_layout_is_idempotent(#[case] rate: Option<&str>) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.csv");
        fs::write(&path, LEGACY_CSV).unwrap();
        let repository = CsvLedger::new(dir.path());
        let rate = rate.map(dec);

        assert!(repository.sync_layout("old.csv", rate).unwrap());
        let first = fs::read_to_string(&path).unwrap();
        assert!(!repository.sync_layout("old.csv", rate).unwrap());
        let second = fs::read_to_string(&path).unwrap();

        assert_eq!(first, second);
    }

    const PARTIAL_WITHOUT_PENDING_CSV: &str = "\
n,tempo_total,atividade,data_inicio,data_fim,valor_hora,valor,pago,valor_pago,valor_pendente,data_pagamento,descricao_pagamento
1,1h,setup,2024-01-01 08:00:00,2024-01-01 09:00:00,100.00,100.00,Parcial,40.00,,,
2,30m,review,2024-01-02 08:00:00,2024-01-02 08:30:00,100.00,50.00,Não,,,,
";

    /// 標準の列順でも、未払い残高が空欄の一部支払い行があれば書き換える。
    #[test]
    fn test_sync_layout_fills_blank_pending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("acme.csv");
        fs::write(&path, PARTIAL_WITHOUT_PENDING_CSV).unwrap();
        let repository = CsvLedger::new(dir.path());

        assert!(repository.load("acme.csv").unwrap().is_canonical());
        assert!(repository.sync_layout("acme.csv", None).unwrap());
        let first = fs::read_to_string(&path).unwrap();
        let ledger = repository.load("acme.csv").unwrap();

        assert_eq!(ledger.records[0].valor_pendente, "60.00");
        assert_eq!(ledger.records[0].valor_pago, "40.00");
        assert_eq!(ledger.records[1].valor_pendente, "");

        assert!(!repository.sync_layout("acme.csv", None).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), first);
    }

    #[test]
    fn test_sync_layout_with_overflowing_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("huge.csv");
        let content = format!(
            "n,valor,pago,valor_pago\n1,{},Parcial,-{}\n",
            Decimal::MAX,
            Decimal::MAX
        );
        fs::write(&path, content).unwrap();
        let repository = CsvLedger::new(dir.path());

        assert!(repository.sync_layout("huge.csv", None).unwrap());

        let ledger = repository.load("huge.csv").unwrap();
        assert_eq!(ledger.records[0].valor_pendente, "0.00");
    }

    #[test]
    fn test_unpaid_totals_near_decimal_limit() {
        let ledger = Ledger {
            headers: FIELDNAMES.iter().map(|field| field.to_string()).collect(),
            records: vec![
                record("1", "10.00"),
                record("2", &Decimal::MAX.to_string()),
                record("3", "5.00"),
            ],
        };

        let totals = ledger.unpaid_totals();

        assert_eq!(totals.value, dec("15"));
        assert_eq!(totals.minutes, 120);
    }

    #[test]
    fn test_sync_layout_missing_file() {
        let dir = tempdir().unwrap();
        let repository = CsvLedger::new(dir.path());

        assert!(!repository.sync_layout("none.csv", Some(dec("1"))).unwrap());
        assert!(!dir.path().join("none.csv").exists());
    }

    #[test]
    fn test_create_and_list_projects() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join("Zeta.CSV"), "n\n").unwrap();
        let repository = CsvLedger::new(dir.path());

        repository.create_project("beta.csv").unwrap();
        repository.create_project("alpha.csv").unwrap();

        assert_eq!(
            repository.list_projects().unwrap(),
            vec!["Zeta.CSV", "alpha.csv", "beta.csv"]
        );
        assert!(repository.create_project("beta.csv").is_err());
        let ledger = repository.load("beta.csv").unwrap();
        assert!(ledger.is_canonical());
        assert!(ledger.records.is_empty());
    }

    #[test]
    fn test_append_new_file_uses_canonical_header() {
        let dir = tempdir().unwrap();
        let repository = CsvLedger::new(dir.path());

        repository.append("new.csv", &record("1", "100.00")).unwrap();
        repository.append("new.csv", &record("2", "50.00")).unwrap();
        let ledger = repository.load("new.csv").unwrap();

        assert!(ledger.is_canonical());
        assert_eq!(ledger.records, vec![record("1", "100.00"), record("2", "50.00")]);
    }

    #[test]
    fn test_append_keeps_legacy_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.csv");
        fs::write(&path, LEGACY_CSV).unwrap();
        let repository = CsvLedger::new(dir.path());

        repository.append("old.csv", &record("4", "100.00")).unwrap();
        let content = fs::read_to_string(&path).unwrap();

        assert!(content.starts_with(LEGACY_CSV));
        assert!(content.ends_with(
            "4,1h,task 4,2024-01-01 08:00:00,2024-01-01 09:00:00,100.00,Não\n"
        ));
    }

    #[test]
    fn test_save_updates_only_changed_rows() {
        let dir = tempdir().unwrap();
        let repository = CsvLedger::new(dir.path());
        let mut untouched = record("1", "12.5");
        untouched.pago = String::new();
        let mut ledger = Ledger {
            headers: FIELDNAMES.iter().map(|h| h.to_string()).collect(),
            records: vec![untouched.clone(), record("2", "40")],
        };
        let mut entries = ledger.entries();
        entries[1].status = PaymentStatus::Paid;
        entries[1].amount_paid = Some(dec("40"));
        entries[1].amount_pending = Some(Decimal::ZERO);

        ledger.apply_payments(&entries);
        repository.save("p.csv", &ledger).unwrap();
        let saved = repository.load("p.csv").unwrap();

        assert_eq!(saved.records[0], untouched);
        assert_eq!(saved.records[1].valor, "40");
        assert_eq!(saved.records[1].pago, "Sim");
        assert_eq!(saved.records[1].valor_pago, "40.00");
        assert_eq!(saved.records[1].valor_pendente, "0.00");
    }
}
