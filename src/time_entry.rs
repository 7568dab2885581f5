use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money::{difference, format_2, parse_money, parse_optional_money, round2};

/// 台帳の1行に対応する作業記録。
#[derive(Clone, Debug, PartialEq)]
pub struct TimeEntry {
    pub id: u64,
    pub duration_label: String,
    pub activity: String,
    pub start_time: String,
    pub end_time: String,
    pub hourly_rate: Option<Decimal>,
    pub total_value: Decimal,
    pub status: PaymentStatus,
    pub amount_paid: Option<Decimal>,
    pub amount_pending: Option<Decimal>,
    pub history: PaymentHistory,
}

/// 支払い状況。`Unpaid`から`Partial`、`Paid`の順にのみ進む。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Partial,
    Paid,
}

impl PaymentStatus {
    /// CSVの`pago`列の値から支払い状況を判定する。
    ///
    /// `sim`と`parcial`以外はすべて未払いとして扱う。
    pub fn parse(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "sim" => PaymentStatus::Paid,
            "parcial" => PaymentStatus::Partial,
            _ => PaymentStatus::Unpaid,
        }
    }

    /// CSVの`pago`列に書き込む値。
    pub fn label(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "Não",
            PaymentStatus::Partial => "Parcial",
            PaymentStatus::Paid => "Sim",
        }
    }
}

/// 支払い履歴。
///
/// `data_pagamento`列と`descricao_pagamento`列のテキストをそのまま保持し、追記のみ行う。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaymentHistory {
    pub dates: String,
    pub lines: String,
}

impl PaymentHistory {
    /// 支払い1件を履歴に追記する。
    ///
    /// 日付は`" ; "`区切り、履歴行は`" || "`区切りで、1行は`日付 | 説明 | 金額`とする。
    pub fn append(&mut self, date: &str, description: &str, amount: Decimal) {
        let line = format!("{} | {} | {}", date, description, format_2(amount));

        let dates = self.dates.trim();
        self.dates = if dates.is_empty() {
            date.to_string()
        } else {
            format!("{} ; {}", dates, date)
        };

        let lines = self.lines.trim();
        self.lines = if lines.is_empty() {
            line
        } else {
            format!("{} || {}", lines, line)
        };
    }
}

impl TimeEntry {
    /// 支払いでこのエントリーを完済するために必要な金額を返す。
    pub fn payoff_target(&self) -> Decimal {
        round2(self.pending_contribution())
    }

    /// 未払い残高の計算で、このエントリーが寄与する金額を返す。
    ///
    /// 一部支払い済みの場合は未払い残高を使い、残高が記録されていなければ`合計 - 支払い済み`とする。
    pub fn pending_contribution(&self) -> Decimal {
        match self.status {
            PaymentStatus::Paid => Decimal::ZERO,
            PaymentStatus::Unpaid => self.total_value,
            PaymentStatus::Partial => match self.amount_pending {
                Some(pending) if pending > Decimal::ZERO => pending,
                _ => difference(self.total_value, self.amount_paid.unwrap_or_default())
                    .max(Decimal::ZERO),
            },
        }
    }
}

/// CSVの1行をそのまま表す構造体。
///
/// 列の値はすべて文字列で保持し、`TimeEntry`との変換時に寛容にパースする。
/// フィールドの順序が標準の列順になる。欠けている列は空文字として読み込む。
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerRecord {
    pub n: String,
    pub tempo_total: String,
    pub atividade: String,
    pub data_inicio: String,
    pub data_fim: String,
    pub valor_hora: String,
    pub valor: String,
    pub pago: String,
    pub valor_pago: String,
    pub valor_pendente: String,
    pub data_pagamento: String,
    pub descricao_pagamento: String,
}

impl LedgerRecord {
    /// 列名に対応する値を返す。未知の列は`None`を返す。
    pub fn get(&self, column: &str) -> Option<&str> {
        let value = match column {
            "n" => &self.n,
            "tempo_total" => &self.tempo_total,
            "atividade" => &self.atividade,
            "data_inicio" => &self.data_inicio,
            "data_fim" => &self.data_fim,
            "valor_hora" => &self.valor_hora,
            "valor" => &self.valor,
            "pago" => &self.pago,
            "valor_pago" => &self.valor_pago,
            "valor_pendente" => &self.valor_pendente,
            "data_pagamento" => &self.data_pagamento,
            "descricao_pagamento" => &self.descricao_pagamento,
            _ => return None,
        };
        Some(value.as_str())
    }

    /// `n`列を数値として読む。不正な値は0とする。
    pub fn id(&self) -> u64 {
        self.n.trim().parse().unwrap_or(0)
    }

    /// CSVの行を`TimeEntry`に変換する。
    pub fn into_domain(self) -> TimeEntry {
        TimeEntry {
            id: self.id(),
            hourly_rate: parse_optional_money(&self.valor_hora),
            total_value: parse_money(&self.valor),
            status: PaymentStatus::parse(&self.pago),
            amount_paid: parse_optional_money(&self.valor_pago),
            amount_pending: parse_optional_money(&self.valor_pendente),
            duration_label: self.tempo_total,
            activity: self.atividade,
            start_time: self.data_inicio,
            end_time: self.data_fim,
            history: PaymentHistory {
                dates: self.data_pagamento,
                lines: self.descricao_pagamento,
            },
        }
    }

    /// `TimeEntry`をCSVの行に変換する。
    pub fn from_domain(entry: &TimeEntry) -> Self {
        let optional = |value: Option<Decimal>| value.map(format_2).unwrap_or_default();
        Self {
            n: entry.id.to_string(),
            tempo_total: entry.duration_label.clone(),
            atividade: entry.activity.clone(),
            data_inicio: entry.start_time.clone(),
            data_fim: entry.end_time.clone(),
            valor_hora: optional(entry.hourly_rate),
            valor: format_2(entry.total_value),
            pago: entry.status.label().to_string(),
            valor_pago: optional(entry.amount_paid),
            valor_pendente: optional(entry.amount_pending),
            data_pagamento: entry.history.dates.clone(),
            descricao_pagamento: entry.history.lines.clone(),
        }
    }

    /// 支払いに関する5つの列だけを`TimeEntry`の値で更新する。
    ///
    /// それ以外の列は書き込み後に変更しないため、元のテキストをそのまま残す。
    pub fn update_payment(&mut self, entry: &TimeEntry) {
        let optional = |value: Option<Decimal>| value.map(format_2).unwrap_or_default();
        self.pago = entry.status.label().to_string();
        self.valor_pago = optional(entry.amount_paid);
        self.valor_pendente = optional(entry.amount_pending);
        self.data_pagamento = entry.history.dates.clone();
        self.descricao_pagamento = entry.history.lines.clone();
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use rust_decimal::Decimal;

    use super::{LedgerRecord, PaymentHistory, PaymentStatus, TimeEntry};

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn record() -> LedgerRecord {
        LedgerRecord {
            n: "3".to_string(),
            tempo_total: "1h30m".to_string(),
            atividade: "review".to_string(),
            data_inicio: "2024-01-01 08:00:00".to_string(),
            data_fim: "2024-01-01 09:30:00".to_string(),
            valor_hora: "100.00".to_string(),
            valor: "150.00".to_string(),
            pago: "Parcial".to_string(),
            valor_pago: "50.00".to_string(),
            valor_pendente: "100.00".to_string(),
            data_pagamento: "2024-01-10 00:00:00".to_string(),
            descricao_pagamento: "2024-01-10 00:00:00 | Pix | 50.00".to_string(),
        }
    }

    #[rstest]
    #[case("Sim", PaymentStatus::Paid)]
    #[case(" SIM ", PaymentStatus::Paid)]
    #[case("Parcial", PaymentStatus::Partial)]
    #[case("Não", PaymentStatus::Unpaid)]
    #[case("", PaymentStatus::Unpaid)]
    #[case("talvez", PaymentStatus::Unpaid)]
    fn test_payment_status_parse(#[case] input: &str, #[case] expected: PaymentStatus) {
        assert_eq!(PaymentStatus::parse(input), expected);
    }

    #[test]
    fn test_history_append() {
        let mut history = PaymentHistory::default();
        history.append("2024-01-10 00:00:00", "Pix", dec("50"));
        history.append("2024-02-01 12:00:00", "NF 12", dec("20.5"));

        assert_eq!(history.dates, "2024-01-10 00:00:00 ; 2024-02-01 12:00:00");
        assert_eq!(
            history.lines,
            "2024-01-10 00:00:00 | Pix | 50.00 || 2024-02-01 12:00:00 | NF 12 | 20.50"
        );
    }

    #[test]
    fn test_record_into_domain() {
        let entry = record().into_domain();

        assert_eq!(entry.id, 3);
        assert_eq!(entry.status, PaymentStatus::Partial);
        assert_eq!(entry.total_value, dec("150"));
        assert_eq!(entry.amount_paid, Some(dec("50")));
        assert_eq!(entry.amount_pending, Some(dec("100")));
        assert_eq!(entry.hourly_rate, Some(dec("100")));
    }

    #[test]
    fn test_record_lenient_fields() {
        let entry = LedgerRecord {
            n: "abc".to_string(),
            valor: "oops".to_string(),
            ..Default::default()
        }
        .into_domain();

        assert_eq!(entry.id, 0);
        assert_eq!(entry.total_value, Decimal::ZERO);
        assert_eq!(entry.amount_paid, None);
        assert_eq!(entry.status, PaymentStatus::Unpaid);
    }

    #[test]
    fn test_record_round_trip() {
        let original = record();
        let entry = original.clone().into_domain();

        assert_eq!(LedgerRecord::from_domain(&entry), original);
    }

    #[test]
    fn test_update_payment_keeps_other_columns() {
        let mut original = record();
        original.valor = "150".to_string();
        let mut entry = original.clone().into_domain();
        entry.status = PaymentStatus::Paid;
        entry.amount_paid = Some(dec("150"));
        entry.amount_pending = Some(Decimal::ZERO);

        original.update_payment(&entry);

        assert_eq!(original.valor, "150");
        assert_eq!(original.pago, "Sim");
        assert_eq!(original.valor_pago, "150.00");
        assert_eq!(original.valor_pendente, "0.00");
    }

    #[rstest]
    #[case::unpaid(PaymentStatus::Unpaid, None, None, "150.00")]
    #[case::partial(PaymentStatus::Partial, Some("50"), Some("100"), "100.00")]
    #[case::partial_without_pending(PaymentStatus::Partial, Some("50"), None, "100.00")]
    #[case::partial_zero_pending(PaymentStatus::Partial, Some("40"), Some("0"), "110.00")]
    #[case::overpaid(PaymentStatus::Partial, Some("200"), None, "0")]
    #[case::paid(PaymentStatus::Paid, Some("150"), Some("0"), "0")]
    fn test_payoff_target(
        #[case] status: PaymentStatus,
        #[case] paid: Option<&str>,
        #[case] pending: Option<&str>,
        #[case] expected: &str,
    ) {
        let entry = TimeEntry {
            status,
            amount_paid: paid.map(dec),
            amount_pending: pending.map(dec),
            ..record().into_domain()
        };

        assert_eq!(entry.payoff_target(), dec(expected));
        assert_eq!(entry.pending_contribution(), entry.payoff_target());
    }

    #[test]
    fn test_pending_contribution_with_extreme_values() {
        let entry = TimeEntry {
            status: PaymentStatus::Partial,
            total_value: Decimal::MIN,
            amount_paid: Some(Decimal::MAX),
            amount_pending: None,
            ..record().into_domain()
        };

        assert_eq!(entry.pending_contribution(), Decimal::ZERO);
        assert_eq!(entry.payoff_target(), Decimal::ZERO);
    }
}
