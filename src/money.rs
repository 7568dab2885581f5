use std::str::FromStr;

use rust_decimal::Decimal;

/// 金額をパースする。
///
/// `R$`の記号と前後の空白を取り除く。`,`と`.`の両方を含む場合は`1.234,56`の形式とみなし、
/// それ以外は`,`を小数点として扱う。空文字やパースできない値は0とする。
pub fn parse_money(text: &str) -> Decimal {
    let stripped = text.trim().replace("R$", "");
    let stripped = stripped.trim();
    if stripped.is_empty() {
        return Decimal::ZERO;
    }

    let normalized = if stripped.contains(',') && stripped.contains('.') {
        stripped.replace('.', "").replace(',', ".")
    } else {
        stripped.replace(',', ".")
    };

    Decimal::from_str(&normalized).unwrap_or(Decimal::ZERO)
}

/// 金額をパースし、空欄の場合は`None`を返す。
pub fn parse_optional_money(text: &str) -> Option<Decimal> {
    if text.trim().is_empty() {
        None
    } else {
        Some(parse_money(text))
    }
}

/// 金額を合計する。
///
/// 加算が桁あふれする値は不正な値とみなし、0として扱う。
pub fn sum_money<I: IntoIterator<Item = Decimal>>(values: I) -> Decimal {
    values.into_iter().fold(Decimal::ZERO, |total, value| {
        total.checked_add(value).unwrap_or(total)
    })
}

/// 2つの金額の差を返す。桁あふれする場合は0とする。
pub fn difference(left: Decimal, right: Decimal) -> Decimal {
    left.checked_sub(right).unwrap_or(Decimal::ZERO)
}

/// 金額を小数点以下2桁に丸める。
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp(2)
}

/// CSVに書き込むため、金額を小数点以下2桁の文字列にする。
pub fn format_2(value: Decimal) -> String {
    format!("{:.2}", round2(value))
}

/// 金額を`R$ 1.234,56`の形式で表記する。
pub fn format_reais(value: Decimal) -> String {
    let fixed = format_2(value.abs());
    let (integer, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::new();
    for (index, digit) in integer.chars().enumerate() {
        if index > 0 && (integer.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }

    let sign = if value.is_sign_negative() && !round2(value).is_zero() {
        "-"
    } else {
        ""
    };
    format!("R$ {}{},{}", sign, grouped, fraction)
}
