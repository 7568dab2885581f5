use chrono::{Local, NaiveDate, NaiveDateTime};

/// 台帳に記録する日時のフォーマット。
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[cfg(not(test))]
/// 現在のローカル時間を取得する。
pub fn now() -> NaiveDateTime {
    Local::now().naive_local()
}


#[cfg(test)]
pub use mock_datetime::now;

/// 日時を台帳のフォーマットで文字列にする。
pub fn format_datetime(datetime: &NaiveDateTime) -> String {
    datetime.format(DATETIME_FORMAT).to_string()
}

/// 支払日として入力された文字列をパースする。
///
/// `YYYY-MM-DD`、`YYYY-MM-DD HH:MM`、`YYYY-MM-DD HH:MM:SS`のいずれかを受け付ける。
/// 時刻が省略された場合は00:00:00、秒が省略された場合は0秒とする。
pub fn parse_payment_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    match s.len() {
        10 => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0)),
        16 => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").ok(),
        _ => NaiveDateTime::parse_from_str(s, DATETIME_FORMAT).ok(),
    }
}
