use std::sync::OnceLock;

use regex::Regex;

/// `<数値><単位>`の1要素にマッチする正規表現。
fn component_regex() -> &'static Regex {
    static COMPONENT: OnceLock<Regex> = OnceLock::new();
    COMPONENT.get_or_init(|| {
        Regex::new(r"(?i)^(\d+(?:[.,]\d+)?)([hm])").expect("duration regex must compile")
    })
}

/// `1h30m`や`45m`のような作業時間の表記を分に変換する。
///
/// 空白を取り除いた後、`<数値><単位>`の要素が隙間なく連続している必要がある。
/// 単位は`h`と`m`のみで、数値の小数点には`.`と`,`のどちらも利用できる。
/// 認識できない文字が残る場合、要素が1つもない場合、合計が0分以下に丸められる場合は`None`を返す。
///
/// # Examples
///
/// ```
/// assert_eq!(parse_minutes("1h30m"), Some(90));
/// assert_eq!(parse_minutes("1x"), None);
/// ```
pub fn parse_minutes(text: &str) -> Option<u32> {
    let compacted = text.trim().to_lowercase().replace(' ', "");
    let mut rest = compacted.as_str();
    let mut total_minutes = 0.0_f64;
    let mut matched = false;

    while !rest.is_empty() {
        let captures = component_regex().captures(rest)?;
        let quantity: f64 = captures[1].replace(',', ".").parse().ok()?;
        total_minutes += match &captures[2] {
            "h" => quantity * 60.0,
            _ => quantity,
        };
        matched = true;
        rest = &rest[captures[0].len()..];
    }

    if !matched {
        return None;
    }

    let minutes = total_minutes.round();
    if minutes <= 0.0 || minutes > u32::MAX as f64 {
        return None;
    }

    Some(minutes as u32)
}

/// 分を`1h30m`の形式で表記する。
pub fn format_minutes(minutes: u32) -> String {
    let (hours, rest) = (minutes / 60, minutes % 60);
    let mut label = String::new();
    if hours > 0 {
        label.push_str(&format!("{}h", hours));
    }
    if rest > 0 {
        label.push_str(&format!("{}m", rest));
    }
    if label.is_empty() {
        label.push_str("0m");
    }
    label
}
