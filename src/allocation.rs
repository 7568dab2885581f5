use anyhow::{ensure, Result};
use log::debug;
use rust_decimal::Decimal;

use crate::money::{difference, round2, sum_money};
use crate::time_entry::{PaymentStatus, TimeEntry};

/// 台帳に適用する支払い。
#[derive(Clone, Debug, PartialEq)]
pub struct Payment {
    /// 支払日。台帳のフォーマットの文字列。
    pub date: String,
    pub description: String,
    pub amount: Decimal,
}

/// 支払いの配分結果。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Allocation {
    pub balance_before: Decimal,
    /// 実際に配分した金額。残高を超える支払いは残高までに切り詰める。
    pub applied: Decimal,
    /// 残高を超えたため破棄した金額。
    pub discarded: Decimal,
    /// この支払いで完済したエントリーの数。
    pub settled: usize,
    /// 一部支払いとなったエントリー。
    pub partial: Option<PartialSettlement>,
    pub balance_after: Decimal,
}

/// 一部だけ支払われたエントリーのIDと新しい未払い残高。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PartialSettlement {
    pub id: u64,
    pub pending: Decimal,
}

/// 未払い残高の合計を計算する。
///
/// 一部支払いのエントリーは未払い残高、未払いのエントリーは合計金額を加算する。
/// 各エントリーの寄与は`allocate`が完済に必要とする額と同じになる。
pub fn pending_balance(entries: &[TimeEntry]) -> Decimal {
    round2(sum_money(entries.iter().map(TimeEntry::pending_contribution)))
}

/// 支払いを古いエントリーから順に配分する。
///
/// 台帳の並び順に、完済済みでないエントリーへ支払いを充てる。
/// 充当額が完済に必要な額に届かないエントリーは一部支払いとし、そこで配分を終える。
/// 完済に必要な額が0以下のエントリーは支払いを消費せずに完済扱いにする。
///
/// # Arguments
///
/// * `entries` - 台帳のエントリー。支払いに関する列のみ更新する。
/// * `payment` - 配分する支払い。金額は0より大きい必要がある。
pub fn allocate(entries: &mut [TimeEntry], payment: &Payment) -> Result<Allocation> {
    ensure!(
        payment.amount > Decimal::ZERO,
        "Payment amount must be greater than zero: {}",
        payment.amount
    );

    let balance_before = pending_balance(entries);
    let applied = round2(payment.amount.min(balance_before));
    let mut allocation = Allocation {
        balance_before,
        applied,
        discarded: round2(payment.amount - applied),
        ..Default::default()
    };

    let mut remaining = applied;
    for entry in entries.iter_mut() {
        if remaining <= Decimal::ZERO {
            break;
        }
        if entry.status == PaymentStatus::Paid {
            continue;
        }

        let target = entry.payoff_target();
        if target <= Decimal::ZERO {
            debug!("Closing entry {} with no outstanding value", entry.id);
            if entry.total_value > Decimal::ZERO {
                entry.amount_paid = Some(entry.total_value);
            }
            entry.status = PaymentStatus::Paid;
            entry.amount_pending = Some(Decimal::ZERO);
            continue;
        }

        if remaining >= target {
            entry.status = PaymentStatus::Paid;
            entry.amount_paid = Some(entry.total_value);
            entry.amount_pending = Some(Decimal::ZERO);
            entry
                .history
                .append(&payment.date, &payment.description, target);
            remaining = round2(remaining - target);
            allocation.settled += 1;
            debug!("Settled entry {} with {}", entry.id, target);
        } else {
            let pending = round2(target - remaining);
            entry.status = PaymentStatus::Partial;
            entry.amount_paid = Some(round2(difference(entry.total_value, pending)));
            entry.amount_pending = Some(pending);
            entry
                .history
                .append(&payment.date, &payment.description, remaining);
            debug!("Partially paid entry {} with {}", entry.id, remaining);
            allocation.partial = Some(PartialSettlement {
                id: entry.id,
                pending,
            });
            remaining = Decimal::ZERO;
        }
    }

    allocation.balance_after = pending_balance(entries);
    Ok(allocation)
}
