//! Daily flow aggregation
//!
//! Per ticker and calendar day: how many classified transitions were buys
//! or sells, and how much BTC moved each way. A day's flow must always equal a
//! replay of that day's ledger records; `recompute_for_date` is that replay.

pub mod report;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::holders::{BalanceAction, BalanceChangeRecord};

pub use report::{DailyReport, ReportConfig, ReportSchedule};

/// Buy/sell counters for one ticker on one day
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyFlow {
    pub buys: u32,
    pub sells: u32,
    pub btc_bought: Decimal,
    pub btc_sold: Decimal,
}

impl DailyFlow {
    /// Fold one classified transition in
    pub fn record(&mut self, action: BalanceAction, value: Decimal) {
        match action {
            BalanceAction::Invested => {
                self.buys += 1;
                self.btc_bought += value;
            }
            BalanceAction::Sold | BalanceAction::Liquidated => {
                self.sells += 1;
                self.btc_sold += value;
            }
        }
    }

    pub fn net_btc(&self) -> Decimal {
        self.btc_bought - self.btc_sold
    }

    pub fn total_events(&self) -> u32 {
        self.buys + self.sells
    }

    pub fn is_empty(&self) -> bool {
        self.total_events() == 0
    }
}

/// Stored daily flows of one ticker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowBook {
    days: BTreeMap<NaiveDate, DailyFlow>,
}

impl FlowBook {
    pub fn record_event(&mut self, date: NaiveDate, action: BalanceAction, value: Decimal) {
        self.days.entry(date).or_default().record(action, value);
    }

    /// Flow for a day; empty if nothing happened
    pub fn get(&self, date: NaiveDate) -> DailyFlow {
        self.days.get(&date).cloned().unwrap_or_default()
    }

    pub fn replace(&mut self, date: NaiveDate, flow: DailyFlow) {
        if flow.is_empty() {
            self.days.remove(&date);
        } else {
            self.days.insert(date, flow);
        }
    }
}

/// Rebuild a day's flow from every address's full ledger
pub fn recompute_for_date(
    ledger: &BTreeMap<String, Vec<BalanceChangeRecord>>,
    date: NaiveDate,
) -> DailyFlow {
    let mut flow = DailyFlow::default();
    for record in ledger.values().flatten().filter(|r| r.date == date) {
        flow.record(record.action, record.btc_value);
    }
    flow
}

/// Outcome of comparing stored flow against the ledger replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRepair {
    pub date: NaiveDate,
    pub stored: DailyFlow,
    pub recomputed: DailyFlow,
}

impl FlowRepair {
    pub fn drifted(&self) -> bool {
        self.stored != self.recomputed
    }
}
