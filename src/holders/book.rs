//! Per-ticker holder state: entries, ledger, counters and flows
//!
//! One `TickerBook` is the whole persisted state of a ticker. It is only ever
//! modified while its owner holds the ticker's lock.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use super::transition::{classify, Driver, Thresholds};
use super::types::{BalanceAction, BalanceChangeRecord, ChangeSource};
use crate::error::Result;
use crate::flow::{recompute_for_date, DailyFlow, FlowBook, FlowRepair};
use crate::wire::parse_decimal;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickerBook {
    pub ticker: String,
    /// address -> last saved balance, present only while held
    #[serde(default)]
    entries: BTreeMap<String, String>,
    /// address -> append-only change history
    #[serde(default)]
    ledger: BTreeMap<String, Vec<BalanceChangeRecord>>,
    /// date -> address -> classified transitions that day
    #[serde(default)]
    counters: BTreeMap<NaiveDate, BTreeMap<String, u32>>,
    #[serde(default)]
    flows: FlowBook,
    #[serde(default)]
    last_sweep: Option<NaiveDate>,
    /// address -> sequence of the newest reading applied in this process
    #[serde(skip)]
    observed: HashMap<String, u64>,
}

impl TickerBook {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            ..Default::default()
        }
    }

    /// Saved balance; `Ok(None)` if untracked
    pub fn saved_balance(&self, address: &str) -> Result<Option<Decimal>> {
        self.entries
            .get(address)
            .map(|raw| parse_decimal(raw))
            .transpose()
    }

    /// Note a reading taken at `sequence`
    ///
    /// Returns false if a reading taken later was already applied to the
    /// address; the caller must then drop this one.
    pub fn observe(&mut self, address: &str, sequence: u64) -> bool {
        match self.observed.get(address) {
            Some(&newest) if newest > sequence => false,
            _ => {
                self.observed.insert(address.to_string(), sequence);
                true
            }
        }
    }

    /// Reconcile one freshly observed balance
    ///
    /// Appends at most one record. Returns it when the change was classified.
    pub fn apply(
        &mut self,
        address: &str,
        current: Decimal,
        driver: Driver,
        thresholds: &Thresholds,
        now: DateTime<Utc>,
    ) -> Result<Option<BalanceChangeRecord>> {
        let saved = self.saved_balance(address)?;
        let Some(transition) = classify(saved, current, driver, thresholds) else {
            return Ok(None);
        };

        let date = now.date_naive();
        let record = BalanceChangeRecord {
            amount: current,
            delta: transition.delta,
            action: transition.action,
            btc_value: driver.btc_value(),
            date,
            source: match driver {
                Driver::Swap { .. } => ChangeSource::Swap,
                Driver::Sweep => ChangeSource::Sweep,
            },
            timestamp: now,
        };

        self.ledger
            .entry(address.to_string())
            .or_default()
            .push(record.clone());

        *self
            .counters
            .entry(date)
            .or_default()
            .entry(address.to_string())
            .or_insert(0) += 1;

        match transition.retained {
            Some(balance) => {
                self.entries.insert(address.to_string(), balance.to_string());
            }
            None => {
                self.entries.remove(address);
            }
        }

        self.flows.record_event(date, record.action, record.btc_value);

        Ok(Some(record))
    }

    /// Held addresses with their balances, largest first
    ///
    /// Entries with unparsable balances are left out.
    pub fn holders(&self) -> Vec<(String, Decimal)> {
        let mut holders: Vec<(String, Decimal)> = self
            .entries
            .iter()
            .filter_map(|(address, raw)| match parse_decimal(raw) {
                Ok(balance) => Some((address.clone(), balance)),
                Err(e) => {
                    warn!(ticker = %self.ticker, address = %address, error = %e, "Skipping unreadable entry");
                    None
                }
            })
            .collect();
        holders.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        holders
    }

    /// Addresses currently held, including unreadable ones
    pub fn held_addresses(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn holder_count(&self) -> usize {
        self.entries.len()
    }

    pub fn ledger_for(&self, address: &str) -> &[BalanceChangeRecord] {
        self.ledger.get(address).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn daily_event_count(&self, address: &str, date: NaiveDate) -> u32 {
        self.counters
            .get(&date)
            .and_then(|by_address| by_address.get(address))
            .copied()
            .unwrap_or(0)
    }

    pub fn flow(&self, date: NaiveDate) -> DailyFlow {
        self.flows.get(date)
    }

    pub fn record_flow_event(&mut self, date: NaiveDate, action: BalanceAction, value: Decimal) {
        self.flows.record_event(date, action, value);
    }

    pub fn recompute_flow(&self, date: NaiveDate) -> DailyFlow {
        recompute_for_date(&self.ledger, date)
    }

    /// Replace the stored flow of a day with the ledger replay
    pub fn repair_flow(&mut self, date: NaiveDate) -> FlowRepair {
        let repair = FlowRepair {
            date,
            stored: self.flows.get(date),
            recomputed: self.recompute_flow(date),
        };
        if repair.drifted() {
            self.flows.replace(date, repair.recomputed.clone());
        }
        repair
    }

    pub fn last_sweep(&self) -> Option<NaiveDate> {
        self.last_sweep
    }

    pub fn mark_swept(&mut self, date: NaiveDate) {
        self.last_sweep = Some(date);
    }

    #[cfg(test)]
    pub(crate) fn seed_entry(&mut self, address: &str, balance: &str) -> Result<()> {
        parse_decimal(balance)?;
        self.entries.insert(address.to_string(), balance.to_string());
        Ok(())
    }
}
