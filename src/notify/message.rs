//! Message construction (pure: event plus enrichment in, message out)

use rust_decimal::Decimal;
use std::fmt::Write as _;

use super::enrich::Enrichment;
use super::NotificationEvent;
use crate::feed::{SwapRecord, SwapSide};
use crate::flow::DailyReport;
use crate::holders::{BalanceAction, HolderChange};
use crate::hot::PoolActivity;

/// Telegram's limit for a message text
const MAX_TEXT_LEN: usize = 4096;

/// Inline link button
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageButton {
    pub label: String,
    pub url: String,
}

/// A formatted message for one sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// HTML-formatted body
    pub text: String,
    /// Chat id, channel or log label
    pub target: String,
    pub media_url: Option<String>,
    pub buttons: Vec<MessageButton>,
}

/// Escape text for Telegram HTML
pub fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn short_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 12 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

/// Drop trailing zeros so `450.00000000` reads `450`
fn amount(value: Decimal) -> String {
    value.normalize().to_string()
}

fn btc(value: Decimal) -> String {
    format!("{} BTC", value.round_dp(8).normalize())
}

fn token_label(pool_id: &str, enrichment: &Enrichment, fallback: Option<&str>) -> String {
    let token = enrichment.token.as_ref();
    let ticker = token.and_then(|t| t.ticker.as_deref()).or(fallback);
    let name = token.and_then(|t| t.name.as_deref());

    match (ticker, name) {
        (Some(ticker), Some(name)) if !name.eq_ignore_ascii_case(ticker) => {
            format!("<b>{}</b> ({})", escape_html(ticker), escape_html(name))
        }
        (Some(ticker), _) => format!("<b>{}</b>", escape_html(ticker)),
        (None, Some(name)) => format!("<b>{}</b>", escape_html(name)),
        (None, None) => format!("<code>{}</code>", escape_html(pool_id)),
    }
}

fn wallet_label(address: &str, enrichment: &Enrichment) -> String {
    match &enrichment.wallet_name {
        Some(name) => format!("{} (<code>{}</code>)", escape_html(name), short_address(address)),
        None => format!("<code>{}</code>", short_address(address)),
    }
}

fn market_lines(text: &mut String, enrichment: &Enrichment) {
    if let Some(price) = enrichment.token.as_ref().and_then(|t| t.price_btc) {
        let _ = writeln!(text, "Price: {}", btc(price));
    }
    if let Some(cap) = enrichment.market_cap_btc {
        let _ = writeln!(text, "MCap: {}", btc(cap));
    }
}

fn format_swap(swap: &SwapRecord, enrichment: &Enrichment) -> String {
    let mut text = String::new();
    let heading = match swap.side() {
        SwapSide::Buy => "🟢 BUY",
        SwapSide::Sell => "🔴 SELL",
        SwapSide::Ambiguous => "🔁 SWAP",
    };
    let _ = writeln!(
        text,
        "{} {}",
        heading,
        token_label(&swap.pool_id, enrichment, None)
    );
    let _ = writeln!(
        text,
        "{} tokens for {}",
        amount(swap.token_amount()),
        btc(swap.btc_value())
    );
    let _ = writeln!(text, "By: {}", wallet_label(&swap.swapper, enrichment));
    market_lines(&mut text, enrichment);
    text
}

fn format_holder_change(change: &HolderChange, enrichment: &Enrichment) -> String {
    let record = &change.record;
    let heading = match record.action {
        BalanceAction::Invested => "📈 Holder invested",
        BalanceAction::Sold => "📉 Holder sold",
        BalanceAction::Liquidated => "🚪 Holder exited",
    };

    let mut text = String::new();
    let _ = writeln!(
        text,
        "{} {}",
        heading,
        token_label(&change.pool_id, enrichment, Some(&change.ticker))
    );
    let _ = writeln!(text, "Wallet: {}", wallet_label(&change.address, enrichment));
    let sign = if record.delta.is_sign_negative() { "" } else { "+" };
    let _ = writeln!(text, "Change: {}{}", sign, amount(record.delta));
    let _ = writeln!(text, "Balance: {}", amount(record.amount));
    if !record.btc_value.is_zero() {
        let _ = writeln!(text, "Value: {}", btc(record.btc_value));
    }
    market_lines(&mut text, enrichment);
    text
}

fn format_hot_token(activity: &PoolActivity, enrichment: &Enrichment) -> String {
    let mut text = String::new();
    let _ = writeln!(
        text,
        "🔥 Hot token {}",
        token_label(&activity.pool_id, enrichment, None)
    );
    let _ = writeln!(
        text,
        "{} swaps from {} wallets",
        activity.swap_count, activity.unique_addresses
    );
    let _ = writeln!(text, "Volume: {}", btc(activity.btc_volume));
    market_lines(&mut text, enrichment);
    text
}

fn format_report(report: &DailyReport) -> String {
    let flow = &report.flow;
    let mut text = String::new();
    let _ = writeln!(
        text,
        "📊 <b>{}</b> daily flow {}",
        escape_html(&report.ticker),
        report.date
    );
    let _ = writeln!(text, "Buys: {} ({})", flow.buys, btc(flow.btc_bought));
    let _ = writeln!(text, "Sells: {} ({})", flow.sells, btc(flow.btc_sold));
    let net = report.net_btc();
    let sign = if net.is_sign_negative() { "" } else { "+" };
    let _ = writeln!(text, "Net: {}{}", sign, btc(net));
    let _ = writeln!(text, "Holders: {}", report.holders);
    text
}

fn truncate(mut text: String) -> String {
    let text_trimmed = text.trim_end().len();
    text.truncate(text_trimmed);
    if text.chars().count() > MAX_TEXT_LEN {
        text = text.chars().take(MAX_TEXT_LEN - 1).collect();
        text.push('…');
    }
    text
}

/// Build the message for an event
///
/// `pool_url_template` gets `{pool}` replaced to make a trade button. The
/// target is left empty for the dispatcher to fill per sink.
pub fn format_event(
    event: &NotificationEvent,
    enrichment: &Enrichment,
    pool_url_template: Option<&str>,
) -> OutgoingMessage {
    let text = match event {
        NotificationEvent::Swap(swap) => format_swap(swap, enrichment),
        NotificationEvent::HolderChange(change) => format_holder_change(change, enrichment),
        NotificationEvent::HotToken(activity) => format_hot_token(activity, enrichment),
        NotificationEvent::DailyReport(report) => format_report(report),
    };

    let buttons = match (event.pool_id(), pool_url_template) {
        (Some(pool), Some(template)) => vec![MessageButton {
            label: "Trade".to_string(),
            url: template.replace("{pool}", pool),
        }],
        _ => Vec::new(),
    };

    OutgoingMessage {
        text: truncate(text),
        target: String::new(),
        media_url: enrichment.token.as_ref().and_then(|t| t.image_url.clone()),
        buttons,
    }
}
