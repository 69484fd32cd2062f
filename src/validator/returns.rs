//! Simulated trading returns over a fold
//!
//! Walks the fold in order against a two-asset ledger and reports the
//! final mark-to-market value in ETH. Signals only act when they differ
//! from the previous acted-on signal, with one exception: an EMA8/EMA55
//! downward crossover between consecutive samples forces a SELL evaluation
//! whatever the label says. That stop-loss rule is independent of the
//! classifier's output and materially changes the metric.

use crate::data::{Action, Sample};
use crate::error::{Error, Result};

/// Exchange fee applied on both sides of a conversion
const FEES: f64 = 0.001;
/// Fraction of current ETH converted on a BUY
const BUY_AMOUNT: f64 = 0.1;
/// Starting capital
const STARTING_ETH: f64 = 5.0;

struct Ledger {
    eth: f64,
    units: f64,
}

impl Ledger {
    fn new() -> Self {
        Self {
            eth: STARTING_ETH,
            units: 0.0,
        }
    }

    fn operate(&mut self, action: Action, price: f64) {
        match action {
            Action::Buy if self.eth > 0.0 => {
                self.units += (self.eth * BUY_AMOUNT) / (price + price * FEES);
                self.eth -= self.eth * BUY_AMOUNT;
            }
            Action::Sell => {
                self.eth += self.units * (price - price * FEES);
                self.units = 0.0;
            }
            _ => {}
        }
    }

    fn value(&self, price: f64) -> f64 {
        self.eth + self.units * price
    }
}

struct Row {
    close: f64,
    ema8: f64,
    ema55: f64,
    action: Action,
}

fn row(sample: &Sample) -> Result<Row> {
    let close = sample.require_number("close")?;
    let (Some(ema8), Some(ema55)) = (sample.number("EMA8"), sample.number("EMA55")) else {
        return Err(Error::MissingProperty("EMA".to_string()));
    };
    Ok(Row {
        close,
        ema8,
        ema55,
        action: sample.action,
    })
}

/// Simulate trading the fold's signals and report the final portfolio
/// value in ETH. Every sample must define `close`, `EMA8` and `EMA55`;
/// that is checked up front, before any trade is evaluated.
pub fn calculate_returns(samples: &[Sample]) -> Result<f64> {
    let rows: Vec<Row> = samples.iter().map(row).collect::<Result<_>>()?;

    let mut ledger = Ledger::new();
    let mut previous_action = Action::Nothing;

    for (i, current) in rows.iter().enumerate() {
        let stop_loss = i > 0 && {
            let previous = &rows[i - 1];
            previous.ema8 > previous.ema55 && current.ema8 < current.ema55
        };
        let action = if stop_loss { Action::Sell } else { current.action };

        if stop_loss || action != previous_action {
            ledger.operate(action, current.close);
            previous_action = action;
        }
    }

    let last_close = rows.last().map_or(0.0, |r| r.close);
    Ok(ledger.value(last_close))
}
