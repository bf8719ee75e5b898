//! Bundled technical strategies.
//!
//! Each is built from a `StrategyDescriptor` by the registry and reports
//! scores on a 0–100 scale (normalized by the merge engine).

pub mod rsi;
pub mod three_ma;
pub mod volume_breakout;

pub use rsi::RsiReversal;
pub use three_ma::ThreeMaBullish;
pub use volume_breakout::VolumeBreakout;

use crate::registry::ResolutionError;

/// Shared check that a period parameter is usable.
pub(crate) fn require_period(
    strategy: &str,
    parameter: &str,
    value: usize,
) -> Result<usize, ResolutionError> {
    if value == 0 {
        return Err(ResolutionError::InvalidParameter {
            name: strategy.to_string(),
            parameter: parameter.to_string(),
            reason: "period must be >= 1".into(),
        });
    }
    Ok(value)
}

/// Test fixtures shared by the strategy modules.
#[cfg(test)]
pub(crate) mod fixtures {
    use crate::domain::Bar;
    use crate::strategy::EntityInput;

    pub fn input(closes: &[f64], volumes: &[f64]) -> EntityInput {
        let base = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let bars = closes
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(i, (&close, &volume))| {
                let open = if i == 0 { close } else { closes[i - 1] };
                Bar {
                    date: base + chrono::Duration::days(i as i64),
                    open,
                    high: open.max(close),
                    low: open.min(close),
                    close,
                    volume,
                }
            })
            .collect();
        EntityInput::new("600519", bars)
    }

    pub fn flat_volume(closes: &[f64]) -> EntityInput {
        input(closes, &vec![1000.0; closes.len()])
    }
}
