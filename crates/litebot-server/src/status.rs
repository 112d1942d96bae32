//! Tick-rate metric derived from an RCON MSPT query.

/// Carpet script averaging the last 100 tick times, in milliseconds.
pub const MSPT_COMMAND: &str = "script run reduce(last_tick_times(),_a+_,0)/100";

/// Ticks per second a healthy server runs at.
pub const TARGET_TPS: f64 = 20.0;

const TICK_BUDGET_MS: f64 = 1000.0 / TARGET_TPS;

/// First number in an RCON reply such as ` = 12.34567`.
pub fn parse_mspt(response: &str) -> Option<f64> {
    response
        .split(|c: char| c.is_whitespace() || c == '=' || c == ',')
        .filter(|token| !token.is_empty())
        .find_map(|token| token.parse::<f64>().ok())
        .filter(|mspt| mspt.is_finite() && *mspt >= 0.0)
}

/// A tick at or under budget means full speed; otherwise `1000 / mspt`
/// rounded to one decimal.
pub fn tps_from_mspt(mspt: f64) -> f64 {
    if mspt <= TICK_BUDGET_MS {
        TARGET_TPS
    } else {
        (1000.0 / mspt * 10.0).round() / 10.0
    }
}
