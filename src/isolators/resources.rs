//! Resource isolators.
//!
//! Decides the cgroup values for CPU, memory and OOM score; applying them is
//! the supervisor's job. Quantities use the Kubernetes notation: decimal
//! suffixes (`m`, `k`, `M`, `G`, `T`, `P`, `E`), binary suffixes (`Ki` ..
//! `Ei`) and decimal fractions (`0.5`, `1.5Gi`). Values are rounded up.

use tracing::debug;

use crate::error::{Error, Result};
use crate::schema::{Isolator, ResourceLimits, RESOURCE_CPU, RESOURCE_MEMORY};

/// Parses a quantity into thousandths of its unit, rounding up.
pub fn parse_quantity_milli(raw: &str) -> std::result::Result<u128, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);
    if number.is_empty() || number == "." {
        return Err(format!("invalid quantity {raw:?}"));
    }

    let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
    if frac_part.contains('.') {
        return Err(format!("invalid quantity {raw:?}"));
    }
    let digits: u128 = format!("{int_part}{frac_part}")
        .parse()
        .map_err(|_| format!("invalid quantity {raw:?}"))?;
    let frac_scale = 10u128
        .checked_pow(frac_part.len() as u32)
        .ok_or_else(|| format!("too many decimals in {raw:?}"))?;

    // value = digits / frac_scale * num / den
    let (num, den): (u128, u128) = match suffix {
        "" => (1, 1),
        "m" => (1, 1000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        other => return Err(format!("unknown quantity suffix {other:?} in {raw:?}")),
    };

    let numerator = digits
        .checked_mul(num)
        .and_then(|v| v.checked_mul(1000))
        .ok_or_else(|| format!("quantity {raw:?} is too large"))?;
    let denominator = frac_scale
        .checked_mul(den)
        .ok_or_else(|| format!("quantity {raw:?} is too large"))?;
    Ok(numerator.div_ceil(denominator))
}

fn limit_of<'a>(name: &str, limits: &'a ResourceLimits) -> Option<&'a str> {
    let limit = limits.limit.as_deref();
    if limit.is_none() {
        debug!("Isolator {} has no limit, skipping", name);
    }
    limit
}

fn invalid(name: &str, reason: String) -> Error {
    Error::InvalidIsolator {
        name: name.to_string(),
        reason,
    }
}

/// Supervisor options for the resource isolators of an app, as
/// `(option, value)` pairs for the `[Service]` section.
pub fn resource_options(isolators: &[Isolator]) -> Result<Vec<(&'static str, String)>> {
    let mut options = Vec::new();

    for isolator in isolators {
        match isolator {
            Isolator::ResourceCpu(limits) => {
                let Some(limit) = limit_of(RESOURCE_CPU, limits) else {
                    continue;
                };
                let milli =
                    parse_quantity_milli(limit).map_err(|e| invalid(RESOURCE_CPU, e))?;
                // One full CPU is 100%.
                let percent = (milli / 10).max(1);
                options.push(("CPUQuota", format!("{percent}%")));
            }
            Isolator::ResourceMemory(limits) => {
                let Some(limit) = limit_of(RESOURCE_MEMORY, limits) else {
                    continue;
                };
                let milli =
                    parse_quantity_milli(limit).map_err(|e| invalid(RESOURCE_MEMORY, e))?;
                options.push(("MemoryLimit", milli.div_ceil(1000).to_string()));
            }
            Isolator::OomScoreAdj(adj) => {
                options.push(("OOMScoreAdjust", adj.to_string()));
            }
            _ => {}
        }
    }
    Ok(options)
}
