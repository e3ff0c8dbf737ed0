//! `pushwarden replay`: run a scenario through the dispatch table.
//!
//! Useful for tuning thresholds: point `--config` at a candidate file and see
//! which actions each transition would produce.

use anyhow::Context;
use pushwarden_core::LivenessConfig;
use pushwarden_core::scenario::{Scenario, replay};

use crate::cli::ReplayOpts;

pub fn cmd_replay(config: &LivenessConfig, opts: &ReplayOpts) -> anyhow::Result<i32> {
    let raw = std::fs::read_to_string(&opts.file)
        .with_context(|| format!("failed to read {}", opts.file.display()))?;
    let scenario: Scenario = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", opts.file.display()))?;

    // A config embedded in the scenario wins over the CLI one.
    let effective = scenario.config.clone().unwrap_or_else(|| config.clone());
    effective.validate()?;
    let report = replay(&scenario, &effective);
    println!("{}", serde_json::to_string_pretty(&report)?);

    let mismatches = report.mismatches().count();
    if mismatches > 0 {
        tracing::warn!(scenario = %report.name, mismatches, "planned actions differ from expectations");
        if opts.strict {
            return Ok(1);
        }
    }
    Ok(0)
}
