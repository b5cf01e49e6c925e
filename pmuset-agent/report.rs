//! Text and JSON rendering of decoded counter state
//!
//! Everything here works on already-decoded records and never touches a
//! register.

use serde_json::json;

use crate::error::Result;
use crate::orchestrator::{BatchReport, CoreReport, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn flag(set: bool, label: &'static str) -> &'static str {
    if set {
        label
    } else {
        "-"
    }
}

/// Aligned text tables, one block per core
pub fn render_table(reports: &[CoreReport]) -> String {
    let mut out = String::new();

    for (i, report) in reports.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let status = &report.status;
        let counters = report.counters.as_ref();

        out.push_str(&format!(
            "Core {}  IA32_PERF_GLOBAL_CTRL=0x{:016x}  IA32_FIXED_CTR_CTRL=0x{:016x}\n",
            report.core, status.global_ctrl, status.fixed_ctr_ctrl
        ));

        out.push_str(&format!(
            "  {:<3} {:<26} {:<7} {:<8} {:<6} {:<3}",
            "FIX", "Counter", "Enabled", "Rings", "AnyThr", "PMI"
        ));
        if counters.is_some() {
            out.push_str(&format!(" {:>20}", "Value"));
        }
        out.push('\n');

        for fixed in &status.fixed {
            out.push_str(&format!(
                "  {:<3} {:<26} {:<7} {:<8} {:<6} {:<3}",
                fixed.index,
                fixed.name,
                yes_no(fixed.enabled),
                fixed.mode.name(),
                yes_no(fixed.any_thread),
                yes_no(fixed.pmi)
            ));
            if let Some(values) = counters {
                out.push_str(&format!(" {:>20}", values.fixed[fixed.index]));
            }
            out.push('\n');
        }

        out.push_str(&format!(
            "  {:<3} {:<7} {:<18} {:<5} {:<5} {:<25} {:<26} {:<5}",
            "PMU", "Enabled", "IA32_PERFEVTSEL", "Event", "Umask", "Name", "Flags", "CMASK"
        ));
        if counters.is_some() {
            out.push_str(&format!(" {:>20}", "Value"));
        }
        out.push('\n');

        for pmu in &report.pmus {
            let f = &pmu.fields;
            let flags = [
                flag(f.usr, "USR"),
                flag(f.os, "OS"),
                flag(f.edge, "E"),
                flag(f.pc, "PC"),
                flag(f.int, "INT"),
                flag(f.any_thread, "ANY"),
                flag(f.enable, "EN"),
                flag(f.invert, "INV"),
            ]
            .join(" ");
            let enabled = status.pmu_enabled.get(pmu.index).copied().unwrap_or(false);

            out.push_str(&format!(
                "  {:<3} {:<7} 0x{:016x} 0x{:02x}  0x{:02x}  {:<25} {:<26} {:<5}",
                pmu.index,
                yes_no(enabled),
                pmu.raw,
                f.event_select,
                f.umask,
                pmu.event_name.unwrap_or("-"),
                flags,
                f.cmask
            ));
            if let Some(value) = counters.and_then(|c| c.pmu.get(pmu.index)) {
                out.push_str(&format!(" {value:>20}"));
            }
            out.push('\n');
        }
    }

    out
}

pub fn render_json(reports: &[CoreReport]) -> Result<String> {
    Ok(serde_json::to_string_pretty(reports)?)
}

pub fn render_inspection(reports: &[CoreReport], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(render_table(reports)),
        OutputFormat::Json => render_json(reports),
    }
}

/// Per-core outcome summary of a batch
pub fn render_batch(report: &BatchReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Table => {
            let mut out = String::new();
            for outcome in &report.outcomes {
                let detail = match &outcome.result {
                    Outcome::Applied(updates) => format!(
                        "{} of {} registers changed",
                        outcome.changed_registers(),
                        updates.len()
                    ),
                    Outcome::Failed(e) => e.to_string(),
                    Outcome::Skipped => "not attempted".to_string(),
                };
                out.push_str(&format!(
                    "Core {:<4} {:<8} {}\n",
                    outcome.core,
                    outcome.result.label(),
                    detail
                ));
            }
            out.push_str(&format!(
                "{} applied, {} failed, {} skipped\n",
                report.count("applied"),
                report.count("failed"),
                report.count("skipped")
            ));
            Ok(out)
        }
        OutputFormat::Json => {
            let cores: Vec<_> = report
                .outcomes
                .iter()
                .map(|outcome| match &outcome.result {
                    Outcome::Applied(updates) => json!({
                        "core": outcome.core,
                        "status": outcome.result.label(),
                        "updates": updates,
                    }),
                    Outcome::Failed(e) => json!({
                        "core": outcome.core,
                        "status": outcome.result.label(),
                        "error": e.to_string(),
                    }),
                    Outcome::Skipped => json!({
                        "core": outcome.core,
                        "status": outcome.result.label(),
                    }),
                })
                .collect();
            Ok(serde_json::to_string_pretty(&json!({
                "success": report.is_success(),
                "cores": cores,
            }))?)
        }
    }
}
