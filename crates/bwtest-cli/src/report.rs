//! Result reporting: styled text tables, JSON and CSV.

use bwtest_core::{DeviceTiming, RunSummary, SizeResult, Transaction};
use bwtest_hsa::{AccessMode, Topology};
use clap::ValueEnum;
use console::style;
use serde::Serialize;
use std::io::{self, Write};
use std::time::Duration;

/// Output format of the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    Csv,
}

/// Everything written by a JSON report.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub version: &'static str,
    pub summary: RunSummary,
    pub exit_code: i32,
    pub transactions: &'a [Transaction],
}

impl<'a> Report<'a> {
    pub fn new(summary: RunSummary, transactions: &'a [Transaction]) -> Self {
        Self { version: env!("CARGO_PKG_VERSION"), summary, exit_code: summary.exit_code(), transactions }
    }

    pub fn write(&self, format: ReportFormat, output: &mut dyn Write) -> io::Result<()> {
        match format {
            ReportFormat::Text => self.write_text(output),
            ReportFormat::Json => {
                serde_json::to_writer_pretty(&mut *output, self).map_err(io::Error::other)?;
                writeln!(output)
            }
            ReportFormat::Csv => self.write_csv(output),
        }
    }

    fn write_text(&self, output: &mut dyn Write) -> io::Result<()> {
        writeln!(output, "\n{}", style("Copy Bandwidth Results").bold().cyan())?;
        writeln!(output, "======================")?;

        for trans in self.transactions {
            writeln!(output)?;
            writeln!(
                output,
                "{} pool {} -> pool {}",
                style(trans.kind.to_string()).bold(),
                trans.src_pool,
                trans.dst_pool
            )?;
            writeln!(
                output,
                "  {:>12}  {:>12}  {:>12}  {:>12}  {:>12}",
                "Size (B)", "Time (us)", "BW (GB/s)", "Dev (us)", "Dev (GB/s)"
            )?;
            for result in &trans.results {
                write_row(output, result)?;
            }
            if !trans.verify {
                writeln!(output, "  {} data mismatch detected", style("✗").red())?;
            }
        }

        writeln!(output)?;
        writeln!(output, "{}", style("Summary:").bold())?;
        writeln!(output, "  Transactions: {}", self.summary.transactions)?;
        writeln!(output, "  Failed validations: {}", self.summary.failed_validations)?;
        let status = if self.exit_code == 0 {
            style("PASS".to_string()).green()
        } else {
            style(format!("FAIL (exit {})", self.exit_code)).red()
        };
        writeln!(output, "  Status: {status}")?;
        Ok(())
    }

    fn write_csv(&self, output: &mut dyn Write) -> io::Result<()> {
        writeln!(
            output,
            "kind,src_pool,dst_pool,size,iterations,wall_us,wall_gbps,device_min_us,device_mean_us,device_gbps,verify"
        )?;
        for trans in self.transactions {
            for r in &trans.results {
                let bw = r.bandwidth;
                writeln!(
                    output,
                    "{},{},{},{},{},{:.3},{},{},{},{},{}",
                    serde_plain_kind(trans),
                    trans.src_pool,
                    trans.dst_pool,
                    r.size,
                    r.iterations,
                    micros(r.wall_mean),
                    bw.map(|b| format!("{:.3}", b.wall_gbps)).unwrap_or_default(),
                    r.device.min().map(|d| format!("{:.3}", micros(d))).unwrap_or_default(),
                    r.device.mean().map(|d| format!("{:.3}", micros(d))).unwrap_or_default(),
                    bw.and_then(|b| b.device_gbps).map(|g| format!("{g:.3}")).unwrap_or_default(),
                    r.validation.is_none_or(|c| c.is_match()),
                )?;
            }
        }
        Ok(())
    }
}

fn write_row(output: &mut dyn Write, r: &SizeResult) -> io::Result<()> {
    let wall_gbps = r.bandwidth.map(|b| format!("{:.3}", b.wall_gbps)).unwrap_or_else(na);
    let (dev_time, dev_gbps) = match r.device {
        DeviceTiming::Measured { mean, .. } => (
            format!("{:.3}", micros(mean)),
            r.bandwidth.and_then(|b| b.device_gbps).map(|g| format!("{g:.3}")).unwrap_or_else(na),
        ),
        DeviceTiming::Unavailable | DeviceTiming::NotCaptured => (na(), na()),
    };
    writeln!(
        output,
        "  {:>12}  {:>12.3}  {:>12}  {:>12}  {:>12}",
        r.size,
        micros(r.wall_mean),
        wall_gbps,
        dev_time,
        dev_gbps
    )
}

fn na() -> String {
    "N/A".to_string()
}

fn micros(d: Duration) -> f64 {
    d.as_secs_f64() * 1e6
}

/// The kind's serialized name, e.g. `copy-unidir`.
fn serde_plain_kind(trans: &Transaction) -> String {
    serde_json::to_value(trans.kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_else(|| trans.kind.to_string())
}

/// Print agents, pools and the accessibility matrix.
pub fn write_topology(topology: &Topology, output: &mut dyn Write) -> io::Result<()> {
    writeln!(output, "{}", style("Agents:").bold())?;
    for agent in topology.agents() {
        writeln!(output, "  [{}] {} ({})", agent.index, agent.name, agent.kind)?;
    }
    writeln!(output, "{}", style("Pools:").bold())?;
    for pool in topology.pools() {
        writeln!(
            output,
            "  [{}] agent {} {} {} bytes",
            pool.index, pool.owner, pool.tier, pool.capacity
        )?;
    }
    writeln!(output, "{}", style("Access (consumer x owner):").bold())?;
    let n = topology.access().agent_count();
    for consumer in 0..n {
        let row: Vec<String> = (0..n)
            .map(|owner| match topology.access().get(consumer, owner) {
                AccessMode::None => "-".to_string(),
                AccessMode::Direct => "D".to_string(),
                AccessMode::IndirectViaHost => "I".to_string(),
            })
            .collect();
        writeln!(output, "  {}", row.join(" "))?;
    }
    Ok(())
}
