//! `cobot status` — running state from the PID file and /proc.

use serde_json::json;

use super::pid::{pid_file_path, read_pid};

/// Seconds since the process with `pid` started, via /proc.
fn uptime_seconds(pid: u32) -> Option<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // Field 22 is starttime in clock ticks; fields 1..2 may contain
    // spaces inside parens, so count from the closing paren.
    let after_comm = stat.rfind(')')?;
    let fields: Vec<&str> = stat[after_comm + 1..].split_whitespace().collect();
    let starttime_ticks: u64 = fields.get(19)?.parse().ok()?;

    let uptime_raw = std::fs::read_to_string("/proc/uptime").ok()?;
    let system_uptime: f64 = uptime_raw.split_whitespace().next()?.parse().ok()?;

    let ticks_per_sec = 100u64; // SC_CLK_TCK on virtually all Linux builds
    let process_age = system_uptime - (starttime_ticks as f64 / ticks_per_sec as f64);
    Some(process_age.max(0.0) as u64)
}

pub fn status(as_json: bool) -> anyhow::Result<()> {
    let pid = read_pid(&pid_file_path());
    let uptime = pid.and_then(uptime_seconds);

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "running": pid.is_some(),
                "pid": pid,
                "uptime_seconds": uptime,
            }))?
        );
        return Ok(());
    }

    println!("Cobot Status");
    println!("------------");
    match pid {
        Some(pid) => {
            println!("State:    Running (PID {pid})");
            if let Some(uptime) = uptime {
                let hours = uptime / 3600;
                let mins = (uptime % 3600) / 60;
                println!("Uptime:   {hours}h {mins}m");
            }
        }
        None => println!("State:    Not running"),
    }
    Ok(())
}
