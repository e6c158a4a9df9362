//! Spike schedule files
//!
//! A schedule is a JSON array of `{"time": t, "key": k}` records. Order in the
//! file does not matter; events are sorted by time (stably) on load.

use std::path::Path;

use anyhow::Context;
use spyke_runtime::{SpikeEvent, SpikeSchedule};

use crate::error::CliResult;

/// Read a schedule file
pub fn load(path: &Path) -> CliResult<SpikeSchedule> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading spike schedule {}", path.display()))?;
    let events: Vec<SpikeEvent> = serde_json::from_str(&text)?;
    Ok(SpikeSchedule::new(events))
}

/// Write a schedule file
pub fn save(path: &Path, events: &[SpikeEvent]) -> CliResult<()> {
    let text = serde_json::to_string_pretty(events)?;
    std::fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_sorts_by_time() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spikes.json");
        save(
            &path,
            &[
                SpikeEvent { time: 3, key: 1 },
                SpikeEvent { time: 0, key: 2 },
                SpikeEvent { time: 3, key: 0 },
            ],
        )
        .unwrap();

        let schedule = load(&path).unwrap();
        assert_eq!(schedule.len(), 3);
        assert_eq!(schedule.at(0).len(), 1);
        let keys: Vec<u32> = schedule.at(3).iter().map(|e| e.key).collect();
        assert_eq!(keys, vec![1, 0]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(load(&dir.path().join("absent.json")).is_err());
    }
}
