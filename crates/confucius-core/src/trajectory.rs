//! JSONL trajectory recorder for Ralph sessions.
//!
//! Each line is one `Record`: a millisecond timestamp, an event name and a
//! JSON payload. A session produces `_meta.loop_start`, one
//! `ralph.iteration` per outer iteration and a closing `_meta.termination`.

use crate::orchestrator::RunResult;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A timestamped record in the JSONL trajectory file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Unix timestamp in milliseconds.
    pub ts: u64,

    /// Event discriminator, e.g. `ralph.iteration`.
    pub event: String,

    pub data: serde_json::Value,
}

impl Record {
    pub fn new(event: impl Into<String>, data: impl Serialize) -> Self {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self {
            ts,
            event: event.into(),
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn loop_start(session_id: &str, task: &str, completion_promise: &str, max_iterations: u32) -> Self {
        Self::new(
            "_meta.loop_start",
            serde_json::json!({
                "session_id": session_id,
                "task": task,
                "completion_promise": completion_promise,
                "max_iterations": max_iterations,
            }),
        )
    }

    pub fn iteration(iteration: u32, elapsed_ms: u64, result: &RunResult) -> Self {
        Self::new(
            "ralph.iteration",
            serde_json::json!({
                "n": iteration,
                "elapsed_ms": elapsed_ms,
                "result": result,
            }),
        )
    }

    pub fn termination(reason: &str, iterations: u32, total_inner: u32, elapsed_secs: f64) -> Self {
        Self::new(
            "_meta.termination",
            serde_json::json!({
                "reason": reason,
                "iterations": iterations,
                "total_orchestrator_iterations": total_inner,
                "elapsed_secs": elapsed_secs,
            }),
        )
    }
}

/// Writes records as JSON lines, one write per record.
pub struct TrajectoryRecorder<W> {
    writer: Mutex<W>,
    start_time: Instant,
}

impl<W: Write> TrajectoryRecorder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            start_time: Instant::now(),
        }
    }

    /// Appends one record. Write failures are ignored so recording never
    /// interrupts a run.
    pub fn record(&self, record: &Record) {
        if let Ok(mut writer) = self.writer.lock()
            && let Ok(json) = serde_json::to_string(record)
        {
            let _ = writeln!(writer, "{json}");
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn flush(&self) -> io::Result<()> {
        self.writer
            .lock()
            .map_err(|_| io::Error::other("failed to acquire writer lock"))?
            .flush()
    }

    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::TerminationReason;

    fn sample_result() -> RunResult {
        RunResult {
            success: true,
            iterations: 2,
            final_output: "TASK_COMPLETE".to_string(),
            actions: Vec::new(),
            termination: TerminationReason::CompletionSignal,
            outputs: vec!["TASK_COMPLETE".to_string()],
        }
    }

    #[test]
    fn test_records_one_json_line_each() {
        let recorder = TrajectoryRecorder::new(Vec::new());
        recorder.record(&Record::loop_start("s1", "build it", "TASK_COMPLETE", 5));
        recorder.record(&Record::iteration(1, 12, &sample_result()));
        recorder.record(&Record::termination("completion_promise", 1, 2, 0.5));

        let output = String::from_utf8(recorder.into_inner()).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 3);

        let first: Record = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.event, "_meta.loop_start");
        assert_eq!(first.data["session_id"], "s1");

        let second: Record = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.event, "ralph.iteration");
        assert_eq!(second.data["result"]["termination"], "completion_signal");
        assert_eq!(second.data["result"]["iterations"], 2);

        let third: Record = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(third.data["total_orchestrator_iterations"], 2);
    }
}
