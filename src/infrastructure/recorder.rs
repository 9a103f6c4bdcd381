//! In-process trace recorder.
//!
//! Receives enter/instruction/return events from instrumented threads and
//! assembles one `ObservedMethod` tree per root invocation. Each thread has
//! its own call stack; completed roots are collected in completion order.
//! Export waits a bounded time for in-flight calls to unwind and then takes
//! a partial snapshot of whatever is still open.

use crate::domain::identifier::MethodIdentifier;
use crate::domain::trace::{InvocationKind, ObservedMethod, Trace, Value};
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Maximum time `export` waits for open call stacks to unwind.
    pub export_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            export_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(20),
        }
    }
}

/// Everything a recording session produced: finished traces plus anomalies
/// observed while recording (unmatched returns, forced partial snapshots).
#[derive(Debug)]
pub struct SessionSnapshot {
    pub traces: Vec<Trace>,
    pub anomalies: Vec<String>,
}

pub struct TraceRecorder {
    config: RecorderConfig,
    /// Per-thread stack of in-flight invocations, innermost last.
    open: DashMap<u64, Vec<ObservedMethod>>,
    finished: Mutex<Vec<(u64, ObservedMethod)>>,
    anomalies: Mutex<Vec<String>>,
}

impl TraceRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            open: DashMap::new(),
            finished: Mutex::new(Vec::new()),
            anomalies: Mutex::new(Vec::new()),
        }
    }

    pub fn enter_method(
        &self,
        thread: u64,
        kind: InvocationKind,
        identifier: MethodIdentifier,
        parameters: Vec<Value>,
    ) {
        self.open
            .entry(thread)
            .or_default()
            .push(ObservedMethod::new(kind, identifier, parameters));
    }

    pub fn record_instruction(&self, thread: u64, opcode: u16, offset: u32) {
        match self.open.get_mut(&thread).and_then(|mut stack| {
            stack.last_mut().map(|top| top.record_instruction(opcode, offset))
        }) {
            Some(()) => {}
            None => self.note_anomaly(format!(
                "instruction event on thread {thread} with no open invocation"
            )),
        }
    }

    /// Close the innermost invocation on `thread`. A finished non-root frame
    /// becomes a child call of its caller; a finished root is collected.
    pub fn record_return(&self, thread: u64, value: Value) {
        let finished_root = {
            let mut stack = match self.open.get_mut(&thread) {
                Some(stack) => stack,
                None => {
                    self.note_anomaly(format!(
                        "return event on thread {thread} with no open invocation"
                    ));
                    return;
                }
            };
            let mut frame = match stack.pop() {
                Some(frame) => frame,
                None => {
                    self.note_anomaly(format!(
                        "return event on thread {thread} with no open invocation"
                    ));
                    return;
                }
            };
            frame.return_value = value;
            match stack.last_mut() {
                Some(caller) => {
                    caller.record_call(frame);
                    None
                }
                None => Some(frame),
            }
        };
        if let Some(root) = finished_root {
            self.finished.lock().unwrap().push((thread, root));
        }
    }

    /// Wait for open stacks to unwind, then drain the session.
    ///
    /// Stacks that are still open after the timeout are folded into partial
    /// traces: every open frame keeps `NotReturned` as its return value and
    /// the forced snapshot is reported as an anomaly.
    pub fn export(&self) -> SessionSnapshot {
        let deadline = Instant::now() + self.config.export_timeout;
        while self.has_open_invocations() && Instant::now() < deadline {
            std::thread::sleep(self.config.poll_interval);
        }

        let stranded: Vec<u64> = self
            .open
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| *entry.key())
            .collect();
        for thread in stranded {
            if let Some((_, mut stack)) = self.open.remove(&thread) {
                let depth = stack.len();
                self.note_anomaly(format!(
                    "thread {thread} still had {depth} open invocation(s) at export; \
                     taking partial snapshot"
                ));
                // Fold inner frames into their callers, innermost first.
                while stack.len() > 1 {
                    let frame = stack.pop().unwrap();
                    stack.last_mut().unwrap().record_call(frame);
                }
                if let Some(root) = stack.pop() {
                    self.finished.lock().unwrap().push((thread, root));
                }
            }
        }
        self.open.clear();

        let finished = std::mem::take(&mut *self.finished.lock().unwrap());
        let traces = finished
            .into_iter()
            .enumerate()
            .map(|(n, (thread, root))| Trace::new(format!("thread-{thread}-{n}"), root))
            .collect();
        let anomalies = std::mem::take(&mut *self.anomalies.lock().unwrap());
        SessionSnapshot { traces, anomalies }
    }

    fn has_open_invocations(&self) -> bool {
        self.open.iter().any(|entry| !entry.value().is_empty())
    }

    fn note_anomaly(&self, message: String) {
        warn!("{message}");
        self.anomalies.lock().unwrap().push(message);
    }
}

impl Default for TraceRecorder {
    fn default() -> Self {
        Self::new(RecorderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trace::TraceEvent;
    use std::sync::Arc;

    fn fast_config() -> RecorderConfig {
        RecorderConfig {
            export_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_nested_calls_on_one_thread() {
        let recorder = TraceRecorder::new(fast_config());
        recorder.enter_method(1, InvocationKind::Method, "Main.run()V".into(), vec![]);
        recorder.record_instruction(1, 42, 0);
        recorder.enter_method(1, InvocationKind::Method, "Util.step()I".into(), vec![]);
        recorder.record_instruction(1, 4, 0);
        recorder.record_return(
            1,
            Value::Primitive {
                type_tag: "I".to_string(),
                repr: "5".to_string(),
            },
        );
        recorder.record_instruction(1, 177, 8);
        recorder.record_return(1, Value::Null);

        let snapshot = recorder.export();
        assert!(snapshot.anomalies.is_empty());
        assert_eq!(snapshot.traces.len(), 1);

        let root = &snapshot.traces[0].root;
        assert_eq!(root.identifier.as_str(), "Main.run()V");
        assert_eq!(root.children.len(), 1);
        // Instruction, call marker, instruction, in event order.
        assert_eq!(
            root.events,
            vec![
                TraceEvent::Instruction { opcode: 42, offset: 0 },
                TraceEvent::Call { child: 0 },
                TraceEvent::Instruction { opcode: 177, offset: 8 },
            ]
        );
    }

    #[test]
    fn test_threads_record_independently() {
        let recorder = Arc::new(TraceRecorder::new(fast_config()));
        let handles: Vec<_> = (0..4u64)
            .map(|tid| {
                let recorder = Arc::clone(&recorder);
                std::thread::spawn(move || {
                    let id = format!("Worker{tid}.run()V");
                    recorder.enter_method(tid, InvocationKind::Method, id.as_str().into(), vec![]);
                    recorder.record_instruction(tid, 1, 0);
                    recorder.record_return(tid, Value::Null);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = recorder.export();
        assert!(snapshot.anomalies.is_empty());
        assert_eq!(snapshot.traces.len(), 4);
        for trace in &snapshot.traces {
            assert!(trace.root.children.is_empty());
        }
    }

    #[test]
    fn test_export_timeout_takes_partial_snapshot() {
        let recorder = TraceRecorder::new(fast_config());
        recorder.enter_method(7, InvocationKind::Method, "Stuck.run()V".into(), vec![]);
        recorder.enter_method(7, InvocationKind::Method, "Stuck.inner()V".into(), vec![]);

        let snapshot = recorder.export();
        assert_eq!(snapshot.anomalies.len(), 1);
        assert_eq!(snapshot.traces.len(), 1);

        let root = &snapshot.traces[0].root;
        assert_eq!(root.identifier.as_str(), "Stuck.run()V");
        assert_eq!(root.return_value, Value::NotReturned);
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].return_value, Value::NotReturned);
    }

    #[test]
    fn test_unmatched_return_is_an_anomaly() {
        let recorder = TraceRecorder::new(fast_config());
        recorder.record_return(3, Value::Null);

        let snapshot = recorder.export();
        assert!(snapshot.traces.is_empty());
        assert_eq!(snapshot.anomalies.len(), 1);
    }
}
