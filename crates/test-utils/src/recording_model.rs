use std::sync::{Arc, Mutex};

use loopdag::sim::LoopModel;

/// One body job run as seen by [`RecordingModel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRun {
    pub job: String,
    pub iteration: u32,
    /// State the job received (hydrated or threaded from a sibling).
    pub state_in: String,
}

/// A fake loop model that:
/// - records every body job run and the state it received
/// - publishes `"<previous state>|<job>#<iteration>"`
/// - reports the predicate satisfied once `iteration >= satisfy_at`.
pub struct RecordingModel {
    satisfy_at: Option<u32>,
    runs: Arc<Mutex<Vec<RecordedRun>>>,
}

impl RecordingModel {
    pub fn new(satisfy_at: Option<u32>, runs: Arc<Mutex<Vec<RecordedRun>>>) -> Self {
        Self { satisfy_at, runs }
    }
}

impl LoopModel for RecordingModel {
    fn run_job(
        &mut self,
        _loop_name: &str,
        job: &str,
        iteration: u32,
        state: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        let state_in = String::from_utf8_lossy(state).into_owned();
        {
            let mut guard = self.runs.lock().unwrap();
            guard.push(RecordedRun {
                job: job.to_string(),
                iteration,
                state_in: state_in.clone(),
            });
        }
        Ok(format!("{state_in}|{job}#{iteration}").into_bytes())
    }

    fn guard_satisfied(&mut self, _loop_name: &str, _until: &str, iteration: u32, _state: &[u8]) -> bool {
        self.satisfy_at.is_some_and(|at| iteration >= at)
    }
}
