// src/sim/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::errors::Result;
use crate::state::StateStore;

use super::core::CoreSimulator;
use super::{LoopModel, SimCommand, SimEvent};

/// Async shell around [`CoreSimulator`].
///
/// Reads [`SimEvent`]s from a channel and feeds them to the core. A
/// `Trigger` command goes back onto the channel as a new request, the way a
/// scheduler would start a fresh workflow run; `Finish` is reported back the
/// same way.
pub struct SimRuntime<S: StateStore, M: LoopModel> {
    core: CoreSimulator<S, M>,
    event_tx: mpsc::Sender<SimEvent>,
    event_rx: mpsc::Receiver<SimEvent>,
}

impl<S: StateStore, M: LoopModel> fmt::Debug for SimRuntime<S, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimRuntime")
            .field("loop", &self.core.phase_set().construct)
            .field("invocations", &self.core.trace().len())
            .finish_non_exhaustive()
    }
}

impl<S: StateStore, M: LoopModel> SimRuntime<S, M> {
    /// `event_tx` must feed `event_rx`; the runtime uses it to re-trigger.
    pub fn new(
        core: CoreSimulator<S, M>,
        event_tx: mpsc::Sender<SimEvent>,
        event_rx: mpsc::Receiver<SimEvent>,
    ) -> Self {
        Self {
            core,
            event_tx,
            event_rx,
        }
    }

    /// Run until the core asks to stop or the channel closes. Returns the
    /// core so callers can inspect its trace and store.
    pub async fn run(mut self) -> Result<CoreSimulator<S, M>> {
        info!(loop_name = %self.core.phase_set().construct, "simulation started");

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("simulation event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "simulator received event");
            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command).await?;
            }

            if !step.keep_running {
                info!("simulator requested exit; stopping");
                break;
            }
        }

        Ok(self.core)
    }

    async fn execute_command(&mut self, command: SimCommand) -> Result<()> {
        match command {
            SimCommand::Trigger { inputs } => {
                debug!(iteration = inputs.iteration, key = %inputs.key, "re-triggering workflow");
                self.send(SimEvent::InvocationRequested { inputs }).await?;
            }
            SimCommand::Finish { invocation } => {
                self.send(SimEvent::InvocationFinished { invocation }).await?;
            }
            SimCommand::RequestExit => {
                info!("simulator issued RequestExit command");
            }
        }
        Ok(())
    }

    async fn send(&self, event: SimEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|e| anyhow::anyhow!("simulation channel closed: {e}"))?;
        Ok(())
    }
}
