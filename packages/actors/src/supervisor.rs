//! Supervisor actor owning the coordinator and its tick.

use std::marker::PhantomData;
use std::time::Duration;

use db::JobStore;
use queue_core::{Clock, JobEvent, QueueConfig};
use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::client::CoordinatorClient;
use crate::coordinator::{CoordinatorActor, CoordinatorArgs};
use crate::messages::{CoordinatorError, CoordinatorMessage, SupervisorMessage};

/// State for the supervisor actor.
pub struct SupervisorState {
    /// The supervised coordinator.
    coordinator: ActorRef<CoordinatorMessage>,
    /// Task sending `Tick` every tick interval.
    ticker: Option<JoinHandle<()>>,
}

/// Supervisor actor that owns the coordinator.
///
/// Every tick it asks the coordinator to sweep stalled leases. If the
/// coordinator dies the supervisor stops too, so the process can exit
/// instead of silently serving nothing.
pub struct Supervisor<S>(PhantomData<fn() -> S>);

impl<S> Supervisor<S> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<S> Default for Supervisor<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_ticker(myself: ActorRef<SupervisorMessage>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if myself.send_message(SupervisorMessage::Tick).is_err() {
                break;
            }
        }
    })
}

impl<S: JobStore> Actor for Supervisor<S> {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = CoordinatorArgs<S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting job queue supervisor");

        let period = args.config.tick_interval();
        let (coordinator, _handle) =
            Actor::spawn_linked(None, CoordinatorActor::<S>::new(), args, myself.get_cell())
                .await
                .map_err(|e| {
                    ActorProcessingErr::from(format!("Failed to spawn coordinator: {}", e))
                })?;

        Ok(SupervisorState {
            coordinator,
            ticker: Some(spawn_ticker(myself, period)),
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::GetCoordinator { reply } => {
                let _ = reply.send(state.coordinator.clone());
            }

            SupervisorMessage::Tick => {
                if let Err(e) = state
                    .coordinator
                    .send_message(CoordinatorMessage::SweepStalled { reply: None })
                {
                    tracing::warn!("Failed to request stall sweep: {}", e);
                }
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down supervisor");
                // Stops once the coordinator reports termination.
                if state
                    .coordinator
                    .send_message(CoordinatorMessage::Shutdown)
                    .is_err()
                {
                    myself.stop(None);
                }
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(ticker) = state.ticker.take() {
            ticker.abort();
        }
        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorTerminated(cell, _, reason)
                if cell.get_id() == state.coordinator.get_id() =>
            {
                tracing::info!("Coordinator terminated: {:?}", reason);
                myself.stop(reason);
            }
            SupervisionEvent::ActorFailed(cell, error)
                if cell.get_id() == state.coordinator.get_id() =>
            {
                tracing::error!("Coordinator failed: {}", error);
                myself.stop(Some(format!("coordinator failed: {}", error)));
            }
            _ => {}
        }
        Ok(())
    }
}

/// A running supervisor and coordinator pair.
pub struct CoordinatorHandle {
    supervisor: ActorRef<SupervisorMessage>,
    coordinator: ActorRef<CoordinatorMessage>,
    event_tx: broadcast::Sender<JobEvent>,
    join: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Client for calling the coordinator.
    pub fn client(&self) -> CoordinatorClient {
        CoordinatorClient::new(self.coordinator.clone())
    }

    pub fn coordinator(&self) -> &ActorRef<CoordinatorMessage> {
        &self.coordinator
    }

    /// Subscribe to job and worker events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the coordinator, then wait for the supervisor to exit.
    pub async fn shutdown(self) {
        let _ = self.supervisor.send_message(SupervisorMessage::Shutdown);
        if let Err(e) = self.join.await {
            tracing::warn!("Supervisor task ended abnormally: {}", e);
        }
    }

    /// Wait until the supervisor stops on its own.
    pub async fn wait(self) {
        let _ = self.join.await;
    }
}

/// Start a supervisor and coordinator over `store`.
pub async fn start_coordinator<S: JobStore>(
    store: S,
    config: QueueConfig,
    clock: Clock,
) -> Result<CoordinatorHandle, CoordinatorError> {
    let args = CoordinatorArgs::new(store)
        .with_config(config)
        .with_clock(clock);
    let event_tx = args.event_tx.clone();

    let (supervisor, join) = Actor::spawn(None, Supervisor::<S>::new(), args)
        .await
        .map_err(|e| CoordinatorError::Actor(format!("Failed to spawn supervisor: {}", e)))?;

    let coordinator = match ractor::rpc::call(
        &supervisor,
        |reply| SupervisorMessage::GetCoordinator { reply },
        Some(Duration::from_secs(5)),
    )
    .await
    {
        Ok(ractor::rpc::CallResult::Success(coordinator)) => coordinator,
        _ => {
            supervisor.stop(None);
            return Err(CoordinatorError::Actor(
                "Supervisor did not report its coordinator".into(),
            ));
        }
    };

    Ok(CoordinatorHandle {
        supervisor,
        coordinator,
        event_tx,
        join,
    })
}
