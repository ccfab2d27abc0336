//! Migration stages and the transition table

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error};

use crate::error::MigrationError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MigrationStage {
    Ready,
    Preparing,
    SendJoinRequest,
    Joined,
    SetUpSubscriber,
    RestartIce,
    WaitingSubscriberOffer,
    SetPublisher,
    SetPublisherAnswer,
    PublishLocalTracks,
    Completed,
    Error(String),
}

/// The order every successful migration walks through
pub const STAGE_SEQUENCE: &[MigrationStage] = &[
    MigrationStage::Ready,
    MigrationStage::Preparing,
    MigrationStage::SendJoinRequest,
    MigrationStage::Joined,
    MigrationStage::SetUpSubscriber,
    MigrationStage::RestartIce,
    MigrationStage::WaitingSubscriberOffer,
    MigrationStage::SetPublisher,
    MigrationStage::SetPublisherAnswer,
    MigrationStage::PublishLocalTracks,
    MigrationStage::Completed,
];

impl MigrationStage {
    pub fn name(&self) -> &'static str {
        match self {
            MigrationStage::Ready => "ready",
            MigrationStage::Preparing => "preparing",
            MigrationStage::SendJoinRequest => "sendJoinRequest",
            MigrationStage::Joined => "joined",
            MigrationStage::SetUpSubscriber => "setUpSubscriber",
            MigrationStage::RestartIce => "restartICE",
            MigrationStage::WaitingSubscriberOffer => "waitingSubscriberOffer",
            MigrationStage::SetPublisher => "setPublisher",
            MigrationStage::SetPublisherAnswer => "setPublisherAnswer",
            MigrationStage::PublishLocalTracks => "publishLocalTracks",
            MigrationStage::Completed => "completed",
            MigrationStage::Error(_) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationStage::Completed | MigrationStage::Error(_))
    }

    fn position(&self) -> Option<usize> {
        STAGE_SEQUENCE.iter().position(|stage| stage == self)
    }

    /// The only stage this one may be entered from
    pub fn predecessor(&self) -> Option<&'static MigrationStage> {
        let index = self.position()?;
        index.checked_sub(1).map(|i| &STAGE_SEQUENCE[i])
    }

    fn successor(&self) -> Option<MigrationStage> {
        let index = self.position()?;
        STAGE_SEQUENCE.get(index + 1).cloned()
    }
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationStage::Error(reason) => write!(f, "error({reason})"),
            stage => f.write_str(stage.name()),
        }
    }
}

/// What a stage handler or the inbound event hook reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    /// The stage's own work finished
    Advance,
    /// The SFU sent the subscriber offer
    SubscriberOffer,
    Failed(String),
}

impl StageEvent {
    fn name(&self) -> &'static str {
        match self {
            StageEvent::Advance => "advance",
            StageEvent::SubscriberOffer => "subscriberOffer",
            StageEvent::Failed(_) => "failed",
        }
    }
}

/// Next stage for `event` in `stage`, or `None` when the pair is not allowed.
///
/// `WaitingSubscriberOffer` never advances on its own; only the subscriber
/// offer moves it on. Terminal stages accept nothing.
pub fn transition(stage: &MigrationStage, event: &StageEvent) -> Option<MigrationStage> {
    match (stage, event) {
        (stage, _) if stage.is_terminal() => None,
        (_, StageEvent::Failed(reason)) => Some(MigrationStage::Error(reason.clone())),
        (MigrationStage::WaitingSubscriberOffer, StageEvent::SubscriberOffer) => {
            Some(MigrationStage::SetPublisher)
        }
        (_, StageEvent::SubscriberOffer) => None,
        (MigrationStage::WaitingSubscriberOffer, StageEvent::Advance) => None,
        (stage, StageEvent::Advance) => stage.successor(),
    }
}

/// Holds the current stage. [`StageSlot::apply`] is the only way to change it.
#[derive(Debug)]
pub struct StageSlot {
    stage: watch::Sender<MigrationStage>,
}

impl Default for StageSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl StageSlot {
    pub fn new() -> Self {
        let (stage, _) = watch::channel(MigrationStage::Ready);
        Self { stage }
    }

    pub fn current(&self) -> MigrationStage {
        self.stage.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MigrationStage> {
        self.stage.subscribe()
    }

    /// Move to the stage `event` leads to. A rejected event leaves the stage unchanged.
    pub fn apply(&self, event: StageEvent) -> Result<MigrationStage, MigrationError> {
        let mut outcome = None;
        self.stage.send_if_modified(|stage| match transition(stage, &event) {
            Some(next) => {
                match &next {
                    MigrationStage::Error(reason) => {
                        error!(from = %stage, %reason, "Migration failed");
                    }
                    _ => debug!(from = %stage, to = %next, "Migration stage transition"),
                }
                *stage = next.clone();
                outcome = Some(Ok(next));
                true
            }
            None => {
                outcome = Some(Err(MigrationError::InvalidTransition {
                    from: stage.to_string(),
                    to: event.name().to_string(),
                }));
                false
            }
        });
        outcome.unwrap_or(Err(MigrationError::Abandoned))
    }
}
