//! Session migration between SFU nodes
//!
//! A migration opens signaling to the target node, joins it with an offer
//! from a throwaway subscriber, swaps in a new subscriber, ICE-restarts the
//! publisher and republishes. The pre-migration connections stay in place
//! until the new ones supersede them, so a failed attempt only needs to be
//! dropped.

pub mod collaborators;
pub mod coordinator;
pub mod machine;
pub mod sdp;
pub mod stage;

pub use collaborators::{
    MigrationHost, OfferOptions, PeerConnection, PeerConnectionFactory, SignalingConnector,
    SignalingTransport,
};
pub use coordinator::MigrationCoordinator;
pub use machine::{CompletionCallback, MigrationEnvironment, MigrationHandle, MigrationMachine, MigrationSignal};
pub use stage::{transition, MigrationStage, StageEvent, StageSlot, STAGE_SEQUENCE};
