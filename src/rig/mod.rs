//! The node-beam substrate and the actor-level components built on it.

pub mod actor;
pub mod beam;
pub mod commands;
pub mod node;
pub mod wheel;

pub use actor::{
    ActorBounds, ActorBundle, ActorId, ActorState, ActorStatics, Attachments, Cabs, CollCabRate,
    Controls, Hook, HookState, Hydros, Meters, NetTimer, NodeConnections, Origin, RemoteNode,
    Rope, Rotator, Rotators, SleepTimer, SlideNode, Tie,
};
pub use beam::{Beam, BeamBound, BeamRole, BeamStore, Shock};
pub use commands::{CommandKey, CommandSet, InertiaCurve, InertiaFilter};
pub use node::{LockState, Node, NodeIndex, NodeOptions, NodeStore, WetState};
pub use wheel::{BrakeCombo, Wheel, WheelKind, Wheels};
