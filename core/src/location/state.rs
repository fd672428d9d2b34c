use serde::{Deserialize, Serialize};

/// Lifecycle of a location handler.
///
/// `Stopped` is both initial and terminal; a stopped handler can be started again.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LocationState {
	Stopped,
	Starting,
	Active,
	Paused,
	Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Command {
	Start,
	Stop,
	Pause,
	Resume,
}

/// Outcome of applying a command to a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
	/// Enter this intermediate or final state
	Move(LocationState),
	/// Already there or not applicable, reported as a warning
	NoOp,
	/// The command can't be honoured from this state
	Rejected,
}

pub fn transition(state: LocationState, command: Command) -> Transition {
	use Command::*;
	use LocationState::*;

	match (state, command) {
		(Stopped, Start) => Transition::Move(Starting),
		(Starting | Active | Paused, Start) => Transition::NoOp,
		(Stopping, Start) => Transition::Rejected,

		(Starting | Active | Paused, Stop) => Transition::Move(Stopping),
		(Stopped | Stopping, Stop) => Transition::NoOp,

		(Active, Pause) => Transition::Move(Paused),
		(Stopped | Starting | Paused | Stopping, Pause) => Transition::NoOp,

		(Paused, Resume) => Transition::Move(Active),
		(Stopped | Starting | Active | Stopping, Resume) => Transition::NoOp,
	}
}
