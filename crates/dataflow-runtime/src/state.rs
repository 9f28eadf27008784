/// The actor lifecycle: `BOOTING -> RUNNING -> DRAINING -> DONE`, plus
/// `RECOVERING`, entered instead of `BOOTING` when the actor is
/// constructed from a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorPhase {
    Booting,
    Recovering,
    Running,
    Draining,
    Done,
}
