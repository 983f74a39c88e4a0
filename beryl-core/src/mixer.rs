/// The audio mixer collaborator. Sound synthesis lives outside this crate;
/// the scheduler only needs the two periodic entry points it paces.
///
/// Both callbacks receive how many cycles behind schedule they are being
/// delivered and are expected to reschedule themselves with
/// `interval - cycles_late`, which keeps the sample stream phase-stable
/// across dispatch jitter.
pub trait AudioMixer {
    /// Produce one output sample.
    fn step_mixer(&mut self, cycles_late: u64);

    /// Tick the PSG envelope/sweep sequencer.
    fn step_sequencer(&mut self, cycles_late: u64);
}
