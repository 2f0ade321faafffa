/// Stack kept free before the parser or evaluator descends another level.
const RED_ZONE: usize = 128 * 1024;

/// Size of each extra stack segment.
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Runs `f`, first moving onto a fresh stack segment when less than the red
/// zone remains. Wraps every recursive step of parsing and evaluation so
/// depth is bounded by `Limits` and the parser, not by the host thread.
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}
