use std::time::Instant;

/// Row and timing counters collected for one execution step.
///
/// Profiling is enabled per command through `ExecutionConfig::profiling`
/// (or the `PENUMBRA_PROFILE` environment variable via
/// `ExecutionConfig::from_env`). Counters live inside the step that owns them,
/// so concurrent commands never share profiling state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepProfile {
    /// Number of `next` calls served.
    pub calls: u64,
    /// Number of rows produced.
    pub rows: u64,
    /// Nanoseconds spent inside the step, upstream time included.
    pub nanos: u64,
}

impl StepProfile {
    pub(crate) fn record(&mut self, start: Option<Instant>, produced: bool) {
        let Some(start) = start else {
            return;
        };
        self.calls += 1;
        if produced {
            self.rows += 1;
        }
        self.nanos = self
            .nanos
            .saturating_add(start.elapsed().as_nanos().min(u64::MAX as u128) as u64);
    }
}

pub(crate) fn profile_timer(enabled: bool) -> Option<Instant> {
    enabled.then(Instant::now)
}

/// Profile of a whole plan, in pre-order over its step tree.
#[derive(Debug, Clone, Default)]
pub struct PlanProfile {
    /// Step name and its counters.
    pub steps: Vec<(String, StepProfile)>,
}

impl PlanProfile {
    /// Counters of the first step with the given name.
    pub fn step(&self, name: &str) -> Option<&StepProfile> {
        self.steps
            .iter()
            .find(|(step, _)| step == name)
            .map(|(_, profile)| profile)
    }
}
