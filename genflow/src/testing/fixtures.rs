//! Test fixtures for generation runs.

use crate::config::GeneratorConfig;
use crate::core::{Project, UnitSpec};
use crate::retry::RetryPolicy;
use serde_json::json;

/// A project with `units` units named `unit-1`, `unit-2`, ...
#[must_use]
pub fn sample_project(units: usize) -> Project {
    (1..=units).fold(
        Project::new("project-1", "Sample project").with_settings(json!({"style": "storyboard"})),
        |project, i| project.with_unit(sample_unit(i)),
    )
}

/// The `i`-th sample unit.
#[must_use]
pub fn sample_unit(i: usize) -> UnitSpec {
    UnitSpec::new(format!("unit-{i}"), format!("shot {i}: a lighthouse at dusk"))
        .with_params(json!({"seed": i}))
}

/// A retry policy with millisecond backoff.
#[must_use]
pub fn fast_retry_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new()
        .with_max_attempts(max_attempts)
        .with_initial_delay_ms(1)
        .with_max_delay_ms(5)
}

/// A configuration that polls and retries without real waiting.
#[must_use]
pub fn fast_config() -> GeneratorConfig {
    GeneratorConfig::default()
        .with_poll_interval_ms(1)
        .with_max_poll_attempts(20)
        .with_retry(fast_retry_policy(3))
}
