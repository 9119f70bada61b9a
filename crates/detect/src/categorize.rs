//! Leak categorization: labels a confirmed episode by its flow shape.

use serde::{Deserialize, Serialize};

/// Diagnosed leak category for a confirmed episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeakCategory {
    /// Small continuous flow, typically a dripping tap or running cistern.
    FixtureLeak,
    /// Moderate continuous flow consistent with underground pipework.
    PipeworkLeak,
    /// Flow that oscillates between high and normal, typically a faulty
    /// valve or cistern cycling.
    CyclingFault,
    /// Very high sustained flow, a failed pipe or open main.
    Burst,
}

impl LeakCategory {
    pub fn describe(&self) -> &'static str {
        match self {
            LeakCategory::FixtureLeak => "fixture leak (tap, cistern, urinal)",
            LeakCategory::PipeworkLeak => "pipework leak (underground or concealed)",
            LeakCategory::CyclingFault => "cycling fault (valve or cistern)",
            LeakCategory::Burst => "burst (failed pipe or open main)",
        }
    }
}

/// Categorize an episode from its mean flow, flow spread, and the
/// property's baseline flow, all in L/min.
///
/// Bands sit at 2x, 5x, and 10x the baseline. Fixture and pipework leaks
/// require steady flow (spread below a fraction of the band ceiling); an
/// erratic pattern below the burst band is a cycling fault; anything past
/// the burst band, or steady flow that fits no lower band, is a burst.
pub fn categorize(mean_flow: f64, flow_stddev: f64, baseline_flow: f64) -> LeakCategory {
    let base = baseline_flow.max(0.1);
    let fixture_ceiling = 2.0 * base;
    let pipework_ceiling = 5.0 * base;
    let burst_ceiling = 10.0 * base;

    if mean_flow <= fixture_ceiling && flow_stddev < 0.2 * fixture_ceiling {
        LeakCategory::FixtureLeak
    } else if mean_flow <= pipework_ceiling && flow_stddev < 0.3 * pipework_ceiling {
        LeakCategory::PipeworkLeak
    } else if mean_flow <= burst_ceiling && flow_stddev >= 0.3 * pipework_ceiling {
        LeakCategory::CyclingFault
    } else {
        LeakCategory::Burst
    }
}
