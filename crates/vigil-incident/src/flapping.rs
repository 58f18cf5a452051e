use vigil_storage::{Result, Store};

/// Sample and transition thresholds for flapping detection: look at the last
/// 20 checks, require at least 10 to judge, flag above 5 flips.
const SAMPLE_SIZE: usize = 20;
const MIN_SAMPLES: usize = 10;
const MAX_TRANSITIONS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlappingStatus {
    pub flapping: bool,
    pub transitions: u32,
    pub samples: usize,
}

/// Reports whether a monitor's status is flapping. This is a side query for
/// presentation; it does not gate incident creation.
pub fn flapping_status(store: &Store, monitor_id: i64) -> Result<FlappingStatus> {
    let recent = store.recent_checks(monitor_id, SAMPLE_SIZE)?;
    let samples = recent.len();
    if samples < MIN_SAMPLES {
        return Ok(FlappingStatus {
            flapping: false,
            transitions: 0,
            samples,
        });
    }
    let transitions = recent
        .windows(2)
        .filter(|pair| pair[0].status != pair[1].status)
        .count() as u32;
    Ok(FlappingStatus {
        flapping: transitions > MAX_TRANSITIONS,
        transitions,
        samples,
    })
}
