// Worker constants (no magic values)
use std::time::Duration;

/// Pause after a sweep failed before the loop ticks again
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Constant ordering key of SEQUENTIAL sinks
pub const SEQUENTIAL_ORDERING_KEY: &str = "__sequential__";

/// Data file id recorded on termination chunks
pub const JOB_END_DATA_FILE_ID: &str = "job-end";

/// Prefix of the per-submitter key linking a job's termination chunk to the
/// first chunk of the submitter's next job on the same sink
pub const JOB_BARRIER_KEY_PREFIX: &str = "__barrier__:";
