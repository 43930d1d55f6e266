use thiserror::Error;

use crate::{CarId, ChainId, JobId, StationId, TrackId};

/// Failures that leave engine state suspect. Infeasible generation is not an
/// error; it comes back as `None`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown car '{0}'")]
    UnknownCar(CarId),
    #[error("unknown station '{0}'")]
    UnknownStation(StationId),
    #[error("unknown track '{0}'")]
    UnknownTrack(TrackId),
    #[error("unknown job '{0}'")]
    UnknownJob(JobId),
    #[error("unknown job chain '{0}'")]
    UnknownChain(ChainId),
    #[error("reserving {length:.1}m on track '{track}' would exceed its {total:.1}m length ({reserved:.1}m reserved)")]
    Overcommit {
        track: TrackId,
        length: f32,
        reserved: f32,
        total: f32,
    },
    #[error("job '{job}' is not the active job of its chain")]
    NotActiveJob { job: JobId },
    #[error("car '{car}' has no current track")]
    CarNotOnTrack { car: CarId },
    #[error("persisted engine data is malformed: {0}")]
    Persistence(#[from] serde_json::Error),
}
