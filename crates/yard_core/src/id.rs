use rand::Rng;
use uuid::Uuid;

use crate::{ChainId, Counters, JobId, JobKind};

/// Deterministic v4-format UUID drawn from the engine RNG.
pub fn generate_uuid<R: Rng + ?Sized>(rng: &mut R) -> Uuid {
    let bytes: [u8; 16] = rng.gen();
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

pub fn generate_chain_id<R: Rng + ?Sized>(rng: &mut R) -> ChainId {
    ChainId(format!("chain_{}", generate_uuid(rng).simple()))
}

/// Job ids look like `FH-007`: kind prefix plus a per-save sequence number.
pub(crate) fn next_job_id(counters: &mut Counters, kind: JobKind) -> JobId {
    counters.next_job_id += 1;
    JobId(format!("{}-{:03}", kind.id_prefix(), counters.next_job_id))
}
