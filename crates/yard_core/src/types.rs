//! Type definitions for `yard_core`.
//!
//! Rolling stock, station content, job definitions, events and the ID
//! newtypes shared by every planning stage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::licenses::Licenses;

// ---------------------------------------------------------------------------
// ID newtypes
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(CarId);
string_id!(TrainsetId);
string_id!(TrackId);
string_id!(StationId);
string_id!(CarType);
string_id!(CargoType);
string_id!(ContainerType);
string_id!(CargoGroupId);
string_id!(MachineId);
string_id!(JobId);
string_id!(ChainId);
string_id!(EventId);

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn sqr_distance(self, other: Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    pub fn distance(self, other: Position) -> f32 {
        self.sqr_distance(other).sqrt()
    }
}

// ---------------------------------------------------------------------------
// Core enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrackPool {
    Storage,
    TransferIn,
    TransferOut,
}

impl TrackPool {
    /// Pools searched, in order, when a reservation on a track of this pool
    /// has to move elsewhere in the same station.
    pub const fn replacement_order(self) -> [TrackPool; 3] {
        match self {
            TrackPool::Storage => [
                TrackPool::Storage,
                TrackPool::TransferOut,
                TrackPool::TransferIn,
            ],
            TrackPool::TransferIn => [
                TrackPool::TransferIn,
                TrackPool::TransferOut,
                TrackPool::Storage,
            ],
            TrackPool::TransferOut => [
                TrackPool::TransferOut,
                TrackPool::Storage,
                TrackPool::TransferIn,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobKind {
    ShuntingLoad,
    ShuntingUnload,
    Transport,
    EmptyHaul,
}

impl JobKind {
    pub const fn id_prefix(self) -> &'static str {
        match self {
            JobKind::ShuntingLoad => "SL",
            JobKind::ShuntingUnload => "SU",
            JobKind::Transport => "FH",
            JobKind::EmptyHaul => "LH",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobKind::ShuntingLoad => "shunting_load",
            JobKind::ShuntingUnload => "shunting_unload",
            JobKind::Transport => "transport",
            JobKind::EmptyHaul => "empty_haul",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Available,
    InProgress,
    Completed,
    Expired,
    Abandoned,
}

/// Which half of a station ruleset a cluster matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CargoDirection {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackSelection {
    /// Least free space that still fits.
    #[default]
    BestFit,
    Random,
}

// ---------------------------------------------------------------------------
// Rolling stock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingStockUnit {
    pub id: CarId,
    pub car_type: CarType,
    pub track: Option<TrackId>,
    /// `None` is the empty-car sentinel.
    pub cargo: Option<CargoType>,
    pub cargo_amount: f32,
    pub trainset: TrainsetId,
    pub player_spawned: bool,
    pub position: Position,
}

impl RollingStockUnit {
    pub fn is_empty(&self, loaded_threshold: f32) -> bool {
        self.cargo.is_none() || self.cargo_amount < loaded_threshold
    }
}

// ---------------------------------------------------------------------------
// Content types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YardContent {
    pub content_version: String,
    pub cargo: CargoTables,
    pub stations: Vec<StationDef>,
    pub constants: Constants,
}

impl YardContent {
    pub fn station(&self, id: &StationId) -> Option<&StationDef> {
        self.stations.iter().find(|s| &s.id == id)
    }
}

/// Static car-type ↔ container-type ↔ cargo-type tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CargoTables {
    pub car_types: Vec<CarTypeDef>,
    #[serde(default)]
    pub container_types: Vec<ContainerTypeDef>,
    pub cargo_types: Vec<CargoTypeDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarTypeDef {
    pub id: CarType,
    pub container: ContainerType,
    pub length_m: f32,
    /// Locomotives and tenders are never folded into jobs.
    #[serde(default)]
    pub locomotive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerTypeDef {
    pub id: ContainerType,
    #[serde(default)]
    pub licenses: Licenses,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CargoTypeDef {
    pub id: CargoType,
    pub containers: Vec<ContainerType>,
    #[serde(default)]
    pub licenses: Licenses,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationDef {
    pub id: StationId,
    pub name: String,
    pub position: Position,
    pub ruleset: JobsRuleset,
    pub tracks: Vec<TrackDef>,
    #[serde(default)]
    pub warehouse_machines: Vec<WarehouseMachineDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsRuleset {
    pub min_cars_per_job: u32,
    pub max_cars_per_job: u32,
    pub max_shunting_storage_tracks: u32,
    #[serde(default)]
    pub inbound: Vec<CargoGroup>,
    #[serde(default)]
    pub outbound: Vec<CargoGroup>,
}

impl JobsRuleset {
    pub fn group(&self, id: &CargoGroupId) -> Option<&CargoGroup> {
        self.outbound
            .iter()
            .chain(self.inbound.iter())
            .find(|g| &g.id == id)
    }

    pub fn groups(&self, direction: CargoDirection) -> &[CargoGroup] {
        match direction {
            CargoDirection::Outbound => &self.outbound,
            CargoDirection::Inbound => &self.inbound,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackDef {
    pub id: TrackId,
    pub pool: TrackPool,
    pub length_m: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseMachineDef {
    pub id: MachineId,
    pub track: TrackId,
    pub cargo_types: Vec<CargoType>,
}

/// Cargo types a station ships or receives, plus the partner stations at the
/// other end of those jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CargoGroup {
    pub id: CargoGroupId,
    pub cargo_types: Vec<CargoType>,
    pub stations: Vec<StationId>,
    #[serde(default)]
    pub licenses: Licenses,
}

/// Lower bound applied to `delete_sqr_distance` while the engine is active.
pub const MIN_DELETE_SQR_DISTANCE: f32 = 4_000_000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constants {
    #[serde(default = "default_reclamation_period_secs")]
    pub reclamation_period_secs: f32,
    #[serde(default = "default_interop_yield_secs")]
    pub interop_yield_secs: f32,
    /// Squared distance beyond which a station's generated jobs expire.
    #[serde(default = "default_job_destroy_sqr_distance")]
    pub job_destroy_sqr_distance: f32,
    #[serde(default = "default_abandonment_multiplier")]
    pub abandonment_multiplier: f32,
    /// Squared player distance beyond which unused cars may be deleted.
    #[serde(default = "default_delete_sqr_distance")]
    pub delete_sqr_distance: f32,
    #[serde(default = "default_loaded_cargo_threshold")]
    pub loaded_cargo_threshold: f32,
    #[serde(default = "default_car_separation_m")]
    pub car_separation_m: f32,
    #[serde(default = "default_shunting_distance_per_track_m")]
    pub shunting_distance_per_track_m: f32,
    #[serde(default)]
    pub track_selection: TrackSelection,
    #[serde(default = "default_true")]
    pub suppress_inbound_generation: bool,
    #[serde(default = "default_true")]
    pub preserve_unabsorbed_cars: bool,
    #[serde(default = "default_station_jobs_per_visit")]
    pub station_jobs_per_visit: u32,
    #[serde(default)]
    pub payment: PaymentConstants,
    #[serde(default)]
    pub licensing: LicenseConstants,
}

fn default_reclamation_period_secs() -> f32 {
    if cfg!(debug_assertions) {
        60.0
    } else {
        300.0
    }
}

fn default_interop_yield_secs() -> f32 {
    1.0
}

fn default_job_destroy_sqr_distance() -> f32 {
    2_250_000.0
}

fn default_abandonment_multiplier() -> f32 {
    1.2
}

fn default_delete_sqr_distance() -> f32 {
    MIN_DELETE_SQR_DISTANCE
}

fn default_loaded_cargo_threshold() -> f32 {
    0.001
}

fn default_car_separation_m() -> f32 {
    0.5
}

fn default_shunting_distance_per_track_m() -> f32 {
    500.0
}

fn default_true() -> bool {
    true
}

fn default_station_jobs_per_visit() -> u32 {
    2
}

impl Default for Constants {
    fn default() -> Self {
        Self {
            reclamation_period_secs: default_reclamation_period_secs(),
            interop_yield_secs: default_interop_yield_secs(),
            job_destroy_sqr_distance: default_job_destroy_sqr_distance(),
            abandonment_multiplier: default_abandonment_multiplier(),
            delete_sqr_distance: default_delete_sqr_distance(),
            loaded_cargo_threshold: default_loaded_cargo_threshold(),
            car_separation_m: default_car_separation_m(),
            shunting_distance_per_track_m: default_shunting_distance_per_track_m(),
            track_selection: TrackSelection::default(),
            suppress_inbound_generation: true,
            preserve_unabsorbed_cars: true,
            station_jobs_per_visit: default_station_jobs_per_visit(),
            payment: PaymentConstants::default(),
            licensing: LicenseConstants::default(),
        }
    }
}

impl Constants {
    /// Squared distance past which a trainset belongs to no station.
    pub fn abandonment_sqr_distance(&self) -> f32 {
        self.abandonment_multiplier * self.job_destroy_sqr_distance
    }

    pub fn effective_delete_sqr_distance(&self) -> f32 {
        self.delete_sqr_distance.max(MIN_DELETE_SQR_DISTANCE)
    }
}

/// Wage and bonus-time formula inputs used by the host payment calculator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConstants {
    pub haul_bonus_base_secs: f32,
    pub haul_bonus_secs_per_m: f32,
    pub shunting_bonus_secs_per_track: f32,
    pub wage_per_car_km: f32,
    pub wage_per_cargo_car_km: f32,
    pub empty_haul_wage_factor: f32,
}

impl Default for PaymentConstants {
    fn default() -> Self {
        Self {
            haul_bonus_base_secs: 600.0,
            haul_bonus_secs_per_m: 0.12,
            shunting_bonus_secs_per_track: 480.0,
            wage_per_car_km: 40.0,
            wage_per_cargo_car_km: 65.0,
            empty_haul_wage_factor: 0.6,
        }
    }
}

/// Car-count caps unlocked by the train-length licenses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LicenseConstants {
    pub max_cars_base: u32,
    pub max_cars_train_length1: u32,
    pub max_cars_train_length2: u32,
}

impl Default for LicenseConstants {
    fn default() -> Self {
        Self {
            max_cars_base: 5,
            max_cars_train_length1: 10,
            max_cars_train_length2: 20,
        }
    }
}

impl PaymentConstants {
    pub fn haul_bonus_time_limit(&self, distance_m: f32) -> f32 {
        self.haul_bonus_base_secs + distance_m * self.haul_bonus_secs_per_m
    }

    pub fn shunting_bonus_time_limit(&self, track_count: usize) -> f32 {
        track_count as f32 * self.shunting_bonus_secs_per_track
    }

    /// Wage for moving the cars in `data` over `distance_m`. Loaded cars pay
    /// the cargo rate; empty hauls are scaled down.
    pub fn job_payment(&self, kind: JobKind, distance_m: f32, data: &PaymentData) -> f32 {
        let cars: u32 = data.car_types.values().sum();
        let loaded: u32 = data.cargo_types.values().sum::<u32>().min(cars);
        let km = distance_m / 1000.0;
        let wage = km
            * ((cars - loaded) as f32 * self.wage_per_car_km
                + loaded as f32 * self.wage_per_cargo_car_km);
        if kind == JobKind::EmptyHaul {
            wage * self.empty_haul_wage_factor
        } else {
            wage
        }
    }
}

impl LicenseConstants {
    /// Train-length licenses a job with `count` cars requires.
    pub fn licenses_for_car_count(&self, count: usize) -> Licenses {
        if count > self.max_cars_train_length1 as usize {
            Licenses::TRAIN_LENGTH2
        } else if count > self.max_cars_base as usize {
            Licenses::TRAIN_LENGTH1
        } else {
            Licenses::NONE
        }
    }

    /// Largest car count the held licenses allow.
    pub fn max_cars(&self, held: Licenses) -> usize {
        let cap = if held.contains(Licenses::TRAIN_LENGTH2) {
            self.max_cars_train_length2
        } else if held.contains(Licenses::TRAIN_LENGTH1) {
            self.max_cars_train_length1
        } else {
            self.max_cars_base
        };
        cap as usize
    }
}

impl JobKind {
    /// License needed to take a job of this kind.
    pub const fn license(self) -> Licenses {
        match self {
            JobKind::ShuntingLoad | JobKind::ShuntingUnload => Licenses::SHUNTING,
            JobKind::Transport => Licenses::FREIGHT_HAUL,
            JobKind::EmptyHaul => Licenses::LOGISTICAL_HAUL,
        }
    }
}

// ---------------------------------------------------------------------------
// Planning types
// ---------------------------------------------------------------------------

/// One trainset assigned to a station, with the cargo groups it can serve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainsetCluster {
    pub cars: Vec<CarId>,
    pub groups: Vec<CargoGroupId>,
    pub direction: Option<CargoDirection>,
}

impl TrainsetCluster {
    pub fn new(cars: Vec<CarId>) -> Self {
        Self {
            cars,
            groups: Vec::new(),
            direction: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarsPerTrack {
    pub track: TrackId,
    pub cars: Vec<CarId>,
}

/// Planner output: what a generator should turn into a job. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpecification {
    pub origin: StationId,
    pub cars_per_track: Vec<CarsPerTrack>,
    pub destination: StationId,
    pub cars: Vec<CarId>,
    pub cargo_per_car: Vec<Option<CargoType>>,
}

// ---------------------------------------------------------------------------
// Job types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CargoLoad {
    pub cargo: CargoType,
    pub cars: Vec<CarId>,
    pub amount: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobPayload {
    ShuntingLoad {
        starting_tracks: Vec<CarsPerTrack>,
        machine: MachineId,
        destination_track: TrackId,
        loads: Vec<CargoLoad>,
    },
    Transport {
        starting_track: TrackId,
        destination_track: TrackId,
        cargo_per_car: Vec<Option<CargoType>>,
        amount_per_car: Vec<f32>,
    },
    ShuntingUnload {
        starting_track: TrackId,
        machine: MachineId,
        destination_tracks: Vec<CarsPerTrack>,
        unloads: Vec<CargoLoad>,
    },
    EmptyHaul {
        starting_track: TrackId,
        destination_track: TrackId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: JobId,
    /// Station whose job board lists the job.
    pub station: StationId,
    pub origin: StationId,
    pub destination: StationId,
    pub cars: Vec<CarId>,
    pub car_types: Vec<CarType>,
    pub payload: JobPayload,
    pub bonus_time_limit: f32,
    pub initial_wage: f32,
    pub licenses: Licenses,
    pub force_correct_cargo_state: bool,
    pub state: JobState,
}

impl JobDefinition {
    pub fn kind(&self) -> JobKind {
        match self.payload {
            JobPayload::ShuntingLoad { .. } => JobKind::ShuntingLoad,
            JobPayload::ShuntingUnload { .. } => JobKind::ShuntingUnload,
            JobPayload::Transport { .. } => JobKind::Transport,
            JobPayload::EmptyHaul { .. } => JobKind::EmptyHaul,
        }
    }

    /// Points every reference to `old` at `new`. Returns whether anything changed.
    pub fn replace_track(&mut self, old: &TrackId, new: &TrackId) -> bool {
        match &mut self.payload {
            JobPayload::ShuntingLoad {
                destination_track, ..
            }
            | JobPayload::Transport {
                destination_track, ..
            }
            | JobPayload::EmptyHaul {
                destination_track, ..
            } => {
                if destination_track == old {
                    *destination_track = new.clone();
                    true
                } else {
                    false
                }
            }
            JobPayload::ShuntingUnload {
                destination_tracks, ..
            } => {
                let mut changed = false;
                for cpt in destination_tracks.iter_mut().filter(|c| &c.track == old) {
                    cpt.track = new.clone();
                    changed = true;
                }
                changed
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackReservation {
    pub track: TrackId,
    pub length: f32,
}

/// Car-type and cargo-type tallies handed to the payment calculator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentData {
    pub car_types: BTreeMap<CarType, u32>,
    pub cargo_types: BTreeMap<CargoType, u32>,
}

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Counters {
    pub next_event_id: u64,
    pub next_job_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: EventId,
    pub cycle: u64,
    pub event: Event,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    ChainGenerated {
        chain_id: ChainId,
        job_id: JobId,
        kind: JobKind,
        station: StationId,
        destination: StationId,
        car_count: usize,
    },
    JobTaken {
        job_id: JobId,
    },
    JobExpired {
        job_id: JobId,
    },
    JobCompleted {
        job_id: JobId,
        kind: JobKind,
    },
    ChainCompleted {
        chain_id: ChainId,
    },
    ChainAbandoned {
        chain_id: ChainId,
    },
    TrackReplaced {
        job_id: JobId,
        old_track: TrackId,
        new_track: TrackId,
    },
    CarsDiverted {
        station: StationId,
        count: usize,
    },
    StationJobsGenerated {
        station: StationId,
        chains: usize,
    },
    ReclamationSkipped {
        reason: String,
    },
    ReclamationFinished {
        candidates: usize,
        absorbed: usize,
        preserved: usize,
        deleted: usize,
    },
    GenerationDisabled {
        reason: String,
    },
}
