//! The periodic pass that turns abandoned rolling stock back into jobs.
//!
//! A pass walks a fixed sequence of phases. Each call to
//! [`ReclamationPass::advance`] runs one phase and reports where it stopped,
//! so a host can yield between phases. [`run_reclamation_cycle`] drives a
//! whole pass synchronously.

use std::collections::BTreeMap;

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::chain::{FollowOnPolicy, JobChain};
use crate::context::EngineContext;
use crate::controller::finalize;
use crate::generators::{empty_haul, shunting_load, shunting_unload, transport};
use crate::grouping::{assign_to_nearest_station, group_by_trainset};
use crate::host::Host;
use crate::matching::{
    extract_empty_haul_sets, populate_empty_groups, populate_loaded_groups, take_direction,
    ClustersPerStation,
};
use crate::planner::{plan_loaded_jobs, plan_shunting_load_jobs};
use crate::{
    CarId, CargoDirection, EngineError, Event, EventEnvelope, JobKind, JobSpecification,
    YardContent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReclamationPhase {
    Collect,
    Group,
    AssignStations,
    MatchCargo,
    Plan,
    Generate,
    Finalize,
    Preserve,
    Delete,
}

impl ReclamationPhase {
    fn next(self) -> Option<Self> {
        use ReclamationPhase::{
            AssignStations, Collect, Delete, Finalize, Generate, Group, MatchCargo, Plan, Preserve,
        };
        match self {
            Collect => Some(Group),
            Group => Some(AssignStations),
            AssignStations => Some(MatchCargo),
            MatchCargo => Some(Plan),
            Plan => Some(Generate),
            Generate => Some(Finalize),
            Finalize => Some(Preserve),
            Preserve => Some(Delete),
            Delete => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReclamationReport {
    pub candidates: usize,
    pub absorbed: usize,
    pub preserved: usize,
    pub deleted: usize,
    pub chains_per_kind: BTreeMap<JobKind, usize>,
}

impl ReclamationReport {
    pub fn chains(&self) -> usize {
        self.chains_per_kind.values().sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PassStatus {
    /// The named phase ran; call `advance` again for the next one.
    Yielded(ReclamationPhase),
    Finished(ReclamationReport),
    Skipped(String),
}

#[derive(Debug, Default)]
struct Planned {
    loads: Vec<JobSpecification>,
    transports: Vec<JobSpecification>,
    unloads: Vec<JobSpecification>,
}

/// State carried between the phases of one pass.
#[derive(Debug)]
pub struct ReclamationPass {
    phase: Option<ReclamationPhase>,
    candidates: Vec<CarId>,
    empty_groups: BTreeMap<crate::TrainsetId, Vec<CarId>>,
    loaded_groups: BTreeMap<crate::TrainsetId, Vec<CarId>>,
    empty_clusters: ClustersPerStation,
    loaded_clusters: ClustersPerStation,
    empty_haul_sets: ClustersPerStation,
    planned: Planned,
    chains: Vec<JobChain>,
    report: ReclamationReport,
}

impl Default for ReclamationPass {
    fn default() -> Self {
        Self::new()
    }
}

impl ReclamationPass {
    pub fn new() -> Self {
        Self {
            phase: Some(ReclamationPhase::Collect),
            candidates: Vec::new(),
            empty_groups: BTreeMap::new(),
            loaded_groups: BTreeMap::new(),
            empty_clusters: ClustersPerStation::new(),
            loaded_clusters: ClustersPerStation::new(),
            empty_haul_sets: ClustersPerStation::new(),
            planned: Planned::default(),
            chains: Vec::new(),
            report: ReclamationReport::default(),
        }
    }

    pub fn phase(&self) -> Option<ReclamationPhase> {
        self.phase
    }

    /// Runs the next phase. A phase error disables generation and aborts the
    /// pass; later calls report it as finished.
    pub fn advance<H: Host, R: Rng + ?Sized>(
        &mut self,
        ctx: &mut EngineContext,
        content: &YardContent,
        host: &mut H,
        rng: &mut R,
        events: &mut Vec<EventEnvelope>,
    ) -> Result<PassStatus, EngineError> {
        let Some(phase) = self.phase else {
            return Ok(PassStatus::Finished(self.report.clone()));
        };
        match self.run_phase(phase, ctx, content, host, rng, events) {
            Ok(Some(status)) => {
                self.phase = None;
                Ok(status)
            }
            Ok(None) => {
                self.phase = phase.next();
                if self.phase.is_some() {
                    return Ok(PassStatus::Yielded(phase));
                }
                Ok(self.finish(ctx, events))
            }
            Err(err) => {
                self.phase = None;
                ctx.on_critical_failure(&err, events);
                Err(err)
            }
        }
    }

    /// `Ok(Some(_))` ends the pass early.
    fn run_phase<H: Host, R: Rng + ?Sized>(
        &mut self,
        phase: ReclamationPhase,
        ctx: &mut EngineContext,
        content: &YardContent,
        host: &mut H,
        rng: &mut R,
        events: &mut Vec<EventEnvelope>,
    ) -> Result<Option<PassStatus>, EngineError> {
        match phase {
            ReclamationPhase::Collect => Ok(self.collect(ctx, host, events)),
            ReclamationPhase::Group => {
                self.group(ctx, content, host);
                Ok(None)
            }
            ReclamationPhase::AssignStations => {
                self.assign_stations(content, host);
                Ok(None)
            }
            ReclamationPhase::MatchCargo => {
                self.match_cargo(ctx, content, host);
                Ok(None)
            }
            ReclamationPhase::Plan => {
                self.plan(ctx, content, host, rng);
                Ok(None)
            }
            ReclamationPhase::Generate => {
                self.generate(ctx, content, host, rng);
                Ok(None)
            }
            ReclamationPhase::Finalize => self.finalize_chains(ctx, host, events).map(|()| None),
            ReclamationPhase::Preserve => {
                self.preserve(ctx, content, host);
                Ok(None)
            }
            ReclamationPhase::Delete => {
                self.delete(host);
                Ok(None)
            }
        }
    }

    #[instrument(level = "debug", skip_all, fields(cycle = ctx.cycle + 1))]
    fn collect<H: Host>(
        &mut self,
        ctx: &mut EngineContext,
        host: &mut H,
        events: &mut Vec<EventEnvelope>,
    ) -> Option<PassStatus> {
        ctx.cycle += 1;
        let skip_reason = if ctx.is_broken() {
            Some("job generation is disabled")
        } else if !host.is_player_present() {
            Some("no player present")
        } else if host.is_fast_travelling() {
            Some("fast travel in progress")
        } else {
            None
        };
        if let Some(reason) = skip_reason {
            debug!(reason, "skipping reclamation pass");
            ctx.emit(
                events,
                Event::ReclamationSkipped {
                    reason: reason.to_string(),
                },
            );
            return Some(PassStatus::Skipped(reason.to_string()));
        }

        let mut kept = Vec::new();
        for id in host.take_marked_for_delete() {
            if host.car(&id).is_none() {
                debug!(car = %id, "dropping unknown car from the unused pool");
            } else if host.delete_conditions_fulfilled(&id) {
                self.candidates.push(id);
            } else {
                kept.push(id);
            }
        }
        if !kept.is_empty() {
            host.mark_for_delete(&kept);
        }
        self.report.candidates = self.candidates.len();
        if self.candidates.is_empty() {
            debug!("no unused cars eligible for reclamation");
            return Some(self.finish(ctx, events));
        }
        info!(candidates = self.candidates.len(), "reclaiming unused cars");
        None
    }

    #[instrument(level = "debug", skip_all, fields(candidates = self.candidates.len()))]
    fn group<H: Host>(&mut self, ctx: &EngineContext, content: &YardContent, host: &H) {
        let threshold = content.constants.loaded_cargo_threshold;
        let (empty, loaded): (Vec<CarId>, Vec<CarId>) = self
            .candidates
            .iter()
            .filter(|id| {
                host.car(id).is_some_and(|car| {
                    car.track.is_some() && !ctx.index.is_locomotive(&car.car_type)
                })
            })
            .cloned()
            .partition(|id| host.car(id).is_some_and(|car| car.is_empty(threshold)));
        debug!(empty = empty.len(), loaded = loaded.len(), "split candidates");
        self.empty_groups = group_by_trainset(host, &empty);
        self.loaded_groups = group_by_trainset(host, &loaded);
    }

    #[instrument(level = "debug", skip_all)]
    fn assign_stations<H: Host>(&mut self, content: &YardContent, host: &H) {
        let threshold = content.constants.abandonment_sqr_distance();
        self.empty_clusters = assign_to_nearest_station(
            host,
            content,
            std::mem::take(&mut self.empty_groups),
            threshold,
        );
        self.loaded_clusters = assign_to_nearest_station(
            host,
            content,
            std::mem::take(&mut self.loaded_groups),
            threshold,
        );
    }

    #[instrument(level = "debug", skip_all)]
    fn match_cargo<H: Host>(&mut self, ctx: &EngineContext, content: &YardContent, host: &H) {
        populate_empty_groups(&mut self.empty_clusters, host, content, &ctx.index);
        populate_loaded_groups(&mut self.loaded_clusters, host, content);
        self.empty_haul_sets = extract_empty_haul_sets(&mut self.empty_clusters);
    }

    #[instrument(level = "debug", skip_all)]
    fn plan<H: Host, R: Rng + ?Sized>(
        &mut self,
        ctx: &EngineContext,
        content: &YardContent,
        host: &H,
        rng: &mut R,
    ) {
        let empty = std::mem::take(&mut self.empty_clusters);
        self.planned.loads = plan_shunting_load_jobs(empty, host, content, &ctx.index, rng);
        let outbound = take_direction(&mut self.loaded_clusters, CargoDirection::Outbound);
        let inbound = take_direction(&mut self.loaded_clusters, CargoDirection::Inbound);
        self.loaded_clusters.clear();
        self.planned.transports = plan_loaded_jobs(outbound, host, content, rng);
        self.planned.unloads = plan_loaded_jobs(inbound, host, content, rng);
        debug!(
            loads = self.planned.loads.len(),
            transports = self.planned.transports.len(),
            unloads = self.planned.unloads.len(),
            "planned jobs"
        );
    }

    #[instrument(level = "debug", skip_all)]
    fn generate<H: Host, R: Rng + ?Sized>(
        &mut self,
        ctx: &mut EngineContext,
        content: &YardContent,
        host: &mut H,
        rng: &mut R,
    ) {
        let planned = std::mem::take(&mut self.planned);
        let mut env = ctx.generation_env(content, host);
        for spec in planned.loads {
            self.chains.extend(shunting_load::generate_with_existing_cars(
                &mut env,
                spec,
                true,
                FollowOnPolicy::for_reclaimed(JobKind::ShuntingLoad),
                rng,
            ));
        }
        for spec in planned.transports {
            self.chains.extend(transport::generate_with_existing_cars(
                &mut env,
                spec,
                false,
                FollowOnPolicy::for_reclaimed(JobKind::Transport),
                rng,
            ));
        }
        for spec in planned.unloads {
            self.chains.extend(shunting_unload::generate_with_existing_cars(
                &mut env,
                spec,
                false,
                FollowOnPolicy::for_reclaimed(JobKind::ShuntingUnload),
                rng,
            ));
        }
        for (station, clusters) in std::mem::take(&mut self.empty_haul_sets) {
            for cluster in clusters {
                let Some(track) = cluster
                    .cars
                    .first()
                    .and_then(|id| env.host.car(id))
                    .and_then(|car| car.track.clone())
                else {
                    continue;
                };
                self.chains.extend(empty_haul::generate_with_existing_cars(
                    &mut env,
                    &station,
                    track,
                    cluster.cars,
                    FollowOnPolicy::for_reclaimed(JobKind::EmptyHaul),
                    rng,
                ));
            }
        }
    }

    #[instrument(level = "debug", skip_all, fields(chains = self.chains.len()))]
    fn finalize_chains<H: Host>(
        &mut self,
        ctx: &mut EngineContext,
        host: &mut H,
        events: &mut Vec<EventEnvelope>,
    ) -> Result<(), EngineError> {
        for chain in std::mem::take(&mut self.chains) {
            let kind = chain.first_job().kind();
            let absorbed = chain.cars.clone();
            finalize(ctx, host, chain, events)?;
            self.candidates.retain(|id| !absorbed.contains(id));
            self.report.absorbed += absorbed.len();
            *self.report.chains_per_kind.entry(kind).or_default() += 1;
        }
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(remaining = self.candidates.len()))]
    fn preserve<H: Host>(&mut self, ctx: &EngineContext, content: &YardContent, host: &mut H) {
        let keep_unabsorbed = content.constants.preserve_unabsorbed_cars;
        let (preserved, rest): (Vec<CarId>, Vec<CarId>) =
            std::mem::take(&mut self.candidates)
                .into_iter()
                .partition(|id| {
                    host.car(id).is_some_and(|car| {
                        car.player_spawned
                            || (keep_unabsorbed && !ctx.index.is_locomotive(&car.car_type))
                    })
                });
        if !preserved.is_empty() {
            host.mark_for_delete(&preserved);
        }
        self.report.preserved = preserved.len();
        self.candidates = rest;
    }

    #[instrument(level = "debug", skip_all, fields(remaining = self.candidates.len()))]
    fn delete<H: Host>(&mut self, host: &mut H) {
        let (deletable, changed): (Vec<CarId>, Vec<CarId>) = std::mem::take(&mut self.candidates)
            .into_iter()
            .partition(|id| host.delete_conditions_fulfilled(id));
        if !changed.is_empty() {
            warn!(
                count = changed.len(),
                "cars stopped being deletable during the pass; returning them to the unused pool"
            );
            host.mark_for_delete(&changed);
        }
        if !deletable.is_empty() {
            host.delete_cars(&deletable, false);
        }
        self.report.deleted = deletable.len();
    }

    fn finish(&mut self, ctx: &mut EngineContext, events: &mut Vec<EventEnvelope>) -> PassStatus {
        self.phase = None;
        let report = self.report.clone();
        info!(
            candidates = report.candidates,
            absorbed = report.absorbed,
            preserved = report.preserved,
            deleted = report.deleted,
            chains = report.chains(),
            "reclamation pass finished"
        );
        ctx.emit(
            events,
            Event::ReclamationFinished {
                candidates: report.candidates,
                absorbed: report.absorbed,
                preserved: report.preserved,
                deleted: report.deleted,
            },
        );
        PassStatus::Finished(report)
    }
}

/// Runs one full pass without yielding. Returns the final `Finished` or
/// `Skipped` status.
pub fn run_reclamation_cycle<H: Host, R: Rng + ?Sized>(
    ctx: &mut EngineContext,
    content: &YardContent,
    host: &mut H,
    rng: &mut R,
    events: &mut Vec<EventEnvelope>,
) -> Result<PassStatus, EngineError> {
    let mut pass = ReclamationPass::new();
    loop {
        match pass.advance(ctx, content, host, rng, events)? {
            PassStatus::Yielded(phase) => debug!(?phase, "reclamation phase done"),
            status => return Ok(status),
        }
    }
}
