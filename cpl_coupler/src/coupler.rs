//! Coupling lifecycle controller.
//!
//! [`Coupler`] owns the coupling context of one rank: the tile's segment
//! map, the router to the peer model, both attribute vectors, the field
//! registry and the per-tile adapter. `initialize` builds the context,
//! every `exchange` runs one round, `finalize` tears it down.
//!
//! A round exports every field of the export list into the outbound
//! vector, sends it, receives the inbound vector and imports every field
//! of the import list. All ranks of a model run the same lists in the
//! same order, so halo exchanges inside the adapter pair up.

use std::sync::Arc;

use cpl_common::field_code::FieldCode;
use cpl_common::shm::link::ModelId;
use tracing::{error, info, warn};

use crate::adapter::FieldAdapter;
use crate::attrvect::AttrVect;
use crate::boundary::TileBoundary;
use crate::config::CouplerConfig;
use crate::error::CouplingError;
use crate::grid::{Field2d, GridDomain, TileBounds};
use crate::gsmap::GlobalSegMap;
use crate::lifecycle::{CouplerState, LifecycleEvent, LifecycleMachine, TransitionResult};
use crate::native::NativeModel;
use crate::registry::{FieldRegistry, MinMax, ResolvedLists};
use crate::router::Router;
use crate::thermo::FreezeMeltAccumulator;
use crate::transfer::TransferEngine;
use crate::transport::Communicator;
use crate::world::ModelRegistry;
use cpl_common::config::ConfigError;

/// Extremes of one field in one round.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSummary {
    /// Field code.
    pub code: FieldCode,
    /// Extremes of the exchanged column, `None` for an empty tile.
    pub range: Option<MinMax>,
}

/// Outcome of one exchange round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundReport {
    /// Round number, starting at 1.
    pub round: u64,
    /// Exported fields in list order.
    pub exported: Vec<FieldSummary>,
    /// Imported fields in list order.
    pub imported: Vec<FieldSummary>,
    /// Fields skipped because their native array is missing.
    pub skipped: Vec<FieldCode>,
}

/// Everything one rank needs to exchange with the peer model.
pub struct CouplingContext {
    comm: Arc<dyn Communicator>,
    model: ModelId,
    peer: ModelId,
    domain: GridDomain,
    tile: usize,
    seg_map: GlobalSegMap,
    router: Router,
    registry: FieldRegistry,
    lists: ResolvedLists,
    inbound: AttrVect,
    outbound: AttrVect,
    transfer: TransferEngine,
    boundary: TileBoundary,
    adapter: FieldAdapter,
    accumulator: FreezeMeltAccumulator,
    round: u64,
}

impl CouplingContext {
    fn build(comm: Arc<dyn Communicator>, config: &CouplerConfig) -> Result<Self, CouplingError> {
        config.validate()?;
        let c = &config.coupling;

        let world = ModelRegistry::from_layouts(&config.models)?;
        if world.world_size() != comm.size() {
            return Err(ConfigError::ValidationError(format!(
                "[[models]] describe {} ranks but the communicator has {}",
                world.world_size(),
                comm.size()
            ))
            .into());
        }
        let rank = comm.rank();
        let own = world
            .ranks_of(c.model)
            .filter(|r| r.contains(&rank))
            .ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "rank {rank} does not belong to model '{}'",
                    c.model
                ))
            })?;
        let peers = world.ranks_of(c.peer).ok_or_else(|| {
            ConfigError::ValidationError(format!("peer '{}' missing from [[models]]", c.peer))
        })?;

        let domain = config.grid.domain()?;
        let tile = rank - own.start;
        let (ti, tj) = domain.tile_coords(tile);
        let bounds = domain.tile(ti, tj)?;
        let seg_map = GlobalSegMap::from_tile(&domain, &bounds);

        let mut registry = FieldRegistry::new(config.fields.clone())?;
        let lists = registry.resolve(&config.lists)?;

        let timeout = c.recv_timeout();
        let router = Router::build(comm.as_ref(), &seg_map, peers, timeout)?;

        let codes = |positions: &[usize]| -> Vec<FieldCode> {
            positions.iter().map(|&i| registry.at(i).code.clone()).collect()
        };
        let inbound = AttrVect::new(codes(&lists.import), seg_map.lsize());
        let outbound = AttrVect::new(codes(&lists.export), seg_map.lsize());

        let boundary = TileBoundary::new(comm.clone(), domain, tile, own.start, c.halo_width, timeout)?;
        let adapter = FieldAdapter::new(
            rank,
            bounds,
            c.halo_width,
            config.vertical.clone(),
            config.thermo.clone(),
            c.interval_s,
        );
        let accumulator = FreezeMeltAccumulator::new(&bounds, c.halo_width, c.substeps);

        Ok(Self {
            comm,
            model: c.model,
            peer: c.peer,
            domain,
            tile,
            seg_map,
            router,
            registry,
            lists,
            inbound,
            outbound,
            transfer: TransferEngine::new(timeout),
            boundary,
            adapter,
            accumulator,
            round: 0,
        })
    }

    /// This side.
    pub fn model(&self) -> ModelId {
        self.model
    }

    /// The side exchanged with.
    pub fn peer(&self) -> ModelId {
        self.peer
    }

    /// Global grid and tiling of this side.
    pub fn domain(&self) -> &GridDomain {
        &self.domain
    }

    /// Tile index of this rank within its model.
    pub fn tile(&self) -> usize {
        self.tile
    }

    /// Bounds of this rank's tile.
    pub fn bounds(&self) -> &TileBounds {
        self.adapter.bounds()
    }

    /// Segment map of this rank's tile.
    pub fn seg_map(&self) -> &GlobalSegMap {
        &self.seg_map
    }

    /// Schedule to the peer model.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Field descriptors with their running extremes.
    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    /// Freeze/melt contributions since the last export.
    pub fn accumulator(&self) -> &FreezeMeltAccumulator {
        &self.accumulator
    }

    /// Rounds completed or attempted.
    pub fn round(&self) -> u64 {
        self.round
    }

    fn run_round(&mut self, model: &mut dyn NativeModel) -> Result<RoundReport, CouplingError> {
        self.round += 1;
        let rank = self.comm.rank();
        let mut report = RoundReport {
            round: self.round,
            ..RoundReport::default()
        };

        for (col, &index) in self.lists.export.iter().enumerate() {
            let desc = self.registry.at_mut(index);
            let column = self.outbound.column_mut(col);
            match self
                .adapter
                .export(desc, column, model, &mut self.accumulator, &self.boundary)
            {
                Ok(range) => report.exported.push(FieldSummary {
                    code: desc.code.clone(),
                    range,
                }),
                Err(err @ CouplingError::MissingArray { .. }) => {
                    warn!(rank, round = self.round, %err, "Export skipped; sending zeros");
                    column.fill(0.0);
                    report.skipped.push(desc.code.clone());
                }
                Err(err) => return Err(err),
            }
        }

        if self.outbound.nfields() > 0 {
            self.transfer
                .send(self.comm.as_ref(), &self.outbound, &self.router, self.round)?;
        }
        if self.inbound.nfields() > 0 {
            self.transfer
                .receive(self.comm.as_ref(), &mut self.inbound, &self.router, self.round)?;
        }

        for (col, &index) in self.lists.import.iter().enumerate() {
            let desc = self.registry.at_mut(index);
            let column = self.inbound.column(col);
            match self.adapter.import(desc, column, model, &self.boundary) {
                Ok(range) => report.imported.push(FieldSummary {
                    code: desc.code.clone(),
                    range,
                }),
                Err(err @ CouplingError::MissingArray { .. }) => {
                    warn!(rank, round = self.round, %err, "Import skipped");
                    report.skipped.push(desc.code.clone());
                }
                Err(err) => return Err(err),
            }
        }

        Ok(report)
    }
}

/// Coupling lifecycle of one rank.
pub struct Coupler {
    comm: Arc<dyn Communicator>,
    lifecycle: LifecycleMachine,
    context: Option<CouplingContext>,
}

impl Coupler {
    /// Uninitialized coupler on `comm`.
    pub fn new(comm: Arc<dyn Communicator>) -> Self {
        Self {
            comm,
            lifecycle: LifecycleMachine::new(),
            context: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CouplerState {
        self.lifecycle.state()
    }

    /// Coupling context, present between `initialize` and `finalize`.
    pub fn context(&self) -> Option<&CouplingContext> {
        self.context.as_ref()
    }

    fn transition(&mut self, operation: &'static str, event: LifecycleEvent) -> Result<(), CouplingError> {
        match self.lifecycle.handle_event(event) {
            TransitionResult::Ok(_) => Ok(()),
            TransitionResult::Rejected(reason) => Err(CouplingError::InvalidState { operation, reason }),
        }
    }

    /// Build the coupling context: tile, segment map, router, registry and
    /// attribute vectors.
    ///
    /// Collective over both models: every rank of both sides must call it.
    pub fn initialize(&mut self, config: &CouplerConfig) -> Result<(), CouplingError> {
        self.transition("initialize", LifecycleEvent::Initialize)?;

        match CouplingContext::build(self.comm.clone(), config) {
            Ok(context) => {
                info!(
                    rank = self.comm.rank(),
                    model = %context.model,
                    peer = %context.peer,
                    tile = context.tile,
                    points = context.seg_map.lsize(),
                    routes = context.router.routes().len(),
                    imports = context.lists.import.len(),
                    exports = context.lists.export.len(),
                    "Coupling initialized"
                );
                self.context = Some(context);
                self.transition("initialize", LifecycleEvent::InitComplete)
            }
            Err(err) => {
                error!(rank = self.comm.rank(), %err, "Coupling initialization failed");
                self.transition("initialize", LifecycleEvent::InitFailed)?;
                Err(err)
            }
        }
    }

    /// Run one exchange round against `model`'s native arrays.
    ///
    /// A fatal error (layout disagreement with the peer, or a round cut
    /// short by a delivery failure) leaves the coupler in
    /// [`CouplerState::Failed`]; any other error leaves it ready for the
    /// next round.
    pub fn exchange(&mut self, model: &mut dyn NativeModel) -> Result<RoundReport, CouplingError> {
        self.transition("exchange", LifecycleEvent::ExchangeStart)?;
        let Some(context) = self.context.as_mut() else {
            self.transition("exchange", LifecycleEvent::ExchangeAborted)?;
            return Err(CouplingError::InvalidState {
                operation: "exchange",
                reason: "coupler not initialized",
            });
        };

        let rank = self.comm.rank();
        match context.run_round(model) {
            Ok(report) => {
                info!(
                    rank,
                    round = report.round,
                    exported = report.exported.len(),
                    imported = report.imported.len(),
                    skipped = report.skipped.len(),
                    "Exchange complete"
                );
                self.transition("exchange", LifecycleEvent::ExchangeComplete)?;
                Ok(report)
            }
            Err(err) if err.is_fatal() => {
                error!(rank, %err, "Exchange failed; coupling cannot continue");
                self.transition("exchange", LifecycleEvent::FatalError)?;
                Err(err)
            }
            Err(err) => {
                warn!(rank, %err, "Exchange aborted");
                self.transition("exchange", LifecycleEvent::ExchangeAborted)?;
                Err(err)
            }
        }
    }

    /// Add one ocean sub-step's freeze contribution.
    pub fn accumulate_freeze_melt(&mut self, contribution: &Field2d) -> Result<(), CouplingError> {
        match self.context.as_mut() {
            Some(context) if self.lifecycle.is_ready() => {
                context.accumulator.accumulate(contribution);
                Ok(())
            }
            _ => Err(CouplingError::InvalidState {
                operation: "accumulate_freeze_melt",
                reason: "coupler not ready",
            }),
        }
    }

    /// Drop the coupling context.
    pub fn finalize(&mut self) -> Result<(), CouplingError> {
        self.transition("finalize", LifecycleEvent::Finalize)?;
        if let Some(context) = self.context.take() {
            info!(
                rank = self.comm.rank(),
                model = %context.model,
                rounds = context.round,
                "Coupling finalized"
            );
        }
        Ok(())
    }
}
