//! Toroidal fish-tank simulation engine.
//!
//! A [`World`] owns a population of [`Agent`]s (drifting food and
//! neural-controlled fish) on a wraparound plane, plus an energy reserve.
//! Each [`World::tick`] runs a fixed pipeline: perception, decisions,
//! collision-avoiding movement, feeding with reproduction, aging with
//! upkeep, culling, and population replenishment. Energy is closed:
//! the reserve plus the sum of agent energy is invariant across a tick.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use rayon::prelude::*;
use slotmap::SlotMap;

mod agent;
pub mod geometry;

pub use agent::{
    upkeep_interval, Agent, AgentKind, FishState, VisionCache, VisionEntry, COLLISION_MARGIN,
    EMPTY_SIGNAL, EYESIGHT_ANGLE, EYESIGHT_DISTANCE, FOOD_ENERGY, FOOD_MAX_SPEED, FOOD_RADIUS,
    FOOD_SIGNAL, MAX_DELTA_ANGLE, MAX_SPEED, MIN_RADIUS, MUTATE_FACTOR, NEWBORN_ENERGY_DEFAULT,
    NEWBORN_MUTATE_CHANCE, PEER_SIGNAL, POST_BIRTH_ENERGY_DEFAULT, RADIUS_SCALE,
    UPKEEP_TICKS_PER_RADIUS,
};
pub use geometry::Position;

slotmap::new_key_type! {
    /// Generational handle to an agent in a [`World`].
    pub struct AgentId;
}

/// Number of inputs every policy receives, in fixed order:
/// `[energy, food_marker, food_dist, food_cos, peer_marker, peer_dist, peer_cos]`.
pub const POLICY_INPUTS: usize = 7;

/// Fixed-order policy input vector.
pub type PolicyInputs = [f64; POLICY_INPUTS];

/// Movement adjustment produced by one policy activation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PolicyOutput {
    /// Requested heading change, radians. Clamped to `±MAX_DELTA_ANGLE`.
    pub delta_angle: f64,
    /// Requested speed change, world units per tick.
    pub delta_speed: f64,
}

/// A fish controller. Implementations must be deterministic given their
/// own state; all randomness flows through the `mutate` RNG argument.
pub trait Policy: Send + fmt::Debug {
    /// Map the input vector to a movement adjustment.
    fn activate(&mut self, inputs: &[f64]) -> PolicyOutput;

    /// Produce a randomly perturbed copy.
    fn mutate(&self, rng: &mut dyn RngCore) -> Box<dyn Policy>;

    /// Deep copy, for inheritance.
    fn clone_box(&self) -> Box<dyn Policy>;

    /// Concrete-type access for persistence codecs.
    fn as_any(&self) -> &dyn Any;
}

/// Shared, swappable handle to a fish's policy.
///
/// Decisions lock the policy for the duration of one activation, and
/// [`PolicyHandle::install`] locks it to swap the controller, so a swap
/// never observes or produces a half-applied decision. Cloning shares
/// the same underlying policy; [`PolicyHandle::fork`] deep-copies it.
#[derive(Debug, Clone)]
pub struct PolicyHandle(Arc<Mutex<Box<dyn Policy>>>);

impl PolicyHandle {
    #[must_use]
    pub fn new(policy: Box<dyn Policy>) -> Self {
        Self(Arc::new(Mutex::new(policy)))
    }

    /// Run one activation under the lock.
    #[must_use]
    pub fn activate(&self, inputs: &[f64]) -> PolicyOutput {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .activate(inputs)
    }

    /// Replace the installed policy.
    pub fn install(&self, policy: Box<dyn Policy>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    /// Replace the installed policy with a mutated copy of itself.
    pub fn mutate_in_place(&self, rng: &mut dyn RngCore) {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let mutated = guard.mutate(rng);
        *guard = mutated;
    }

    /// Independent handle over a deep copy of the current policy.
    #[must_use]
    pub fn fork(&self) -> Self {
        let copy = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone_box();
        Self::new(copy)
    }

    /// Read-only access to the installed policy, under the lock.
    pub fn with<R>(&self, f: impl FnOnce(&dyn Policy) -> R) -> R {
        let guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(guard.as_ref())
    }
}

/// Factory for fresh random policies, used by forced spawns and
/// density-based initialization.
pub type PolicySpawner = Box<dyn Fn(&mut dyn RngCore) -> Box<dyn Policy> + Send>;

/// Per-tick callback, invoked after replenishment with the settled world.
pub trait WorldObserver: Send {
    fn on_tick(&mut self, world: &World);
}

/// Scoring observer: counts food eaten per tick, penalized half a point
/// for every pair of fish closer than the crowding distance, floored at
/// zero.
#[derive(Debug, Default)]
pub struct EatenFoodObserver {
    score: f64,
}

impl EatenFoodObserver {
    const CROWDING_DISTANCE: f64 = 5.0;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn score(&self) -> f64 {
        self.score
    }
}

impl WorldObserver for EatenFoodObserver {
    fn on_tick(&mut self, world: &World) {
        self.score += f64::from(world.eaten_food_last_tick());
        let (width, height) = world.dimensions();
        let fish: Vec<Position> = world.fish().map(|(_, a)| a.position()).collect();
        let limit_sq = Self::CROWDING_DISTANCE * Self::CROWDING_DISTANCE;
        for (i, a) in fish.iter().enumerate() {
            for b in &fish[i + 1..] {
                if geometry::torus_distance_sq(*a, *b, width, height) < limit_sq {
                    self.score -= 0.5;
                }
            }
        }
        if self.score < 0.0 {
            self.score = 0.0;
        }
    }
}

/// Pre-tick snapshot handed to perception. Positions are the values from
/// before any agent moved this tick.
#[derive(Debug, Clone)]
pub struct TickView {
    pub width: f64,
    pub height: f64,
    pub entries: Vec<TickViewEntry>,
}

/// One agent as seen by the perception pass.
#[derive(Debug, Clone, Copy)]
pub struct TickViewEntry {
    pub id: AgentId,
    pub position: Position,
    pub alive: bool,
    pub is_food: bool,
}

/// Simulation failures. Resource exhaustion (an empty reserve) is not an
/// error; these all indicate broken caller contracts or coordinate math.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("position ({x}, {y}) is outside the world after wraparound")]
    OutOfBounds { x: f64, y: f64 },
    #[error("agent energy may not go negative (got {energy})")]
    NegativeEnergy { energy: i64 },
    #[error("invalid world configuration: {reason}")]
    InvalidConfig { reason: String },
    #[error("no policy spawner installed, cannot create fish")]
    NoPolicySpawner,
}

/// World construction parameters.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WorldConfig {
    pub width: f64,
    pub height: f64,
    /// Fish population floor; at or below it the reserve force-spawns fish.
    pub min_population: usize,
    /// Seed for the world RNG.
    pub seed: u64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: 1470.0,
            height: 850.0,
            min_population: 10,
            seed: 0xF15B,
        }
    }
}

impl WorldConfig {
    /// Reject dimensions that are non-finite or not positive.
    pub fn validate(&self) -> Result<(), WorldError> {
        if !self.width.is_finite() || self.width <= 0.0 {
            return Err(WorldError::InvalidConfig {
                reason: format!("width must be positive and finite, got {}", self.width),
            });
        }
        if !self.height.is_finite() || self.height <= 0.0 {
            return Err(WorldError::InvalidConfig {
                reason: format!("height must be positive and finite, got {}", self.height),
            });
        }
        Ok(())
    }
}

/// Summary of one completed tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickReport {
    /// Tick counter after this tick.
    pub time: u64,
    pub births: usize,
    pub deaths: usize,
    pub eaten_food: u32,
    pub fish: usize,
    pub food: usize,
}

/// The simulation: agents on a torus plus a closed energy economy.
pub struct World {
    config: WorldConfig,
    agents: SlotMap<AgentId, Agent>,
    rng: SmallRng,
    time: u64,
    energy_reserve: i64,
    mutation_count: u64,
    eaten_food_last_tick: u32,
    pending_seeds: Vec<Position>,
    listeners: Vec<Box<dyn WorldObserver>>,
    policy_spawner: Option<PolicySpawner>,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("config", &self.config)
            .field("agents", &self.agents.len())
            .field("time", &self.time)
            .field("energy_reserve", &self.energy_reserve)
            .field("mutation_count", &self.mutation_count)
            .finish_non_exhaustive()
    }
}

impl World {
    /// World with the given dimensions and default settings.
    pub fn new(width: f64, height: f64) -> Result<Self, WorldError> {
        Self::with_config(WorldConfig {
            width,
            height,
            ..WorldConfig::default()
        })
    }

    pub fn with_config(config: WorldConfig) -> Result<Self, WorldError> {
        config.validate()?;
        let rng = SmallRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            agents: SlotMap::with_key(),
            rng,
            time: 0,
            energy_reserve: 0,
            mutation_count: 0,
            eaten_food_last_tick: 0,
            pending_seeds: Vec::new(),
            listeners: Vec::new(),
            policy_spawner: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    #[must_use]
    pub fn dimensions(&self) -> (f64, f64) {
        (self.config.width, self.config.height)
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.config.width
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.config.height
    }

    #[must_use]
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn set_time(&mut self, time: u64) {
        self.time = time;
    }

    #[must_use]
    pub fn energy_reserve(&self) -> i64 {
        self.energy_reserve
    }

    pub fn set_energy_reserve(&mut self, reserve: i64) -> Result<(), WorldError> {
        if reserve < 0 {
            return Err(WorldError::NegativeEnergy { energy: reserve });
        }
        self.energy_reserve = reserve;
        Ok(())
    }

    /// Inject energy from outside the closed economy.
    pub fn add_energy(&mut self, amount: i64) -> Result<(), WorldError> {
        let next = self.energy_reserve + amount;
        if next < 0 {
            return Err(WorldError::NegativeEnergy { energy: next });
        }
        self.energy_reserve = next;
        Ok(())
    }

    #[must_use]
    pub fn mutation_count(&self) -> u64 {
        self.mutation_count
    }

    pub fn set_mutation_count(&mut self, count: u64) {
        self.mutation_count = count;
    }

    /// Food eaten during the most recently completed tick.
    #[must_use]
    pub fn eaten_food_last_tick(&self) -> u32 {
        self.eaten_food_last_tick
    }

    /// Deepest mutation lineage among living fish.
    #[must_use]
    pub fn longest_generation(&self) -> u32 {
        self.fish()
            .filter_map(|(_, a)| a.generation())
            .max()
            .unwrap_or(0)
    }

    /// Reserve plus the energy held by every agent. Constant across a
    /// tick; changes only through explicit injection.
    #[must_use]
    pub fn total_energy(&self) -> i64 {
        self.energy_reserve + self.agents.values().map(Agent::energy).sum::<i64>()
    }

    pub fn install_policy_spawner(&mut self, spawner: PolicySpawner) {
        self.policy_spawner = Some(spawner);
    }

    pub fn add_listener(&mut self, listener: Box<dyn WorldObserver>) {
        self.listeners.push(listener);
    }

    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    #[must_use]
    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(id)
    }

    pub fn agents(&self) -> impl Iterator<Item = (AgentId, &Agent)> {
        self.agents.iter()
    }

    pub fn fish(&self) -> impl Iterator<Item = (AgentId, &Agent)> {
        self.agents.iter().filter(|(_, a)| a.is_fish())
    }

    pub fn food(&self) -> impl Iterator<Item = (AgentId, &Agent)> {
        self.agents.iter().filter(|(_, a)| a.is_food())
    }

    #[must_use]
    pub fn fish_count(&self) -> usize {
        self.fish().count()
    }

    #[must_use]
    pub fn food_count(&self) -> usize {
        self.food().count()
    }

    /// Add an agent, normalizing its position by at most one wraparound
    /// step per axis. A position still out of bounds after that single
    /// step is coordinate-math gone wrong and is rejected, not clamped.
    pub fn add_agent(&mut self, mut agent: Agent) -> Result<AgentId, WorldError> {
        let x = wrap_once(agent.x(), self.config.width);
        let y = wrap_once(agent.y(), self.config.height);
        if !(0.0..self.config.width).contains(&x) || !(0.0..self.config.height).contains(&y) {
            return Err(WorldError::OutOfBounds { x, y });
        }
        agent.set_position(Position::new(x, y));
        Ok(self.agents.insert(agent))
    }

    pub fn remove_agent(&mut self, id: AgentId) -> Option<Agent> {
        self.agents.remove(id)
    }

    /// Queue a food birth at the given position, to be paid out of the
    /// reserve during the next replenishment stage.
    pub fn seed_food(&mut self, x: f64, y: f64) {
        self.pending_seeds.push(Position::new(x, y));
    }

    /// Populate an empty world from densities expressed per million
    /// square units. Fish come from the installed policy spawner. The
    /// spawned energy is an explicit injection into the economy.
    pub fn initialize(&mut self, fish_density: f64, food_density: f64) -> Result<(), WorldError> {
        if self.policy_spawner.is_none() {
            return Err(WorldError::NoPolicySpawner);
        }
        let millions = self.config.width * self.config.height / 1_000_000.0;
        let fish_count = (fish_density * millions).round() as usize;
        let food_count = (food_density * millions).round() as usize;
        for _ in 0..fish_count {
            let fish = self.random_fish()?;
            self.add_agent(fish)?;
        }
        for _ in 0..food_count {
            let food = self.random_food();
            self.add_agent(food)?;
        }
        Ok(())
    }

    /// Advance the simulation by one tick.
    pub fn tick(&mut self) -> Result<TickReport, WorldError> {
        self.eaten_food_last_tick = 0;

        let mut order: Vec<AgentId> = self.agents.keys().collect();
        order.shuffle(&mut self.rng);

        self.stage_perceive();
        self.stage_decide(&order);
        self.stage_move(&order)?;
        let (births, eaten) = self.stage_feed(&order)?;
        self.stage_age();
        let deaths = self.stage_cull();
        self.stage_replenish()?;

        self.eaten_food_last_tick = eaten;
        self.notify_listeners();
        self.time += 1;

        Ok(TickReport {
            time: self.time,
            births,
            deaths,
            eaten_food: eaten,
            fish: self.fish_count(),
            food: self.food_count(),
        })
    }

    /// Rebuild every fish's vision cache against the pre-tick snapshot.
    fn stage_perceive(&mut self) {
        let view = TickView {
            width: self.config.width,
            height: self.config.height,
            entries: self
                .agents
                .iter()
                .map(|(id, a)| TickViewEntry {
                    id,
                    position: a.position(),
                    alive: a.is_alive(),
                    is_food: a.is_food(),
                })
                .collect(),
        };
        let mut fish: Vec<(AgentId, &mut Agent)> = self
            .agents
            .iter_mut()
            .filter(|(_, a)| a.is_fish() && a.is_alive())
            .collect();
        fish.par_iter_mut()
            .for_each(|(id, agent)| agent.perceive(*id, &view));
    }

    fn stage_decide(&mut self, order: &[AgentId]) {
        for &id in order {
            if let Some(agent) = self.agents.get_mut(id) {
                agent.decide(&mut self.rng, &mut self.mutation_count);
            }
        }
    }

    /// Translate everyone. Fish first deflect around their nearest
    /// projected conflict (one counterpart per tick); a stationary
    /// counterpart is kicked away and moved immediately, which can move
    /// it a second time when its own turn comes.
    fn stage_move(&mut self, order: &[AgentId]) -> Result<(), WorldError> {
        let (width, height) = self.dimensions();
        for &id in order {
            let Some(agent) = self.agents.get(id) else {
                continue;
            };
            if !agent.is_alive() {
                continue;
            }
            if agent.is_fish() {
                // Only fish are obstacles; food must stay reachable.
                let mut conflict = None;
                for (other_id, other) in &self.agents {
                    if other_id == id || !other.is_alive() || !other.is_fish() {
                        continue;
                    }
                    if let Some((ux, uy)) = agent::collision_course(agent, other, width, height) {
                        conflict = Some((other_id, ux, uy));
                        break;
                    }
                }
                if let Some((other_id, ux, uy)) = conflict {
                    if let Some([mover, other]) = self.agents.get_disjoint_mut([id, other_id]) {
                        mover.set_heading(uy.atan2(ux) + std::f64::consts::FRAC_PI_2);
                        if mover.speed() == 0.0 {
                            mover.set_speed(mover.max_speed());
                        }
                        if other.speed() == 0.0 {
                            other.set_heading(mover.heading() + std::f64::consts::PI);
                            other.set_speed(other.max_speed());
                            other.translate(width, height)?;
                        }
                    }
                }
            }
            if let Some(agent) = self.agents.get_mut(id) {
                agent.translate(width, height)?;
            }
        }
        Ok(())
    }

    /// Fish eat the nearest food within body reach; a fed fish may then
    /// reproduce. Eaten food dies with its energy zeroed, so the transfer
    /// keeps the economy closed.
    fn stage_feed(&mut self, order: &[AgentId]) -> Result<(usize, u32), WorldError> {
        let (width, height) = self.dimensions();
        let mut births = 0;
        let mut eaten = 0;
        for &id in order {
            let Some(agent) = self.agents.get(id) else {
                continue;
            };
            if !agent.is_fish() || !agent.is_alive() {
                continue;
            }
            let reach_sq = agent.radius() * agent.radius();
            let origin = agent.position();
            let target = self
                .agents
                .iter()
                .filter(|(_, a)| a.is_food() && a.is_alive())
                .map(|(fid, a)| {
                    let dist = geometry::torus_distance_sq(origin, a.position(), width, height);
                    (fid, dist)
                })
                .filter(|(_, dist)| *dist < reach_sq)
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((food_id, _)) = target {
                if let Some([fish, food]) = self.agents.get_disjoint_mut([id, food_id]) {
                    fish.feed(food.energy());
                    food.kill();
                    eaten += 1;
                }
            }
            if let Some(fish) = self.agents.get_mut(id) {
                if let Some(child) = fish.reproduce(&mut self.rng, &mut self.mutation_count) {
                    self.agents.insert(child);
                    births += 1;
                }
            }
        }
        Ok((births, eaten))
    }

    /// Age everyone; fish upkeep flows back into the reserve.
    fn stage_age(&mut self) {
        let mut upkeep = 0;
        for agent in self.agents.values_mut() {
            if agent.is_alive() {
                upkeep += agent.grow();
            }
        }
        self.energy_reserve += upkeep;
    }

    fn stage_cull(&mut self) -> usize {
        let before = self.agents.len();
        self.agents.retain(|_, agent| agent.is_alive());
        before - self.agents.len()
    }

    /// Spend the reserve: pay out queued food seeds, then either rescue a
    /// population at or below the floor with one forced fish, or convert
    /// the remaining reserve into food.
    fn stage_replenish(&mut self) -> Result<(), WorldError> {
        let pending = std::mem::take(&mut self.pending_seeds);
        let mut unpaid = Vec::new();
        for seed in pending {
            if self.energy_reserve >= FOOD_ENERGY {
                self.energy_reserve -= FOOD_ENERGY;
                let food = self.drifting_food(seed);
                self.add_agent(food)?;
            } else {
                unpaid.push(seed);
            }
        }
        self.pending_seeds = unpaid;

        if self.fish_count() <= self.config.min_population {
            if self.energy_reserve >= NEWBORN_ENERGY_DEFAULT {
                let fish = self.random_fish()?;
                fish.policy()
                    .ok_or(WorldError::NoPolicySpawner)?
                    .mutate_in_place(&mut self.rng);
                self.mutation_count += 1;
                self.energy_reserve -= fish.energy();
                self.add_agent(fish)?;
            }
            return Ok(());
        }

        if self.energy_reserve < FOOD_ENERGY {
            return Ok(());
        }
        // Cell division: each live food splits at most once per tick.
        let mut parents: Vec<Position> = self
            .food()
            .filter(|(_, a)| a.is_alive())
            .map(|(_, a)| a.position())
            .collect();
        parents.reverse();
        while self.energy_reserve >= FOOD_ENERGY {
            self.energy_reserve -= FOOD_ENERGY;
            let food = match parents.pop() {
                Some(position) => self.drifting_food(position),
                None => self.random_food(),
            };
            self.add_agent(food)?;
        }
        Ok(())
    }

    fn notify_listeners(&mut self) {
        let mut listeners = std::mem::take(&mut self.listeners);
        for listener in &mut listeners {
            listener.on_tick(self);
        }
        self.listeners = listeners;
    }

    /// Fresh fish at a random position with a policy from the spawner.
    fn random_fish(&mut self) -> Result<Agent, WorldError> {
        let spawner = self.policy_spawner.as_ref().ok_or(WorldError::NoPolicySpawner)?;
        let x = self.rng.random_range(0.0..self.config.width);
        let y = self.rng.random_range(0.0..self.config.height);
        let heading = self.rng.random_range(0.0..std::f64::consts::TAU);
        let policy = spawner(&mut self.rng);
        Ok(Agent::fish(x, y, heading, 0.0, policy))
    }

    fn random_food(&mut self) -> Agent {
        let x = self.rng.random_range(0.0..self.config.width);
        let y = self.rng.random_range(0.0..self.config.height);
        self.drifting_food(Position::new(x, y))
    }

    fn drifting_food(&mut self, position: Position) -> Agent {
        let heading = self.rng.random_range(0.0..std::f64::consts::TAU);
        let speed = self.rng.random_range(0.0..FOOD_MAX_SPEED);
        Agent::food(position.x, position.y, heading, speed)
    }
}

/// Normalize by at most one wraparound step. Unlike modular wrapping this
/// cannot hide a grossly out-of-range coordinate.
fn wrap_once(value: f64, extent: f64) -> f64 {
    if value < 0.0 {
        value + extent
    } else if value >= extent {
        value - extent
    } else {
        value
    }
}

/// Fixed-output policy for unit tests.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct StubPolicy {
    pub delta_angle: f64,
    pub delta_speed: f64,
}

#[cfg(test)]
impl Policy for StubPolicy {
    fn activate(&mut self, _inputs: &[f64]) -> PolicyOutput {
        PolicyOutput {
            delta_angle: self.delta_angle,
            delta_speed: self.delta_speed,
        }
    }

    fn mutate(&self, _rng: &mut dyn RngCore) -> Box<dyn Policy> {
        Box::new(self.clone())
    }

    fn clone_box(&self) -> Box<dyn Policy> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
