//! Agent state machine: food and neural-controlled fish.

use ordered_float::OrderedFloat;
use rand::{Rng, RngCore};

use crate::geometry::{
    cos_between, cross, heading_vector, torus_distance_sq, wrap_coordinate, Position,
};
use crate::{AgentId, Policy, PolicyHandle, PolicyInputs, TickView, WorldError, POLICY_INPUTS};

/// Energy granted to a newborn fish (and debited from its parent).
pub const NEWBORN_ENERGY_DEFAULT: i64 = 6;
/// Energy a parent keeps in reserve after giving birth; reproduction
/// triggers only when energy exceeds newborn + post-birth.
pub const POST_BIRTH_ENERGY_DEFAULT: i64 = 4;
/// Energy carried by one unit of food.
pub const FOOD_ENERGY: i64 = 1;
/// Fixed radius of food particles.
pub const FOOD_RADIUS: f64 = 2.0;
/// Top speed of drifting food.
pub const FOOD_MAX_SPEED: f64 = 3.0;
/// Smallest fish radius; also anchors the speed limit scale.
pub const MIN_RADIUS: f64 = 1.0;
/// Speed limit of a minimum-radius fish; larger fish move proportionally slower.
pub const MAX_SPEED: f64 = 20.0;
/// Fish radius per sqrt unit of energy.
pub const RADIUS_SCALE: f64 = 2.0;
/// Ticks between upkeep charges, per unit of radius. Bigger fish pay less often.
pub const UPKEEP_TICKS_PER_RADIUS: f64 = 20.0;
/// Extra clearance added to the sum of radii when predicting collisions.
pub const COLLISION_MARGIN: f64 = 3.0;
/// How far an agent can see.
pub const EYESIGHT_DISTANCE: f64 = 100.0;
/// Half-angle of the vision cone.
pub const EYESIGHT_ANGLE: f64 = std::f64::consts::FRAC_PI_4;
/// Largest per-tick heading change a policy may request.
pub const MAX_DELTA_ANGLE: f64 = 1.0;
/// One-in-N chance of a spontaneous policy mutation per decision.
pub const MUTATE_FACTOR: u32 = 1000;
/// One-in-N chance of mutating a newborn's inherited policy and thresholds.
pub const NEWBORN_MUTATE_CHANCE: u32 = 10;

/// Policy input marker: nearest visible target is food.
pub const FOOD_SIGNAL: f64 = 10.0;
/// Policy input marker: nearest visible target is another fish.
pub const PEER_SIGNAL: f64 = -10.0;
/// Policy input marker: nothing visible.
pub const EMPTY_SIGNAL: f64 = 0.0;

/// A perceived agent, held in a fish's vision cache for one tick.
///
/// `position` is the ghost-adjusted placement that passed the cone test,
/// so direction math stays correct across the wraparound seam.
#[derive(Debug, Clone, Copy)]
pub struct VisionEntry {
    pub id: AgentId,
    pub distance: OrderedFloat<f64>,
    pub position: Position,
}

/// Per-tick perception results, sorted by ascending toroidal distance.
#[derive(Debug, Clone, Default)]
pub struct VisionCache {
    pub food: Vec<VisionEntry>,
    pub peers: Vec<VisionEntry>,
}

impl VisionCache {
    fn clear(&mut self) {
        self.food.clear();
        self.peers.clear();
    }
}

/// Fish-only state: the replaceable controller and reproduction economics.
#[derive(Debug)]
pub struct FishState {
    policy: PolicyHandle,
    generation: u32,
    newborn_energy: i64,
    post_birth_energy: i64,
    vision: VisionCache,
}

/// Variant tag distinguishing the two agent kinds.
#[derive(Debug)]
pub enum AgentKind {
    Food,
    Fish(Box<FishState>),
}

/// One individual in the world: drifting food or a policy-driven fish.
#[derive(Debug)]
pub struct Agent {
    position: Position,
    heading: f64,
    speed: f64,
    energy: i64,
    age: u64,
    alive: bool,
    kind: AgentKind,
}

impl Agent {
    /// A unit of food drifting with the given heading and speed.
    #[must_use]
    pub fn food(x: f64, y: f64, heading: f64, speed: f64) -> Self {
        let mut agent = Self {
            position: Position::new(x, y),
            heading,
            speed: 0.0,
            energy: FOOD_ENERGY,
            age: 0,
            alive: true,
            kind: AgentKind::Food,
        };
        agent.set_speed(speed);
        agent
    }

    /// A newborn fish controlled by `policy`, with default reproduction thresholds.
    #[must_use]
    pub fn fish(x: f64, y: f64, heading: f64, speed: f64, policy: Box<dyn Policy>) -> Self {
        let mut agent = Self {
            position: Position::new(x, y),
            heading,
            speed: 0.0,
            energy: NEWBORN_ENERGY_DEFAULT,
            age: 0,
            alive: true,
            kind: AgentKind::Fish(Box::new(FishState {
                policy: PolicyHandle::new(policy),
                generation: 0,
                newborn_energy: NEWBORN_ENERGY_DEFAULT,
                post_birth_energy: POST_BIRTH_ENERGY_DEFAULT,
                vision: VisionCache::default(),
            })),
        };
        agent.set_speed(speed);
        agent
    }

    /// Rebuild a food agent from persisted fields.
    pub fn restore_food(
        x: f64,
        y: f64,
        heading: f64,
        speed: f64,
        energy: i64,
        age: u64,
    ) -> Result<Self, WorldError> {
        let mut agent = Self::food(x, y, heading, speed);
        agent.age = age;
        agent.set_energy(energy)?;
        Ok(agent)
    }

    /// Rebuild a fish from persisted fields.
    #[allow(clippy::too_many_arguments)]
    pub fn restore_fish(
        x: f64,
        y: f64,
        heading: f64,
        speed: f64,
        energy: i64,
        age: u64,
        generation: u32,
        newborn_energy: i64,
        post_birth_energy: i64,
        policy: Box<dyn Policy>,
    ) -> Result<Self, WorldError> {
        let mut agent = Self::fish(x, y, heading, 0.0, policy);
        agent.age = age;
        if let AgentKind::Fish(fish) = &mut agent.kind {
            fish.generation = generation;
            fish.newborn_energy = newborn_energy;
            fish.post_birth_energy = post_birth_energy;
        }
        // Energy first: the speed cap depends on the restored radius, not
        // the newborn default.
        agent.set_energy(energy)?;
        agent.set_speed(speed);
        Ok(agent)
    }

    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    #[must_use]
    pub const fn x(&self) -> f64 {
        self.position.x
    }

    #[must_use]
    pub const fn y(&self) -> f64 {
        self.position.y
    }

    pub(crate) fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    #[must_use]
    pub const fn heading(&self) -> f64 {
        self.heading
    }

    pub fn set_heading(&mut self, heading: f64) {
        self.heading = heading;
    }

    #[must_use]
    pub const fn speed(&self) -> f64 {
        self.speed
    }

    /// Clamp `speed` into `[0, max_speed]` and store it.
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed.clamp(0.0, self.max_speed());
    }

    /// Radius-dependent speed limit: smaller agents are allowed to move faster.
    #[must_use]
    pub fn max_speed(&self) -> f64 {
        match self.kind {
            AgentKind::Food => FOOD_MAX_SPEED,
            AgentKind::Fish(_) => MAX_SPEED * MIN_RADIUS / self.radius(),
        }
    }

    /// Body radius. Food is fixed; fish grow with the square root of energy.
    #[must_use]
    pub fn radius(&self) -> f64 {
        match self.kind {
            AgentKind::Food => FOOD_RADIUS,
            AgentKind::Fish(_) => (RADIUS_SCALE * (self.energy.max(0) as f64).sqrt())
                .max(MIN_RADIUS),
        }
    }

    #[must_use]
    pub const fn energy(&self) -> i64 {
        self.energy
    }

    /// Set the energy level. Zero marks the agent dead; negative values are
    /// a caller contract violation and rejected outright.
    pub fn set_energy(&mut self, energy: i64) -> Result<(), WorldError> {
        if energy < 0 {
            return Err(WorldError::NegativeEnergy { energy });
        }
        self.energy = energy;
        if energy == 0 {
            self.alive = false;
        }
        Ok(())
    }

    /// Drop dead on the spot, zeroing any remaining energy.
    pub(crate) fn kill(&mut self) {
        self.energy = 0;
        self.alive = false;
    }

    #[must_use]
    pub const fn age(&self) -> u64 {
        self.age
    }

    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.alive
    }

    #[must_use]
    pub const fn is_food(&self) -> bool {
        matches!(self.kind, AgentKind::Food)
    }

    #[must_use]
    pub const fn is_fish(&self) -> bool {
        matches!(self.kind, AgentKind::Fish(_))
    }

    #[must_use]
    pub fn generation(&self) -> Option<u32> {
        match &self.kind {
            AgentKind::Food => None,
            AgentKind::Fish(fish) => Some(fish.generation),
        }
    }

    #[must_use]
    pub fn newborn_energy(&self) -> Option<i64> {
        match &self.kind {
            AgentKind::Food => None,
            AgentKind::Fish(fish) => Some(fish.newborn_energy),
        }
    }

    #[must_use]
    pub fn post_birth_energy(&self) -> Option<i64> {
        match &self.kind {
            AgentKind::Food => None,
            AgentKind::Fish(fish) => Some(fish.post_birth_energy),
        }
    }

    /// Handle to the installed policy, if this agent is a fish.
    #[must_use]
    pub fn policy(&self) -> Option<&PolicyHandle> {
        match &self.kind {
            AgentKind::Food => None,
            AgentKind::Fish(fish) => Some(&fish.policy),
        }
    }

    /// Current perception results (fish only).
    #[must_use]
    pub fn vision(&self) -> Option<&VisionCache> {
        match &self.kind {
            AgentKind::Food => None,
            AgentKind::Fish(fish) => Some(&fish.vision),
        }
    }

    /// A fish is fertile only while both thresholds are positive.
    #[must_use]
    pub fn is_fertile(&self) -> bool {
        match &self.kind {
            AgentKind::Food => false,
            AgentKind::Fish(fish) => fish.newborn_energy > 0 && fish.post_birth_energy > 0,
        }
    }

    /// Recompute the vision cache against the pre-tick snapshot in `view`.
    ///
    /// `self_id` excludes the observer from its own peer list.
    pub fn perceive(&mut self, self_id: AgentId, view: &TickView) {
        let origin = self.position;
        let heading = self.heading;
        let AgentKind::Fish(fish) = &mut self.kind else {
            return;
        };
        fish.vision.clear();
        for entry in &view.entries {
            if entry.id == self_id || !entry.alive {
                continue;
            }
            let Some((placed, distance)) =
                sight_candidate(origin, heading, entry.position, view.width, view.height)
            else {
                continue;
            };
            let seen = VisionEntry {
                id: entry.id,
                distance: OrderedFloat(distance),
                position: placed,
            };
            if entry.is_food {
                fish.vision.food.push(seen);
            } else {
                fish.vision.peers.push(seen);
            }
        }
        fish.vision.food.sort_by_key(|entry| entry.distance);
        fish.vision.peers.sort_by_key(|entry| entry.distance);
    }

    /// Run one decision step: consult the policy with the current vision
    /// cache and apply clamped heading/speed deltas. Spontaneous policy
    /// mutation fires here with chance `1/MUTATE_FACTOR` per event.
    pub fn decide(&mut self, rng: &mut dyn RngCore, mutations: &mut u64) {
        if !self.is_fish() || !self.alive {
            return;
        }
        self.maybe_mutate(MUTATE_FACTOR, rng, mutations);

        let inputs = self.policy_inputs();
        let AgentKind::Fish(fish) = &self.kind else {
            return;
        };
        let output = fish.policy.activate(&inputs);

        // A malformed controller output must not destabilize movement.
        let delta_angle = finite_or_zero(output.delta_angle).clamp(-MAX_DELTA_ANGLE, MAX_DELTA_ANGLE);
        let delta_speed = finite_or_zero(output.delta_speed);

        self.set_heading(self.heading + delta_angle);
        self.set_speed(self.speed + delta_speed);
    }

    /// Assemble the fixed policy input vector from the vision cache.
    #[must_use]
    pub fn policy_inputs(&self) -> PolicyInputs {
        let mut inputs = [EMPTY_SIGNAL; POLICY_INPUTS];
        inputs[0] = self.energy as f64;
        let AgentKind::Fish(fish) = &self.kind else {
            return inputs;
        };
        if let Some(food) = fish.vision.food.first() {
            inputs[1] = FOOD_SIGNAL;
            inputs[2] = food.distance.into_inner();
            inputs[3] = self.signed_cos_towards(food.position);
        }
        if let Some(peer) = fish.vision.peers.first() {
            inputs[4] = PEER_SIGNAL;
            inputs[5] = peer.distance.into_inner();
            inputs[6] = self.signed_cos_towards(peer.position);
        }
        inputs
    }

    /// Cosine of the angle between heading and the direction to `target`,
    /// signed negative when the target lies to the right.
    fn signed_cos_towards(&self, target: Position) -> f64 {
        let (rx, ry) = heading_vector(self.heading);
        let dx = target.x - self.position.x;
        let dy = target.y - self.position.y;
        cross(rx, ry, dx, dy).signum() * cos_between(rx, ry, dx, dy)
    }

    /// Where this agent will be after the current tick's translation,
    /// before wraparound normalization.
    #[must_use]
    pub fn projected_position(&self) -> Position {
        let (rx, ry) = heading_vector(self.heading);
        Position::new(
            self.position.x + rx * self.speed,
            self.position.y + ry * self.speed,
        )
    }

    /// Translate along the heading and wrap back into bounds.
    pub fn translate(&mut self, width: f64, height: f64) -> Result<(), WorldError> {
        let projected = self.projected_position();
        let wrapped = Position::new(
            wrap_coordinate(projected.x, width),
            wrap_coordinate(projected.y, height),
        );
        if !(0.0..width).contains(&wrapped.x) || !(0.0..height).contains(&wrapped.y) {
            return Err(WorldError::OutOfBounds {
                x: wrapped.x,
                y: wrapped.y,
            });
        }
        self.position = wrapped;
        Ok(())
    }

    /// Absorb eaten food energy.
    pub fn feed(&mut self, food_energy: i64) {
        self.energy += food_energy.max(0);
    }

    /// Age by one tick and pay upkeep when due. Returns the energy paid,
    /// which the world credits back to its reserve. Upkeep frequency falls
    /// with radius, so big fish pay less often.
    pub fn grow(&mut self) -> i64 {
        self.age += 1;
        if !self.is_fish() || self.energy <= 0 {
            return 0;
        }
        let interval = upkeep_interval(self.radius());
        if self.age % interval != 0 {
            return 0;
        }
        self.energy -= 1;
        if self.energy == 0 {
            self.alive = false;
        }
        1
    }

    /// Spawn a child if energy strictly exceeds `newborn + post_birth`.
    ///
    /// The child starts at the parent's position with zero speed, a random
    /// heading, the parent's lineage depth, and a possibly-mutated copy of
    /// the parent's policy; the parent is debited the child's energy.
    /// Thresholds are heritable and may drift by ±1 under the newborn
    /// mutation chance, which is how infertile lineages can arise.
    pub fn reproduce(&mut self, rng: &mut dyn RngCore, mutations: &mut u64) -> Option<Agent> {
        if !self.alive || !self.is_fertile() {
            return None;
        }
        let AgentKind::Fish(fish) = &self.kind else {
            return None;
        };
        let child_energy = fish.newborn_energy;
        if self.energy <= fish.newborn_energy + fish.post_birth_energy {
            return None;
        }

        let mut newborn_energy = fish.newborn_energy;
        let mut post_birth_energy = fish.post_birth_energy;
        if rng.random_ratio(1, NEWBORN_MUTATE_CHANCE) {
            newborn_energy += rng.random_range(-1..=1);
        }
        if rng.random_ratio(1, NEWBORN_MUTATE_CHANCE) {
            post_birth_energy += rng.random_range(-1..=1);
        }

        let heading = rng.random_range(0.0..std::f64::consts::TAU);
        let mut child = Agent {
            position: self.position,
            heading,
            speed: 0.0,
            energy: child_energy,
            age: 0,
            alive: true,
            kind: AgentKind::Fish(Box::new(FishState {
                policy: fish.policy.fork(),
                generation: fish.generation,
                newborn_energy,
                post_birth_energy,
                vision: VisionCache::default(),
            })),
        };
        child.maybe_mutate(NEWBORN_MUTATE_CHANCE, rng, mutations);

        self.energy -= child_energy;
        Some(child)
    }

    /// Replace the policy with a mutated copy with chance `1/chance`; a
    /// second independent draw can stack a double mutation. Each mutation
    /// bumps the shared counter; a fired event deepens the lineage by one.
    fn maybe_mutate(&mut self, chance: u32, rng: &mut dyn RngCore, mutations: &mut u64) {
        let AgentKind::Fish(fish) = &mut self.kind else {
            return;
        };
        if !rng.random_ratio(1, chance) {
            return;
        }
        fish.policy.mutate_in_place(rng);
        *mutations += 1;
        if rng.random_ratio(1, chance) {
            fish.policy.mutate_in_place(rng);
            *mutations += 1;
        }
        fish.generation += 1;
    }
}

/// Ticks between upkeep charges for a body of the given radius.
#[must_use]
pub fn upkeep_interval(radius: f64) -> u64 {
    (UPKEEP_TICKS_PER_RADIUS * radius).round().max(1.0) as u64
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// Cone test against one concrete target placement.
fn cone_test(origin: Position, heading: f64, target: Position) -> Option<f64> {
    let dx = target.x - origin.x;
    let dy = target.y - origin.y;
    let dist_sq = dx * dx + dy * dy;
    if dist_sq > EYESIGHT_DISTANCE * EYESIGHT_DISTANCE {
        return None;
    }
    let (rx, ry) = heading_vector(heading);
    if cos_between(rx, ry, dx, dy) > EYESIGHT_ANGLE.cos() {
        Some(dist_sq.sqrt())
    } else {
        None
    }
}

/// Visibility with toroidal wraparound: test the real placement plus the
/// ghost images shifted by ±width/±height (and both) — but only the shifts
/// where the target sits within eyesight of the relevant edge, since no
/// other ghost can possibly land inside the cone. Returns the placement
/// that passed and its distance.
pub(crate) fn sight_candidate(
    origin: Position,
    heading: f64,
    target: Position,
    width: f64,
    height: f64,
) -> Option<(Position, f64)> {
    if let Some(dist) = cone_test(origin, heading, target) {
        return Some((target, dist));
    }

    let mut ghost_x = target.x;
    if target.x < EYESIGHT_DISTANCE {
        ghost_x = target.x + width;
    } else if target.x > width - EYESIGHT_DISTANCE {
        ghost_x = target.x - width;
    }
    let mut ghost_y = target.y;
    if target.y < EYESIGHT_DISTANCE {
        ghost_y = target.y + height;
    } else if target.y > height - EYESIGHT_DISTANCE {
        ghost_y = target.y - height;
    }

    let shifted_x = (ghost_x - target.x).abs() > f64::EPSILON;
    let shifted_y = (ghost_y - target.y).abs() > f64::EPSILON;

    if shifted_x {
        let candidate = Position::new(ghost_x, target.y);
        if let Some(dist) = cone_test(origin, heading, candidate) {
            return Some((candidate, dist));
        }
    }
    if shifted_y {
        let candidate = Position::new(target.x, ghost_y);
        if let Some(dist) = cone_test(origin, heading, candidate) {
            return Some((candidate, dist));
        }
    }
    if shifted_x && shifted_y {
        let candidate = Position::new(ghost_x, ghost_y);
        if let Some(dist) = cone_test(origin, heading, candidate) {
            return Some((candidate, dist));
        }
    }
    None
}

/// Predicted-overlap test used by the collision resolver: heading towards
/// the other agent and the projected gap under the contact distance.
pub(crate) fn collision_course(
    mover: &Agent,
    other: &Agent,
    width: f64,
    height: f64,
) -> Option<(f64, f64)> {
    let projected = mover.projected_position();
    let future_gap_sq = torus_distance_sq(projected, other.position(), width, height);
    let contact = mover.radius() + other.radius() + COLLISION_MARGIN;
    if future_gap_sq >= contact * contact {
        return None;
    }
    let ux = crate::geometry::torus_delta(mover.x(), other.x(), width);
    let uy = crate::geometry::torus_delta(mover.y(), other.y(), height);
    let (rx, ry) = heading_vector(mover.heading());
    if ux * rx + uy * ry > 0.0 {
        Some((ux, uy))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StubPolicy;
    use rand::SeedableRng;

    fn test_fish(x: f64, y: f64, heading: f64, speed: f64) -> Agent {
        Agent::fish(x, y, heading, speed, Box::new(StubPolicy::default()))
    }

    #[test]
    fn fish_radius_grows_with_sqrt_of_energy() {
        let mut fish = test_fish(0.0, 0.0, 0.0, 0.0);
        let small = fish.radius();
        fish.set_energy(24).unwrap();
        let big = fish.radius();
        assert!((small - RADIUS_SCALE * 6.0_f64.sqrt()).abs() < 1e-9);
        assert!((big - small * 2.0).abs() < 1e-9, "radius scales with sqrt");
    }

    #[test]
    fn speed_limit_shrinks_with_radius() {
        let mut fish = test_fish(0.0, 0.0, 0.0, 0.0);
        fish.set_speed(f64::MAX);
        let newborn_speed = fish.speed();
        fish.set_energy(100).unwrap();
        fish.set_speed(f64::MAX);
        assert!(fish.speed() < newborn_speed);
        fish.set_speed(-2.0);
        assert_eq!(fish.speed(), 0.0);
    }

    #[test]
    fn restore_keeps_a_lean_fish_fast() {
        // Energy 1 gives radius 2 and a speed cap of 10; a persisted speed
        // of 9 must not be clamped against the newborn radius.
        let fish = Agent::restore_fish(
            5.0,
            5.0,
            0.0,
            9.0,
            1,
            40,
            2,
            NEWBORN_ENERGY_DEFAULT,
            POST_BIRTH_ENERGY_DEFAULT,
            Box::new(StubPolicy::default()),
        )
        .unwrap();
        assert_eq!(fish.energy(), 1);
        assert!((fish.max_speed() - 10.0).abs() < 1e-9);
        assert_eq!(fish.speed(), 9.0);
    }

    #[test]
    fn zero_energy_marks_dead_and_negative_is_rejected() {
        let mut fish = test_fish(0.0, 0.0, 0.0, 0.0);
        assert!(fish.is_alive());
        fish.set_energy(0).unwrap();
        assert!(!fish.is_alive());
        assert!(matches!(
            fish.set_energy(-1),
            Err(WorldError::NegativeEnergy { energy: -1 })
        ));
    }

    #[test]
    fn upkeep_fires_on_the_radius_interval() {
        let mut fish = test_fish(0.0, 0.0, 0.0, 0.0);
        let interval = upkeep_interval(fish.radius());
        assert!(interval > 1);
        let mut paid = 0;
        for _ in 0..interval {
            paid += fish.grow();
        }
        assert_eq!(paid, 1, "exactly one charge across one interval");
        assert_eq!(fish.energy(), NEWBORN_ENERGY_DEFAULT - 1);
    }

    #[test]
    fn food_never_pays_upkeep() {
        let mut food = Agent::food(0.0, 0.0, 0.0, 0.0);
        for _ in 0..1000 {
            assert_eq!(food.grow(), 0);
        }
        assert_eq!(food.energy(), FOOD_ENERGY);
    }

    #[test]
    fn translate_wraps_and_stays_in_bounds() {
        let mut fish = test_fish(99.0, 0.0, 0.0, 2.0);
        fish.translate(100.0, 200.0).unwrap();
        assert!((fish.x() - 1.0).abs() < 1e-9);
        assert!((fish.y() - 0.0).abs() < 1e-9);
    }

    #[test]
    fn reproduction_threshold_is_strict() {
        let mut rng = rand::rngs::SmallRng::seed_from_u64(7);
        let mut mutations = 0;

        let mut at_threshold = test_fish(10.0, 10.0, 0.0, 0.0);
        at_threshold
            .set_energy(NEWBORN_ENERGY_DEFAULT + POST_BIRTH_ENERGY_DEFAULT)
            .unwrap();
        assert!(at_threshold.reproduce(&mut rng, &mut mutations).is_none());

        let mut above = test_fish(10.0, 10.0, 0.0, 0.0);
        above
            .set_energy(NEWBORN_ENERGY_DEFAULT + POST_BIRTH_ENERGY_DEFAULT + 1)
            .unwrap();
        let child = above.reproduce(&mut rng, &mut mutations).expect("child");
        assert_eq!(child.energy(), NEWBORN_ENERGY_DEFAULT);
        assert_eq!(child.speed(), 0.0);
        assert_eq!(child.position(), above.position());
        assert_eq!(
            above.energy(),
            POST_BIRTH_ENERGY_DEFAULT + 1,
            "parent debited the child's energy"
        );
    }

    #[test]
    fn non_positive_thresholds_mean_infertile() {
        let mut rng = rand::rngs::SmallRng::seed_from_u64(7);
        let mut mutations = 0;
        let mut fish = Agent::restore_fish(
            0.0,
            0.0,
            0.0,
            0.0,
            1000,
            0,
            3,
            NEWBORN_ENERGY_DEFAULT,
            0,
            Box::new(StubPolicy::default()),
        )
        .unwrap();
        assert!(!fish.is_fertile());
        assert!(fish.reproduce(&mut rng, &mut mutations).is_none());
    }

    #[test]
    fn ghost_candidates_only_near_edges() {
        // Observer near the right seam looking right; target just across it.
        let origin = Position::new(199.0, 100.0);
        let target = Position::new(1.0, 100.0);
        let hit = sight_candidate(origin, 0.0, target, 200.0, 200.0).expect("visible");
        assert!((hit.1 - 2.0).abs() < 1e-9);
        assert!((hit.0.x - 201.0).abs() < 1e-9, "ghost shifted by +width");

        // Far from any edge the raw placement is the only candidate.
        let origin = Position::new(500.0, 500.0);
        let target = Position::new(620.0, 500.0);
        assert!(sight_candidate(origin, 0.0, target, 1200.0, 1200.0).is_none());
    }

    #[test]
    fn vision_cone_rejects_targets_behind() {
        let origin = Position::new(100.0, 100.0);
        assert!(sight_candidate(origin, 0.0, Position::new(101.0, 100.0), 200.0, 200.0).is_some());
        assert!(sight_candidate(origin, 0.0, Position::new(99.0, 100.0), 200.0, 200.0).is_none());
        assert!(sight_candidate(origin, 0.0, Position::new(100.0, 101.0), 200.0, 200.0).is_none());

        // Just inside / just outside the half-angle.
        let eps = 1e-10;
        let inside = Position::new(
            100.0 + 10.0 * (EYESIGHT_ANGLE - eps).cos(),
            100.0 + 10.0 * (EYESIGHT_ANGLE - eps).sin(),
        );
        let outside = Position::new(
            100.0 + 10.0 * (EYESIGHT_ANGLE + 1e-3).cos(),
            100.0 + 10.0 * (EYESIGHT_ANGLE + 1e-3).sin(),
        );
        assert!(sight_candidate(origin, 0.0, inside, 200.0, 200.0).is_some());
        assert!(sight_candidate(origin, 0.0, outside, 200.0, 200.0).is_none());
    }

    #[test]
    fn sight_is_translation_invariant_away_from_seams() {
        let offsets = [(0.0, 0.0), (150.0, 80.0), (300.0, 240.0)];
        for (ox, oy) in offsets {
            let origin = Position::new(200.0 + ox, 200.0 + oy);
            let target = Position::new(230.0 + ox, 215.0 + oy);
            let hit = sight_candidate(origin, 0.5, target, 1000.0, 1000.0);
            let (placed, dist) = hit.expect("target inside the cone");
            assert_eq!(placed, target);
            assert!((dist - 15.0 * 5.0_f64.sqrt()).abs() < 1e-9);
        }
    }

    #[test]
    fn modulus_matches_hypot() {
        assert!((crate::geometry::modulus(3.0, 4.0) - 5.0).abs() < 1e-12);
    }
}
