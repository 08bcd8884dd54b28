//! JSON snapshot persistence for fishbowl worlds.
//!
//! A [`WorldSnapshot`] is a plain serde tree of everything a world needs
//! to resume: dimensions, tick counter, energy reserve, mutation counter,
//! and the agent list. Vision caches are transient and recomputed on the
//! first tick after a load, so they are never written out.
//!
//! Installed policies are trait objects, so snapshots go through a
//! [`PolicyCodec`]. [`JsonPolicyCodec`] covers any serde-enabled policy
//! type, including the baseline `fishbowl-brain` network.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::marker::PhantomData;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use fishbowl_core::{Agent, Policy, World, WorldConfig, WorldError};

/// Persistence failures. Loads are all-or-nothing; a snapshot that fails
/// to parse or violates a world contract is rejected whole.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("snapshot i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    World(#[from] WorldError),
    #[error("installed policy is not handled by this codec")]
    UnknownPolicy,
}

/// Encode installed policies to JSON values and back.
pub trait PolicyCodec {
    fn encode(&self, policy: &dyn Policy) -> Result<serde_json::Value, StorageError>;
    fn decode(&self, value: &serde_json::Value) -> Result<Box<dyn Policy>, StorageError>;
}

/// Codec for a single concrete serde-enabled policy type.
pub struct JsonPolicyCodec<P> {
    _marker: PhantomData<P>,
}

impl<P> Default for JsonPolicyCodec<P> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<P> JsonPolicyCodec<P> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<P> PolicyCodec for JsonPolicyCodec<P>
where
    P: Policy + Serialize + DeserializeOwned + 'static,
{
    fn encode(&self, policy: &dyn Policy) -> Result<serde_json::Value, StorageError> {
        let concrete = policy
            .as_any()
            .downcast_ref::<P>()
            .ok_or(StorageError::UnknownPolicy)?;
        Ok(serde_json::to_value(concrete)?)
    }

    fn decode(&self, value: &serde_json::Value) -> Result<Box<dyn Policy>, StorageError> {
        let concrete: P = serde_json::from_value(value.clone())?;
        Ok(Box::new(concrete))
    }
}

/// One persisted agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentRecord {
    Food {
        x: f64,
        y: f64,
        heading: f64,
        speed: f64,
        energy: i64,
        age: u64,
    },
    Fish {
        x: f64,
        y: f64,
        heading: f64,
        speed: f64,
        energy: i64,
        age: u64,
        generation: u32,
        newborn_energy: i64,
        post_birth_energy: i64,
        policy: serde_json::Value,
    },
}

/// Serializable image of a whole world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub config: WorldConfig,
    pub time: u64,
    pub energy_reserve: i64,
    pub mutation_count: u64,
    pub agents: Vec<AgentRecord>,
}

impl WorldSnapshot {
    /// Capture the world. Policies are encoded under their handles' locks.
    pub fn capture(world: &World, codec: &dyn PolicyCodec) -> Result<Self, StorageError> {
        let mut agents = Vec::new();
        for (_, agent) in world.agents() {
            agents.push(record_agent(agent, codec)?);
        }
        Ok(Self {
            config: world.config().clone(),
            time: world.time(),
            energy_reserve: world.energy_reserve(),
            mutation_count: world.mutation_count(),
            agents,
        })
    }

    /// Rebuild a world from this snapshot. The caller re-installs the
    /// policy spawner and listeners; those are runtime wiring, not state.
    pub fn restore(&self, codec: &dyn PolicyCodec) -> Result<World, StorageError> {
        let mut world = World::with_config(self.config.clone())?;
        world.set_time(self.time);
        world.set_energy_reserve(self.energy_reserve)?;
        world.set_mutation_count(self.mutation_count);
        for record in &self.agents {
            let agent = match record {
                AgentRecord::Food {
                    x,
                    y,
                    heading,
                    speed,
                    energy,
                    age,
                } => Agent::restore_food(*x, *y, *heading, *speed, *energy, *age)?,
                AgentRecord::Fish {
                    x,
                    y,
                    heading,
                    speed,
                    energy,
                    age,
                    generation,
                    newborn_energy,
                    post_birth_energy,
                    policy,
                } => Agent::restore_fish(
                    *x,
                    *y,
                    *heading,
                    *speed,
                    *energy,
                    *age,
                    *generation,
                    *newborn_energy,
                    *post_birth_energy,
                    codec.decode(policy)?,
                )?,
            };
            world.add_agent(agent)?;
        }
        Ok(world)
    }
}

fn record_agent(agent: &Agent, codec: &dyn PolicyCodec) -> Result<AgentRecord, StorageError> {
    if let Some(handle) = agent.policy() {
        let policy = handle.with(|p| codec.encode(p))?;
        Ok(AgentRecord::Fish {
            x: agent.x(),
            y: agent.y(),
            heading: agent.heading(),
            speed: agent.speed(),
            energy: agent.energy(),
            age: agent.age(),
            generation: agent.generation().unwrap_or(0),
            newborn_energy: agent.newborn_energy().unwrap_or(0),
            post_birth_energy: agent.post_birth_energy().unwrap_or(0),
            policy,
        })
    } else {
        Ok(AgentRecord::Food {
            x: agent.x(),
            y: agent.y(),
            heading: agent.heading(),
            speed: agent.speed(),
            energy: agent.energy(),
            age: agent.age(),
        })
    }
}

/// Snapshot the world to a pretty-printed JSON file.
pub fn save_world(
    world: &World,
    codec: &dyn PolicyCodec,
    path: impl AsRef<Path>,
) -> Result<(), StorageError> {
    let snapshot = WorldSnapshot::capture(world, codec)?;
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), &snapshot)?;
    Ok(())
}

/// Load a world from a JSON snapshot file.
pub fn load_world(path: impl AsRef<Path>, codec: &dyn PolicyCodec) -> Result<World, StorageError> {
    let file = File::open(path)?;
    let snapshot: WorldSnapshot = serde_json::from_reader(BufReader::new(file))?;
    snapshot.restore(codec)
}
