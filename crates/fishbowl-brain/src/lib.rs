//! Baseline neural controller for fish.
//!
//! A small feed-forward network of threshold-function neurons. The first
//! [`POLICY_INPUTS`] neurons receive the sensory vector, signals flow along
//! weighted links in neuron index order, and the last two neurons are read
//! back as the heading and speed deltas. The whole genome (activation kinds,
//! parameters, link weights) is serializable and mutation-friendly.

use std::any::Any;

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use fishbowl_core::{Policy, PolicyOutput, PolicySpawner, POLICY_INPUTS};

/// Total neurons in the baseline genome.
pub const NEURON_COUNT: usize = 15;

/// Neuron activation families. Parameters are part of the genome and
/// drift under mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationKind {
    /// `a * v + b`, params `[a, b]`.
    Linear,
    /// `1` above the threshold, `-1` at or below it, params `[threshold]`.
    Sign,
    /// `a / (1 + e^(-b * v)) - c`, params `[a, b, c]`.
    Sigma,
}

impl ActivationKind {
    fn random(rng: &mut dyn RngCore) -> Self {
        match rng.random_range(0..3) {
            0 => Self::Linear,
            1 => Self::Sign,
            _ => Self::Sigma,
        }
    }

    fn random_params(self, rng: &mut dyn RngCore) -> Vec<f64> {
        let n = self.param_count();
        (0..n).map(|_| rng.random_range(-1.0..1.0)).collect()
    }

    fn param_count(self) -> usize {
        match self {
            Self::Linear => 2,
            Self::Sign => 1,
            Self::Sigma => 3,
        }
    }

    fn apply(self, value: f64, params: &[f64]) -> f64 {
        match self {
            Self::Linear => params[0] * value + params[1],
            Self::Sign => {
                if value > params[0] {
                    1.0
                } else {
                    -1.0
                }
            }
            Self::Sigma => params[0] / (1.0 + (-params[1] * value).exp()) - params[2],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Neuron {
    kind: ActivationKind,
    params: Vec<f64>,
}

impl Neuron {
    fn random(rng: &mut dyn RngCore) -> Self {
        let kind = ActivationKind::random(rng);
        let params = kind.random_params(rng);
        Self { kind, params }
    }
}

/// Weighted connection from a lower-indexed neuron to a higher-indexed one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Link {
    source: usize,
    target: usize,
    weight: f64,
}

/// The evolvable genome: neurons plus feed-forward links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralPolicy {
    neurons: Vec<Neuron>,
    links: Vec<Link>,
}

impl NeuralPolicy {
    /// Random genome: sensory neurons feed every interior neuron, and the
    /// interior is upper-triangularly connected so signals flow strictly
    /// forward in one pass.
    #[must_use]
    pub fn random(rng: &mut dyn RngCore) -> Self {
        let neurons = (0..NEURON_COUNT).map(|_| Neuron::random(rng)).collect();
        let mut links = Vec::new();
        for source in 0..POLICY_INPUTS {
            for target in POLICY_INPUTS..NEURON_COUNT {
                links.push(Link {
                    source,
                    target,
                    weight: rng.random_range(-0.5..0.5),
                });
            }
        }
        for source in POLICY_INPUTS..NEURON_COUNT {
            for target in (source + 1)..NEURON_COUNT {
                links.push(Link {
                    source,
                    target,
                    weight: rng.random_range(-0.5..0.5),
                });
            }
        }
        Self { neurons, links }
    }

    /// Spawner for worlds that need fresh random controllers.
    #[must_use]
    pub fn spawner() -> PolicySpawner {
        Box::new(|rng| Box::new(NeuralPolicy::random(rng)))
    }

    /// One feed-forward pass. Each neuron fires once in index order and
    /// pushes its output along its outgoing links.
    fn propagate(&self, inputs: &[f64]) -> Vec<f64> {
        let mut incoming = vec![0.0; self.neurons.len()];
        let mut outgoing = vec![0.0; self.neurons.len()];
        for (slot, value) in incoming.iter_mut().zip(inputs) {
            *slot = *value;
        }
        for (index, neuron) in self.neurons.iter().enumerate() {
            let fired = neuron.kind.apply(incoming[index], &neuron.params);
            outgoing[index] = fired;
            for link in self.links.iter().filter(|l| l.source == index) {
                incoming[link.target] += fired * link.weight;
            }
        }
        outgoing
    }

    /// Random perturbation: nudge a handful of link weights, nudge one
    /// neuron's parameters, or replace one neuron's activation family.
    #[must_use]
    pub fn mutated(&self, rng: &mut dyn RngCore) -> Self {
        let mut genome = self.clone();
        match rng.random_range(0..3) {
            0 => {
                let count = rng.random_range(1..=1 + genome.links.len() / 10);
                for _ in 0..count {
                    let index = rng.random_range(0..genome.links.len());
                    genome.links[index].weight += rng.random_range(-1.0..1.0);
                }
            }
            1 => {
                let index = rng.random_range(0..genome.neurons.len());
                for param in &mut genome.neurons[index].params {
                    *param += rng.random_range(-1.0..1.0);
                }
            }
            _ => {
                let index = rng.random_range(0..genome.neurons.len());
                let kind = ActivationKind::random(rng);
                genome.neurons[index] = Neuron {
                    kind,
                    params: kind.random_params(rng),
                };
            }
        }
        genome
    }
}

impl Policy for NeuralPolicy {
    fn activate(&mut self, inputs: &[f64]) -> PolicyOutput {
        let outputs = self.propagate(inputs);
        PolicyOutput {
            delta_angle: outputs[self.neurons.len() - 2],
            delta_speed: outputs[self.neurons.len() - 1],
        }
    }

    fn mutate(&self, rng: &mut dyn RngCore) -> Box<dyn Policy> {
        Box::new(self.mutated(rng))
    }

    fn clone_box(&self) -> Box<dyn Policy> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn seeded(seed: u64) -> SmallRng {
        SmallRng::seed_from_u64(seed)
    }

    #[test]
    fn random_genome_has_full_wiring() {
        let mut rng = seeded(1);
        let genome = NeuralPolicy::random(&mut rng);
        assert_eq!(genome.neurons.len(), NEURON_COUNT);
        let interior = NEURON_COUNT - POLICY_INPUTS;
        let expected = POLICY_INPUTS * interior + interior * (interior - 1) / 2;
        assert_eq!(genome.links.len(), expected);
        assert!(genome
            .links
            .iter()
            .all(|link| link.source < link.target && link.target < NEURON_COUNT));
    }

    #[test]
    fn activation_is_deterministic_and_finite() {
        let mut rng = seeded(2);
        let mut genome = NeuralPolicy::random(&mut rng);
        let inputs = [6.0, 10.0, 42.0, 0.5, -10.0, 80.0, -0.25];
        let first = genome.activate(&inputs);
        let second = genome.activate(&inputs);
        assert_eq!(first, second);
        assert!(first.delta_angle.is_finite());
        assert!(first.delta_speed.is_finite());
    }

    #[test]
    fn sign_neuron_is_a_step() {
        assert_eq!(ActivationKind::Sign.apply(0.6, &[0.5]), 1.0);
        assert_eq!(ActivationKind::Sign.apply(0.5, &[0.5]), -1.0);
        assert_eq!(ActivationKind::Sign.apply(-3.0, &[0.5]), -1.0);
    }

    #[test]
    fn linear_neuron_is_affine() {
        assert!((ActivationKind::Linear.apply(2.0, &[3.0, 1.0]) - 7.0).abs() < 1e-12);
    }

    #[test]
    fn sigma_neuron_is_bounded() {
        for v in [-100.0, -1.0, 0.0, 1.0, 100.0] {
            let out = ActivationKind::Sigma.apply(v, &[1.0, 1.0, 0.5]);
            assert!((-0.5..=0.5).contains(&out));
        }
    }

    #[test]
    fn mutation_changes_the_genome() {
        let mut rng = seeded(3);
        let genome = NeuralPolicy::random(&mut rng);
        let mut changed = false;
        for _ in 0..8 {
            if genome.mutated(&mut rng) != genome {
                changed = true;
                break;
            }
        }
        assert!(changed, "repeated mutation never altered the genome");
    }

    #[test]
    fn mutation_leaves_the_original_untouched() {
        let mut rng = seeded(4);
        let genome = NeuralPolicy::random(&mut rng);
        let copy = genome.clone();
        let _ = genome.mutated(&mut rng);
        assert_eq!(genome, copy);
    }

    #[test]
    fn genome_survives_json() {
        let mut rng = seeded(5);
        let genome = NeuralPolicy::random(&mut rng);
        let json = serde_json::to_string(&genome).unwrap();
        let back: NeuralPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(genome, back);
    }

    #[test]
    fn spawner_produces_distinct_policies() {
        let spawner = NeuralPolicy::spawner();
        let mut rng = seeded(6);
        let a = spawner(&mut rng);
        let b = spawner(&mut rng);
        let a = a.as_any().downcast_ref::<NeuralPolicy>().unwrap();
        let b = b.as_any().downcast_ref::<NeuralPolicy>().unwrap();
        assert_ne!(a, b);
    }
}
