use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, trace, warn};

use crate::config::{SamplingConfig, SimulationConfig, UnresolvedPolicy};
use crate::event_queue::{EventQueue, PendingEvent};
use crate::membrane::{MembraneId, MembraneTree};
use crate::model::Model;
use crate::rate_table::RateTable;
use crate::reaction::SECONDS_PER_HOUR;
use crate::species::LocatedSpecies;
use crate::SimError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// A reaction drawn from the rate table fired.
    Reaction,
    /// Products of an earlier delayed reaction were released.
    DelayedProducts,
}

/// What one call to [`Simulation::step`] executed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepEvent {
    pub kind: EventKind,
    pub reaction: usize,
    pub membrane: MembraneId,
    pub elapsed_seconds: f64,
}

/// Aggregate counts taken between chunks of a sampled run.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Requested horizon reached so far, in seconds or hours.
    pub time: f64,
    /// Clock value of the last executed event.
    pub current_seconds: f64,
    pub counts: Vec<(String, u64)>,
}

/// Direct-method SSA over a membrane tree, extended with delayed product release.
pub struct Simulation {
    model: Model,
    tree: MembraneTree,
    table: RateTable,
    queue: EventQueue,
    rng: ChaCha8Rng,
    seed: u64,
    policy: UnresolvedPolicy,
    current_seconds: f64,
    nominal_seconds: f64,
    steps: u64,
}

impl Simulation {
    pub fn new(model: Model, tree: MembraneTree, config: &SimulationConfig) -> Result<Self, SimError> {
        if !config.start_seconds.is_finite() || config.start_seconds < 0.0 {
            return Err(SimError::InvalidArgument(format!(
                "start time must be a non-negative number of seconds, got {}",
                config.start_seconds
            )));
        }
        let seed = config.seed.unwrap_or_else(|| {
            let seed = rand::random::<u64>();
            info!(seed, "random seed is {}", seed);
            seed
        });
        let table = RateTable::new(&model, &tree, config.unresolved_locations)?;
        info!(
            seed,
            reactions = model.n_reactions(),
            membranes = tree.len(),
            start_seconds = config.start_seconds,
            "simulation ready"
        );
        Ok(Self {
            model,
            tree,
            table,
            queue: EventQueue::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
            policy: config.unresolved_locations,
            current_seconds: config.start_seconds,
            nominal_seconds: config.start_seconds,
            steps: 0,
        })
    }

    /// Executes the next event, or returns `None` when nothing can happen.
    pub fn step(&mut self) -> Result<Option<StepEvent>, SimError> {
        let omega = self.table.total();
        let mut candidate = None;
        if omega > 0.0 {
            let wait = waiting_seconds(omega, self.rng.r#gen());
            let u2: f64 = self.rng.r#gen();
            candidate = self
                .table
                .select(omega * u2)
                .map(|(reaction, membrane)| (reaction, membrane, wait));
        }

        let next_queued = self.queue.peek_time();
        let event = match candidate {
            Some((reaction, membrane, wait))
                if next_queued.is_none_or(|queued| self.current_seconds + wait < queued) =>
            {
                self.fire(reaction, membrane, wait)?
            }
            _ => match self.queue.pop() {
                Some((time, pending)) => self.release(time, pending)?,
                None => return Ok(None),
            },
        };
        self.steps += 1;
        Ok(Some(event))
    }

    fn fire(&mut self, r: usize, membrane: MembraneId, wait: f64) -> Result<StepEvent, SimError> {
        self.current_seconds += wait;
        let reaction = &self.model.reactions()[r];
        for consumed in reaction.consumed().iter().filter(|s| s.stoichiometry > 0) {
            apply_change(
                &mut self.tree,
                self.policy,
                membrane,
                &consumed.located,
                -(consumed.stoichiometry as i64),
            )?;
        }
        if reaction.is_delayed() {
            let due = self.current_seconds + reaction.delay_seconds();
            self.queue.push(
                due,
                PendingEvent {
                    reaction: r,
                    membrane,
                    products: reaction.produced().to_vec(),
                },
            );
            trace!(reaction = r, membrane = membrane.index(), due, "products delayed");
        } else {
            for produced in reaction.produced().iter().filter(|s| s.stoichiometry > 0) {
                apply_change(
                    &mut self.tree,
                    self.policy,
                    membrane,
                    &produced.located,
                    produced.stoichiometry as i64,
                )?;
            }
        }
        self.table.update(&self.model, &self.tree, r, membrane)?;
        trace!(
            reaction = r,
            membrane = membrane.index(),
            wait,
            now = self.current_seconds,
            "reaction fired"
        );
        Ok(StepEvent {
            kind: EventKind::Reaction,
            reaction: r,
            membrane,
            elapsed_seconds: wait,
        })
    }

    fn release(&mut self, time: f64, pending: PendingEvent) -> Result<StepEvent, SimError> {
        let elapsed = time - self.current_seconds;
        self.current_seconds = time;
        for produced in pending.products.iter().filter(|s| s.stoichiometry > 0) {
            apply_change(
                &mut self.tree,
                self.policy,
                pending.membrane,
                &produced.located,
                produced.stoichiometry as i64,
            )?;
        }
        self.table
            .update(&self.model, &self.tree, pending.reaction, pending.membrane)?;
        trace!(
            reaction = pending.reaction,
            membrane = pending.membrane.index(),
            now = self.current_seconds,
            "delayed products released"
        );
        Ok(StepEvent {
            kind: EventKind::DelayedProducts,
            reaction: pending.reaction,
            membrane: pending.membrane,
            elapsed_seconds: elapsed,
        })
    }

    /// Moves the horizon forward by `seconds` and steps until the clock reaches it.
    ///
    /// Returns `true` if the run stopped early because no event was available.
    pub fn run_for_seconds(&mut self, seconds: f64) -> Result<bool, SimError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(SimError::InvalidArgument(format!(
                "run length must be a non-negative number of seconds, got {}",
                seconds
            )));
        }
        self.nominal_seconds += seconds;
        while self.current_seconds < self.nominal_seconds {
            if self.step()?.is_none() {
                debug!(
                    now = self.current_seconds,
                    horizon = self.nominal_seconds,
                    "no viable reaction or pending event"
                );
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Runs `total_seconds` in chunks, calling `sampler` at the start and after
    /// every chunk. Returns `true` if the run stopped early.
    ///
    /// The sampler also receives the simulation itself, for per-membrane counts
    /// through [`Simulation::current_state`] and per-reaction propensities.
    pub fn run_seconds<F>(
        &mut self,
        total_seconds: f64,
        chunk_seconds: f64,
        species: &[String],
        use_hours: bool,
        mut sampler: F,
    ) -> Result<bool, SimError>
    where
        F: FnMut(&Sample, &Simulation),
    {
        if !chunk_seconds.is_finite() || chunk_seconds <= 0.0 {
            return Err(SimError::InvalidArgument(format!(
                "chunk size must be a positive number of seconds, got {}",
                chunk_seconds
            )));
        }
        if !total_seconds.is_finite() || total_seconds < 0.0 {
            return Err(SimError::InvalidArgument(format!(
                "run length must be a non-negative number of seconds, got {}",
                total_seconds
            )));
        }
        sampler(&self.sample(species, use_hours), self);
        let chunks = (total_seconds / chunk_seconds).ceil() as u64;
        for chunk in 1..=chunks {
            let stopped = self.run_for_seconds(chunk_seconds)?;
            sampler(&self.sample(species, use_hours), self);
            if stopped {
                warn!(
                    now = self.current_seconds,
                    chunk,
                    chunks,
                    "simulation stopped early: no reactions can fire"
                );
                return Ok(true);
            }
            debug!(chunk, chunks, now = self.current_seconds, "chunk complete");
        }
        info!(steps = self.steps, now = self.current_seconds, "run complete");
        Ok(false)
    }

    pub fn run_sampled<F>(&mut self, sampling: &SamplingConfig, sampler: F) -> Result<bool, SimError>
    where
        F: FnMut(&Sample, &Simulation),
    {
        self.run_seconds(
            sampling.total_seconds,
            sampling.chunk_seconds,
            &sampling.species,
            sampling.use_hours,
            sampler,
        )
    }

    /// Whole-tree totals of `species` at the current horizon.
    pub fn sample(&self, species: &[String], use_hours: bool) -> Sample {
        let time = if use_hours {
            self.nominal_seconds / SECONDS_PER_HOUR
        } else {
            self.nominal_seconds
        };
        Sample {
            time,
            current_seconds: self.current_seconds,
            counts: species
                .iter()
                .map(|name| (name.clone(), self.tree.all_species(name)))
                .collect(),
        }
    }

    pub fn current_seconds(&self) -> f64 {
        self.current_seconds
    }

    pub fn current_hours(&self) -> f64 {
        self.current_seconds / SECONDS_PER_HOUR
    }

    pub fn nominal_seconds(&self) -> f64 {
        self.nominal_seconds
    }

    pub fn current_state(&self) -> &MembraneTree {
        &self.tree
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn rate_table(&self) -> &RateTable {
        &self.table
    }

    pub fn total_propensity(&self) -> f64 {
        self.table.total()
    }

    pub fn reaction_propensity(&self, reaction: usize) -> f64 {
        self.table.reaction_propensity(reaction)
    }

    pub fn pending_events(&self) -> &EventQueue {
        &self.queue
    }

    /// A from-scratch evaluation of every table entry over the current state.
    pub fn recomputed_table(&self) -> Result<Vec<f64>, SimError> {
        self.table.recomputed(&self.model, &self.tree)
    }
}

/// Exponential waiting time for total propensity `omega` (per hour), from a
/// uniform draw in [0, 1). Flipping the draw onto (0, 1] keeps the result finite.
fn waiting_seconds(omega: f64, draw: f64) -> f64 {
    (1.0 / omega) * (1.0 / (1.0 - draw)).ln() * SECONDS_PER_HOUR
}

fn apply_change(
    tree: &mut MembraneTree,
    policy: UnresolvedPolicy,
    membrane: MembraneId,
    located: &LocatedSpecies,
    delta: i64,
) -> Result<(), SimError> {
    match tree.add_species(membrane, located, delta) {
        Err(SimError::UnresolvedLocation(msg)) if policy == UnresolvedPolicy::Warn => {
            warn!("could not find location to add: {}", msg);
            Ok(())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiting_time_is_finite_for_every_draw() {
        assert_eq!(waiting_seconds(2.0, 0.0), 0.0);
        let largest_draw = 1.0 - f64::EPSILON / 2.0;
        assert!(waiting_seconds(2.0, largest_draw).is_finite());
        let median = waiting_seconds(1.0, 0.5);
        assert!((median - 2f64.ln() * SECONDS_PER_HOUR).abs() < 1e-9);
    }
}
