use std::collections::HashMap;

use tracing::{debug, warn};

use crate::config::UnresolvedPolicy;
use crate::membrane::{MembraneId, MembraneTree, Slot};
use crate::model::Model;
use crate::SimError;

/// Propensity of every (reaction, membrane) pair plus the pairs each firing
/// can affect.
///
/// Entries are stored reaction-major, so iterating `rates` walks reactions in
/// ascending order and membranes in ascending order within each reaction.
#[derive(Clone, Debug)]
pub struct RateTable {
    n_reactions: usize,
    n_membranes: usize,
    rates: Vec<f64>,
    eligible: Vec<bool>,
    dependents: Vec<Vec<usize>>,
}

type SlotKey<'a> = (MembraneId, Slot, &'a str);

impl RateTable {
    /// Evaluates every entry once and derives the fine dependency graph.
    pub fn new(
        model: &Model,
        tree: &MembraneTree,
        policy: UnresolvedPolicy,
    ) -> Result<Self, SimError> {
        let n_reactions = model.n_reactions();
        let n_membranes = tree.len();
        let mut eligible = vec![false; n_reactions * n_membranes];
        for (r, reaction) in model.reactions().iter().enumerate() {
            for m in tree.reaction_membranes(reaction) {
                eligible[r * n_membranes + m.index()] = true;
            }
        }

        let mut table = Self {
            n_reactions,
            n_membranes,
            rates: vec![0.0; n_reactions * n_membranes],
            eligible,
            dependents: vec![Vec::new(); n_reactions * n_membranes],
        };
        table.dependents = table.build_dependents(model, tree, policy)?;
        for idx in 0..table.rates.len() {
            if table.eligible[idx] {
                table.rates[idx] = table.evaluate(model, tree, idx)?;
            }
        }
        debug!(
            reactions = n_reactions,
            membranes = n_membranes,
            links = table.dependents.iter().map(Vec::len).sum::<usize>(),
            "rate table built"
        );
        Ok(table)
    }

    fn build_dependents(
        &self,
        model: &Model,
        tree: &MembraneTree,
        policy: UnresolvedPolicy,
    ) -> Result<Vec<Vec<usize>>, SimError> {
        let mut readers: HashMap<SlotKey<'_>, Vec<usize>> = HashMap::new();
        for idx in self.eligible_indices() {
            let (r, m) = self.split(idx);
            let reaction = &model.reactions()[r];
            for located in reaction.dependent_species() {
                match tree.resolve(m, located) {
                    Ok((target, slot)) => readers
                        .entry((target, slot, located.species.as_str()))
                        .or_default()
                        .push(idx),
                    Err(err) => unresolved(policy, r, err)?,
                }
            }
        }

        let mut dependents = vec![Vec::new(); self.rates.len()];
        let mut static_marker = vec![usize::MAX; self.n_reactions];
        let mut visit_markers = vec![usize::MAX; self.rates.len()];
        for idx in self.eligible_indices() {
            let (r, m) = self.split(idx);
            for &dep in model.dependencies(r) {
                static_marker[dep] = r;
            }
            let deps = &mut dependents[idx];
            for modified in model.reactions()[r].modified_species() {
                let key = match tree.resolve(m, &modified.located) {
                    Ok((target, slot)) => (target, slot, modified.species()),
                    Err(err) => {
                        unresolved(policy, r, err)?;
                        continue;
                    }
                };
                for &reader in readers.get(&key).into_iter().flatten() {
                    if static_marker[reader / self.n_membranes] == r && visit_markers[reader] != idx {
                        visit_markers[reader] = idx;
                        deps.push(reader);
                    }
                }
            }
            deps.sort_unstable();
        }
        Ok(dependents)
    }

    fn eligible_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.eligible
            .iter()
            .enumerate()
            .filter_map(|(idx, &ok)| ok.then_some(idx))
    }

    fn split(&self, idx: usize) -> (usize, MembraneId) {
        let m = idx % self.n_membranes;
        (idx / self.n_membranes, MembraneId::from_index(m))
    }

    fn evaluate(&self, model: &Model, tree: &MembraneTree, idx: usize) -> Result<f64, SimError> {
        if !self.eligible[idx] {
            return Ok(0.0);
        }
        let (r, m) = self.split(idx);
        let reaction = &model.reactions()[r];
        if !tree.stoichiometry_matches(m, reaction) {
            return Ok(0.0);
        }
        tree.compute_rate(m, reaction)
    }

    /// Recomputes every entry affected by `reaction` firing in `membrane`.
    pub fn update(
        &mut self,
        model: &Model,
        tree: &MembraneTree,
        reaction: usize,
        membrane: MembraneId,
    ) -> Result<(), SimError> {
        let fired = reaction * self.n_membranes + membrane.index();
        if membrane.index() >= self.n_membranes || fired >= self.dependents.len() {
            return Err(SimError::InvalidArgument(format!(
                "no table entry for reaction {} in membrane {}",
                reaction,
                membrane.index()
            )));
        }
        for i in 0..self.dependents[fired].len() {
            let idx = self.dependents[fired][i];
            self.rates[idx] = self.evaluate(model, tree, idx)?;
        }
        Ok(())
    }

    /// Sum of all entries, in table order.
    pub fn total(&self) -> f64 {
        self.rates.iter().sum()
    }

    /// First positive entry whose running sum reaches `target`.
    pub fn select(&self, target: f64) -> Option<(usize, MembraneId)> {
        let mut cumulative = 0.0;
        let mut last_positive = None;
        for (idx, &rate) in self.rates.iter().enumerate() {
            if rate <= 0.0 {
                continue;
            }
            cumulative += rate;
            last_positive = Some(idx);
            if cumulative >= target {
                return Some(self.split(idx));
            }
        }
        // Rounding can leave the running sum just short of the target.
        last_positive.map(|idx| self.split(idx))
    }

    pub fn rate(&self, reaction: usize, membrane: MembraneId) -> f64 {
        if membrane.index() >= self.n_membranes {
            return 0.0;
        }
        self.rates
            .get(reaction * self.n_membranes + membrane.index())
            .copied()
            .unwrap_or(0.0)
    }

    /// Summed propensity of one reaction over all membranes.
    pub fn reaction_propensity(&self, reaction: usize) -> f64 {
        if reaction >= self.n_reactions {
            return 0.0;
        }
        let start = reaction * self.n_membranes;
        self.rates[start..start + self.n_membranes].iter().sum()
    }

    pub fn rates(&self) -> &[f64] {
        &self.rates
    }

    pub fn n_reactions(&self) -> usize {
        self.n_reactions
    }

    pub fn n_membranes(&self) -> usize {
        self.n_membranes
    }

    /// Pairs recomputed after `reaction` fires in `membrane`.
    pub fn affected_by(&self, reaction: usize, membrane: MembraneId) -> Vec<(usize, MembraneId)> {
        if membrane.index() >= self.n_membranes {
            return Vec::new();
        }
        self.dependents
            .get(reaction * self.n_membranes + membrane.index())
            .map(|deps| deps.iter().map(|&idx| self.split(idx)).collect())
            .unwrap_or_default()
    }

    /// Evaluates every entry from scratch against the current tree.
    pub fn recomputed(&self, model: &Model, tree: &MembraneTree) -> Result<Vec<f64>, SimError> {
        (0..self.rates.len())
            .map(|idx| self.evaluate(model, tree, idx))
            .collect()
    }
}

fn unresolved(policy: UnresolvedPolicy, reaction: usize, err: SimError) -> Result<(), SimError> {
    match policy {
        UnresolvedPolicy::Fail => Err(err),
        UnresolvedPolicy::Warn => {
            warn!(reaction, "{}", err);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation::Equation;
    use crate::membrane::MembraneTemplate;
    use crate::params::ParameterTable;
    use crate::reaction::Reaction;
    use crate::species::{LocatedSpecies, Location, StoichiometrySpecies};

    fn s(n: u32, species: &str, location: Location, membrane: &str) -> StoichiometrySpecies {
        StoichiometrySpecies::new(n, species, location, membrane)
    }

    fn reaction(consumed: Vec<StoichiometrySpecies>, produced: Vec<StoichiometrySpecies>, k: f64) -> Reaction {
        Reaction::new(consumed, produced, &Equation::number(k), &ParameterTable::new(), 0.0).unwrap()
    }

    fn two_cells() -> MembraneTree {
        let cell = MembraneTemplate::new("cell").species(Location::Contained, "a", 3);
        MembraneTree::from_template(&MembraneTemplate::new("tissue").child(cell, 2))
    }

    #[test]
    fn entries_are_zero_outside_matching_membranes() {
        let model = Model::new(
            vec![reaction(vec![s(1, "a", Location::Contained, "cell")], vec![], 2.0)],
            ParameterTable::new(),
        );
        let tree = two_cells();
        let table = RateTable::new(&model, &tree, UnresolvedPolicy::Warn).unwrap();
        assert_eq!(table.rates(), &[0.0, 6.0, 6.0]);
        assert!((table.total() - 12.0).abs() < 1e-12);
        assert!((table.reaction_propensity(0) - 12.0).abs() < 1e-12);
    }

    #[test]
    fn fine_graph_stays_local() {
        // a -> b inside each cell; b leaks into the tissue
        let model = Model::new(
            vec![
                reaction(
                    vec![s(1, "a", Location::Contained, "cell")],
                    vec![s(1, "b", Location::Contained, "cell")],
                    1.0,
                ),
                reaction(
                    vec![s(1, "b", Location::Contained, "cell")],
                    vec![s(1, "b", Location::Around, "cell")],
                    1.0,
                ),
            ],
            ParameterTable::new(),
        );
        let tree = two_cells();
        let table = RateTable::new(&model, &tree, UnresolvedPolicy::Warn).unwrap();
        let cell_1 = tree.membranes_of_type("cell")[0];
        let cell_2 = tree.membranes_of_type("cell")[1];
        assert_eq!(table.affected_by(0, cell_1), vec![(0, cell_1), (1, cell_1)]);
        assert_eq!(table.affected_by(1, cell_2), vec![(1, cell_2)]);
    }

    #[test]
    fn selection_walks_in_table_order() {
        let model = Model::new(
            vec![
                reaction(vec![s(1, "a", Location::Contained, "cell")], vec![], 1.0),
                reaction(vec![s(1, "a", Location::Contained, "cell")], vec![], 2.0),
            ],
            ParameterTable::new(),
        );
        let tree = two_cells();
        let table = RateTable::new(&model, &tree, UnresolvedPolicy::Warn).unwrap();
        let cell_1 = tree.membranes_of_type("cell")[0];
        let cell_2 = tree.membranes_of_type("cell")[1];
        // rates: [0, 3, 3, 0, 6, 6]
        assert_eq!(table.select(0.0), Some((0, cell_1)));
        assert_eq!(table.select(3.0), Some((0, cell_1)));
        assert_eq!(table.select(3.5), Some((0, cell_2)));
        assert_eq!(table.select(7.0), Some((1, cell_1)));
        assert_eq!(table.select(17.9), Some((1, cell_2)));
        assert_eq!(table.select(100.0), Some((1, cell_2)));
    }

    #[test]
    fn fail_policy_rejects_unresolvable_reactions() {
        let model = Model::new(
            vec![reaction(
                vec![s(1, "a", Location::Contained, "cell")],
                vec![s(1, "r", Location::On, "tissue")],
                1.0,
            )],
            ParameterTable::new(),
        );
        let tree = two_cells();
        let err = RateTable::new(&model, &tree, UnresolvedPolicy::Fail).unwrap_err();
        assert!(matches!(err, SimError::UnresolvedLocation(_)));
        assert!(RateTable::new(&model, &tree, UnresolvedPolicy::Warn).is_ok());
    }

    #[test]
    fn negative_rates_are_fatal() {
        let model = Model::new(
            vec![reaction(vec![s(1, "a", Location::Contained, "cell")], vec![], -1.0)],
            ParameterTable::new(),
        );
        let tree = two_cells();
        let err = RateTable::new(&model, &tree, UnresolvedPolicy::Warn).unwrap_err();
        assert!(matches!(err, SimError::NegativeRate(msg) if msg.contains("1 a contained cell")));
    }

    #[test]
    fn rate_errors_quote_model_source() {
        let model = Model::new(
            vec![reaction(vec![s(1, "a", Location::Contained, "cell")], vec![], -1.0).with_source("a -> 0 @ -1")],
            ParameterTable::new(),
        );
        let tree = two_cells();
        let err = RateTable::new(&model, &tree, UnresolvedPolicy::Warn).unwrap_err();
        assert!(matches!(err, SimError::NegativeRate(msg) if msg.contains("[from: a -> 0 @ -1]")));
    }

    #[test]
    fn divide_by_zero_aborts_construction() {
        let inverse = Equation::divide(
            Equation::number(1.0),
            Equation::species(LocatedSpecies::new("b", Location::Contained, "cell")),
        );
        let model = Model::new(
            vec![Reaction::new(
                vec![s(1, "a", Location::Contained, "cell")],
                vec![],
                &inverse,
                &ParameterTable::new(),
                0.0,
            )
            .unwrap()],
            ParameterTable::new(),
        );
        let tree = two_cells();
        let err = RateTable::new(&model, &tree, UnresolvedPolicy::Warn).unwrap_err();
        assert!(matches!(
            err,
            SimError::Evaluation(msg) if msg.contains("1 a contained cell") && msg.contains("divide by zero")
        ));
    }
}
