use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::params::ParameterTable;
use crate::reaction::Reaction;

/// The immutable reaction network handed to a simulation.
#[derive(Clone, Debug)]
pub struct Model {
    reactions: Vec<Reaction>,
    parameters: ParameterTable,
    species_names: Vec<String>,
    membrane_names: Vec<String>,
    species_to_tags: BTreeMap<String, BTreeSet<String>>,
    tags_to_species: BTreeMap<String, BTreeSet<String>>,
    dependencies: Vec<Vec<usize>>,
}

impl Model {
    pub fn new(reactions: Vec<Reaction>, parameters: ParameterTable) -> Self {
        let mut species = BTreeSet::new();
        let mut membranes = BTreeSet::new();
        for reaction in &reactions {
            for entry in reaction.consumed().iter().chain(reaction.produced()) {
                species.insert(entry.species().to_string());
                membranes.insert(entry.membrane().to_string());
            }
            for located in reaction.dependent_species() {
                species.insert(located.species.clone());
                membranes.insert(located.membrane.clone());
            }
        }
        let species_names: Vec<String> = species.into_iter().collect();
        let dependencies = build_dependency_graph(&species_names, &reactions);
        Self {
            reactions,
            parameters,
            species_names,
            membrane_names: membranes.into_iter().collect(),
            species_to_tags: BTreeMap::new(),
            tags_to_species: BTreeMap::new(),
            dependencies,
        }
    }

    /// Attaches `(species, tag)` pairs.
    pub fn with_species_tags<I, S, T>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        for (species, tag) in pairs {
            let (species, tag) = (species.into(), tag.into());
            self.species_to_tags
                .entry(species.clone())
                .or_default()
                .insert(tag.clone());
            self.tags_to_species.entry(tag).or_default().insert(species);
        }
        self
    }

    pub fn reactions(&self) -> &[Reaction] {
        &self.reactions
    }

    pub fn reaction(&self, id: usize) -> Option<&Reaction> {
        self.reactions.get(id)
    }

    pub fn n_reactions(&self) -> usize {
        self.reactions.len()
    }

    pub fn parameters(&self) -> &ParameterTable {
        &self.parameters
    }

    pub fn species_names(&self) -> &[String] {
        &self.species_names
    }

    pub fn membrane_names(&self) -> &[String] {
        &self.membrane_names
    }

    /// Reactions whose rate equations read a species that `reaction` modifies.
    pub fn dependencies(&self, reaction: usize) -> &[usize] {
        self.dependencies
            .get(reaction)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Like [`Model::dependencies`], but `None` means "everything may have changed".
    pub fn dependent_reactions(&self, fired: Option<usize>) -> Vec<usize> {
        match fired {
            Some(reaction) => self.dependencies(reaction).to_vec(),
            None => (0..self.reactions.len()).collect(),
        }
    }

    pub fn tags_for_species(&self, species: &str) -> impl Iterator<Item = &str> {
        self.species_to_tags
            .get(species)
            .into_iter()
            .flat_map(|tags| tags.iter().map(String::as_str))
    }

    pub fn species_for_tag(&self, tag: &str) -> impl Iterator<Item = &str> {
        self.tags_to_species
            .get(tag)
            .into_iter()
            .flat_map(|species| species.iter().map(String::as_str))
    }

    /// Reactions that consume or produce any species carrying `tag`.
    pub fn reactions_for_species_tag(&self, tag: &str) -> Vec<usize> {
        let tagged: Vec<&str> = self.species_for_tag(tag).collect();
        self.reactions
            .iter()
            .enumerate()
            .filter(|(_, reaction)| tagged.iter().any(|s| reaction.mentions_species(s)))
            .map(|(idx, _)| idx)
            .collect()
    }
}

fn build_dependency_graph(species_names: &[String], reactions: &[Reaction]) -> Vec<Vec<usize>> {
    let species_index: HashMap<&str, usize> = species_names
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.as_str(), idx))
        .collect();

    let mut species_dependents: Vec<Vec<usize>> = vec![Vec::new(); species_names.len()];
    for (idx, reaction) in reactions.iter().enumerate() {
        for located in reaction.dependent_species() {
            if let Some(&species) = species_index.get(located.species.as_str()) {
                species_dependents[species].push(idx);
            }
        }
    }

    let mut dependencies = vec![Vec::new(); reactions.len()];
    let mut visit_markers = vec![usize::MAX; reactions.len()];
    for (r, deps) in dependencies.iter_mut().enumerate() {
        for modified in reactions[r].modified_species() {
            let Some(&species) = species_index.get(modified.species()) else {
                continue;
            };
            for &dep in &species_dependents[species] {
                if visit_markers[dep] != r {
                    visit_markers[dep] = r;
                    deps.push(dep);
                }
            }
        }
        deps.sort_unstable();
    }
    dependencies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation::Equation;
    use crate::species::{Location, StoichiometrySpecies};

    fn s(n: u32, species: &str) -> StoichiometrySpecies {
        StoichiometrySpecies::new(n, species, Location::Contained, "cell")
    }

    fn reaction(consumed: Vec<StoichiometrySpecies>, produced: Vec<StoichiometrySpecies>) -> Reaction {
        Reaction::new(consumed, produced, &Equation::number(1.0), &ParameterTable::new(), 0.0).unwrap()
    }

    fn chain_model() -> Model {
        // 0: a -> b, 1: b -> c, 2: -> a, 3: gene catalyses d
        Model::new(
            vec![
                reaction(vec![s(1, "a")], vec![s(1, "b")]),
                reaction(vec![s(1, "b")], vec![s(1, "c")]),
                reaction(vec![], vec![s(1, "a")]),
                reaction(vec![s(0, "gene")], vec![s(1, "d")]),
            ],
            ParameterTable::new(),
        )
    }

    #[test]
    fn dependencies_follow_modified_species() {
        let model = chain_model();
        assert_eq!(model.dependencies(0), &[0, 1]);
        assert_eq!(model.dependencies(1), &[1]);
        assert_eq!(model.dependencies(2), &[0]);
        assert!(model.dependencies(3).is_empty());
        assert_eq!(model.dependent_reactions(None), vec![0, 1, 2, 3]);
        assert_eq!(model.dependent_reactions(Some(2)), vec![0]);
    }

    #[test]
    fn species_and_membrane_names_are_collected() {
        let model = chain_model();
        assert_eq!(model.species_names(), ["a", "b", "c", "d", "gene"]);
        assert_eq!(model.membrane_names(), ["cell"]);
    }

    #[test]
    fn tag_maps_are_bidirectional() {
        let model = chain_model().with_species_tags([("a", "signal"), ("c", "signal"), ("a", "input")]);
        assert_eq!(model.tags_for_species("a").collect::<Vec<_>>(), ["input", "signal"]);
        assert_eq!(model.species_for_tag("signal").collect::<Vec<_>>(), ["a", "c"]);
        assert_eq!(model.reactions_for_species_tag("signal"), vec![0, 1, 2]);
        assert!(model.reactions_for_species_tag("absent").is_empty());
    }
}
