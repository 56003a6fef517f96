use std::collections::{BTreeMap, HashMap};
use std::fmt;

use tracing::warn;

use crate::equation::SpeciesCounts;
use crate::reaction::Reaction;
use crate::species::{LocatedSpecies, Location};
use crate::SimError;

/// Handle to one membrane instance. Ids follow preorder; the root is always 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MembraneId(usize);

impl MembraneId {
    pub const ROOT: MembraneId = MembraneId(0);

    pub fn index(self) -> usize {
        self.0
    }

    pub(crate) fn from_index(index: usize) -> Self {
        MembraneId(index)
    }
}

/// Storage slot of a count; `around` always resolves to some `Contained` slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Slot {
    On,
    Under,
    Contained,
}

impl Slot {
    pub(crate) const ALL: [Slot; 3] = [Slot::On, Slot::Under, Slot::Contained];

    pub(crate) fn location(self) -> Location {
        match self {
            Slot::On => Location::On,
            Slot::Under => Location::Under,
            Slot::Contained => Location::Contained,
        }
    }
}

/// Hands out `<type>_<n>` tags, numbered from 1 per type.
///
/// One allocator is used per tree construction so numbering restarts with every
/// parse or reparse.
#[derive(Clone, Debug, Default)]
pub struct TagAllocator {
    next: HashMap<String, usize>,
}

impl TagAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, kind: &str) -> String {
        let index = self.next.entry(kind.to_string()).or_insert(0);
        *index += 1;
        format!("{}_{}", kind, index)
    }
}

pub(crate) fn is_unique_tag(kind: &str, tag: &str) -> bool {
    tag.strip_prefix(kind)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Shape of a membrane and its initial contents, with each child repeated a
/// given number of times.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MembraneTemplate {
    pub kind: String,
    pub tags: Vec<String>,
    pub species: Vec<(Location, String, u64)>,
    pub children: Vec<(MembraneTemplate, usize)>,
}

impl MembraneTemplate {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn species(mut self, location: Location, name: impl Into<String>, count: u64) -> Self {
        self.species.push((location, name.into(), count));
        self
    }

    pub fn child(mut self, template: MembraneTemplate, repeat: usize) -> Self {
        self.children.push((template, repeat));
        self
    }
}

#[derive(Clone, Debug)]
struct MembraneNode {
    kind: String,
    tags: Vec<String>,
    unique_tag: String,
    parent: Option<MembraneId>,
    children: Vec<MembraneId>,
    on: BTreeMap<String, u64>,
    under: BTreeMap<String, u64>,
    contained: BTreeMap<String, u64>,
}

impl MembraneNode {
    fn matches(&self, name: &str) -> bool {
        self.kind == name || self.matches_tag(name)
    }

    fn matches_tag(&self, tag: &str) -> bool {
        self.unique_tag == tag || self.tags.iter().any(|t| t == tag)
    }

    fn pool(&self, slot: Slot) -> &BTreeMap<String, u64> {
        match slot {
            Slot::On => &self.on,
            Slot::Under => &self.under,
            Slot::Contained => &self.contained,
        }
    }

    fn pool_mut(&mut self, slot: Slot) -> &mut BTreeMap<String, u64> {
        match slot {
            Slot::On => &mut self.on,
            Slot::Under => &mut self.under,
            Slot::Contained => &mut self.contained,
        }
    }
}

/// The nested compartments of a simulation and their species counts.
///
/// Nodes live in an arena indexed by [`MembraneId`]; topology is fixed once the
/// tree is built.
#[derive(Clone, Debug)]
pub struct MembraneTree {
    nodes: Vec<MembraneNode>,
    by_type: HashMap<String, Vec<MembraneId>>,
}

impl MembraneTree {
    /// Builds a tree with a fresh tag allocator.
    pub fn from_template(template: &MembraneTemplate) -> Self {
        Self::from_template_with(template, &mut TagAllocator::new())
    }

    pub fn from_template_with(template: &MembraneTemplate, tags: &mut TagAllocator) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            by_type: HashMap::new(),
        };
        tree.instantiate(template, None, tags);
        tree
    }

    fn instantiate(
        &mut self,
        template: &MembraneTemplate,
        parent: Option<MembraneId>,
        allocator: &mut TagAllocator,
    ) -> MembraneId {
        let id = self.push_node(&template.kind, &template.tags, parent, allocator);
        for (location, name, count) in &template.species {
            let located = LocatedSpecies::new(name.as_str(), *location, template.kind.as_str());
            if let Err(err) = self.add_species(id, &located, *count as i64) {
                warn!(membrane = %self.nodes[id.0].unique_tag, "dropping initial species: {}", err);
            }
        }
        for (child, repeat) in &template.children {
            for _ in 0..*repeat {
                self.instantiate(child, Some(id), allocator);
            }
        }
        id
    }

    /// Appends a node in preorder position.
    pub(crate) fn push_node(
        &mut self,
        kind: &str,
        tags: &[String],
        parent: Option<MembraneId>,
        allocator: &mut TagAllocator,
    ) -> MembraneId {
        let id = MembraneId(self.nodes.len());
        let mut free_tags: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !is_unique_tag(kind, tag) && !free_tags.contains(tag) {
                free_tags.push(tag.clone());
            }
        }
        self.nodes.push(MembraneNode {
            kind: kind.to_string(),
            tags: free_tags,
            unique_tag: allocator.allocate(kind),
            parent,
            children: Vec::new(),
            on: BTreeMap::new(),
            under: BTreeMap::new(),
            contained: BTreeMap::new(),
        });
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(id);
        }
        self.by_type.entry(kind.to_string()).or_default().push(id);
        id
    }

    pub(crate) fn empty() -> Self {
        Self {
            nodes: Vec::new(),
            by_type: HashMap::new(),
        }
    }

    pub fn root(&self) -> MembraneRef<'_> {
        MembraneRef {
            tree: self,
            id: MembraneId::ROOT,
        }
    }

    pub fn get(&self, id: MembraneId) -> Option<MembraneRef<'_>> {
        (id.0 < self.nodes.len()).then_some(MembraneRef { tree: self, id })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every instance in preorder.
    pub fn all_membranes(&self) -> impl Iterator<Item = MembraneId> + '_ {
        (0..self.nodes.len()).map(MembraneId)
    }

    pub fn membranes_of_type(&self, kind: &str) -> &[MembraneId] {
        self.by_type.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find_by_tag(&self, tag: &str) -> Option<MembraneId> {
        self.nodes
            .iter()
            .position(|node| node.matches_tag(tag))
            .map(MembraneId)
    }

    /// Instances whose type equals `name`, falling back to instances tagged
    /// `name`. For `around`, the parents of those instances instead.
    pub fn matching_membranes(&self, name: &str, location: Location) -> Vec<MembraneId> {
        let mut found = self.membranes_of_type(name).to_vec();
        if found.is_empty() {
            found = self
                .all_membranes()
                .filter(|id| self.nodes[id.0].matches_tag(name))
                .collect();
        }
        if location == Location::Around {
            found = found
                .into_iter()
                .filter_map(|id| self.nodes[id.0].parent)
                .collect();
            found.sort_unstable();
            found.dedup();
        }
        found
    }

    /// Instances a reaction runs in: the parents of its anchor type when every
    /// entry is `around`, otherwise the anchor type's own instances.
    pub fn reaction_membranes(&self, reaction: &Reaction) -> Vec<MembraneId> {
        if reaction.is_around_only() {
            self.matching_membranes(reaction.membrane_type(), Location::Around)
        } else {
            self.membranes_of_type(reaction.membrane_type()).to_vec()
        }
    }

    /// Finds the concrete slot `located` refers to, seen from `membrane`.
    pub(crate) fn resolve(
        &self,
        membrane: MembraneId,
        located: &LocatedSpecies,
    ) -> Result<(MembraneId, Slot), SimError> {
        let node = self.node(membrane)?;
        let name = located.membrane.as_str();
        if node.matches(name) {
            return match located.location {
                Location::On => Ok((membrane, Slot::On)),
                Location::Under => Ok((membrane, Slot::Under)),
                Location::Contained => Ok((membrane, Slot::Contained)),
                Location::Around => node.parent.map(|p| (p, Slot::Contained)).ok_or_else(|| {
                    SimError::UnresolvedLocation(format!(
                        "({}) has no surrounding membrane around the root {}",
                        located, node.unique_tag
                    ))
                }),
            };
        }
        match located.location {
            Location::Contained => match node.parent {
                Some(parent) if self.nodes[parent.0].matches(name) => Ok((parent, Slot::Contained)),
                _ => Err(SimError::UnresolvedLocation(format!(
                    "({}) is not reachable from membrane {}",
                    located, node.unique_tag
                ))),
            },
            Location::Around => {
                if node.children.iter().any(|c| self.nodes[c.0].matches(name)) {
                    return Ok((membrane, Slot::Contained));
                }
                let sibling = node.parent.is_some_and(|p| {
                    self.nodes[p.0]
                        .children
                        .iter()
                        .any(|c| *c != membrane && self.nodes[c.0].matches(name))
                });
                if sibling {
                    Err(SimError::UnresolvedLocation(format!(
                        "({}) from membrane {}: 'around' referencing a sibling membrane is not supported",
                        located, node.unique_tag
                    )))
                } else {
                    Err(SimError::UnresolvedLocation(format!(
                        "({}) has no matching child of membrane {}",
                        located, node.unique_tag
                    )))
                }
            }
            Location::On | Location::Under => Err(SimError::UnresolvedLocation(format!(
                "({}) is not relative to membrane {} of type {}",
                located, node.unique_tag, node.kind
            ))),
        }
    }

    fn node(&self, id: MembraneId) -> Result<&MembraneNode, SimError> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| SimError::InvalidArgument(format!("no membrane with id {}", id.0)))
    }

    pub(crate) fn slot_count(&self, membrane: MembraneId, slot: Slot, species: &str) -> u64 {
        self.nodes
            .get(membrane.0)
            .and_then(|node| node.pool(slot).get(species))
            .copied()
            .unwrap_or(0)
    }

    /// Applies a signed count change to the slot `located` resolves to from
    /// `membrane`. Removing more than is present leaves zero.
    pub fn add_species(
        &mut self,
        membrane: MembraneId,
        located: &LocatedSpecies,
        delta: i64,
    ) -> Result<(), SimError> {
        let (target, slot) = self.resolve(membrane, located)?;
        self.apply_delta(target, slot, &located.species, delta);
        Ok(())
    }

    pub(crate) fn apply_delta(&mut self, membrane: MembraneId, slot: Slot, species: &str, delta: i64) {
        let node = &mut self.nodes[membrane.0];
        let current = node.pool(slot).get(species).copied().unwrap_or(0);
        let updated = if delta >= 0 {
            current.saturating_add(delta as u64)
        } else {
            let removed = delta.unsigned_abs();
            if removed > current {
                warn!(
                    membrane = %node.unique_tag,
                    species,
                    current,
                    removed,
                    "removal exceeds available count, clamping at zero"
                );
            }
            current.saturating_sub(removed)
        };
        let pool = node.pool_mut(slot);
        if updated == 0 {
            pool.remove(species);
        } else {
            pool.insert(species.to_string(), updated);
        }
    }

    /// Count of `located` seen from `membrane`; unresolvable locations read as 0.
    pub fn num_species(&self, membrane: MembraneId, located: &LocatedSpecies) -> u64 {
        self.resolve(membrane, located)
            .map(|(target, slot)| self.slot_count(target, slot, &located.species))
            .unwrap_or(0)
    }

    /// Total of `species` in every slot of every instance.
    pub fn all_species(&self, species: &str) -> u64 {
        self.subtree_species(MembraneId::ROOT, species)
    }

    pub fn subtree_species(&self, membrane: MembraneId, species: &str) -> u64 {
        let Some(node) = self.nodes.get(membrane.0) else {
            return 0;
        };
        let own: u64 = Slot::ALL
            .iter()
            .map(|&slot| node.pool(slot).get(species).copied().unwrap_or(0))
            .sum();
        own + node
            .children
            .iter()
            .map(|&child| self.subtree_species(child, species))
            .sum::<u64>()
    }

    /// Adds an initial amount to every instance matching the located species.
    /// Returns how many instances received it.
    pub fn seed_species(&mut self, located: &LocatedSpecies, count: u64) -> usize {
        let targets = self.matching_membranes(&located.membrane, located.location);
        if targets.is_empty() {
            warn!("couldn't find matching membrane: {}", located);
            return 0;
        }
        let mut seeded = 0;
        for target in targets {
            match self.add_species(target, located, count as i64) {
                Ok(()) => seeded += 1,
                Err(err) => warn!("dropping initial species: {}", err),
            }
        }
        seeded
    }

    /// Whether every consumed entry of `reaction` is stocked at `membrane`.
    pub fn stoichiometry_matches(&self, membrane: MembraneId, reaction: &Reaction) -> bool {
        reaction
            .consumed()
            .iter()
            .all(|s| self.num_species(membrane, &s.located) >= s.stoichiometry as u64)
    }

    pub fn compute_rate(&self, membrane: MembraneId, reaction: &Reaction) -> Result<f64, SimError> {
        let view = MembraneRef { tree: self, id: membrane };
        let rate = reaction.rate_equation().evaluate(&view).map_err(|err| {
            SimError::Evaluation(format!(
                "could not evaluate rate for reaction {}: {}",
                reaction.describe(),
                err
            ))
        })?;
        if rate.is_nan() || rate < 0.0 {
            return Err(SimError::NegativeRate(format!(
                "{} for reaction {}",
                rate,
                reaction.describe()
            )));
        }
        Ok(rate)
    }

    fn fmt_node(&self, id: MembraneId, indent: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = &self.nodes[id.0];
        write!(f, "{:indent$}{}", "", node.kind, indent = indent)?;
        if !node.tags.is_empty() {
            write!(f, " [{}]", node.tags.join(", "))?;
        }
        for (slot, label) in [(Slot::On, "On"), (Slot::Under, "Under"), (Slot::Contained, "Contained")] {
            let pool = node.pool(slot);
            if pool.is_empty() {
                continue;
            }
            let entries: Vec<String> = pool
                .iter()
                .map(|(species, count)| format!("{} {}", count, species))
                .collect();
            write!(f, "\n{:indent$}{}: {}", "", label, entries.join(", "), indent = indent + 2)?;
        }
        for &child in &node.children {
            writeln!(f)?;
            self.fmt_node(child, indent + 2, f)?;
        }
        Ok(())
    }
}

impl fmt::Display for MembraneTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nodes.is_empty() {
            return Ok(());
        }
        self.fmt_node(MembraneId::ROOT, 2, f)
    }
}

/// Read-only view of one membrane instance.
#[derive(Clone, Copy, Debug)]
pub struct MembraneRef<'a> {
    tree: &'a MembraneTree,
    id: MembraneId,
}

impl<'a> MembraneRef<'a> {
    fn node(&self) -> &'a MembraneNode {
        &self.tree.nodes[self.id.0]
    }

    pub fn id(&self) -> MembraneId {
        self.id
    }

    pub fn kind(&self) -> &'a str {
        &self.node().kind
    }

    pub fn tags(&self) -> &'a [String] {
        &self.node().tags
    }

    pub fn unique_tag(&self) -> &'a str {
        &self.node().unique_tag
    }

    pub fn matches_tag(&self, tag: &str) -> bool {
        self.node().matches_tag(tag)
    }

    pub fn parent(&self) -> Option<MembraneRef<'a>> {
        self.node().parent.map(|id| MembraneRef { tree: self.tree, id })
    }

    pub fn children(&self) -> impl Iterator<Item = MembraneRef<'a>> + 'a {
        let tree = self.tree;
        self.node()
            .children
            .iter()
            .map(move |&id| MembraneRef { tree, id })
    }

    /// Counts stored directly at `location`; `around` reads the parent's contents.
    pub fn species_at(&self, location: Location) -> &'a BTreeMap<String, u64> {
        static EMPTY: BTreeMap<String, u64> = BTreeMap::new();
        match location {
            Location::On => self.node().pool(Slot::On),
            Location::Under => self.node().pool(Slot::Under),
            Location::Contained => self.node().pool(Slot::Contained),
            Location::Around => match self.node().parent {
                Some(parent) => self.tree.nodes[parent.0].pool(Slot::Contained),
                None => &EMPTY,
            },
        }
    }

    pub fn num_species(&self, located: &LocatedSpecies) -> u64 {
        self.tree.num_species(self.id, located)
    }
}

impl SpeciesCounts for MembraneRef<'_> {
    fn count(&self, located: &LocatedSpecies) -> u64 {
        self.num_species(located)
    }
}
