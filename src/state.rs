//! Text dump of a running simulation that reads back as an initial condition.
//!
//! ```text
//! # State of simulation at 7200.5 seconds
//!
//! initial tree
//!   { [ tissue_1 ] tissue
//!     { [ cell_1 infected ] cell } }
//!
//! species a contained cell_1 = 4 units
//! ```

use crate::config::SimulationConfig;
use crate::membrane::{MembraneId, MembraneRef, MembraneTree, Slot, TagAllocator};
use crate::model::Model;
use crate::simulation::Simulation;
use crate::species::{LocatedSpecies, Location};
use crate::SimError;

#[derive(Debug)]
struct TreeNode {
    tags: Vec<String>,
    kind: String,
    children: Vec<TreeNode>,
}

#[derive(Debug)]
struct SpeciesLine {
    species: String,
    location: Location,
    membrane: String,
    count: u64,
}

peg::parser! {
    grammar state_text() for str {
        pub rule full_state() -> (Option<f64>, TreeNode, Vec<SpeciesLine>)
         = ws() t:header()? ws() (comment() ws())* "initial" [' ']+ "tree" ws() root:membrane() ws()
           species:(species_line() ** ws()) ws()
         {
            (t, root, species)
         }

        rule header() -> f64
         = "#" [' ']* "State of simulation at" [' ']+ t:seconds() [' ']+ "seconds" [^'\n']* { t }

        rule comment()
         = "#" [^'\n']*

        rule membrane() -> TreeNode
         = "{" ws() "[" ws() tags:(name() ** ws()) ws() "]" ws() kind:name() ws()
           children:(membrane() ** ws()) ws() "}"
         {
            TreeNode { tags, kind, children }
         }

        rule species_line() -> SpeciesLine
         = "species" [' ']+ species:name() [' ']+ location:location() [' ']+ membrane:name()
           [' ']* "=" [' ']* count:count() [' ']+ "units"
         {
            SpeciesLine { species, location, membrane, count }
         }

        rule location() -> Location
         = "on" { Location::On }
         / "under" { Location::Under }
         / "contained" { Location::Contained }
         / "around" { Location::Around }

        rule name() -> String
         = n:$(['a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '.' | '-' | '\'']+) { n.to_string() }

        rule seconds() -> f64
         = n:$(['0'..='9' | '.' | 'e' | 'E' | '+' | '-']+) {? n.parse().or(Err("seconds")) }

        rule count() -> u64
         = n:$(['0'..='9']+) {? n.parse().or(Err("count")) }

        rule ws() = quiet!{[' ' | '\t' | '\r' | '\n']*}
    }
}

/// A tree and clock value read back from a dump.
#[derive(Debug)]
pub struct FullState {
    pub elapsed_seconds: f64,
    pub tree: MembraneTree,
}

impl FullState {
    pub fn parse(text: &str) -> Result<Self, SimError> {
        let (elapsed, root, species) =
            state_text::full_state(text).map_err(|err| SimError::StateParse(err.to_string()))?;
        let elapsed_seconds = elapsed.unwrap_or(0.0);
        if !elapsed_seconds.is_finite() || elapsed_seconds < 0.0 {
            return Err(SimError::StateParse(format!(
                "elapsed time must be a non-negative number of seconds, got {}",
                elapsed_seconds
            )));
        }

        let mut tree = MembraneTree::empty();
        let mut allocator = TagAllocator::new();
        build(&mut tree, &root, None, &mut allocator);
        for line in species {
            let located = LocatedSpecies::new(line.species, line.location, line.membrane);
            tree.seed_species(&located, line.count);
        }
        Ok(Self {
            elapsed_seconds,
            tree,
        })
    }

    pub fn render(&self) -> String {
        render_full_state(&self.tree, self.elapsed_seconds)
    }
}

fn build(tree: &mut MembraneTree, node: &TreeNode, parent: Option<MembraneId>, allocator: &mut TagAllocator) {
    let id = tree.push_node(&node.kind, &node.tags, parent, allocator);
    for child in &node.children {
        build(tree, child, Some(id), allocator);
    }
}

/// Header line, tree section and one line per non-empty count.
pub fn render_full_state(tree: &MembraneTree, elapsed_seconds: f64) -> String {
    format!(
        "# State of simulation at {} seconds\n\n{}",
        elapsed_seconds,
        tree.to_full_state_string()
    )
}

impl MembraneTree {
    /// Tree section followed by the species section, without the time header.
    pub fn to_full_state_string(&self) -> String {
        let mut tree_text = String::from("initial tree \n");
        let mut species_text = String::new();
        if !self.is_empty() {
            write_membrane(self.root(), 2, &mut tree_text, &mut species_text);
        }
        format!("{}\n\n{}", tree_text, species_text)
    }
}

fn write_membrane(membrane: MembraneRef<'_>, indent: usize, tree_text: &mut String, species_text: &mut String) {
    for slot in Slot::ALL {
        let location = slot.location();
        for (species, count) in membrane.species_at(location) {
            species_text.push_str(&format!(
                "species {} {} {} = {} units\n",
                species,
                location,
                membrane.unique_tag(),
                count
            ));
        }
    }

    tree_text.push_str(&format!("{:indent$}{{ [ {}", "", membrane.unique_tag(), indent = indent));
    for tag in membrane.tags() {
        tree_text.push(' ');
        tree_text.push_str(tag);
    }
    tree_text.push_str(" ] ");
    tree_text.push_str(membrane.kind());
    for child in membrane.children() {
        tree_text.push('\n');
        write_membrane(child, indent + 2, tree_text, species_text);
    }
    tree_text.push_str(" }");
}

impl Simulation {
    /// Dump of the current tree and clock; see [`FullState::parse`].
    pub fn full_state_string(&self) -> String {
        render_full_state(self.current_state(), self.current_seconds())
    }

    /// Starts a new run from a parsed dump, with the clock set to the dumped time.
    pub fn resume(model: Model, state: FullState, config: &SimulationConfig) -> Result<Self, SimError> {
        let config = SimulationConfig {
            start_seconds: state.elapsed_seconds,
            ..config.clone()
        };
        Simulation::new(model, state.tree, &config)
    }
}
