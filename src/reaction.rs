use std::fmt;

use crate::equation::Equation;
use crate::params::ParameterTable;
use crate::species::{LocatedSpecies, Location, StoichiometrySpecies};
use crate::SimError;

pub const SECONDS_PER_HOUR: f64 = 3600.0;

/// One immutable reaction: consumed and produced species, a rate law and an
/// optional delay before products appear.
#[derive(Clone, Debug)]
pub struct Reaction {
    consumed: Vec<StoichiometrySpecies>,
    produced: Vec<StoichiometrySpecies>,
    rate_modifier: Equation,
    rate_equation: Equation,
    delay_hours: f64,
    membrane_type: String,
    around_only: bool,
    source: Option<String>,
}

impl Reaction {
    /// Builds a mass-action reaction.
    ///
    /// The rate modifier is simplified against `parameters` and multiplied by one
    /// species leaf per consumed entry.
    pub fn new(
        consumed: Vec<StoichiometrySpecies>,
        produced: Vec<StoichiometrySpecies>,
        rate_modifier: &Equation,
        parameters: &ParameterTable,
        delay_hours: f64,
    ) -> Result<Self, SimError> {
        let rate_modifier = rate_modifier.simplify(parameters).map_err(|err| match err {
            SimError::MissingParameter(msg) => SimError::MissingParameter(format!(
                "{} for reaction {}",
                msg,
                describe_sides(&consumed, &produced)
            )),
            other => other,
        })?;
        if !delay_hours.is_finite() || delay_hours < 0.0 {
            return Err(SimError::InvalidReaction(format!(
                "{}: delay must be a non-negative number of hours, got {}",
                describe_sides(&consumed, &produced),
                delay_hours
            )));
        }
        let membrane_type = compute_membrane_type(&consumed, &produced).map_err(|reason| {
            SimError::InvalidReaction(format!(
                "{}: {}",
                describe_sides(&consumed, &produced),
                reason
            ))
        })?;
        let around_only = !consumed.iter().chain(&produced).any(|s| {
            matches!(
                s.location(),
                Location::On | Location::Under | Location::Contained
            )
        });
        let rate_equation = consumed.iter().fold(rate_modifier.clone(), |eq, species| {
            Equation::multiply(eq, Equation::reactant(species))
        });
        Ok(Self {
            consumed,
            produced,
            rate_modifier,
            rate_equation,
            delay_hours,
            membrane_type,
            around_only,
            source: None,
        })
    }

    /// Attaches the model text the reaction was read from, shown in diagnostics.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn consumed(&self) -> &[StoichiometrySpecies] {
        &self.consumed
    }

    pub fn produced(&self) -> &[StoichiometrySpecies] {
        &self.produced
    }

    pub fn rate_modifier(&self) -> &Equation {
        &self.rate_modifier
    }

    pub fn rate_equation(&self) -> &Equation {
        &self.rate_equation
    }

    pub fn delay_hours(&self) -> f64 {
        self.delay_hours
    }

    pub fn delay_seconds(&self) -> f64 {
        self.delay_hours * SECONDS_PER_HOUR
    }

    pub fn is_delayed(&self) -> bool {
        self.delay_hours > 0.0
    }

    /// Membrane type the reaction is expressed relative to.
    pub fn membrane_type(&self) -> &str {
        &self.membrane_type
    }

    /// True when every entry uses `around`, so the reaction runs in the parents
    /// of its anchor type.
    pub fn is_around_only(&self) -> bool {
        self.around_only
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Canonical text, followed by the model text it was read from when known.
    pub fn describe(&self) -> String {
        match &self.source {
            Some(source) => format!("{} [from: {}]", self, source),
            None => self.to_string(),
        }
    }

    /// Entries whose counts change when the reaction fires.
    pub fn modified_species(&self) -> impl Iterator<Item = &StoichiometrySpecies> {
        self.consumed
            .iter()
            .chain(&self.produced)
            .filter(|s| s.stoichiometry != 0)
    }

    /// Species the rate equation reads.
    pub fn dependent_species(&self) -> Vec<&LocatedSpecies> {
        self.rate_equation.species_references()
    }

    pub fn mentions_species(&self, species: &str) -> bool {
        self.consumed
            .iter()
            .chain(&self.produced)
            .any(|s| s.species() == species)
    }
}

fn compute_membrane_type(
    consumed: &[StoichiometrySpecies],
    produced: &[StoichiometrySpecies],
) -> Result<String, &'static str> {
    let mut boundary: Option<&str> = None;
    let mut interior: Option<&str> = None;
    for species in consumed.iter().chain(produced) {
        let (slot, message) = match species.location() {
            Location::On | Location::Under => (
                &mut boundary,
                "multiple 'on' or 'under' locations for different membranes",
            ),
            Location::Contained | Location::Around => (
                &mut interior,
                "multiple 'contained' or 'around' locations for different membranes",
            ),
        };
        match *slot {
            Some(existing) if existing != species.membrane() => return Err(message),
            Some(_) => {}
            None => *slot = Some(species.membrane()),
        }
    }
    boundary
        .or(interior)
        .map(str::to_string)
        .ok_or("no left hand side of reaction")
}

fn join(species: &[StoichiometrySpecies]) -> String {
    species
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(" + ")
}

fn describe_sides(consumed: &[StoichiometrySpecies], produced: &[StoichiometrySpecies]) -> String {
    format!("{} -> {}", join(consumed), join(produced))
}

impl fmt::Display for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (forward rate modifier: {}) (delay: {})",
            describe_sides(&self.consumed, &self.produced),
            self.rate_modifier,
            self.delay_hours
        )
    }
}
