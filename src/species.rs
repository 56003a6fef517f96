use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::SimError;

/// Where a species sits relative to a membrane instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    /// Outer boundary.
    On,
    /// Inner boundary.
    Under,
    /// Free-floating inside.
    Contained,
    /// Free-floating in the parent of the named membrane.
    Around,
}

impl Location {
    pub const ALL: [Location; 4] = [
        Location::On,
        Location::Under,
        Location::Contained,
        Location::Around,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Location::On => "on",
            Location::Under => "under",
            Location::Contained => "contained",
            Location::Around => "around",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Location {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Location::On),
            "under" => Ok(Location::Under),
            "contained" => Ok(Location::Contained),
            "around" => Ok(Location::Around),
            other => Err(SimError::InvalidArgument(format!(
                "unknown location '{}'",
                other
            ))),
        }
    }
}

/// A species name placed at a location relative to a membrane type or tag.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocatedSpecies {
    pub species: String,
    pub location: Location,
    pub membrane: String,
}

impl LocatedSpecies {
    pub fn new(species: impl Into<String>, location: Location, membrane: impl Into<String>) -> Self {
        Self {
            species: species.into(),
            location,
            membrane: membrane.into(),
        }
    }
}

impl fmt::Display for LocatedSpecies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.species, self.location, self.membrane)
    }
}

/// A located species together with the number of copies a reaction consumes or produces.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoichiometrySpecies {
    pub stoichiometry: u32,
    pub located: LocatedSpecies,
}

impl StoichiometrySpecies {
    pub fn new(
        stoichiometry: u32,
        species: impl Into<String>,
        location: Location,
        membrane: impl Into<String>,
    ) -> Self {
        Self {
            stoichiometry,
            located: LocatedSpecies::new(species, location, membrane),
        }
    }

    pub fn species(&self) -> &str {
        &self.located.species
    }

    pub fn location(&self) -> Location {
        self.located.location
    }

    pub fn membrane(&self) -> &str {
        &self.located.membrane
    }
}

impl fmt::Display for StoichiometrySpecies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.stoichiometry, self.located)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_text_round_trips() {
        for location in Location::ALL {
            let parsed: Location = location.to_string().parse().unwrap();
            assert_eq!(parsed, location);
        }
        assert!(matches!(
            "beside".parse::<Location>(),
            Err(SimError::InvalidArgument(msg)) if msg.contains("beside")
        ));
    }

    #[test]
    fn display_matches_reaction_notation() {
        let located = LocatedSpecies::new("Th1I", Location::Contained, "cell");
        assert_eq!(located.to_string(), "Th1I contained cell");
        let stoich = StoichiometrySpecies::new(2, "a", Location::Around, "nucleus");
        assert_eq!(stoich.to_string(), "2 a around nucleus");
    }
}
