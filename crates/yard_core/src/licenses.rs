use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Bitmask of player licenses. Serialized as a list of license names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Licenses(u32);

const NAMED: &[(&str, Licenses)] = &[
    ("Shunting", Licenses::SHUNTING),
    ("FreightHaul", Licenses::FREIGHT_HAUL),
    ("LogisticalHaul", Licenses::LOGISTICAL_HAUL),
    ("Hazmat1", Licenses::HAZMAT1),
    ("Hazmat2", Licenses::HAZMAT2),
    ("Hazmat3", Licenses::HAZMAT3),
    ("Military1", Licenses::MILITARY1),
    ("Military2", Licenses::MILITARY2),
    ("Military3", Licenses::MILITARY3),
    ("TrainLength1", Licenses::TRAIN_LENGTH1),
    ("TrainLength2", Licenses::TRAIN_LENGTH2),
];

impl Licenses {
    pub const NONE: Licenses = Licenses(0);
    pub const SHUNTING: Licenses = Licenses(1 << 0);
    pub const FREIGHT_HAUL: Licenses = Licenses(1 << 1);
    pub const LOGISTICAL_HAUL: Licenses = Licenses(1 << 2);
    pub const HAZMAT1: Licenses = Licenses(1 << 3);
    pub const HAZMAT2: Licenses = Licenses(1 << 4);
    pub const HAZMAT3: Licenses = Licenses(1 << 5);
    pub const MILITARY1: Licenses = Licenses(1 << 6);
    pub const MILITARY2: Licenses = Licenses(1 << 7);
    pub const MILITARY3: Licenses = Licenses(1 << 8);
    pub const TRAIN_LENGTH1: Licenses = Licenses(1 << 9);
    pub const TRAIN_LENGTH2: Licenses = Licenses(1 << 10);
    pub const ALL: Licenses = Licenses((1 << 11) - 1);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is also set in `self`.
    pub const fn contains(self, other: Licenses) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn from_name(name: &str) -> Option<Licenses> {
        NAMED
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, license)| *license)
    }

    pub fn names(self) -> Vec<&'static str> {
        NAMED
            .iter()
            .filter(|(_, license)| self.contains(*license))
            .map(|(name, _)| *name)
            .collect()
    }
}

impl BitOr for Licenses {
    type Output = Licenses;

    fn bitor(self, rhs: Licenses) -> Licenses {
        Licenses(self.0 | rhs.0)
    }
}

impl BitOrAssign for Licenses {
    fn bitor_assign(&mut self, rhs: Licenses) {
        self.0 |= rhs.0;
    }
}

impl TryFrom<Vec<String>> for Licenses {
    type Error = String;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        names.iter().try_fold(Licenses::NONE, |acc, name| {
            Licenses::from_name(name)
                .map(|license| acc | license)
                .ok_or_else(|| format!("unknown license '{name}'"))
        })
    }
}

impl From<Licenses> for Vec<String> {
    fn from(licenses: Licenses) -> Self {
        licenses.names().into_iter().map(str::to_string).collect()
    }
}

impl std::fmt::Display for Licenses {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        f.write_str(&self.names().join("|"))
    }
}
