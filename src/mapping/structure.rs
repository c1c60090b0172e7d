// CIFTI-2 brain structure names.
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Structure {
    AccumbensLeft,
    AccumbensRight,
    AllWhiteMatter,
    AllGreyMatter,
    AmygdalaLeft,
    AmygdalaRight,
    BrainStem,
    CaudateLeft,
    CaudateRight,
    CerebellarWhiteMatterLeft,
    CerebellarWhiteMatterRight,
    Cerebellum,
    CerebellumLeft,
    CerebellumRight,
    CerebralWhiteMatterLeft,
    CerebralWhiteMatterRight,
    Cortex,
    CortexLeft,
    CortexRight,
    DiencephalonVentralLeft,
    DiencephalonVentralRight,
    HippocampusLeft,
    HippocampusRight,
    Other,
    OtherGreyMatter,
    OtherWhiteMatter,
    PallidumLeft,
    PallidumRight,
    PutamenLeft,
    PutamenRight,
    ThalamusLeft,
    ThalamusRight,
}

const NAMES: [(Structure, &str); 32] = [
    (Structure::AccumbensLeft, "CIFTI_STRUCTURE_ACCUMBENS_LEFT"),
    (Structure::AccumbensRight, "CIFTI_STRUCTURE_ACCUMBENS_RIGHT"),
    (Structure::AllWhiteMatter, "CIFTI_STRUCTURE_ALL_WHITE_MATTER"),
    (Structure::AllGreyMatter, "CIFTI_STRUCTURE_ALL_GREY_MATTER"),
    (Structure::AmygdalaLeft, "CIFTI_STRUCTURE_AMYGDALA_LEFT"),
    (Structure::AmygdalaRight, "CIFTI_STRUCTURE_AMYGDALA_RIGHT"),
    (Structure::BrainStem, "CIFTI_STRUCTURE_BRAIN_STEM"),
    (Structure::CaudateLeft, "CIFTI_STRUCTURE_CAUDATE_LEFT"),
    (Structure::CaudateRight, "CIFTI_STRUCTURE_CAUDATE_RIGHT"),
    (
        Structure::CerebellarWhiteMatterLeft,
        "CIFTI_STRUCTURE_CEREBELLAR_WHITE_MATTER_LEFT",
    ),
    (
        Structure::CerebellarWhiteMatterRight,
        "CIFTI_STRUCTURE_CEREBELLAR_WHITE_MATTER_RIGHT",
    ),
    (Structure::Cerebellum, "CIFTI_STRUCTURE_CEREBELLUM"),
    (Structure::CerebellumLeft, "CIFTI_STRUCTURE_CEREBELLUM_LEFT"),
    (Structure::CerebellumRight, "CIFTI_STRUCTURE_CEREBELLUM_RIGHT"),
    (
        Structure::CerebralWhiteMatterLeft,
        "CIFTI_STRUCTURE_CEREBRAL_WHITE_MATTER_LEFT",
    ),
    (
        Structure::CerebralWhiteMatterRight,
        "CIFTI_STRUCTURE_CEREBRAL_WHITE_MATTER_RIGHT",
    ),
    (Structure::Cortex, "CIFTI_STRUCTURE_CORTEX"),
    (Structure::CortexLeft, "CIFTI_STRUCTURE_CORTEX_LEFT"),
    (Structure::CortexRight, "CIFTI_STRUCTURE_CORTEX_RIGHT"),
    (
        Structure::DiencephalonVentralLeft,
        "CIFTI_STRUCTURE_DIENCEPHALON_VENTRAL_LEFT",
    ),
    (
        Structure::DiencephalonVentralRight,
        "CIFTI_STRUCTURE_DIENCEPHALON_VENTRAL_RIGHT",
    ),
    (Structure::HippocampusLeft, "CIFTI_STRUCTURE_HIPPOCAMPUS_LEFT"),
    (Structure::HippocampusRight, "CIFTI_STRUCTURE_HIPPOCAMPUS_RIGHT"),
    (Structure::Other, "CIFTI_STRUCTURE_OTHER"),
    (Structure::OtherGreyMatter, "CIFTI_STRUCTURE_OTHER_GREY_MATTER"),
    (Structure::OtherWhiteMatter, "CIFTI_STRUCTURE_OTHER_WHITE_MATTER"),
    (Structure::PallidumLeft, "CIFTI_STRUCTURE_PALLIDUM_LEFT"),
    (Structure::PallidumRight, "CIFTI_STRUCTURE_PALLIDUM_RIGHT"),
    (Structure::PutamenLeft, "CIFTI_STRUCTURE_PUTAMEN_LEFT"),
    (Structure::PutamenRight, "CIFTI_STRUCTURE_PUTAMEN_RIGHT"),
    (Structure::ThalamusLeft, "CIFTI_STRUCTURE_THALAMUS_LEFT"),
    (Structure::ThalamusRight, "CIFTI_STRUCTURE_THALAMUS_RIGHT"),
];

impl Structure {
    pub fn cifti_name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(structure, _)| *structure == self)
            .map(|(_, name)| *name)
            .unwrap_or("CIFTI_STRUCTURE_OTHER")
    }

    pub fn all() -> impl Iterator<Item = Structure> {
        NAMES.iter().map(|(structure, _)| *structure)
    }
}

impl Serialize for Structure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.cifti_name())
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cifti_name())
    }
}

impl FromStr for Structure {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        NAMES
            .iter()
            .find(|(_, name)| *name == trimmed)
            .map(|(structure, _)| *structure)
            .ok_or_else(|| {
                Error::new(ErrorKind::Format)
                    .with_message(format!("unrecognized brain structure '{trimmed}'"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::Structure;

    #[test]
    fn names_round_trip() {
        for structure in Structure::all() {
            let parsed: Structure = structure.cifti_name().parse().expect("parse");
            assert_eq!(parsed, structure);
        }
        assert_eq!(Structure::all().count(), 32);
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert!("CIFTI_STRUCTURE_NOSE".parse::<Structure>().is_err());
    }
}
