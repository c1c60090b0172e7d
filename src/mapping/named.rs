// Scalar maps and series axes.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamedMap {
    pub name: String,
    pub metadata: BTreeMap<String, String>,
}

impl NamedMap {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScalarsMap {
    maps: Vec<NamedMap>,
}

impl ScalarsMap {
    pub fn new(maps: Vec<NamedMap>) -> Self {
        Self { maps }
    }

    pub fn single(name: impl Into<String>) -> Self {
        Self::new(vec![NamedMap::new(name)])
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn maps(&self) -> &[NamedMap] {
        &self.maps
    }

    pub fn push(&mut self, map: NamedMap) {
        self.maps.push(map);
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SeriesUnit {
    Second,
    Hertz,
    Meter,
    Radian,
}

impl SeriesUnit {
    pub fn cifti_name(self) -> &'static str {
        match self {
            SeriesUnit::Second => "SECOND",
            SeriesUnit::Hertz => "HERTZ",
            SeriesUnit::Meter => "METER",
            SeriesUnit::Radian => "RADIAN",
        }
    }
}

impl fmt::Display for SeriesUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cifti_name())
    }
}

impl FromStr for SeriesUnit {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "SECOND" => Ok(SeriesUnit::Second),
            "HERTZ" => Ok(SeriesUnit::Hertz),
            "METER" => Ok(SeriesUnit::Meter),
            "RADIAN" => Ok(SeriesUnit::Radian),
            other => Err(Error::new(ErrorKind::Format)
                .with_message(format!("unrecognized series unit '{other}'"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeriesMap {
    pub length: usize,
    pub start: f64,
    pub step: f64,
    pub exponent: i32,
    pub unit: SeriesUnit,
}

impl SeriesMap {
    pub fn new(length: usize, start: f64, step: f64, unit: SeriesUnit) -> Self {
        Self {
            length,
            start,
            step,
            exponent: 0,
            unit,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Position of point `index` in base units.
    pub fn point(&self, index: usize) -> f64 {
        (self.start + self.step * index as f64) * 10f64.powi(self.exponent)
    }

    pub fn explain_mismatch(&self, other: &SeriesMap) -> Option<String> {
        if self.length != other.length {
            return Some(format!(
                "series have {} and {} points",
                self.length, other.length
            ));
        }
        if self.unit != other.unit {
            return Some(format!(
                "series units differ ({} vs {})",
                self.unit, other.unit
            ));
        }
        let scale = self.step.abs().max(other.step.abs()).max(f64::MIN_POSITIVE);
        let start_diff = (self.point(0) - other.point(0)).abs();
        let step_diff = (self.step * 10f64.powi(self.exponent)
            - other.step * 10f64.powi(other.exponent))
        .abs();
        if start_diff > scale * 1e-3 || step_diff > scale * 1e-3 {
            return Some("series have a different start or step".to_string());
        }
        None
    }
}
