//! Parameter sources that enumerate the runs of a sweep.

use indexmap::IndexMap;
use itertools::Itertools;
use serde_json::Value;

use crate::core::run::{Parameters, RunIndex};

/// Enumerates the parameter assignments of a sweep.
///
/// Implementations must be deterministic: the same sweep definition must yield the same
/// `(index, parameters)` pairs on every call, otherwise resuming would skip or repeat runs.
pub trait ParameterSource: Send + Sync {
    /// Sweep name, used for ledger naming and log context.
    fn name(&self) -> &str;

    /// All runs in index order.
    fn enumerate(&self) -> Vec<(RunIndex, Parameters)>;

    /// Check the definition before the sweep is built.
    ///
    /// # Errors
    ///
    /// Returns a human readable reason when the definition cannot be enumerated.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// How explored parameters are combined into runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combination {
    /// The i-th run takes the i-th value of every explored parameter.
    #[default]
    Zip,
    /// Every combination of explored values; the first parameter varies slowest.
    Cartesian,
}

/// A sweep defined by default parameters plus explored value lists.
#[derive(Debug, Clone)]
pub struct ParameterGrid {
    name: String,
    defaults: Parameters,
    explored: IndexMap<String, Vec<Value>>,
    combination: Combination,
}

impl ParameterGrid {
    /// Create an empty grid. Without explored parameters it yields a single run.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defaults: Parameters::new(),
            explored: IndexMap::new(),
            combination: Combination::Zip,
        }
    }

    /// Set a parameter that is identical for every run.
    #[must_use]
    pub fn with_default(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(name.into(), value.into());
        self
    }

    /// Explore a parameter over the given values.
    #[must_use]
    pub fn explore<I, V>(mut self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.explored
            .insert(name.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Combine explored parameters as a cartesian product instead of zip-wise.
    #[must_use]
    pub const fn cartesian(mut self) -> Self {
        self.combination = Combination::Cartesian;
        self
    }

    /// Number of runs this grid yields.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.explored.is_empty() {
            return 1;
        }
        match self.combination {
            Combination::Zip => self.explored.values().map(Vec::len).min().unwrap_or(0),
            Combination::Cartesian => self.explored.values().map(Vec::len).product(),
        }
    }

    /// Whether the grid yields no runs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn assignment<'a>(&self, explored: impl Iterator<Item = (&'a String, &'a Value)>) -> Parameters {
        let mut params = self.defaults.clone();
        for (name, value) in explored {
            params.insert(name.clone(), value.clone());
        }
        params
    }
}

impl ParameterSource for ParameterGrid {
    fn name(&self) -> &str {
        &self.name
    }

    fn enumerate(&self) -> Vec<(RunIndex, Parameters)> {
        if self.explored.is_empty() {
            return vec![(0, self.defaults.clone())];
        }

        let names: Vec<&String> = self.explored.keys().collect();
        let rows: Vec<Vec<&Value>> = match self.combination {
            Combination::Zip => (0..self.len())
                .map(|i| self.explored.values().map(|values| &values[i]).collect())
                .collect(),
            Combination::Cartesian => self
                .explored
                .values()
                .map(|values| values.iter())
                .multi_cartesian_product()
                .collect(),
        };

        rows.into_iter()
            .enumerate()
            .map(|(index, row)| {
                let params = self.assignment(names.iter().copied().zip(row));
                (index as RunIndex, params)
            })
            .collect()
    }

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("sweep name must not be empty".into());
        }
        if let Some((name, _)) = self.explored.iter().find(|(_, values)| values.is_empty()) {
            return Err(format!("explored parameter `{name}` has no values"));
        }
        if self.combination == Combination::Zip {
            let lengths: Vec<usize> = self.explored.values().map(Vec::len).dedup().collect();
            if lengths.len() > 1 {
                return Err(format!(
                    "zip-explored parameters must have equal lengths, got {lengths:?}"
                ));
            }
        }
        Ok(())
    }
}
