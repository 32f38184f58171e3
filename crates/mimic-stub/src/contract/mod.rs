//! Contracts: named files of request/response scenarios.
//!
//! ```yaml
//! name: items
//! scenarios:
//!   - name: fetch item
//!     method: GET
//!     path: /items/(id:number)
//!     response:
//!       status: 200
//!       body: {name: "(string)"}
//! ```

mod scenario;

pub use scenario::{ExampleResponse, PathPattern, Scenario, ScenarioResponse};

use crate::http::HttpRequest;
use crate::pattern::{render_failures, MatchFailure, PatternError};
use scenario::ScenarioRaw;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("failed to read contract {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse contract {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("contract {path}, scenario '{scenario}': {source}")]
    Pattern {
        path: String,
        scenario: String,
        #[source]
        source: PatternError,
    },
}

#[derive(Debug, Deserialize)]
struct ContractFile {
    name: Option<String>,
    #[serde(default)]
    scenarios: Vec<ScenarioRaw>,
}

#[derive(Debug, Clone)]
pub struct Contract {
    pub name: String,
    /// File the contract was loaded from
    pub path: String,
    pub scenarios: Vec<Scenario>,
}

impl Contract {
    /// Load a contract from a YAML (or JSON) file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ContractError> {
        let path_str = path.as_ref().display().to_string();
        let contents = std::fs::read_to_string(&path).map_err(|source| ContractError::Io {
            path: path_str.clone(),
            source,
        })?;
        Self::parse(&contents, &path_str)
    }

    pub fn parse(contents: &str, path: &str) -> Result<Self, ContractError> {
        let file: ContractFile =
            serde_yaml::from_str(contents).map_err(|source| ContractError::Parse {
                path: path.to_string(),
                source,
            })?;

        let scenarios = file
            .scenarios
            .into_iter()
            .map(|raw| {
                let name = raw.name.clone();
                Scenario::compile(raw).map_err(|source| ContractError::Pattern {
                    path: path.to_string(),
                    scenario: name,
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let name = file.name.unwrap_or_else(|| {
            Path::new(path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string())
        });

        Ok(Self {
            name,
            path: path.to_string(),
            scenarios,
        })
    }
}

/// Contract and scenario an expectation was validated against
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioRef {
    pub contract: String,
    pub scenario: String,
}

/// Why a scenario rejected a request or example
#[derive(Debug, Clone)]
pub struct Rejection {
    pub contract: String,
    pub scenario: String,
    pub failures: Vec<MatchFailure>,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "In scenario \"{}\" of {}\n{}",
            self.scenario,
            self.contract,
            render_failures(&self.failures)
        )
    }
}

/// Every loaded contract, in load order
#[derive(Debug, Clone, Default)]
pub struct ContractSet {
    contracts: Vec<Contract>,
}

impl ContractSet {
    pub fn new(contracts: Vec<Contract>) -> Self {
        Self { contracts }
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn contracts(&self) -> &[Contract] {
        &self.contracts
    }

    pub fn names(&self) -> Vec<String> {
        self.contracts.iter().map(|c| c.name.clone()).collect()
    }

    /// All scenarios with the contract they belong to, in load order.
    pub fn scenarios(&self) -> impl Iterator<Item = (&Contract, &Scenario)> {
        self.contracts
            .iter()
            .flat_map(|c| c.scenarios.iter().map(move |s| (c, s)))
    }

    /// Find the first scenario the example fits.
    ///
    /// With no contracts loaded every example is accepted unvalidated.
    pub fn validate_expectation(
        &self,
        request: &HttpRequest,
        response: Option<ExampleResponse<'_>>,
    ) -> Result<Option<ScenarioRef>, Vec<Rejection>> {
        if self.contracts.is_empty() {
            return Ok(None);
        }

        let mut rejections = Vec::new();
        for (contract, scenario) in self.scenarios() {
            match scenario.validate_example(request, response) {
                Ok(()) => {
                    return Ok(Some(ScenarioRef {
                        contract: contract.path.clone(),
                        scenario: scenario.name.clone(),
                    }))
                }
                Err(failures) => rejections.push(Rejection {
                    contract: contract.path.clone(),
                    scenario: scenario.name.clone(),
                    failures,
                }),
            }
        }
        Err(rejections)
    }
}
