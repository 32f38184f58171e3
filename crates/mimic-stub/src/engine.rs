//! Runtime state shared by every request: contracts, expectations, logs,
//! events, facts, hooks and the pluggable handler list.

use crate::config::{HookConfig, MimicConfig};
use crate::contract::{Contract, ContractSet, Rejection, ScenarioRef};
use crate::events::{EventBuffer, EventStreamHandler, ServerEvent};
use crate::expectation::{Expectation, ExpectationDocument, ExpectationError, ExpectationStore};
use crate::hooks::{HookStage, ProcessHook};
use crate::log::RequestLog;
use crate::pattern::render_failures;
use crate::pipeline::{Facts, PassThrough, RequestHandler};
use anyhow::Context;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Invalid(#[from] ExpectationError),
    #[error("expectation fits none of {} contract scenarios", .0.len())]
    Rejected(Vec<Rejection>),
}

pub struct StubEngine {
    config: MimicConfig,
    contracts: ContractSet,
    store: ExpectationStore,
    log: RequestLog,
    events: EventBuffer<ServerEvent>,
    facts: Facts,
    handlers: Vec<Arc<dyn RequestHandler>>,
    request_hook: Option<HookStage>,
    response_hook: Option<HookStage>,
    pass_through: Option<PassThrough>,
}

impl std::fmt::Debug for StubEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubEngine")
            .field("contracts", &self.contracts.names())
            .field("expectations", &self.store.len_by_population())
            .field("handlers", &self.handlers.iter().map(|h| h.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl StubEngine {
    /// Assemble an engine from already-loaded parts.
    ///
    /// The event-stream endpoint is installed as the first handler.
    pub fn new(config: MimicConfig, contracts: ContractSet, static_: Vec<Expectation>) -> Self {
        let events = EventBuffer::new(config.events.backlog, config.events.subscriber_capacity);
        let stream: Arc<dyn RequestHandler> = Arc::new(EventStreamHandler::new(
            config.events.path.clone(),
            events.clone(),
        ));

        Self {
            request_hook: config.hooks.request.as_ref().map(hook_stage),
            response_hook: config.hooks.response.as_ref().map(hook_stage),
            pass_through: config.pass_through.as_ref().map(PassThrough::new),
            store: ExpectationStore::new(static_),
            log: RequestLog::new(config.log_capacity),
            facts: Facts::new(),
            handlers: vec![stream],
            events,
            contracts,
            config,
        }
    }

    /// Load contracts and static examples named by the configuration.
    ///
    /// Unreadable contracts fail startup; examples that cannot be loaded or
    /// fit no scenario are skipped and reported in the load log.
    pub fn load(config: MimicConfig) -> anyhow::Result<Self> {
        let mut contracts = Vec::new();
        for path in &config.contracts {
            let contract =
                Contract::load(path).with_context(|| format!("Failed to load contract {path}"))?;
            info!(
                contract = %contract.name,
                scenarios = contract.scenarios.len(),
                "Loaded contract from {}",
                path
            );
            contracts.push(contract);
        }
        let contracts = ContractSet::new(contracts);

        let log = RequestLog::new(config.log_capacity);
        let mut static_ = load_inline_examples(&contracts, &log);
        for dir in &config.examples {
            static_.extend(load_example_dir(Path::new(dir), &contracts, &log)?);
        }
        info!(count = static_.len(), "Loaded static expectations");

        let mut engine = Self::new(config, contracts, static_);
        engine.log = log;
        Ok(engine)
    }

    /// Append a pluggable handler, tried after the ones already installed.
    pub fn with_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn config(&self) -> &MimicConfig {
        &self.config
    }

    pub fn contracts(&self) -> &ContractSet {
        &self.contracts
    }

    pub fn store(&self) -> &ExpectationStore {
        &self.store
    }

    pub fn log(&self) -> &RequestLog {
        &self.log
    }

    pub fn events(&self) -> &EventBuffer<ServerEvent> {
        &self.events
    }

    pub fn facts(&self) -> &Facts {
        &self.facts
    }

    pub fn handlers(&self) -> &[Arc<dyn RequestHandler>] {
        &self.handlers
    }

    pub fn request_hook(&self) -> Option<&HookStage> {
        self.request_hook.as_ref()
    }

    pub fn response_hook(&self) -> Option<&HookStage> {
        self.response_hook.as_ref()
    }

    pub fn pass_through(&self) -> Option<&PassThrough> {
        self.pass_through.as_ref()
    }

    /// Validate a posted expectation against the contracts and register it.
    pub fn register_expectation(
        &self,
        document: ExpectationDocument,
    ) -> Result<Arc<Expectation>, RegistrationError> {
        let source = if document.token.is_some() {
            "transient"
        } else {
            "dynamic"
        };
        let expectation = Expectation::from_document(document, source)?;
        let scenario = self
            .contracts
            .validate_expectation(&expectation.example_request(), expectation.example_response())
            .map_err(RegistrationError::Rejected)?;
        Ok(self.store.add(expectation.with_validation(scenario)))
    }
}

fn hook_stage(config: &HookConfig) -> HookStage {
    let hook = ProcessHook::new(config.command.clone(), Duration::from_millis(config.timeout_ms));
    HookStage::new(Arc::new(hook), config.fail_mode)
}

// ============================================================================
// Static examples
// ============================================================================

/// Build a static expectation; the token of a static example is ignored.
fn static_expectation(doc: Value, source: &str) -> Result<Expectation, String> {
    let document = ExpectationDocument::from_value(doc).map_err(|e| e.to_string())?;
    let mut expectation = Expectation::from_document(document, source).map_err(|e| e.to_string())?;
    if expectation.token.take().is_some() {
        warn!(source, "Ignoring token on static expectation");
    }
    Ok(expectation)
}

/// Examples embedded in scenarios, validated against their own scenario only.
fn load_inline_examples(contracts: &ContractSet, log: &RequestLog) -> Vec<Expectation> {
    let mut loaded = Vec::new();
    for (contract, scenario) in contracts.scenarios() {
        for (index, doc) in scenario.examples.iter().enumerate() {
            let source = format!("{}#{}[{}]", contract.path, scenario.name, index);
            let result = static_expectation(doc.clone(), &source).and_then(|expectation| {
                scenario
                    .validate_example(&expectation.example_request(), expectation.example_response())
                    .map_err(|failures| render_failures(&failures))?;
                Ok(expectation.with_validation(Some(ScenarioRef {
                    contract: contract.path.clone(),
                    scenario: scenario.name.clone(),
                })))
            });
            match result {
                Ok(expectation) => {
                    log.record_load(format!("Loaded example {source}"));
                    loaded.push(expectation);
                }
                Err(reason) => skip(log, &source, &reason),
            }
        }
    }
    loaded
}

/// Every `*.json` file in `dir`, in file-name order. A file holds one
/// expectation document or an array of them.
fn load_example_dir(
    dir: &Path,
    contracts: &ContractSet,
    log: &RequestLog,
) -> anyhow::Result<Vec<Expectation>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read examples directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut loaded = Vec::new();
    for file in files {
        let source = file.display().to_string();
        let docs = match read_documents(&file) {
            Ok(docs) => docs,
            Err(reason) => {
                skip(log, &source, &reason);
                continue;
            }
        };

        for (index, doc) in docs.into_iter().enumerate() {
            let source = format!("{source}[{index}]");
            let result = static_expectation(doc, &source).and_then(|expectation| {
                let scenario = contracts
                    .validate_expectation(
                        &expectation.example_request(),
                        expectation.example_response(),
                    )
                    .map_err(|rejections| {
                        rejections
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join("\n")
                    })?;
                Ok(expectation.with_validation(scenario))
            });
            match result {
                Ok(expectation) => {
                    log.record_load(format!("Loaded example {source}"));
                    loaded.push(expectation);
                }
                Err(reason) => skip(log, &source, &reason),
            }
        }
    }
    Ok(loaded)
}

fn read_documents(file: &Path) -> Result<Vec<Value>, String> {
    let contents = std::fs::read_to_string(file).map_err(|e| e.to_string())?;
    match serde_json::from_str(&contents).map_err(|e| e.to_string())? {
        Value::Array(docs) => Ok(docs),
        doc => Ok(vec![doc]),
    }
}

fn skip(log: &RequestLog, source: &str, reason: &str) {
    warn!(source, "Skipping example: {}", reason);
    log.record_load(format!("Skipped example {source}: {reason}"));
}
