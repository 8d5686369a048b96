//! The conversion service: RPC dispatch over one warm engine.
//!
//! Validates request invariants, resolves filter names against the
//! registry, serializes engine access, and runs every engine call under
//! the timeout guard. Recoverable faults go back to the client; a fired
//! timeout additionally takes the whole service down.

use crate::engine::{ComparisonJob, ConversionJob, DocumentEngine, EngineHandle, EngineState};
use crate::error::{Result, ScribaError};
use crate::filters::{DocumentFamily, FilterDirection, FilterRegistry};
use crate::rpc::protocol::{CompareParams, ConvertOutcome, ConvertParams};
use crate::rpc::server::RpcDispatch;
use crate::transport::WireDocument;
use crate::watchdog::TimeoutGuard;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Service state shared across client connections.
pub struct ConversionService {
    engine: Arc<dyn DocumentEngine>,
    registry: FilterRegistry,
    handle: Arc<EngineHandle>,
    guard: TimeoutGuard,
    /// The engine handles one document at a time; every conversion or
    /// comparison runs behind this lock.
    engine_lock: Mutex<()>,
}

impl ConversionService {
    /// Build the service, populating the filter registry from the live
    /// engine.
    pub async fn new(
        engine: Arc<dyn DocumentEngine>,
        handle: Arc<EngineHandle>,
        guard: TimeoutGuard,
    ) -> Result<Self> {
        let registry = FilterRegistry::from_engine(engine.as_ref()).await?;
        Ok(Self {
            engine,
            registry,
            handle,
            guard,
            engine_lock: Mutex::new(()),
        })
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    fn suffix_of(path: &Path) -> Option<String> {
        path.extension().map(|e| e.to_string_lossy().into_owned())
    }

    /// Infer the document family from its path suffix via the import side
    /// of the registry. Inline byte payloads carry no family hint.
    fn family_of(&self, document: &WireDocument) -> Option<DocumentFamily> {
        match document {
            WireDocument::Path(path) => Self::suffix_of(path).and_then(|suffix| {
                self.registry
                    .resolve(&suffix, FilterDirection::Import, None)
                    .ok()
                    .map(|f| f.family)
            }),
            WireDocument::Bytes(_) => None,
        }
    }

    async fn handle_convert(&self, params: ConvertParams) -> Result<ConvertOutcome> {
        let input_descriptor = match &params.input_filter {
            Some(name) => Some(self.registry.resolve(name, FilterDirection::Import, None)?),
            None => None,
        };

        // The export filter depends on the loaded document's family: the
        // explicit import filter names it, otherwise the input suffix does.
        let family = input_descriptor
            .map(|f| f.family)
            .or_else(|| self.family_of(&params.input));
        let input_filter = input_descriptor.map(|f| f.id.clone());

        // Explicit filter wins; otherwise the target format comes from
        // convert_to or the output path suffix.
        let output_filter = match &params.output_filter {
            Some(name) => self.registry.resolve(name, FilterDirection::Export, family)?,
            None => {
                let format = params
                    .convert_to
                    .clone()
                    .or_else(|| params.output_path.as_deref().and_then(Self::suffix_of))
                    .ok_or_else(|| ScribaError::InvalidRequest {
                        message: "Output format could not be determined: give an output path \
                                  with a suffix, a target format, or an explicit output filter"
                            .to_string(),
                    })?;
                self.registry
                    .resolve(&format, FilterDirection::Export, family)?
            }
        };

        info!(
            filter = %output_filter.id,
            to_path = params.output_path.is_some(),
            "Converting document"
        );

        let job = ConversionJob {
            input: params.input,
            output_path: params.output_path.clone(),
            input_filter,
            output_filter: output_filter.id.clone(),
            filter_options: params.filter_options,
            update_index: params.update_index,
        };

        let produced = self.run_on_engine(self.engine.convert(&job)).await?;
        self.outcome(produced, params.output_path)
    }

    async fn handle_compare(&self, params: CompareParams) -> Result<ConvertOutcome> {
        let format = params
            .file_type
            .clone()
            .or_else(|| params.output_path.as_deref().and_then(Self::suffix_of))
            .ok_or_else(|| ScribaError::InvalidRequest {
                message: "Output format could not be determined: give an output path with a \
                          suffix or an explicit file type"
                    .to_string(),
            })?;
        let family = self
            .family_of(&params.old)
            .or_else(|| self.family_of(&params.new));
        let output_filter = self
            .registry
            .resolve(&format, FilterDirection::Export, family)?;

        info!(filter = %output_filter.id, "Comparing documents");

        let job = ComparisonJob {
            old: params.old,
            new: params.new,
            output_path: params.output_path.clone(),
            output_filter: output_filter.id.clone(),
        };

        let produced = self.run_on_engine(self.engine.compare(&job)).await?;
        self.outcome(produced, params.output_path)
    }

    /// Run one engine operation: serialized, Busy while it runs, under
    /// the timeout guard.
    async fn run_on_engine(
        &self,
        op: impl std::future::Future<Output = Result<Option<Vec<u8>>>>,
    ) -> Result<Option<Vec<u8>>> {
        if self.handle.is_dead() {
            return Err(ScribaError::EngineUnavailable);
        }

        let _serialized = self.engine_lock.lock().await;
        if self.handle.is_dead() {
            return Err(ScribaError::EngineUnavailable);
        }

        self.handle.set_state(EngineState::Busy);
        let result = self.guard.run(op).await;
        // A fired guard already moved the handle to Dead
        self.handle.set_state(EngineState::Ready);

        result
    }

    fn outcome(
        &self,
        produced: Option<Vec<u8>>,
        output_path: Option<std::path::PathBuf>,
    ) -> Result<ConvertOutcome> {
        match output_path {
            Some(path) => {
                debug!("Output written to {}", path.display());
                Ok(ConvertOutcome::Written { path })
            }
            None => {
                let data = produced.ok_or_else(|| ScribaError::ConversionFailed {
                    message: "Engine returned no data".to_string(),
                })?;
                debug!("Returning {} bytes inline", data.len());
                Ok(ConvertOutcome::Data { data })
            }
        }
    }
}

#[async_trait::async_trait]
impl RpcDispatch for ConversionService {
    async fn dispatch(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, ScribaError> {
        match method {
            // Never touches the engine, so it works even mid-conversion
            "get_version" => Ok(serde_json::json!(crate::SERVICE_VERSION)),
            "convert" => {
                let params: ConvertParams =
                    serde_json::from_value(params).map_err(|e| ScribaError::InvalidRequest {
                        message: format!("Invalid convert params: {}", e),
                    })?;
                let outcome = self.handle_convert(params).await?;
                Ok(serde_json::to_value(outcome)?)
            }
            "compare" => {
                let params: CompareParams =
                    serde_json::from_value(params).map_err(|e| ScribaError::InvalidRequest {
                        message: format!("Invalid compare params: {}", e),
                    })?;
                let outcome = self.handle_compare(params).await?;
                Ok(serde_json::to_value(outcome)?)
            }
            other => Err(ScribaError::UnknownMethod(other.to_string())),
        }
    }
}
