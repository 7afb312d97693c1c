//! Ledger-recording wrapper around provider calls
//!
//! Every external call made on behalf of a move passes through
//! [`ToolRunner`], which times it, races it against cancellation and writes
//! exactly one [`ToolRun`](delib_ledger::ToolRun) whatever the outcome.

use crate::error::CoreError;
use crate::provider::{
    DocParseProvider, DocumentSource, LanguageProvider, Mask, ProviderError, RasterRef, SegmentationProvider,
    StructuredRequest, StructuredResponse, VectorFeature, VectorizationProvider,
};
use chrono::Utc;
use delib_lattice::ParsedDocument;
use delib_ledger::{LedgerError, ProvenanceLedger, Timestamp, ToolInvocation, ToolRunId};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A recorded call and what it returned
#[derive(Debug)]
pub struct ToolOutcome<T> {
    pub tool_name: String,
    pub tool_run_id: ToolRunId,
    pub result: Result<T, ProviderError>,
}

impl<T> ToolOutcome<T> {
    /// The provider's value, or a `ToolFailure` naming the recorded run
    pub fn into_result(self) -> Result<T, CoreError> {
        let Self {
            tool_name,
            tool_run_id,
            result,
        } = self;
        result.map_err(|err| CoreError::tool_failure(tool_name, Some(tool_run_id), err.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct ToolRunner {
    ledger: Arc<dyn ProvenanceLedger>,
}

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_default()
}

async fn observe<T, F>(call: F, cancel: &CancellationToken) -> (Timestamp, Timestamp, Result<T, ProviderError>)
where
    F: Future<Output = Result<T, ProviderError>>,
{
    let started = Utc::now();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        result = call => result,
    };
    (started, Utc::now(), result)
}

impl ToolRunner {
    #[inline]
    #[must_use]
    pub fn new(ledger: Arc<dyn ProvenanceLedger>) -> Self {
        Self { ledger }
    }

    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn ProvenanceLedger> {
        &self.ledger
    }

    fn record<T: Serialize>(
        &self,
        tool_name: String,
        invocation: ToolInvocation,
        result: Result<T, ProviderError>,
    ) -> Result<ToolOutcome<T>, LedgerError> {
        let invocation = match &result {
            Ok(output) => invocation.with_outputs(to_json(output)),
            Err(err) => {
                tracing::warn!(tool = %tool_name, error = %err, "tool call failed");
                invocation.failed(err.tool_status(), err.to_string())
            }
        };
        let tool_run_id = self.ledger.record(invocation)?;
        tracing::debug!(tool = %tool_name, %tool_run_id, ok = result.is_ok(), "tool run recorded");
        Ok(ToolOutcome {
            tool_name,
            tool_run_id,
            result,
        })
    }

    /// Run `call` and record it under `tool_name`
    ///
    /// # Errors
    /// Only if the ledger refuses the record; provider failures are returned
    /// inside the outcome.
    pub async fn call<T, F>(
        &self,
        tool_name: impl Into<String>,
        inputs: Value,
        cancel: &CancellationToken,
        call: F,
    ) -> Result<ToolOutcome<T>, LedgerError>
    where
        T: Serialize,
        F: Future<Output = Result<T, ProviderError>>,
    {
        let tool_name = tool_name.into();
        let (started, ended, result) = observe(call, cancel).await;
        let invocation = ToolInvocation::new(tool_name.clone(), inputs).timed(started, ended);
        self.record(tool_name, invocation, result)
    }

    /// Structured generation, with the prompt ref echo checked
    ///
    /// A response echoing a different prompt ref than the one sent is
    /// recorded as an error and returned as `MalformedResponse`.
    pub async fn generate(
        &self,
        provider: &dyn LanguageProvider,
        request: StructuredRequest,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome<StructuredResponse>, LedgerError> {
        let tool_name = format!("llm.{}", provider.name());
        let inputs = to_json(&request);
        let expected = request.prompt.clone();

        let (started, ended, mut result) = observe(provider.generate_structured(request), cancel).await;
        let mut invocation = ToolInvocation::new(tool_name.clone(), inputs)
            .timed(started, ended)
            .with_prompt(expected.clone());
        if let Ok(response) = &result {
            invocation = invocation.with_model(response.model_id.clone());
            if let Some(confidence) = response.json.get("confidence").and_then(Value::as_f64) {
                invocation = invocation.with_confidence(confidence as f32);
            }
            if response.prompt != expected {
                result = Err(ProviderError::MalformedResponse(format!(
                    "response echoes prompt {} but {expected} was sent",
                    response.prompt
                )));
            }
        }
        self.record(tool_name, invocation, result)
    }

    pub async fn segment(
        &self,
        provider: &dyn SegmentationProvider,
        raster: RasterRef,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome<Mask>, LedgerError> {
        let tool_name = format!("segmentation.{}", provider.name());
        self.call(tool_name, to_json(&raster), cancel, provider.segment(raster.clone()))
            .await
    }

    pub async fn vectorize(
        &self,
        provider: &dyn VectorizationProvider,
        raster: RasterRef,
        mask: Option<Mask>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome<Vec<VectorFeature>>, LedgerError> {
        let tool_name = format!("vectorization.{}", provider.name());
        let inputs = serde_json::json!({ "raster": to_json(&raster), "mask": to_json(&mask) });
        self.call(tool_name, inputs, cancel, provider.vectorize(raster, mask)).await
    }

    pub async fn parse(
        &self,
        provider: &dyn DocParseProvider,
        source: DocumentSource,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome<ParsedDocument>, LedgerError> {
        let tool_name = format!("docparse.{}", provider.name());
        self.call(tool_name, to_json(&source), cancel, provider.parse(source.clone()))
            .await
    }
}
