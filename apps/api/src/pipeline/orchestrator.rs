//! Stage Pipeline Orchestrator: runs a [`Pipeline`] for one job.
//!
//! Flow: validate chain → for each stage: render → stream through a
//! TokenBatcher → store output → extract the final JSON object.
//!
//! A run moves Pending → Running(0) → … → Running(n-1) → Completed, or to
//! Failed from any point. Nothing partial is returned on failure.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{Pipeline, PipelineError};
use crate::events::{EventHub, TokenBatcher};
use crate::llm_client::prompts::render_template;
use crate::llm_client::TextEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    /// Index into the pipeline's stage list (not the progress index).
    Running(usize),
    Completed,
    Failed,
}

/// Shared collaborators for pipeline runs.
#[derive(Clone)]
pub struct Orchestrator {
    engine: Arc<dyn TextEngine>,
    hub: Arc<EventHub>,
    batch_size: usize,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn TextEngine>, hub: Arc<EventHub>, batch_size: usize) -> Self {
        Self {
            engine,
            hub,
            batch_size,
        }
    }

    /// Runs `pipeline` for `job_id` and returns the final output as compact JSON.
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        job_id: &str,
        inputs: HashMap<String, String>,
    ) -> Result<String, PipelineError> {
        let mut run = PipelineRun::new(job_id, inputs);
        let result = run.execute(self, pipeline).await;
        debug!("Run for {job_id} ended in state {:?}", run.state());
        result
    }
}

/// The state of one pipeline execution.
pub struct PipelineRun {
    job_id: String,
    values: HashMap<String, String>,
    state: RunState,
}

impl PipelineRun {
    pub fn new(job_id: &str, inputs: HashMap<String, String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            values: inputs,
            state: RunState::Pending,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub async fn execute(
        &mut self,
        orchestrator: &Orchestrator,
        pipeline: &Pipeline,
    ) -> Result<String, PipelineError> {
        let result = self.drive(orchestrator, pipeline).await;
        match &result {
            Ok(_) => {
                self.state = RunState::Completed;
                info!("Pipeline completed for {}", self.job_id);
            }
            Err(e) => {
                self.state = RunState::Failed;
                warn!("Pipeline failed for {}: {e}", self.job_id);
            }
        }
        result
    }

    async fn drive(
        &mut self,
        orchestrator: &Orchestrator,
        pipeline: &Pipeline,
    ) -> Result<String, PipelineError> {
        // Configuration errors are fatal before any stage runs.
        pipeline.validate(self.values.keys().map(String::as_str))?;

        for (i, stage) in pipeline.stages.iter().enumerate() {
            self.state = RunState::Running(i);
            info!(
                "Running stage {} ({}/{}) for {}",
                stage.name,
                stage.progress_index,
                pipeline.stages.len(),
                self.job_id
            );

            let prompt = render_template(&stage.template, &stage.input_variables, &self.values);
            let mut batcher = TokenBatcher::new(
                orchestrator.hub.clone(),
                self.job_id.as_str(),
                stage.progress_index,
                orchestrator.batch_size,
            );
            let output = orchestrator
                .engine
                .generate(&prompt, &mut batcher)
                .await
                .map_err(|source| PipelineError::Engine {
                    stage: stage.name.clone(),
                    source,
                })?;

            self.values.insert(stage.output_key.clone(), output);
        }

        let raw = self
            .values
            .get(&pipeline.final_output)
            .ok_or_else(|| PipelineError::MissingVariable {
                stage: "final output".to_string(),
                variable: pipeline.final_output.clone(),
            })?;
        extract_json_object(raw)
    }
}

/// Strips commentary around a JSON object (everything before the first `{`
/// and after the last `}`) and returns the object re-serialized compactly.
pub fn extract_json_object(text: &str) -> Result<String, PipelineError> {
    let (start, end) = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => (start, end),
        _ => {
            return Err(PipelineError::MalformedOutput(
                "no JSON object found in output".to_string(),
            ))
        }
    };
    let value: serde_json::Value = serde_json::from_str(&text[start..=end])
        .map_err(|e| PipelineError::MalformedOutput(e.to_string()))?;
    serde_json::to_string(&value).map_err(|e| PipelineError::MalformedOutput(e.to_string()))
}
