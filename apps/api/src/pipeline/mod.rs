// Resume analysis pipeline.
// An ordered list of stage descriptors interpreted by the orchestrator loop.
// All text generation goes through llm_client::TextEngine.

pub mod orchestrator;
pub mod prompts;

use thiserror::Error;

use crate::llm_client::LlmError;

pub use orchestrator::Orchestrator;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stage '{stage}' needs variable '{variable}' which no earlier stage or input provides")]
    MissingVariable { stage: String, variable: String },

    #[error("malformed final output: {0}")]
    MalformedOutput(String),

    #[error("text generation failed in stage '{stage}': {source}")]
    Engine {
        stage: String,
        #[source]
        source: LlmError,
    },
}

/// One text-generation step: renders `template` with `input_variables` and
/// stores the generated text under `output_key`.
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub template: String,
    pub input_variables: Vec<String>,
    pub output_key: String,
    /// Published as the stage's `progress` payload when it completes.
    pub progress_index: u32,
}

impl Stage {
    pub fn new(
        name: &str,
        template: &str,
        input_variables: &[&str],
        output_key: &str,
        progress_index: u32,
    ) -> Self {
        Self {
            name: name.to_string(),
            template: template.to_string(),
            input_variables: input_variables.iter().map(|v| v.to_string()).collect(),
            output_key: output_key.to_string(),
            progress_index,
        }
    }
}

/// A linear chain of stages plus the key whose value is the run's result.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    pub final_output: String,
}

impl Pipeline {
    /// Checks that every stage's inputs are satisfiable from `inputs` plus the
    /// outputs of the stages before it, and that the final output is produced.
    pub fn validate<'a>(&self, inputs: impl IntoIterator<Item = &'a str>) -> Result<(), PipelineError> {
        let mut available: Vec<&str> = inputs.into_iter().collect();
        for stage in &self.stages {
            if let Some(missing) = stage
                .input_variables
                .iter()
                .find(|v| !available.contains(&v.as_str()))
            {
                return Err(PipelineError::MissingVariable {
                    stage: stage.name.clone(),
                    variable: missing.clone(),
                });
            }
            available.push(&stage.output_key);
        }
        if !available.contains(&self.final_output.as_str()) {
            return Err(PipelineError::MissingVariable {
                stage: "final output".to_string(),
                variable: self.final_output.clone(),
            });
        }
        Ok(())
    }

    /// markdown → work experience breakdown → structured JSON.
    pub fn resume_analysis() -> Self {
        Self {
            stages: vec![
                Stage::new(
                    "format_markdown",
                    prompts::FORMAT_MARKDOWN_TEMPLATE,
                    &["resume_content"],
                    "markdown",
                    1,
                ),
                Stage::new(
                    "work_experience",
                    prompts::WORK_EXPERIENCE_TEMPLATE,
                    &["markdown"],
                    "work_experience",
                    2,
                ),
                Stage::new(
                    "experience_json",
                    prompts::EXPERIENCE_JSON_TEMPLATE,
                    &["work_experience", "json_schema"],
                    "json",
                    3,
                ),
            ],
            final_output: "json".to_string(),
        }
    }
}
