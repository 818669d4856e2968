// Flow Store Port - resolves which flow and sink serve a job

use crate::domain::{Flow, FlowBinding, JobSpecification, Sink};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Binding for the specification, or None when nothing matches
    async fn resolve(&self, specification: &JobSpecification) -> Result<Option<FlowBinding>>;
}

/// One static binding rule, matched on the specification's submission fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowBindingRule {
    pub packaging: String,
    pub format: String,
    pub charset: String,
    pub destination: String,
    /// Empty matches any submitter
    #[serde(default)]
    pub submitter_ids: Vec<i64>,
    pub flow: Flow,
    pub sink: Sink,
}

impl FlowBindingRule {
    pub fn matches(&self, spec: &JobSpecification) -> bool {
        self.packaging.eq_ignore_ascii_case(&spec.packaging)
            && self.format.eq_ignore_ascii_case(&spec.format)
            && self.charset.eq_ignore_ascii_case(&spec.charset)
            && self.destination == spec.destination
            && (self.submitter_ids.is_empty() || self.submitter_ids.contains(&spec.submitter_id))
    }
}

/// Flow store backed by a fixed rule list; the first matching rule wins
#[derive(Debug, Clone, Default)]
pub struct StaticFlowStore {
    rules: Vec<FlowBindingRule>,
}

impl StaticFlowStore {
    pub fn new(rules: Vec<FlowBindingRule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl FlowStore for StaticFlowStore {
    async fn resolve(&self, specification: &JobSpecification) -> Result<Option<FlowBinding>> {
        Ok(self
            .rules
            .iter()
            .find(|rule| rule.matches(specification))
            .map(|rule| FlowBinding {
                flow: rule.flow.clone(),
                sink: rule.sink.clone(),
            }))
    }
}
