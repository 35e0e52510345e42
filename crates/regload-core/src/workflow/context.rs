//! Per-execution workflow state.

use crate::config::ImageConfig;
use crate::source::WorkItem;

/// Identifier a step may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requirement {
    Repository,
    Policy,
    Watch,
}

impl Requirement {
    pub fn column(&self) -> &'static str {
        match self {
            Requirement::Repository => "repo_name",
            Requirement::Policy => "policy_name",
            Requirement::Watch => "watch_name",
        }
    }
}

/// State owned by one chain execution.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    /// Short random id used to correlate logs of one execution.
    pub execution_id: String,
    pub item: WorkItem,
    /// Path of the pushed image's manifest inside the repository.
    pub artifact_path: String,
}

impl WorkflowContext {
    pub fn new(item: WorkItem, image: &ImageConfig) -> Self {
        let execution_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            execution_id,
            item,
            artifact_path: format!(
                "{}/{}/manifest.json",
                image.target_name, image.target_tag
            ),
        }
    }

    pub fn repo(&self) -> Option<&str> {
        self.item.repo_name()
    }

    pub fn policy(&self) -> Option<&str> {
        self.item.policy_name()
    }

    pub fn watch(&self) -> Option<&str> {
        self.item.watch_name()
    }

    pub fn identifier(&self, requirement: Requirement) -> Option<&str> {
        match requirement {
            Requirement::Repository => self.repo(),
            Requirement::Policy => self.policy(),
            Requirement::Watch => self.watch(),
        }
    }

    /// First requirement in `required` this context cannot satisfy.
    pub fn first_missing(&self, required: &[Requirement]) -> Option<Requirement> {
        required
            .iter()
            .copied()
            .find(|r| self.identifier(*r).is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_derives_identifiers() {
        let item = WorkItem::from_pairs([
            ("repo_name", "docker-local-7"),
            ("policy_name", "sec-7"),
            ("watch_name", ""),
        ]);
        let ctx = WorkflowContext::new(item, &ImageConfig::default());

        assert_eq!(ctx.execution_id.len(), 8);
        assert_eq!(ctx.repo(), Some("docker-local-7"));
        assert_eq!(ctx.artifact_path, "loadtest/latest/manifest.json");
        assert_eq!(
            ctx.first_missing(&[Requirement::Repository, Requirement::Watch]),
            Some(Requirement::Watch)
        );
        assert_eq!(ctx.first_missing(&[Requirement::Policy]), None);
    }

    #[test]
    fn test_execution_ids_differ() {
        let a = WorkflowContext::new(WorkItem::default(), &ImageConfig::default());
        let b = WorkflowContext::new(WorkItem::default(), &ImageConfig::default());
        assert_ne!(a.execution_id, b.execution_id);
    }
}
