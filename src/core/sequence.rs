//! Ordered steps interpreted by the orchestrator.
//!
//! A step is a single task or a group of tasks that run concurrently. Steps
//! run strictly in order, and a group is a barrier: the next step starts only
//! once every member has finished.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Task(String),
    Group(Vec<String>),
}

impl Step {
    pub fn task_names(&self) -> Vec<&str> {
        match self {
            Step::Task(name) => vec![name.as_str()],
            Step::Group(names) => names.iter().map(String::as_str).collect(),
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Task(name) => write!(f, "{}", name),
            Step::Group(names) => write!(f, "[{}]", names.join(", ")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence {
    steps: Vec<Step>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sequence of single-task steps.
    pub fn linear<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names
            .into_iter()
            .map(|name| Step::Task(name.into()))
            .collect()
    }

    pub fn then(mut self, name: &str) -> Self {
        self.steps.push(Step::Task(name.to_string()));
        self
    }

    pub fn then_group<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps
            .push(Step::Group(names.into_iter().map(Into::into).collect()));
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// All task names in step order.
    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().flat_map(|step| step.task_names())
    }
}

impl FromIterator<Step> for Sequence {
    fn from_iter<T: IntoIterator<Item = Step>>(iter: T) -> Self {
        Self {
            steps: iter.into_iter().collect(),
        }
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.steps.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", parts.join(" -> "))
    }
}
