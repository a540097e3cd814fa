//! Saga definitions
//!
//! A definition is the ordered, immutable list of steps a saga type executes.
//! It is validated once at construction; every saga instance for that type
//! shares it.

use crate::error::{Result, SagaError};
use crate::naming::{failure_task_name, success_task_name};
use crate::step::Step;
use std::collections::HashSet;
use std::sync::Arc;

/// Ordered, non-empty sequence of steps making up one saga type
#[derive(Debug)]
pub struct SagaDefinition {
    name: String,
    steps: Vec<Arc<Step>>,
}

impl SagaDefinition {
    /// Validate and freeze a step list.
    ///
    /// Rejected at construction: an empty list, duplicate step names, and
    /// duplicate base task names (those would derive colliding reply names,
    /// making replies ambiguous).
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Result<Self> {
        let name = name.into();
        if steps.is_empty() {
            return Err(SagaError::Definition(format!(
                "saga \"{name}\" has no steps"
            )));
        }

        let mut step_names = HashSet::new();
        let mut base_task_names = HashSet::new();
        for step in &steps {
            if !step_names.insert(step.name().to_string()) {
                return Err(SagaError::Definition(format!(
                    "saga \"{name}\" has duplicate step name \"{}\"",
                    step.name()
                )));
            }
            if let Some(spec) = step.remote_spec() {
                if !base_task_names.insert(spec.base_task_name.clone()) {
                    return Err(SagaError::Definition(format!(
                        "saga \"{name}\" has duplicate base task name \"{}\"",
                        spec.base_task_name
                    )));
                }
            }
        }

        Ok(Self {
            name,
            steps: steps.into_iter().map(Arc::new).collect(),
        })
    }

    /// Saga type name, used for logging and registration
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All steps in execution order
    pub fn steps(&self) -> &[Arc<Step>] {
        &self.steps
    }

    /// The step a fresh saga starts on
    pub fn first_step(&self) -> &Arc<Step> {
        &self.steps[0]
    }

    /// Look up a step by name
    pub fn step_by_name(&self, step_name: &str) -> Result<&Arc<Step>> {
        self.steps
            .iter()
            .find(|step| step.name() == step_name)
            .ok_or_else(|| SagaError::UnknownStep(step_name.to_string()))
    }

    fn index_of(&self, step: &Step) -> Option<usize> {
        self.steps.iter().position(|s| s.name() == step.name())
    }

    /// The step after `step`, if `step` is not the last
    pub fn next_step(&self, step: &Step) -> Option<&Arc<Step>> {
        let index = self.index_of(step)?;
        self.steps.get(index + 1)
    }

    /// The step before `step`, if `step` is not the first
    pub fn previous_step(&self, step: &Step) -> Option<&Arc<Step>> {
        let index = self.index_of(step)?;
        index.checked_sub(1).map(|i| &self.steps[i])
    }

    pub fn is_last_step(&self, step: &Step) -> bool {
        self.steps
            .last()
            .is_some_and(|last| last.name() == step.name())
    }

    /// Remote steps in definition order
    pub fn remote_steps(&self) -> impl Iterator<Item = &Arc<Step>> {
        self.steps.iter().filter(|step| step.is_remote())
    }

    /// Find the remote step whose derived success reply name is `task_name`
    pub fn remote_step_by_success_task_name(&self, task_name: &str) -> Option<&Arc<Step>> {
        self.remote_steps().find(|step| {
            step.remote_spec()
                .is_some_and(|spec| success_task_name(&spec.base_task_name) == task_name)
        })
    }

    /// Find the remote step whose derived failure reply name is `task_name`
    pub fn remote_step_by_failure_task_name(&self, task_name: &str) -> Option<&Arc<Step>> {
        self.remote_steps().find(|step| {
            step.remote_spec()
                .is_some_and(|spec| failure_task_name(&spec.base_task_name) == task_name)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trip_definition() -> SagaDefinition {
        SagaDefinition::new(
            "trip",
            vec![
                Step::local("reserve_seat"),
                Step::remote("book_hotel", "hotel.book", "hotel_service"),
                Step::local("confirm"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_navigation() {
        let def = trip_definition();

        assert_eq!(def.first_step().name(), "reserve_seat");
        assert_eq!(
            def.next_step(def.first_step()).unwrap().name(),
            "book_hotel"
        );

        let confirm = def.step_by_name("confirm").unwrap().clone();
        assert!(def.next_step(&confirm).is_none());
        assert!(def.is_last_step(&confirm));
        assert_eq!(def.previous_step(&confirm).unwrap().name(), "book_hotel");
        assert!(def.previous_step(def.first_step()).is_none());
    }

    #[test]
    fn test_remote_step_lookup_by_reply_name() {
        let def = trip_definition();

        let step = def
            .remote_step_by_success_task_name("hotel.book.response.success")
            .unwrap();
        assert_eq!(step.name(), "book_hotel");

        let step = def
            .remote_step_by_failure_task_name("hotel.book.response.failure")
            .unwrap();
        assert_eq!(step.name(), "book_hotel");

        assert!(def
            .remote_step_by_success_task_name("hotel.book.response.failure")
            .is_none());
        assert!(def.remote_step_by_success_task_name("hotel.book").is_none());
    }

    #[test]
    fn test_empty_definition_is_rejected() {
        let err = SagaDefinition::new("empty", vec![]).unwrap_err();
        assert!(matches!(err, SagaError::Definition(_)));
    }

    #[test]
    fn test_duplicate_step_names_are_rejected() {
        let err = SagaDefinition::new(
            "dup",
            vec![Step::local("a"), Step::local("a")],
        )
        .unwrap_err();
        assert!(matches!(err, SagaError::Definition(_)));
    }

    #[test]
    fn test_duplicate_base_task_names_are_rejected() {
        let err = SagaDefinition::new(
            "dup",
            vec![
                Step::remote("first", "shared.task", "q1"),
                Step::remote("second", "shared.task", "q2"),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, SagaError::Definition(_)));
    }

    #[test]
    fn test_unknown_step_lookup_fails() {
        let def = trip_definition();
        assert!(matches!(
            def.step_by_name("missing").unwrap_err(),
            SagaError::UnknownStep(_)
        ));
    }
}
