use crate::decisions::DecisionProvider;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionChoice {
    KeepThis,
    RemoveThis,
    KeepAll,
    RemoveAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletionPolicy {
    #[default]
    AskEachTime,
    KeepAll,
    RemoveAll,
}

impl DeletionPolicy {
    /// Next state plus whether the file being asked about should go.
    pub fn answer(self, choice: DeletionChoice) -> (Self, bool) {
        match (self, choice) {
            (DeletionPolicy::KeepAll, _) => (DeletionPolicy::KeepAll, false),
            (DeletionPolicy::RemoveAll, _) => (DeletionPolicy::RemoveAll, true),
            (DeletionPolicy::AskEachTime, DeletionChoice::KeepThis) => {
                (DeletionPolicy::AskEachTime, false)
            }
            (DeletionPolicy::AskEachTime, DeletionChoice::RemoveThis) => {
                (DeletionPolicy::AskEachTime, true)
            }
            (DeletionPolicy::AskEachTime, DeletionChoice::KeepAll) => (DeletionPolicy::KeepAll, false),
            (DeletionPolicy::AskEachTime, DeletionChoice::RemoveAll) => {
                (DeletionPolicy::RemoveAll, true)
            }
        }
    }

    pub fn is_settled(self) -> bool {
        self != DeletionPolicy::AskEachTime
    }
}

#[derive(Debug, Default)]
pub struct BatchDeletion {
    policy: DeletionPolicy,
}

impl BatchDeletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy(&self) -> DeletionPolicy {
        self.policy
    }

    pub fn decide(&mut self, source: &Path, decisions: &dyn DecisionProvider) -> bool {
        let (next, remove) = if self.policy.is_settled() {
            self.policy.answer(DeletionChoice::KeepThis)
        } else {
            self.policy.answer(decisions.deletion_choice(source))
        };
        if next != self.policy {
            debug!(?next, "deletion policy settled for the rest of the batch");
        }
        self.policy = next;
        remove
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decisions::AutoDecisions;
    use std::sync::atomic::Ordering;

    #[test]
    fn to_all_answers_are_terminal() {
        let (state, remove) = DeletionPolicy::AskEachTime.answer(DeletionChoice::RemoveAll);
        assert_eq!(state, DeletionPolicy::RemoveAll);
        assert!(remove);
        for choice in [
            DeletionChoice::KeepThis,
            DeletionChoice::KeepAll,
            DeletionChoice::RemoveThis,
        ] {
            assert_eq!(state.answer(choice), (DeletionPolicy::RemoveAll, true));
        }

        let (state, remove) = DeletionPolicy::AskEachTime.answer(DeletionChoice::KeepAll);
        assert_eq!(state, DeletionPolicy::KeepAll);
        assert!(!remove);
        assert_eq!(
            state.answer(DeletionChoice::RemoveAll),
            (DeletionPolicy::KeepAll, false)
        );
    }

    #[test]
    fn this_one_answers_keep_asking() {
        assert_eq!(
            DeletionPolicy::AskEachTime.answer(DeletionChoice::RemoveThis),
            (DeletionPolicy::AskEachTime, true)
        );
        assert_eq!(
            DeletionPolicy::AskEachTime.answer(DeletionChoice::KeepThis),
            (DeletionPolicy::AskEachTime, false)
        );
    }

    #[test]
    fn batch_prompts_once_after_remove_all() {
        let decisions = AutoDecisions {
            deletion: DeletionChoice::RemoveAll,
            ..AutoDecisions::default()
        };
        let mut batch = BatchDeletion::new();
        for name in ["a.avi", "b.avi", "c.avi"] {
            assert!(batch.decide(Path::new(name), &decisions));
        }
        assert_eq!(batch.policy(), DeletionPolicy::RemoveAll);
        assert_eq!(decisions.deletion_prompts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn batch_prompts_every_file_for_this_one_answers() {
        let decisions = AutoDecisions {
            deletion: DeletionChoice::KeepThis,
            ..AutoDecisions::default()
        };
        let mut batch = BatchDeletion::new();
        for name in ["a.avi", "b.avi"] {
            assert!(!batch.decide(Path::new(name), &decisions));
        }
        assert_eq!(batch.policy(), DeletionPolicy::AskEachTime);
        assert_eq!(decisions.deletion_prompts.load(Ordering::SeqCst), 2);
    }
}
