//! Write-once identifier slots owned by a provisioning session.

use thiserror::Error;

/// Raised when a slot that must be empty already holds an identifier.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{slot} identifier already set to {existing}")]
pub struct SlotError {
    /// Name of the slot.
    pub slot: &'static str,
    /// Identifier already stored.
    pub existing: String,
}

/// Identifier that is either unset or set exactly once.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum IdSlot {
    /// No identifier recorded yet.
    #[default]
    Unset,
    /// Identifier recorded during this run.
    Set(String),
}

impl IdSlot {
    /// Returns the identifier, if any.
    #[must_use]
    pub fn get(&self) -> Option<&str> {
        match self {
            Self::Unset => None,
            Self::Set(id) => Some(id),
        }
    }

    /// Returns `true` once an identifier has been recorded.
    #[must_use]
    pub const fn is_set(&self) -> bool {
        matches!(self, Self::Set(_))
    }

    /// Fails when the slot already holds an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError`] naming `slot` and the stored identifier.
    pub fn ensure_unset(&self, slot: &'static str) -> Result<(), SlotError> {
        match self {
            Self::Unset => Ok(()),
            Self::Set(existing) => Err(SlotError {
                slot,
                existing: existing.clone(),
            }),
        }
    }

    /// Records `id`, refusing to overwrite an existing value.
    ///
    /// # Errors
    ///
    /// Returns [`SlotError`] when the slot is already set.
    pub fn set(&mut self, slot: &'static str, id: impl Into<String>) -> Result<(), SlotError> {
        self.ensure_unset(slot)?;
        *self = Self::Set(id.into());
        Ok(())
    }

    /// Clears the slot and returns the previous identifier.
    pub fn take(&mut self) -> Option<String> {
        match std::mem::take(self) {
            Self::Unset => None,
            Self::Set(id) => Some(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_records_identifier_once() {
        let mut slot = IdSlot::default();
        slot.set("environment", "env-1").expect("first write succeeds");
        assert_eq!(slot.get(), Some("env-1"));

        let err = slot
            .set("environment", "env-2")
            .expect_err("second write must fail");
        assert_eq!(
            err,
            SlotError {
                slot: "environment",
                existing: String::from("env-1"),
            }
        );
        assert_eq!(slot.get(), Some("env-1"));
    }

    #[test]
    fn take_empties_the_slot() {
        let mut slot = IdSlot::Set(String::from("bld-1"));
        assert_eq!(slot.take().as_deref(), Some("bld-1"));
        assert!(!slot.is_set());
        assert!(slot.take().is_none());
        assert!(slot.ensure_unset("build").is_ok());
    }
}
