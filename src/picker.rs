//! Pipeline source picker.
//!
//! A small modal driven by messages. Confirming hands the selection back to
//! the caller as [`PickerOutcome::Submit`]; the picker stays open until the
//! caller reports that `start_pipeline` was sent.

use std::collections::BTreeSet;

use crate::error::ConsoleError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PickerMsg {
    Open(Vec<String>),
    Toggle(String),
    Confirm,
    Cancel,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PickerOutcome {
    Pending,
    Submit(Vec<String>),
    Closed,
}

#[derive(Clone, Debug, Default)]
pub struct SourcePicker {
    open: bool,
    candidates: Vec<String>,
    selected: BTreeSet<String>,
}

impl SourcePicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn is_selected(&self, source: &str) -> bool {
        self.selected.contains(source)
    }

    pub fn update(&mut self, msg: PickerMsg) -> Result<PickerOutcome, ConsoleError> {
        match msg {
            PickerMsg::Open(candidates) => {
                self.candidates = candidates;
                self.selected.clear();
                self.open = true;
                Ok(PickerOutcome::Pending)
            }
            PickerMsg::Cancel => {
                self.close();
                Ok(PickerOutcome::Closed)
            }
            _ if !self.open => Err(ConsoleError::InvalidState("source picker is not open")),
            PickerMsg::Toggle(source) => {
                if !self.candidates.contains(&source) {
                    return Err(ConsoleError::InvalidIdentifier(source));
                }
                if !self.selected.remove(&source) {
                    self.selected.insert(source);
                }
                Ok(PickerOutcome::Pending)
            }
            PickerMsg::Confirm => {
                if self.selected.is_empty() {
                    return Err(ConsoleError::InvalidState("select at least one source"));
                }
                // candidate order, not selection order
                let sources = self
                    .candidates
                    .iter()
                    .filter(|c| self.selected.contains(*c))
                    .cloned()
                    .collect();
                Ok(PickerOutcome::Submit(sources))
            }
        }
    }

    pub fn close(&mut self) {
        self.open = false;
        self.selected.clear();
    }
}
