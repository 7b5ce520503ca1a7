//! Core options (`SET_VARIABLES` / `GET_VARIABLE` / `GET_VARIABLE_UPDATE`).
//!
//! A core declares each option as `key` + `"Description; choice1|choice2|..."`; the first
//! choice is the default. The host answers `GET_VARIABLE` from its overrides when the
//! override is one of the declared choices, otherwise with the default.

use std::collections::{BTreeMap, HashMap};
use std::ffi::{CStr, CString};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VariableDefinition {
    pub key: String,
    pub description: String,
    pub choices: Vec<String>,
}

impl VariableDefinition {
    /// Parse the `"Description; a|b|c"` form. Returns `None` when no choice is listed.
    pub fn parse(key: &str, declaration: &str) -> Option<Self> {
        let (description, choices) = declaration.split_once(';')?;
        let choices: Vec<String> = choices
            .trim()
            .split('|')
            .map(str::trim)
            .filter(|choice| !choice.is_empty())
            .map(str::to_owned)
            .collect();
        if choices.is_empty() {
            return None;
        }
        Some(Self {
            key: key.to_owned(),
            description: description.trim().to_owned(),
            choices,
        })
    }

    pub fn default_choice(&self) -> &str {
        &self.choices[0]
    }

    pub fn accepts(&self, value: &str) -> bool {
        self.choices.iter().any(|choice| choice == value)
    }
}

#[derive(Debug, Default)]
pub struct Variables {
    definitions: BTreeMap<String, VariableDefinition>,
    overrides: BTreeMap<String, String>,
    // Strings handed to the core; replaced only when the answer changes.
    answers: HashMap<String, CString>,
    dirty: bool,
}

impl Variables {
    pub fn with_overrides(overrides: BTreeMap<String, String>) -> Self {
        Self {
            overrides,
            ..Self::default()
        }
    }

    /// Replace the declared options. Answers for undeclared keys are dropped.
    pub fn define(&mut self, definitions: Vec<VariableDefinition>) {
        self.definitions = definitions
            .into_iter()
            .map(|definition| (definition.key.clone(), definition))
            .collect();
        self.answers
            .retain(|key, _| self.definitions.contains_key(key));
        self.dirty = false;
    }

    pub fn definitions(&self) -> impl Iterator<Item = &VariableDefinition> {
        self.definitions.values()
    }

    /// Value the core should see for `key`.
    pub fn current(&self, key: &str) -> Option<&str> {
        let definition = self.definitions.get(key)?;
        match self.overrides.get(key) {
            Some(value) if definition.accepts(value) => Some(value),
            Some(value) => {
                log::warn!("ignoring override {key}={value}: not one of {:?}", definition.choices);
                Some(definition.default_choice())
            }
            None => Some(definition.default_choice()),
        }
    }

    /// Current value as a C string that stays valid until the answer for `key` changes.
    pub fn answer(&mut self, key: &str) -> Option<&CStr> {
        let value = self.current(key)?.to_owned();
        let stale = self
            .answers
            .get(key)
            .is_none_or(|existing| existing.as_bytes() != value.as_bytes());
        if stale {
            let value = CString::new(value).ok()?;
            self.answers.insert(key.to_owned(), value);
        }
        self.answers.get(key).map(CString::as_c_str)
    }

    /// Change an option at runtime; the core learns about it via `GET_VARIABLE_UPDATE`.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        let Some(definition) = self.definitions.get(key) else {
            return false;
        };
        if !definition.accepts(value) {
            return false;
        }
        if self.overrides.get(key).map(String::as_str) != Some(value) {
            self.overrides.insert(key.to_owned(), value.to_owned());
            self.dirty = true;
        }
        true
    }

    /// Report and clear the "options changed" flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}
