//! Survey aggregate: the health-profile answers collected on the survey
//! screen.

use std::collections::BTreeSet;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::PERIOD_DATE_PROMPT;
use crate::error::StoreError;

/// Gender index that enables the period-date prompt.
pub const FEMALE_GENDER_INDEX: u8 = 1;

/// Number of gender options on the segmented control.
const GENDER_OPTIONS: u8 = 2;

/// Number of lifestyle options (sedentary, moderate, active).
const LIFESTYLE_OPTIONS: u8 = 3;

/// Minimum age, exclusive, at which the period date is asked for.
const PERIOD_DATE_MIN_AGE: u32 = 10;

/// Answers collected across the survey screen.
///
/// Numeric answers stay as text so partial input survives; they are parsed
/// on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSurveyData {
    pub gender_index: u8,
    pub age: String,
    pub height: String,
    pub weight: String,
    pub lifestyle_index: u8,
    pub selected_conditions: BTreeSet<String>,
    pub last_period_start_epoch_millis: Option<i64>,
}

impl UserSurveyData {
    /// Returns false (and leaves the answer alone) for an index outside the
    /// gender options.
    pub fn update_gender(&mut self, index: u8) -> bool {
        if index >= GENDER_OPTIONS {
            warn!(index, "Ignoring out-of-range gender index");
            return false;
        }
        self.gender_index = index;
        true
    }

    pub fn update_age(&mut self, age: &str) {
        self.age = age.to_string();
    }

    pub fn update_height(&mut self, height: &str) {
        self.height = height.to_string();
    }

    pub fn update_weight(&mut self, weight: &str) {
        self.weight = weight.to_string();
    }

    /// Returns false (and leaves the answer alone) for an index outside the
    /// lifestyle options.
    pub fn update_lifestyle(&mut self, index: u8) -> bool {
        if index >= LIFESTYLE_OPTIONS {
            warn!(index, "Ignoring out-of-range lifestyle index");
            return false;
        }
        self.lifestyle_index = index;
        true
    }

    /// Add the condition if absent, remove it if present. Returns whether it
    /// is selected afterwards.
    pub fn toggle_condition(&mut self, condition: &str) -> bool {
        if self.selected_conditions.remove(condition) {
            false
        } else {
            self.selected_conditions.insert(condition.to_string());
            true
        }
    }

    pub fn set_period_date(&mut self, epoch_millis: i64) {
        self.last_period_start_epoch_millis = Some(epoch_millis);
    }

    /// Age, height and weight are all filled in.
    pub fn can_submit(&self) -> bool {
        [&self.age, &self.height, &self.weight]
            .iter()
            .all(|field| !field.trim().is_empty())
    }

    pub fn parsed_age(&self) -> Option<u32> {
        self.age.trim().parse().ok()
    }

    /// Whether the period-date prompt is shown. Does not gate submission.
    pub fn requires_period_date(&self) -> bool {
        self.gender_index == FEMALE_GENDER_INDEX
            && self.parsed_age().unwrap_or(0) > PERIOD_DATE_MIN_AGE
    }

    /// The picked period date rendered with `format`, or the prompt when
    /// none has been picked or `format` cannot render it.
    pub fn period_date_label(&self, format: &str) -> String {
        let Some(date) = self
            .last_period_start_epoch_millis
            .and_then(DateTime::<Utc>::from_timestamp_millis)
        else {
            return PERIOD_DATE_PROMPT.to_string();
        };
        let mut label = String::new();
        match write!(label, "{}", date.format(format)) {
            Ok(()) => label,
            Err(_) => {
                warn!(format, "Period date format cannot be rendered");
                PERIOD_DATE_PROMPT.to_string()
            }
        }
    }

    /// The answers as a document patch, every field included verbatim (an
    /// absent period date is written as `null`).
    pub fn to_patch(&self) -> Result<serde_json::Map<String, serde_json::Value>, StoreError> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            Ok(other) => Err(StoreError::Serialization(format!(
                "survey serialized to non-object: {other}"
            ))),
            Err(e) => Err(StoreError::Serialization(e.to_string())),
        }
    }
}
