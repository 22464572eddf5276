use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_DAY_OPTION: &str = "7 - 10 Days (The Essential Experience)";

/// Flow where the agent already knows the destination; it unlocks the
/// destination, country and first-visit steps.
pub const FLOW_HAVE_DESTINATION: &str = "i_have_destination";

/// Answers collected by the "Plan Your Trip" wizard. Forwarded upstream as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanTripForm {
    pub choose_flow: String,
    pub destination: String,
    pub country: Vec<String>,
    pub first_time_visit: String,
    pub season_name: String,
    pub travel_month: String,
    pub themes_options: Vec<String>,
    pub cities_options: Value,
    pub selected_cities: Vec<Value>,
    pub cities_activities: Value,
    pub day_option: String,
    pub meal_preferences: Vec<String>,
    pub transportation: String,
    pub guide: String,
    pub custom_prompt: String,
}

impl Default for PlanTripForm {
    fn default() -> Self {
        Self {
            choose_flow: String::new(),
            destination: String::new(),
            country: Vec::new(),
            first_time_visit: String::new(),
            season_name: String::new(),
            travel_month: String::new(),
            themes_options: Vec::new(),
            cities_options: Value::Array(Vec::new()),
            selected_cities: Vec::new(),
            cities_activities: Value::Array(Vec::new()),
            day_option: DEFAULT_DAY_OPTION.to_string(),
            meal_preferences: Vec::new(),
            transportation: String::new(),
            guide: String::new(),
            custom_prompt: String::new(),
        }
    }
}

/// Wizard steps in the order they are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormStep {
    ChooseFlow,
    Destinations,
    Countries,
    FirstVisit,
    TravelTime,
    Regions,
    CitiesActivities,
    ThemesSingle,
    Days,
    Meals,
    Transfer,
    Guide,
    CustomPrompt,
    Summary,
}

impl FormStep {
    pub const ALL: [FormStep; 14] = [
        FormStep::ChooseFlow,
        FormStep::Destinations,
        FormStep::Countries,
        FormStep::FirstVisit,
        FormStep::TravelTime,
        FormStep::Regions,
        FormStep::CitiesActivities,
        FormStep::ThemesSingle,
        FormStep::Days,
        FormStep::Meals,
        FormStep::Transfer,
        FormStep::Guide,
        FormStep::CustomPrompt,
        FormStep::Summary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormStep::ChooseFlow => "choose_flow",
            FormStep::Destinations => "destinations",
            FormStep::Countries => "countries",
            FormStep::FirstVisit => "first_visit",
            FormStep::TravelTime => "travel_time",
            FormStep::Regions => "regions",
            FormStep::CitiesActivities => "cities_activities",
            FormStep::ThemesSingle => "themes_single",
            FormStep::Days => "days",
            FormStep::Meals => "meals",
            FormStep::Transfer => "transfer",
            FormStep::Guide => "guide",
            FormStep::CustomPrompt => "custom_prompt",
            FormStep::Summary => "summary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FormError {
    pub step: FormStep,
    pub message: &'static str,
}

impl FormError {
    fn at(step: FormStep, message: &'static str) -> Self {
        Self { step, message }
    }
}

impl PlanTripForm {
    fn has_destination_flow(&self) -> bool {
        self.choose_flow == FLOW_HAVE_DESTINATION
    }

    /// Checks a single wizard step.
    pub fn validate_step(&self, step: FormStep) -> Result<(), FormError> {
        let blank = |value: &str| value.trim().is_empty();
        match step {
            FormStep::ChooseFlow if blank(&self.choose_flow) => {
                Err(FormError::at(step, "Please select an option."))
            }
            FormStep::Destinations if self.has_destination_flow() && blank(&self.destination) => {
                Err(FormError::at(step, "Please select a destination."))
            }
            FormStep::Countries if self.has_destination_flow() && self.country.is_empty() => {
                Err(FormError::at(step, "Please select at least one country."))
            }
            FormStep::FirstVisit
                if self.has_destination_flow() && blank(&self.first_time_visit) =>
            {
                Err(FormError::at(step, "Please select an option."))
            }
            FormStep::TravelTime if blank(&self.season_name) => {
                Err(FormError::at(step, "Please select your travel season."))
            }
            // Required for every flow, not just the destination one.
            FormStep::Regions if self.selected_cities.is_empty() => {
                Err(FormError::at(step, "Please select at least one city."))
            }
            FormStep::ThemesSingle if self.themes_options.is_empty() => {
                Err(FormError::at(step, "Please select at least one theme."))
            }
            FormStep::Days if blank(&self.day_option) => {
                Err(FormError::at(step, "Please select trip duration."))
            }
            _ => Ok(()),
        }
    }

    /// Walks every step in wizard order and reports the first failure.
    pub fn validate(&self) -> Result<(), FormError> {
        FormStep::ALL
            .iter()
            .try_for_each(|step| self.validate_step(*step))
    }
}

/// Import from a document the agent already uploaded to file storage.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadImportRequest {
    #[serde(default)]
    pub file_path: String,
    #[serde(default)]
    pub custom_prompt: String,
}

impl UploadImportRequest {
    pub fn validate(&self) -> Result<(), FormError> {
        if self.file_path.trim().is_empty() {
            return Err(FormError::at(
                FormStep::Summary,
                "Please upload a valid file to import.",
            ));
        }
        Ok(())
    }
}
