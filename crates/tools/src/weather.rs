//! Simulated weather lookup.

use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::debug;

use react_agent_core::{Tool, ToolArguments, ToolDefinition, ToolExecutionError, ToolParameter};

#[derive(Clone, Copy)]
struct Conditions {
    temp_f: i32,
    condition: &'static str,
    humidity: u32,
}

const KNOWN_CITIES: &[(&str, Conditions)] = &[
    ("seattle", Conditions { temp_f: 52, condition: "Rainy", humidity: 85 }),
    ("new york", Conditions { temp_f: 45, condition: "Cloudy", humidity: 60 }),
    ("los angeles", Conditions { temp_f: 72, condition: "Sunny", humidity: 40 }),
    ("miami", Conditions { temp_f: 82, condition: "Partly Cloudy", humidity: 75 }),
    ("chicago", Conditions { temp_f: 38, condition: "Windy", humidity: 55 }),
    ("denver", Conditions { temp_f: 48, condition: "Clear", humidity: 30 }),
];

const RANDOM_CONDITIONS: &[&str] = &["Sunny", "Cloudy", "Rainy", "Clear"];

pub struct Weather {
    definition: ToolDefinition,
}

impl Weather {
    pub fn new() -> Self {
        Self {
            definition: ToolDefinition::function(
                "get_weather",
                "Get the current weather for a location. Returns temperature, conditions, and humidity.",
            )
            .with_parameter(ToolParameter::required("location", "City name, e.g. Seattle")),
        }
    }
}

impl Default for Weather {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup(location: &str) -> Conditions {
    let key = location.to_lowercase();
    if let Some((_, known)) = KNOWN_CITIES.iter().find(|(city, _)| *city == key) {
        return *known;
    }

    debug!(location = %location, "Unknown city, simulating weather");
    let mut rng = rand::thread_rng();
    Conditions {
        temp_f: rng.gen_range(30..=85),
        condition: RANDOM_CONDITIONS.choose(&mut rng).copied().unwrap_or("Clear"),
        humidity: rng.gen_range(30..=90),
    }
}

#[async_trait]
impl Tool for Weather {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn call(&self, args: &ToolArguments) -> Result<String, ToolExecutionError> {
        let location = args
            .get("location")
            .map(|l| l.trim().trim_matches(|c| c == '"' || c == '\''))
            .unwrap_or_default();
        if location.is_empty() {
            return Err(ToolExecutionError::InvalidInput("location must not be empty".into()));
        }

        let weather = lookup(location);
        Ok(format!(
            "Weather in {location}: {}°F, {}, Humidity: {}%",
            weather.temp_f, weather.condition, weather.humidity
        ))
    }
}
