//! # Microgrid Telemetry
//!
//! A simulated microgrid of four houses sharing a public grid connection. Each
//! fetch produces one telemetry snapshot: the weather, the per-house readings and
//! the resulting trade with the public grid.
//!
//! The same `GridReport` computation backs the `/api/simulation` ingestion
//! endpoint, where the readings come from a dashboard instead of the simulator.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::source::EventSource;
use crate::core::{Event, EventKind};
use crate::error::SourceError;

/// Peak generation of one house, in kWh.
pub const MAX_PRODUCTION: f64 = 5.0;
/// Upper bound (exclusive) of one house's consumption, in kWh.
pub const MAX_DEFICIT: f64 = 2.0;
/// Houses in the simulated grid.
pub const HOUSES: [&str; 4] = ["H1", "H2", "H3", "H4"];

const NOMINAL_VOLTAGE: f64 = 110.0;
const NOMINAL_CURRENT: f64 = 10.0;

/// Weather state driving solar production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weather {
    Sunny,
    Windy,
    Foggy,
    Rainy,
}

impl Weather {
    pub const ALL: [Weather; 4] = [Weather::Sunny, Weather::Windy, Weather::Foggy, Weather::Rainy];

    /// Fraction of `MAX_PRODUCTION` available in this weather.
    pub fn production_factor(&self) -> f64 {
        match self {
            Weather::Sunny => 1.0,
            Weather::Windy => 0.8,
            Weather::Foggy => 0.4,
            Weather::Rainy => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Weather::Sunny => "sunny",
            Weather::Windy => "windy",
            Weather::Foggy => "foggy",
            Weather::Rainy => "rainy",
        }
    }
}

impl fmt::Display for Weather {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One house's meter reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseReading {
    pub house: String,
    pub generation: f64,
    pub consumption: f64,
    /// Dashboards send these as preformatted strings ("110.0"); numbers are
    /// accepted too.
    #[serde(default, deserialize_with = "string_or_number")]
    pub voltage: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub power_factor: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// Power factor of a purely resistive load.
fn power_factor(voltage: f64, current: f64) -> f64 {
    let real = voltage * current;
    let apparent = voltage * current;
    if apparent == 0.0 {
        return 1.0;
    }
    real / apparent
}

/// Public grid side of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicGrid {
    pub balance: f64,
    pub status: String,
}

/// # Grid Report
///
/// Net energy balance of the microgrid and the resulting public grid trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridReport {
    pub weather: String,
    pub total_net_energy: f64,
    pub public_grid_action: String,
    pub houses: Vec<HouseReading>,
    pub public_grid: PublicGrid,
}

impl GridReport {
    /// Sums `generation - consumption` over all houses and derives the trade.
    pub fn from_readings(houses: Vec<HouseReading>, weather: impl Into<String>) -> Self {
        let total_net_energy: f64 = houses.iter().map(|h| h.generation - h.consumption).sum();
        let public_grid_action = public_grid_action(total_net_energy);
        Self {
            weather: weather.into(),
            total_net_energy,
            public_grid: PublicGrid {
                balance: total_net_energy,
                status: public_grid_action.clone(),
            },
            public_grid_action,
            houses,
        }
    }

    /// The report as an event payload.
    pub fn to_payload(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Human-readable trade with the public grid for a net balance.
pub fn public_grid_action(net: f64) -> String {
    if net < 0.0 {
        format!("Purchase of {:.2} kWh from the Public Grid", net.abs())
    } else if net > 0.0 {
        format!("Sale of {:.2} kWh to the Public Grid", net)
    } else {
        "Perfect Energy Balance (No purchase or sale)".to_string()
    }
}

/// # Telemetry Simulator
///
/// `EventSource` producing one grid report per fetch. Weather is drawn at
/// random unless pinned with [`TelemetrySimulator::with_weather`]. Snapshots
/// carry no id and are therefore always novel.
pub struct TelemetrySimulator {
    rng: Mutex<StdRng>,
    weather: Option<Weather>,
}

impl TelemetrySimulator {
    /// Simulator seeded from the OS.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
            weather: None,
        }
    }

    /// Reproducible simulator.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            weather: None,
        }
    }

    /// Pins the weather.
    pub fn with_weather(mut self, weather: Weather) -> Self {
        self.weather = Some(weather);
        self
    }

    /// Draws one set of readings.
    pub fn sample(&self) -> GridReport {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let weather = self
            .weather
            .unwrap_or_else(|| Weather::ALL[rng.random_range(0..Weather::ALL.len())]);
        let generation = MAX_PRODUCTION * weather.production_factor();

        let houses = HOUSES
            .iter()
            .map(|house| HouseReading {
                house: (*house).to_string(),
                generation,
                consumption: rng.random_range(0.0..MAX_DEFICIT),
                voltage: format!("{:.1}", NOMINAL_VOLTAGE),
                power_factor: format!("{:.2}", power_factor(NOMINAL_VOLTAGE, NOMINAL_CURRENT)),
            })
            .collect();

        GridReport::from_readings(houses, weather.as_str())
    }
}

impl Default for TelemetrySimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for TelemetrySimulator {
    fn name(&self) -> &str {
        "telemetry-simulator"
    }

    fn kind(&self) -> EventKind {
        EventKind::Telemetry
    }

    async fn fetch_snapshot(&self) -> Result<Vec<Event>, SourceError> {
        let payload = self.sample().to_payload()?;
        Ok(vec![Event::anonymous(EventKind::Telemetry, payload)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reading(house: &str, generation: f64, consumption: f64) -> HouseReading {
        HouseReading {
            house: house.to_string(),
            generation,
            consumption,
            voltage: "110.0".into(),
            power_factor: "1.00".into(),
        }
    }

    #[test]
    fn grid_action_strings() {
        assert_eq!(public_grid_action(-1.234), "Purchase of 1.23 kWh from the Public Grid");
        assert_eq!(public_grid_action(12.5), "Sale of 12.50 kWh to the Public Grid");
        assert_eq!(public_grid_action(0.0), "Perfect Energy Balance (No purchase or sale)");
    }

    #[test]
    fn report_sums_net_energy() {
        let report = GridReport::from_readings(
            vec![reading("H1", 5.0, 1.0), reading("H2", 0.0, 2.0)],
            "sunny",
        );
        assert_eq!(report.total_net_energy, 2.0);
        assert_eq!(report.public_grid.balance, 2.0);
        assert_eq!(report.public_grid_action, "Sale of 2.00 kWh to the Public Grid");

        let payload = report.to_payload().unwrap();
        assert_eq!(payload["weather"], "sunny");
        assert_eq!(payload["totalNetEnergy"], 2.0);
        assert_eq!(payload["publicGrid"]["status"], payload["publicGridAction"]);
        assert_eq!(payload["houses"][0]["powerFactor"], "1.00");
    }

    #[test]
    fn readings_accept_numeric_voltage() {
        let r: HouseReading = serde_json::from_value(json!({
            "house": "H3", "generation": 4, "consumption": 1.5, "voltage": 110, "powerFactor": "1.00"
        }))
        .unwrap();
        assert_eq!(r.voltage, "110");
        assert_eq!(r.power_factor, "1.00");
    }

    #[test]
    fn rainy_weather_generates_nothing() {
        let sim = TelemetrySimulator::seeded(7).with_weather(Weather::Rainy);
        let report = sim.sample();
        assert_eq!(report.houses.len(), 4);
        assert!(report.houses.iter().all(|h| h.generation == 0.0));
        assert!(report.houses.iter().all(|h| (0.0..MAX_DEFICIT).contains(&h.consumption)));
        assert!(report.total_net_energy <= 0.0);
    }

    #[test]
    fn seeded_simulators_agree() {
        let a = TelemetrySimulator::seeded(42).sample();
        let b = TelemetrySimulator::seeded(42).sample();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn snapshots_are_anonymous_telemetry() {
        let sim = TelemetrySimulator::seeded(1).with_weather(Weather::Sunny);
        let events = sim.fetch_snapshot().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Telemetry);
        assert_eq!(events[0].dedup_key(), None);
        assert_eq!(events[0].payload["houses"][0]["generation"], 5.0);
    }
}
