//! Saved map locations the robot can navigate to.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// A named pose in map coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedLocation {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

pub trait LocationProvider: Send + Sync {
    fn all(&self) -> Vec<SavedLocation>;

    /// Adds or replaces the location with the same name (ignoring case).
    fn save(&self, location: SavedLocation) -> bool;

    /// Forgets every location and returns the names removed. Locations do
    /// not carry over to a new map.
    fn clear(&self) -> Vec<String>;

    /// Case-insensitive lookup by name.
    fn find(&self, name: &str) -> Option<SavedLocation> {
        let wanted = name.trim();
        self.all()
            .into_iter()
            .find(|l| l.name.eq_ignore_ascii_case(wanted))
    }

    fn names(&self) -> Vec<String> {
        self.all().into_iter().map(|l| l.name).collect()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLocations {
    locations: RwLock<Vec<SavedLocation>>,
}

impl InMemoryLocations {
    pub fn new(locations: Vec<SavedLocation>) -> Self {
        Self {
            locations: RwLock::new(locations),
        }
    }

}

impl LocationProvider for InMemoryLocations {
    fn all(&self) -> Vec<SavedLocation> {
        self.locations.read().map(|l| l.clone()).unwrap_or_default()
    }

    fn save(&self, location: SavedLocation) -> bool {
        let Ok(mut all) = self.locations.write() else {
            return false;
        };
        all.retain(|l| !l.name.eq_ignore_ascii_case(&location.name));
        all.push(location);
        true
    }

    fn clear(&self) -> Vec<String> {
        self.locations
            .write()
            .map(|mut all| all.drain(..).map(|l| l.name).collect())
            .unwrap_or_default()
    }
}
