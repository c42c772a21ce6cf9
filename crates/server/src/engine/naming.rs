use shared::Coordinate;

use super::geo;
use crate::config::Config;

/// Label used when no preset is close enough
pub const OFF_TERRITORY_LABEL: &str = "Off-Territory Area";

/// Resolves coordinates to the nearest named preset area
#[derive(Debug, Clone)]
pub struct LocationNamer {
    presets: Vec<(String, Coordinate)>,
    search_ceiling_meters: f64,
    match_radius_meters: f64,
}

impl LocationNamer {
    pub fn new(
        presets: Vec<(String, Coordinate)>,
        search_ceiling_meters: f64,
        match_radius_meters: f64,
    ) -> Self {
        Self {
            presets,
            search_ceiling_meters,
            match_radius_meters,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config
                .presets
                .iter()
                .map(|p| (p.name.clone(), p.coordinate()))
                .collect(),
            config.naming.search_ceiling_meters,
            config.naming.match_radius_meters,
        )
    }

    /// Name of the closest preset strictly within the match radius.
    /// Ties go to the preset listed first.
    pub fn resolve(&self, point: Coordinate) -> String {
        let mut nearest: Option<&str> = None;
        let mut min_distance = self.search_ceiling_meters;

        for (name, center) in &self.presets {
            let d = geo::distance(point, *center);
            if d < min_distance {
                min_distance = d;
                nearest = Some(name);
            }
        }

        match nearest {
            Some(name) if min_distance < self.match_radius_meters => name.to_string(),
            _ => OFF_TERRITORY_LABEL.to_string(),
        }
    }
}
